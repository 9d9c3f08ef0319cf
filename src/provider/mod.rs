//! External semantic-analysis providers.
//!
//! A provider receives the full file plus the candidate rules and returns
//! structured issues. The engine treats providers as black boxes behind
//! `AnalysisProvider`; everything it needs for retry policy is carried in the
//! error classification.

mod http;
mod mock;
mod prompt;

pub use http::{Backend, HttpProvider};
pub use mock::MockProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rules::Rule;
use crate::types::{FailureKind, IssueLevel, Language};

/// Errors from an external analysis call, classified for the retry policy.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Network-class failure worth one retry.
    #[error("transient provider failure: {0}")]
    Transient(String),
    #[error("provider rate limit hit: {0}")]
    RateLimited(String),
    /// Malformed response or permanent rejection; never retried.
    #[error("invalid provider response: {0}")]
    Invalid(String),
    #[error("provider call timed out")]
    Timeout,
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient(_) | ProviderError::RateLimited(_))
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ProviderError::Transient(_) => FailureKind::Transient,
            ProviderError::RateLimited(_) => FailureKind::RateLimited,
            ProviderError::Invalid(_) => FailureKind::Invalid,
            ProviderError::Timeout => FailureKind::Timeout,
        }
    }
}

/// Request sent to a provider: full file content plus candidate rules.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub file: String,
    pub language: Language,
    pub content: String,
    /// Desired language for issue messages (e.g. "en").
    pub response_language: String,
    pub rules: Vec<Rule>,
}

impl ProviderRequest {
    pub fn rule_ids(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.id.as_str()).collect()
    }
}

/// A raw issue as returned by the provider, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawIssue {
    pub rule_id: String,
    pub level: IssueLevel,
    /// 1-based start line.
    pub line: usize,
    #[serde(default)]
    pub end_line: Option<usize>,
    pub message: String,
    #[serde(default)]
    pub suggestion: Option<String>,
}

/// Parsed provider response with usage accounting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub issues: Vec<RawIssue>,
    #[serde(default)]
    pub prompt_tokens: usize,
    #[serde(default)]
    pub completion_tokens: usize,
}

/// An external semantic-analysis service.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Stable identifier that becomes part of the cache key
    /// (e.g. "anthropic/claude-sonnet-4").
    fn id(&self) -> &str;

    async fn analyze(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError>;

    /// Rough token estimate used for cost accounting.
    fn estimate_tokens(&self, text: &str) -> usize {
        text.len() / 4
    }
}

/// Approximate USD prices per million tokens, by model substring.
static PRICES: &[(&str, f64, f64)] = &[
    ("claude-opus", 15.0, 75.0),
    ("claude-sonnet", 3.0, 15.0),
    ("claude-haiku", 0.8, 4.0),
    ("gpt-4o-mini", 0.15, 0.6),
    ("gpt-4o", 2.5, 10.0),
];

/// Estimate the USD cost of one call from its token usage. Unknown models
/// cost zero rather than guessing.
pub fn estimate_cost(provider_id: &str, prompt_tokens: usize, completion_tokens: usize) -> f64 {
    for (needle, input_price, output_price) in PRICES {
        if provider_id.contains(needle) {
            return (prompt_tokens as f64 * input_price + completion_tokens as f64 * output_price)
                / 1_000_000.0;
        }
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(ProviderError::Transient("conn reset".into()).is_retryable());
        assert!(ProviderError::RateLimited("429".into()).is_retryable());
        assert!(!ProviderError::Invalid("bad json".into()).is_retryable());
        assert!(!ProviderError::Timeout.is_retryable());

        assert_eq!(ProviderError::Timeout.kind(), FailureKind::Timeout);
        assert_eq!(
            ProviderError::Invalid(String::new()).kind(),
            FailureKind::Invalid
        );
    }

    #[test]
    fn test_estimate_cost() {
        let cost = estimate_cost("anthropic/claude-sonnet-4", 1_000_000, 0);
        assert!((cost - 3.0).abs() < 1e-9);

        // gpt-4o-mini must not fall through to the gpt-4o price.
        let mini = estimate_cost("openai/gpt-4o-mini", 1_000_000, 0);
        assert!((mini - 0.15).abs() < 1e-9);

        assert_eq!(estimate_cost("mock/test", 1000, 1000), 0.0);
    }
}
