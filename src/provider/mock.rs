//! Deterministic provider for tests and offline runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{AnalysisProvider, ProviderError, ProviderRequest, ProviderResponse, RawIssue};
use async_trait::async_trait;

/// Returns canned responses keyed by content substring and records every
/// call. With no matching response it reports zero issues, which also makes
/// it a usable offline provider.
pub struct MockProvider {
    id: String,
    responses: Vec<(String, Vec<RawIssue>)>,
    calls: AtomicUsize,
    delay: Option<Duration>,
    failures: Mutex<Vec<ProviderError>>,
}

impl MockProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            responses: Vec::new(),
            calls: AtomicUsize::new(0),
            delay: None,
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Respond with `issues` whenever the file content contains `needle`.
    pub fn with_response(mut self, needle: impl Into<String>, issues: Vec<RawIssue>) -> Self {
        self.responses.push((needle.into(), issues));
        self
    }

    /// Sleep before answering; lets tests overlap in-flight calls.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the next calls with the given errors (in order) before
    /// succeeding.
    pub fn with_failures(self, failures: Vec<ProviderError>) -> Self {
        {
            let mut queued = match self.failures.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *queued = failures;
            queued.reverse();
        }
        self
    }

    /// Number of analyze calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisProvider for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn analyze(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let queued_failure = {
            let mut queued = match self.failures.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            queued.pop()
        };
        if let Some(err) = queued_failure {
            return Err(err);
        }

        for (needle, issues) in &self.responses {
            if request.content.contains(needle.as_str()) {
                return Ok(ProviderResponse {
                    issues: issues.clone(),
                    prompt_tokens: request.content.len() / 4,
                    completion_tokens: issues.len() * 32,
                });
            }
        }

        Ok(ProviderResponse::default())
    }
}
