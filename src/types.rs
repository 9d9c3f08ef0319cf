//! Core types shared across the review pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::hashing;

/// Severity levels for issues, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueLevel {
    Blocker,
    Critical,
    Major,
    Minor,
    Info,
}

impl IssueLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueLevel::Blocker => "blocker",
            IssueLevel::Critical => "critical",
            IssueLevel::Major => "major",
            IssueLevel::Minor => "minor",
            IssueLevel::Info => "info",
        }
    }

    /// Sort rank, 0 = most severe.
    pub fn rank(&self) -> u8 {
        match self {
            IssueLevel::Blocker => 0,
            IssueLevel::Critical => 1,
            IssueLevel::Major => 2,
            IssueLevel::Minor => 3,
            IssueLevel::Info => 4,
        }
    }
}

impl std::fmt::Display for IssueLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for IssueLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "blocker" => Ok(IssueLevel::Blocker),
            "critical" => Ok(IssueLevel::Critical),
            "major" => Ok(IssueLevel::Major),
            "minor" => Ok(IssueLevel::Minor),
            "info" => Ok(IssueLevel::Info),
            _ => Err(format!("unknown issue level: {}", s)),
        }
    }
}

/// Source language of a file under review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Rust,
    Go,
    Java,
    C,
    Cpp,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Rust => "rust",
            Language::Go => "go",
            Language::Java => "java",
            Language::C => "c",
            Language::Cpp => "cpp",
        }
    }

    /// Determine the language from a file extension (without dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "py" => Some(Language::Python),
            "js" | "jsx" | "mjs" | "cjs" => Some(Language::JavaScript),
            "ts" | "tsx" => Some(Language::TypeScript),
            "rs" => Some(Language::Rust),
            "go" => Some(Language::Go),
            "java" => Some(Language::Java),
            "c" | "h" => Some(Language::C),
            "cpp" | "cc" | "hpp" => Some(Language::Cpp),
            _ => None,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single reported issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub rule_id: String,
    pub level: IssueLevel,
    pub file: String,
    /// 1-based start line.
    pub line: usize,
    #[serde(default)]
    pub end_line: usize,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Issue {
    /// Key used for de-duplication across cache and provider results.
    pub fn key(&self) -> String {
        format!("{}|{}|{}|{}", self.rule_id, self.file, self.line, self.message)
    }
}

/// A file under review. Created once per file per run.
#[derive(Debug, Clone)]
pub struct FileContext {
    pub path: PathBuf,
    pub content: String,
    pub content_hash: String,
    pub language: Language,
}

impl FileContext {
    pub fn new(path: PathBuf, content: String, language: Language) -> Self {
        let content_hash = hashing::hash_content(&content);
        Self {
            path,
            content,
            content_hash,
            language,
        }
    }

    pub fn path_str(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    pub fn line_count(&self) -> usize {
        self.content.lines().count()
    }
}

/// Classification of a failed provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Transient,
    RateLimited,
    Invalid,
    Timeout,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Transient => "transient",
            FailureKind::RateLimited => "ratelimited",
            FailureKind::Invalid => "invalid",
            FailureKind::Timeout => "timeout",
        };
        write!(f, "{}", s)
    }
}

/// A per-file failure that did not abort the run.
#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub file: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Counters for one review run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub files_total: usize,
    pub files_reviewed: usize,
    /// Files skipped at zero cost because no rule triggered.
    pub files_without_rules: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    /// Requests that shared another in-flight call for the same key.
    pub coalesced: usize,
    pub provider_calls: usize,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub cost_usd: f64,
    pub duration_ms: u64,
}

/// Aggregate result of one review run.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRun {
    pub issues: Vec<Issue>,
    pub score: i32,
    pub gate_passed: bool,
    pub fail_reasons: Vec<String>,
    /// Files that missed cache after the call budget was exhausted.
    pub skipped_budget: Vec<String>,
    pub failures: Vec<FileFailure>,
    /// Set when the run was cancelled before every file resolved.
    pub incomplete: bool,
    pub stats: RunStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(IssueLevel::Blocker.rank() < IssueLevel::Critical.rank());
        assert!(IssueLevel::Critical.rank() < IssueLevel::Major.rank());
        assert!(IssueLevel::Major.rank() < IssueLevel::Minor.rank());
        assert!(IssueLevel::Minor.rank() < IssueLevel::Info.rank());
    }

    #[test]
    fn test_level_round_trip() {
        for s in ["blocker", "critical", "major", "minor", "info"] {
            let level: IssueLevel = s.parse().unwrap();
            assert_eq!(level.as_str(), s);
        }
        assert!("severe".parse::<IssueLevel>().is_err());
    }

    #[test]
    fn test_language_from_extension() {
        assert_eq!(Language::from_extension("py"), Some(Language::Python));
        assert_eq!(Language::from_extension("tsx"), Some(Language::TypeScript));
        assert_eq!(Language::from_extension("rs"), Some(Language::Rust));
        assert_eq!(Language::from_extension("md"), None);
    }

    #[test]
    fn test_file_context_hashes_content() {
        let a = FileContext::new("a.py".into(), "x = 1\n".into(), Language::Python);
        let b = FileContext::new("b.py".into(), "x = 1\n".into(), Language::Python);
        let c = FileContext::new("c.py".into(), "x = 2\n".into(), Language::Python);
        assert_eq!(a.content_hash, b.content_hash);
        assert_ne!(a.content_hash, c.content_hash);
    }
}
