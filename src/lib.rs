//! Redline - LLM-assisted code review gate.
//!
//! Redline reviews source files by combining cheap static rule triggers with
//! calls to an external semantic-analysis model. The interesting part is not
//! the rules but the orchestration: every file is analyzed at most once per
//! unique (content, rule set, model) combination, runs never exceed their
//! call budget, and results are deterministic regardless of scheduling.
//!
//! # Architecture
//!
//! - `rules`: rule packs and the trigger index deciding which files are
//!   worth an external call
//! - `scope`: changed-file/line scope for incremental runs (git diff)
//! - `cache`: content-addressed result cache with TTL plus the append-only
//!   call log
//! - `budget`: per-file and per-run call caps, safe under concurrency
//! - `provider`: the external model behind a trait (HTTP backends + mock)
//! - `engine`: the orchestrator tying the above together in a bounded
//!   worker pool with per-key in-flight de-duplication
//! - `score`: severity-weighted quality score and gate
//! - `discover`, `config`, `report`, `cli`: the thin surfaces around the
//!   core

pub mod budget;
pub mod cache;
pub mod cli;
pub mod config;
pub mod discover;
pub mod engine;
pub mod hashing;
pub mod provider;
pub mod report;
pub mod rules;
pub mod scope;
pub mod score;
pub mod types;

pub use budget::{Acquire, BudgetController, CallBudget};
pub use cache::{CacheKey, CacheStats, ReviewCache};
pub use config::ReviewConfig;
pub use engine::Engine;
pub use provider::{AnalysisProvider, HttpProvider, MockProvider, ProviderError};
pub use rules::{Rule, RuleIndex, RulePack};
pub use scope::{ChangeScope, ScopeError};
pub use types::{AnalysisRun, FileContext, Issue, IssueLevel, Language};
