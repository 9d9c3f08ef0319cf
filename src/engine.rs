//! Analysis orchestration: cache, budget, in-flight de-duplication, and the
//! bounded worker pool.
//!
//! Per file the pipeline is: resolve candidate rules (no candidates = zero
//! cost), compute the cache key, then resolve the key through a per-key
//! single-flight cell. The first requester checks the cache, acquires budget,
//! and calls the provider; concurrent requesters for the same key share that
//! outcome. Completion order is unordered; determinism comes from the final
//! sort.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::budget::{Acquire, BudgetController, CallBudget};
use crate::cache::{CacheKey, CacheOutcome, CallRecord, ReviewCache};
use crate::config::ReviewConfig;
use crate::hashing;
use crate::provider::{
    estimate_cost, AnalysisProvider, ProviderError, ProviderRequest, ProviderResponse,
};
use crate::rules::{Rule, RuleIndex};
use crate::scope::ChangeScope;
use crate::score;
use crate::types::{
    AnalysisRun, FailureKind, FileContext, FileFailure, Issue, RunStats,
};

/// Most issues reported per file; least severe beyond this are dropped.
const MAX_ISSUES_PER_FILE: usize = 10;
/// Backoff before the single retry of a transient failure.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Shared outcome of resolving one cache key.
#[derive(Clone)]
enum KeyOutcome {
    Issues {
        issues: Arc<Vec<Issue>>,
        from_cache: bool,
    },
    OverBudget,
    Failed {
        kind: FailureKind,
        message: String,
    },
    Cancelled,
}

/// How one file's result was obtained.
enum Resolution {
    NoRules,
    Hit,
    Miss,
    /// Shared another file's in-flight call for the same key.
    Coalesced,
}

struct FileReport {
    file: String,
    issues: Vec<Issue>,
    resolution: Resolution,
    over_budget: bool,
    failure: Option<(FailureKind, String)>,
    cancelled: bool,
}

/// Run-scoped counters updated exactly once per unique key resolution.
#[derive(Default)]
struct Tally {
    provider_calls: usize,
    prompt_tokens: usize,
    completion_tokens: usize,
    cost_usd: f64,
}

/// Per-run table collapsing concurrent requests for the same key into one
/// provider call.
#[derive(Default)]
struct Inflight {
    cells: Mutex<HashMap<String, Arc<OnceCell<KeyOutcome>>>>,
}

impl Inflight {
    /// Returns the cell for `fingerprint` and whether this caller installed
    /// it (i.e. is first for the key).
    fn cell(&self, fingerprint: &str) -> (Arc<OnceCell<KeyOutcome>>, bool) {
        let mut cells = match self.cells.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match cells.get(fingerprint) {
            Some(cell) => (Arc::clone(cell), false),
            None => {
                let cell = Arc::new(OnceCell::new());
                cells.insert(fingerprint.to_string(), Arc::clone(&cell));
                (cell, true)
            }
        }
    }
}

/// Orchestrates one review run end to end.
pub struct Engine {
    config: ReviewConfig,
    rules: RuleIndex,
    cache: ReviewCache,
    provider: Arc<dyn AnalysisProvider>,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(
        config: ReviewConfig,
        rules: RuleIndex,
        cache: ReviewCache,
        provider: Arc<dyn AnalysisProvider>,
    ) -> Self {
        Self {
            config,
            rules,
            cache,
            provider,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that aborts in-flight provider calls when cancelled. Entries
    /// already written to the cache stay valid; the run returns whatever it
    /// collected, marked incomplete.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the pipeline over `files`, optionally restricted to `scope`.
    pub async fn run(&self, files: Vec<FileContext>, scope: Option<&ChangeScope>) -> AnalysisRun {
        let started = Instant::now();
        let inflight = Inflight::default();
        let tally = Mutex::new(Tally::default());
        let budget = BudgetController::new(CallBudget {
            max_per_run: self.config.max_calls_per_run,
            max_per_file: self.config.max_calls_per_file,
        });

        let files: Vec<FileContext> = match scope {
            Some(scope) => files
                .into_iter()
                .filter(|f| scope.contains(&f.path))
                .collect(),
            None => files,
        };
        let files_total = files.len();
        debug!("reviewing {} file(s)", files_total);

        let reports: Vec<FileReport> = stream::iter(files)
            .map(|file| self.review_file(file, scope, &inflight, &budget, &tally))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        self.assemble(reports, files_total, tally, started)
    }

    async fn review_file(
        &self,
        file: FileContext,
        scope: Option<&ChangeScope>,
        inflight: &Inflight,
        budget: &BudgetController,
        tally: &Mutex<Tally>,
    ) -> FileReport {
        let path = file.path_str();

        if self.cancel.is_cancelled() {
            return FileReport {
                file: path,
                issues: Vec::new(),
                resolution: Resolution::NoRules,
                over_budget: false,
                failure: None,
                cancelled: true,
            };
        }

        let candidates: Vec<Rule> = self
            .rules
            .candidates(&file.path, &file.content)
            .into_iter()
            .cloned()
            .collect();
        if candidates.is_empty() {
            debug!(file = %path, "no candidate rules, skipping at zero cost");
            return FileReport {
                file: path,
                issues: Vec::new(),
                resolution: Resolution::NoRules,
                over_budget: false,
                failure: None,
                cancelled: false,
            };
        }

        let rules_hash = hashing::hash_rule_ids(candidates.iter().map(|r| r.id.as_str()));
        let key = CacheKey::new(
            file.content_hash.clone(),
            rules_hash,
            self.provider.id().to_string(),
        );
        let (cell, first) = inflight.cell(&key.fingerprint());
        let outcome = cell
            .get_or_init(|| self.resolve_key(&key, &file, candidates, budget, tally))
            .await
            .clone();

        match outcome {
            KeyOutcome::Issues { issues, from_cache } => {
                // Results are keyed by content, not path; rebind locations to
                // the requesting file before filtering.
                let mut mine: Vec<Issue> = issues
                    .iter()
                    .map(|issue| {
                        let mut issue = issue.clone();
                        issue.file = path.clone();
                        issue
                    })
                    .collect();
                if let Some(scope) = scope {
                    mine.retain(|issue| scope.allows(Path::new(&issue.file), issue.line));
                }
                FileReport {
                    file: path,
                    issues: mine,
                    resolution: if !first {
                        Resolution::Coalesced
                    } else if from_cache {
                        Resolution::Hit
                    } else {
                        Resolution::Miss
                    },
                    over_budget: false,
                    failure: None,
                    cancelled: false,
                }
            }
            KeyOutcome::OverBudget => FileReport {
                file: path,
                issues: Vec::new(),
                resolution: if first {
                    Resolution::Miss
                } else {
                    Resolution::Coalesced
                },
                over_budget: true,
                failure: None,
                cancelled: false,
            },
            KeyOutcome::Failed { kind, message } => FileReport {
                file: path,
                issues: Vec::new(),
                resolution: if first {
                    Resolution::Miss
                } else {
                    Resolution::Coalesced
                },
                over_budget: false,
                failure: Some((kind, message)),
                cancelled: false,
            },
            KeyOutcome::Cancelled => FileReport {
                file: path,
                issues: Vec::new(),
                resolution: Resolution::NoRules,
                over_budget: false,
                failure: None,
                cancelled: true,
            },
        }
    }

    /// The single execution per key: cache check, budget, provider call.
    async fn resolve_key(
        &self,
        key: &CacheKey,
        file: &FileContext,
        rules: Vec<Rule>,
        budget: &BudgetController,
        tally: &Mutex<Tally>,
    ) -> KeyOutcome {
        if self.cancel.is_cancelled() {
            return KeyOutcome::Cancelled;
        }

        if let Some(issues) = self.cache.get(key) {
            debug!(file = %file.path.display(), "cache hit");
            self.cache.log_call(&CallRecord {
                timestamp: Utc::now(),
                file: file.path_str(),
                provider: key.provider.clone(),
                cache: CacheOutcome::Hit,
                prompt_tokens: 0,
                completion_tokens: 0,
                duration_ms: 0,
                issues_found: issues.len(),
                cost_usd: 0.0,
            });
            return KeyOutcome::Issues {
                issues: Arc::new(issues),
                from_cache: true,
            };
        }

        match budget.try_acquire(&file.path_str()) {
            Acquire::Granted => {}
            denied => {
                debug!(file = %file.path.display(), "budget denied: {:?}", denied);
                return KeyOutcome::OverBudget;
            }
        }

        let request = ProviderRequest {
            file: file.path_str(),
            language: file.language,
            content: file.content.clone(),
            response_language: self.config.language.clone(),
            rules,
        };
        let call_started = Instant::now();
        let result = self.call_with_retry(&request).await;
        let duration_ms = call_started.elapsed().as_millis() as u64;

        if self.cancel.is_cancelled() {
            return KeyOutcome::Cancelled;
        }

        match result {
            Ok(response) => {
                let issues = match validate_response(&request, &response, file) {
                    Ok(issues) => issues,
                    Err(message) => {
                        warn!(file = %file.path.display(), "invalid provider response: {}", message);
                        self.record_call(&request, &response, duration_ms, 0, tally);
                        return KeyOutcome::Failed {
                            kind: FailureKind::Invalid,
                            message,
                        };
                    }
                };

                // Persist before merging so a crash after this point costs
                // nothing on the next run.
                self.cache.put(key, &issues);
                self.record_call(&request, &response, duration_ms, issues.len(), tally);
                debug!(
                    file = %file.path.display(),
                    "provider reported {} issue(s) in {}ms", issues.len(), duration_ms
                );
                KeyOutcome::Issues {
                    issues: Arc::new(issues),
                    from_cache: false,
                }
            }
            Err(err) => {
                warn!(file = %file.path.display(), "provider call failed: {}", err);
                self.record_call(&request, &ProviderResponse::default(), duration_ms, 0, tally);
                KeyOutcome::Failed {
                    kind: err.kind(),
                    message: err.to_string(),
                }
            }
        }
    }

    /// Transient and rate-limit failures are retried exactly once after a
    /// short backoff; timeouts and invalid responses are not.
    async fn call_with_retry(
        &self,
        request: &ProviderRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        let timeout = Duration::from_secs(self.config.call_timeout_secs);
        match self.call_once(request, timeout).await {
            Err(err) if err.is_retryable() => {
                warn!(file = %request.file, "provider call failed ({}), retrying once", err);
                tokio::select! {
                    _ = self.cancel.cancelled() => Err(err),
                    _ = tokio::time::sleep(RETRY_BACKOFF) => {
                        self.call_once(request, timeout).await
                    }
                }
            }
            other => other,
        }
    }

    async fn call_once(
        &self,
        request: &ProviderRequest,
        timeout: Duration,
    ) -> Result<ProviderResponse, ProviderError> {
        tokio::select! {
            _ = self.cancel.cancelled() => {
                Err(ProviderError::Transient("run cancelled".to_string()))
            }
            result = tokio::time::timeout(timeout, self.provider.analyze(request)) => {
                match result {
                    Ok(inner) => inner,
                    Err(_) => Err(ProviderError::Timeout),
                }
            }
        }
    }

    fn record_call(
        &self,
        request: &ProviderRequest,
        response: &ProviderResponse,
        duration_ms: u64,
        issues_found: usize,
        tally: &Mutex<Tally>,
    ) {
        // Providers that do not report usage get a rough estimate.
        let prompt_tokens = if response.prompt_tokens > 0 {
            response.prompt_tokens
        } else {
            self.provider.estimate_tokens(&request.content)
        };
        let completion_tokens = response.completion_tokens;
        let cost_usd = estimate_cost(self.provider.id(), prompt_tokens, completion_tokens);

        {
            let mut tally = match tally.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            tally.provider_calls += 1;
            tally.prompt_tokens += prompt_tokens;
            tally.completion_tokens += completion_tokens;
            tally.cost_usd += cost_usd;
        }

        self.cache.log_call(&CallRecord {
            timestamp: Utc::now(),
            file: request.file.clone(),
            provider: self.provider.id().to_string(),
            cache: CacheOutcome::Miss,
            prompt_tokens,
            completion_tokens,
            duration_ms,
            issues_found,
            cost_usd,
        });
    }

    fn assemble(
        &self,
        reports: Vec<FileReport>,
        files_total: usize,
        tally: Mutex<Tally>,
        started: Instant,
    ) -> AnalysisRun {
        let mut stats = RunStats {
            files_total,
            ..RunStats::default()
        };
        let mut issues = Vec::new();
        let mut skipped_budget = Vec::new();
        let mut failures = Vec::new();
        let mut incomplete = false;

        for report in reports {
            if report.cancelled {
                incomplete = true;
                continue;
            }
            match report.resolution {
                Resolution::NoRules => stats.files_without_rules += 1,
                Resolution::Hit => stats.cache_hits += 1,
                Resolution::Miss => stats.cache_misses += 1,
                Resolution::Coalesced => stats.coalesced += 1,
            }
            if report.over_budget {
                skipped_budget.push(report.file);
                continue;
            }
            if let Some((kind, message)) = report.failure {
                failures.push(FileFailure {
                    file: report.file,
                    kind,
                    message,
                });
                continue;
            }
            if !matches!(report.resolution, Resolution::NoRules) {
                stats.files_reviewed += 1;
            }
            issues.extend(report.issues);
        }

        let tally = match tally.into_inner() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        stats.provider_calls = tally.provider_calls;
        stats.prompt_tokens = tally.prompt_tokens;
        stats.completion_tokens = tally.completion_tokens;
        stats.cost_usd = tally.cost_usd;
        stats.duration_ms = started.elapsed().as_millis() as u64;

        let issues = finalize_issues(issues);
        skipped_budget.sort();
        failures.sort_by(|a, b| a.file.cmp(&b.file));

        let score = score::calculate(&issues);
        let (gate_passed, fail_reasons) = score::check_gate(&issues, self.config.score_threshold);

        AnalysisRun {
            issues,
            score,
            gate_passed,
            fail_reasons,
            skipped_budget,
            failures,
            incomplete,
            stats,
        }
    }
}

/// Shape-validate a provider response into issues for `file`.
///
/// Structural problems fail the whole response; an issue naming a rule
/// outside the candidate set is merely dropped.
fn validate_response(
    request: &ProviderRequest,
    response: &ProviderResponse,
    file: &FileContext,
) -> Result<Vec<Issue>, String> {
    let max_line = file.line_count().max(1);
    let mut issues = Vec::with_capacity(response.issues.len());

    for raw in &response.issues {
        if raw.line == 0 {
            return Err(format!("issue for rule {:?} has line 0", raw.rule_id));
        }
        if raw.message.trim().is_empty() {
            return Err(format!("issue for rule {:?} has an empty message", raw.rule_id));
        }
        if !request.rules.iter().any(|r| r.id == raw.rule_id) {
            debug!(
                "dropping issue for rule {:?} outside the candidate set",
                raw.rule_id
            );
            continue;
        }

        let line = raw.line.min(max_line);
        let end_line = raw.end_line.unwrap_or(line).clamp(line, max_line);
        issues.push(Issue {
            rule_id: raw.rule_id.clone(),
            level: raw.level,
            file: file.path_str(),
            line,
            end_line,
            message: raw.message.trim().to_string(),
            suggestion: raw.suggestion.clone(),
        });
    }

    Ok(issues)
}

/// De-duplicate, cap per file, and order deterministically by
/// (path, line, severity) so output is stable regardless of completion order.
fn finalize_issues(issues: Vec<Issue>) -> Vec<Issue> {
    let mut seen = HashSet::new();
    let mut unique: Vec<Issue> = Vec::with_capacity(issues.len());
    for issue in issues {
        if seen.insert(issue.key()) {
            unique.push(issue);
        }
    }

    let mut by_file: BTreeMap<String, Vec<Issue>> = BTreeMap::new();
    for issue in unique {
        by_file.entry(issue.file.clone()).or_default().push(issue);
    }

    let mut out = Vec::new();
    for (_, mut file_issues) in by_file {
        file_issues.sort_by(|a, b| {
            a.level
                .rank()
                .cmp(&b.level.rank())
                .then(a.line.cmp(&b.line))
        });
        file_issues.truncate(MAX_ISSUES_PER_FILE);
        out.extend(file_issues);
    }

    out.sort_by(|a, b| {
        a.file
            .cmp(&b.file)
            .then(a.line.cmp(&b.line))
            .then(a.level.rank().cmp(&b.level.rank()))
            .then(a.rule_id.cmp(&b.rule_id))
    });
    out
}
