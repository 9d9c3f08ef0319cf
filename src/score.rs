//! Score and gate calculation.
//!
//! Both functions are pure: given the same issue multiset they always return
//! the same result, so cached and fresh runs of unchanged content can never
//! disagree.

use crate::types::{Issue, IssueLevel};

/// Penalty weights per severity level.
pub mod weights {
    pub const BLOCKER: i32 = 25;
    pub const CRITICAL: i32 = 15;
    pub const MAJOR: i32 = 8;
    pub const MINOR: i32 = 3;
    pub const INFO: i32 = 0;
}

/// Maximum penalty any single severity tier may contribute. Keeps one
/// pathological file from burying the rest of the signal.
pub const TIER_CAP: i32 = 40;

/// Default minimum passing score.
pub const DEFAULT_THRESHOLD: i32 = 70;

/// Severity levels whose presence fails the gate outright.
pub const FAIL_LEVELS: &[IssueLevel] =
    &[IssueLevel::Blocker, IssueLevel::Critical, IssueLevel::Major];

pub fn weight(level: IssueLevel) -> i32 {
    match level {
        IssueLevel::Blocker => weights::BLOCKER,
        IssueLevel::Critical => weights::CRITICAL,
        IssueLevel::Major => weights::MAJOR,
        IssueLevel::Minor => weights::MINOR,
        IssueLevel::Info => weights::INFO,
    }
}

/// Calculate the quality score (0-100, higher is better).
pub fn calculate(issues: &[Issue]) -> i32 {
    let mut per_tier = [0i32; 5];
    for issue in issues {
        per_tier[issue.level.rank() as usize] += weight(issue.level);
    }
    let penalty: i32 = per_tier.iter().map(|p| (*p).min(TIER_CAP)).sum();
    (100 - penalty).max(0)
}

/// Check the quality gate: no blocking-severity issues and a score at or
/// above `threshold`. Returns the verdict and human-readable fail reasons.
pub fn check_gate(issues: &[Issue], threshold: i32) -> (bool, Vec<String>) {
    let mut reasons = Vec::new();

    for level in FAIL_LEVELS {
        let count = issues.iter().filter(|i| i.level == *level).count();
        if count > 0 {
            reasons.push(format!("{} {} issue(s)", count, level));
        }
    }

    let score = calculate(issues);
    if score < threshold {
        reasons.push(format!("score {} below threshold {}", score, threshold));
    }

    (reasons.is_empty(), reasons)
}
