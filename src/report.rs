//! Output formatting for review results.
//!
//! Two formats:
//! - Text: colored terminal output for humans
//! - JSON: structured output for CI and tooling

use colored::*;
use serde::Serialize;

use crate::types::{AnalysisRun, Issue, IssueLevel};

/// JSON envelope around a run.
#[derive(Serialize)]
struct JsonReport<'a> {
    version: &'static str,
    #[serde(flatten)]
    run: &'a AnalysisRun,
}

/// Write the run as pretty-printed JSON to stdout.
pub fn write_json(run: &AnalysisRun) -> anyhow::Result<()> {
    let report = JsonReport {
        version: env!("CARGO_PKG_VERSION"),
        run,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn level_colored(level: IssueLevel) -> ColoredString {
    match level {
        IssueLevel::Blocker => level.as_str().red().bold(),
        IssueLevel::Critical => level.as_str().red(),
        IssueLevel::Major => level.as_str().yellow(),
        IssueLevel::Minor => level.as_str().cyan(),
        IssueLevel::Info => level.as_str().normal(),
    }
}

fn write_issue(issue: &Issue) {
    println!(
        "  {}:{} [{}] {} {}",
        issue.file,
        issue.line,
        level_colored(issue.level),
        issue.rule_id.dimmed(),
        issue.message
    );
    if let Some(suggestion) = &issue.suggestion {
        println!("      fix: {}", suggestion.dimmed());
    }
}

/// Write a colored human-readable report to stdout.
pub fn write_text(run: &AnalysisRun) {
    println!();
    if run.issues.is_empty() {
        println!("{}", "No issues found.".green());
    } else {
        println!("{} issue(s):", run.issues.len());
        for issue in &run.issues {
            write_issue(issue);
        }
    }

    if !run.skipped_budget.is_empty() {
        println!();
        println!(
            "{} {} file(s) not analyzed (call budget exhausted):",
            "!".yellow(),
            run.skipped_budget.len()
        );
        for file in &run.skipped_budget {
            println!("  {}", file);
        }
    }

    if !run.failures.is_empty() {
        println!();
        println!("{} {} file(s) failed:", "!".yellow(), run.failures.len());
        for failure in &run.failures {
            println!("  {} [{}] {}", failure.file, failure.kind, failure.message);
        }
    }

    println!();
    let stats = &run.stats;
    println!(
        "Files: {} ({} reviewed, {} without triggers) | Cache: {} hit(s), {} miss(es), {} coalesced",
        stats.files_total,
        stats.files_reviewed,
        stats.files_without_rules,
        stats.cache_hits,
        stats.cache_misses,
        stats.coalesced,
    );
    println!(
        "Calls: {} | Tokens: {} in / {} out | Est. cost: ${:.4} | {}ms",
        stats.provider_calls,
        stats.prompt_tokens,
        stats.completion_tokens,
        stats.cost_usd,
        stats.duration_ms,
    );

    if run.incomplete {
        println!("{}", "Run was cancelled; results are incomplete.".yellow());
    }

    let verdict = if run.gate_passed {
        "PASSED".green().bold()
    } else {
        "FAILED".red().bold()
    };
    println!("Score: {}/100 | Gate: {}", run.score, verdict);
    for reason in &run.fail_reasons {
        println!("  - {}", reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunStats;

    fn sample_run() -> AnalysisRun {
        AnalysisRun {
            issues: vec![Issue {
                rule_id: "python/bare-except".to_string(),
                level: IssueLevel::Major,
                file: "views.py".to_string(),
                line: 12,
                end_line: 14,
                message: "bare except hides failures".to_string(),
                suggestion: Some("catch the narrow type".to_string()),
            }],
            score: 92,
            gate_passed: true,
            fail_reasons: Vec::new(),
            skipped_budget: vec!["big.py".to_string()],
            failures: Vec::new(),
            incomplete: false,
            stats: RunStats {
                files_total: 2,
                files_reviewed: 1,
                cache_hits: 0,
                cache_misses: 1,
                provider_calls: 1,
                ..RunStats::default()
            },
        }
    }

    #[test]
    fn test_json_report_shape() {
        let run = sample_run();
        let report = JsonReport {
            version: "test",
            run: &run,
        };
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&report).unwrap()).unwrap();

        assert_eq!(value["version"], "test");
        assert_eq!(value["score"], 92);
        assert_eq!(value["issues"][0]["rule_id"], "python/bare-except");
        assert_eq!(value["issues"][0]["line"], 12);
        assert_eq!(value["skipped_budget"][0], "big.py");
        assert_eq!(value["stats"]["provider_calls"], 1);
    }
}
