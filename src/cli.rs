//! Command-line interface for redline.

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::ReviewCache;
use crate::config::ReviewConfig;
use crate::discover;
use crate::engine::Engine;
use crate::provider::{AnalysisProvider, HttpProvider, MockProvider};
use crate::report;
use crate::rules::{self, RuleIndex};
use crate::scope::ChangeScope;

/// Exit codes. File-level failures and budget skips never affect the exit
/// code; only the gate verdict and fatal run-level errors do.
pub const EXIT_PASSED: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_ERROR: i32 = 2;

/// Directory holding custom YAML rules, one rule per file.
const CUSTOM_RULES_DIR: &str = ".redline/rules";

/// LLM-assisted code review gate.
///
/// Redline matches cheap rule triggers against your files and sends only the
/// promising ones to an external reviewer model, at most once per unique
/// (content, rules, model) combination and never beyond the call budget.
#[derive(Parser)]
#[command(name = "redline")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Review files against the configured rule packs
    Review(ReviewArgs),
    /// Inspect or clear the result cache
    Cache(CacheArgs),
    /// Summarize external-call cost from the call log
    Costs(CostsArgs),
    /// List the rules the current configuration enables
    Rules(RulesArgs),
    /// Write a starter configuration file
    Init(InitArgs),
}

/// Arguments for the review command.
#[derive(Parser)]
pub struct ReviewArgs {
    /// Files or directories to review
    #[arg(default_value = ".")]
    pub paths: Vec<PathBuf>,

    /// Only report issues in lines changed relative to --base
    #[arg(long)]
    pub changed_only: bool,

    /// Base git reference for --changed-only
    #[arg(long, default_value = "HEAD")]
    pub base: String,

    /// Path to the config file (default: auto-discover)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output format: text or json
    #[arg(short, long, default_value = "text")]
    pub format: String,

    /// Override the configured provider/model
    #[arg(long)]
    pub model: Option<String>,

    /// Override the per-run call budget
    #[arg(long)]
    pub max_calls: Option<u32>,

    /// Override the gate score threshold
    #[arg(long)]
    pub threshold: Option<i32>,
}

/// Arguments for the cache command.
#[derive(Parser)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheAction,
}

#[derive(Subcommand)]
pub enum CacheAction {
    /// Show entry count and total size
    Stats,
    /// Delete all cached results
    Clear,
}

/// Arguments for the costs command.
#[derive(Parser)]
pub struct CostsArgs {
    /// How many days of the call log to include
    #[arg(long, default_value_t = 30)]
    pub days: i64,
}

/// Arguments for the rules command.
#[derive(Parser)]
pub struct RulesArgs {
    /// Path to the config file (default: auto-discover)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Arguments for the init command.
#[derive(Parser)]
pub struct InitArgs {
    /// Output file path
    #[arg(short, long, default_value = ".redline.yaml")]
    pub output: PathBuf,
}

/// Dispatch a parsed command line.
pub fn run(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Review(args) => run_review(&args),
        Commands::Cache(args) => run_cache(&args),
        Commands::Costs(args) => run_costs(&args),
        Commands::Rules(args) => run_rules(&args),
        Commands::Init(args) => run_init(&args),
    }
}

fn load_config(explicit: &Option<PathBuf>) -> Result<ReviewConfig, i32> {
    let loaded = match explicit {
        Some(path) => ReviewConfig::load(path),
        None => ReviewConfig::discover(),
    };
    loaded.map_err(|e| {
        eprintln!("Error: {}", e);
        EXIT_ERROR
    })
}

fn build_index(config: &ReviewConfig) -> Result<RuleIndex, i32> {
    let mut packs = match rules::load_packs(&config.packs) {
        Ok(packs) => packs,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Err(EXIT_ERROR);
        }
    };
    let custom = rules::load_custom_rules(std::path::Path::new(CUSTOM_RULES_DIR));
    if !custom.rules.is_empty() {
        packs.push(custom);
    }

    let index = RuleIndex::build(&packs, &config.disabled_set());
    if index.is_empty() {
        eprintln!("Error: configuration enables no rules");
        return Err(EXIT_ERROR);
    }
    Ok(index)
}

fn build_provider(
    config: &ReviewConfig,
) -> Result<Arc<dyn AnalysisProvider>, i32> {
    if config.provider_name() == "mock" {
        return Ok(Arc::new(MockProvider::new(config.model.clone())));
    }
    match HttpProvider::from_model(&config.model, Duration::from_secs(config.call_timeout_secs)) {
        Ok(provider) => Ok(Arc::new(provider)),
        Err(e) => {
            eprintln!("Error: {}", e);
            Err(EXIT_ERROR)
        }
    }
}

/// Run the review command.
pub fn run_review(args: &ReviewArgs) -> anyhow::Result<i32> {
    if args.format != "text" && args.format != "json" {
        eprintln!(
            "Error: invalid format {:?}, must be 'text' or 'json'",
            args.format
        );
        return Ok(EXIT_ERROR);
    }

    let mut config = match load_config(&args.config) {
        Ok(config) => config,
        Err(code) => return Ok(code),
    };
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if let Some(max_calls) = args.max_calls {
        config.max_calls_per_run = max_calls;
    }
    if let Some(threshold) = args.threshold {
        config.score_threshold = threshold;
    }
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return Ok(EXIT_ERROR);
    }

    // Scope errors must surface before any file is touched.
    let scope = if args.changed_only {
        let cwd = std::env::current_dir()?;
        match ChangeScope::from_repo(&cwd, &args.base, config.diff_context_margin) {
            Ok(scope) => Some(scope),
            Err(e) => {
                eprintln!("Error: {}", e);
                return Ok(EXIT_ERROR);
            }
        }
    } else {
        None
    };

    let index = match build_index(&config) {
        Ok(index) => index,
        Err(code) => return Ok(code),
    };
    let provider = match build_provider(&config) {
        Ok(provider) => provider,
        Err(code) => return Ok(code),
    };

    let files = discover::collect(&args.paths)?;
    if files.is_empty() {
        eprintln!("Warning: no files to review");
        return Ok(EXIT_PASSED);
    }

    let cache = ReviewCache::open(&config.resolved_cache_dir(), config.ttl());
    let engine = Engine::new(config, index, cache, provider);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("reviewing {} file(s)...", files.len()));
    spinner.enable_steady_tick(Duration::from_millis(120));

    let runtime = tokio::runtime::Runtime::new()?;
    let run = runtime.block_on(async {
        let cancel = engine.cancel_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
        engine.run(files, scope.as_ref()).await
    });

    spinner.finish_and_clear();

    match args.format.as_str() {
        "json" => report::write_json(&run)?,
        _ => report::write_text(&run),
    }

    if run.gate_passed {
        Ok(EXIT_PASSED)
    } else {
        Ok(EXIT_FAILED)
    }
}

/// Run the cache command.
pub fn run_cache(args: &CacheArgs) -> anyhow::Result<i32> {
    let config = match load_config(&None) {
        Ok(config) => config,
        Err(code) => return Ok(code),
    };
    let cache = ReviewCache::open(&config.resolved_cache_dir(), config.ttl());

    match args.action {
        CacheAction::Stats => {
            let stats = cache.stats();
            println!("Entries: {}", stats.entries);
            println!("Size:    {} bytes", stats.size_bytes);
        }
        CacheAction::Clear => {
            let deleted = cache.clear();
            println!("Deleted {} cache entr{}", deleted, if deleted == 1 { "y" } else { "ies" });
        }
    }
    Ok(EXIT_PASSED)
}

/// Run the costs command.
pub fn run_costs(args: &CostsArgs) -> anyhow::Result<i32> {
    let config = match load_config(&None) {
        Ok(config) => config,
        Err(code) => return Ok(code),
    };
    let cache = ReviewCache::open(&config.resolved_cache_dir(), config.ttl());
    let summary = cache.cost_summary(args.days);

    println!("Last {} day(s):", args.days);
    println!("  Provider calls: {}", summary.total_calls);
    println!("  Cache hits:     {}", summary.cache_hits);
    println!("  Tokens:         {}", summary.total_tokens);
    println!("  Issues found:   {}", summary.total_issues);
    println!("  Est. cost:      ${:.4}", summary.total_cost_usd);
    Ok(EXIT_PASSED)
}

/// Run the rules command.
pub fn run_rules(args: &RulesArgs) -> anyhow::Result<i32> {
    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(code) => return Ok(code),
    };
    let index = match build_index(&config) {
        Ok(index) => index,
        Err(code) => return Ok(code),
    };

    println!("{} rule(s) enabled:", index.len());
    for rule in index.rules() {
        println!("  {:<36} {:<9} {}", rule.id, rule.level.as_str(), rule.name);
    }
    Ok(EXIT_PASSED)
}

/// Run the init command.
pub fn run_init(args: &InitArgs) -> anyhow::Result<i32> {
    if args.output.exists() {
        eprintln!("Error: file already exists: {}", args.output.display());
        return Ok(EXIT_ERROR);
    }

    std::fs::write(&args.output, include_str!("templates/config.yaml"))?;

    println!("Created {}", args.output.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit {} to pick your packs and model", args.output.display());
    println!("  2. Export the provider API key (e.g. ANTHROPIC_API_KEY)");
    println!("  3. Run: redline review src/");
    Ok(EXIT_PASSED)
}
