use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::env;
use std::path::{Path, PathBuf};
use std::process;

use risk_observatory::{
    run, run_single, run_health_check, Aggregator, CheckStatus, Config, FileFetcher, RunSummary,
    SourceKind, Store,
};

const DEFAULT_DB_PATH: &str = "data/risk_data.db";
const DEFAULT_DROP_DIR: &str = "data/incoming";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("help");

    match command {
        "init" => cmd_init(&args),
        "run" => cmd_run(&args),
        "score" => cmd_score(&args),
        "health" => cmd_health(&args),
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            print_usage();
            bail!("Unknown command: {other}");
        }
    }
}

fn print_usage() {
    println!("Risk Observatory v{}", risk_observatory::VERSION);
    println!();
    println!("Usage:");
    println!("  risk-observatory init                  create the database and schema");
    println!("  risk-observatory run                   full run: all sources + scoring");
    println!("  risk-observatory run --source <name>   one source (filings|notices|litigation)");
    println!("  risk-observatory score [--as-of DATE]  recompute scores from stored records");
    println!("  risk-observatory health                data health check");
    println!();
    println!("Options:");
    println!("  --db <path>        database file (default {DEFAULT_DB_PATH})");
    println!("  --incoming <dir>   document drop directory (default {DEFAULT_DROP_DIR})");
    println!("  --config <path>    TOML config file");
}

// ============================================================================
// ARGUMENT HELPERS
// ============================================================================

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn load_config(args: &[String]) -> Result<Config> {
    let path = flag_value(args, "--config").map(PathBuf::from);
    Config::load_or_default(path.as_deref())
}

fn open_store(args: &[String], config: &Config) -> Result<Store> {
    let db_path = flag_value(args, "--db").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
    if let Some(parent) = Path::new(&db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let store = Store::open(Path::new(&db_path), config)
        .with_context(|| format!("Failed to open database {db_path}"))?;
    Ok(store)
}

// ============================================================================
// COMMANDS
// ============================================================================

fn cmd_init(args: &[String]) -> Result<()> {
    let config = load_config(args)?;
    let _store = open_store(args, &config)?;
    println!("✓ Database initialized");
    Ok(())
}

fn cmd_run(args: &[String]) -> Result<()> {
    let config = load_config(args)?;
    let store = open_store(args, &config)?;
    let drop_dir = flag_value(args, "--incoming").unwrap_or_else(|| DEFAULT_DROP_DIR.to_string());
    let fetcher = FileFetcher::new(Path::new(&drop_dir));
    let as_of = Utc::now().date_naive();

    let summary = match flag_value(args, "--source") {
        Some(name) => {
            let source = SourceKind::parse(&name)
                .with_context(|| format!("Unknown source: {name}"))?;
            run_single(&store, &config, &fetcher, source, as_of)?
        }
        None => run(&store, &config, &fetcher, as_of)?,
    };

    print_summary(&summary);
    process::exit(summary.exit_code());
}

fn cmd_score(args: &[String]) -> Result<()> {
    let config = load_config(args)?;
    let store = open_store(args, &config)?;
    let as_of = match flag_value(args, "--as-of") {
        Some(raw) => chrono::NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .with_context(|| format!("Bad --as-of date: {raw}"))?,
        None => Utc::now().date_naive(),
    };

    let summary = Aggregator::new(&store, &config.scoring).recompute(as_of)?;
    println!(
        "✓ Scored {} entities ({} failed)",
        summary.entities_scored, summary.entities_failed
    );

    let mut scores = store.current_scores()?;
    scores.truncate(10);
    if !scores.is_empty() {
        println!("\nHighest current distress scores:");
        for score in &scores {
            let entity = store.get_entity(&score.entity_id)?;
            let name = entity
                .map(|e| e.canonical_name)
                .unwrap_or_else(|| score.entity_id.clone());
            println!(
                "  {:6.1}  {}  (loan {:.0} / labor {:.0} / litigation {:.0})",
                score.composite_score,
                name,
                score.loan_component,
                score.labor_component,
                score.litigation_component
            );
        }
    }

    if summary.entities_failed > 0 {
        process::exit(1);
    }
    Ok(())
}

fn cmd_health(args: &[String]) -> Result<()> {
    let config = load_config(args)?;
    let store = open_store(args, &config)?;
    let report = run_health_check(&store, Utc::now().date_naive())?;

    println!("Data health: {:.0}/100", report.score());
    for check in &report.checks {
        let mark = match check.status {
            CheckStatus::Pass => "✓",
            CheckStatus::Warn => "!",
            CheckStatus::Fail => "✗",
        };
        println!("  {mark} {:<24} {}", check.name, check.detail);
    }

    if report.worst() == CheckStatus::Fail {
        process::exit(1);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("Run complete (as of {})", summary.as_of);
    for outcome in &summary.sources {
        match &outcome.failure {
            Some(reason) => {
                println!("  ✗ {:<12} failed: {reason}", outcome.source.as_str());
            }
            None => {
                println!(
                    "  ✓ {:<12} {} stored ({} new, {} updated), {} skipped, {} conflicts",
                    outcome.source.as_str(),
                    outcome.report.stored(),
                    outcome.report.inserted,
                    outcome.report.updated,
                    outcome.report.skipped,
                    outcome.report.conflicts
                );
            }
        }
    }
    println!(
        "  ✓ scoring      {} entities ({} failed)",
        summary.aggregation.entities_scored, summary.aggregation.entities_failed
    );
}
