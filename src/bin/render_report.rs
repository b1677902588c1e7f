//! Render the expense report the bot would send, without running the bot.
//!
//! Usage: render_report <config.json> <output.pdf> [limit]
//!
//! Database, timezone, title and labels come from the config; `limit`
//! overrides `report_limit`.

use std::path::{Path, PathBuf};

use household_expenses::config::Config;
use household_expenses::report::{ReportBuilder, pdf};
use household_expenses::store::ExpenseStore;
use tracing::info;

fn usage() -> ! {
    eprintln!("Usage: render_report <config.json> <output.pdf> [limit]");
    std::process::exit(2);
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (config_path, output) = match (args.first(), args.get(1)) {
        (Some(config_path), Some(output)) => (PathBuf::from(config_path), PathBuf::from(output)),
        _ => usage(),
    };
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {e}");
            std::process::exit(1);
        }
    };
    let limit = match args.get(2).map(|l| l.parse::<usize>()) {
        None => config.report_limit,
        Some(Ok(limit)) => limit,
        Some(Err(_)) => usage(),
    };

    if !config.database_path.exists() {
        eprintln!("❌ No database at {}", config.database_path.display());
        std::process::exit(1);
    }

    if let Err(e) = run(&config, &output, limit) {
        eprintln!("❌ {e}");
        std::process::exit(1);
    }
}

fn run(config: &Config, output: &Path, limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    let store = ExpenseStore::open(&config.database_path)?;
    let expenses = store.list_recent(limit)?;
    info!("Loaded {} expense(s) from {}", expenses.len(), config.database_path.display());

    let report = ReportBuilder::from_config(config).build(&expenses, config.today());
    let bytes = pdf::render(&report)?;
    std::fs::write(output, &bytes)?;

    info!(
        "📊 Wrote {} ({} month(s), {} bytes)",
        output.display(),
        report.months.len(),
        bytes.len()
    );
    Ok(())
}
