mod cli;
mod logging;

use std::io;
use std::process;
use std::sync::Arc;

use catalog_tracker::config::{load_configuration, load_configuration_from};
use catalog_tracker::scanner::LocalFileSystem;
use catalog_tracker::service::canonical_root;
use catalog_tracker::storage::{self, ensure_catalog};
use catalog_tracker::{
    AppConfig, CatalogStore, DeltaAction, ReconcileEngine, SqliteStore, TrackerService, Visibility,
};
use clap::{CommandFactory, Parser};
use cli::progress::CliReporter;
use cli::prompt::prompt_confirm;
use cli::{Cli, Commands};
use colored::*;
use dotenv::dotenv;
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let args = Cli::parse();

    let loaded = match &args.config {
        Some(path) => load_configuration_from(path),
        None => load_configuration(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    match args.command {
        Some(Commands::Watch) => {
            if let Err(err) = run_watch(&config) {
                error!("Error: {}", err);
            }
        }
        Some(Commands::Reconcile { dry_run }) => {
            if let Err(err) = run_reconcile(&config, dry_run) {
                error!("Error: {}", err);
            }
        }
        Some(Commands::Status) => {
            if let Err(err) = run_status(&config) {
                error!("Error: {}", err);
            }
        }
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:?}", config);
        }
        Some(Commands::TruncateDb) => {
            match prompt_confirm(
                "Are you SURE you want to COMPLETELY DELETE every catalog?",
                Some(false),
            ) {
                Ok(true) => {
                    let mut store = SqliteStore::open(&config.database_path)?;
                    store.truncate_all()?;
                    println!("All tables truncated");
                }
                _ => process::exit(0),
            }
        }
        None => {
            let _ = Cli::command().print_long_help();
        }
    }

    Ok(())
}

fn run_watch(config: &AppConfig) -> anyhow::Result<()> {
    let store = storage::shared(SqliteStore::open(&config.database_path)?);
    let service = TrackerService::new(config, store, Arc::new(LocalFileSystem))?;

    for report in service.start() {
        info!(
            "Queued {} extras and {} changes",
            format!("{}", report.extras).cyan(),
            format!("{}", report.changes).cyan(),
        );
    }

    println!("Tracking {} roots. Press Enter to stop.", service.trackers().len());
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;

    service.stop();
    for tracker in service.trackers() {
        let stats = tracker.stats();
        info!(
            "{}: {} executed, {} errors, {} still queued",
            tracker.catalog().path,
            format!("{}", stats.executed).green(),
            format!("{}", stats.errors).red(),
            stats.queued,
        );
    }
    Ok(())
}

fn run_reconcile(config: &AppConfig, dry_run: bool) -> anyhow::Result<()> {
    let store = storage::shared(SqliteStore::open(&config.database_path)?);
    let engine = ReconcileEngine::new(store.clone()).with_filter(Arc::new(config.file_filter()));
    let reporter = CliReporter::new();

    for root in config.roots() {
        let catalog = {
            let mut guard = storage::lock(&store);
            ensure_catalog(&mut *guard, &root.display_name(), &canonical_root(&root.path))?
        };
        let result = engine.reconcile(&catalog, dry_run, &reporter)?;

        println!();
        info!(
            "{}: scan {}, apply {}, {} entries, {} unreadable",
            catalog.path,
            format!("{:.2}s", result.scan_duration.as_secs_f64()).green(),
            format!("{:.2}s", result.apply_duration.as_secs_f64()).green(),
            result.entries_scanned,
            format!("{}", result.skipped).yellow(),
        );
        info!(
            "{} add, {} clone, {} update, {} meta, {} delete",
            format!("{}", result.count(DeltaAction::Add)).cyan(),
            format!("{}", result.count(DeltaAction::Clone)).cyan(),
            format!("{}", result.count(DeltaAction::Update)).cyan(),
            format!("{}", result.count(DeltaAction::Meta)).cyan(),
            format!("{}", result.count(DeltaAction::Delete)).red(),
        );
        if dry_run {
            for delta in result.deltas.iter().filter(|d| d.action != DeltaAction::None) {
                println!("  {:>6} {}", delta.action, delta.path());
            }
        } else if let Some(summary) = &result.applied {
            if summary.failed > 0 {
                info!("{} actions failed", format!("{}", summary.failed).red());
            }
        }
    }
    Ok(())
}

fn run_status(config: &AppConfig) -> anyhow::Result<()> {
    let store = SqliteStore::open(&config.database_path)?;
    let catalogs = store.catalogs()?;
    if catalogs.is_empty() {
        println!("No catalogs in {}", config.database_path);
        return Ok(());
    }

    for catalog in catalogs {
        let live = store.count_entries(catalog.id, Visibility::Live)?;
        let all = store.count_entries(catalog.id, Visibility::IncludeDeleted)?;
        let indexed = if catalog.is_indexed {
            "indexed".green()
        } else {
            "not indexed".yellow()
        };
        println!(
            "{:>4} {} ({}) {}: {} live, {} deleted",
            catalog.id,
            catalog.name.bold(),
            catalog.path,
            indexed,
            live,
            all - live,
        );
    }
    Ok(())
}
