//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `vaultgraph_core` linkage and print store statistics.
//! - Keep output as stable `key=value` lines for scripts.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use vaultgraph_core::{
    default_log_level, init_logging, open_db, Context, EdgeRepository, HistoryRepository,
    NodeRepository, PositionRepository, SqliteEdgeRepository, SqliteHistoryRepository,
    SqliteNodeRepository, SqlitePositionRepository, StoreConfig,
};

#[derive(Parser)]
#[command(name = "vaultgraph")]
#[command(about = "Inspect a VaultGraph store")]
struct Cli {
    /// Absolute directory for rolling log files
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Health check
    Ping,
    /// Print the core crate version
    Version,
    /// Print entity counts and the latest ingestion run
    Stats {
        /// Path to the SQLite database
        db_path: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(log_dir) = &cli.log_dir {
        if let Err(err) = init_logging(default_log_level(), &log_dir.to_string_lossy()) {
            eprintln!("error={err}");
            return ExitCode::FAILURE;
        }
    }

    let result = match cli.command {
        Command::Ping => {
            println!("vaultgraph_core ping={}", vaultgraph_core::ping());
            Ok(())
        }
        Command::Version => {
            println!("vaultgraph_core version={}", vaultgraph_core::core_version());
            Ok(())
        }
        Command::Stats { db_path } => print_stats(&db_path),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error={message}");
            ExitCode::FAILURE
        }
    }
}

fn print_stats(db_path: &Path) -> Result<(), String> {
    let conn = open_db(db_path).map_err(|err| err.to_string())?;
    let ctx = Context::background();
    let config = StoreConfig::default();

    let nodes = SqliteNodeRepository::new(&config)
        .count(&ctx, &conn)
        .map_err(|err| err.to_string())?;
    let edges = SqliteEdgeRepository::new(&config)
        .count(&ctx, &conn)
        .map_err(|err| err.to_string())?;
    let positions = SqlitePositionRepository::new(&config)
        .count(&ctx, &conn)
        .map_err(|err| err.to_string())?;
    let history = SqliteHistoryRepository;
    let runs = history.count(&ctx, &conn).map_err(|err| err.to_string())?;
    let latest = history.latest(&ctx, &conn).map_err(|err| err.to_string())?;

    println!("nodes={nodes}");
    println!("edges={edges}");
    println!("positions={positions}");
    println!("ingestion_runs={runs}");
    match latest {
        Some(record) => {
            println!("latest_run_id={}", record.id);
            println!("latest_run_status={}", record.status);
            println!("latest_run_started_at={}", record.started_at);
        }
        None => println!("latest_run_id=none"),
    }
    Ok(())
}
