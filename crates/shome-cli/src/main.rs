use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use shome_core::ReadingService;
use tracing_subscriber::EnvFilter;

use shome_cli::commands::{analytics, import, readings, status};
use shome_cli::{Cli, Commands, Config};

/// Load config and open database, ensuring the parent directory exists.
fn open_database(config_path: Option<&Path>) -> Result<(shome_db::Database, Config)> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let db = shome_db::Database::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;
    Ok((db, config))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match &cli.command {
        Some(Commands::Import(args)) => {
            let (db, _config) = open_database(cli.config.as_deref())?;
            import::run(&mut out, &db, args)?;
        }
        Some(Commands::Readings(args)) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            let service = ReadingService::new(&db, &db).with_config(
                config
                    .analytics()
                    .context("invalid analytics configuration")?,
            );
            readings::run(&mut out, &service, args)?;
        }
        Some(Commands::TempDiff(args)) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            let service = ReadingService::new(&db, &db).with_config(
                config
                    .analytics()
                    .context("invalid analytics configuration")?,
            );
            analytics::run_temp_diff(&mut out, &service, args)?;
        }
        Some(Commands::PeakPower(args)) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            let service = ReadingService::new(&db, &db).with_config(
                config
                    .analytics()
                    .context("invalid analytics configuration")?,
            );
            analytics::run_peak_power(&mut out, &service, args)?;
        }
        Some(Commands::Status) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            status::run(&mut out, &db, &config.database_path)?;
        }
        None => {
            // No subcommand, show help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    out.flush()?;
    Ok(())
}
