//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::analytics::{PeakPowerArgs, TempDiffArgs};
use crate::commands::import::ImportArgs;
use crate::commands::readings::ReadingsArgs;

/// Smart-home reading store and analytics.
///
/// Imports sensor readings and answers cross-device questions such as the
/// largest temperature gap between two rooms or the household power peak.
#[derive(Debug, Parser)]
#[command(name = "shome", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Import devices, sensors and readings from a JSONL file.
    Import(ImportArgs),

    /// List the readings of a device within a period.
    Readings(ReadingsArgs),

    /// Maximum instantaneous temperature difference between two devices.
    TempDiff(TempDiffArgs),

    /// Peak instantaneous total power consumption across all devices.
    PeakPower(PeakPowerArgs),

    /// Show store status.
    Status,
}
