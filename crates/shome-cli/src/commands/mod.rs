//! CLI subcommand implementations.

pub mod analytics;
pub mod import;
pub mod readings;
pub mod status;
pub mod util;
