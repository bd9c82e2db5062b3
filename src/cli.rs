//! Command-line interface.

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "foreman", version, about = "Queue-folder watching LLM dispatch agent")]
pub struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = "./config.json")]
    pub config: PathBuf,

    /// Enable trace-level logging regardless of the config file.
    #[arg(long)]
    pub verbose: bool,
}
