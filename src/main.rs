//! foreman - queue-folder watching LLM dispatch agent.

#![forbid(unsafe_code)]

use anyhow::Context as _;
use clap::Parser as _;
use foreman::app::App;
use foreman::cli::Cli;
use foreman::config::Config;
use foreman::core::Core;
use foreman::startup;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    startup::init();

    let cli = Cli::parse();

    // The config file's own verbose flag must influence the filter, and the
    // subscriber has to exist before Config::load logs its warnings; peek at
    // the flag without full validation.
    let verbose = cli.verbose || peek_verbose(&cli.config);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "trace" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // startup config failures are the only fatal errors: exit code 1
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let mut core = Core::new(config);
    let mut app = App::new(core.config().clone());
    core.run(&mut app);

    Ok(())
}

fn peek_verbose(path: &std::path::Path) -> bool {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
        .and_then(|value| value.get("verbose").and_then(serde_json::Value::as_bool))
        .unwrap_or(false)
}
