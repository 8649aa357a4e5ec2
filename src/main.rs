use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use playtrail::cli::{self, Cli};
use playtrail::config::{Config, LogFormat};

fn init_tracing(config: &Config) {
    // Logs go to stderr; stdout carries command output.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::resolve(cli.config.as_deref())?;
    init_tracing(&config);

    tracing::debug!(database = ?cli.database, "starting");
    cli::run(&cli, config)
}
