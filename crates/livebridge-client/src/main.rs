//! livebridge CLI entry point.

use std::process::ExitCode;

use clap::Parser;
use tracing::Level;

use livebridge_client::cli::{Cli, Command, ConfigAction};
use livebridge_client::commands;
use livebridge_client::config::ClientConfig;
use livebridge_client::error::ClientResult;
use livebridge_core::{TracingConfig, TracingOutputFormat, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let tracing = if cli.debug {
        TracingConfig::cli_debug()
    } else {
        TracingConfig::default()
            .with_level(Level::WARN)
            .with_format(TracingOutputFormat::Compact)
    };
    if let Err(e) = init_tracing(tracing) {
        eprintln!("warning: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ClientResult<()> {
    let mut config = if let Some(ref path) = cli.config {
        ClientConfig::load_from(path)?
    } else {
        ClientConfig::load().unwrap_or_default()
    };

    // Flags override the file
    if let Some(timeout) = cli.timeout {
        config.bridge.timeout = timeout;
    }
    if let Some(path) = cli.server_port_file {
        config.bridge.server_port_file = Some(path);
    }

    match cli.command {
        Command::Call(ref args) => commands::call::call(args, &config.bridge).await,
        Command::Ping => commands::call::ping(&config.bridge).await,
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::config::dump(&config),
            ConfigAction::Path => commands::config::path(),
        },
    }
}
