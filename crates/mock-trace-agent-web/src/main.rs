// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use clap::Parser;
use mock_trace_agent::{logger, Config};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "mock-trace-agent-web")]
#[command(about = "Mock trace agent with a live web dashboard", long_about = None)]
struct Cli {
    /// Port tracers send payloads to
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Port for the dashboard API and WebSocket
    #[arg(short = 'd', long)]
    dashboard_port: Option<u16>,

    /// Log level: trace, debug, info, warn or error
    #[arg(long)]
    log_level: Option<String>,

    /// Report why payloads failed to decode in payload details
    #[arg(long)]
    surface_decode_errors: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(port) = cli.port {
        config.trace_agent_port = port;
    }
    if let Some(port) = cli.dashboard_port {
        config.dashboard_port = port;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level.to_lowercase();
    }
    config.surface_decode_errors |= cli.surface_decode_errors;
    config.validate()?;

    logger::init(&config.log_level)?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutting down");
                signal_token.cancel();
            }
            Err(e) => error!("Unable to listen for shutdown signal: {e}"),
        }
    });

    mock_trace_agent_web::run(&config, shutdown).await
}
