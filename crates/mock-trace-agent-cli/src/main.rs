// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use clap::Parser;
use mock_trace_agent::{logger, Config};
use mock_trace_agent_cli::{listen, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config {
        log_level: cli.log_level.to_lowercase(),
        ..Config::default()
    };
    config.validate()?;
    logger::init(&config.log_level)?;

    match cli.command {
        Commands::Listen(args) => listen::run(args).await,
    }
}
