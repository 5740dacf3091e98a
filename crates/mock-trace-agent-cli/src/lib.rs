// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use clap::{Parser, Subcommand};

pub mod listen;

#[derive(Parser, Debug)]
#[command(name = "mock-trace-agent")]
#[command(about = "Mock Datadog trace agent for testing tracers", long_about = None, version)]
pub struct Cli {
    /// Log level: trace, debug, info, warn or error
    #[arg(long, global = true, env = "DD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Listen for tracer payloads and print a line for every request
    Listen(listen::ListenArgs),
}
