// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Filter directives for `level`. Connection-level hyper logs are always silenced.
pub fn env_filter_directives(level: &str) -> String {
    format!("h2=off,hyper=off,{level}")
}

/// Installs the global `tracing` subscriber. Logs go to stderr so they never interleave with
/// command output on stdout.
pub fn init(level: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_new(env_filter_directives(level))
        .map_err(|e| anyhow::anyhow!("could not parse log level '{level}': {e}"))?;

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("setting default subscriber failed: {e}"))?;

    debug!("Logging subsystem enabled");
    Ok(())
}
