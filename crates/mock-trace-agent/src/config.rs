// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;

use crate::errors::ConfigError;
use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::listener::ListenerConfig;
use crate::storage::StorageOptions;
use crate::{DEFAULT_TRACE_AGENT_PORT, TRACE_ENDPOINT_PATH};

pub const DEFAULT_DASHBOARD_PORT: u16 = 5000;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Port tracers send payloads to.
    pub trace_agent_port: u16,
    pub dashboard_port: u16,
    /// Path whose payloads are decoded as v0.4 traces.
    pub trace_path: String,
    pub surface_decode_errors: bool,
    /// Events buffered per subscriber before the oldest are dropped.
    pub event_capacity: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            trace_agent_port: DEFAULT_TRACE_AGENT_PORT,
            dashboard_port: DEFAULT_DASHBOARD_PORT,
            trace_path: TRACE_ENDPOINT_PATH.to_string(),
            surface_decode_errors: false,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // DD_APM_RECEIVER_PORT is what the Datadog agent reads, tracers read DD_TRACE_AGENT_PORT
        let trace_agent_port = env::var("DD_APM_RECEIVER_PORT")
            .or_else(|_| env::var("DD_TRACE_AGENT_PORT"))
            .ok()
            .and_then(|port| port.parse::<u16>().ok())
            .unwrap_or(DEFAULT_TRACE_AGENT_PORT);
        let dashboard_port = env::var("DD_MOCK_AGENT_DASHBOARD_PORT")
            .ok()
            .and_then(|port| port.parse::<u16>().ok())
            .unwrap_or(DEFAULT_DASHBOARD_PORT);
        let trace_path = env::var("DD_MOCK_AGENT_TRACE_PATH")
            .unwrap_or_else(|_| TRACE_ENDPOINT_PATH.to_string());
        let surface_decode_errors = env::var("DD_MOCK_AGENT_SURFACE_DECODE_ERRORS")
            .map(|val| matches!(val.to_lowercase().as_str(), "true" | "1"))
            .unwrap_or(false);
        let event_capacity = env::var("DD_MOCK_AGENT_EVENT_CAPACITY")
            .ok()
            .and_then(|capacity| capacity.parse::<usize>().ok())
            .unwrap_or(DEFAULT_EVENT_CAPACITY);
        let log_level = env::var("DD_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or_else(|_| "info".to_string());

        let config = Self {
            trace_agent_port,
            dashboard_port,
            trace_path,
            surface_decode_errors,
            event_capacity,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.trace_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "Trace path '{}' must start with '/'",
                self.trace_path
            )));
        }

        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "Event capacity must be greater than 0".to_string(),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            port: self.trace_agent_port,
            read_request_body: true,
        }
    }

    pub fn storage_options(&self) -> StorageOptions {
        StorageOptions {
            trace_path: self.trace_path.clone(),
            surface_decode_errors: self.surface_decode_errors,
        }
    }
}
