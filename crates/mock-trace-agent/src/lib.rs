// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock APM trace agent.
//!
//! Accepts tracer payloads over HTTP, decodes the MessagePack span chunks they carry and keeps
//! them in memory, aggregated by trace id, for inspection by a CLI or a web dashboard.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod codec;
pub mod config;
pub mod errors;
pub mod events;
pub mod http_utils;
pub mod listener;
pub mod logger;
pub mod span;
pub mod storage;

pub use codec::{decode_trace_chunks, encode_trace_chunks, to_debug_json};
pub use config::Config;
pub use events::{EventBus, StorageEvent};
pub use listener::{ListenerConfig, ReceivedRequest, RequestHandler, TraceListener};
pub use span::{Span, TraceChunk};
pub use storage::{parse_trace_id, StorageOptions, TraceStorage};

/// Path tracers submit v0.4 trace payloads to.
pub const TRACE_ENDPOINT_PATH: &str = "/v0.4/traces";

/// Port the Datadog agent listens on for traces by default.
pub const DEFAULT_TRACE_AGENT_PORT: u16 = 8126;
