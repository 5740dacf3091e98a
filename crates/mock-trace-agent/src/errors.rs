// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;

/// Payload bytes that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is truncated")]
    Truncated,
    #[error("unsupported type marker 0x{0:02x}")]
    UnsupportedType(u8),
    #[error("unexpected value: {0}")]
    UnexpectedType(String),
    #[error("{0} unexpected trailing bytes after payload")]
    TrailingBytes(usize),
    #[error("nesting depth limit exceeded")]
    DepthLimitExceeded,
    #[error("malformed payload: {0}")]
    Malformed(String),
}

#[derive(Debug, thiserror::Error)]
#[error("failed to encode trace chunks: {0}")]
pub struct EncodeError(#[from] rmp_serde::encode::Error);

/// Errors raised while starting a [`crate::listener::TraceListener`].
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("failed to bind trace listener to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Result of a storage query that could not be answered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("not found")]
    NotFound,
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
