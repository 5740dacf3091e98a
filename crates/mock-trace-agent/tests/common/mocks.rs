// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock request handlers for testing

use mock_trace_agent::{ReceivedRequest, RequestHandler};
use std::sync::Mutex;

/// A request copied out of the listener
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedRequest {
    pub url: String,
    pub content_length: u64,
    pub body: Vec<u8>,
}

/// Handler that records every request it receives
#[derive(Default)]
pub struct RecordingHandler {
    pub requests: Mutex<Vec<RecordedRequest>>,
}

#[allow(dead_code)]
impl RecordingHandler {
    pub fn recorded(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl RequestHandler for RecordingHandler {
    fn on_request(&self, request: &ReceivedRequest<'_>) -> anyhow::Result<()> {
        self.requests.lock().unwrap().push(RecordedRequest {
            url: request.url.to_string(),
            content_length: request.content_length,
            body: request.body.to_vec(),
        });
        Ok(())
    }
}

/// Handler that always fails
#[allow(dead_code)]
pub struct FailingHandler;

impl RequestHandler for FailingHandler {
    fn on_request(&self, request: &ReceivedRequest<'_>) -> anyhow::Result<()> {
        anyhow::bail!("refusing request to {}", request.url)
    }
}
