// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use mock_trace_agent::{encode_trace_chunks, Span};
use std::time::{Duration, UNIX_EPOCH};
use tokio::time::timeout;

/// A single chunk of `span_count` spans sharing `trace_id`, the first one being the root.
#[allow(dead_code)]
pub fn create_test_trace_payload(trace_id: u64, span_count: u64) -> Vec<u8> {
    let start = UNIX_EPOCH.elapsed().unwrap().as_nanos() as i64;
    let chunk = (1..=span_count)
        .map(|span_id| Span {
            trace_id,
            span_id,
            parent_id: (span_id > 1).then_some(1),
            name: Some("test.operation".to_string()),
            resource: Some(format!("resource-{span_id}")),
            service: Some("test-service".to_string()),
            start,
            duration: 1_000,
            ..Default::default()
        })
        .collect();
    encode_trace_chunks(&[chunk]).expect("Failed to serialize test trace")
}

/// Send an HTTP request over TCP and return the response
pub async fn send_tcp_request(
    port: u16,
    uri: &str,
    method: &str,
    body: Option<Vec<u8>>,
) -> Result<Response<hyper::body::Incoming>, Box<dyn std::error::Error>> {
    let stream = timeout(
        Duration::from_secs(2),
        tokio::net::TcpStream::connect(format!("127.0.0.1:{}", port)),
    )
    .await??;

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

    tokio::spawn(async move {
        let _ = conn.await;
    });

    let mut request_builder = Request::builder()
        .uri(uri)
        .method(method)
        .header("Host", "localhost")
        .header("Content-Type", "application/msgpack");

    let body = match body {
        Some(body_data) => {
            request_builder =
                request_builder.header("Content-Length", body_data.len().to_string());
            Full::new(Bytes::from(body_data))
        }
        None => Full::new(Bytes::new()),
    };
    let request = request_builder.body(body)?;
    let response = timeout(Duration::from_secs(2), sender.send_request(request)).await??;

    Ok(response)
}

/// Reads the whole response body as a string
pub async fn response_body_as_string(
    response: Response<hyper::body::Incoming>,
) -> Result<String, Box<dyn std::error::Error>> {
    let bytes = response.into_body().collect().await?.to_bytes();
    Ok(String::from_utf8(bytes.to_vec())?)
}
