// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    header,
    http::{self, HeaderMap, HeaderValue, Uri},
    Response, StatusCode,
};
use tracing::debug;

pub type HttpResponse = Response<Full<Bytes>>;

const EMPTY_JSON_BODY: &str = "{}";

/// Builds the response sent for every request the listener accepts:
/// `200 OK` with body `{}` and an explicit Content-Length, so tracers never fall back to chunked
/// reads.
pub fn create_empty_json_response() -> http::Result<HttpResponse> {
    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        )
        .header(header::CONTENT_LENGTH, EMPTY_JSON_BODY.len())
        .body(Full::new(Bytes::from_static(EMPTY_JSON_BODY.as_bytes())))
}

/// Returns the value of a valid Content-Length header, `None` when it is missing or unparsable.
///
/// Chunked requests carry no Content-Length; callers fall back to the number of bytes read.
pub fn declared_content_length(header_map: &HeaderMap) -> Option<u64> {
    let content_length_header = match header_map.get(header::CONTENT_LENGTH) {
        Some(res) => res,
        None => {
            if let Some(transfer_encoding_header) = header_map.get(header::TRANSFER_ENCODING) {
                debug!(
                    "Transfer-Encoding header is present: {:?}",
                    transfer_encoding_header
                );
            }
            return None;
        }
    };
    content_length_header.to_str().ok()?.trim().parse::<u64>().ok()
}

/// The request target as sent by the client: path plus query, without scheme or authority.
pub fn request_url(uri: &Uri) -> &str {
    uri.path_and_query().map_or_else(|| uri.path(), |pq| pq.as_str())
}
