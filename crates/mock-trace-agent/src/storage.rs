// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory store of received payloads and of spans aggregated by trace id.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec::{decode_trace_chunks, to_debug_json};
use crate::errors::QueryError;
use crate::events::{EventBus, StorageEvent};
use crate::listener::{ReceivedRequest, RequestHandler};
use crate::span::{id_format, span_count, Span, TraceChunk};
use crate::TRACE_ENDPOINT_PATH;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageOptions {
    /// Payloads are decoded only when received at exactly this path.
    pub trace_path: String,
    /// When set, [`PayloadDetail::decode_error`] reports why a payload could not be decoded.
    pub surface_decode_errors: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        StorageOptions {
            trace_path: TRACE_ENDPOINT_PATH.to_string(),
            surface_decode_errors: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadSummary {
    pub id: String,
    pub received_at: DateTime<Utc>,
    pub url: String,
    pub content_length: u64,
    pub trace_chunk_count: usize,
    pub total_span_count: usize,
}

/// A payload with its decoded chunks. Raw bytes are served separately, see
/// [`TraceStorage::raw_bytes`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadDetail {
    pub id: String,
    pub received_at: DateTime<Utc>,
    pub url: String,
    pub content_length: u64,
    /// `None` when the payload was not decoded or failed to decode.
    pub trace_chunks: Option<Vec<TraceChunk>>,
    pub trace_chunk_count: usize,
    pub total_span_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decode_error: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total_payloads: usize,
    pub total_spans: u64,
    /// Sum of the declared content lengths of all payloads.
    pub total_bytes: u64,
    pub first_seen_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedTraceSummary {
    #[serde(with = "id_format")]
    pub trace_id: u64,
    pub span_count: usize,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedTraceDetail {
    #[serde(with = "id_format")]
    pub trace_id: u64,
    /// In arrival order.
    pub spans: Vec<Span>,
    pub span_count: usize,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

struct StoredPayload {
    sequence: u64,
    id: String,
    received_at: DateTime<Utc>,
    url: String,
    content_length: u64,
    body: Bytes,
    chunks: Option<Vec<TraceChunk>>,
    trace_chunk_count: usize,
    total_span_count: usize,
    decode_error: Option<String>,
}

impl StoredPayload {
    fn summary(&self) -> PayloadSummary {
        PayloadSummary {
            id: self.id.clone(),
            received_at: self.received_at,
            url: self.url.clone(),
            content_length: self.content_length,
            trace_chunk_count: self.trace_chunk_count,
            total_span_count: self.total_span_count,
        }
    }
}

struct AggregatedTrace {
    trace_id: u64,
    spans: Vec<Span>,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    /// Sequence of the payload that last added spans.
    last_updated: u64,
}

impl AggregatedTrace {
    fn summary(&self) -> AggregatedTraceSummary {
        AggregatedTraceSummary {
            trace_id: self.trace_id,
            span_count: self.spans.len(),
            first_seen: self.first_seen,
            last_seen: self.last_seen,
        }
    }
}

#[derive(Default)]
struct State {
    payloads: HashMap<String, StoredPayload>,
    traces: HashMap<u64, AggregatedTrace>,
    next_sequence: u64,
    total_spans: u64,
    total_bytes: u64,
    first_seen_at: Option<DateTime<Utc>>,
    last_seen_at: Option<DateTime<Utc>>,
}

/// Thread-safe store shared by the listener handler and every query consumer.
///
/// All mutations happen under one lock, and the matching [`StorageEvent`] is published before the
/// lock is released, so subscribers observe events in the same order as the state changes.
pub struct TraceStorage {
    options: StorageOptions,
    events: EventBus,
    state: Mutex<State>,
}

impl TraceStorage {
    pub fn new(options: StorageOptions, events: EventBus) -> Self {
        TraceStorage {
            options,
            events,
            state: Mutex::new(State::default()),
        }
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Stores a payload received now. See [`TraceStorage::add_payload_at`].
    pub fn add_payload(&self, url: &str, content_length: u64, body: &[u8]) -> PayloadSummary {
        self.add_payload_at(url, content_length, body, Utc::now())
    }

    /// Stores a payload and folds its spans into the aggregated traces.
    ///
    /// The body is decoded only when `url` is the configured trace path and the body is not
    /// empty. A payload that fails to decode is still stored, with zero counts.
    pub fn add_payload_at(
        &self,
        url: &str,
        content_length: u64,
        body: &[u8],
        received_at: DateTime<Utc>,
    ) -> PayloadSummary {
        let id = Uuid::new_v4().simple().to_string();

        let mut decode_error = None;
        let chunks = if url == self.options.trace_path && !body.is_empty() {
            match decode_trace_chunks(body) {
                Ok(chunks) => Some(chunks),
                Err(e) => {
                    warn!("Failed to decode trace payload {id} received at {url}: {e}");
                    decode_error = Some(e.to_string());
                    None
                }
            }
        } else {
            None
        };
        let trace_chunk_count = chunks.as_ref().map_or(0, Vec::len);
        let total_span_count = chunks.as_deref().map_or(0, span_count);

        let mut guard = self.lock();
        let state = &mut *guard;

        let sequence = state.next_sequence;
        state.next_sequence += 1;

        for span in chunks.iter().flatten().flatten() {
            let trace = state
                .traces
                .entry(span.trace_id)
                .or_insert_with(|| AggregatedTrace {
                    trace_id: span.trace_id,
                    spans: Vec::new(),
                    first_seen: received_at,
                    last_seen: received_at,
                    last_updated: sequence,
                });
            trace.spans.push(span.clone());
            trace.first_seen = trace.first_seen.min(received_at);
            trace.last_seen = trace.last_seen.max(received_at);
            trace.last_updated = sequence;
        }

        state.total_spans = state.total_spans.saturating_add(total_span_count as u64);
        state.total_bytes = state.total_bytes.saturating_add(content_length);
        state.first_seen_at = Some(state.first_seen_at.map_or(received_at, |t| t.min(received_at)));
        state.last_seen_at = Some(state.last_seen_at.map_or(received_at, |t| t.max(received_at)));

        let payload = StoredPayload {
            sequence,
            id: id.clone(),
            received_at,
            url: url.to_string(),
            content_length,
            body: Bytes::copy_from_slice(body),
            chunks,
            trace_chunk_count,
            total_span_count,
            decode_error,
        };
        let summary = payload.summary();
        state.payloads.insert(id, payload);

        self.events
            .publish(StorageEvent::PayloadReceived(summary.clone()));
        drop(guard);

        debug!(
            "Stored payload {} from {}: {} bytes, {} trace chunks, {} spans",
            summary.id,
            summary.url,
            summary.content_length,
            summary.trace_chunk_count,
            summary.total_span_count
        );
        summary
    }

    /// Discards every payload, aggregated trace and counter. Safe to call repeatedly.
    pub fn clear_all(&self) {
        let mut state = self.lock();
        *state = State::default();
        self.events.publish(StorageEvent::DataCleared);
        drop(state);
        info!("Cleared all stored payloads and traces");
    }

    /// Newest first.
    pub fn list_payloads(&self) -> Vec<PayloadSummary> {
        let state = self.lock();
        let mut payloads: Vec<&StoredPayload> = state.payloads.values().collect();
        payloads.sort_unstable_by(|a, b| b.sequence.cmp(&a.sequence));
        payloads.into_iter().map(StoredPayload::summary).collect()
    }

    pub fn payload(&self, id: &str) -> Option<PayloadDetail> {
        let state = self.lock();
        let payload = state.payloads.get(id)?;
        Some(PayloadDetail {
            id: payload.id.clone(),
            received_at: payload.received_at,
            url: payload.url.clone(),
            content_length: payload.content_length,
            trace_chunks: payload.chunks.clone(),
            trace_chunk_count: payload.trace_chunk_count,
            total_span_count: payload.total_span_count,
            decode_error: payload
                .decode_error
                .clone()
                .filter(|_| self.options.surface_decode_errors),
        })
    }

    pub fn raw_bytes(&self, id: &str) -> Option<Bytes> {
        self.lock().payloads.get(id).map(|p| p.body.clone())
    }

    /// Renders a payload's body as JSON. Unknown ids and empty bodies are [`QueryError::NotFound`].
    pub fn debug_json(&self, id: &str) -> Result<String, QueryError> {
        let body = self.raw_bytes(id).ok_or(QueryError::NotFound)?;
        if body.is_empty() {
            return Err(QueryError::NotFound);
        }
        to_debug_json(&body).map_err(|e| {
            warn!("Failed to convert payload {id} to JSON: {e}");
            QueryError::from(e)
        })
    }

    pub fn statistics(&self) -> Statistics {
        let state = self.lock();
        Statistics {
            total_payloads: state.payloads.len(),
            total_spans: state.total_spans,
            total_bytes: state.total_bytes,
            first_seen_at: state.first_seen_at,
            last_seen_at: state.last_seen_at,
        }
    }

    /// Most recently updated first.
    pub fn list_traces(&self) -> Vec<AggregatedTraceSummary> {
        let state = self.lock();
        let mut traces: Vec<&AggregatedTrace> = state.traces.values().collect();
        traces.sort_unstable_by(|a, b| {
            b.last_updated
                .cmp(&a.last_updated)
                .then(a.trace_id.cmp(&b.trace_id))
        });
        traces.into_iter().map(AggregatedTrace::summary).collect()
    }

    pub fn trace(&self, trace_id: u64) -> Option<AggregatedTraceDetail> {
        let state = self.lock();
        let trace = state.traces.get(&trace_id)?;
        Some(AggregatedTraceDetail {
            trace_id: trace.trace_id,
            spans: trace.spans.clone(),
            span_count: trace.spans.len(),
            first_seen: trace.first_seen,
            last_seen: trace.last_seen,
        })
    }

    // A panic while holding the lock leaves the state consistent: every mutation above either
    // completes or happens before anything is inserted.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RequestHandler for TraceStorage {
    fn on_request(&self, request: &ReceivedRequest<'_>) -> anyhow::Result<()> {
        self.add_payload(request.url, request.content_length, request.body);
        Ok(())
    }
}

/// Parses a decimal trace id as used in URLs. Returns `None` for anything that isn't a `u64`.
pub fn parse_trace_id(value: &str) -> Option<u64> {
    value.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_trace_chunks;
    use chrono::TimeZone;
    use std::sync::Arc;
    use tokio::sync::broadcast::error::TryRecvError;
    use tracing_test::traced_test;

    fn span(trace_id: u64, span_id: u64) -> Span {
        Span {
            trace_id,
            span_id,
            parent_id: if span_id == 1 { None } else { Some(1) },
            name: Some("op".to_string()),
            service: Some("svc".to_string()),
            ..Default::default()
        }
    }

    fn payload(trace_id: u64, first_span_id: u64, count: u64) -> Vec<u8> {
        let chunk = (first_span_id..first_span_id + count)
            .map(|span_id| span(trace_id, span_id))
            .collect();
        encode_trace_chunks(&[chunk]).unwrap()
    }

    fn at(seconds: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, seconds).unwrap()
    }

    fn storage() -> TraceStorage {
        TraceStorage::new(StorageOptions::default(), EventBus::new(16))
    }

    #[test]
    fn test_aggregates_spans_across_payloads() {
        let storage = storage();
        let first = payload(7, 1, 5);
        let second = payload(7, 6, 3);

        storage.add_payload_at(TRACE_ENDPOINT_PATH, first.len() as u64, &first, at(1));
        storage.add_payload_at(TRACE_ENDPOINT_PATH, second.len() as u64, &second, at(2));

        let trace = storage.trace(7).unwrap();
        assert_eq!(trace.span_count, 8);
        assert_eq!(trace.first_seen, at(1));
        assert_eq!(trace.last_seen, at(2));
        let span_ids: Vec<u64> = trace.spans.iter().map(|s| s.span_id).collect();
        assert_eq!(span_ids, (1..=8).collect::<Vec<_>>());

        let stats = storage.statistics();
        assert_eq!(stats.total_payloads, 2);
        assert_eq!(stats.total_spans, 8);
        assert_eq!(stats.total_bytes, (first.len() + second.len()) as u64);
        assert_eq!(stats.first_seen_at, Some(at(1)));
        assert_eq!(stats.last_seen_at, Some(at(2)));
    }

    #[test]
    fn test_out_of_order_times_extend_range() {
        let storage = storage();
        let body = payload(7, 1, 1);
        storage.add_payload_at(TRACE_ENDPOINT_PATH, 0, &body, at(5));
        storage.add_payload_at(TRACE_ENDPOINT_PATH, 0, &body, at(3));

        let trace = storage.trace(7).unwrap();
        assert_eq!(trace.first_seen, at(3));
        assert_eq!(trace.last_seen, at(5));
    }

    #[test]
    fn test_summary_counts() {
        let storage = storage();
        let chunks = vec![vec![span(1, 1), span(1, 2)], vec![span(2, 1)]];
        let body = encode_trace_chunks(&chunks).unwrap();

        let summary = storage.add_payload(TRACE_ENDPOINT_PATH, 123, &body);
        assert_eq!(summary.url, TRACE_ENDPOINT_PATH);
        assert_eq!(summary.content_length, 123);
        assert_eq!(summary.trace_chunk_count, 2);
        assert_eq!(summary.total_span_count, 3);
        assert_eq!(summary.id.len(), 32);

        let detail = storage.payload(&summary.id).unwrap();
        assert_eq!(detail.trace_chunks, Some(chunks));
        assert_eq!(storage.raw_bytes(&summary.id).unwrap(), Bytes::from(body));
    }

    #[test]
    fn test_other_paths_are_stored_without_decoding() {
        let storage = storage();
        let body = payload(7, 1, 2);

        let summary = storage.add_payload("/v0.5/traces", body.len() as u64, &body);
        assert_eq!(summary.trace_chunk_count, 0);
        assert_eq!(summary.total_span_count, 0);
        assert!(storage.payload(&summary.id).unwrap().trace_chunks.is_none());
        assert!(storage.list_traces().is_empty());
        // still inspectable
        assert!(storage.debug_json(&summary.id).is_ok());
    }

    #[test]
    fn test_custom_trace_path() {
        let options = StorageOptions {
            trace_path: "/custom".to_string(),
            ..Default::default()
        };
        let storage = TraceStorage::new(options, EventBus::default());
        let body = payload(7, 1, 2);

        assert_eq!(storage.add_payload("/custom", 0, &body).total_span_count, 2);
        assert_eq!(storage.add_payload(TRACE_ENDPOINT_PATH, 0, &body).total_span_count, 0);
    }

    #[test]
    fn test_empty_body_to_trace_path() {
        let storage = storage();
        let summary = storage.add_payload(TRACE_ENDPOINT_PATH, 0, &[]);

        assert_eq!(summary.trace_chunk_count, 0);
        assert_eq!(summary.total_span_count, 0);
        let detail = storage.payload(&summary.id).unwrap();
        assert!(detail.trace_chunks.is_none());
        assert!(detail.decode_error.is_none());
        assert_eq!(storage.debug_json(&summary.id), Err(QueryError::NotFound));
        assert_eq!(storage.raw_bytes(&summary.id).unwrap(), Bytes::new());
    }

    #[test]
    #[traced_test]
    fn test_malformed_payload_is_stored_with_zero_counts() {
        let storage = storage();
        let mut body = payload(7, 1, 3);
        body.truncate(body.len() - 4);

        let summary = storage.add_payload(TRACE_ENDPOINT_PATH, body.len() as u64, &body);
        assert_eq!(summary.trace_chunk_count, 0);
        assert_eq!(summary.total_span_count, 0);
        assert!(logs_contain("Failed to decode trace payload"));

        // hidden unless configured
        assert!(storage.payload(&summary.id).unwrap().decode_error.is_none());
        assert!(matches!(
            storage.debug_json(&summary.id),
            Err(QueryError::Decode(_))
        ));
        assert_eq!(storage.statistics().total_bytes, body.len() as u64);
    }

    #[test]
    fn test_surfaced_decode_error() {
        let options = StorageOptions {
            surface_decode_errors: true,
            ..Default::default()
        };
        let storage = TraceStorage::new(options, EventBus::default());

        let summary = storage.add_payload(TRACE_ENDPOINT_PATH, 1, &[0xc1]);
        let detail = storage.payload(&summary.id).unwrap();
        assert!(detail.decode_error.is_some());
        let json = serde_json::to_value(&detail).unwrap();
        assert!(json["decodeError"].is_string());
    }

    #[test]
    fn test_unknown_ids() {
        let storage = storage();
        assert!(storage.payload("missing").is_none());
        assert!(storage.raw_bytes("missing").is_none());
        assert_eq!(storage.debug_json("missing"), Err(QueryError::NotFound));
        assert!(storage.trace(42).is_none());
    }

    #[test]
    fn test_list_payloads_newest_first() {
        let storage = storage();
        let ids: Vec<String> = (0..5)
            .map(|i| storage.add_payload(&format!("/path/{i}"), 0, &[]).id)
            .collect();

        let listed: Vec<String> = storage.list_payloads().into_iter().map(|p| p.id).collect();
        assert_eq!(listed, ids.into_iter().rev().collect::<Vec<_>>());
    }

    #[test]
    fn test_list_traces_most_recently_updated_first() {
        let storage = storage();
        for trace_id in [1, 2, 3] {
            storage.add_payload(TRACE_ENDPOINT_PATH, 0, &payload(trace_id, 1, 1));
        }
        storage.add_payload(TRACE_ENDPOINT_PATH, 0, &payload(1, 2, 1));

        let order: Vec<u64> = storage.list_traces().iter().map(|t| t.trace_id).collect();
        assert_eq!(order, vec![1, 3, 2]);
        assert_eq!(storage.list_traces()[0].span_count, 2);
    }

    #[test]
    fn test_clear_all_is_idempotent() {
        let storage = storage();
        let mut rx = storage.events().subscribe();
        storage.add_payload(TRACE_ENDPOINT_PATH, 10, &payload(1, 1, 2));

        storage.clear_all();
        storage.clear_all();

        assert!(storage.list_payloads().is_empty());
        assert!(storage.list_traces().is_empty());
        assert_eq!(storage.statistics(), Statistics::default());

        assert!(matches!(rx.try_recv(), Ok(StorageEvent::PayloadReceived(_))));
        assert_eq!(rx.try_recv(), Ok(StorageEvent::DataCleared));
        assert_eq!(rx.try_recv(), Ok(StorageEvent::DataCleared));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_event_matches_summary() {
        let storage = storage();
        let mut rx = storage.events().subscribe();

        let summary = storage.add_payload(TRACE_ENDPOINT_PATH, 5, &payload(9, 1, 4));
        assert_eq!(rx.try_recv(), Ok(StorageEvent::PayloadReceived(summary)));
    }

    #[test]
    fn test_concurrent_adds() {
        let storage = Arc::new(storage());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let storage = storage.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        storage.add_payload(TRACE_ENDPOINT_PATH, 1, &payload(77, i, 1));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(storage.statistics().total_payloads, 200);
        assert_eq!(storage.statistics().total_spans, 200);
        assert_eq!(storage.trace(77).unwrap().span_count, 200);
    }

    #[test]
    fn test_recovers_from_poisoned_lock() {
        let storage = Arc::new(storage());
        let poisoner = storage.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock();
            panic!("poison the storage lock");
        })
        .join();

        storage.add_payload(TRACE_ENDPOINT_PATH, 0, &payload(1, 1, 1));
        assert_eq!(storage.statistics().total_payloads, 1);
    }

    #[test]
    fn test_parse_trace_id() {
        assert_eq!(parse_trace_id("18446744073709551615"), Some(u64::MAX));
        assert_eq!(parse_trace_id("42"), Some(42));
        assert_eq!(parse_trace_id("-1"), None);
        assert_eq!(parse_trace_id("abc"), None);
        assert_eq!(parse_trace_id("18446744073709551616"), None);
        assert_eq!(parse_trace_id(""), None);
    }

    #[test]
    fn test_trace_json_shape() {
        let storage = storage();
        storage.add_payload_at(TRACE_ENDPOINT_PATH, 0, &payload(u64::MAX, 1, 1), at(1));

        let json = serde_json::to_value(storage.list_traces()).unwrap();
        assert_eq!(json[0]["traceId"], "18446744073709551615");
        assert_eq!(json[0]["spanCount"], 1);
        assert_eq!(json[0]["firstSeen"], "2025-06-01T12:00:01Z");

        let json = serde_json::to_value(storage.trace(u64::MAX).unwrap()).unwrap();
        assert_eq!(json["spans"][0]["trace_id"], "18446744073709551615");
    }
}
