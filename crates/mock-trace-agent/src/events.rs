// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Broadcast channel for storage change notifications.
//!
//! ```text
//! TraceStorage            EventBus            Subscribers (many)
//!     │                      │                   │
//!     ├─ PayloadReceived ───>│ ──> broadcast ──> ├─ dashboard websocket
//!     └─ DataCleared ───────>│     channel       └─ tests, tools
//! ```
//!
//! Events are compact: a [`StorageEvent::PayloadReceived`] carries a summary only, and
//! subscribers pull details through the storage queries. Publishing never blocks. Each subscriber
//! sees events in publish order; a subscriber that falls more than the channel capacity behind
//! loses the oldest events and receives [`broadcast::error::RecvError::Lagged`].

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::storage::PayloadSummary;

pub const DEFAULT_EVENT_CAPACITY: usize = 1000;

/// Notification published after the storage state changed.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StorageEvent {
    /// A payload was stored. Published once per payload.
    PayloadReceived(PayloadSummary),
    /// All payloads, traces and counters were discarded.
    DataCleared,
}

#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<StorageEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber. A capacity of zero is
    /// raised to one.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        EventBus { tx }
    }

    /// Delivers `event` to every current subscriber. Without subscribers this is a no-op.
    pub fn publish(&self, event: StorageEvent) {
        if self.tx.send(event).is_err() {
            trace!("No event subscribers, dropping storage event");
        }
    }

    /// Returns a receiver for events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new(DEFAULT_EVENT_CAPACITY)
    }
}
