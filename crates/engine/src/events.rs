// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broadcast fan-out of progress events.
//!
//! Emission is fire-and-forget: a hub with no subscribers drops events on
//! the floor, which is exactly the "streaming disabled" mode. Durability
//! lives in the persistence store; callers persist a transition before
//! announcing it here.

use qm_core::{Clock, StreamEvent, StreamEventKind};
use std::sync::Arc;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<StreamEvent>,
    clock: Arc<dyn Clock>,
}

impl EventHub {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx, clock }
    }

    /// Emit an event to all connected stream clients.
    pub fn emit(&self, kind: StreamEventKind, data: serde_json::Value) {
        let event = StreamEvent::new(kind, data, self.clock.now_ms());
        tracing::debug!(kind = ?event.kind, "stream event");
        // Err means no subscribers; that is not a failure.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
