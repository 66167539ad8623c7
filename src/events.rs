// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Human-facing events recorded against resource records.

use crate::types::{ObjectRef, Resource};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Well-known event reasons emitted by the controller.
pub mod reasons {
    pub const FINALIZER_ADDED: &str = "FinalizerAdded";
    pub const FINALIZER_REMOVED: &str = "FinalizerRemoved";
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
    pub const CLEANUP_FAILED: &str = "CleanupFailed";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Normal => write!(f, "Normal"),
            EventType::Warning => write!(f, "Warning"),
        }
    }
}

pub trait EventRecorder: Send + Sync {
    fn record(&self, object: &Resource, event_type: EventType, reason: &str, message: &str);
}

/// Writes events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn record(&self, object: &Resource, event_type: EventType, reason: &str, message: &str) {
        match event_type {
            EventType::Normal => info!(
                kind = %object.kind,
                key = %object.key,
                reason,
                "{}",
                message
            ),
            EventType::Warning => warn!(
                kind = %object.kind,
                key = %object.key,
                reason,
                "{}",
                message
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub object: ObjectRef,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

/// Keeps every event in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryRecorder {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }
}

impl EventRecorder for MemoryRecorder {
    fn record(&self, object: &Resource, event_type: EventType, reason: &str, message: &str) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedEvent {
                object: object.object_ref(),
                event_type,
                reason: reason.to_string(),
                message: message.to_string(),
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ObjectKey, ResourceKind};
    use serde_json::json;

    #[test]
    fn test_memory_recorder_keeps_order() {
        let recorder = MemoryRecorder::new();
        let object = Resource::new(
            ResourceKind::new("example.com", "v1", "Widget"),
            ObjectKey::new("default", "a"),
            json!({}),
        );

        recorder.record(&object, EventType::Normal, reasons::FINALIZER_ADDED, "added");
        recorder.record(&object, EventType::Warning, reasons::RECONCILE_FAILED, "boom");

        let events = recorder.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type, EventType::Warning);
        assert_eq!(events[1].object, object.object_ref());
        assert_eq!(
            recorder.reasons(),
            vec![reasons::FINALIZER_ADDED, reasons::RECONCILE_FAILED]
        );
    }
}
