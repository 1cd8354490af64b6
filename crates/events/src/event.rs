use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use streamfold_core::StreamId;

/// An event ready to be appended (the store assigns offsets).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub payload: JsonValue,
}

impl NewEvent {
    pub fn new(event_type: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type: event_type.into(),
            payload,
        }
    }
}

/// A side-effect event a handler wants appended to another stream.
///
/// Emitted events are buffered by the runner and appended only after the
/// checkpoint covering the events that produced them has been saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmittedEvent {
    pub stream: StreamId,
    pub event: NewEvent,
}

impl EmittedEvent {
    pub fn new(stream: impl Into<StreamId>, event_type: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            stream: stream.into(),
            event: NewEvent::new(event_type, payload),
        }
    }
}
