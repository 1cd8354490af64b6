use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use streamfold_core::StreamId;

/// An event as read back from a stream.
///
/// Notes:
/// - `offset` is the event's position inside its stream, starting at 0.
/// - `global_position` is present only when the store keeps a total order
///   across streams; the runner merges by it when every fetched event has one.
/// - `payload` encoding is up to the store; the engine never inspects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    event_id: Uuid,
    stream: StreamId,
    offset: u64,
    global_position: Option<u64>,
    event_type: String,
    recorded_at: DateTime<Utc>,
    payload: JsonValue,
}

impl RecordedEvent {
    pub fn new(
        event_id: Uuid,
        stream: StreamId,
        offset: u64,
        global_position: Option<u64>,
        event_type: impl Into<String>,
        recorded_at: DateTime<Utc>,
        payload: JsonValue,
    ) -> Self {
        Self {
            event_id,
            stream,
            offset,
            global_position,
            event_type: event_type.into(),
            recorded_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn stream(&self) -> &StreamId {
        &self.stream
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn global_position(&self) -> Option<u64> {
        self.global_position
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    pub fn into_payload(self) -> JsonValue {
        self.payload
    }
}
