use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use chrono::Utc;
use serde_json::Value as JsonValue;

use streamfold_core::StreamId;
use streamfold_events::{NewEvent, RecordedEvent};

use super::r#trait::{EventSink, EventSource, EventSourceError};

#[derive(Debug, Default)]
struct Streams {
    streams: BTreeMap<StreamId, Vec<RecordedEvent>>,
    next_global: u64,
}

/// In-memory append-only event store.
///
/// Intended for tests/dev. Assigns per-stream offsets starting at 0 and a
/// store-wide global position, so readers can merge streams in commit order.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    inner: RwLock<Streams>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience append of a single JSON event.
    pub fn append_json(
        &self,
        stream: impl Into<StreamId>,
        event_type: impl Into<String>,
        payload: JsonValue,
    ) -> Result<RecordedEvent, EventSourceError> {
        let stream = stream.into();
        self.append(&stream, vec![NewEvent::new(event_type, payload)])?
            .pop()
            .ok_or_else(|| EventSourceError::InvalidAppend("append returned no event".to_string()))
    }

    /// Number of events in `stream` (0 if it does not exist).
    pub fn stream_len(&self, stream: &StreamId) -> usize {
        self.inner
            .read()
            .map(|s| s.streams.get(stream).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Full contents of one stream.
    pub fn load_stream(&self, stream: &StreamId) -> Result<Vec<RecordedEvent>, EventSourceError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| EventSourceError::Unavailable("lock poisoned".to_string()))?;
        Ok(inner.streams.get(stream).cloned().unwrap_or_default())
    }
}

impl EventSource for InMemoryEventStore {
    fn known_streams(&self) -> Result<BTreeSet<StreamId>, EventSourceError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| EventSourceError::Unavailable("lock poisoned".to_string()))?;
        Ok(inner.streams.keys().cloned().collect())
    }

    fn read(
        &self,
        stream: &StreamId,
        from: u64,
        max_count: usize,
    ) -> Result<Vec<RecordedEvent>, EventSourceError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| EventSourceError::Unavailable("lock poisoned".to_string()))?;

        let Some(events) = inner.streams.get(stream) else {
            return Ok(vec![]);
        };
        let start = usize::try_from(from).unwrap_or(usize::MAX).min(events.len());
        Ok(events[start..].iter().take(max_count).cloned().collect())
    }
}

impl EventSink for InMemoryEventStore {
    fn append(&self, stream: &StreamId, events: Vec<NewEvent>) -> Result<Vec<RecordedEvent>, EventSourceError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let mut inner = self
            .inner
            .write()
            .map_err(|_| EventSourceError::InvalidAppend("lock poisoned".to_string()))?;
        let mut global = inner.next_global;
        let entries = inner.streams.entry(stream.clone()).or_default();

        // Offsets and global positions are assigned under the write lock.
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            let recorded = RecordedEvent::new(
                e.event_id,
                stream.clone(),
                entries.len() as u64,
                Some(global),
                e.event_type,
                Utc::now(),
                e.payload,
            );
            global += 1;
            entries.push(recorded.clone());
            committed.push(recorded);
        }
        inner.next_global = global;

        Ok(committed)
    }

    fn delete_stream(&self, stream: &StreamId) -> Result<(), EventSourceError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| EventSourceError::InvalidAppend("lock poisoned".to_string()))?;
        inner.streams.remove(stream);
        Ok(())
    }
}
