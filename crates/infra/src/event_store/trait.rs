use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use streamfold_core::{EngineError, StreamId};
use streamfold_events::{NewEvent, RecordedEvent};

/// Event store operation error.
///
/// From the engine's point of view every one of these is transient: the read
/// is retried with backoff and nothing is applied in the meantime.
#[derive(Debug, Error)]
pub enum EventSourceError {
    #[error("event store unavailable: {0}")]
    Unavailable(String),

    #[error("read timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid append: {0}")]
    InvalidAppend(String),
}

impl From<EventSourceError> for EngineError {
    fn from(err: EventSourceError) -> Self {
        EngineError::transient(err.to_string())
    }
}

/// Read side of an append-only event store.
///
/// ## Read Semantics
///
/// `read()`:
/// - Returns events of one stream with `offset >= from`, in offset order
/// - Never skips an offset and never returns more than `max_count` events
/// - Returns an empty vector for unknown or drained streams
///
/// ## Timeouts
///
/// The engine calls `read()` on the worker thread and does not interrupt it.
/// Implementations must bound every read themselves (driver or socket
/// timeout) and report an expired deadline as `EventSourceError::Timeout`,
/// which the runner retries with backoff. A read that never returns stalls
/// the projection, and `stop` waits for it.
///
/// ## Catalog
///
/// `known_streams()` is a point-in-time enumeration. Selection is evaluated
/// against it once, so streams created later are only picked up on restart.
pub trait EventSource: Send + Sync {
    fn known_streams(&self) -> Result<BTreeSet<StreamId>, EventSourceError>;

    fn read(
        &self,
        stream: &StreamId,
        from: u64,
        max_count: usize,
    ) -> Result<Vec<RecordedEvent>, EventSourceError>;
}

/// Write side used for events a projection emits.
pub trait EventSink: Send + Sync {
    /// Append events to the end of `stream` (created on first append).
    fn append(&self, stream: &StreamId, events: Vec<NewEvent>) -> Result<Vec<RecordedEvent>, EventSourceError>;

    /// Remove a stream and all its events.
    fn delete_stream(&self, stream: &StreamId) -> Result<(), EventSourceError>;
}

impl<S> EventSource for Arc<S>
where
    S: EventSource + ?Sized,
{
    fn known_streams(&self) -> Result<BTreeSet<StreamId>, EventSourceError> {
        (**self).known_streams()
    }

    fn read(
        &self,
        stream: &StreamId,
        from: u64,
        max_count: usize,
    ) -> Result<Vec<RecordedEvent>, EventSourceError> {
        (**self).read(stream, from, max_count)
    }
}

impl<S> EventSink for Arc<S>
where
    S: EventSink + ?Sized,
{
    fn append(&self, stream: &StreamId, events: Vec<NewEvent>) -> Result<Vec<RecordedEvent>, EventSourceError> {
        (**self).append(stream, events)
    }

    fn delete_stream(&self, stream: &StreamId) -> Result<(), EventSourceError> {
        (**self).delete_stream(stream)
    }
}
