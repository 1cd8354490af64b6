//! Infrastructure layer: event store adapters, checkpoint stores, workers
//! and the projection lifecycle.

pub mod config;
pub mod event_store;
pub mod projections;
pub mod workers;


pub use config::{ProjectionConfig, ProjectionMode, RetryPolicy};
pub use event_store::{EventSink, EventSource, EventSourceError, InMemoryEventStore};
pub use projections::{
    CheckpointStore, CheckpointStoreError, FileCheckpointStore, InMemoryCheckpointStore, ManagedProjection,
    NoopCheckpointStore, ProjectionController, ProjectionRegistry, ProjectionSnapshot,
};
pub use workers::{RunnerStats, WorkerHandle};
