//! Projection lifecycle and checkpoint persistence.
//!
//! Projections here are:
//! - **Resumable**: progress is checkpointed and reloaded on start
//! - **Single-run**: one worker per instance at most
//! - **Rebuildable**: reset or delete discards progress for a full replay

pub mod checkpoint_store;
pub mod controller;
#[cfg(feature = "postgres")]
pub mod postgres_checkpoint_store;
pub mod registry;

pub use checkpoint_store::{
    CheckpointStore, CheckpointStoreError, FileCheckpointStore, InMemoryCheckpointStore, NoopCheckpointStore,
};
pub use controller::{ProjectionController, ProjectionSnapshot};
#[cfg(feature = "postgres")]
pub use postgres_checkpoint_store::PostgresCheckpointStore;
pub use registry::{ManagedProjection, ProjectionRegistry};
