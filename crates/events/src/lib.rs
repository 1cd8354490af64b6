//! Event model and pure projection machinery.
//!
//! Nothing in this crate performs IO: reading from an event store, writing
//! checkpoints and running worker threads are infrastructure concerns.

pub mod batch;
pub mod checkpoint;
pub mod envelope;
pub mod event;
pub mod lifecycle;
pub mod position;
pub mod projection;
pub mod runner;
pub mod selector;

pub use batch::{StreamBatch, compose};
pub use checkpoint::{Checkpoint, CheckpointPolicy};
pub use envelope::RecordedEvent;
pub use event::{EmittedEvent, NewEvent};
pub use lifecycle::RunState;
pub use position::PositionTable;
pub use projection::{FoldFn, Projection, from_fn};
pub use runner::{BatchOutcome, ProjectionProgress, ProjectionRunner};
pub use selector::{Selection, StreamSelector};
