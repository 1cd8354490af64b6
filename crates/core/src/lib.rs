//! `streamfold-core` — shared building blocks for the projection engine.
//!
//! This crate contains **pure** primitives (no IO, no threads).

pub mod error;
pub mod id;

pub use error::{EngineError, EngineResult};
pub use id::{INTERNAL_STREAM_SENTINEL, CATEGORY_SEPARATOR, ProjectionName, StreamId};
