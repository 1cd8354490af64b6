//! Event store boundary.
//!
//! The projection engine only needs two capabilities from a store: reading
//! streams from an offset (`EventSource`) and appending the events a
//! projection emits (`EventSink`). The storage engine itself is out of scope.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventSink, EventSource, EventSourceError};
