//! Registry of projection instances owned by one process.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use streamfold_core::{EngineError, EngineResult, ProjectionName};
use streamfold_events::{Projection, RunState};

use crate::event_store::{EventSink, EventSource};
use crate::projections::checkpoint_store::CheckpointStore;
use crate::projections::controller::ProjectionController;
use crate::workers::RunnerStats;

/// Object-safe view of a projection controller, independent of its state type.
pub trait ManagedProjection: Send + Sync {
    fn name(&self) -> &ProjectionName;
    fn start(&self) -> EngineResult<()>;
    fn stop(&self) -> EngineResult<()>;
    fn reset(&self) -> EngineResult<()>;
    fn delete(&self, delete_emitted_events: bool) -> EngineResult<()>;
    fn current_state(&self) -> RunState;
    fn stats(&self) -> RunnerStats;
}

impl<S, C, P> ManagedProjection for ProjectionController<S, C, P>
where
    S: EventSource + EventSink + 'static,
    C: CheckpointStore + 'static,
    P: Projection,
{
    fn name(&self) -> &ProjectionName {
        ProjectionController::name(self)
    }

    fn start(&self) -> EngineResult<()> {
        ProjectionController::start(self)
    }

    fn stop(&self) -> EngineResult<()> {
        ProjectionController::stop(self)
    }

    fn reset(&self) -> EngineResult<()> {
        ProjectionController::reset(self)
    }

    fn delete(&self, delete_emitted_events: bool) -> EngineResult<()> {
        ProjectionController::delete(self, delete_emitted_events)
    }

    fn current_state(&self) -> RunState {
        ProjectionController::current_state(self)
    }

    fn stats(&self) -> RunnerStats {
        ProjectionController::stats(self)
    }
}

/// Owns the active projections of a process.
///
/// Names are unique. `shutdown` (also run on drop) stops every projection
/// with a final checkpoint.
#[derive(Default)]
pub struct ProjectionRegistry {
    projections: BTreeMap<ProjectionName, Arc<dyn ManagedProjection>>,
}

impl ProjectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.projections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projections.is_empty()
    }

    pub fn contains(&self, name: &ProjectionName) -> bool {
        self.projections.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &ProjectionName> + '_ {
        self.projections.keys()
    }

    /// Register a projection under its own name.
    pub fn register(&mut self, projection: Arc<dyn ManagedProjection>) -> EngineResult<()> {
        let name = projection.name().clone();
        if self.projections.contains_key(&name) {
            return Err(EngineError::protocol(format!("projection '{name}' is already registered")));
        }
        info!(projection = %name, "projection registered");
        self.projections.insert(name, projection);
        Ok(())
    }

    pub fn get(&self, name: &ProjectionName) -> Option<Arc<dyn ManagedProjection>> {
        self.projections.get(name).cloned()
    }

    fn require(&self, name: &ProjectionName) -> EngineResult<&Arc<dyn ManagedProjection>> {
        self.projections
            .get(name)
            .ok_or_else(|| EngineError::protocol(format!("projection '{name}' is not registered")))
    }

    pub fn start(&self, name: &ProjectionName) -> EngineResult<()> {
        self.require(name)?.start()
    }

    pub fn stop(&self, name: &ProjectionName) -> EngineResult<()> {
        self.require(name)?.stop()
    }

    pub fn reset(&self, name: &ProjectionName) -> EngineResult<()> {
        self.require(name)?.reset()
    }

    /// Delete a projection and drop it from the registry.
    pub fn delete(&mut self, name: &ProjectionName, delete_emitted_events: bool) -> EngineResult<()> {
        self.require(name)?.delete(delete_emitted_events)?;
        self.projections.remove(name);
        Ok(())
    }

    /// Current run state of every registered projection.
    pub fn states(&self) -> BTreeMap<ProjectionName, RunState> {
        self.projections
            .iter()
            .map(|(name, p)| (name.clone(), p.current_state()))
            .collect()
    }

    /// Stop every projection. All are attempted; the first error is returned.
    pub fn stop_all(&self) -> EngineResult<()> {
        let mut first_error = None;
        for (name, projection) in &self.projections {
            if let Err(err) = projection.stop() {
                warn!(projection = %name, error = %err, "stop failed during stop_all");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Stop everything and release all instances.
    pub fn shutdown(&mut self) -> EngineResult<()> {
        let result = self.stop_all();
        self.projections.clear();
        info!("projection registry shut down");
        result
    }
}

impl Drop for ProjectionRegistry {
    fn drop(&mut self) {
        if !self.projections.is_empty() {
            let _ = self.shutdown();
        }
    }
}

impl core::fmt::Debug for ProjectionRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProjectionRegistry")
            .field("projections", &self.projections.keys().collect::<Vec<_>>())
            .finish()
    }
}
