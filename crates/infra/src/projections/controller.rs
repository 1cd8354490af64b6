//! Lifecycle control of a single projection instance.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{info, warn};

use streamfold_core::{EngineError, EngineResult, ProjectionName, StreamId};
use streamfold_events::{
    PositionTable, Projection, ProjectionProgress, ProjectionRunner, RunState, Selection, StreamSelector,
};

use crate::config::ProjectionConfig;
use crate::event_store::{EventSink, EventSource};
use crate::projections::checkpoint_store::CheckpointStore;
use crate::workers::projection_worker::{ProjectionWorker, RunnerStats, Shared, Signal, WorkerHandle, lock};

/// Point-in-time copy of a projection for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectionSnapshot<St> {
    pub name: ProjectionName,
    pub run_state: RunState,
    pub state: St,
    pub positions: PositionTable,
    pub events_applied: u64,
}

#[derive(Debug, Default)]
struct Control {
    selector: StreamSelector,
    worker: Option<WorkerHandle>,
    /// Progress came from a checkpoint (or was deliberately reset) and must
    /// not be reloaded on the next start.
    restored: bool,
}

/// Controls one projection: selection, start, stop, reset and delete.
///
/// At most one worker runs per controller. All operations take `&self`, so a
/// controller can be shared behind an `Arc` (see `ProjectionRegistry`).
pub struct ProjectionController<S, C, P>
where
    P: Projection,
{
    name: ProjectionName,
    config: ProjectionConfig,
    store: Arc<S>,
    checkpoints: Arc<C>,
    projection: Arc<P>,
    shared: Arc<Shared<P::State>>,
    control: Mutex<Control>,
}

impl<S, C, P> ProjectionController<S, C, P>
where
    S: EventSource + EventSink + 'static,
    C: CheckpointStore + 'static,
    P: Projection,
{
    pub fn new(config: ProjectionConfig, store: Arc<S>, checkpoints: Arc<C>, projection: P) -> EngineResult<Self> {
        config.validate()?;
        let progress = ProjectionProgress::fresh(projection.init());

        Ok(Self {
            name: config.projection_name(),
            config,
            store,
            checkpoints,
            projection: Arc::new(projection),
            shared: Arc::new(Shared::new(progress)),
            control: Mutex::new(Control::default()),
        })
    }

    pub fn name(&self) -> &ProjectionName {
        &self.name
    }

    pub fn config(&self) -> &ProjectionConfig {
        &self.config
    }

    pub fn current_state(&self) -> RunState {
        lock(&self.shared.status).run_state
    }

    /// Why the last run ended abnormally, if it did.
    pub fn last_error(&self) -> Option<EngineError> {
        lock(&self.shared.status).last_error.clone()
    }

    pub fn stats(&self) -> RunnerStats {
        lock(&self.shared.stats).clone()
    }

    pub fn selection(&self) -> Option<Selection> {
        lock(&self.control).selector.selection().cloned()
    }

    /// Copy of state and positions, never taken mid-batch.
    pub fn snapshot(&self) -> ProjectionSnapshot<P::State> {
        let run_state = self.current_state();
        let progress = lock(&self.shared.progress);
        ProjectionSnapshot {
            name: self.name.clone(),
            run_state,
            state: progress.state.clone(),
            positions: progress.positions.clone(),
            events_applied: progress.events_applied,
        }
    }

    pub fn select_category(&self, prefix: impl Into<String>) -> EngineResult<()> {
        self.declare(Selection::Category(prefix.into()))
    }

    pub fn select_categories<I, T>(&self, prefixes: I) -> EngineResult<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.declare(Selection::Categories(prefixes.into_iter().map(Into::into).collect()))
    }

    pub fn select_streams<I, T>(&self, names: I) -> EngineResult<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<StreamId>,
    {
        self.declare(Selection::Streams(names.into_iter().map(Into::into).collect()))
    }

    pub fn select_all(&self) -> EngineResult<()> {
        self.declare(Selection::All)
    }

    /// Declare the (write-once) selection and track its streams at offset 0.
    pub fn declare(&self, selection: Selection) -> EngineResult<()> {
        let mut control = lock(&self.control);
        self.ensure_not_deleted()?;
        if control.selector.is_declared() {
            return Err(EngineError::protocol("selection already declared"));
        }

        let catalog = self.store.known_streams()?;
        let initial = selection.resolve(&catalog);
        control.selector.declare(selection)?;

        info!(projection = %self.name, streams = initial.len(), "stream selection declared");
        lock(&self.shared.progress).positions.track_missing(&initial);
        Ok(())
    }

    /// Start a worker. Rejected (not queued) if one is already running.
    pub fn start(&self) -> EngineResult<()> {
        let mut control = lock(&self.control);
        {
            let mut status = lock(&self.shared.status);
            status.run_state.transition(RunState::Running)?;
            status.last_error = None;
        }

        // A catch-up run that finished on its own leaves its handle behind.
        if let Some(previous) = control.worker.take() {
            let _ = previous.join();
        }

        // New streams matching the selection are picked up on every start.
        let catalog = self.store.known_streams()?;
        let selected = control.selector.resolve(&catalog)?;

        if !control.restored {
            let restored = match self.checkpoints.load(&self.name)? {
                Some(checkpoint) => {
                    info!(projection = %self.name, events_applied = checkpoint.events_applied, "resuming from checkpoint");
                    checkpoint.restore::<P::State>()?
                }
                None => ProjectionProgress::fresh(self.projection.init()),
            };
            *lock(&self.shared.progress) = restored;
            control.restored = true;
        }
        lock(&self.shared.progress).positions.track_missing(&selected);

        lock(&self.shared.status).run_state = RunState::Running;
        let worker = ProjectionWorker {
            name: self.name.clone(),
            config: self.config.clone(),
            store: self.store.clone(),
            checkpoints: self.checkpoints.clone(),
            runner: ProjectionRunner::new(self.projection.clone(), self.config.checkpoint_policy()),
            shared: self.shared.clone(),
            pending: Vec::new(),
            cursor: 0,
        };

        match worker.spawn() {
            Ok(handle) => {
                control.worker = Some(handle);
                info!(projection = %self.name, streams = selected.len(), "projection started");
                Ok(())
            }
            Err(err) => {
                self.mark_idle();
                Err(err)
            }
        }
    }

    /// Stop cooperatively: the in-flight batch completes, a final checkpoint
    /// is written, then the instance is idle. A no-op when not running.
    ///
    /// Returns the final checkpoint's error, if it failed.
    pub fn stop(&self) -> EngineResult<()> {
        let mut control = lock(&self.control);
        {
            let mut status = lock(&self.shared.status);
            match status.run_state {
                RunState::Running => status.run_state = RunState::Stopping,
                RunState::Idle | RunState::Stopping | RunState::Deleting => {
                    drop(status);
                    if let Some(finished) = control.worker.take() {
                        let _ = finished.join();
                    }
                    return Ok(());
                }
            }
        }

        let Some(worker) = control.worker.take() else {
            self.mark_idle();
            return Ok(());
        };
        worker.send(Signal::Stop);
        let result = worker.join();
        self.mark_idle();

        info!(projection = %self.name, ok = result.is_ok(), "projection stopped");
        result
    }

    /// Block until the current run ends and return how it ended. Returns
    /// immediately when nothing is running.
    ///
    /// A catch-up run ends on its own; a continuous one ends when another
    /// thread calls `stop`, `reset` or `delete`, which stay usable while this
    /// call waits.
    pub fn wait_for_completion(&self) -> EngineResult<()> {
        {
            let status = lock(&self.shared.status);
            let _status = self
                .shared
                .finished
                .wait_while(status, |s| s.run_state.is_active())
                .unwrap_or_else(PoisonError::into_inner);
        }

        let worker = lock(&self.control).worker.take();
        match worker {
            Some(worker) => worker.join(),
            // Whoever ended the run has already joined the worker.
            None => self.last_error().map_or(Ok(()), Err),
        }
    }

    /// Return state and positions to empty and discard the checkpoint so the
    /// next start replays from the beginning. Stops a running worker first.
    pub fn reset(&self) -> EngineResult<()> {
        let mut control = lock(&self.control);
        self.ensure_not_deleted()?;
        self.halt(&mut control, Signal::Abandon);

        {
            let mut progress = lock(&self.shared.progress);
            let emitted_streams = std::mem::take(&mut progress.emitted_streams);
            *progress = ProjectionProgress::fresh(self.projection.init());
            // Emitted events survive a reset; remember where they went.
            progress.emitted_streams = emitted_streams;
        }
        lock(&self.shared.pending).clear();
        self.checkpoints.delete(&self.name)?;
        control.restored = true;

        info!(projection = %self.name, "projection reset");
        Ok(())
    }

    /// Discard the instance: in-memory state and positions are emptied.
    ///
    /// With `delete_emitted_events`, the checkpoint is discarded and every
    /// stream this projection emitted to is removed. Without it, emitted
    /// events and the last checkpoint are left in place for inspection.
    ///
    /// If that cleanup fails part way, calling `delete(true)` again resumes it.
    pub fn delete(&self, delete_emitted_events: bool) -> EngineResult<()> {
        let mut control = lock(&self.control);
        let already_deleted = {
            let mut status = lock(&self.shared.status);
            if status.run_state == RunState::Deleting {
                true
            } else {
                status.run_state = status.run_state.transition(RunState::Deleting)?;
                false
            }
        };

        if !already_deleted {
            if let Some(worker) = control.worker.take() {
                worker.send(Signal::Abandon);
                if let Err(err) = worker.join() {
                    warn!(projection = %self.name, error = %err, "worker ended with an error during delete");
                }
            }
            let mut progress = lock(&self.shared.progress);
            let emitted_streams = std::mem::take(&mut progress.emitted_streams);
            *progress = ProjectionProgress::fresh(self.projection.init());
            // Kept until the emitted streams are actually removed.
            progress.emitted_streams = emitted_streams;
            drop(progress);
            lock(&self.shared.pending).clear();
            info!(projection = %self.name, "projection deleted");
        }
        if !delete_emitted_events {
            return Ok(());
        }

        let emitted = lock(&self.shared.progress).emitted_streams.clone();
        // The checkpoint may list emitted streams that the in-memory
        // progress never saw (instance deleted before its first start).
        let recorded = match self.checkpoints.load(&self.name) {
            Ok(checkpoint) => checkpoint.map(|c| c.emitted_streams).unwrap_or_default(),
            Err(err) => {
                warn!(projection = %self.name, error = %err, "could not read checkpoint being deleted");
                Default::default()
            }
        };

        let mut removed = 0;
        for stream in emitted.union(&recorded) {
            self.store.delete_stream(stream)?;
            removed += 1;
        }
        self.checkpoints.delete(&self.name)?;
        lock(&self.shared.progress).emitted_streams.clear();

        info!(projection = %self.name, streams = removed, "emitted events deleted");
        Ok(())
    }

    /// Leave Running/Stopping and wake `wait_for_completion` callers.
    fn mark_idle(&self) {
        lock(&self.shared.status).run_state = RunState::Idle;
        self.shared.finished.notify_all();
    }

    fn ensure_not_deleted(&self) -> EngineResult<()> {
        if lock(&self.shared.status).run_state == RunState::Deleting {
            return Err(EngineError::protocol("projection was deleted"));
        }
        Ok(())
    }

    /// End a running worker (if any) and wait for it.
    fn halt(&self, control: &mut Control, signal: Signal) {
        {
            let mut status = lock(&self.shared.status);
            if status.run_state == RunState::Running {
                status.run_state = RunState::Stopping;
            }
        }
        if let Some(worker) = control.worker.take() {
            worker.send(signal);
            if let Err(err) = worker.join() {
                warn!(projection = %self.name, error = %err, "worker ended with an error");
            }
        }
        let mut status = lock(&self.shared.status);
        if status.run_state.is_active() {
            status.run_state = RunState::Idle;
        }
        drop(status);
        self.shared.finished.notify_all();
    }
}

impl<S, C, P> core::fmt::Debug for ProjectionController<S, C, P>
where
    P: Projection,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProjectionController")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
