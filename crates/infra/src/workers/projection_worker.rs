use std::collections::BTreeMap;
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use streamfold_core::{EngineError, EngineResult, ProjectionName, StreamId};
use streamfold_events::{
    Checkpoint, EmittedEvent, NewEvent, Projection, ProjectionProgress, ProjectionRunner, RunState, StreamBatch,
    compose,
};

use crate::config::{ProjectionConfig, ProjectionMode};
use crate::event_store::{EventSink, EventSource};
use crate::projections::checkpoint_store::CheckpointStore;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runner statistics for one projection instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunnerStats {
    pub events_applied: u64,
    pub batches: u64,
    pub checkpoints_written: u64,
    pub checkpoint_failures: u64,
    pub source_retries: u64,
    pub events_emitted: u64,
    pub last_checkpoint_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub(crate) struct Status {
    pub(crate) run_state: RunState,
    pub(crate) last_error: Option<EngineError>,
}

/// State shared between a controller and its worker thread.
///
/// `progress` is only mutated by the worker while running; the worker holds
/// the lock for the whole application of a batch, so snapshots never see a
/// half-applied batch.
#[derive(Debug)]
pub(crate) struct Shared<St> {
    pub(crate) status: Mutex<Status>,
    /// Notified on `status` when a worker exits.
    pub(crate) finished: Condvar,
    pub(crate) progress: Mutex<ProjectionProgress<St>>,
    pub(crate) stats: Mutex<RunnerStats>,
    /// Emitted events not yet appended; outlives a single run.
    pub(crate) pending: Mutex<Vec<EmittedEvent>>,
}

impl<St> Shared<St> {
    pub(crate) fn new(progress: ProjectionProgress<St>) -> Self {
        Self {
            status: Mutex::new(Status {
                run_state: RunState::Idle,
                last_error: None,
            }),
            finished: Condvar::new(),
            progress: Mutex::new(progress),
            stats: Mutex::new(RunnerStats::default()),
            pending: Mutex::new(Vec::new()),
        }
    }
}

/// How the controller asks a worker to end.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Signal {
    /// Drain the in-flight batch, write a final checkpoint.
    Stop,
    /// Drain the in-flight batch, skip the checkpoint (instance is being discarded).
    Abandon,
}

/// Handle to control and join a projection worker.
#[derive(Debug)]
pub struct WorkerHandle {
    signal: mpsc::Sender<Signal>,
    join: Option<thread::JoinHandle<EngineResult<()>>>,
}

impl WorkerHandle {
    pub(crate) fn send(&self, signal: Signal) {
        // A worker that already exited has dropped its receiver; nothing to tell it.
        let _ = self.signal.send(signal);
    }

    /// Wait for the worker to exit and return how its run ended.
    pub fn join(mut self) -> EngineResult<()> {
        match self.join.take() {
            Some(j) => j
                .join()
                .map_err(|_| EngineError::worker("projection worker panicked"))?,
            None => Ok(()),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(|j| j.is_finished())
    }
}

/// Everything one run of a projection needs.
pub(crate) struct ProjectionWorker<S, C, P>
where
    P: Projection,
{
    pub(crate) name: ProjectionName,
    pub(crate) config: ProjectionConfig,
    pub(crate) store: Arc<S>,
    pub(crate) checkpoints: Arc<C>,
    pub(crate) runner: ProjectionRunner<Arc<P>>,
    pub(crate) shared: Arc<Shared<P::State>>,
    pub(crate) pending: Vec<EmittedEvent>,
    /// Index of the stream the next read round starts from.
    pub(crate) cursor: usize,
}

impl<S, C, P> ProjectionWorker<S, C, P>
where
    S: EventSource + EventSink + 'static,
    C: CheckpointStore + 'static,
    P: Projection,
{
    /// Spawn the worker thread. The caller has already moved the run state to Running.
    pub(crate) fn spawn(self) -> EngineResult<WorkerHandle> {
        let (signal_tx, signal_rx) = mpsc::channel::<Signal>();

        let join = thread::Builder::new()
            .name(format!("projection-{}", self.name))
            .spawn(move || self.run(signal_rx))
            .map_err(|e| EngineError::worker(format!("failed to spawn projection worker: {e}")))?;

        Ok(WorkerHandle {
            signal: signal_tx,
            join: Some(join),
        })
    }

    fn run(mut self, signal_rx: mpsc::Receiver<Signal>) -> EngineResult<()> {
        info!(projection = %self.name, mode = ?self.config.mode, "projection worker started");
        self.pending = std::mem::take(&mut *lock(&self.shared.pending));

        let mut attempt: u32 = 0;
        let result = loop {
            // Stop requests are honoured between batches only.
            match signal_rx.try_recv() {
                Ok(signal) => break self.finish(signal),
                Err(TryRecvError::Disconnected) => break self.finish(Signal::Stop),
                Err(TryRecvError::Empty) => {}
            }

            let wait = match self.step() {
                Ok(0) => {
                    attempt = 0;
                    if self.config.mode == ProjectionMode::CatchUp {
                        debug!(projection = %self.name, "caught up");
                        break self.finish(Signal::Stop);
                    }
                    self.config.poll_interval
                }
                Ok(_) => {
                    attempt = 0;
                    if self.runner.checkpoint_due(self.pending.len()) {
                        // Failures are logged and retried on the next trigger.
                        let _ = self.checkpoint();
                    }
                    continue;
                }
                Err(err) if err.is_retryable() => {
                    let delay = self.config.retry.delay(attempt);
                    attempt = attempt.saturating_add(1);
                    lock(&self.shared.stats).source_retries += 1;
                    warn!(projection = %self.name, error = %err, attempt, ?delay, "event source read failed, retrying");
                    delay
                }
                Err(err) => {
                    error!(projection = %self.name, error = %err, "projection run aborted");
                    // State was rolled back to the last consistent batch; persist that.
                    let _ = self.checkpoint();
                    break Err(err);
                }
            };

            match signal_rx.recv_timeout(wait) {
                Ok(signal) => break self.finish(signal),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break self.finish(Signal::Stop),
            }
        };

        *lock(&self.shared.pending) = std::mem::take(&mut self.pending);
        let mut status = lock(&self.shared.status);
        if status.run_state.is_active() {
            status.run_state = RunState::Idle;
        }
        if let Err(err) = &result {
            status.last_error = Some(err.clone());
        }
        drop(status);
        self.shared.finished.notify_all();

        info!(projection = %self.name, ok = result.is_ok(), "projection worker stopped");
        result
    }

    /// Read one round, merge, apply. Returns the number of events handed to
    /// the projection (0 = caught up).
    ///
    /// A round starts at `cursor` and visits streams in lexical order,
    /// wrapping around, until the batch budget is fetched. The next round
    /// starts after the last stream visited, so every stream gets read even
    /// when the budget is smaller than the number of busy streams.
    fn step(&mut self) -> EngineResult<usize> {
        let positions: Vec<(StreamId, u64)> = lock(&self.shared.progress)
            .positions
            .iter()
            .map(|(s, o)| (s.clone(), o))
            .collect();
        if positions.is_empty() {
            return Ok(0);
        }
        let budget = self.runner.next_batch_budget();
        let start = self.cursor % positions.len();

        let mut batches = Vec::new();
        let mut fetched = 0;
        let mut visited = 0;
        for (stream, offset) in positions.iter().cycle().skip(start).take(positions.len()) {
            if fetched >= budget {
                break;
            }
            let requested = self.config.per_stream_batch.min(budget - fetched);
            let events = self.store.read(stream, *offset, requested)?;
            visited += 1;
            if !events.is_empty() {
                fetched += events.len();
                batches.push(StreamBatch::new(stream.clone(), events, requested));
            }
        }
        self.cursor = (start + visited) % positions.len();

        let events = compose(batches, budget);
        if events.is_empty() {
            return Ok(0);
        }

        let outcome = {
            let mut progress = lock(&self.shared.progress);
            self.runner.apply_batch(&mut progress, &events)?
        };

        let mut stats = lock(&self.shared.stats);
        stats.batches += 1;
        stats.events_applied += outcome.applied as u64;
        drop(stats);

        debug!(projection = %self.name, applied = outcome.applied, skipped = outcome.skipped, "batch applied");
        self.pending.extend(outcome.emitted);
        Ok(events.len())
    }

    /// Persist state and positions, then release the emitted events they cover.
    fn checkpoint(&mut self) -> EngineResult<()> {
        let checkpoint = Checkpoint::capture(&lock(&self.shared.progress))?;

        if let Err(err) = self.checkpoints.save(&self.name, &checkpoint) {
            self.runner.defer_checkpoint(self.pending.len());
            lock(&self.shared.stats).checkpoint_failures += 1;
            warn!(projection = %self.name, error = %err, "checkpoint failed, keeping progress in memory");
            return Err(err.into());
        }

        self.runner.mark_checkpointed();
        let mut stats = lock(&self.shared.stats);
        stats.checkpoints_written += 1;
        stats.last_checkpoint_at = Some(checkpoint.saved_at);
        drop(stats);

        debug!(
            projection = %self.name,
            events_applied = checkpoint.events_applied,
            streams = checkpoint.positions.len(),
            "checkpoint saved"
        );
        self.flush_emitted();
        Ok(())
    }

    /// Append buffered emitted events. Streams whose append fails stay buffered.
    fn flush_emitted(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let mut by_stream: BTreeMap<StreamId, Vec<NewEvent>> = BTreeMap::new();
        for e in self.pending.drain(..) {
            by_stream.entry(e.stream).or_default().push(e.event);
        }

        let mut appended = 0u64;
        for (stream, events) in by_stream {
            let count = events.len() as u64;
            match self.store.append(&stream, events.clone()) {
                Ok(_) => appended += count,
                Err(err) => {
                    warn!(projection = %self.name, stream = %stream, error = %err, "emitting events failed, will retry");
                    self.pending
                        .extend(events.into_iter().map(|event| EmittedEvent { stream: stream.clone(), event }));
                }
            }
        }
        lock(&self.shared.stats).events_emitted += appended;
    }

    fn finish(&mut self, signal: Signal) -> EngineResult<()> {
        match signal {
            Signal::Stop => self.checkpoint(),
            Signal::Abandon => {
                if !self.pending.is_empty() {
                    debug!(projection = %self.name, dropped = self.pending.len(), "dropping unflushed emitted events");
                }
                self.pending.clear();
                Ok(())
            }
        }
    }
}
