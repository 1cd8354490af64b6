use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{EmittedEvent, RecordedEvent};

/// A projection folds recorded events into derived state.
///
/// ## Determinism
///
/// `apply` must be a pure function of `(state, event)`: no wall-clock reads,
/// no IO. Replaying the same events from the same starting state must give
/// the same result, because after a crash the runner replays everything since
/// the last checkpoint.
///
/// ## Side effects
///
/// The only allowed side effect is *returning* events to emit. The engine
/// appends them once the checkpoint covering this event has been saved.
///
/// ## Failure
///
/// Returning an error rolls the whole batch back (state and offsets) and ends
/// the run; the error is kept as the instance's last error.
pub trait Projection: Send + Sync + 'static {
    /// The accumulator. Cloned once per batch for rollback, serialized at checkpoints.
    type State: Clone + Serialize + DeserializeOwned + Send + 'static;

    /// Fresh state for a projection with no checkpoint.
    fn init(&self) -> Self::State;

    /// Apply one event, mutating `state` in place (or replacing it wholesale).
    fn apply(&self, state: &mut Self::State, event: &RecordedEvent) -> anyhow::Result<Vec<EmittedEvent>>;
}

/// Closure-backed projection, see [`from_fn`].
pub struct FoldFn<S, F> {
    init: S,
    fold: F,
}

impl<S, F> core::fmt::Debug for FoldFn<S, F>
where
    S: core::fmt::Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FoldFn").field("init", &self.init).finish_non_exhaustive()
    }
}

/// Build a projection from an initial state and a fold closure.
pub fn from_fn<S, F>(init: S, fold: F) -> FoldFn<S, F>
where
    S: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    F: Fn(&mut S, &RecordedEvent) -> anyhow::Result<Vec<EmittedEvent>> + Send + Sync + 'static,
{
    FoldFn { init, fold }
}

impl<S, F> Projection for FoldFn<S, F>
where
    S: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    F: Fn(&mut S, &RecordedEvent) -> anyhow::Result<Vec<EmittedEvent>> + Send + Sync + 'static,
{
    type State = S;

    fn init(&self) -> S {
        self.init.clone()
    }

    fn apply(&self, state: &mut S, event: &RecordedEvent) -> anyhow::Result<Vec<EmittedEvent>> {
        (self.fold)(state, event)
    }
}
