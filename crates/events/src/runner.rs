//! Projection runner (pure part of the control loop).
//!
//! Applies batches to projection state with all-or-nothing semantics and
//! tracks how far the projection got. Reading events and persisting
//! checkpoints are left to the caller.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use streamfold_core::{EngineError, EngineResult, StreamId};

use crate::{CheckpointPolicy, EmittedEvent, PositionTable, Projection, RecordedEvent};

/// State plus positions: what a checkpoint captures.
///
/// Invariant: `state` reflects exactly the events below `positions[s]` for
/// every stream `s`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionProgress<S> {
    pub state: S,
    pub positions: PositionTable,
    pub emitted_streams: BTreeSet<StreamId>,
    pub events_applied: u64,
}

impl<S> ProjectionProgress<S> {
    pub fn fresh(state: S) -> Self {
        Self {
            state,
            positions: PositionTable::new(),
            emitted_streams: BTreeSet::new(),
            events_applied: 0,
        }
    }
}

/// Result of one applied batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub applied: usize,
    /// Events at offsets already consumed (re-delivered); ignored.
    pub skipped: usize,
    pub emitted: Vec<EmittedEvent>,
}

impl<P> Projection for Arc<P>
where
    P: Projection + ?Sized,
{
    type State = P::State;

    fn init(&self) -> Self::State {
        (**self).init()
    }

    fn apply(&self, state: &mut Self::State, event: &RecordedEvent) -> anyhow::Result<Vec<EmittedEvent>> {
        (**self).apply(state, event)
    }
}

/// Runs batches through a projection and tracks checkpoint pressure.
#[derive(Debug)]
pub struct ProjectionRunner<P>
where
    P: Projection,
{
    projection: P,
    policy: CheckpointPolicy,
    since_checkpoint: u64,
    /// Emitted events already buffered when the last checkpoint attempt failed.
    emits_baseline: usize,
}

impl<P> ProjectionRunner<P>
where
    P: Projection,
{
    pub fn new(projection: P, policy: CheckpointPolicy) -> Self {
        Self {
            projection,
            policy,
            since_checkpoint: 0,
            emits_baseline: 0,
        }
    }

    pub fn projection(&self) -> &P {
        &self.projection
    }

    pub fn policy(&self) -> CheckpointPolicy {
        self.policy
    }

    /// Events applied since the last checkpoint attempt.
    pub fn since_checkpoint(&self) -> u64 {
        self.since_checkpoint
    }

    /// Maximum number of events the next batch may contain.
    pub fn next_batch_budget(&self) -> usize {
        self.policy.batch_budget(self.since_checkpoint)
    }

    pub fn checkpoint_due(&self, buffered_emits: usize) -> bool {
        self.policy
            .is_due(self.since_checkpoint, buffered_emits.saturating_sub(self.emits_baseline))
    }

    pub fn mark_checkpointed(&mut self) {
        self.since_checkpoint = 0;
        self.emits_baseline = 0;
    }

    /// A checkpoint save failed: retry on the next trigger, one full block
    /// (or one more `cache_size` of emitted events) later.
    pub fn defer_checkpoint(&mut self, buffered_emits: usize) {
        self.since_checkpoint = 0;
        self.emits_baseline = buffered_emits;
    }

    /// Apply a batch in order, all or nothing.
    ///
    /// Offsets advance only once every event has been applied. If the handler
    /// fails, or the batch has a hole in some stream, state and positions are
    /// left exactly as they were before the call.
    pub fn apply_batch(
        &mut self,
        progress: &mut ProjectionProgress<P::State>,
        events: &[RecordedEvent],
    ) -> EngineResult<BatchOutcome> {
        if events.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let backup = progress.state.clone();
        let mut staged: BTreeMap<&StreamId, u64> = BTreeMap::new();
        let mut outcome = BatchOutcome::default();

        for event in events {
            let stream = event.stream();
            let expected = staged
                .get(stream)
                .copied()
                .unwrap_or_else(|| progress.positions.offset(stream));
            let found = event.offset();

            if found < expected {
                debug!(stream = %stream, offset = found, expected, "skipping already consumed event");
                outcome.skipped += 1;
                continue;
            }
            if found > expected {
                progress.state = backup;
                return Err(EngineError::protocol(format!(
                    "event source skipped offsets on {stream}: expected {expected}, found {found}"
                )));
            }

            match self.projection.apply(&mut progress.state, event) {
                Ok(emitted) => outcome.emitted.extend(emitted),
                Err(err) => {
                    progress.state = backup;
                    return Err(EngineError::Handler {
                        stream: stream.to_string(),
                        offset: found,
                        message: format!("{err:#}"),
                    });
                }
            }

            staged.insert(stream, found + 1);
            outcome.applied += 1;
        }

        for (stream, next) in staged {
            progress.positions.advance(stream, next);
        }
        for e in &outcome.emitted {
            progress.emitted_streams.insert(e.stream.clone());
        }
        progress.events_applied += outcome.applied as u64;
        self.since_checkpoint += outcome.applied as u64;

        Ok(outcome)
    }

    /// Rebuild a projection from scratch by folding the full event history.
    ///
    /// Events are applied in the given order, which must respect offset order
    /// within each stream.
    pub fn rebuild_from_scratch<'a>(
        projection: P,
        events: impl IntoIterator<Item = &'a RecordedEvent>,
    ) -> EngineResult<ProjectionProgress<P::State>> {
        let mut progress = ProjectionProgress::fresh(projection.init());
        let mut runner = ProjectionRunner::new(projection, CheckpointPolicy::new(u64::MAX, usize::MAX));
        let events: Vec<RecordedEvent> = events.into_iter().cloned().collect();
        runner.apply_batch(&mut progress, &events)?;
        Ok(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::from_fn;
    use chrono::Utc;
    use proptest::prelude::*;
    use serde_json::json;
    use uuid::Uuid;

    fn ev(stream: &str, offset: u64, amount: i64) -> RecordedEvent {
        RecordedEvent::new(
            Uuid::now_v7(),
            StreamId::new(stream),
            offset,
            None,
            "amount.added",
            Utc::now(),
            json!({ "amount": amount }),
        )
    }

    fn summing() -> impl Projection<State = Vec<i64>> {
        from_fn(Vec::new(), |state: &mut Vec<i64>, e: &RecordedEvent| {
            let amount = e.payload()["amount"].as_i64().unwrap_or_default();
            if amount < 0 {
                anyhow::bail!("negative amount {amount}");
            }
            state.push(amount);
            if amount >= 100 {
                return Ok(vec![EmittedEvent::new("$big-amounts", "big.amount", json!({ "amount": amount }))]);
            }
            Ok(vec![])
        })
    }

    fn runner() -> ProjectionRunner<impl Projection<State = Vec<i64>>> {
        ProjectionRunner::new(summing(), CheckpointPolicy::new(5, 100))
    }

    #[test]
    fn batch_advances_positions_past_applied_events() {
        let mut runner = runner();
        let mut progress = ProjectionProgress::fresh(Vec::new());

        let outcome = runner
            .apply_batch(&mut progress, &[ev("a-1", 0, 1), ev("b-1", 0, 2), ev("a-1", 1, 3)])
            .unwrap();

        assert_eq!(outcome.applied, 3);
        assert_eq!(progress.state, vec![1, 2, 3]);
        assert_eq!(progress.positions.offset(&StreamId::new("a-1")), 2);
        assert_eq!(progress.positions.offset(&StreamId::new("b-1")), 1);
        assert_eq!(runner.since_checkpoint(), 3);
        assert_eq!(runner.next_batch_budget(), 2);
    }

    #[test]
    fn handler_failure_rolls_back_the_whole_batch() {
        let mut runner = runner();
        let mut progress = ProjectionProgress::fresh(Vec::new());
        runner.apply_batch(&mut progress, &[ev("a-1", 0, 1)]).unwrap();

        let err = runner
            .apply_batch(&mut progress, &[ev("a-1", 1, 2), ev("a-1", 2, -1)])
            .unwrap_err();

        assert!(matches!(err, EngineError::Handler { offset: 2, .. }));
        assert_eq!(progress.state, vec![1]);
        assert_eq!(progress.positions.offset(&StreamId::new("a-1")), 1);
        assert_eq!(progress.events_applied, 1);
    }

    #[test]
    fn redelivered_events_are_skipped() {
        let mut runner = runner();
        let mut progress = ProjectionProgress::fresh(Vec::new());
        runner.apply_batch(&mut progress, &[ev("a-1", 0, 1)]).unwrap();

        let outcome = runner
            .apply_batch(&mut progress, &[ev("a-1", 0, 1), ev("a-1", 1, 2)])
            .unwrap();

        assert_eq!(outcome.skipped, 1);
        assert_eq!(progress.state, vec![1, 2]);
    }

    #[test]
    fn offset_gap_is_rejected_without_changes() {
        let mut runner = runner();
        let mut progress = ProjectionProgress::fresh(Vec::new());

        let err = runner
            .apply_batch(&mut progress, &[ev("a-1", 0, 1), ev("a-1", 2, 2)])
            .unwrap_err();

        assert!(matches!(err, EngineError::Protocol(_)));
        assert!(progress.state.is_empty());
        assert!(progress.positions.is_empty());
    }

    #[test]
    fn emitted_events_are_returned_and_their_streams_remembered() {
        let mut runner = runner();
        let mut progress = ProjectionProgress::fresh(Vec::new());

        let outcome = runner.apply_batch(&mut progress, &[ev("a-1", 0, 150)]).unwrap();

        assert_eq!(outcome.emitted.len(), 1);
        assert!(progress.emitted_streams.contains(&StreamId::new("$big-amounts")));
    }

    #[test]
    fn checkpoint_is_due_after_block() {
        let mut runner = runner();
        let mut progress = ProjectionProgress::fresh(Vec::new());
        let events: Vec<_> = (0..5).map(|i| ev("a-1", i, 1)).collect();

        runner.apply_batch(&mut progress, &events).unwrap();
        assert!(runner.checkpoint_due(0));

        runner.mark_checkpointed();
        assert!(!runner.checkpoint_due(0));
    }

    #[test]
    fn failed_checkpoint_waits_a_full_block() {
        let mut runner = ProjectionRunner::new(summing(), CheckpointPolicy::new(5, 3));
        let mut progress = ProjectionProgress::fresh(Vec::new());
        let events: Vec<_> = (0..5).map(|i| ev("a-1", i, 1)).collect();
        runner.apply_batch(&mut progress, &events).unwrap();
        assert!(runner.checkpoint_due(2));

        runner.defer_checkpoint(2);
        assert_eq!(runner.next_batch_budget(), 3);
        assert!(!runner.checkpoint_due(4));
        assert!(runner.checkpoint_due(5));

        let more: Vec<_> = (5..8).map(|i| ev("a-1", i, 1)).collect();
        runner.apply_batch(&mut progress, &more).unwrap();
        assert_eq!(runner.next_batch_budget(), 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: folding the same history twice gives the same state, and
        /// splitting it into batches does not change the result.
        #[test]
        fn replay_is_deterministic(
            amounts in prop::collection::vec(0i64..1000, 0..40),
            split in 1usize..8,
        ) {
            let events: Vec<_> = amounts.iter().enumerate().map(|(i, a)| ev("a-1", i as u64, *a)).collect();

            let first = ProjectionRunner::rebuild_from_scratch(summing(), &events).unwrap();
            let second = ProjectionRunner::rebuild_from_scratch(summing(), &events).unwrap();
            prop_assert_eq!(&first.state, &second.state);

            let mut runner = ProjectionRunner::new(summing(), CheckpointPolicy::new(u64::MAX, usize::MAX));
            let mut progress = ProjectionProgress::fresh(Vec::new());
            for chunk in events.chunks(split) {
                runner.apply_batch(&mut progress, chunk).unwrap();
            }
            prop_assert_eq!(&progress.state, &first.state);
            prop_assert_eq!(progress.positions, first.positions);
        }
    }
}
