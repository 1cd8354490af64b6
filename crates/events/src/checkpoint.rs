//! Checkpoint model and policy.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use streamfold_core::{EngineError, EngineResult, StreamId};

use crate::{PositionTable, ProjectionProgress};

/// Snapshot of a projection: serialized state plus the positions it reflects.
///
/// Stores must write a checkpoint atomically (state and positions together or
/// not at all).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub state: JsonValue,
    pub positions: PositionTable,
    /// Streams this projection has appended emitted events to.
    #[serde(default)]
    pub emitted_streams: BTreeSet<StreamId>,
    pub events_applied: u64,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Capture the current progress. Fails if the state cannot be serialized.
    pub fn capture<S: Serialize>(progress: &ProjectionProgress<S>) -> EngineResult<Self> {
        let state = serde_json::to_value(&progress.state)
            .map_err(|e| EngineError::checkpoint(format!("state serialization failed: {e}")))?;

        Ok(Self {
            state,
            positions: progress.positions.clone(),
            emitted_streams: progress.emitted_streams.clone(),
            events_applied: progress.events_applied,
            saved_at: Utc::now(),
        })
    }

    /// Turn a loaded checkpoint back into progress. A state that no longer
    /// decodes is a corrupt checkpoint, never silently replaced.
    pub fn restore<S: DeserializeOwned>(self) -> EngineResult<ProjectionProgress<S>> {
        let state = serde_json::from_value(self.state)
            .map_err(|e| EngineError::corrupt(format!("state deserialization failed: {e}")))?;

        Ok(ProjectionProgress {
            state,
            positions: self.positions,
            emitted_streams: self.emitted_streams,
            events_applied: self.events_applied,
        })
    }
}

/// When to persist progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointPolicy {
    /// Events applied between checkpoints.
    pub persist_block_size: u64,
    /// Upper bound on events per batch and on buffered emitted events.
    pub cache_size: usize,
}

impl CheckpointPolicy {
    pub fn new(persist_block_size: u64, cache_size: usize) -> Self {
        Self {
            persist_block_size: persist_block_size.max(1),
            cache_size: cache_size.max(1),
        }
    }

    /// How many events the next batch may apply.
    ///
    /// Batches never straddle a checkpoint boundary, so a checkpoint lands
    /// exactly every `persist_block_size` events.
    pub fn batch_budget(&self, since_checkpoint: u64) -> usize {
        let remaining = self.persist_block_size.saturating_sub(since_checkpoint).max(1);
        usize::try_from(remaining).unwrap_or(usize::MAX).min(self.cache_size)
    }

    pub fn is_due(&self, since_checkpoint: u64, buffered_emits: usize) -> bool {
        since_checkpoint >= self.persist_block_size || buffered_emits >= self.cache_size
    }
}
