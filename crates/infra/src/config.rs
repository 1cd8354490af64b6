//! Construction-time configuration of a projection instance.
//!
//! Loading configuration from files or the environment is left to the host
//! process; these types derive serde so they can be embedded in its config.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use streamfold_core::{EngineError, EngineResult, ProjectionName};
use streamfold_events::CheckpointPolicy;

/// What the runner does once it has caught up.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionMode {
    /// Keep polling for new events until stopped.
    #[default]
    Continuous,
    /// Checkpoint and become idle once every stream is drained.
    CatchUp,
}

/// Exponential backoff for transient event source failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(5),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based), capped at `max_backoff`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1).saturating_pow(attempt);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Projection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    /// Unique projection name; also the checkpoint key.
    pub name: String,
    /// Max events per batch and max buffered emitted events before a forced checkpoint.
    pub cache_size: usize,
    /// Events applied between checkpoints.
    pub persist_block_size: u64,
    pub mode: ProjectionMode,
    /// Per-stream read cap for one round (fairness across streams).
    pub per_stream_batch: usize,
    /// Wait between polls once caught up (continuous mode).
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            name: "projection".to_string(),
            cache_size: 1000,
            persist_block_size: 1000,
            mode: ProjectionMode::Continuous,
            per_stream_batch: 100,
            poll_interval: Duration::from_millis(250),
            retry: RetryPolicy::default(),
        }
    }
}

impl ProjectionConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    pub fn with_persist_block_size(mut self, persist_block_size: u64) -> Self {
        self.persist_block_size = persist_block_size;
        self
    }

    pub fn with_mode(mut self, mode: ProjectionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_per_stream_batch(mut self, per_stream_batch: usize) -> Self {
        self.per_stream_batch = per_stream_batch;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::invalid_config("name must not be empty"));
        }
        if self.cache_size == 0 {
            return Err(EngineError::invalid_config("cache_size must be positive"));
        }
        if self.persist_block_size == 0 {
            return Err(EngineError::invalid_config("persist_block_size must be positive"));
        }
        if self.per_stream_batch == 0 {
            return Err(EngineError::invalid_config("per_stream_batch must be positive"));
        }
        Ok(())
    }

    pub fn projection_name(&self) -> ProjectionName {
        ProjectionName::new(self.name.clone())
    }

    pub fn checkpoint_policy(&self) -> CheckpointPolicy {
        CheckpointPolicy::new(self.persist_block_size, self.cache_size)
    }
}
