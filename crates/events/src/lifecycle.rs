//! Run-state machine of a projection instance.

use serde::{Deserialize, Serialize};

use streamfold_core::{EngineError, EngineResult};

/// Lifecycle state. Exactly one holds at any time.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    /// Stop requested; the in-flight batch drains, then a final checkpoint.
    Stopping,
    /// Terminal: the instance is being (or has been) discarded.
    Deleting,
}

impl RunState {
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Idle, Running)
                | (Running, Stopping)
                | (Running, Idle)
                | (Stopping, Idle)
                | (Idle | Running | Stopping, Deleting)
        )
    }

    /// Checked transition.
    pub fn transition(self, next: RunState) -> EngineResult<RunState> {
        if self.can_transition_to(next) {
            return Ok(next);
        }
        Err(match (self, next) {
            (RunState::Running | RunState::Stopping, RunState::Running) => {
                EngineError::protocol("projection is already running")
            }
            (RunState::Deleting, _) => EngineError::protocol("projection was deleted"),
            _ => EngineError::protocol(format!("invalid transition {self:?} -> {next:?}")),
        })
    }

    pub fn is_active(self) -> bool {
        matches!(self, RunState::Running | RunState::Stopping)
    }
}

impl core::fmt::Display for RunState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Stopping => "stopping",
            RunState::Deleting => "deleting",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_cycle_is_allowed() {
        let s = RunState::Idle.transition(RunState::Running).unwrap();
        let s = s.transition(RunState::Stopping).unwrap();
        assert_eq!(s.transition(RunState::Idle).unwrap(), RunState::Idle);
    }

    #[test]
    fn second_start_is_rejected() {
        let err = RunState::Running.transition(RunState::Running).unwrap_err();
        assert_eq!(err, EngineError::protocol("projection is already running"));
    }

    #[test]
    fn deleting_is_terminal() {
        assert!(RunState::Idle.can_transition_to(RunState::Deleting));
        assert!(RunState::Running.can_transition_to(RunState::Deleting));
        assert!(RunState::Deleting.transition(RunState::Running).is_err());
        assert!(RunState::Deleting.transition(RunState::Idle).is_err());
    }

    #[test]
    fn idle_cannot_stop() {
        assert!(!RunState::Idle.can_transition_to(RunState::Stopping));
    }
}
