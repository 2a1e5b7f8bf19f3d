//! Run lifecycle state machine with transition history.

use chrono::Utc;
use sem_core::types::{RunState, StageTransition};
use sem_core::{PipelineError, PipelineResult};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct RunStateMachine {
    state: RunState,
    transitions: Vec<StageTransition>,
}

impl RunStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn transitions(&self) -> &[StageTransition] {
        &self.transitions
    }

    pub fn into_transitions(self) -> Vec<StageTransition> {
        self.transitions
    }

    /// Move to `to`, recording the transition. Illegal moves leave the
    /// machine untouched.
    pub fn advance(&mut self, to: RunState) -> PipelineResult<()> {
        let from = self.state;
        Self::validate_transition(from, to)?;
        self.transitions.push(StageTransition {
            from,
            to,
            at: Utc::now(),
        });
        self.state = to;
        debug!(from = %from, to = %to, "Run state transition");
        Ok(())
    }

    fn validate_transition(from: RunState, to: RunState) -> PipelineResult<()> {
        let legal = match (from, to) {
            (RunState::Intake, RunState::Generating)
            | (RunState::Generating, RunState::Enriching)
            | (RunState::Enriching, RunState::Scoring)
            | (RunState::Scoring, RunState::Deduplicating)
            | (RunState::Deduplicating, RunState::Persisting)
            | (RunState::Persisting, RunState::Done) => true,
            (from, RunState::Failed) => !from.is_terminal(),
            _ => false,
        };
        if legal {
            Ok(())
        } else {
            Err(PipelineError::InvalidTransition { from, to })
        }
    }
}
