//! Process lifecycle states
//!
//! `Created -> Running <-> Waiting -> Finished | Excepted | Killed`. The three
//! terminal states have no outgoing transitions.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::domain::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Created,
    Running,
    Waiting,
    Finished,
    Excepted,
    Killed
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Finished | ProcessState::Excepted | ProcessState::Killed)
    }

    pub fn can_transition_to(&self, next: ProcessState) -> bool {
        use ProcessState::*;

        match (self, next) {
            (Created, Running) | (Created, Killed) | (Created, Excepted) => true,
            (Running, Waiting) | (Running, Finished) | (Running, Excepted) | (Running, Killed) => true,
            (Waiting, Running) | (Waiting, Killed) | (Waiting, Excepted) => true,
            _ => false
        }
    }

    /// Checked transition; illegal moves are an `InvalidOperation`
    pub fn transition(self, next: ProcessState) -> Result<ProcessState, EngineError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(EngineError::InvalidOperation(format!("cannot transition process from {} to {}", self, next)))
        }
    }
}

impl Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessState::Created => "created",
            ProcessState::Running => "running",
            ProcessState::Waiting => "waiting",
            ProcessState::Finished => "finished",
            ProcessState::Excepted => "excepted",
            ProcessState::Killed => "killed"
        };
        write!(f, "{}", name)
    }
}

/// Sub-state of a calculation job, stored in the node attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalcJobState {
    New,
    Submitting,
    WithScheduler,
    Retrieving,
    Parsing,
    Finished,
    Failed
}

impl CalcJobState {
    pub const ATTRIBUTE: &'static str = "calc_job_state";

    pub fn as_str(&self) -> &'static str {
        match self {
            CalcJobState::New => "new",
            CalcJobState::Submitting => "submitting",
            CalcJobState::WithScheduler => "with_scheduler",
            CalcJobState::Retrieving => "retrieving",
            CalcJobState::Parsing => "parsing",
            CalcJobState::Finished => "finished",
            CalcJobState::Failed => "failed"
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "new" => Some(CalcJobState::New),
            "submitting" => Some(CalcJobState::Submitting),
            "with_scheduler" => Some(CalcJobState::WithScheduler),
            "retrieving" => Some(CalcJobState::Retrieving),
            "parsing" => Some(CalcJobState::Parsing),
            "finished" => Some(CalcJobState::Finished),
            "failed" => Some(CalcJobState::Failed),
            _ => None
        }
    }
}

impl Display for CalcJobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_and_waiting_alternate() {
        let state = ProcessState::Created.transition(ProcessState::Running).unwrap();
        let state = state.transition(ProcessState::Waiting).unwrap();
        let state = state.transition(ProcessState::Running).unwrap();
        let state = state.transition(ProcessState::Finished).unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn test_terminal_states_have_no_exit() {
        for terminal in [ProcessState::Finished, ProcessState::Excepted, ProcessState::Killed] {
            for next in [ProcessState::Running, ProcessState::Waiting, ProcessState::Created, ProcessState::Killed] {
                assert!(matches!(terminal.transition(next), Err(EngineError::InvalidOperation(_))));
            }
        }
    }

    #[test]
    fn test_calc_job_state_round_trips_through_attribute_string() {
        assert_eq!(CalcJobState::from_str(CalcJobState::WithScheduler.as_str()), Some(CalcJobState::WithScheduler));
        assert_eq!(CalcJobState::from_str("bogus"), None);
    }
}
