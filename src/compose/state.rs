//! Compose state machine

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stage of one compose operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComposeState {
    Planning,
    AllocatingStorage,
    DefiningMachine,
    AttachingNetwork,
    AttachingStorage,
    ValidatingStartup,
    Finalizing,
    Done,
    Failed,
}

impl ComposeState {
    /// The stage that follows a successful one
    pub fn next(self) -> Option<ComposeState> {
        use ComposeState::*;
        match self {
            Planning => Some(AllocatingStorage),
            AllocatingStorage => Some(DefiningMachine),
            DefiningMachine => Some(AttachingNetwork),
            AttachingNetwork => Some(AttachingStorage),
            AttachingStorage => Some(ValidatingStartup),
            ValidatingStartup => Some(Finalizing),
            Finalizing => Some(Done),
            Done | Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ComposeState::Done | ComposeState::Failed)
    }

    /// Whether moving to `to` is a legal transition
    pub fn can_transition(self, to: ComposeState) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == ComposeState::Failed || self.next() == Some(to)
    }
}

impl fmt::Display for ComposeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComposeState::Planning => "PLANNING",
            ComposeState::AllocatingStorage => "ALLOCATING_STORAGE",
            ComposeState::DefiningMachine => "DEFINING_MACHINE",
            ComposeState::AttachingNetwork => "ATTACHING_NETWORK",
            ComposeState::AttachingStorage => "ATTACHING_STORAGE",
            ComposeState::ValidatingStartup => "VALIDATING_STARTUP",
            ComposeState::Finalizing => "FINALIZING",
            ComposeState::Done => "DONE",
            ComposeState::Failed => "FAILED",
        };
        write!(f, "{}", name)
    }
}
