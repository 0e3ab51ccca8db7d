//! Plugin instance lifecycle
//!
//! ```text
//! Registered -> Loading -> Ready <-> Invoking
//!                  |         |          |
//!                  +-> Faulted <--------+
//! Ready | Faulted -> Unloading -> Terminated
//! ```

use crate::error::RuntimeError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a plugin instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Registered,
    Loading,
    Ready,
    Invoking,
    Faulted,
    Unloading,
    Terminated,
}

impl InstanceState {
    /// Every state, in lifecycle order
    pub const ALL: [InstanceState; 7] = [
        InstanceState::Registered,
        InstanceState::Loading,
        InstanceState::Ready,
        InstanceState::Invoking,
        InstanceState::Faulted,
        InstanceState::Unloading,
        InstanceState::Terminated,
    ];

    /// Loaded and accepting calls
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, InstanceState::Ready | InstanceState::Invoking)
    }

    /// Selectable for dispatch once loaded
    #[must_use]
    pub const fn is_loadable(self) -> bool {
        matches!(self, InstanceState::Registered | InstanceState::Loading)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            InstanceState::Registered => "registered",
            InstanceState::Loading => "loading",
            InstanceState::Ready => "ready",
            InstanceState::Invoking => "invoking",
            InstanceState::Faulted => "faulted",
            InstanceState::Unloading => "unloading",
            InstanceState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validate a lifecycle transition
///
/// # Errors
/// `IllegalTransition` for anything not in [`allowed_transitions`].
pub fn validate_transition(from: InstanceState, to: InstanceState) -> Result<(), RuntimeError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(RuntimeError::IllegalTransition { from, to })
    }
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: InstanceState) -> &'static [InstanceState] {
    use InstanceState::*;
    match from {
        Registered => &[Loading],
        Loading => &[Ready, Faulted],
        Ready => &[Invoking, Faulted, Unloading],
        Invoking => &[Ready, Faulted],
        Faulted => &[Unloading],
        Unloading => &[Terminated],
        Terminated => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        use InstanceState::*;
        let path = [Registered, Loading, Ready, Invoking, Ready, Unloading, Terminated];
        for pair in path.windows(2) {
            validate_transition(pair[0], pair[1]).unwrap();
        }
    }

    #[test]
    fn terminated_is_final() {
        for to in InstanceState::ALL {
            assert!(validate_transition(InstanceState::Terminated, to).is_err());
        }
    }

    #[test]
    fn no_automatic_recovery_from_fault() {
        assert!(validate_transition(InstanceState::Faulted, InstanceState::Loading).is_err());
        assert!(validate_transition(InstanceState::Faulted, InstanceState::Ready).is_err());
    }
}
