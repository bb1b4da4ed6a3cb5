//! Service lifecycle

use serde::Serialize;
use std::time::Instant;

/// Lifecycle of the traversal loop.
///
/// Requests are served in every state; only the loop that applies pending
/// changes once per frame follows these transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Loop not started; traversals only happen on explicit request
    Idle,

    /// Loop applies pending changes once per frame
    Running {
        /// When the loop started
        started_at: Instant,
    },

    /// Cancellation observed, finishing the current window
    Stopping,

    /// Loop exited and cannot be restarted
    Stopped,
}

impl ServiceState {
    pub fn can_transition_to(&self, target: &ServiceState) -> bool {
        use ServiceState::*;

        match (self, target) {
            (Idle, Running { .. }) => true,
            (Idle, Stopped) => true,

            (Running { .. }, Stopping) => true,

            (Stopping, Stopped) => true,

            (Stopped, _) => false,

            (a, b) if a == b => true,

            _ => false,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ServiceState::Idle => "Idle",
            ServiceState::Running { .. } => "Running",
            ServiceState::Stopping => "Stopping",
            ServiceState::Stopped => "Stopped",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ServiceState::Running { .. })
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, ServiceState::Stopped | ServiceState::Stopping)
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl Serialize for ServiceState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let idle = ServiceState::Idle;
        let running = ServiceState::Running {
            started_at: Instant::now(),
        };
        let stopping = ServiceState::Stopping;
        let stopped = ServiceState::Stopped;

        assert!(idle.can_transition_to(&running));
        assert!(idle.can_transition_to(&stopped));
        assert!(running.can_transition_to(&stopping));
        assert!(stopping.can_transition_to(&stopped));

        assert!(idle.can_transition_to(&idle));
    }

    #[test]
    fn test_invalid_transitions() {
        let idle = ServiceState::Idle;
        let running = ServiceState::Running {
            started_at: Instant::now(),
        };
        let stopped = ServiceState::Stopped;

        assert!(!running.can_transition_to(&idle));
        assert!(!running.can_transition_to(&stopped)); // Must go through Stopping
        assert!(!stopped.can_transition_to(&running)); // Can't restart after stopped
        assert!(!stopped.can_transition_to(&idle));
    }

    #[test]
    fn test_state_checks() {
        let running = ServiceState::Running {
            started_at: Instant::now(),
        };
        assert!(running.is_running());
        assert!(!running.is_stopped());

        assert!(ServiceState::Stopping.is_stopped());
        assert!(!ServiceState::Idle.is_running());
    }
}
