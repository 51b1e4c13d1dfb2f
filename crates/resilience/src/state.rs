//! Circuit breaker state machine.

use serde::{Deserialize, Serialize};

/// The status of a circuit breaker.
///
/// State transitions:
/// ```text
/// Closed ──► Open ──► HalfOpen ──┬──► Closed
///             ▲                  │
///             └──────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CircuitState {
    /// Calls pass through; failures are counted.
    #[default]
    Closed,

    /// Calls are rejected without reaching the destination.
    Open,

    /// A single trial call is allowed through to probe the destination.
    HalfOpen,
}

impl CircuitState {
    /// Returns true if calls may be issued without a trial permit.
    pub fn allows_calls(&self) -> bool {
        matches!(self, CircuitState::Closed)
    }

    /// Returns true if the breaker is rejecting calls.
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitState::Open)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "Closed",
            CircuitState::Open => "Open",
            CircuitState::HalfOpen => "HalfOpen",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
