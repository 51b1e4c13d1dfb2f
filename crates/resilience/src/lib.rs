//! Resilience primitives for outbound service calls.
//!
//! Every call to a remote collaborator (ledger, audit, key service) goes
//! through a [`ServiceClient`], which wraps it in the [`CircuitBreaker`]
//! registered for its destination and bounds it with a per-call timeout.
//!
//! ```text
//! Closed ──(threshold failures)──► Open ──(reset timeout)──► HalfOpen
//!   ▲                                ▲                          │
//!   └────────(trial succeeds)────────┼──────────────────────────┤
//!                                    └─────(trial fails)────────┘
//! ```

pub mod breaker;
pub mod client;
pub mod error;
pub mod registry;
pub mod state;

pub use breaker::{BreakerConfig, BreakerError, BreakerSnapshot, CircuitBreaker};
pub use client::{Destination, ServiceClient, ServiceClientBuilder, ServiceRequest, ServiceResponse};
pub use error::{ClientError, Result};
pub use registry::BreakerRegistry;
pub use state::CircuitState;
