//! Sale error types.

use std::time::Duration;

use common::{AttemptId, GoodId, Money};
use inventory::InventoryError;
use resilience::ClientError;
use security::SecurityError;
use thiserror::Error;

/// What a `NotFound` refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Missing {
    Good(GoodId),
    Account(String),
    Key(String),
}

impl std::fmt::Display for Missing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Missing::Good(id) => write!(f, "good {id}"),
            Missing::Account(username) => write!(f, "account '{username}'"),
            Missing::Key(name) => write!(f, "key '{name}'"),
        }
    }
}

/// Errors returned to callers of the sale orchestrator.
#[derive(Debug, Error)]
pub enum SaleError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(Missing),

    #[error("Insufficient stock for good {good_id}: requested {requested}, available {available}")]
    InsufficientStock {
        good_id: GoodId,
        requested: u32,
        available: i64,
    },

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Money, available: Money },

    /// The destination's breaker is open; nothing was sent.
    #[error("Circuit open for '{destination}', retry in {retry_after:?}")]
    CircuitOpen {
        destination: String,
        retry_after: Duration,
    },

    #[error("'{destination}' unavailable: {reason}")]
    Unavailable { destination: String, reason: String },

    #[error("'{destination}' did not answer in time")]
    UpstreamTimeout { destination: String },

    #[error("'{destination}' rejected the request: {reason}")]
    UpstreamError {
        destination: String,
        status: Option<u16>,
        reason: String,
    },

    #[error("Decryption failed: {0}")]
    DecryptionError(String),

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// The attempt is journaled but not yet settled.
    #[error("Sale attempt {0} is still in progress")]
    AttemptInProgress(AttemptId),

    /// The attempt id was already used and cannot produce this sale.
    #[error("Sale attempt {attempt_id} cannot be replayed: {reason}")]
    AttemptConflict { attempt_id: AttemptId, reason: String },
}

impl SaleError {
    /// Short label for metrics and audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            SaleError::InvalidInput(_) => "invalid_input",
            SaleError::NotFound(_) => "not_found",
            SaleError::InsufficientStock { .. } => "insufficient_stock",
            SaleError::InsufficientFunds { .. } => "insufficient_funds",
            SaleError::CircuitOpen { .. } => "circuit_open",
            SaleError::Unavailable { .. } => "unavailable",
            SaleError::UpstreamTimeout { .. } => "upstream_timeout",
            SaleError::UpstreamError { .. } => "upstream_error",
            SaleError::DecryptionError(_) => "decryption_error",
            SaleError::PersistenceError(_) => "persistence_error",
            SaleError::AttemptInProgress(_) => "attempt_in_progress",
            SaleError::AttemptConflict { .. } => "attempt_conflict",
        }
    }

    /// True when a collaborator could not be reached, including a fail-fast
    /// rejection by an open breaker.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            SaleError::CircuitOpen { .. } | SaleError::Unavailable { .. }
        )
    }

    /// Maps a failed account lookup: anything but an open breaker is
    /// `Unavailable`.
    pub(crate) fn from_lookup(err: LedgerError) -> Self {
        match err {
            LedgerError::AccountNotFound(username) => SaleError::NotFound(Missing::Account(username)),
            LedgerError::Client(ClientError::CircuitOpen {
                destination,
                retry_after,
            }) => SaleError::CircuitOpen {
                destination,
                retry_after,
            },
            other => SaleError::Unavailable {
                destination: LEDGER.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Maps a failed debit.
    pub(crate) fn from_debit(err: LedgerError) -> Self {
        match err {
            LedgerError::AccountNotFound(username) => SaleError::NotFound(Missing::Account(username)),
            LedgerError::Client(ClientError::CircuitOpen {
                destination,
                retry_after,
            }) => SaleError::CircuitOpen {
                destination,
                retry_after,
            },
            LedgerError::Client(ClientError::Timeout { destination, .. }) => {
                SaleError::UpstreamTimeout { destination }
            }
            LedgerError::Client(ClientError::Http {
                destination,
                status,
                body,
            }) => SaleError::UpstreamError {
                destination,
                status: Some(status),
                reason: if body.trim().is_empty() {
                    format!("HTTP {status}")
                } else {
                    body
                },
            },
            LedgerError::Client(
                ClientError::ConnectionRefused {
                    destination,
                    reason,
                }
                | ClientError::Transport {
                    destination,
                    reason,
                },
            ) => SaleError::Unavailable {
                destination,
                reason,
            },
            other => SaleError::UpstreamError {
                destination: LEDGER.to_string(),
                status: None,
                reason: other.to_string(),
            },
        }
    }
}

impl From<InventoryError> for SaleError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::GoodNotFound(id) => SaleError::NotFound(Missing::Good(id)),
            InventoryError::InsufficientStock {
                good_id,
                requested,
                available,
            } => SaleError::InsufficientStock {
                good_id,
                requested,
                available,
            },
            InventoryError::InvalidInput(message) => SaleError::InvalidInput(message),
            InventoryError::Security(SecurityError::KeyNotFound(name)) => {
                SaleError::NotFound(Missing::Key(name))
            }
            InventoryError::Security(SecurityError::Decryption(reason)) => {
                SaleError::DecryptionError(reason.to_string())
            }
            other => SaleError::PersistenceError(other.to_string()),
        }
    }
}

pub(crate) const LEDGER: &str = "ledger";

/// Errors from a [`crate::LedgerClient`].
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    /// The ledger answered 2xx with a body that could not be understood.
    #[error("Invalid ledger response: {0}")]
    InvalidResponse(String),
}

impl LedgerError {
    /// True when a balance change may have been applied even though the call
    /// failed: the request could have reached the ledger but no verdict came
    /// back. A 5xx may come from a proxy in front of a ledger that applied it.
    pub fn outcome_unknown(&self) -> bool {
        match self {
            LedgerError::Client(ClientError::Timeout { .. } | ClientError::Transport { .. })
            | LedgerError::InvalidResponse(_) => true,
            LedgerError::Client(ClientError::Http { status, .. }) => *status >= 500,
            _ => false,
        }
    }
}

/// Result type for sale operations.
pub type Result<T> = std::result::Result<T, SaleError>;
