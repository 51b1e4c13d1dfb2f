use common::{AttemptId, GoodId, ReviewId};
use security::SecurityError;
use thiserror::Error;

use crate::model::AttemptState;

/// Errors raised by inventory stores and their facades.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("Good not found: {0}")]
    GoodNotFound(GoodId),

    #[error("Review not found: {0}")]
    ReviewNotFound(ReviewId),

    #[error("Sale attempt not found: {0}")]
    AttemptNotFound(AttemptId),

    /// An attempt with this idempotency key was already journaled.
    #[error("Sale attempt already exists: {0}")]
    DuplicateAttempt(AttemptId),

    /// The journal refused a state change that is not an allowed transition.
    #[error("Sale attempt {attempt_id} cannot move from {from} to {to}")]
    InvalidTransition {
        attempt_id: AttemptId,
        from: AttemptState,
        to: AttemptState,
    },

    #[error("Insufficient stock for good {good_id}: requested {requested}, available {available}")]
    InsufficientStock {
        good_id: GoodId,
        requested: u32,
        available: i64,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row could not be mapped back into the model.
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Security error: {0}")]
    Security(#[from] SecurityError),
}

/// Result type for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;
