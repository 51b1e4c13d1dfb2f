//! Shared types for the sales services.

pub mod ids;
pub mod money;

pub use ids::{AccountId, AttemptId, GoodId, ReviewId, SaleId};
pub use money::Money;
