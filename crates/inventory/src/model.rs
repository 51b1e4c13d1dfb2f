//! Inventory data model.

use chrono::{DateTime, Utc};
use common::{AccountId, AttemptId, GoodId, Money, ReviewId, SaleId};
use serde::{Deserialize, Serialize};

use crate::error::{InventoryError, Result};

/// A good as persisted.
///
/// `description` holds the stored form, which is sealed when the catalog
/// runs with an encryption key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Good {
    pub id: GoodId,
    pub name: String,
    pub category: String,
    pub price: Money,
    pub description: Option<String>,
    pub stock_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGood {
    pub name: String,
    pub category: String,
    pub price: Money,
    pub description: Option<String>,
    pub stock_count: i64,
}

impl NewGood {
    pub fn validate(&self) -> Result<()> {
        require_text("name", &self.name)?;
        require_text("category", &self.category)?;
        require_price(self.price)?;
        require_stock(self.stock_count)
    }
}

/// A partial update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodUpdate {
    pub name: Option<String>,
    pub category: Option<String>,
    pub price: Option<Money>,
    pub description: Option<String>,
    pub stock_count: Option<i64>,
}

impl GoodUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.category.is_none()
            && self.price.is_none()
            && self.description.is_none()
            && self.stock_count.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(InventoryError::InvalidInput(
                "update contains no fields".to_string(),
            ));
        }
        if let Some(name) = &self.name {
            require_text("name", name)?;
        }
        if let Some(category) = &self.category {
            require_text("category", category)?;
        }
        if let Some(price) = self.price {
            require_price(price)?;
        }
        if let Some(stock) = self.stock_count {
            require_stock(stock)?;
        }
        Ok(())
    }

    pub(crate) fn apply(self, good: &mut Good) {
        if let Some(name) = self.name {
            good.name = name;
        }
        if let Some(category) = self.category {
            good.category = category;
        }
        if let Some(price) = self.price {
            good.price = price;
        }
        if let Some(description) = self.description {
            good.description = Some(description);
        }
        if let Some(stock) = self.stock_count {
            good.stock_count = stock;
        }
    }
}

/// A committed sale. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    pub id: SaleId,
    pub good_id: GoodId,
    pub username: String,
    pub quantity: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSale {
    pub good_id: GoodId,
    pub username: String,
    pub quantity: u32,
}

/// Result of an atomic sale commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedSale {
    pub sale: Sale,
    pub new_stock_count: i64,
}

/// Lifecycle of a sale attempt in the journal.
///
/// ```text
/// Pending ──debit confirmed──▶ Debited ──commit──▶ Committed
///    │                            │
///    ├──debit refused──▶ Failed   └──reversal──▶ Compensated
///    └──reversal (outcome unknown)──▶ Compensated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptState {
    Pending,
    Debited,
    Committed,
    Compensated,
    Failed,
}

impl AttemptState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptState::Pending => "pending",
            AttemptState::Debited => "debited",
            AttemptState::Committed => "committed",
            AttemptState::Compensated => "compensated",
            AttemptState::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(AttemptState::Pending),
            "debited" => Some(AttemptState::Debited),
            "committed" => Some(AttemptState::Committed),
            "compensated" => Some(AttemptState::Compensated),
            "failed" => Some(AttemptState::Failed),
            _ => None,
        }
    }

    /// True once no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptState::Committed | AttemptState::Compensated | AttemptState::Failed
        )
    }

    pub fn can_transition_to(&self, next: AttemptState) -> bool {
        use AttemptState::*;
        matches!(
            (self, next),
            (Pending, Debited)
                | (Pending, Failed)
                | (Pending, Compensated)
                | (Debited, Committed)
                | (Debited, Compensated)
        )
    }
}

impl std::fmt::Display for AttemptState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One journaled sale attempt, keyed by its ledger idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleAttempt {
    pub attempt_id: AttemptId,
    pub good_id: GoodId,
    pub username: String,
    pub account_id: Option<AccountId>,
    pub quantity: u32,
    pub amount: Money,
    pub state: AttemptState,
    pub sale_id: Option<SaleId>,
    pub new_stock_count: Option<i64>,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SaleAttempt {
    pub(crate) fn transition(
        &mut self,
        next: AttemptState,
        detail: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(InventoryError::InvalidTransition {
                attempt_id: self.attempt_id,
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        if detail.is_some() {
            self.detail = detail;
        }
        self.updated_at = at;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttempt {
    pub attempt_id: AttemptId,
    pub good_id: GoodId,
    pub username: String,
    pub account_id: Option<AccountId>,
    pub quantity: u32,
    pub amount: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Flagged,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Flagged => "flagged",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ReviewStatus::Pending),
            "approved" => Some(ReviewStatus::Approved),
            "flagged" => Some(ReviewStatus::Flagged),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A product review. `comment` is the stored (possibly sealed) form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: ReviewId,
    pub good_id: GoodId,
    pub username: String,
    pub rating: u8,
    pub comment: String,
    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReview {
    pub good_id: GoodId,
    pub username: String,
    pub rating: u8,
    pub comment: String,
}

impl NewReview {
    pub fn validate(&self) -> Result<()> {
        require_text("username", &self.username)?;
        if !(1..=5).contains(&self.rating) {
            return Err(InventoryError::InvalidInput(format!(
                "rating must be between 1 and 5, got {}",
                self.rating
            )));
        }
        Ok(())
    }
}

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(InventoryError::InvalidInput(format!("{field} is required")));
    }
    Ok(())
}

fn require_price(price: Money) -> Result<()> {
    if !price.is_positive() {
        return Err(InventoryError::InvalidInput(format!(
            "price must be positive, got {price}"
        )));
    }
    Ok(())
}

fn require_stock(stock: i64) -> Result<()> {
    if stock < 0 {
        return Err(InventoryError::InvalidInput(format!(
            "stock count cannot be negative, got {stock}"
        )));
    }
    Ok(())
}
