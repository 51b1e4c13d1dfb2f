use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AttemptId, GoodId, ReviewId};

use crate::Result;
use crate::model::{
    CommittedSale, Good, GoodUpdate, NewAttempt, NewGood, NewReview, NewSale, Review,
    ReviewStatus, Sale, SaleAttempt,
};

/// Goods, stock and committed sales.
///
/// Stock never goes negative: every decrement is a compare-and-decrement
/// that fails with `InsufficientStock` instead of overselling.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Inserts a good and returns it with its assigned id.
    async fn add_good(&self, good: NewGood) -> Result<Good>;

    /// Applies a partial update.
    async fn update_good(&self, id: GoodId, update: GoodUpdate) -> Result<Good>;

    async fn get_good(&self, id: GoodId) -> Result<Option<Good>>;

    /// All goods, ordered by id.
    async fn list_goods(&self) -> Result<Vec<Good>>;

    /// Administrative stock removal. Returns the new stock count.
    async fn deduct_stock(&self, id: GoodId, quantity: u32) -> Result<i64>;

    /// Commits a sale whose debit has been confirmed.
    ///
    /// In one atomic step: decrements stock, inserts the sale and moves the
    /// attempt from `Debited` to `Committed`. On any error nothing changes.
    async fn commit_sale(&self, sale: NewSale, attempt_id: AttemptId) -> Result<CommittedSale>;

    /// Sales made by a user, oldest first.
    async fn sales_for_user(&self, username: &str) -> Result<Vec<Sale>>;

    /// Sales of a good, oldest first.
    async fn sales_for_good(&self, good_id: GoodId) -> Result<Vec<Sale>>;
}

/// Durable record of sale attempts, used to replay, compensate and reconcile.
#[async_trait]
pub trait SaleJournal: Send + Sync {
    /// Records a new attempt in `Pending`.
    async fn begin_attempt(&self, attempt: NewAttempt) -> Result<SaleAttempt>;

    async fn get_attempt(&self, attempt_id: AttemptId) -> Result<Option<SaleAttempt>>;

    /// `Pending` → `Debited`.
    async fn mark_debited(&self, attempt_id: AttemptId) -> Result<SaleAttempt>;

    /// `Pending` → `Failed`.
    async fn mark_failed(&self, attempt_id: AttemptId, detail: &str) -> Result<SaleAttempt>;

    /// `Pending` or `Debited` → `Compensated`.
    async fn mark_compensated(&self, attempt_id: AttemptId, detail: &str)
    -> Result<SaleAttempt>;

    /// Attempts still `Pending` or `Debited` whose last update is at or before
    /// `older_than`, oldest first.
    async fn unsettled_attempts(&self, older_than: DateTime<Utc>) -> Result<Vec<SaleAttempt>>;
}

#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// Inserts a review in `Pending`. Fails with `GoodNotFound` for an unknown good.
    async fn insert_review(&self, review: NewReview) -> Result<Review>;

    /// Reviews of a good, oldest first.
    async fn reviews_for_good(&self, good_id: GoodId) -> Result<Vec<Review>>;

    async fn set_review_status(&self, id: ReviewId, status: ReviewStatus) -> Result<Review>;
}

/// Everything a sales deployment needs from one backend.
pub trait InventoryBackend: InventoryStore + SaleJournal + ReviewStore {}

impl<T> InventoryBackend for T where T: InventoryStore + SaleJournal + ReviewStore {}
