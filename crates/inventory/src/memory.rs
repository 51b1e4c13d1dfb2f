//! In-memory inventory store, journal and review storage.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AttemptId, GoodId, ReviewId, SaleId};
use tokio::sync::RwLock;

use crate::model::{
    AttemptState, CommittedSale, Good, GoodUpdate, NewAttempt, NewGood, NewReview, NewSale,
    Review, ReviewStatus, Sale, SaleAttempt,
};
use crate::store::{InventoryStore, ReviewStore, SaleJournal};
use crate::{InventoryError, Result};

#[derive(Default)]
struct State {
    goods: BTreeMap<GoodId, Good>,
    sales: Vec<Sale>,
    reviews: BTreeMap<ReviewId, Review>,
    attempts: HashMap<AttemptId, SaleAttempt>,
    next_good: i64,
    next_sale: i64,
    next_review: i64,
}

impl State {
    fn good_mut(&mut self, id: GoodId) -> Result<&mut Good> {
        self.goods.get_mut(&id).ok_or(InventoryError::GoodNotFound(id))
    }

    fn attempt_mut(&mut self, id: AttemptId) -> Result<&mut SaleAttempt> {
        self.attempts
            .get_mut(&id)
            .ok_or(InventoryError::AttemptNotFound(id))
    }
}

/// In-memory inventory for tests and database-less deployments.
///
/// All collections sit behind one lock, so `commit_sale` is atomic with
/// respect to every other operation.
#[derive(Clone, Default)]
pub struct InMemoryInventoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed sales.
    pub async fn sale_count(&self) -> usize {
        self.state.read().await.sales.len()
    }

    /// Rewinds an attempt's `updated_at`, for exercising reconciliation.
    pub async fn backdate_attempt(&self, attempt_id: AttemptId, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        state.attempt_mut(attempt_id)?.updated_at = at;
        Ok(())
    }
}

fn decrement(good: &mut Good, quantity: u32) -> Result<i64> {
    if quantity == 0 {
        return Err(InventoryError::InvalidInput(
            "quantity must be positive".to_string(),
        ));
    }
    let requested = i64::from(quantity);
    if good.stock_count < requested {
        return Err(InventoryError::InsufficientStock {
            good_id: good.id,
            requested: quantity,
            available: good.stock_count,
        });
    }
    good.stock_count -= requested;
    Ok(good.stock_count)
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn add_good(&self, good: NewGood) -> Result<Good> {
        good.validate()?;
        let mut state = self.state.write().await;
        state.next_good += 1;
        let stored = Good {
            id: GoodId::new(state.next_good),
            name: good.name,
            category: good.category,
            price: good.price,
            description: good.description,
            stock_count: good.stock_count,
        };
        state.goods.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update_good(&self, id: GoodId, update: GoodUpdate) -> Result<Good> {
        update.validate()?;
        let mut state = self.state.write().await;
        let good = state.good_mut(id)?;
        update.apply(good);
        Ok(good.clone())
    }

    async fn get_good(&self, id: GoodId) -> Result<Option<Good>> {
        Ok(self.state.read().await.goods.get(&id).cloned())
    }

    async fn list_goods(&self) -> Result<Vec<Good>> {
        Ok(self.state.read().await.goods.values().cloned().collect())
    }

    async fn deduct_stock(&self, id: GoodId, quantity: u32) -> Result<i64> {
        let mut state = self.state.write().await;
        decrement(state.good_mut(id)?, quantity)
    }

    async fn commit_sale(&self, sale: NewSale, attempt_id: AttemptId) -> Result<CommittedSale> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let attempt = state
            .attempts
            .get(&attempt_id)
            .ok_or(InventoryError::AttemptNotFound(attempt_id))?;
        if !attempt.state.can_transition_to(AttemptState::Committed) {
            return Err(InventoryError::InvalidTransition {
                attempt_id,
                from: attempt.state,
                to: AttemptState::Committed,
            });
        }

        let new_stock_count = decrement(state.good_mut(sale.good_id)?, sale.quantity)?;

        state.next_sale += 1;
        let now = Utc::now();
        let committed = Sale {
            id: SaleId::new(state.next_sale),
            good_id: sale.good_id,
            username: sale.username,
            quantity: sale.quantity,
            timestamp: now,
        };
        state.sales.push(committed.clone());

        let attempt = state.attempt_mut(attempt_id)?;
        attempt.transition(AttemptState::Committed, None, now)?;
        attempt.sale_id = Some(committed.id);
        attempt.new_stock_count = Some(new_stock_count);

        Ok(CommittedSale {
            sale: committed,
            new_stock_count,
        })
    }

    async fn sales_for_user(&self, username: &str) -> Result<Vec<Sale>> {
        let state = self.state.read().await;
        Ok(state
            .sales
            .iter()
            .filter(|s| s.username == username)
            .cloned()
            .collect())
    }

    async fn sales_for_good(&self, good_id: GoodId) -> Result<Vec<Sale>> {
        let state = self.state.read().await;
        Ok(state
            .sales
            .iter()
            .filter(|s| s.good_id == good_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SaleJournal for InMemoryInventoryStore {
    async fn begin_attempt(&self, attempt: NewAttempt) -> Result<SaleAttempt> {
        let mut state = self.state.write().await;
        if state.attempts.contains_key(&attempt.attempt_id) {
            return Err(InventoryError::DuplicateAttempt(attempt.attempt_id));
        }
        let now = Utc::now();
        let record = SaleAttempt {
            attempt_id: attempt.attempt_id,
            good_id: attempt.good_id,
            username: attempt.username,
            account_id: attempt.account_id,
            quantity: attempt.quantity,
            amount: attempt.amount,
            state: AttemptState::Pending,
            sale_id: None,
            new_stock_count: None,
            detail: None,
            created_at: now,
            updated_at: now,
        };
        state.attempts.insert(record.attempt_id, record.clone());
        Ok(record)
    }

    async fn get_attempt(&self, attempt_id: AttemptId) -> Result<Option<SaleAttempt>> {
        Ok(self.state.read().await.attempts.get(&attempt_id).cloned())
    }

    async fn mark_debited(&self, attempt_id: AttemptId) -> Result<SaleAttempt> {
        let mut state = self.state.write().await;
        let attempt = state.attempt_mut(attempt_id)?;
        attempt.transition(AttemptState::Debited, None, Utc::now())?;
        Ok(attempt.clone())
    }

    async fn mark_failed(&self, attempt_id: AttemptId, detail: &str) -> Result<SaleAttempt> {
        let mut state = self.state.write().await;
        let attempt = state.attempt_mut(attempt_id)?;
        attempt.transition(AttemptState::Failed, Some(detail.to_string()), Utc::now())?;
        Ok(attempt.clone())
    }

    async fn mark_compensated(
        &self,
        attempt_id: AttemptId,
        detail: &str,
    ) -> Result<SaleAttempt> {
        let mut state = self.state.write().await;
        let attempt = state.attempt_mut(attempt_id)?;
        attempt.transition(AttemptState::Compensated, Some(detail.to_string()), Utc::now())?;
        Ok(attempt.clone())
    }

    async fn unsettled_attempts(&self, older_than: DateTime<Utc>) -> Result<Vec<SaleAttempt>> {
        let state = self.state.read().await;
        let mut unsettled: Vec<SaleAttempt> = state
            .attempts
            .values()
            .filter(|a| !a.state.is_terminal() && a.updated_at <= older_than)
            .cloned()
            .collect();
        unsettled.sort_by_key(|a| a.updated_at);
        Ok(unsettled)
    }
}

#[async_trait]
impl ReviewStore for InMemoryInventoryStore {
    async fn insert_review(&self, review: NewReview) -> Result<Review> {
        review.validate()?;
        let mut state = self.state.write().await;
        if !state.goods.contains_key(&review.good_id) {
            return Err(InventoryError::GoodNotFound(review.good_id));
        }
        state.next_review += 1;
        let stored = Review {
            id: ReviewId::new(state.next_review),
            good_id: review.good_id,
            username: review.username,
            rating: review.rating,
            comment: review.comment,
            status: ReviewStatus::Pending,
            created_at: Utc::now(),
        };
        state.reviews.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn reviews_for_good(&self, good_id: GoodId) -> Result<Vec<Review>> {
        let state = self.state.read().await;
        Ok(state
            .reviews
            .values()
            .filter(|r| r.good_id == good_id)
            .cloned()
            .collect())
    }

    async fn set_review_status(&self, id: ReviewId, status: ReviewStatus) -> Result<Review> {
        let mut state = self.state.write().await;
        let review = state
            .reviews
            .get_mut(&id)
            .ok_or(InventoryError::ReviewNotFound(id))?;
        review.status = status;
        Ok(review.clone())
    }
}

#[cfg(test)]
mod tests {
    use common::Money;

    use super::*;

    fn widget(stock: i64) -> NewGood {
        NewGood {
            name: "Widget".to_string(),
            category: "tools".to_string(),
            price: Money::from_dollars(5),
            description: None,
            stock_count: stock,
        }
    }

    fn attempt_for(good_id: GoodId, quantity: u32) -> NewAttempt {
        NewAttempt {
            attempt_id: AttemptId::new(),
            good_id,
            username: "alice".to_string(),
            account_id: None,
            quantity,
            amount: Money::from_dollars(5 * i64::from(quantity)),
        }
    }

    fn sale_for(good_id: GoodId, quantity: u32) -> NewSale {
        NewSale {
            good_id,
            username: "alice".to_string(),
            quantity,
        }
    }

    #[tokio::test]
    async fn test_add_and_get_good() {
        let store = InMemoryInventoryStore::new();
        let good = store.add_good(widget(10)).await.unwrap();
        assert_eq!(good.id, GoodId::new(1));

        let loaded = store.get_good(good.id).await.unwrap().unwrap();
        assert_eq!(loaded, good);
        assert!(store.get_good(GoodId::new(99)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_unknown_good() {
        let store = InMemoryInventoryStore::new();
        let update = GoodUpdate {
            name: Some("x".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            store.update_good(GoodId::new(5), update).await,
            Err(InventoryError::GoodNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_deduct_stock_never_goes_negative() {
        let store = InMemoryInventoryStore::new();
        let good = store.add_good(widget(3)).await.unwrap();

        assert_eq!(store.deduct_stock(good.id, 2).await.unwrap(), 1);
        let err = store.deduct_stock(good.id, 2).await.unwrap_err();
        assert!(matches!(
            err,
            InventoryError::InsufficientStock { available: 1, requested: 2, .. }
        ));
        assert_eq!(store.get_good(good.id).await.unwrap().unwrap().stock_count, 1);
    }

    #[tokio::test]
    async fn test_commit_requires_debited_attempt() {
        let store = InMemoryInventoryStore::new();
        let good = store.add_good(widget(10)).await.unwrap();
        let attempt = store.begin_attempt(attempt_for(good.id, 2)).await.unwrap();

        let err = store
            .commit_sale(sale_for(good.id, 2), attempt.attempt_id)
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::InvalidTransition { .. }));
        assert_eq!(store.get_good(good.id).await.unwrap().unwrap().stock_count, 10);
        assert_eq!(store.sale_count().await, 0);
    }

    #[tokio::test]
    async fn test_commit_decrements_records_and_settles() {
        let store = InMemoryInventoryStore::new();
        let good = store.add_good(widget(10)).await.unwrap();
        let attempt = store.begin_attempt(attempt_for(good.id, 2)).await.unwrap();
        store.mark_debited(attempt.attempt_id).await.unwrap();

        let committed = store
            .commit_sale(sale_for(good.id, 2), attempt.attempt_id)
            .await
            .unwrap();

        assert_eq!(committed.new_stock_count, 8);
        assert_eq!(store.sales_for_user("alice").await.unwrap().len(), 1);
        assert_eq!(store.sales_for_good(good.id).await.unwrap().len(), 1);

        let settled = store.get_attempt(attempt.attempt_id).await.unwrap().unwrap();
        assert_eq!(settled.state, AttemptState::Committed);
        assert_eq!(settled.sale_id, Some(committed.sale.id));
        assert_eq!(settled.new_stock_count, Some(8));
    }

    #[tokio::test]
    async fn test_failed_commit_changes_nothing() {
        let store = InMemoryInventoryStore::new();
        let good = store.add_good(widget(1)).await.unwrap();
        let attempt = store.begin_attempt(attempt_for(good.id, 2)).await.unwrap();
        store.mark_debited(attempt.attempt_id).await.unwrap();

        let err = store
            .commit_sale(sale_for(good.id, 2), attempt.attempt_id)
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::InsufficientStock { .. }));

        let attempt = store.get_attempt(attempt.attempt_id).await.unwrap().unwrap();
        assert_eq!(attempt.state, AttemptState::Debited);
        assert_eq!(store.sale_count().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_attempt_is_rejected() {
        let store = InMemoryInventoryStore::new();
        let attempt = attempt_for(GoodId::new(1), 1);
        store.begin_attempt(attempt.clone()).await.unwrap();
        assert!(matches!(
            store.begin_attempt(attempt).await,
            Err(InventoryError::DuplicateAttempt(_))
        ));
    }

    #[tokio::test]
    async fn test_unsettled_attempts_respects_cutoff_and_state() {
        let store = InMemoryInventoryStore::new();
        let old = Utc::now() - chrono::Duration::minutes(10);

        let pending = store.begin_attempt(attempt_for(GoodId::new(1), 1)).await.unwrap();
        store.backdate_attempt(pending.attempt_id, old).await.unwrap();

        let failed = store.begin_attempt(attempt_for(GoodId::new(1), 1)).await.unwrap();
        store.mark_failed(failed.attempt_id, "declined").await.unwrap();
        store.backdate_attempt(failed.attempt_id, old).await.unwrap();

        let fresh = store.begin_attempt(attempt_for(GoodId::new(1), 1)).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::minutes(1);
        let unsettled = store.unsettled_attempts(cutoff).await.unwrap();
        assert_eq!(unsettled.len(), 1);
        assert_eq!(unsettled[0].attempt_id, pending.attempt_id);
        assert_ne!(unsettled[0].attempt_id, fresh.attempt_id);
    }

    #[tokio::test]
    async fn test_reviews_require_existing_good() {
        let store = InMemoryInventoryStore::new();
        let review = NewReview {
            good_id: GoodId::new(42),
            username: "bob".to_string(),
            rating: 4,
            comment: "solid".to_string(),
        };
        assert!(matches!(
            store.insert_review(review).await,
            Err(InventoryError::GoodNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_deductions_never_oversell() {
        let store = InMemoryInventoryStore::new();
        let good = store.add_good(widget(10)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..25 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.deduct_stock(good.id, 1).await }));
        }

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }
        assert_eq!(succeeded, 10);
        assert_eq!(store.get_good(good.id).await.unwrap().unwrap().stock_count, 0);
    }
}
