//! Product reviews with sealed comments.

use std::sync::Arc;

use common::{GoodId, ReviewId};
use security::EncryptionGateway;
use serde::Serialize;

use crate::model::{NewReview, Review, ReviewStatus};
use crate::store::ReviewStore;
use crate::{InventoryError, Result};

/// A review with its comment opened. `review.comment` is cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewView {
    pub review: Review,
    pub comment: Option<String>,
    pub unreadable: bool,
}

pub struct ReviewBoard<S: ?Sized> {
    store: Arc<S>,
    gateway: EncryptionGateway,
}

impl<S: ?Sized> Clone for ReviewBoard<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            gateway: self.gateway.clone(),
        }
    }
}

impl<S> ReviewBoard<S>
where
    S: ReviewStore + ?Sized,
{
    pub fn new(store: Arc<S>, gateway: EncryptionGateway) -> Self {
        Self { store, gateway }
    }

    #[tracing::instrument(skip(self, comment))]
    pub async fn submit(
        &self,
        good_id: GoodId,
        username: &str,
        rating: u8,
        comment: &str,
    ) -> Result<ReviewView> {
        let review = NewReview {
            good_id,
            username: username.to_string(),
            rating,
            comment: self.gateway.encrypt(comment)?,
        };
        review.validate()?;
        let stored = self.store.insert_review(review).await?;
        metrics::counter!("reviews_submitted_total").increment(1);
        Ok(self.view(stored))
    }

    pub async fn reviews_for_good(&self, good_id: GoodId) -> Result<Vec<ReviewView>> {
        let reviews = self.store.reviews_for_good(good_id).await?;
        Ok(reviews.into_iter().map(|r| self.view(r)).collect())
    }

    /// Approves or flags a review.
    #[tracing::instrument(skip(self))]
    pub async fn moderate(&self, id: ReviewId, status: ReviewStatus) -> Result<ReviewView> {
        if status == ReviewStatus::Pending {
            return Err(InventoryError::InvalidInput(
                "moderation must approve or flag".to_string(),
            ));
        }
        let review = self.store.set_review_status(id, status).await?;
        Ok(self.view(review))
    }

    fn view(&self, mut review: Review) -> ReviewView {
        let sealed = std::mem::take(&mut review.comment);
        match self.gateway.decrypt(&sealed) {
            Ok(comment) => ReviewView {
                review,
                comment: Some(comment),
                unreadable: false,
            },
            Err(err) => {
                tracing::warn!(review_id = %review.id, error = %err, "review comment unreadable");
                ReviewView {
                    review,
                    comment: None,
                    unreadable: true,
                }
            }
        }
    }
}
