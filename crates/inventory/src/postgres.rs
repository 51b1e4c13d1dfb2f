use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AccountId, AttemptId, GoodId, Money, ReviewId, SaleId};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::model::{
    AttemptState, CommittedSale, Good, GoodUpdate, NewAttempt, NewGood, NewReview, NewSale,
    Review, ReviewStatus, Sale, SaleAttempt,
};
use crate::store::{InventoryStore, ReviewStore, SaleJournal};
use crate::{InventoryError, Result};

const GOOD_COLUMNS: &str = "id, name, category, price_cents, description, stock_count";
const SALE_COLUMNS: &str = "id, good_id, username, quantity, timestamp";
const ATTEMPT_COLUMNS: &str = "attempt_id, good_id, username, account_id, quantity, amount_cents, \
     state, sale_id, new_stock_count, detail, created_at, updated_at";
const REVIEW_COLUMNS: &str = "id, good_id, username, rating, comment, status, created_at";

/// PostgreSQL-backed inventory, journal and review store.
#[derive(Clone)]
pub struct PostgresInventoryStore {
    pool: PgPool,
}

impl PostgresInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_good(row: PgRow) -> Result<Good> {
        Ok(Good {
            id: GoodId::new(row.try_get("id")?),
            name: row.try_get("name")?,
            category: row.try_get("category")?,
            price: Money::from_cents(row.try_get("price_cents")?),
            description: row.try_get("description")?,
            stock_count: row.try_get("stock_count")?,
        })
    }

    fn row_to_sale(row: PgRow) -> Result<Sale> {
        Ok(Sale {
            id: SaleId::new(row.try_get("id")?),
            good_id: GoodId::new(row.try_get("good_id")?),
            username: row.try_get("username")?,
            quantity: quantity_from_row(row.try_get("quantity")?)?,
            timestamp: row.try_get("timestamp")?,
        })
    }

    fn row_to_attempt(row: PgRow) -> Result<SaleAttempt> {
        let state: String = row.try_get("state")?;
        let state = AttemptState::parse(&state).ok_or_else(|| {
            InventoryError::Serialization(format!("unknown attempt state '{state}'"))
        })?;

        Ok(SaleAttempt {
            attempt_id: AttemptId::from_uuid(row.try_get::<Uuid, _>("attempt_id")?),
            good_id: GoodId::new(row.try_get("good_id")?),
            username: row.try_get("username")?,
            account_id: row.try_get::<Option<i64>, _>("account_id")?.map(AccountId::new),
            quantity: quantity_from_row(row.try_get("quantity")?)?,
            amount: Money::from_cents(row.try_get("amount_cents")?),
            state,
            sale_id: row.try_get::<Option<i64>, _>("sale_id")?.map(SaleId::new),
            new_stock_count: row.try_get("new_stock_count")?,
            detail: row.try_get("detail")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_review(row: PgRow) -> Result<Review> {
        let status: String = row.try_get("status")?;
        let status = ReviewStatus::parse(&status).ok_or_else(|| {
            InventoryError::Serialization(format!("unknown review status '{status}'"))
        })?;
        let rating: i16 = row.try_get("rating")?;

        Ok(Review {
            id: ReviewId::new(row.try_get("id")?),
            good_id: GoodId::new(row.try_get("good_id")?),
            username: row.try_get("username")?,
            rating: u8::try_from(rating)
                .map_err(|_| InventoryError::Serialization(format!("bad rating {rating}")))?,
            comment: row.try_get("comment")?,
            status,
            created_at: row.try_get("created_at")?,
        })
    }

    /// Compare-and-decrement inside `tx`. Returns the new stock count.
    async fn decrement_in(
        tx: &mut Transaction<'_, Postgres>,
        id: GoodId,
        quantity: u32,
    ) -> Result<i64> {
        if quantity == 0 {
            return Err(InventoryError::InvalidInput(
                "quantity must be positive".to_string(),
            ));
        }
        let requested = i64::from(quantity);

        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE goods SET stock_count = stock_count - $1
            WHERE id = $2 AND stock_count >= $1
            RETURNING stock_count
            "#,
        )
        .bind(requested)
        .bind(id.as_i64())
        .fetch_optional(&mut **tx)
        .await?;

        if let Some(remaining) = remaining {
            return Ok(remaining);
        }

        // Nothing updated: tell a missing good apart from a short one.
        let available: Option<i64> =
            sqlx::query_scalar("SELECT stock_count FROM goods WHERE id = $1")
                .bind(id.as_i64())
                .fetch_optional(&mut **tx)
                .await?;

        match available {
            Some(available) => Err(InventoryError::InsufficientStock {
                good_id: id,
                requested: quantity,
                available,
            }),
            None => Err(InventoryError::GoodNotFound(id)),
        }
    }

    async fn transition(
        &self,
        attempt_id: AttemptId,
        next: AttemptState,
        detail: Option<&str>,
    ) -> Result<SaleAttempt> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM sale_attempts WHERE attempt_id = $1 FOR UPDATE"
        ))
        .bind(attempt_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(InventoryError::AttemptNotFound(attempt_id))?;
        let current = Self::row_to_attempt(row)?;

        if !current.state.can_transition_to(next) {
            return Err(InventoryError::InvalidTransition {
                attempt_id,
                from: current.state,
                to: next,
            });
        }

        let row = sqlx::query(&format!(
            r#"
            UPDATE sale_attempts
            SET state = $2, detail = COALESCE($3, detail), updated_at = NOW()
            WHERE attempt_id = $1
            RETURNING {ATTEMPT_COLUMNS}
            "#
        ))
        .bind(attempt_id.as_uuid())
        .bind(next.as_str())
        .bind(detail)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Self::row_to_attempt(row)
    }
}

fn quantity_from_row(value: i64) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| InventoryError::Serialization(format!("bad quantity {value}")))
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation())
}

#[async_trait]
impl InventoryStore for PostgresInventoryStore {
    async fn add_good(&self, good: NewGood) -> Result<Good> {
        good.validate()?;
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO goods (name, category, price_cents, description, stock_count)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {GOOD_COLUMNS}
            "#
        ))
        .bind(&good.name)
        .bind(&good.category)
        .bind(good.price.cents())
        .bind(&good.description)
        .bind(good.stock_count)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_good(row)
    }

    async fn update_good(&self, id: GoodId, update: GoodUpdate) -> Result<Good> {
        update.validate()?;
        let row = sqlx::query(&format!(
            r#"
            UPDATE goods SET
                name = COALESCE($2, name),
                category = COALESCE($3, category),
                price_cents = COALESCE($4, price_cents),
                description = COALESCE($5, description),
                stock_count = COALESCE($6, stock_count)
            WHERE id = $1
            RETURNING {GOOD_COLUMNS}
            "#
        ))
        .bind(id.as_i64())
        .bind(&update.name)
        .bind(&update.category)
        .bind(update.price.map(|p| p.cents()))
        .bind(&update.description)
        .bind(update.stock_count)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(InventoryError::GoodNotFound(id))?;

        Self::row_to_good(row)
    }

    async fn get_good(&self, id: GoodId) -> Result<Option<Good>> {
        let row = sqlx::query(&format!("SELECT {GOOD_COLUMNS} FROM goods WHERE id = $1"))
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_good).transpose()
    }

    async fn list_goods(&self) -> Result<Vec<Good>> {
        let rows = sqlx::query(&format!("SELECT {GOOD_COLUMNS} FROM goods ORDER BY id ASC"))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_good).collect()
    }

    async fn deduct_stock(&self, id: GoodId, quantity: u32) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let remaining = Self::decrement_in(&mut tx, id, quantity).await?;
        tx.commit().await?;
        Ok(remaining)
    }

    #[tracing::instrument(skip(self, sale), fields(good_id = %sale.good_id, quantity = sale.quantity))]
    async fn commit_sale(&self, sale: NewSale, attempt_id: AttemptId) -> Result<CommittedSale> {
        let mut tx = self.pool.begin().await?;

        let state: Option<String> = sqlx::query_scalar(
            "SELECT state FROM sale_attempts WHERE attempt_id = $1 FOR UPDATE",
        )
        .bind(attempt_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;
        let state = state.ok_or(InventoryError::AttemptNotFound(attempt_id))?;
        let state = AttemptState::parse(&state).ok_or_else(|| {
            InventoryError::Serialization(format!("unknown attempt state '{state}'"))
        })?;
        if !state.can_transition_to(AttemptState::Committed) {
            return Err(InventoryError::InvalidTransition {
                attempt_id,
                from: state,
                to: AttemptState::Committed,
            });
        }

        let new_stock_count = Self::decrement_in(&mut tx, sale.good_id, sale.quantity).await?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO sales (good_id, username, quantity)
            VALUES ($1, $2, $3)
            RETURNING {SALE_COLUMNS}
            "#
        ))
        .bind(sale.good_id.as_i64())
        .bind(&sale.username)
        .bind(i64::from(sale.quantity))
        .fetch_one(&mut *tx)
        .await?;
        let committed = Self::row_to_sale(row)?;

        sqlx::query(
            r#"
            UPDATE sale_attempts
            SET state = $2, sale_id = $3, new_stock_count = $4, updated_at = NOW()
            WHERE attempt_id = $1
            "#,
        )
        .bind(attempt_id.as_uuid())
        .bind(AttemptState::Committed.as_str())
        .bind(committed.id.as_i64())
        .bind(new_stock_count)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(CommittedSale {
            sale: committed,
            new_stock_count,
        })
    }

    async fn sales_for_user(&self, username: &str) -> Result<Vec<Sale>> {
        let rows = sqlx::query(&format!(
            "SELECT {SALE_COLUMNS} FROM sales WHERE username = $1 ORDER BY id ASC"
        ))
        .bind(username)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_sale).collect()
    }

    async fn sales_for_good(&self, good_id: GoodId) -> Result<Vec<Sale>> {
        let rows = sqlx::query(&format!(
            "SELECT {SALE_COLUMNS} FROM sales WHERE good_id = $1 ORDER BY id ASC"
        ))
        .bind(good_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_sale).collect()
    }
}

#[async_trait]
impl SaleJournal for PostgresInventoryStore {
    async fn begin_attempt(&self, attempt: NewAttempt) -> Result<SaleAttempt> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO sale_attempts
                (attempt_id, good_id, username, account_id, quantity, amount_cents, state)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (attempt_id) DO NOTHING
            RETURNING {ATTEMPT_COLUMNS}
            "#
        ))
        .bind(attempt.attempt_id.as_uuid())
        .bind(attempt.good_id.as_i64())
        .bind(&attempt.username)
        .bind(attempt.account_id.map(|a| a.as_i64()))
        .bind(i64::from(attempt.quantity))
        .bind(attempt.amount.cents())
        .bind(AttemptState::Pending.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(InventoryError::DuplicateAttempt(attempt.attempt_id))?;

        Self::row_to_attempt(row)
    }

    async fn get_attempt(&self, attempt_id: AttemptId) -> Result<Option<SaleAttempt>> {
        let row = sqlx::query(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM sale_attempts WHERE attempt_id = $1"
        ))
        .bind(attempt_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_attempt).transpose()
    }

    async fn mark_debited(&self, attempt_id: AttemptId) -> Result<SaleAttempt> {
        self.transition(attempt_id, AttemptState::Debited, None).await
    }

    async fn mark_failed(&self, attempt_id: AttemptId, detail: &str) -> Result<SaleAttempt> {
        self.transition(attempt_id, AttemptState::Failed, Some(detail))
            .await
    }

    async fn mark_compensated(
        &self,
        attempt_id: AttemptId,
        detail: &str,
    ) -> Result<SaleAttempt> {
        self.transition(attempt_id, AttemptState::Compensated, Some(detail))
            .await
    }

    async fn unsettled_attempts(&self, older_than: DateTime<Utc>) -> Result<Vec<SaleAttempt>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ATTEMPT_COLUMNS} FROM sale_attempts
            WHERE state IN ('pending', 'debited') AND updated_at <= $1
            ORDER BY updated_at ASC
            "#
        ))
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_attempt).collect()
    }
}

#[async_trait]
impl ReviewStore for PostgresInventoryStore {
    async fn insert_review(&self, review: NewReview) -> Result<Review> {
        review.validate()?;
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO reviews (good_id, username, rating, comment, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {REVIEW_COLUMNS}
            "#
        ))
        .bind(review.good_id.as_i64())
        .bind(&review.username)
        .bind(i16::from(review.rating))
        .bind(&review.comment)
        .bind(ReviewStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                InventoryError::GoodNotFound(review.good_id)
            } else {
                InventoryError::Database(e)
            }
        })?;

        Self::row_to_review(row)
    }

    async fn reviews_for_good(&self, good_id: GoodId) -> Result<Vec<Review>> {
        let rows = sqlx::query(&format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews WHERE good_id = $1 ORDER BY id ASC"
        ))
        .bind(good_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_review).collect()
    }

    async fn set_review_status(&self, id: ReviewId, status: ReviewStatus) -> Result<Review> {
        let row = sqlx::query(&format!(
            "UPDATE reviews SET status = $2 WHERE id = $1 RETURNING {REVIEW_COLUMNS}"
        ))
        .bind(id.as_i64())
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(InventoryError::ReviewNotFound(id))?;

        Self::row_to_review(row)
    }
}
