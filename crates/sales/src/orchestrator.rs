//! The sale saga: check stock, read balance, debit, commit, compensate.

use std::sync::Arc;
use std::time::Instant;

use audit::{AuditSink, AuditStatus};
use common::{AccountId, AttemptId, GoodId, Money, SaleId};
use dashmap::DashMap;
use inventory::{
    AttemptState, Catalog, GoodView, InventoryStore, NewAttempt, NewSale, Sale, SaleAttempt,
    SaleJournal,
};
use security::EncryptionGateway;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::Instrument;

use crate::error::{Missing, Result, SaleError};
use crate::ledger::LedgerClient;

/// Audit operation name for purchases.
const PURCHASE: &str = "purchase";

/// A request to buy `quantity` units of a good.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRequest {
    pub username: String,
    pub good_id: GoodId,
    pub quantity: u32,
    /// Reuse to retry a sale safely; a fresh one is minted when absent.
    #[serde(default)]
    pub attempt_id: Option<AttemptId>,
}

impl SaleRequest {
    pub fn new(username: impl Into<String>, good_id: GoodId, quantity: u32) -> Self {
        Self {
            username: username.into(),
            good_id,
            quantity,
            attempt_id: None,
        }
    }

    pub fn with_attempt(mut self, attempt_id: AttemptId) -> Self {
        self.attempt_id = Some(attempt_id);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.quantity == 0 {
            return Err(SaleError::InvalidInput(
                "quantity must be positive".to_string(),
            ));
        }
        if self.username.trim().is_empty() {
            return Err(SaleError::InvalidInput("username is required".to_string()));
        }
        if !self.good_id.is_valid() {
            return Err(SaleError::InvalidInput(format!(
                "invalid good id {}",
                self.good_id
            )));
        }
        Ok(())
    }
}

/// Proof of a committed sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleReceipt {
    pub sale_id: SaleId,
    pub attempt_id: AttemptId,
    pub good_id: GoodId,
    pub new_stock_count: i64,
    pub total: Money,
}

/// Name and price of a good, as listed to customers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodSummary {
    pub id: GoodId,
    pub name: String,
    pub price: Money,
}

/// Everything the debit-and-commit phase needs once the checks have passed.
struct Settlement {
    attempt_id: AttemptId,
    account_id: AccountId,
    total: Money,
    sale: NewSale,
}

/// Runs sales against local inventory and the remote ledger.
///
/// A sale is a saga: the debit is journaled under an idempotency key before
/// it is sent, and undone with a keyed reversal if the local commit fails.
pub struct SaleOrchestrator<S: ?Sized, L: ?Sized> {
    store: Arc<S>,
    ledger: Arc<L>,
    catalog: Catalog<S>,
    audit: AuditSink,
    locks: Arc<DashMap<GoodId, Arc<Mutex<()>>>>,
}

impl<S: ?Sized, L: ?Sized> Clone for SaleOrchestrator<S, L> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            ledger: Arc::clone(&self.ledger),
            catalog: self.catalog.clone(),
            audit: self.audit.clone(),
            locks: Arc::clone(&self.locks),
        }
    }
}

impl<S, L> SaleOrchestrator<S, L>
where
    S: InventoryStore + SaleJournal + ?Sized + 'static,
    L: LedgerClient + ?Sized + 'static,
{
    pub fn new(
        store: Arc<S>,
        ledger: Arc<L>,
        gateway: EncryptionGateway,
        audit: AuditSink,
    ) -> Self {
        Self {
            catalog: Catalog::new(Arc::clone(&store), gateway),
            store,
            ledger,
            audit,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Executes a sale.
    ///
    /// Stock and funds are checked before any money moves. The debit and the
    /// local commit run in a spawned task, so abandoning the returned future
    /// never strands a confirmed debit without its commit or reversal.
    #[tracing::instrument(
        skip(self, request),
        fields(
            username = %request.username,
            good_id = %request.good_id,
            quantity = request.quantity,
            attempt_id = tracing::field::Empty,
        )
    )]
    pub async fn execute_sale(&self, request: SaleRequest) -> Result<SaleReceipt> {
        let started = Instant::now();
        let result = self.run_sale(&request).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(err) => err.kind(),
        };
        metrics::counter!("sales_executed_total", "outcome" => outcome).increment(1);
        metrics::histogram!("sale_duration_seconds").record(started.elapsed().as_secs_f64());

        match &result {
            Ok(receipt) => {
                tracing::info!(
                    sale_id = %receipt.sale_id,
                    new_stock_count = receipt.new_stock_count,
                    total = %receipt.total,
                    "sale completed"
                );
                let details = format!(
                    "good {} x{} for {}",
                    receipt.good_id, request.quantity, receipt.total
                );
                self.audit.log(
                    PURCHASE,
                    AuditStatus::Success,
                    Some(&request.username),
                    Some(&details),
                );
            }
            Err(err) => {
                tracing::info!(error = %err, "sale rejected");
                let details = err.to_string();
                self.audit.log(
                    PURCHASE,
                    AuditStatus::Error,
                    Some(&request.username),
                    Some(&details),
                );
            }
        }

        result
    }

    async fn run_sale(&self, request: &SaleRequest) -> Result<SaleReceipt> {
        request.validate()?;

        let guard = self.lock_good(request.good_id).await;

        let attempt_id = match request.attempt_id {
            Some(attempt_id) => {
                if let Some(existing) = self.store.get_attempt(attempt_id).await? {
                    return replay(request, existing);
                }
                attempt_id
            }
            None => AttemptId::new(),
        };
        tracing::Span::current().record("attempt_id", tracing::field::display(attempt_id));

        let good = self
            .store
            .get_good(request.good_id)
            .await?
            .ok_or(SaleError::NotFound(Missing::Good(request.good_id)))?;

        if good.stock_count < i64::from(request.quantity) {
            return Err(SaleError::InsufficientStock {
                good_id: good.id,
                requested: request.quantity,
                available: good.stock_count,
            });
        }

        let account = self
            .ledger
            .get_account(&request.username)
            .await
            .map_err(SaleError::from_lookup)?;

        let total = good.price.checked_multiply(request.quantity).ok_or_else(|| {
            SaleError::InvalidInput(format!("total for {} units overflows", request.quantity))
        })?;

        if account.wallet_balance < total {
            return Err(SaleError::InsufficientFunds {
                required: total,
                available: account.wallet_balance,
            });
        }

        self.store
            .begin_attempt(NewAttempt {
                attempt_id,
                good_id: good.id,
                username: request.username.clone(),
                account_id: Some(account.id),
                quantity: request.quantity,
                amount: total,
            })
            .await
            .map_err(|err| match err {
                inventory::InventoryError::DuplicateAttempt(id) => SaleError::AttemptInProgress(id),
                other => other.into(),
            })?;

        let settlement = Settlement {
            attempt_id,
            account_id: account.id,
            total,
            sale: NewSale {
                good_id: good.id,
                username: request.username.clone(),
                quantity: request.quantity,
            },
        };

        // The good's lock travels with the settlement task.
        let this = self.clone();
        let task = tokio::spawn(
            async move {
                let _guard = guard;
                this.settle(settlement).await
            }
            .instrument(tracing::Span::current()),
        );

        task.await
            .map_err(|err| SaleError::PersistenceError(format!("settlement task failed: {err}")))?
    }

    async fn lock_good(&self, good_id: GoodId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(good_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Debits the account, then commits locally or reverses the debit.
    async fn settle(&self, settlement: Settlement) -> Result<SaleReceipt> {
        let Settlement {
            attempt_id,
            account_id,
            total,
            sale,
        } = settlement;

        if let Err(err) = self
            .ledger
            .adjust_balance(account_id, total.negate(), &attempt_id.debit_key())
            .await
        {
            if err.outcome_unknown() {
                tracing::warn!(error = %err, "debit outcome unknown, left for reconciliation");
            } else if let Err(journal_err) = self.store.mark_failed(attempt_id, &err.to_string()).await
            {
                tracing::warn!(error = %journal_err, "could not record failed debit");
            }
            return Err(SaleError::from_debit(err));
        }

        if let Err(err) = self.store.mark_debited(attempt_id).await {
            return Err(self.compensate(attempt_id, account_id, total, err.into()).await);
        }

        let good_id = sale.good_id;
        match self.store.commit_sale(sale, attempt_id).await {
            Ok(committed) => Ok(SaleReceipt {
                sale_id: committed.sale.id,
                attempt_id,
                good_id,
                new_stock_count: committed.new_stock_count,
                total,
            }),
            Err(err) => Err(self.compensate(attempt_id, account_id, total, err.into()).await),
        }
    }

    /// Issues the keyed reversal and returns the error that caused it.
    async fn compensate(
        &self,
        attempt_id: AttemptId,
        account_id: AccountId,
        total: Money,
        cause: SaleError,
    ) -> SaleError {
        tracing::warn!(error = %cause, "commit failed after debit, reversing");

        match self
            .ledger
            .adjust_balance(account_id, total, &attempt_id.reversal_key())
            .await
        {
            Ok(_) => {
                metrics::counter!("sale_compensations_total", "result" => "reversed").increment(1);
                if let Err(err) = self
                    .store
                    .mark_compensated(attempt_id, &cause.to_string())
                    .await
                {
                    tracing::warn!(error = %err, "reversal applied but not journaled");
                }
            }
            Err(err) => {
                metrics::counter!("sale_compensations_total", "result" => "deferred").increment(1);
                tracing::error!(error = %err, "reversal failed, left for reconciliation");
            }
        }

        cause
    }

    /// Name and price of every good.
    pub async fn list_goods(&self) -> Result<Vec<GoodSummary>> {
        let goods = self.store.list_goods().await?;
        Ok(goods
            .into_iter()
            .map(|good| GoodSummary {
                id: good.id,
                name: good.name,
                price: good.price,
            })
            .collect())
    }

    /// Full details of a good, with its description opened.
    pub async fn good_details(&self, good_id: GoodId) -> Result<GoodView> {
        Ok(self.catalog.get_good(good_id).await?)
    }

    /// A user's committed sales, oldest first.
    pub async fn purchase_history(&self, username: &str) -> Result<Vec<Sale>> {
        if username.trim().is_empty() {
            return Err(SaleError::InvalidInput("username is required".to_string()));
        }
        Ok(self.store.sales_for_user(username).await?)
    }
}

/// Answers a retried request from the journal.
fn replay(request: &SaleRequest, attempt: SaleAttempt) -> Result<SaleReceipt> {
    let attempt_id = attempt.attempt_id;
    if attempt.good_id != request.good_id
        || attempt.username != request.username
        || attempt.quantity != request.quantity
    {
        return Err(SaleError::AttemptConflict {
            attempt_id,
            reason: "request does not match the original attempt".to_string(),
        });
    }

    match attempt.state {
        AttemptState::Committed => match (attempt.sale_id, attempt.new_stock_count) {
            (Some(sale_id), Some(new_stock_count)) => {
                tracing::info!(%attempt_id, "replaying committed sale");
                Ok(SaleReceipt {
                    sale_id,
                    attempt_id,
                    good_id: attempt.good_id,
                    new_stock_count,
                    total: attempt.amount,
                })
            }
            _ => Err(SaleError::PersistenceError(format!(
                "committed attempt {attempt_id} has no sale recorded"
            ))),
        },
        AttemptState::Pending | AttemptState::Debited => {
            Err(SaleError::AttemptInProgress(attempt_id))
        }
        AttemptState::Compensated | AttemptState::Failed => Err(SaleError::AttemptConflict {
            attempt_id,
            reason: format!("attempt already {}", attempt.state),
        }),
    }
}
