//! Settles sale attempts abandoned between debit and commit.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::AttemptId;
use inventory::{AttemptState, SaleJournal};
use serde::Serialize;

use crate::error::{Result, SaleError};
use crate::ledger::LedgerClient;

/// What one reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    /// Unsettled attempts found.
    pub scanned: usize,
    /// Attempts reversed and marked compensated.
    pub compensated: usize,
    /// Attempts closed as failed because no debit could have been sent.
    pub failed: usize,
    /// Attempts left for the next pass, with the reason.
    pub deferred: Vec<(AttemptId, String)>,
}

/// Reverses debits whose sale never committed.
///
/// `grace` must exceed the ledger call timeout, or an attempt whose debit is
/// still in flight may be reversed underneath it. The service configuration
/// keeps it at twice the timeout or more.
pub struct Reconciler<S: ?Sized, L: ?Sized> {
    journal: Arc<S>,
    ledger: Arc<L>,
}

impl<S, L> Reconciler<S, L>
where
    S: SaleJournal + ?Sized,
    L: LedgerClient + ?Sized,
{
    pub fn new(journal: Arc<S>, ledger: Arc<L>) -> Self {
        Self { journal, ledger }
    }

    /// Runs one pass over attempts unsettled for longer than `grace`.
    ///
    /// Both `Debited` and `Pending` attempts get the keyed reversal; the
    /// ledger ignores a reversal whose debit it never applied.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_once(&self, grace: Duration) -> Result<ReconciliationReport> {
        let grace = chrono::Duration::from_std(grace)
            .map_err(|_| SaleError::InvalidInput(format!("grace period {grace:?} is too large")))?;
        let cutoff = Utc::now() - grace;

        let attempts = self.journal.unsettled_attempts(cutoff).await?;
        let mut report = ReconciliationReport {
            scanned: attempts.len(),
            ..Default::default()
        };

        for attempt in attempts {
            let attempt_id = attempt.attempt_id;

            let Some(account_id) = attempt.account_id else {
                // The account was never resolved, so no debit was sent.
                match self
                    .journal
                    .mark_failed(attempt_id, "reconciled: no account recorded")
                    .await
                {
                    Ok(_) => report.failed += 1,
                    Err(err) => report.deferred.push((attempt_id, err.to_string())),
                }
                continue;
            };

            let reversal = self
                .ledger
                .adjust_balance(account_id, attempt.amount, &attempt_id.reversal_key())
                .await;

            if let Err(err) = reversal {
                tracing::warn!(%attempt_id, error = %err, "reversal failed, will retry");
                report.deferred.push((attempt_id, err.to_string()));
                continue;
            }

            let detail = match attempt.state {
                AttemptState::Pending => "reconciled: reversed debit with unknown outcome",
                _ => "reconciled: reversed uncommitted debit",
            };
            match self.journal.mark_compensated(attempt_id, detail).await {
                Ok(_) => {
                    tracing::info!(%attempt_id, state = %attempt.state, "attempt compensated");
                    report.compensated += 1;
                }
                Err(err) => report.deferred.push((attempt_id, err.to_string())),
            }
        }

        metrics::counter!("reconciled_attempts_total", "result" => "compensated")
            .increment(report.compensated as u64);
        metrics::counter!("reconciled_attempts_total", "result" => "failed")
            .increment(report.failed as u64);
        metrics::counter!("reconciled_attempts_total", "result" => "deferred")
            .increment(report.deferred.len() as u64);

        if report.scanned > 0 {
            tracing::info!(
                scanned = report.scanned,
                compensated = report.compensated,
                failed = report.failed,
                deferred = report.deferred.len(),
                "reconciliation pass finished"
            );
        }
        Ok(report)
    }
}
