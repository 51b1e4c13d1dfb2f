//! In-memory ledger with idempotency keys and fault injection.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use common::{AccountId, Money};
use resilience::ClientError;

use super::{CustomerAccount, LedgerClient};
use crate::error::{LEDGER, LedgerError};

const REVERSAL_SUFFIX: &str = "-reversal";

/// A failure to inject into the next balance adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerFault {
    /// Times out without applying the change.
    Timeout,
    /// Applies the change, then times out before answering.
    TimeoutAfterApply,
    /// Refuses the connection.
    Unreachable,
    /// Answers with the given HTTP status.
    Status(u16),
}

/// One applied balance change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adjustment {
    pub account_id: AccountId,
    pub delta: Money,
    pub idempotency_key: String,
}

#[derive(Debug)]
struct Account {
    id: AccountId,
    username: String,
    balance: Money,
}

#[derive(Debug, Default)]
struct LedgerState {
    accounts: Vec<Account>,
    applied: HashMap<String, Money>,
    reversed: HashSet<String>,
    adjustments: Vec<Adjustment>,
    faults: VecDeque<LedgerFault>,
    unreachable: bool,
    lookups: usize,
    adjustment_calls: usize,
}

impl LedgerState {
    fn account_mut(&mut self, id: AccountId) -> Option<&mut Account> {
        self.accounts.iter_mut().find(|a| a.id == id)
    }
}

/// In-memory ledger for tests and local runs.
///
/// Honors idempotency keys the way the remote ledger does, and can be told
/// to fail in the ways a remote ledger fails.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens an account and returns its id.
    pub fn open_account(&self, username: &str, balance: Money) -> AccountId {
        let mut state = self.state();
        let id = AccountId::new(state.accounts.len() as i64 + 1);
        state.accounts.push(Account {
            id,
            username: username.to_string(),
            balance,
        });
        id
    }

    pub fn balance(&self, username: &str) -> Option<Money> {
        self.state()
            .accounts
            .iter()
            .find(|a| a.username == username)
            .map(|a| a.balance)
    }

    /// Balance changes actually applied, in order.
    pub fn adjustments(&self) -> Vec<Adjustment> {
        self.state().adjustments.clone()
    }

    /// Queues a fault for the next adjustment call.
    pub fn fail_next_adjustment(&self, fault: LedgerFault) {
        self.state().faults.push_back(fault);
    }

    /// Makes every call fail as if the ledger were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// Number of account lookups received.
    pub fn lookup_count(&self) -> usize {
        self.state().lookups
    }

    /// Number of adjustment calls received, applied or not.
    pub fn adjustment_calls(&self) -> usize {
        self.state().adjustment_calls
    }

    fn unreachable() -> LedgerError {
        LedgerError::Client(ClientError::ConnectionRefused {
            destination: LEDGER.to_string(),
            reason: "ledger is down".to_string(),
        })
    }

    fn timeout() -> LedgerError {
        LedgerError::Client(ClientError::Timeout {
            destination: LEDGER.to_string(),
            timeout: Duration::from_secs(5),
        })
    }

    fn apply(
        state: &mut LedgerState,
        account_id: AccountId,
        delta: Money,
        key: &str,
    ) -> Result<Money, LedgerError> {
        let balance = state
            .account_mut(account_id)
            .map(|a| a.balance)
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;

        if state.applied.contains_key(key) {
            return Ok(balance);
        }

        // A reversal is a no-op unless its original was applied.
        if let Some(original) = key.strip_suffix(REVERSAL_SUFFIX)
            && (!state.applied.contains_key(original) || state.reversed.contains(original))
        {
            state.applied.insert(key.to_string(), Money::zero());
            return Ok(balance);
        }

        let new_balance = balance + delta;
        if new_balance.is_negative() {
            return Err(LedgerError::Client(ClientError::Http {
                destination: LEDGER.to_string(),
                status: 400,
                body: "Insufficient funds".to_string(),
            }));
        }

        if let Some(account) = state.account_mut(account_id) {
            account.balance = new_balance;
        }
        state.applied.insert(key.to_string(), delta);
        if let Some(original) = key.strip_suffix(REVERSAL_SUFFIX) {
            state.reversed.insert(original.to_string());
        }
        state.adjustments.push(Adjustment {
            account_id,
            delta,
            idempotency_key: key.to_string(),
        });
        Ok(new_balance)
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn get_account(&self, username: &str) -> Result<CustomerAccount, LedgerError> {
        let mut state = self.state();
        state.lookups += 1;
        if state.unreachable {
            return Err(Self::unreachable());
        }
        state
            .accounts
            .iter()
            .find(|a| a.username == username)
            .map(|a| CustomerAccount {
                id: a.id,
                username: a.username.clone(),
                wallet_balance: a.balance,
            })
            .ok_or_else(|| LedgerError::AccountNotFound(username.to_string()))
    }

    async fn adjust_balance(
        &self,
        account_id: AccountId,
        delta: Money,
        idempotency_key: &str,
    ) -> Result<Money, LedgerError> {
        let mut state = self.state();
        state.adjustment_calls += 1;
        if state.unreachable {
            return Err(Self::unreachable());
        }

        match state.faults.pop_front() {
            None => Self::apply(&mut state, account_id, delta, idempotency_key),
            Some(LedgerFault::Timeout) => Err(Self::timeout()),
            Some(LedgerFault::TimeoutAfterApply) => {
                Self::apply(&mut state, account_id, delta, idempotency_key)?;
                Err(Self::timeout())
            }
            Some(LedgerFault::Unreachable) => Err(Self::unreachable()),
            Some(LedgerFault::Status(status)) => Err(LedgerError::Client(ClientError::Http {
                destination: LEDGER.to_string(),
                status,
                body: format!("injected {status}"),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_idempotent_debit() {
        let ledger = InMemoryLedger::new();
        let id = ledger.open_account("alice", Money::from_dollars(100));

        ledger
            .adjust_balance(id, Money::from_dollars(-10), "k1")
            .await
            .unwrap();
        ledger
            .adjust_balance(id, Money::from_dollars(-10), "k1")
            .await
            .unwrap();

        assert_eq!(ledger.balance("alice"), Some(Money::from_dollars(90)));
        assert_eq!(ledger.adjustments().len(), 1);
        assert_eq!(ledger.adjustment_calls(), 2);
    }

    #[tokio::test]
    async fn test_reversal_only_applies_after_original() {
        let ledger = InMemoryLedger::new();
        let id = ledger.open_account("alice", Money::from_dollars(100));

        ledger
            .adjust_balance(id, Money::from_dollars(10), "never-sent-reversal")
            .await
            .unwrap();
        assert_eq!(ledger.balance("alice"), Some(Money::from_dollars(100)));

        ledger
            .adjust_balance(id, Money::from_dollars(-10), "k2")
            .await
            .unwrap();
        ledger
            .adjust_balance(id, Money::from_dollars(10), "k2-reversal")
            .await
            .unwrap();
        ledger
            .adjust_balance(id, Money::from_dollars(10), "k2-reversal")
            .await
            .unwrap();
        assert_eq!(ledger.balance("alice"), Some(Money::from_dollars(100)));
    }

    #[tokio::test]
    async fn test_overdraft_is_rejected() {
        let ledger = InMemoryLedger::new();
        let id = ledger.open_account("bob", Money::from_dollars(3));
        let err = ledger
            .adjust_balance(id, Money::from_dollars(-5), "k3")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Client(ClientError::Http { status: 400, .. })
        ));
    }

    #[tokio::test]
    async fn test_timeout_after_apply_changes_balance() {
        let ledger = InMemoryLedger::new();
        let id = ledger.open_account("carol", Money::from_dollars(50));
        ledger.fail_next_adjustment(LedgerFault::TimeoutAfterApply);

        let err = ledger
            .adjust_balance(id, Money::from_dollars(-20), "k4")
            .await
            .unwrap_err();
        assert!(err.outcome_unknown());
        assert_eq!(ledger.balance("carol"), Some(Money::from_dollars(30)));
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let ledger = InMemoryLedger::new();
        assert!(matches!(
            ledger.get_account("ghost").await,
            Err(LedgerError::AccountNotFound(_))
        ));
        assert_eq!(ledger.lookup_count(), 1);
    }
}
