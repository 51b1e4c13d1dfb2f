//! Access to the remote account ledger.

mod http;
mod memory;

use async_trait::async_trait;
use common::{AccountId, Money};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

pub use http::HttpLedgerClient;
pub use memory::{Adjustment, InMemoryLedger, LedgerFault};

/// A customer's account as reported by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerAccount {
    pub id: AccountId,
    pub username: String,
    pub wallet_balance: Money,
}

/// The ledger operations a sale needs.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Looks up an account by username.
    async fn get_account(&self, username: &str) -> Result<CustomerAccount, LedgerError>;

    /// Applies `delta` to the account balance and returns the new balance.
    ///
    /// The ledger applies each `idempotency_key` at most once. A reversal key
    /// (`<key>-reversal`) only takes effect if `<key>` was applied.
    async fn adjust_balance(
        &self,
        account_id: AccountId,
        delta: Money,
        idempotency_key: &str,
    ) -> Result<Money, LedgerError>;
}
