//! Ledger client over HTTP.

use async_trait::async_trait;
use common::{AccountId, Money};
use resilience::{ClientError, Destination, ServiceClient, ServiceRequest};
use serde::{Deserialize, Serialize};

use super::{CustomerAccount, LedgerClient};
use crate::error::LedgerError;

#[derive(Deserialize)]
struct AccountResponse {
    id: i64,
    #[serde(rename = "walletBalance", alias = "wallet_balance")]
    wallet_balance: f64,
}

#[derive(Serialize)]
struct BalanceChange {
    amount: f64,
}

#[derive(Deserialize)]
struct BalanceResponse {
    #[serde(rename = "newBalance", alias = "new_balance")]
    new_balance: f64,
}

/// Ledger over HTTP, through the `ledger` breaker.
///
/// Amounts travel as decimal major units and are converted to [`Money`] here.
#[derive(Debug, Clone)]
pub struct HttpLedgerClient {
    client: ServiceClient,
}

impl HttpLedgerClient {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }
}

fn to_money(amount: f64, field: &str) -> Result<Money, LedgerError> {
    Money::from_major_units(amount)
        .ok_or_else(|| LedgerError::InvalidResponse(format!("{field} is not a finite amount")))
}

fn decode_error(err: ClientError) -> LedgerError {
    match err {
        ClientError::Decode { reason, .. } => LedgerError::InvalidResponse(reason),
        other => LedgerError::Client(other),
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    #[tracing::instrument(skip(self))]
    async fn get_account(&self, username: &str) -> Result<CustomerAccount, LedgerError> {
        let response = self
            .client
            .send(ServiceRequest::get(Destination::Ledger, ["accounts", username]))
            .await
            .map_err(|err| {
                if err.is_not_found() {
                    LedgerError::AccountNotFound(username.to_string())
                } else {
                    LedgerError::Client(err)
                }
            })?;

        let body: AccountResponse = response.json().map_err(decode_error)?;
        Ok(CustomerAccount {
            id: AccountId::new(body.id),
            username: username.to_string(),
            wallet_balance: to_money(body.wallet_balance, "walletBalance")?,
        })
    }

    #[tracing::instrument(skip(self), fields(delta = %delta))]
    async fn adjust_balance(
        &self,
        account_id: AccountId,
        delta: Money,
        idempotency_key: &str,
    ) -> Result<Money, LedgerError> {
        let account = account_id.to_string();
        let request = ServiceRequest::put(Destination::Ledger, ["accounts", account.as_str(), "balance"])
            .json(&BalanceChange {
                amount: delta.to_major_units(),
            })?
            .header("Idempotency-Key", idempotency_key);

        let response = self.client.send(request).await.map_err(|err| {
            if err.is_not_found() {
                LedgerError::AccountNotFound(account.clone())
            } else {
                LedgerError::Client(err)
            }
        })?;

        let body: BalanceResponse = response.json().map_err(decode_error)?;
        to_money(body.new_balance, "newBalance")
    }
}
