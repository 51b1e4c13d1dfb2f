//! End-to-end sale saga tests over the in-memory store and ledger.

use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use audit::AuditSink;
use chrono::{DateTime, Utc};
use common::{AttemptId, GoodId, Money};
use httpmock::prelude::*;
use inventory::{
    AttemptState, CommittedSale, Good, GoodUpdate, InMemoryInventoryStore, InventoryError,
    InventoryStore, NewAttempt, NewGood, NewSale, Sale, SaleAttempt, SaleJournal,
};
use resilience::{BreakerConfig, BreakerRegistry, Destination, ServiceClient};
use sales::{
    HttpLedgerClient, InMemoryLedger, LedgerClient, LedgerFault, Missing, Reconciler,
    SaleError, SaleOrchestrator, SaleRequest,
};
use security::EncryptionGateway;
use serde_json::json;

fn quiet_audit() -> AuditSink {
    // No audit destination configured: deliveries fail immediately and quietly.
    AuditSink::new(ServiceClient::builder().build().unwrap(), "sales_service")
}

fn gateway() -> EncryptionGateway {
    EncryptionGateway::passthrough("tests run without a key")
}

async fn stocked(store: &InMemoryInventoryStore, stock: i64, price: Money) -> GoodId {
    store
        .add_good(NewGood {
            name: "Widget".to_string(),
            category: "tools".to_string(),
            price,
            description: Some("a widget".to_string()),
            stock_count: stock,
        })
        .await
        .unwrap()
        .id
}

struct Fixture {
    store: Arc<InMemoryInventoryStore>,
    ledger: Arc<InMemoryLedger>,
    orchestrator: SaleOrchestrator<InMemoryInventoryStore, InMemoryLedger>,
    good_id: GoodId,
}

async fn fixture(stock: i64, price: Money, wallet: Money) -> Fixture {
    let store = Arc::new(InMemoryInventoryStore::new());
    let ledger = Arc::new(InMemoryLedger::new());
    let good_id = stocked(&store, stock, price).await;
    ledger.open_account("alice", wallet);

    let orchestrator = SaleOrchestrator::new(
        Arc::clone(&store),
        Arc::clone(&ledger),
        gateway(),
        quiet_audit(),
    );
    Fixture {
        store,
        ledger,
        orchestrator,
        good_id,
    }
}

async fn stock_of(store: &InMemoryInventoryStore, id: GoodId) -> i64 {
    store.get_good(id).await.unwrap().unwrap().stock_count
}

#[tokio::test]
async fn test_successful_sale_debits_once_and_records_sale() {
    let f = fixture(10, Money::from_dollars(5), Money::from_dollars(100)).await;

    let receipt = f
        .orchestrator
        .execute_sale(SaleRequest::new("alice", f.good_id, 2))
        .await
        .unwrap();

    assert_eq!(receipt.new_stock_count, 8);
    assert_eq!(receipt.total, Money::from_dollars(10));
    assert_eq!(stock_of(&f.store, f.good_id).await, 8);
    assert_eq!(f.ledger.balance("alice"), Some(Money::from_dollars(90)));

    let adjustments = f.ledger.adjustments();
    assert_eq!(adjustments.len(), 1);
    assert_eq!(adjustments[0].delta, Money::from_dollars(-10));
    assert_eq!(adjustments[0].idempotency_key, receipt.attempt_id.debit_key());

    let history = f.orchestrator.purchase_history("alice").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].quantity, 2);

    let attempt = f.store.get_attempt(receipt.attempt_id).await.unwrap().unwrap();
    assert_eq!(attempt.state, AttemptState::Committed);
}

#[tokio::test]
async fn test_insufficient_stock_makes_no_remote_call() {
    let f = fixture(10, Money::from_dollars(5), Money::from_dollars(100)).await;

    let err = f
        .orchestrator
        .execute_sale(SaleRequest::new("alice", f.good_id, 20))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SaleError::InsufficientStock { requested: 20, available: 10, .. }
    ));
    assert_eq!(f.ledger.lookup_count(), 0);
    assert_eq!(f.ledger.adjustment_calls(), 0);
    assert_eq!(stock_of(&f.store, f.good_id).await, 10);
}

#[tokio::test]
async fn test_insufficient_funds_issues_no_debit() {
    let f = fixture(10, Money::from_dollars(5), Money::from_dollars(3)).await;

    let err = f
        .orchestrator
        .execute_sale(SaleRequest::new("alice", f.good_id, 2))
        .await
        .unwrap_err();

    assert!(matches!(err, SaleError::InsufficientFunds { .. }));
    assert_eq!(f.ledger.adjustment_calls(), 0);
    assert_eq!(stock_of(&f.store, f.good_id).await, 10);
    assert_eq!(f.store.sale_count().await, 0);
}

#[tokio::test]
async fn test_invalid_input_and_missing_things() {
    let f = fixture(10, Money::from_dollars(5), Money::from_dollars(100)).await;

    for request in [
        SaleRequest::new("alice", f.good_id, 0),
        SaleRequest::new("  ", f.good_id, 1),
        SaleRequest::new("alice", GoodId::new(0), 1),
    ] {
        assert!(matches!(
            f.orchestrator.execute_sale(request).await,
            Err(SaleError::InvalidInput(_))
        ));
    }

    assert!(matches!(
        f.orchestrator
            .execute_sale(SaleRequest::new("alice", GoodId::new(404), 1))
            .await,
        Err(SaleError::NotFound(Missing::Good(_)))
    ));
    assert!(matches!(
        f.orchestrator
            .execute_sale(SaleRequest::new("mallory", f.good_id, 1))
            .await,
        Err(SaleError::NotFound(Missing::Account(_)))
    ));
    assert_eq!(f.ledger.adjustment_calls(), 0);
}

#[tokio::test]
async fn test_ledger_down_is_unavailable_without_side_effects() {
    let f = fixture(10, Money::from_dollars(5), Money::from_dollars(100)).await;
    f.ledger.set_unreachable(true);

    let err = f
        .orchestrator
        .execute_sale(SaleRequest::new("alice", f.good_id, 1))
        .await
        .unwrap_err();
    assert!(err.is_unavailable());
    assert_eq!(stock_of(&f.store, f.good_id).await, 10);
}

#[tokio::test]
async fn test_rejected_debit_fails_attempt_and_keeps_stock() {
    let f = fixture(10, Money::from_dollars(5), Money::from_dollars(100)).await;
    f.ledger.fail_next_adjustment(LedgerFault::Status(422));
    let attempt_id = AttemptId::new();

    let err = f
        .orchestrator
        .execute_sale(SaleRequest::new("alice", f.good_id, 2).with_attempt(attempt_id))
        .await
        .unwrap_err();

    assert!(matches!(err, SaleError::UpstreamError { status: Some(422), .. }));
    assert_eq!(stock_of(&f.store, f.good_id).await, 10);
    let attempt = f.store.get_attempt(attempt_id).await.unwrap().unwrap();
    assert_eq!(attempt.state, AttemptState::Failed);
}

#[tokio::test]
async fn test_gateway_error_on_debit_is_left_pending_then_reversed() {
    let attempt_id = AttemptId::new();
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/accounts/alice");
            then.status(200)
                .json_body(json!({ "id": 7, "walletBalance": 100.0 }));
        })
        .await;
    let debit = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/accounts/7/balance")
                .header("Idempotency-Key", attempt_id.debit_key());
            then.status(504);
        })
        .await;
    let reversal = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/accounts/7/balance")
                .header("Idempotency-Key", attempt_id.reversal_key())
                .json_body(json!({ "amount": 10.0 }));
            then.status(200).json_body(json!({ "newBalance": 100.0 }));
        })
        .await;

    let client = ServiceClient::builder()
        .destination(Destination::Ledger, server.base_url())
        .build()
        .unwrap();
    let ledger: Arc<dyn LedgerClient> = Arc::new(HttpLedgerClient::new(client));
    let store = Arc::new(InMemoryInventoryStore::new());
    let good_id = stocked(&store, 10, Money::from_dollars(5)).await;
    let orchestrator = SaleOrchestrator::new(
        Arc::clone(&store),
        Arc::clone(&ledger),
        gateway(),
        quiet_audit(),
    );

    let err = orchestrator
        .execute_sale(SaleRequest::new("alice", good_id, 2).with_attempt(attempt_id))
        .await
        .unwrap_err();
    assert!(matches!(err, SaleError::UpstreamError { status: Some(504), .. }));
    assert_eq!(debit.hits_async().await, 1);
    assert_eq!(stock_of(&store, good_id).await, 10);
    let attempt = store.get_attempt(attempt_id).await.unwrap().unwrap();
    assert_eq!(attempt.state, AttemptState::Pending);

    let report = Reconciler::new(Arc::clone(&store), ledger)
        .reconcile_once(Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.compensated, 1);
    reversal.assert_async().await;
    let attempt = store.get_attempt(attempt_id).await.unwrap().unwrap();
    assert_eq!(attempt.state, AttemptState::Compensated);
}

#[tokio::test]
async fn test_debit_timeout_is_left_pending_then_reconciled() {
    let f = fixture(10, Money::from_dollars(5), Money::from_dollars(100)).await;
    f.ledger.fail_next_adjustment(LedgerFault::TimeoutAfterApply);
    let attempt_id = AttemptId::new();

    let err = f
        .orchestrator
        .execute_sale(SaleRequest::new("alice", f.good_id, 2).with_attempt(attempt_id))
        .await
        .unwrap_err();
    assert!(matches!(err, SaleError::UpstreamTimeout { .. }));
    assert_eq!(f.ledger.balance("alice"), Some(Money::from_dollars(90)));
    assert_eq!(stock_of(&f.store, f.good_id).await, 10);

    let attempt = f.store.get_attempt(attempt_id).await.unwrap().unwrap();
    assert_eq!(attempt.state, AttemptState::Pending);

    let report = Reconciler::new(Arc::clone(&f.store), Arc::clone(&f.ledger))
        .reconcile_once(Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(report.compensated, 1);
    assert_eq!(f.ledger.balance("alice"), Some(Money::from_dollars(100)));
}

#[tokio::test]
async fn test_retry_with_same_attempt_replays_receipt() {
    let f = fixture(10, Money::from_dollars(5), Money::from_dollars(100)).await;
    let request = SaleRequest::new("alice", f.good_id, 2).with_attempt(AttemptId::new());

    let first = f.orchestrator.execute_sale(request.clone()).await.unwrap();
    let lookups = f.ledger.lookup_count();
    let second = f.orchestrator.execute_sale(request).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(f.ledger.lookup_count(), lookups);
    assert_eq!(f.ledger.adjustments().len(), 1);
    assert_eq!(stock_of(&f.store, f.good_id).await, 8);
}

#[tokio::test]
async fn test_reused_attempt_with_different_request_conflicts() {
    let f = fixture(10, Money::from_dollars(5), Money::from_dollars(100)).await;
    let attempt_id = AttemptId::new();
    f.orchestrator
        .execute_sale(SaleRequest::new("alice", f.good_id, 2).with_attempt(attempt_id))
        .await
        .unwrap();

    let err = f
        .orchestrator
        .execute_sale(SaleRequest::new("alice", f.good_id, 3).with_attempt(attempt_id))
        .await
        .unwrap_err();
    assert!(matches!(err, SaleError::AttemptConflict { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_buyers_never_oversell() {
    let store = Arc::new(InMemoryInventoryStore::new());
    let ledger = Arc::new(InMemoryLedger::new());
    let good_id = stocked(&store, 10, Money::from_dollars(1)).await;
    for i in 0..30 {
        ledger.open_account(&format!("buyer{i}"), Money::from_dollars(100));
    }
    let orchestrator = SaleOrchestrator::new(
        Arc::clone(&store),
        Arc::clone(&ledger),
        gateway(),
        quiet_audit(),
    );

    let mut handles = Vec::new();
    for i in 0..30 {
        let orchestrator = orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator
                .execute_sale(SaleRequest::new(format!("buyer{i}"), good_id, 1))
                .await
        }));
    }

    let mut sold = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => sold += 1,
            Err(SaleError::InsufficientStock { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(sold, 10);
    assert_eq!(stock_of(&store, good_id).await, 0);
    assert_eq!(store.sale_count().await, 10);
    assert_eq!(ledger.adjustments().len(), 10);
}

#[tokio::test]
async fn test_unreachable_audit_service_does_not_affect_sale() {
    let store = Arc::new(InMemoryInventoryStore::new());
    let ledger = Arc::new(InMemoryLedger::new());
    let good_id = stocked(&store, 5, Money::from_dollars(5)).await;
    ledger.open_account("alice", Money::from_dollars(100));

    let audit_client = ServiceClient::builder()
        .destination(Destination::Audit, "http://127.0.0.1:9")
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let orchestrator = SaleOrchestrator::new(
        Arc::clone(&store),
        ledger,
        gateway(),
        AuditSink::new(audit_client, "sales_service"),
    );

    let receipt = orchestrator
        .execute_sale(SaleRequest::new("alice", good_id, 1))
        .await
        .unwrap();
    assert_eq!(receipt.new_stock_count, 4);
}

#[tokio::test]
async fn test_successful_sale_is_audited() {
    let server = MockServer::start_async().await;
    let audit_mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/audit_logs")
                .json_body_partial(r#"{"service":"sales_service","operation":"purchase","status":"success","user":"alice"}"#);
            then.status(201);
        })
        .await;

    let store = Arc::new(InMemoryInventoryStore::new());
    let ledger = Arc::new(InMemoryLedger::new());
    let good_id = stocked(&store, 5, Money::from_dollars(5)).await;
    ledger.open_account("alice", Money::from_dollars(100));

    let audit_client = ServiceClient::builder()
        .destination(Destination::Audit, server.base_url())
        .build()
        .unwrap();
    let orchestrator = SaleOrchestrator::new(
        store,
        ledger,
        gateway(),
        AuditSink::new(audit_client, "sales_service"),
    );

    orchestrator
        .execute_sale(SaleRequest::new("alice", good_id, 1))
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while audit_mock.hits_async().await == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    audit_mock.assert_async().await;
}

#[tokio::test]
async fn test_catalog_queries() {
    let f = fixture(10, Money::from_dollars(5), Money::from_dollars(100)).await;

    let goods = f.orchestrator.list_goods().await.unwrap();
    assert_eq!(goods.len(), 1);
    assert_eq!(goods[0].name, "Widget");
    assert_eq!(goods[0].price, Money::from_dollars(5));

    let details = f.orchestrator.good_details(f.good_id).await.unwrap();
    assert_eq!(details.description.as_deref(), Some("a widget"));
    assert!(matches!(
        f.orchestrator.good_details(GoodId::new(77)).await,
        Err(SaleError::NotFound(Missing::Good(_)))
    ));
    assert!(f.orchestrator.purchase_history("").await.is_err());
}

/// Delegates to the in-memory store but can refuse to commit.
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryInventoryStore,
    refuse_commit: AtomicBool,
    /// Taken down when a commit is refused, so the reversal fails too.
    break_ledger_on_refusal: OnceLock<Arc<InMemoryLedger>>,
}

#[async_trait]
impl InventoryStore for FlakyStore {
    async fn add_good(&self, good: NewGood) -> inventory::Result<Good> {
        self.inner.add_good(good).await
    }

    async fn update_good(&self, id: GoodId, update: GoodUpdate) -> inventory::Result<Good> {
        self.inner.update_good(id, update).await
    }

    async fn get_good(&self, id: GoodId) -> inventory::Result<Option<Good>> {
        self.inner.get_good(id).await
    }

    async fn list_goods(&self) -> inventory::Result<Vec<Good>> {
        self.inner.list_goods().await
    }

    async fn deduct_stock(&self, id: GoodId, quantity: u32) -> inventory::Result<i64> {
        self.inner.deduct_stock(id, quantity).await
    }

    async fn commit_sale(
        &self,
        sale: NewSale,
        attempt_id: AttemptId,
    ) -> inventory::Result<CommittedSale> {
        if self.refuse_commit.load(Ordering::SeqCst) {
            if let Some(ledger) = self.break_ledger_on_refusal.get() {
                ledger.set_unreachable(true);
            }
            return Err(InventoryError::Serialization("disk full".to_string()));
        }
        self.inner.commit_sale(sale, attempt_id).await
    }

    async fn sales_for_user(&self, username: &str) -> inventory::Result<Vec<Sale>> {
        self.inner.sales_for_user(username).await
    }

    async fn sales_for_good(&self, good_id: GoodId) -> inventory::Result<Vec<Sale>> {
        self.inner.sales_for_good(good_id).await
    }
}

#[async_trait]
impl SaleJournal for FlakyStore {
    async fn begin_attempt(&self, attempt: NewAttempt) -> inventory::Result<SaleAttempt> {
        self.inner.begin_attempt(attempt).await
    }

    async fn get_attempt(&self, attempt_id: AttemptId) -> inventory::Result<Option<SaleAttempt>> {
        self.inner.get_attempt(attempt_id).await
    }

    async fn mark_debited(&self, attempt_id: AttemptId) -> inventory::Result<SaleAttempt> {
        self.inner.mark_debited(attempt_id).await
    }

    async fn mark_failed(
        &self,
        attempt_id: AttemptId,
        detail: &str,
    ) -> inventory::Result<SaleAttempt> {
        self.inner.mark_failed(attempt_id, detail).await
    }

    async fn mark_compensated(
        &self,
        attempt_id: AttemptId,
        detail: &str,
    ) -> inventory::Result<SaleAttempt> {
        self.inner.mark_compensated(attempt_id, detail).await
    }

    async fn unsettled_attempts(
        &self,
        older_than: DateTime<Utc>,
    ) -> inventory::Result<Vec<SaleAttempt>> {
        self.inner.unsettled_attempts(older_than).await
    }
}

#[tokio::test]
async fn test_commit_failure_reverses_debit() {
    let store = Arc::new(FlakyStore::default());
    let ledger = Arc::new(InMemoryLedger::new());
    let good_id = store
        .add_good(NewGood {
            name: "Widget".to_string(),
            category: "tools".to_string(),
            price: Money::from_dollars(5),
            description: None,
            stock_count: 10,
        })
        .await
        .unwrap()
        .id;
    ledger.open_account("alice", Money::from_dollars(100));
    store.refuse_commit.store(true, Ordering::SeqCst);

    let orchestrator = SaleOrchestrator::new(
        Arc::clone(&store),
        Arc::clone(&ledger),
        gateway(),
        quiet_audit(),
    );
    let attempt_id = AttemptId::new();
    let err = orchestrator
        .execute_sale(SaleRequest::new("alice", good_id, 2).with_attempt(attempt_id))
        .await
        .unwrap_err();

    assert!(matches!(err, SaleError::PersistenceError(_)));
    assert_eq!(ledger.balance("alice"), Some(Money::from_dollars(100)));

    let keys: Vec<String> = ledger
        .adjustments()
        .into_iter()
        .map(|a| a.idempotency_key)
        .collect();
    assert_eq!(keys, vec![attempt_id.debit_key(), attempt_id.reversal_key()]);

    let attempt = store.get_attempt(attempt_id).await.unwrap().unwrap();
    assert_eq!(attempt.state, AttemptState::Compensated);
    assert_eq!(store.get_good(good_id).await.unwrap().unwrap().stock_count, 10);
}

#[tokio::test]
async fn test_failed_reversal_is_left_for_reconciler() {
    let store = Arc::new(FlakyStore::default());
    let ledger = Arc::new(InMemoryLedger::new());
    let good_id = store
        .add_good(NewGood {
            name: "Widget".to_string(),
            category: "tools".to_string(),
            price: Money::from_dollars(5),
            description: None,
            stock_count: 10,
        })
        .await
        .unwrap()
        .id;
    ledger.open_account("alice", Money::from_dollars(100));
    store.refuse_commit.store(true, Ordering::SeqCst);
    let _ = store.break_ledger_on_refusal.set(Arc::clone(&ledger));

    let orchestrator = SaleOrchestrator::new(
        Arc::clone(&store),
        Arc::clone(&ledger),
        gateway(),
        quiet_audit(),
    );
    let attempt_id = AttemptId::new();
    let err = orchestrator
        .execute_sale(SaleRequest::new("alice", good_id, 2).with_attempt(attempt_id))
        .await
        .unwrap_err();
    assert!(matches!(err, SaleError::PersistenceError(_)));

    // Debit applied, reversal could not be sent.
    assert_eq!(ledger.balance("alice"), Some(Money::from_dollars(90)));
    let attempt = store.get_attempt(attempt_id).await.unwrap().unwrap();
    assert_eq!(attempt.state, AttemptState::Debited);

    ledger.set_unreachable(false);
    let report = Reconciler::new(Arc::clone(&store), Arc::clone(&ledger))
        .reconcile_once(Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(report.compensated, 1);
    assert_eq!(ledger.balance("alice"), Some(Money::from_dollars(100)));
    let attempt = store.get_attempt(attempt_id).await.unwrap().unwrap();
    assert_eq!(attempt.state, AttemptState::Compensated);
}

#[tokio::test]
async fn test_open_ledger_circuit_fails_fast() {
    let server = MockServer::start_async().await;
    let lookup = server
        .mock_async(|when, then| {
            when.method(GET).path("/accounts/alice");
            then.status(503);
        })
        .await;

    let registry = Arc::new(BreakerRegistry::new(BreakerConfig::new(
        1,
        Duration::from_secs(60),
    )));
    let client = ServiceClient::builder()
        .destination(Destination::Ledger, server.base_url())
        .breakers(registry)
        .build()
        .unwrap();
    let ledger: Arc<dyn LedgerClient> = Arc::new(HttpLedgerClient::new(client));

    let store = Arc::new(InMemoryInventoryStore::new());
    let good_id = stocked(&store, 10, Money::from_dollars(5)).await;
    let orchestrator = SaleOrchestrator::new(Arc::clone(&store), ledger, gateway(), quiet_audit());

    let first = orchestrator
        .execute_sale(SaleRequest::new("alice", good_id, 1))
        .await
        .unwrap_err();
    assert!(matches!(first, SaleError::Unavailable { .. }));

    let second = orchestrator
        .execute_sale(SaleRequest::new("alice", good_id, 1))
        .await
        .unwrap_err();
    assert!(matches!(second, SaleError::CircuitOpen { .. }));
    assert!(second.is_unavailable());
    assert_eq!(lookup.hits_async().await, 1);
    assert_eq!(stock_of(&store, good_id).await, 10);
}

#[tokio::test]
async fn test_http_ledger_sale_sends_idempotency_key() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/accounts/alice");
            then.status(200)
                .json_body(json!({ "id": 7, "walletBalance": 100.0 }));
        })
        .await;
    let debit = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/accounts/7/balance")
                .header_exists("Idempotency-Key")
                .json_body(json!({ "amount": -10.0 }));
            then.status(200).json_body(json!({ "newBalance": 90.0 }));
        })
        .await;

    let client = ServiceClient::builder()
        .destination(Destination::Ledger, server.base_url())
        .build()
        .unwrap();
    let store = Arc::new(InMemoryInventoryStore::new());
    let good_id = stocked(&store, 10, Money::from_dollars(5)).await;
    let orchestrator = SaleOrchestrator::new(
        Arc::clone(&store),
        Arc::new(HttpLedgerClient::new(client)),
        gateway(),
        quiet_audit(),
    );

    let receipt = orchestrator
        .execute_sale(SaleRequest::new("alice", good_id, 2))
        .await
        .unwrap();
    assert_eq!(receipt.new_stock_count, 8);
    debit.assert_async().await;
}

#[tokio::test]
async fn test_cancelled_caller_does_not_strand_debit() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/accounts/alice");
            then.status(200)
                .json_body(json!({ "id": 7, "walletBalance": 100.0 }));
        })
        .await;
    let debit = server
        .mock_async(|when, then| {
            when.method(PUT).path("/accounts/7/balance");
            then.status(200)
                .delay(Duration::from_millis(300))
                .json_body(json!({ "newBalance": 95.0 }));
        })
        .await;

    let client = ServiceClient::builder()
        .destination(Destination::Ledger, server.base_url())
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    let store = Arc::new(InMemoryInventoryStore::new());
    let good_id = stocked(&store, 10, Money::from_dollars(5)).await;
    let orchestrator = SaleOrchestrator::new(
        Arc::clone(&store),
        Arc::new(HttpLedgerClient::new(client)),
        gateway(),
        quiet_audit(),
    );

    let caller = tokio::spawn(async move {
        orchestrator
            .execute_sale(SaleRequest::new("alice", good_id, 1))
            .await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    caller.abort();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while store.sale_count().await == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    assert_eq!(debit.hits_async().await, 1);
    assert_eq!(store.sale_count().await, 1);
    assert_eq!(stock_of(&store, good_id).await, 9);
}
