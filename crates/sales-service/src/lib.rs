//! Process wiring for the sales service: configuration, the shared service
//! graph and the background reconciliation loop.

pub mod config;
pub mod error;

use std::sync::Arc;
use std::time::Duration;

use audit::{AuditSink, AuditStatus};
use inventory::{
    Catalog, InMemoryInventoryStore, InventoryBackend, PostgresInventoryStore, ReviewBoard,
};
use resilience::{BreakerConfig, BreakerRegistry, Destination, ServiceClient};
use sales::{HttpLedgerClient, LedgerClient, Reconciler, SaleOrchestrator};
use security::EncryptionGateway;
use sqlx::postgres::PgPoolOptions;

pub use config::{Config, LogFormat};
pub use error::{Result, StartupError};

/// Name the service reports itself as in audit records.
pub const SERVICE_NAME: &str = "sales";

/// Everything the service needs, built once at startup and shared.
pub struct Services {
    pub client: ServiceClient,
    pub gateway: EncryptionGateway,
    pub audit: AuditSink,
    pub catalog: Catalog<dyn InventoryBackend>,
    pub reviews: ReviewBoard<dyn InventoryBackend>,
    pub orchestrator: SaleOrchestrator<dyn InventoryBackend, dyn LedgerClient>,
    pub reconciler: Reconciler<dyn InventoryBackend, dyn LedgerClient>,
}

/// Builds the breaker-guarded client for every remote collaborator.
pub fn build_client(config: &Config) -> Result<ServiceClient> {
    let breakers = BreakerRegistry::new(BreakerConfig::new(
        config.breaker_failure_threshold,
        config.breaker_reset_timeout,
    ));

    let client = ServiceClient::builder()
        .destination(Destination::Ledger, &config.ledger_url)
        .destination(Destination::Audit, &config.audit_url)
        .destination(Destination::Keys, &config.key_url)
        .timeout(config.call_timeout)
        .breakers(Arc::new(breakers))
        .build()?;
    Ok(client)
}

/// Opens the inventory store: PostgreSQL when a database is configured,
/// otherwise a process-local in-memory store.
pub async fn connect_store(config: &Config) -> Result<Arc<dyn InventoryBackend>> {
    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
            let store = PostgresInventoryStore::new(pool);
            store.run_migrations().await?;
            tracing::info!("using PostgreSQL inventory store");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, inventory is kept in memory");
            Ok(Arc::new(InMemoryInventoryStore::new()))
        }
    }
}

/// Builds the service graph over an already opened store.
pub async fn build_services_with_store(
    config: &Config,
    store: Arc<dyn InventoryBackend>,
) -> Result<Services> {
    let client = build_client(config)?;
    let gateway = EncryptionGateway::from_config(
        config.encryption_key.as_deref(),
        &client,
        &config.encryption_key_name,
    )
    .await;
    let audit = AuditSink::new(client.clone(), SERVICE_NAME);

    let ledger: Arc<dyn LedgerClient> = Arc::new(HttpLedgerClient::new(client.clone()));

    let services = Services {
        catalog: Catalog::new(Arc::clone(&store), gateway.clone()),
        reviews: ReviewBoard::new(Arc::clone(&store), gateway.clone()),
        orchestrator: SaleOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            gateway.clone(),
            audit.clone(),
        ),
        reconciler: Reconciler::new(store, ledger),
        client,
        gateway,
        audit,
    };

    services.audit.log(
        "startup",
        AuditStatus::Success,
        None,
        Some(&format!("encryption {}", services.gateway.mode().as_str())),
    );
    Ok(services)
}

/// Connects the store and builds the service graph.
pub async fn build_services(config: &Config) -> Result<Services> {
    let store = connect_store(config).await?;
    build_services_with_store(config, store).await
}

/// Runs reconciliation passes every `interval` until cancelled.
///
/// A failed pass is logged and retried on the next tick. A zero interval is
/// treated as one millisecond.
pub async fn reconcile_loop(
    reconciler: &Reconciler<dyn InventoryBackend, dyn LedgerClient>,
    interval: Duration,
    grace: Duration,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if let Err(err) = reconciler.reconcile_once(grace).await {
            metrics::counter!("reconcile_pass_failures_total").increment(1);
            tracing::error!(error = %err, "reconciliation pass failed");
        }
    }
}
