//! Detached audit delivery.

use std::time::Duration;

use resilience::{ClientError, Destination, ServiceClient, ServiceRequest};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::record::{AuditRecord, AuditStatus};

/// Retry bounds for a single audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

/// How a delivery ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    Failed { attempts: u32, error: String },
    /// No runtime was available to run the delivery.
    Skipped,
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

/// Handle to an in-flight delivery.
///
/// Dropping it does not cancel the delivery.
#[derive(Debug)]
pub struct AuditHandle(Option<JoinHandle<DeliveryOutcome>>);

impl AuditHandle {
    /// Waits for the delivery to finish.
    pub async fn outcome(self) -> DeliveryOutcome {
        match self.0 {
            Some(handle) => handle.await.unwrap_or_else(|err| DeliveryOutcome::Failed {
                attempts: 0,
                error: err.to_string(),
            }),
            None => DeliveryOutcome::Skipped,
        }
    }
}

/// Ships audit records to `POST /audit_logs` without blocking the caller.
#[derive(Debug, Clone)]
pub struct AuditSink {
    client: ServiceClient,
    service_name: String,
    policy: DeliveryPolicy,
}

impl AuditSink {
    pub fn new(client: ServiceClient, service_name: impl Into<String>) -> Self {
        Self {
            client,
            service_name: service_name.into(),
            policy: DeliveryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: DeliveryPolicy) -> Self {
        self.policy = DeliveryPolicy {
            attempts: policy.attempts.max(1),
            ..policy
        };
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Records an operation under this sink's service name.
    pub fn log(
        &self,
        operation: &str,
        status: AuditStatus,
        user: Option<&str>,
        details: Option<&str>,
    ) -> AuditHandle {
        let mut record = AuditRecord::new(self.service_name.clone(), operation, status);
        record.user = user.map(str::to_string);
        record.details = details.map(str::to_string);
        self.record(record)
    }

    /// Spawns delivery of a prepared record.
    pub fn record(&self, record: AuditRecord) -> AuditHandle {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                operation = %record.operation,
                "no async runtime; audit record dropped"
            );
            metrics::counter!("audit_delivery_failures_total").increment(1);
            return AuditHandle(None);
        };

        let span = tracing::info_span!(
            "audit_delivery",
            operation = %record.operation,
            status = %record.status,
        );
        let client = self.client.clone();
        let policy = self.policy;
        AuditHandle(Some(
            runtime.spawn(deliver(client, policy, record).instrument(span)),
        ))
    }
}

async fn deliver(client: ServiceClient, policy: DeliveryPolicy, record: AuditRecord) -> DeliveryOutcome {
    let request = match ServiceRequest::post(Destination::Audit, ["audit_logs"]).json(&record) {
        Ok(request) => request,
        Err(err) => return failed(0, &err),
    };

    let mut attempt = 0;
    loop {
        attempt += 1;
        match client.send(request.clone()).await {
            Ok(_) => {
                tracing::debug!(attempts = attempt, "audit record delivered");
                return DeliveryOutcome::Delivered { attempts: attempt };
            }
            Err(err) if attempt < policy.attempts && is_retryable(&err) => {
                tracing::debug!(attempt, error = %err, "audit delivery failed, retrying");
                tokio::time::sleep(policy.backoff).await;
            }
            Err(err) => return failed(attempt, &err),
        }
    }
}

fn is_retryable(err: &ClientError) -> bool {
    err.is_breaker_failure()
}

fn failed(attempts: u32, err: &ClientError) -> DeliveryOutcome {
    tracing::warn!(attempts, error = %err, "audit record not delivered");
    metrics::counter!("audit_delivery_failures_total").increment(1);
    DeliveryOutcome::Failed {
        attempts,
        error: err.to_string(),
    }
}
