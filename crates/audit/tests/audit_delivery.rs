use std::sync::Arc;
use std::time::Duration;

use audit::{AuditSink, AuditStatus, DeliveryOutcome, DeliveryPolicy};
use httpmock::prelude::*;
use resilience::{BreakerConfig, BreakerRegistry, Destination, ServiceClient};
use serde_json::json;

fn sink_for(base_url: &str, attempts: u32) -> AuditSink {
    let registry = Arc::new(BreakerRegistry::new(BreakerConfig::new(
        10,
        Duration::from_secs(30),
    )));
    let client = ServiceClient::builder()
        .destination(Destination::Audit, base_url)
        .timeout(Duration::from_millis(500))
        .breakers(registry)
        .build()
        .unwrap();
    AuditSink::new(client, "sales_service").with_policy(DeliveryPolicy {
        attempts,
        backoff: Duration::from_millis(10),
    })
}

#[tokio::test]
async fn test_record_is_posted_with_expected_payload() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/audit_logs").json_body(json!({
                "service": "sales_service",
                "operation": "purchase",
                "status": "success",
                "user": "alice",
                "details": "good 1 x2",
            }));
            then.status(201);
        })
        .await;

    let outcome = sink_for(&server.base_url(), 3)
        .log(
            "purchase",
            AuditStatus::Success,
            Some("alice"),
            Some("good 1 x2"),
        )
        .outcome()
        .await;

    assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 1 });
    mock.assert_async().await;
}

#[tokio::test]
async fn test_server_errors_are_retried_up_to_policy() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/audit_logs");
            then.status(500);
        })
        .await;

    let outcome = sink_for(&server.base_url(), 3)
        .log("purchase", AuditStatus::Error, None, None)
        .outcome()
        .await;

    assert!(matches!(outcome, DeliveryOutcome::Failed { attempts: 3, .. }));
    assert_eq!(mock.hits_async().await, 3);
}

#[tokio::test]
async fn test_rejected_record_is_not_retried() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/audit_logs");
            then.status(400).json_body(json!({ "error": "bad record" }));
        })
        .await;

    let outcome = sink_for(&server.base_url(), 3)
        .log("purchase", AuditStatus::Success, None, None)
        .outcome()
        .await;

    assert!(matches!(outcome, DeliveryOutcome::Failed { attempts: 1, .. }));
    assert_eq!(mock.hits_async().await, 1);
}

#[tokio::test]
async fn test_unreachable_audit_service_fails_quietly() {
    let outcome = sink_for("http://127.0.0.1:9", 2)
        .log("purchase", AuditStatus::Success, Some("alice"), None)
        .outcome()
        .await;

    match outcome {
        DeliveryOutcome::Failed { attempts, .. } => assert_eq!(attempts, 2),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_dropped_handle_still_delivers() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/audit_logs");
            then.status(201);
        })
        .await;

    drop(sink_for(&server.base_url(), 1).log("startup", AuditStatus::Success, None, None));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while mock.hits_async().await == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(mock.hits_async().await, 1);
}
