//! Payment webhook integration tests.

mod common;

use common::{sign, signature_header, value, TestHarness};
use credit_ledger_service::ServiceConfig;
use serde_json::json;

fn payment(harness: &TestHarness, payment_id: &str, pack: &str) -> String {
    json!({
        "event_type": "payment.succeeded",
        "payment_id": payment_id,
        "account_id": harness.test_account_id,
        "pack": pack
    })
    .to_string()
}

#[tokio::test]
async fn signed_payment_fulfils_pack() {
    let harness = TestHarness::new();
    harness.open_account().await;
    let body = payment(&harness, "pay_1", "medium");

    let response = harness
        .server
        .post("/webhooks/payments")
        .add_header(signature_header(), sign(&body))
        .text(body)
        .await;

    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    assert_eq!(json["received"], true);
    assert!(json.get("duplicate").is_none());
    assert_eq!(harness.balance().await, 170);
}

#[tokio::test]
async fn replayed_payment_is_acknowledged_once() {
    let harness = TestHarness::new();
    harness.open_account().await;
    let body = payment(&harness, "pay_1", "small");

    for _ in 0..2 {
        harness
            .server
            .post("/webhooks/payments")
            .add_header(signature_header(), sign(&body))
            .text(body.clone())
            .await
            .assert_status_ok();
    }

    let response = harness
        .server
        .post("/webhooks/payments")
        .add_header(signature_header(), sign(&body))
        .text(body.clone())
        .await;
    let json: serde_json::Value = response.json();
    assert_eq!(json["duplicate"], true);
    assert_eq!(harness.balance().await, 70);
}

#[tokio::test]
async fn prefixed_signature_is_accepted() {
    let harness = TestHarness::new();
    harness.open_account().await;
    let body = payment(&harness, "pay_1", "small");
    let signature = format!("sha256={}", sign(&body).to_str().unwrap());

    harness
        .server
        .post("/webhooks/payments")
        .add_header(signature_header(), value(&signature))
        .text(body)
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn bad_signature_is_unauthorized() {
    let harness = TestHarness::new();
    harness.open_account().await;
    let body = payment(&harness, "pay_1", "small");

    let response = harness
        .server
        .post("/webhooks/payments")
        .add_header(signature_header(), value(&"0".repeat(64)))
        .text(body)
        .await;

    response.assert_status_unauthorized();
    assert_eq!(harness.balance().await, 20);
}

#[tokio::test]
async fn missing_signature_is_unauthorized() {
    let harness = TestHarness::new();
    let body = payment(&harness, "pay_1", "small");

    let response = harness.server.post("/webhooks/payments").text(body).await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn webhook_is_disabled_without_secret() {
    let harness = TestHarness::with_config(ServiceConfig {
        payment_webhook_secret: None,
        ..TestHarness::config()
    });
    harness.open_account().await;
    let body = payment(&harness, "pay_1", "small");

    let response = harness
        .server
        .post("/webhooks/payments")
        .add_header(signature_header(), sign(&body))
        .text(body)
        .await;

    response.assert_status_unauthorized();
    assert_eq!(harness.balance().await, 20);
}

#[tokio::test]
async fn unknown_pack_is_bad_request() {
    let harness = TestHarness::new();
    harness.open_account().await;
    let body = payment(&harness, "pay_1", "jumbo");

    let response = harness
        .server
        .post("/webhooks/payments")
        .add_header(signature_header(), sign(&body))
        .text(body)
        .await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn other_events_are_acknowledged() {
    let harness = TestHarness::new();
    let body = json!({ "event_type": "payment.refunded", "payment_id": "pay_1" }).to_string();

    let response = harness
        .server
        .post("/webhooks/payments")
        .add_header(signature_header(), sign(&body))
        .text(body)
        .await;

    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    assert_eq!(json["received"], true);
}
