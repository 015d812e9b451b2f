//! Account integration tests.

mod common;

use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use common::{bearer, bearer_for, mint_token, TestHarness, JWT_SECRET};
use credit_ledger_core::AccountId;
use credit_ledger_service::ServiceConfig;
use serde_json::json;

#[tokio::test]
async fn create_account_grants_allowance_and_signup_bonus() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/accounts")
        .add_header(AUTHORIZATION, harness.user_auth_header())
        .json(&json!({}))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["account_id"], harness.test_account_id.to_string());
    assert_eq!(body["plan"], "free");
    assert_eq!(body["monthly_allowance"], 15);
    assert_eq!(body["balance"], 20);
    assert_eq!(body["is_admin"], false);
}

#[tokio::test]
async fn create_account_on_paid_plan() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/accounts")
        .add_header(AUTHORIZATION, harness.user_auth_header())
        .json(&json!({ "plan": "pro" }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["plan"], "pro");
    assert_eq!(body["balance"], 405);
}

#[tokio::test]
async fn create_account_twice_conflicts() {
    let harness = TestHarness::new();
    harness.open_account().await;

    let response = harness
        .server
        .post("/v1/accounts")
        .add_header(AUTHORIZATION, harness.user_auth_header())
        .json(&json!({}))
        .await;

    response.assert_status(StatusCode::CONFLICT);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "conflict");
}

#[tokio::test]
async fn configured_admin_accounts_open_with_bypass() {
    let admin_id = AccountId::generate();
    let harness = TestHarness::with_config(ServiceConfig {
        admin_account_ids: vec![admin_id],
        ..TestHarness::config()
    });

    let response = harness
        .server
        .post("/v1/accounts")
        .add_header(AUTHORIZATION, bearer_for(&admin_id))
        .json(&json!({}))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["is_admin"], true);
}

#[tokio::test]
async fn get_account_returns_current_state() {
    let harness = TestHarness::new();
    harness.open_account().await;

    let response = harness
        .server
        .get("/v1/accounts/me")
        .add_header(AUTHORIZATION, harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["balance"], 20);
    assert!(body["reset_at"].is_string());
}

#[tokio::test]
async fn get_account_without_account_is_not_found() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/accounts/me")
        .add_header(AUTHORIZATION, harness.user_auth_header())
        .await;

    response.assert_status_not_found();
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let harness = TestHarness::new();

    let response = harness.server.get("/v1/accounts/me").await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn token_signed_with_wrong_secret_is_unauthorized() {
    let harness = TestHarness::new();
    let token = mint_token(
        &harness.test_account_id.to_string(),
        "not-the-secret",
        "identity",
    );

    let response = harness
        .server
        .get("/v1/accounts/me")
        .add_header(AUTHORIZATION, bearer(&token))
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn token_from_wrong_issuer_is_unauthorized() {
    let harness = TestHarness::new();
    let token = mint_token(&harness.test_account_id.to_string(), JWT_SECRET, "elsewhere");

    let response = harness
        .server
        .get("/v1/accounts/me")
        .add_header(AUTHORIZATION, bearer(&token))
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn token_with_non_uuid_subject_is_unauthorized() {
    let harness = TestHarness::new();
    let token = mint_token("not-a-uuid", JWT_SECRET, "identity");

    let response = harness
        .server
        .get("/v1/accounts/me")
        .add_header(AUTHORIZATION, bearer(&token))
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn test_token_prefix_is_not_accepted() {
    let harness = TestHarness::new();
    harness.open_account().await;

    let response = harness
        .server
        .get("/v1/accounts/me")
        .add_header(
            AUTHORIZATION,
            bearer(&format!("test-token:{}", harness.test_account_id)),
        )
        .await;

    response.assert_status_unauthorized();
}
