//! Common test utilities for credit ledger integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use axum_test::TestServer;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;

use credit_ledger_core::AccountId;
use credit_ledger_service::auth::JwtClaims;
use credit_ledger_service::crypto::hmac_sha256_hex;
use credit_ledger_service::{create_router, AppState, ServiceConfig};
use credit_ledger_store::MemoryStore;

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const SERVICE_API_KEY: &str = "test-service-key";
pub const ADMIN_API_KEY: &str = "test-admin-key";
pub const WEBHOOK_SECRET: &str = "test-webhook-secret";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// A test account ID for authenticated requests.
    pub test_account_id: AccountId,
}

impl TestHarness {
    /// Create a harness over a fresh in-memory store.
    pub fn new() -> Self {
        Self::with_config(Self::config())
    }

    /// The configuration used by [`TestHarness::new`].
    pub fn config() -> ServiceConfig {
        ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            auth_jwt_secret: Some(JWT_SECRET.into()),
            service_api_key: Some(SERVICE_API_KEY.into()),
            admin_api_key: Some(ADMIN_API_KEY.into()),
            payment_webhook_secret: Some(WEBHOOK_SECRET.into()),
            ..ServiceConfig::default()
        }
    }

    /// Create a harness with a custom configuration.
    pub fn with_config(config: ServiceConfig) -> Self {
        let state = AppState::new(Arc::new(MemoryStore::new()), config);
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            test_account_id: AccountId::generate(),
        }
    }

    /// Authorization header for the test account.
    pub fn user_auth_header(&self) -> HeaderValue {
        bearer_for(&self.test_account_id)
    }

    /// Open the test account on the free plan.
    pub async fn open_account(&self) {
        self.server
            .post("/v1/accounts")
            .add_header(AUTHORIZATION, self.user_auth_header())
            .json(&json!({}))
            .await
            .assert_status_ok();
    }

    /// Current balance of the test account.
    pub async fn balance(&self) -> i64 {
        let response = self
            .server
            .get("/v1/credits/balance")
            .add_header(AUTHORIZATION, self.user_auth_header())
            .await;
        response.assert_status_ok();
        response.json::<serde_json::Value>()["balance"]
            .as_i64()
            .expect("balance is a number")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Mint a bearer header for `account_id`, signed with the harness secret.
pub fn bearer_for(account_id: &AccountId) -> HeaderValue {
    bearer(&mint_token(&account_id.to_string(), JWT_SECRET, "identity"))
}

/// `Bearer <token>` header value.
pub fn bearer(token: &str) -> HeaderValue {
    value(&format!("Bearer {token}"))
}

/// Header value from a string.
pub fn value(s: &str) -> HeaderValue {
    HeaderValue::from_str(s).expect("Invalid header value")
}

pub fn api_key_header() -> HeaderName {
    HeaderName::from_static("x-api-key")
}

pub fn admin_key_header() -> HeaderName {
    HeaderName::from_static("x-admin-key")
}

pub fn signature_header() -> HeaderName {
    HeaderName::from_static("x-signature")
}

/// Mint an HS256 token.
pub fn mint_token(sub: &str, secret: &str, issuer: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = JwtClaims {
        sub: sub.to_string(),
        aud: Some(json!("credit-ledger")),
        iss: issuer.to_string(),
        exp: now + 3600,
        iat: Some(now),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("Failed to sign token")
}

/// Signature header value for a webhook body.
pub fn sign(body: &str) -> HeaderValue {
    value(&hmac_sha256_hex(WEBHOOK_SECRET, body.as_bytes()))
}
