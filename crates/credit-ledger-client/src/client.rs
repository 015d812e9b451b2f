//! Ledger HTTP client implementation.

use reqwest::{Client, RequestBuilder, StatusCode};
use std::time::Duration;

use credit_ledger_core::{AccountId, GenerationType};

use crate::error::ClientError;
use crate::types::{
    ApiErrorResponse, BalanceResponse, CheckResponse, DeductResponse, FreeCheckRequest,
    FreeCheckResponse, FreeRecordRequest, UsageRequest,
};

/// Credit ledger API client.
///
/// Service-key calls carry `x-api-key` and `x-service-name`; `get_balance`
/// forwards a user's JWT instead.
#[derive(Debug, Clone)]
pub struct LedgerClient {
    client: Client,
    base_url: String,
    api_key: String,
    service_name: String,
}

impl LedgerClient {
    /// Create a new ledger client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the ledger service (e.g., `"http://credit-ledger:8080"`)
    /// * `api_key` - Service API key for authentication
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Http` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_options(base_url, api_key, ClientOptions::default())
    }

    /// Create a new ledger client with custom options.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Http` if the HTTP client cannot be built.
    pub fn with_options(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            service_name: options.service_name,
        })
    }

    /// Check whether an account can pay for a feature.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn check_credits(
        &self,
        account_id: AccountId,
        feature: impl Into<String>,
        duration_seconds: Option<u32>,
    ) -> Result<CheckResponse, ClientError> {
        let request = UsageRequest {
            account_id,
            feature: feature.into(),
            duration_seconds,
        };
        let response = self
            .service_post("/v1/usage/check")
            .json(&request)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Charge an account after a successful generation.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InsufficientBalance` if the balance no longer
    /// covers the cost, or another error if the request fails.
    pub async fn deduct_credits(
        &self,
        account_id: AccountId,
        feature: impl Into<String>,
        duration_seconds: Option<u32>,
    ) -> Result<DeductResponse, ClientError> {
        let request = UsageRequest {
            account_id,
            feature: feature.into(),
            duration_seconds,
        };
        let response = self
            .service_post("/v1/usage/deduct")
            .json(&request)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Check whether an anonymous caller may generate.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn check_free_generation(
        &self,
        ip_address: impl Into<String>,
        generation_type: GenerationType,
    ) -> Result<FreeCheckResponse, ClientError> {
        let request = FreeCheckRequest {
            ip_address: ip_address.into(),
            generation_type,
        };
        let response = self
            .service_post("/v1/anonymous/check")
            .json(&request)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Record one successful anonymous generation.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn record_free_generation(
        &self,
        ip_address: impl Into<String>,
        fingerprint: Option<String>,
        generation_type: GenerationType,
    ) -> Result<(), ClientError> {
        let request = FreeRecordRequest {
            ip_address: ip_address.into(),
            fingerprint,
            generation_type,
        };
        let response = self
            .service_post("/v1/anonymous/record")
            .json(&request)
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(());
        }
        Err(Self::error_from(response).await)
    }

    /// Get a user's balance (requires the user's JWT, not the service API key).
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn get_balance(&self, user_jwt: &str) -> Result<BalanceResponse, ClientError> {
        let url = format!("{}/v1/credits/balance", self.base_url);

        let response = self
            .client
            .get(&url)
            .header("authorization", format!("Bearer {user_jwt}"))
            .send()
            .await?;

        Self::handle_response(response).await
    }

    fn service_post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(format!("{}{path}", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
    }

    /// Decode a success body or convert the error response.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        if response.status().is_success() {
            return Ok(response.json().await?);
        }
        Err(Self::error_from(response).await)
    }

    async fn error_from(response: reqwest::Response) -> ClientError {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return ClientError::Unauthorized;
        }

        let Ok(api_error) = response.json::<ApiErrorResponse>().await else {
            return ClientError::Api {
                code: "unknown".to_string(),
                message: format!("HTTP {status}"),
                status: status.as_u16(),
            };
        };

        let body = api_error.error;
        let detail = |key: &str| {
            body.details
                .as_ref()
                .and_then(|d| d.get(key))
                .and_then(serde_json::Value::as_i64)
                .unwrap_or(0)
        };

        match body.code.as_str() {
            "insufficient_balance" => ClientError::InsufficientBalance {
                balance: detail("balance"),
                required: detail("required"),
            },
            "not_found" => ClientError::AccountNotFound {
                message: body.message,
            },
            _ => {
                tracing::debug!(code = %body.code, status = status.as_u16(), "Ledger API error");
                ClientError::Api {
                    code: body.code.clone(),
                    message: body.message,
                    status: status.as_u16(),
                }
            }
        }
    }
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 10).
    pub timeout_seconds: u64,
    /// Service name to include in requests.
    pub service_name: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 10,
            service_name: "unknown".to_string(),
        }
    }
}

impl ClientOptions {
    /// Create options with a service name.
    #[must_use]
    pub fn with_service_name(name: impl Into<String>) -> Self {
        Self {
            service_name: name.into(),
            ..Self::default()
        }
    }
}
