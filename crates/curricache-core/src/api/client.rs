//! API client for the curriculum backend.
//!
//! This module provides the `ApiClient` struct, the HTTP implementation of
//! [`CurriculumSource`]. Every endpoint answers with the
//! `{success, data, error}` envelope.

use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::source::{CurriculumSource, RemoteResponse};
use super::ApiError;
use crate::models::{Curriculum, ModuleCompletion};

// ============================================================================
// Constants
// ============================================================================

/// Default HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Timeout for connectivity probes, kept short so going offline is noticed quickly.
const PING_TIMEOUT_SECS: u64 = 5;

/// API client for the curriculum backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self {
            client,
            base_url,
            token: None,
        })
    }

    /// Set the bearer token for authenticated requests
    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    /// Create a new ApiClient with the given token, sharing the connection pool.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: Some(token),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn auth_headers(&self) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        if let Some(ref token) = self.token {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ApiError::InvalidResponse(format!("Invalid token header: {}", e)))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );
        Ok(headers)
    }

    /// Check if response is successful.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// GET an enveloped endpoint, retrying with exponential backoff on 429.
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ApiError> {
        let url = self.url(path);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self
                .client
                .get(&url)
                .headers(self.auth_headers()?)
                .send()
                .await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    let text = response.text().await?;
                    let envelope: RemoteResponse<T> = serde_json::from_str(&text).map_err(|e| {
                        ApiError::InvalidResponse(format!("Failed to parse response from {}: {}", url, e))
                    })?;
                    return envelope.into_result();
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }

    /// Whether the backend answers at all. Any HTTP status counts as reachable.
    pub async fn ping(&self) -> bool {
        let result = self
            .client
            .head(&self.base_url)
            .timeout(Duration::from_secs(PING_TIMEOUT_SECS))
            .send()
            .await;
        match result {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "Connectivity probe failed");
                false
            }
        }
    }

    // ===== Data Fetching Methods =====

    pub async fn fetch_user_curricula(&self, user_id: &str) -> Result<Vec<Curriculum>, ApiError> {
        let curricula: Vec<Curriculum> = self
            .get(&format!("/users/{}/curricula", user_id))
            .await?
            .unwrap_or_default();
        debug!(user_id, count = curricula.len(), "Fetched user curricula");
        Ok(curricula)
    }

    pub async fn fetch_curriculum_by_id(&self, id: &str) -> Result<Option<Curriculum>, ApiError> {
        self.get(&format!("/curricula/{}", id)).await
    }

    pub async fn fetch_all_module_completions(
        &self,
        user_id: &str,
    ) -> Result<Vec<ModuleCompletion>, ApiError> {
        let completions: Vec<ModuleCompletion> = self
            .get(&format!("/users/{}/module-completions", user_id))
            .await?
            .unwrap_or_default();
        debug!(user_id, count = completions.len(), "Fetched module completions");
        Ok(completions)
    }
}

impl CurriculumSource for ApiClient {
    fn fetch_user_curricula<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Curriculum>, ApiError>> {
        ApiClient::fetch_user_curricula(self, user_id).boxed()
    }

    fn fetch_curriculum_by_id<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Curriculum>, ApiError>> {
        ApiClient::fetch_curriculum_by_id(self, id).boxed()
    }

    fn fetch_all_module_completions<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ModuleCompletion>, ApiError>> {
        ApiClient::fetch_all_module_completions(self, user_id).boxed()
    }
}
