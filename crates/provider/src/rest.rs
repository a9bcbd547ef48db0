//! Generic REST capability and its reqwest-backed client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use crate::{Provider, ProviderError};

/// Upper bound on any single request; cancellation can cut it shorter.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a dispatched REST request.
///
/// The status is passed through untranslated; mapping it onto the action
/// error taxonomy is the caller's concern.
#[derive(Debug, Clone)]
pub struct RestResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body, `Value::Null` when empty or not JSON.
    pub body: Value,
}

impl RestResponse {
    /// Whether the status is in the 2xx range.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// REST capability: dispatch a single request against the provider's API.
#[async_trait]
pub trait Rest: Send + Sync {
    /// Base URL requests are resolved against, without a trailing slash.
    fn base_url(&self) -> &str;

    /// Execute `method` against `endpoint` (a path relative to the base URL)
    /// with an optional JSON body.
    ///
    /// Non-2xx statuses are returned in the [`RestResponse`], not as errors;
    /// only transport failures produce an `Err`.
    async fn do_request(
        &self,
        method: &str,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<RestResponse, ProviderError>;
}

/// reqwest-backed REST client for plain HTTP providers.
#[derive(Debug, Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
    name: String,
}

impl RestClient {
    /// Create a client for `base_url`, optionally authenticating every
    /// request with a bearer token.
    pub fn new(name: &str, base_url: &str, token: Option<&str>) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("warden"));
        if let Some(token) = token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|_| ProviderError::Config("invalid bearer token".to_string()))?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            name: name.to_string(),
        })
    }
}

#[async_trait]
impl Rest for RestClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn do_request(
        &self,
        method: &str,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<RestResponse, ProviderError> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| ProviderError::Config(format!("invalid HTTP method: {method}")))?;
        let url = format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'));

        debug!(method = %method, url = %url, "dispatching REST request");

        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);

        Ok(RestResponse { status, body })
    }
}

impl Provider for RestClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_rest(&self) -> Option<&dyn Rest> {
        Some(self)
    }
}
