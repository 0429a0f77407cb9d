//! # HTTP Retrieval Utilities
//!
//! An asynchronous API client wrapper around `reqwest` with exponential backoff
//! retries for transient failures (connection errors, timeouts, 5xx). Responses
//! are returned whole; the caller decides which status it considers a success.

use std::time::Duration;

use anyhow::Context;
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{de::DeserializeOwned, Serialize};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A received HTTP response.
#[derive(Debug)]
pub struct ApiResponse {
    /// The HTTP status.
    pub status: StatusCode,
    /// The headers returned by the server.
    pub headers: HeaderMap,
    /// The raw body; `None` when the server sent nothing.
    pub body: Option<String>,
}

impl ApiResponse {
    /// Indicates if the status code was in the 2xx range.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Deserializes the body as JSON. An empty body yields `None`.
    ///
    /// # Errors
    /// Returns an error when the body is present but not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> anyhow::Result<Option<T>> {
        self.body
            .as_deref()
            .map(|raw| serde_json::from_str(raw).context("response body is not the expected JSON"))
            .transpose()
    }
}

/// A flexible asynchronous HTTP client.
///
/// Built on top of `reqwest_middleware`, it handles base URLs,
/// authentication tokens, and automatic retries.
#[derive(Debug, Clone)]
pub struct ApiClient {
    /// The underlying middleware-enabled client.
    inner: ClientWithMiddleware,
    /// The base URL to which all relative paths are joined.
    base_url: Url,
    /// An optional Bearer token used for authorization.
    auth_token: Option<String>,
}

impl ApiClient {
    /// Creates a new `ApiClient` with `max_retries` transient retries.
    ///
    /// # Arguments
    /// * `base_url` - The absolute base URL for the API (e.g., "https://api.example.com/v1/").
    /// * `auth_token` - An optional string for the Authorization header.
    /// * `max_retries` - Retries for transient failures; `0` disables them.
    ///
    /// # Errors
    /// Fails if `base_url` is not a valid absolute URL.
    pub fn new(base_url: &str, auth_token: Option<String>, max_retries: u32) -> anyhow::Result<Self> {
        Self::with_timeout(base_url, auth_token, max_retries, DEFAULT_TIMEOUT)
    }

    /// Same as [`ApiClient::new`] with an explicit per-request timeout.
    pub fn with_timeout(
        base_url: &str,
        auth_token: Option<String>,
        max_retries: u32,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let url = Url::parse(base_url).with_context(|| format!("invalid base URL '{base_url}' (must be absolute)"))?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let client = ClientBuilder::new(http)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner: client,
            base_url: url,
            auth_token,
        })
    }

    /// The base URL relative paths are joined to.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs an HTTP request and returns the response, whatever its status.
    ///
    /// # Arguments
    /// * `method` - The HTTP verb (GET, POST, etc.).
    /// * `path` - The relative path to append to the base URL.
    /// * `headers` - Optional additional headers for this specific request.
    /// * `body` - Optional serializable object to send as the JSON body.
    ///
    /// # Errors
    /// Returns an `anyhow::Error` if URL joining, serialization or network
    /// execution fails after all retries.
    pub async fn request<B>(
        &self,
        method: Method,
        path: &str,
        headers: Option<HeaderMap>,
        body: Option<&B>,
    ) -> anyhow::Result<ApiResponse>
    where
        B: Serialize + ?Sized,
    {
        let full_url = self.base_url.join(path)?;
        let mut req = self.inner.request(method, full_url);

        if let Some(h) = headers {
            req = req.headers(h);
        }

        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        if let Some(b) = body {
            let json_body = serde_json::to_string(b)?;
            req = req.header(CONTENT_TYPE, "application/json").body(json_body);
        }

        let response: reqwest::Response = req.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await?;

        Ok(ApiResponse {
            status,
            headers,
            body: (!text.is_empty()).then_some(text),
        })
    }

    /// Posts `body` as JSON to `path`.
    pub async fn post_json<B>(&self, path: &str, body: &B) -> anyhow::Result<ApiResponse>
    where
        B: Serialize + ?Sized,
    {
        self.request(Method::POST, path, None, Some(body)).await
    }
}
