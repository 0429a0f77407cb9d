//! # HTTP Transport Sender
//!
//! Sends payload bodies through the retrying `ApiClient` and maps each answer
//! to an `Outcome`. The payload's correlation token travels in the
//! `x-correlation-id` header.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Serialize;

use crate::core::dispatcher::{Outcome, TransportSender};
use crate::core::payload::Payload;
use crate::retrieve::ky_http::ApiClient;

/// Header carrying the payload's correlation token.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// # HTTP Sender
///
/// Sends each payload body as a JSON request to one endpoint. The response is
/// a `Success` when its status equals the expected one (`201 Created` by
/// default) and a `Rejected` otherwise. Network errors that survive the
/// client's retries are faults.
#[derive(Debug, Clone)]
pub struct HttpSender {
    client: ApiClient,
    path: String,
    method: Method,
    expected: StatusCode,
}

impl HttpSender {
    /// Posts to `path` relative to the client's base URL.
    pub fn new(client: ApiClient, path: impl Into<String>) -> Self {
        Self {
            client,
            path: path.into(),
            method: Method::POST,
            expected: StatusCode::CREATED,
        }
    }

    /// Uses another status as the success criterion.
    pub fn expect_status(mut self, expected: StatusCode) -> Self {
        self.expected = expected;
        self
    }

    /// Uses another HTTP verb.
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// The status treated as success.
    pub fn expected(&self) -> StatusCode {
        self.expected
    }

    fn headers_for<B>(payload: &Payload<B>) -> Option<HeaderMap> {
        let token = payload.correlation.as_deref()?;
        let value = match HeaderValue::from_str(token) {
            Ok(value) => value,
            Err(e) => {
                log::warn!(
                    "Payload {} sent without {CORRELATION_HEADER}: token {token:?} is not a valid header value ({e})",
                    payload.id
                );
                return None;
            }
        };
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static(CORRELATION_HEADER), value);
        Some(headers)
    }
}

impl<B> TransportSender<B> for HttpSender
where
    B: Serialize + Sync,
{
    async fn send(&self, payload: &Payload<B>) -> anyhow::Result<Outcome> {
        let response = self
            .client
            .request(
                self.method.clone(),
                &self.path,
                Self::headers_for(payload),
                Some(&payload.body),
            )
            .await?;
        let outcome = Outcome::from_status(response.status, self.expected);
        if !outcome.is_success() {
            log::debug!(
                "Payload {} got status {} (body: {})",
                payload.id,
                response.status,
                response.body.as_deref().unwrap_or("")
            );
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn payload() -> Payload<serde_json::Value> {
        let mut p = Payload::new(7, json!({ "title": "Quarterly report" }));
        p.correlation = Some("c0ffee".into());
        p
    }

    async fn sender_for(server: &MockServer) -> HttpSender {
        HttpSender::new(ApiClient::new(&server.uri(), None, 0).unwrap(), "/documents")
    }

    #[tokio::test]
    async fn test_expected_status_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/documents"))
            .and(header(CORRELATION_HEADER, "c0ffee"))
            .and(body_json(json!({ "title": "Quarterly report" })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = sender_for(&server).await.send(&payload()).await.unwrap();

        assert_eq!(
            outcome,
            Outcome::Success {
                status: StatusCode::CREATED
            }
        );
    }

    #[tokio::test]
    async fn test_other_status_is_a_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(409).set_body_string("duplicate"))
            .mount(&server)
            .await;

        let outcome = sender_for(&server).await.send(&payload()).await.unwrap();

        assert_eq!(outcome, Outcome::rejected(StatusCode::CONFLICT, StatusCode::CREATED));
    }

    #[tokio::test]
    async fn test_expected_status_is_configurable() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let sender = sender_for(&server)
            .await
            .with_method(Method::PUT)
            .expect_status(StatusCode::OK);

        assert!(sender.send(&payload()).await.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_invalid_correlation_token_is_left_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        let mut p = payload();
        p.correlation = Some("line\nbreak".into());

        let outcome = sender_for(&server).await.send(&p).await.unwrap();

        assert!(outcome.is_success());
        let received = server.received_requests().await.unwrap();
        assert!(received[0].headers.get(CORRELATION_HEADER).is_none());
        assert!(HttpSender::headers_for(&payload()).is_some());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_a_fault() {
        let client = ApiClient::new("http://127.0.0.1:9/", None, 0).unwrap();
        let sender = HttpSender::new(client, "/documents");

        assert!(sender.send(&payload()).await.is_err());
    }
}
