use std::time::Duration;

use reqwest::{Client, StatusCode, Url, header};
use thiserror::Error;

use crate::payload::ConfigPayload;

#[derive(Debug, Clone)]
pub struct ConfigClient {
    client: Client,
    endpoint: Url,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to configuration endpoint failed: {0}")]
    Network(#[source] reqwest::Error),
    #[error("configuration endpoint returned HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("configuration payload is malformed: {0}")]
    Malformed(#[source] reqwest::Error),
}

impl ConfigClient {
    pub fn new(endpoint: Url, user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let mut default_headers = header::HeaderMap::new();
        if let Ok(value) = header::HeaderValue::from_str(user_agent) {
            default_headers.insert(header::USER_AGENT, value);
        }
        default_headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .build()
            .map_err(FetchError::Network)?;

        Ok(Self { client, endpoint })
    }

    pub async fn fetch(&self) -> Result<ConfigPayload, FetchError> {
        tracing::debug!(endpoint = %self.endpoint, "loading configuration");
        let response = self
            .client
            .get(self.endpoint.clone())
            .send()
            .await
            .map_err(FetchError::Network)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unavailable>".to_string());
            return Err(FetchError::Status { status, body });
        }

        response
            .json::<ConfigPayload>()
            .await
            .map_err(FetchError::Malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client_for(server: &MockServer) -> ConfigClient {
        let url = Url::parse(&server.url("/api/config")).unwrap();
        ConfigClient::new(url, "sitegate-test", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn parses_payload() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/config");
                then.status(200).json_body(serde_json::json!({
                    "apiKey": "key",
                    "authDomain": "demo.firebaseapp.com",
                    "projectId": "demo",
                    "appId": "1:2:web:3"
                }));
            })
            .await;

        let payload = client_for(&server).fetch().await.unwrap();
        assert_eq!(payload.api_key.as_deref(), Some("key"));
        assert_eq!(payload.app_id.as_deref(), Some("1:2:web:3"));
        assert!(payload.storage_bucket.is_none());
    }

    #[tokio::test]
    async fn reports_http_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/config");
                then.status(500).body("boom");
            })
            .await;

        match client_for(&server).fetch().await.unwrap_err() {
            FetchError::Status { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body, "boom");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reports_malformed_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/config");
                then.status(200).body("<html>not json</html>");
            })
            .await;

        let err = client_for(&server).fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)), "got {err:?}");
    }
}
