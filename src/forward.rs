//! HTTP client that relays payloads to the downstream webhook API.
//!
//! Payloads are sent unmodified. Non-success statuses become
//! `GatewayError::Downstream`, transport failures and timeouts become
//! `GatewayError::Network`. Nothing is retried.

use std::time::{Duration, Instant};

use reqwest::{Method, Url};
use serde_json::Value;
use tracing::{Instrument, debug, error, info, info_span};

use crate::error::{GatewayError, Result};
use crate::metrics::DOWNSTREAM_LATENCY;
use crate::models::MessageId;

const USER_AGENT: &str = concat!("webhook-relay/", env!("CARGO_PKG_VERSION"));

/// Settings for the downstream client.
#[derive(Debug, Clone)]
pub struct ForwardingConfig {
    pub base_url: Url,
    pub timeout: Duration,
    /// Log payload size instead of the payload itself.
    pub redact_payloads: bool,
}

#[derive(Debug, Clone)]
pub struct ForwardingClient {
    client: reqwest::Client,
    config: ForwardingConfig,
}

impl ForwardingClient {
    /// # Errors
    ///
    /// Returns `GatewayError::Configuration` if the underlying HTTP client
    /// cannot be built.
    pub fn new(config: ForwardingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                GatewayError::Configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Posts `payload` to the base URL and returns the id the downstream
    /// assigned to the new message.
    pub async fn create(&self, payload: &Value) -> Result<MessageId> {
        let url = self.config.base_url.clone();
        let span = info_span!("downstream_create", host = downstream_host(&url));

        async move {
            let response = self.send("create", Method::POST, url, payload).await?;

            let body: Value = response.json().await.map_err(|e| {
                let e = e.without_url();
                error!(operation = "create", "unreadable downstream response: {e}");
                GatewayError::Downstream {
                    operation: "create",
                    status: e.status().map_or(200, |s| s.as_u16()),
                }
            })?;

            let id = body.get("id").and_then(MessageId::from_json).ok_or_else(|| {
                error!(operation = "create", "downstream response has no message id");
                GatewayError::Downstream { operation: "create", status: 200 }
            })?;

            info!(message_id = %id, "downstream message created");
            Ok(id)
        }
        .instrument(span)
        .await
    }

    /// Patches the message identified by `message_id` with `payload`.
    pub async fn edit(&self, message_id: &str, payload: &Value) -> Result<()> {
        if message_id.is_empty() {
            return Err(GatewayError::validation("Missing messageId."));
        }

        let url = self.edit_url(message_id)?;
        let span = info_span!("downstream_edit", message_id, host = downstream_host(&url));

        async move {
            self.send("edit", Method::PATCH, url, payload).await?;
            info!("downstream message edited");
            Ok(())
        }
        .instrument(span)
        .await
    }

    // {base}/messages/{id}, with the id as a single encoded segment
    fn edit_url(&self, message_id: &str) -> Result<Url> {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                GatewayError::Configuration(format!(
                    "downstream url for {} cannot carry a path",
                    downstream_host(&self.config.base_url)
                ))
            })?
            .pop_if_empty()
            .extend(["messages", message_id]);
        Ok(url)
    }

    async fn send(
        &self,
        operation: &'static str,
        method: Method,
        url: Url,
        payload: &Value,
    ) -> Result<reqwest::Response> {
        if self.config.redact_payloads {
            info!(operation, payload_bytes = payload.to_string().len(), "forwarding payload");
        } else {
            info!(operation, payload = %payload, "forwarding payload");
        }

        let start = Instant::now();
        let result = self.client.request(method, url).json(payload).send().await;
        DOWNSTREAM_LATENCY.observe(start.elapsed().as_secs_f64());

        // reqwest errors carry the full url, which embeds the webhook token
        let response = result.map_err(|e| {
            let e = e.without_url();
            error!(operation, timeout = e.is_timeout(), "downstream call failed: {e}");
            let message = if e.is_timeout() {
                format!("timed out after {}s", self.config.timeout.as_secs())
            } else {
                e.to_string()
            };
            GatewayError::Network { operation, message }
        })?;

        let status = response.status();
        debug!(operation, status = status.as_u16(), "downstream responded");

        if !status.is_success() {
            error!(operation, status = status.as_u16(), "downstream rejected request");
            return Err(GatewayError::Downstream { operation, status: status.as_u16() });
        }

        Ok(response)
    }
}

fn downstream_host(url: &Url) -> &str {
    url.host_str().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    use serde_json::json;
    use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

    use super::*;

    fn client_for(base: &str, timeout: Duration) -> ForwardingClient {
        ForwardingClient::new(ForwardingConfig {
            base_url: Url::parse(base).expect("valid url"),
            timeout,
            redact_payloads: false,
        })
        .expect("client builds")
    }

    #[tokio::test]
    async fn create_sends_payload_verbatim_and_returns_id() {
        let mock_server = MockServer::start().await;
        let payload = json!({"content": "hi", "embeds": [{"title": "t"}]});

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/webhooks/1/abc"))
            .and(matchers::header("content-type", "application/json"))
            .and(matchers::body_json(&payload))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "998877"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = client_for(
            &format!("{}/webhooks/1/abc", mock_server.uri()),
            Duration::from_secs(5),
        );
        let id = client.create(&payload).await.expect("create succeeds");
        assert_eq!(id.as_str(), "998877");
    }

    #[tokio::test]
    async fn create_maps_non_success_to_downstream_error() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Unknown Webhook"))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server.uri(), Duration::from_secs(5));
        let err = client.create(&json!({"content": "hi"})).await.unwrap_err();
        assert!(matches!(err, GatewayError::Downstream { operation: "create", status: 404 }));
    }

    #[tokio::test]
    async fn create_without_id_in_response_is_downstream_error() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server.uri(), Duration::from_secs(5));
        let err = client.create(&json!({})).await.unwrap_err();
        assert!(matches!(err, GatewayError::Downstream { operation: "create", .. }));
    }

    #[tokio::test]
    async fn connection_failure_is_network_error() {
        // nothing listens on the discard port
        let client = client_for("http://127.0.0.1:9/hook", Duration::from_secs(5));
        let err = client.create(&json!({"content": "hi"})).await.unwrap_err();
        assert!(matches!(err, GatewayError::Network { operation: "create", .. }));
    }

    #[tokio::test]
    async fn slow_downstream_times_out_as_network_error() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "1"}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server.uri(), Duration::from_millis(100));
        let err = client.create(&json!({"content": "hi"})).await.unwrap_err();
        match err {
            GatewayError::Network { operation, message } => {
                assert_eq!(operation, "create");
                assert!(message.contains("timed out"));
            }
            other => panic!("expected network error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn edit_patches_message_path() {
        let mock_server = MockServer::start().await;
        let payload = json!({"content": "edited"});

        Mock::given(matchers::method("PATCH"))
            .and(matchers::path("/webhooks/1/abc/messages/555"))
            .and(matchers::body_json(&payload))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "555"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = client_for(
            &format!("{}/webhooks/1/abc", mock_server.uri()),
            Duration::from_secs(5),
        );
        client.edit("555", &payload).await.expect("edit succeeds");
    }

    #[tokio::test]
    async fn edit_maps_non_success_to_downstream_error() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("PATCH"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server.uri(), Duration::from_secs(5));
        let err = client.edit("1", &json!({})).await.unwrap_err();
        assert!(matches!(err, GatewayError::Downstream { operation: "edit", status: 500 }));
    }

    #[tokio::test]
    async fn edit_requires_message_id() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server.uri(), Duration::from_secs(5));
        let err = client.edit("", &json!({"content": "x"})).await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().expect("log buffer")).into_owned()
        }
    }

    impl Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("log buffer").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn logs_never_contain_webhook_token() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("PATCH"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let token = "SUPERSECRETTOKEN";
        let unreachable = client_for(
            &format!("http://127.0.0.1:9/api/webhooks/1/{token}"),
            Duration::from_secs(5),
        );
        let err = unreachable.create(&json!({"content": "hi"})).await.unwrap_err();
        match &err {
            GatewayError::Network { message, .. } => assert!(!message.contains(token)),
            other => panic!("expected network error, got {other:?}"),
        }

        let rejecting = client_for(
            &format!("{}/api/webhooks/1/{token}", mock_server.uri()),
            Duration::from_secs(5),
        );
        let err = rejecting.edit("42", &json!({"content": "hi"})).await.unwrap_err();
        assert!(matches!(err, GatewayError::Downstream { operation: "edit", status: 500 }));

        let captured = logs.contents();
        assert!(captured.contains("forwarding payload"));
        assert!(captured.contains("127.0.0.1"));
        assert!(!captured.contains(token), "token leaked into logs:\n{captured}");
    }

    #[test]
    fn edit_url_encodes_message_id_as_one_segment() {
        let client = client_for("https://example.com/api/webhooks/1/tok", Duration::from_secs(1));
        let url = client.edit_url("a/b").expect("url builds");
        assert_eq!(url.as_str(), "https://example.com/api/webhooks/1/tok/messages/a%2Fb");

        let trailing = client_for("https://example.com/hook/", Duration::from_secs(1));
        let url = trailing.edit_url("7").expect("url builds");
        assert_eq!(url.as_str(), "https://example.com/hook/messages/7");
    }
}
