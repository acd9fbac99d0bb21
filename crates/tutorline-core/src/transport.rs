use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::endpoint::EndpointConfig;
use crate::state::ChatTurn;

/// Reply shown when the webhook answers 2xx without a usable `reply` field.
pub const PLACEHOLDER_REPLY: &str =
    "Sorry, I couldn't come up with an answer to that. Could you try asking again?";

#[derive(Serialize)]
struct WebhookTurn<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookRequest<'a> {
    message: &'a str,
    history: Vec<WebhookTurn<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_id: Option<&'a str>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct WebhookResponse {
    #[serde(default)]
    reply: Option<String>,
    #[serde(default)]
    thread_id: Option<String>,
}

/// Reply text plus the continuity token, if the webhook handed one back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookReply {
    pub text: String,
    pub thread_id: Option<String>,
    /// Set when `text` is the placeholder because the body had no reply.
    pub placeholder: bool,
}

/// Why a single candidate was skipped.
#[derive(Debug, Error)]
pub enum AttemptFailure {
    #[error("HTTP {status}")]
    Status { status: StatusCode },
    #[error("request failed: {message}")]
    Request { message: String },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("all {attempts} webhook candidates failed, last error: {last}")]
    Exhausted {
        attempts: usize,
        #[source]
        last: AttemptFailure,
    },
    #[error("no webhook candidates configured")]
    NoCandidates,
    #[error("send ended before the webhook answered: {0}")]
    Interrupted(String),
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Deliver `message` with the turns that preceded it.
    async fn send(
        &self,
        endpoint: &EndpointConfig,
        message: &str,
        history: &[ChatTurn],
        thread_id: Option<&str>,
    ) -> Result<WebhookReply, TransportError>;
}

/// POSTs to each candidate in turn until one answers 2xx.
#[derive(Clone, Default)]
pub struct WebhookTransport {
    client: Client,
}

impl WebhookTransport {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn attempt(&self, url: &str, body: &WebhookRequest<'_>) -> Result<String, AttemptFailure> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| AttemptFailure::Request {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(AttemptFailure::Status {
                status: response.status(),
            });
        }

        // The webhook has accepted the message; a broken body must not
        // send it to the next candidate as well.
        match response.text().await {
            Ok(body) => Ok(body),
            Err(e) => {
                warn!(%url, error = %e, "could not read webhook response body");
                Ok(String::new())
            }
        }
    }
}

#[async_trait]
impl ChatTransport for WebhookTransport {
    async fn send(
        &self,
        endpoint: &EndpointConfig,
        message: &str,
        history: &[ChatTurn],
        thread_id: Option<&str>,
    ) -> Result<WebhookReply, TransportError> {
        let body = WebhookRequest {
            message,
            history: history
                .iter()
                .map(|turn| WebhookTurn {
                    role: turn.role.as_str(),
                    content: &turn.text,
                })
                .collect(),
            thread_id,
        };

        let urls = endpoint.candidate_urls();
        let mut last_failure = None;

        for (idx, url) in urls.iter().enumerate() {
            debug!(attempt = idx + 1, total = urls.len(), %url, "posting chat message to webhook");

            match self.attempt(url, &body).await {
                Ok(raw) => return Ok(parse_reply(&raw)),
                Err(failure) => {
                    warn!(attempt = idx + 1, %url, error = %failure, "webhook candidate failed");
                    last_failure = Some(failure);
                }
            }
        }

        match last_failure {
            Some(last) => {
                error!(attempts = urls.len(), error = %last, "every webhook candidate failed");
                Err(TransportError::Exhausted {
                    attempts: urls.len(),
                    last,
                })
            }
            None => Err(TransportError::NoCandidates),
        }
    }
}

/// Soft parse: anything without a non-empty `reply` string becomes the placeholder.
fn parse_reply(raw: &str) -> WebhookReply {
    let parsed: WebhookResponse = match serde_json::from_str(raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, "webhook returned a body that is not the expected JSON");
            WebhookResponse::default()
        }
    };

    let thread_id = parsed.thread_id.filter(|t| !t.is_empty());
    match parsed.reply.filter(|r| !r.trim().is_empty()) {
        Some(text) => WebhookReply {
            text,
            thread_id,
            placeholder: false,
        },
        None => {
            warn!("webhook response had no reply field, substituting placeholder");
            WebhookReply {
                text: PLACEHOLDER_REPLY.to_string(),
                thread_id,
                placeholder: true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{spawn_stub, spawn_truncated_200};
    use serde_json::json;

    #[tokio::test]
    async fn test_first_candidate_success_makes_one_call() {
        let stub = spawn_stub(vec![], json!({"reply": "hello"})).await;
        let transport = WebhookTransport::new();

        let reply = transport
            .send(&stub.endpoint(), "hi", &[], None)
            .await
            .unwrap();

        assert_eq!(reply.text, "hello");
        assert!(!reply.placeholder);
        assert_eq!(stub.called().await, vec!["relay-a"]);
        stub.stop();
    }

    #[tokio::test]
    async fn test_one_failure_then_success_makes_two_calls() {
        let stub = spawn_stub(vec!["relay-a"], json!({"reply": "second relay"})).await;

        let reply = WebhookTransport::new()
            .send(&stub.endpoint(), "hi", &[], None)
            .await
            .unwrap();

        assert_eq!(reply.text, "second relay");
        assert_eq!(stub.called().await, vec!["relay-a", "relay-b"]);
        stub.stop();
    }

    #[tokio::test]
    async fn test_failed_relays_fall_through_to_direct_in_order() {
        let stub = spawn_stub(
            vec!["relay-a", "relay-b"],
            json!({"reply": "direct answer", "threadId": "t-1"}),
        )
        .await;
        let transport = WebhookTransport::new();

        let reply = transport
            .send(&stub.endpoint(), "hi", &[], None)
            .await
            .unwrap();

        assert_eq!(reply.text, "direct answer");
        assert_eq!(reply.thread_id.as_deref(), Some("t-1"));
        assert_eq!(stub.called().await, vec!["relay-a", "relay-b", "direct"]);
        stub.stop();
    }

    #[tokio::test]
    async fn test_all_candidates_failing_reports_last_status() {
        let stub = spawn_stub(vec!["relay-a", "relay-b", "direct"], json!({})).await;
        let transport = WebhookTransport::new();

        let err = transport
            .send(&stub.endpoint(), "hi", &[], None)
            .await
            .unwrap_err();

        match err {
            TransportError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(
                    last,
                    AttemptFailure::Status { status } if status == StatusCode::INTERNAL_SERVER_ERROR
                ));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(stub.called().await.len(), 3);
        stub.stop();
    }

    #[tokio::test]
    async fn test_request_body_carries_history_and_thread() {
        let stub = spawn_stub(vec![], json!({"reply": "ok"})).await;
        let transport = WebhookTransport::new();
        let history = vec![ChatTurn::user("Ping"), ChatTurn::assistant("Pong")];

        transport
            .send(&stub.endpoint(), "next", &history, Some("thread-9"))
            .await
            .unwrap();

        let calls = stub.calls.lock().await.clone();
        let (_, body) = &calls[0];
        assert_eq!(
            body,
            &json!({
                "message": "next",
                "history": [
                    {"role": "user", "content": "Ping"},
                    {"role": "assistant", "content": "Pong"}
                ],
                "threadId": "thread-9"
            })
        );
        stub.stop();
    }

    #[tokio::test]
    async fn test_unreachable_relay_counts_as_failure() {
        let stub = spawn_stub(vec![], json!({"reply": "from direct"})).await;
        let endpoint = EndpointConfig::with_relays(
            format!("{}/hook/direct", stub.base_url),
            // Nothing listens on port 9 locally
            vec!["http://127.0.0.1:9/relay?url=".to_string()],
        );

        let reply = WebhookTransport::new()
            .send(&endpoint, "hi", &[], None)
            .await
            .unwrap();

        assert_eq!(reply.text, "from direct");
        assert_eq!(stub.called().await, vec!["direct"]);
        stub.stop();
    }

    #[tokio::test]
    async fn test_truncated_2xx_body_ends_the_loop_with_placeholder() {
        let stub = spawn_stub(vec![], json!({"reply": "from direct"})).await;
        let relay = spawn_truncated_200().await;
        let endpoint = EndpointConfig::with_relays(
            format!("{}/hook/direct", stub.base_url),
            vec![format!("{}/relay?url=", relay)],
        );

        let reply = WebhookTransport::new()
            .send(&endpoint, "hi", &[], None)
            .await
            .unwrap();

        assert!(reply.placeholder);
        assert_eq!(reply.text, PLACEHOLDER_REPLY);
        assert!(stub.called().await.is_empty());
        stub.stop();
    }

    #[test]
    fn test_missing_reply_field_gives_placeholder() {
        let reply = parse_reply(r#"{"response": "legacy name", "threadId": "t"}"#);
        assert!(reply.placeholder);
        assert_eq!(reply.text, PLACEHOLDER_REPLY);
        assert_eq!(reply.thread_id.as_deref(), Some("t"));
    }

    #[test]
    fn test_non_json_body_gives_placeholder() {
        let reply = parse_reply("<html>gateway</html>");
        assert!(reply.placeholder);
        assert_eq!(reply.thread_id, None);
    }
}
