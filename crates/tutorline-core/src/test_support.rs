//! Local stand-in for the chat webhook and its relays.
//!
//! Every candidate is served by one axum router under `/hook/<name>`; the
//! stub records which candidate was hit, in order, along with the JSON body.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};

use crate::endpoint::EndpointConfig;

#[derive(Clone)]
struct StubState {
    // Candidates named here answer 500
    failing: Arc<Vec<&'static str>>,
    reply: Value,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
}

pub(crate) struct WebhookStub {
    pub(crate) base_url: String,
    pub(crate) calls: Arc<Mutex<Vec<(String, Value)>>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl WebhookStub {
    /// Two relays (`relay-a`, `relay-b`) in front of `direct`.
    pub(crate) fn endpoint(&self) -> EndpointConfig {
        EndpointConfig::with_relays(
            format!("{}/hook/direct", self.base_url),
            vec![
                format!("{}/hook/relay-a?url=", self.base_url),
                format!("{}/hook/relay-b?url=", self.base_url),
            ],
        )
    }

    pub(crate) async fn called(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub(crate) fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

pub(crate) async fn spawn_stub(failing: Vec<&'static str>, reply: Value) -> WebhookStub {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let state = StubState {
        failing: Arc::new(failing),
        reply,
        calls: calls.clone(),
    };
    let app = Router::new()
        .route("/hook/:candidate", post(handle_hook))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        let _ = server.await;
    });

    WebhookStub {
        base_url: format!("http://{addr}"),
        calls,
        shutdown: Some(shutdown_tx),
    }
}

async fn handle_hook(
    State(state): State<StubState>,
    Path(candidate): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.calls.lock().await.push((candidate.clone(), body));
    if state.failing.iter().any(|name| *name == candidate) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "boom"})),
        );
    }
    (StatusCode::OK, Json(state.reply.clone()))
}

/// Raw TCP listener that answers every connection with a 200 whose body is
/// cut short of its declared `Content-Length`. Returns the base URL.
pub(crate) async fn spawn_truncated_200() -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 100\r\n\r\n{\"re",
                )
                .await;
            let _ = socket.shutdown().await;
        }
    });

    format!("http://{addr}")
}
