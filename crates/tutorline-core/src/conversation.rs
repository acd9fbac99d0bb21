//! Conversation controller: one session's turns, flags and continuity token.
//!
//! A send is split in three so a UI can keep drawing while the request is in
//! flight: [`Conversation::begin_send`] mutates the session synchronously,
//! [`PendingSend::dispatch`] is the awaitable webhook call (spawnable on its
//! own task), and [`Conversation::complete`] applies the outcome.
//! [`Conversation::send_message`] runs all three back to back.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::endpoint::EndpointConfig;
use crate::state::{ChatTurn, MessageStore};
use crate::transport::{ChatTransport, TransportError, WebhookReply};

/// Shown in place of a reply when every webhook candidate failed.
pub const CONNECT_ERROR_MESSAGE: &str =
    "Sorry, I couldn't connect to the tutor right now. Please try again in a moment.";

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("not a file path: {0}")]
    NotAFile(PathBuf),
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A file sent along with a message, already base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub data: String,
}

impl Attachment {
    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            name: name.into(),
            data: STANDARD.encode(bytes),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, AttachmentError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AttachmentError::NotAFile(path.to_path_buf()))?;
        let bytes = fs::read(path).map_err(|source| AttachmentError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_bytes(name, &bytes))
    }

    /// The attachment travels inline, as a suffix on the message text.
    pub fn append_to(&self, message: &str) -> String {
        format!("{}\n\n[Attached file: {}]\n{}", message, self.name, self.data)
    }
}

/// Everything one send needs, detached from the session so it can run on
/// another task.
pub struct PendingSend {
    transport: Arc<dyn ChatTransport>,
    endpoint: EndpointConfig,
    message: String,
    history: Vec<ChatTurn>,
    thread_id: Option<String>,
}

impl PendingSend {
    /// Outbound message text, attachment suffix included.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    pub async fn dispatch(self) -> Result<WebhookReply, TransportError> {
        self.transport
            .send(
                &self.endpoint,
                &self.message,
                &self.history,
                self.thread_id.as_deref(),
            )
            .await
    }
}

/// State of one chat session. Lives only in memory.
#[derive(Debug, Default)]
pub struct ConversationSession {
    store: MessageStore,
    thread_id: Option<String>,
    awaiting_reply: bool,
    last_error: Option<String>,
}

impl ConversationSession {
    pub fn turns(&self) -> &[ChatTurn] {
        self.store.turns()
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn is_awaiting_reply(&self) -> bool {
        self.awaiting_reply
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

pub struct Conversation {
    session: ConversationSession,
    transport: Arc<dyn ChatTransport>,
    endpoint: EndpointConfig,
}

impl Conversation {
    pub fn new(transport: Arc<dyn ChatTransport>, endpoint: EndpointConfig) -> Self {
        Self {
            session: ConversationSession::default(),
            transport,
            endpoint,
        }
    }

    pub fn session(&self) -> &ConversationSession {
        &self.session
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    /// Applies to the next send; an in-flight send keeps the endpoint it started with.
    pub fn set_endpoint(&mut self, endpoint: EndpointConfig) {
        self.endpoint = endpoint;
    }

    /// Start a send. Returns `None`, touching nothing, when `text` is blank
    /// or a reply is still outstanding.
    pub fn begin_send(&mut self, text: &str, attachment: Option<&Attachment>) -> Option<PendingSend> {
        if text.trim().is_empty() || self.session.awaiting_reply {
            return None;
        }

        // History goes out as it was before this message
        let history = self.session.store.snapshot();
        self.session.store.push(ChatTurn::user(text));
        self.session.awaiting_reply = true;
        self.session.last_error = None;

        let message = match attachment {
            Some(file) => {
                info!(file = %file.name, bytes = file.data.len(), "sending message with attachment");
                file.append_to(text)
            }
            None => text.to_string(),
        };

        Some(PendingSend {
            transport: Arc::clone(&self.transport),
            endpoint: self.endpoint.clone(),
            message,
            history,
            thread_id: self.session.thread_id.clone(),
        })
    }

    /// Apply the outcome of a dispatched send and return to idle.
    pub fn complete(&mut self, outcome: Result<WebhookReply, TransportError>) {
        if !self.session.awaiting_reply {
            warn!("dropping webhook outcome with no send in flight");
            return;
        }

        match outcome {
            Ok(reply) => {
                if reply.thread_id.is_some() {
                    self.session.thread_id = reply.thread_id;
                }
                self.session.store.push(ChatTurn::assistant(reply.text));
            }
            Err(e) => {
                error!(error = %e, "chat message could not be delivered");
                self.session.last_error = Some(CONNECT_ERROR_MESSAGE.to_string());
            }
        }
        self.session.awaiting_reply = false;
    }

    pub async fn send_message(&mut self, text: &str, attachment: Option<&Attachment>) {
        if let Some(pending) = self.begin_send(text, attachment) {
            let outcome = pending.dispatch().await;
            self.complete(outcome);
        }
    }

    /// Start over with an empty session. Refused while a send is in flight.
    pub fn reset(&mut self) -> bool {
        if self.session.awaiting_reply {
            return false;
        }
        self.session.store.clear();
        self.session.thread_id = None;
        self.session.last_error = None;
        true
    }
}
