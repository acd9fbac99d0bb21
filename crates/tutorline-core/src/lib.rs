pub mod config;
pub mod conversation;
pub mod endpoint;
pub mod gate;
pub mod settings;
pub mod signup;
pub mod state;
pub mod storage;
pub mod transport;

#[cfg(test)]
mod test_support;

// Re-export main types for convenience
pub use config::Config;
pub use conversation::{Attachment, AttachmentError, Conversation, ConversationSession, PendingSend};
pub use endpoint::{Candidate, EndpointConfig, DEFAULT_WEBHOOK_URL};
pub use gate::SiteGate;
pub use settings::SettingsStore;
pub use signup::{BetaSignup, HttpSignupSink, SignupOutcome, SignupService, ValidationErrors};
pub use state::{ChatRole, ChatTurn, MessageStore};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageError};
pub use transport::{ChatTransport, TransportError, WebhookReply, WebhookTransport};
