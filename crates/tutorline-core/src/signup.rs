//! Beta signup: form validation, remote submission, and a local backup of
//! records the remote endpoint refused.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::storage::{KeyValueStore, SIGNUP_BACKUP_PREFIX};

pub const GRADE_LEVELS: &[&str] = &[
    "elementary",
    "middle-school",
    "high-school",
    "college",
    "adult",
];

const MAX_NOTES_CHARS: usize = 1000;

/// Disambiguates backups written within the same millisecond.
static BACKUP_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetaSignup {
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Every field that failed, in form order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl std::error::Error for ValidationErrors {}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "invalid signup ({})", parts.join("; "))
    }
}

impl ValidationErrors {
    pub fn for_field(&self, field: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.message.as_str())
    }
}

fn email_pattern() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is a valid regex")
    })
}

impl BetaSignup {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = Vec::new();
        let mut fail = |field: &'static str, message: &str| {
            errors.push(FieldError {
                field,
                message: message.to_string(),
            })
        };

        let name_len = self.name.trim().chars().count();
        if name_len < 2 {
            fail("name", "Name must be at least 2 characters");
        } else if name_len > 100 {
            fail("name", "Name must be at most 100 characters");
        }

        if !email_pattern().is_match(self.email.trim()) {
            fail("email", "Please enter a valid email address");
        }

        if let Some(phone) = self.phone.as_deref().filter(|p| !p.trim().is_empty()) {
            let allowed = phone
                .chars()
                .all(|c| c.is_ascii_digit() || " +-().".contains(c));
            let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
            if !allowed || !(7..=15).contains(&digits) {
                fail("phone", "Please enter a valid phone number");
            }
        }

        if let Some(grade) = self.grade_level.as_deref().filter(|g| !g.is_empty()) {
            if !GRADE_LEVELS.iter().any(|level| *level == grade) {
                fail("grade_level", "Please choose a grade level from the list");
            }
        }

        if let Some(notes) = &self.notes {
            if notes.chars().count() > MAX_NOTES_CHARS {
                fail("notes", "Notes must be at most 1000 characters");
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(errors))
        }
    }
}

#[derive(Debug, Error)]
pub enum SignupError {
    #[error("signup endpoint is not configured")]
    NotConfigured,
    #[error("signup request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("signup endpoint answered {status}: {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Where validated signups are sent.
#[async_trait]
pub trait SignupSink: Send + Sync {
    async fn submit(&self, signup: &BetaSignup) -> Result<(), SignupError>;
}

/// POSTs the signup as JSON to a REST endpoint on the hosted database.
#[derive(Clone)]
pub struct HttpSignupSink {
    client: Client,
    url: Option<String>,
    api_key: Option<String>,
}

impl HttpSignupSink {
    pub fn new(url: Option<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            url,
            api_key,
        }
    }
}

#[async_trait]
impl SignupSink for HttpSignupSink {
    async fn submit(&self, signup: &BetaSignup) -> Result<(), SignupError> {
        let url = self.url.as_deref().ok_or(SignupError::NotConfigured)?;

        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(signup);
        if let Some(key) = &self.api_key {
            request = request
                .header("apikey", key)
                .header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SignupError::Rejected { status, body });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignupOutcome {
    Submitted,
    /// Remote write failed; the record is kept locally under `key`.
    BackedUp { key: String, error: String },
    /// Remote write and local backup both failed.
    NotSaved { error: String },
}

pub struct SignupService {
    sink: Arc<dyn SignupSink>,
    storage: Arc<dyn KeyValueStore>,
}

impl SignupService {
    pub fn new(sink: Arc<dyn SignupSink>, storage: Arc<dyn KeyValueStore>) -> Self {
        Self { sink, storage }
    }

    /// Validation failures stop here, before any network call.
    pub async fn submit(&self, signup: &BetaSignup) -> Result<SignupOutcome, ValidationErrors> {
        signup.validate()?;

        let error = match self.sink.submit(signup).await {
            Ok(()) => {
                info!(email = %signup.email, "beta signup submitted");
                return Ok(SignupOutcome::Submitted);
            }
            Err(e) => e.to_string(),
        };
        warn!(email = %signup.email, %error, "beta signup submission failed, backing up locally");

        match self.backup(signup) {
            Some(key) => Ok(SignupOutcome::BackedUp { key, error }),
            None => Ok(SignupOutcome::NotSaved { error }),
        }
    }

    /// `signup_backup_<millis>_<seq>`, zero-padded so key order is write order.
    /// Skips any key already present in storage.
    fn next_backup_key(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        loop {
            let seq = BACKUP_SEQ.fetch_add(1, Ordering::Relaxed);
            let key = format!("{}{:013}_{:06}", SIGNUP_BACKUP_PREFIX, millis, seq);
            match self.storage.get(&key) {
                Ok(Some(_)) => continue,
                _ => return key,
            }
        }
    }

    fn backup(&self, signup: &BetaSignup) -> Option<String> {
        let key = self.next_backup_key();

        let record = match serde_json::to_string(signup) {
            Ok(record) => record,
            Err(e) => {
                error!(error = %e, "could not serialize signup backup");
                return None;
            }
        };
        match self.storage.set(&key, &record) {
            Ok(()) => Some(key),
            Err(e) => {
                error!(error = %e, "could not write signup backup");
                None
            }
        }
    }

    /// Locally backed-up signups, oldest first. Unreadable entries are skipped.
    pub fn pending_backups(&self) -> Vec<(String, BetaSignup)> {
        let keys = match self.storage.keys_with_prefix(SIGNUP_BACKUP_PREFIX) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "could not list signup backups");
                return Vec::new();
            }
        };

        keys.into_iter()
            .filter_map(|key| {
                let raw = match self.storage.get(&key) {
                    Ok(raw) => raw?,
                    Err(e) => {
                        warn!(%key, error = %e, "skipping signup backup that could not be read");
                        return None;
                    }
                };
                match serde_json::from_str(&raw) {
                    Ok(signup) => Some((key, signup)),
                    Err(e) => {
                        warn!(%key, error = %e, "skipping unreadable signup backup");
                        None
                    }
                }
            })
            .collect()
    }

    /// Resubmit every backup; the ones that go through are removed.
    /// Returns how many were delivered.
    pub async fn flush_backups(&self) -> usize {
        let mut delivered = 0;
        for (key, signup) in self.pending_backups() {
            match self.sink.submit(&signup).await {
                Ok(()) => {
                    delivered += 1;
                    if let Err(e) = self.storage.remove(&key) {
                        warn!(%key, error = %e, "delivered signup backup could not be removed");
                    }
                }
                Err(e) => warn!(%key, error = %e, "signup backup still not accepted"),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, StorageError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSink {
        accept: bool,
        calls: AtomicUsize,
    }

    impl FakeSink {
        fn new(accept: bool) -> Arc<Self> {
            Arc::new(Self {
                accept,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SignupSink for FakeSink {
        async fn submit(&self, _signup: &BetaSignup) -> Result<(), SignupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.accept {
                Ok(())
            } else {
                Err(SignupError::NotConfigured)
            }
        }
    }

    struct ReadOnlyStore;

    impl KeyValueStore for ReadOnlyStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Ok(None)
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Poisoned)
        }
        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }
        fn keys_with_prefix(&self, _prefix: &str) -> Result<Vec<String>, StorageError> {
            Ok(Vec::new())
        }
    }

    /// Lists one backup key but cannot read it.
    struct FailingReadStore;

    impl KeyValueStore for FailingReadStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Poisoned)
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Ok(())
        }
        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }
        fn keys_with_prefix(&self, _prefix: &str) -> Result<Vec<String>, StorageError> {
            Ok(vec![format!("{}0000000000001_000000", SIGNUP_BACKUP_PREFIX)])
        }
    }

    fn signup() -> BetaSignup {
        BetaSignup {
            name: "Ada Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            phone: Some("+1 (555) 010-2030".to_string()),
            grade_level: Some("high-school".to_string()),
            subject: Some("Algebra".to_string()),
            notes: None,
        }
    }

    #[test]
    fn test_valid_signup_passes() {
        assert_eq!(signup().validate(), Ok(()));
    }

    #[test]
    fn test_each_bad_field_is_reported() {
        let bad = BetaSignup {
            name: " A ".to_string(),
            email: "not-an-email".to_string(),
            phone: Some("call me".to_string()),
            grade_level: Some("kindergarten".to_string()),
            subject: None,
            notes: Some("x".repeat(1001)),
        };

        let errors = bad.validate().unwrap_err();
        let fields: Vec<&str> = errors.0.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["name", "email", "phone", "grade_level", "notes"]);
        assert!(errors.for_field("email").is_some());
        assert_eq!(errors.for_field("subject"), None);
    }

    #[test]
    fn test_optional_fields_may_be_blank() {
        let minimal = BetaSignup {
            phone: Some(String::new()),
            grade_level: None,
            subject: None,
            ..signup()
        };
        assert!(minimal.validate().is_ok());
    }

    #[test]
    fn test_short_phone_rejected() {
        let s = BetaSignup {
            phone: Some("12-34".to_string()),
            ..signup()
        };
        assert!(s.validate().unwrap_err().for_field("phone").is_some());
    }

    #[tokio::test]
    async fn test_invalid_signup_never_reaches_sink() {
        let sink = FakeSink::new(true);
        let service = SignupService::new(sink.clone(), Arc::new(MemoryStore::new()));
        let bad = BetaSignup {
            email: "nope".to_string(),
            ..signup()
        };

        assert!(service.submit(&bad).await.is_err());
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_accepted_signup_is_not_backed_up() {
        let storage = Arc::new(MemoryStore::new());
        let service = SignupService::new(FakeSink::new(true), storage.clone());

        assert_eq!(service.submit(&signup()).await, Ok(SignupOutcome::Submitted));
        assert!(service.pending_backups().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_signup_is_backed_up() {
        let storage = Arc::new(MemoryStore::new());
        let service = SignupService::new(FakeSink::new(false), storage.clone());

        let outcome = service.submit(&signup()).await.unwrap();
        let key = match outcome {
            SignupOutcome::BackedUp { key, .. } => key,
            other => panic!("expected a local backup, got {other:?}"),
        };
        assert!(key.starts_with(SIGNUP_BACKUP_PREFIX));
        assert_eq!(service.pending_backups(), vec![(key, signup())]);
    }

    #[tokio::test]
    async fn test_back_to_back_backups_keep_both_records() {
        let storage = Arc::new(MemoryStore::new());
        let service = SignupService::new(FakeSink::new(false), storage.clone());
        let second = BetaSignup {
            name: "Grace Hopper".to_string(),
            email: "grace@example.com".to_string(),
            ..signup()
        };

        let a = service.submit(&signup()).await.unwrap();
        let b = service.submit(&second).await.unwrap();
        assert_ne!(a, b);

        let pending = service.pending_backups();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].1, signup());
        assert_eq!(pending[1].1, second);
    }

    #[tokio::test]
    async fn test_existing_backup_key_is_not_overwritten() {
        let storage = Arc::new(MemoryStore::new());
        let service = SignupService::new(FakeSink::new(false), storage.clone());
        let taken = service.next_backup_key();
        storage.set(&taken, "{\"name\":\"x\",\"email\":\"x@y.z\"}").unwrap();

        let fresh = service.next_backup_key();
        assert_ne!(fresh, taken);
        assert!(fresh.starts_with(SIGNUP_BACKUP_PREFIX));
    }

    #[tokio::test]
    async fn test_unreadable_backup_is_skipped() {
        let service = SignupService::new(FakeSink::new(true), Arc::new(FailingReadStore));
        assert!(service.pending_backups().is_empty());
        assert_eq!(service.flush_backups().await, 0);
    }

    #[tokio::test]
    async fn test_backup_failure_does_not_block() {
        let sink = FakeSink::new(false);
        let service = SignupService::new(sink.clone(), Arc::new(ReadOnlyStore));

        let outcome = service.submit(&signup()).await.unwrap();
        assert!(matches!(outcome, SignupOutcome::NotSaved { .. }));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_flush_delivers_and_removes_backups() {
        let storage = Arc::new(MemoryStore::new());
        SignupService::new(FakeSink::new(false), storage.clone())
            .submit(&signup())
            .await
            .unwrap();

        let online = SignupService::new(FakeSink::new(true), storage.clone());
        assert_eq!(online.flush_backups().await, 1);
        assert!(online.pending_backups().is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_http_sink() {
        let sink = HttpSignupSink::new(None, None);
        assert!(matches!(
            sink.submit(&signup()).await,
            Err(SignupError::NotConfigured)
        ));
    }
}
