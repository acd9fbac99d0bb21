use std::sync::Arc;

use tracing::{info, warn};

use crate::endpoint::{EndpointConfig, DEFAULT_WEBHOOK_URL};
use crate::storage::{KeyValueStore, StorageError, WEBHOOK_URL_KEY};

/// User-overridable webhook URL, persisted in durable storage.
#[derive(Clone)]
pub struct SettingsStore {
    storage: Arc<dyn KeyValueStore>,
}

impl SettingsStore {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self { storage }
    }

    /// Saved URL, or the built-in default when nothing usable is stored.
    pub fn load(&self) -> EndpointConfig {
        match self.storage.get(WEBHOOK_URL_KEY) {
            Ok(Some(url)) if !url.trim().is_empty() => EndpointConfig::new(url),
            Ok(_) => EndpointConfig::new(DEFAULT_WEBHOOK_URL),
            Err(e) => {
                warn!(error = %e, "could not read webhook URL, using default");
                EndpointConfig::new(DEFAULT_WEBHOOK_URL)
            }
        }
    }

    /// Stored verbatim; the caller's form is responsible for validation.
    pub fn save(&self, url: &str) -> Result<(), StorageError> {
        self.storage.set(WEBHOOK_URL_KEY, url)?;
        info!(%url, "saved webhook URL");
        Ok(())
    }

    pub fn reset(&self) -> Result<(), StorageError> {
        self.storage.remove(WEBHOOK_URL_KEY)?;
        info!("webhook URL reset to default");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStore, MemoryStore};

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Poisoned)
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Poisoned)
        }
        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Poisoned)
        }
        fn keys_with_prefix(&self, _prefix: &str) -> Result<Vec<String>, StorageError> {
            Err(StorageError::Poisoned)
        }
    }

    #[test]
    fn test_load_defaults_when_unset() {
        let settings = SettingsStore::new(Arc::new(MemoryStore::new()));
        assert_eq!(settings.load().primary_url, DEFAULT_WEBHOOK_URL);
    }

    #[test]
    fn test_save_then_fresh_load() {
        let storage = Arc::new(MemoryStore::new());
        SettingsStore::new(storage.clone()).save("https://x").unwrap();

        let fresh = SettingsStore::new(storage);
        assert_eq!(fresh.load().primary_url, "https://x");
    }

    #[test]
    fn test_reset_restores_default() {
        let settings = SettingsStore::new(Arc::new(MemoryStore::new()));
        settings.save("https://x").unwrap();
        settings.reset().unwrap();

        assert_eq!(settings.load().primary_url, DEFAULT_WEBHOOK_URL);
    }

    #[test]
    fn test_empty_value_falls_back_to_default() {
        let storage = Arc::new(MemoryStore::new());
        storage.set(WEBHOOK_URL_KEY, "  ").unwrap();

        let settings = SettingsStore::new(storage);
        assert!(settings.load().is_default());
    }

    #[test]
    fn test_saved_url_keeps_relays() {
        let settings = SettingsStore::new(Arc::new(MemoryStore::new()));
        settings.save("https://x").unwrap();

        let endpoint = settings.load();
        assert_eq!(endpoint.relays(), EndpointConfig::default().relays());
    }

    #[test]
    fn test_read_failure_yields_default() {
        let settings = SettingsStore::new(Arc::new(BrokenStore));
        assert!(settings.load().is_default());
        assert!(settings.save("https://x").is_err());
    }

    #[test]
    fn test_survives_restart_with_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");

        SettingsStore::new(Arc::new(FileStore::new(&path)))
            .save("https://tutor.example/hook")
            .unwrap();

        let reloaded = SettingsStore::new(Arc::new(FileStore::new(&path)));
        assert_eq!(reloaded.load().primary_url, "https://tutor.example/hook");
    }
}
