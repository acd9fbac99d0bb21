use std::sync::Arc;

use tracing::{info, warn};

use crate::storage::{KeyValueStore, SITE_AUTHENTICATED_KEY};

/// Password gate in front of the site. With no password configured the gate
/// is open.
pub struct SiteGate {
    storage: Arc<dyn KeyValueStore>,
    password: Option<String>,
}

impl SiteGate {
    pub fn new(storage: Arc<dyn KeyValueStore>, password: Option<String>) -> Self {
        Self {
            storage,
            password: password.filter(|p| !p.is_empty()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.password.is_none()
    }

    pub fn is_authenticated(&self) -> bool {
        if self.is_open() {
            return true;
        }
        match self.storage.get(SITE_AUTHENTICATED_KEY) {
            Ok(flag) => flag.as_deref() == Some("true"),
            Err(e) => {
                warn!(error = %e, "could not read site gate flag");
                false
            }
        }
    }

    /// Returns whether `attempt` matched. The flag write is best-effort.
    pub fn unlock(&self, attempt: &str) -> bool {
        let Some(password) = &self.password else {
            return true;
        };
        if attempt != password {
            warn!("site unlock attempt with wrong password");
            return false;
        }

        if let Err(e) = self.storage.set(SITE_AUTHENTICATED_KEY, "true") {
            warn!(error = %e, "could not persist site gate flag");
        }
        info!("site unlocked");
        true
    }

    pub fn lock(&self) {
        if let Err(e) = self.storage.remove(SITE_AUTHENTICATED_KEY) {
            warn!(error = %e, "could not clear site gate flag");
        }
    }
}
