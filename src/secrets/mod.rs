// Secrets-store boundary
//
// Resolves (service, username) -> password. The production backend is the
// OS keyring; tests substitute the in-memory store. Unavailability is a
// warning at launch time, never a load-time error.

use anyhow::{Context, Result};

/// Service name under which repository passwords are stored.
pub const SERVICE: &str = "resticmate";

pub trait SecretStore: Send + Sync {
    fn get(&self, service: &str, username: &str) -> Result<Option<String>>;
    fn set(&self, service: &str, username: &str, password: &str) -> Result<()>;
    fn delete(&self, service: &str, username: &str) -> Result<()>;
}

/// OS keyring backend.
pub struct KeyringStore;

impl SecretStore for KeyringStore {
    fn get(&self, service: &str, username: &str) -> Result<Option<String>> {
        let entry = keyring::Entry::new(service, username).context("open keyring entry")?;
        match entry.get_password() {
            Ok(password) => Ok(Some(password)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("read keyring entry"),
        }
    }

    fn set(&self, service: &str, username: &str, password: &str) -> Result<()> {
        keyring::Entry::new(service, username)
            .context("open keyring entry")?
            .set_password(password)
            .context("write keyring entry")
    }

    fn delete(&self, service: &str, username: &str) -> Result<()> {
        let entry = keyring::Entry::new(service, username).context("open keyring entry")?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("delete keyring entry"),
        }
    }
}

/// Whether a keyring backend can be opened at all on this platform.
pub fn available() -> bool {
    keyring::Entry::new(SERVICE, "__probe__").is_ok()
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: std::sync::Mutex<std::collections::HashMap<(String, String), String>>,
}

impl SecretStore for MemoryStore {
    fn get(&self, service: &str, username: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().expect("secret store lock");
        Ok(entries.get(&(service.to_string(), username.to_string())).cloned())
    }

    fn set(&self, service: &str, username: &str, password: &str) -> Result<()> {
        let mut entries = self.entries.lock().expect("secret store lock");
        entries.insert(
            (service.to_string(), username.to_string()),
            password.to_string(),
        );
        Ok(())
    }

    fn delete(&self, service: &str, username: &str) -> Result<()> {
        let mut entries = self.entries.lock().expect("secret store lock");
        entries.remove(&(service.to_string(), username.to_string()));
        Ok(())
    }
}
