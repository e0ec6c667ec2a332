use super::Credential;
use crate::agent_modules::error::StorageError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error};

const APP_NAME: &str = "envflux";
const TOKEN_FILENAME: &str = "token.json";

/// A single slot holding at most one persisted credential.
pub trait CredentialBackend: Send + Sync {
    /// Returns the stored credential. Missing or unreadable state is `None`.
    fn load(&self) -> Option<Credential>;

    fn save(&self, credential: &Credential) -> Result<(), StorageError>;
}

/// `<user cache dir>/envflux/token.json`, or `./token.json` when no cache dir is known.
pub fn default_token_path() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join(APP_NAME))
        .unwrap_or_default()
        .join(TOKEN_FILENAME)
}

/// JSON file backend.
#[derive(Debug, Clone)]
pub struct FileCredentialBackend {
    path: PathBuf,
}

impl FileCredentialBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Credential, StorageError> {
        let raw = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

impl Default for FileCredentialBackend {
    fn default() -> Self {
        Self::new(default_token_path())
    }
}

impl CredentialBackend for FileCredentialBackend {
    fn load(&self) -> Option<Credential> {
        if !self.path.is_file() {
            debug!(path = ?self.path, "No cached token file.");
            return None;
        }
        match self.read() {
            Ok(credential) => Some(credential),
            Err(e) => {
                error!(path = ?self.path, error = %e, "Failed to load token file.");
                None
            }
        }
    }

    fn save(&self, credential: &Credential) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let serialized = serde_json::to_string(credential)?;
        fs::write(&self.path, serialized)?;
        Ok(())
    }
}

/// In-process backend used by tests and by callers that do not want disk state.
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialBackend {
    slot: Arc<Mutex<Option<Credential>>>,
}

impl MemoryCredentialBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(credential))),
        }
    }

    pub fn stored(&self) -> Option<Credential> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CredentialBackend for MemoryCredentialBackend {
    fn load(&self) -> Option<Credential> {
        self.stored()
    }

    fn save(&self, credential: &Credential) -> Result<(), StorageError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(credential.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn credential() -> Credential {
        Credential {
            token: "eyJ.token.sig".to_string(),
            token_kind: "owner".to_string(),
            expires_at: Utc.timestamp_opt(1_900_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn test_file_backend_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileCredentialBackend::new(dir.path().join("nested").join("token.json"));

        assert_eq!(backend.load(), None);
        backend.save(&credential()).unwrap();
        assert_eq!(backend.load(), Some(credential()));
    }

    #[test]
    fn test_file_layout_uses_persisted_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let backend = FileCredentialBackend::new(&path);
        backend.save(&credential()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["token"], "eyJ.token.sig");
        assert_eq!(raw["token_type"], "owner");
        assert_eq!(raw["expire_timestamp"], 1_900_000_000);
    }

    #[test]
    fn test_corrupt_file_is_no_credential() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        fs::write(&path, "{not json").unwrap();

        assert_eq!(FileCredentialBackend::new(&path).load(), None);
    }

    #[test]
    fn test_default_path_ends_with_app_file() {
        assert!(default_token_path().ends_with("token.json"));
    }

    #[test]
    fn test_memory_backend() {
        let backend = MemoryCredentialBackend::new();
        assert_eq!(backend.load(), None);
        backend.save(&credential()).unwrap();
        assert_eq!(backend.stored(), Some(credential()));
    }
}
