//! Session token lifecycle: load from cache, detect expiry, refresh, persist on change.
pub mod storage;

pub use storage::{CredentialBackend, FileCredentialBackend, MemoryCredentialBackend};

use crate::agent_modules::error::{AuthError, SessionError};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

pub const DEFAULT_REFRESH_BUFFER_SECONDS: i64 = 600;

/// The device session token. Replaced wholesale, never patched in place.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    #[serde(rename = "token_type")]
    pub token_kind: String,
    #[serde(rename = "expire_timestamp", with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// True when the token expires at or before `now + buffer`.
    pub fn is_expiring_soon_at(&self, now: DateTime<Utc>, buffer: ChronoDuration) -> bool {
        self.expires_at <= now + buffer
    }
}

/// An authenticated connection to the device.
#[async_trait]
pub trait DeviceSession: Send + Sync {
    /// Authenticates the session. With `token` set the session adopts and verifies
    /// that token instead of logging in with the password.
    async fn authenticate(
        &mut self,
        username: &str,
        password: &str,
        token: Option<&str>,
    ) -> Result<(), SessionError>;

    /// Obtains a fresh token for an already authenticated session.
    async fn refresh(&mut self) -> Result<(), SessionError>;

    /// The token the session currently holds, if any.
    fn credential(&self) -> Option<Credential>;
}

#[derive(Debug)]
pub enum RefreshOutcome {
    NotNeeded,
    Refreshed,
    /// Already logged; the next cycle tries again.
    Failed(SessionError),
}

pub struct CredentialStore<S> {
    session: S,
    backend: Box<dyn CredentialBackend>,
    buffer: ChronoDuration,
    credential: Option<Credential>,
}

impl<S: DeviceSession> CredentialStore<S> {
    /// Wraps `session` and loads whatever credential `backend` holds.
    pub fn new(session: S, backend: Box<dyn CredentialBackend>, buffer_seconds: i64) -> Self {
        let credential = backend.load();
        Self {
            session,
            backend,
            buffer: ChronoDuration::seconds(buffer_seconds),
            credential,
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn is_expiring_soon(&self) -> bool {
        self.is_expiring_soon_at(Utc::now())
    }

    pub fn is_expiring_soon_at(&self, now: DateTime<Utc>) -> bool {
        match &self.credential {
            Some(credential) => credential.is_expiring_soon_at(now, self.buffer),
            None => true,
        }
    }

    /// Tries the cached token first, then the password. Only a failed password
    /// login is returned as an error.
    pub async fn authenticate(&mut self, username: &str, password: &str) -> Result<(), AuthError> {
        if let Some(token) = self.cached_token() {
            info!("Trying cached token...");
            match self
                .session
                .authenticate(username, password, Some(token.as_str()))
                .await
            {
                Ok(()) => {
                    info!("Authenticated using cached token.");
                    return Ok(());
                }
                Err(e) => {
                    error!(error = %e, "Token authentication failed. Falling back to username/password.");
                }
            }
        }

        info!("Authenticating using username and password...");
        self.session
            .authenticate(username, password, None)
            .await
            .map_err(|e| {
                error!(error = %e, "Password authentication failed.");
                AuthError::PasswordRejected(e)
            })?;
        self.capture_from_session()
            .ok_or(AuthError::MissingCredential)?;
        info!("Authenticated and new token saved.");
        Ok(())
    }

    /// Refreshes the token when it is within the safety buffer of expiring.
    pub async fn refresh_if_needed(&mut self) -> RefreshOutcome {
        if !self.is_expiring_soon() {
            return RefreshOutcome::NotNeeded;
        }

        info!("Token is expiring soon. Refreshing...");
        if let Err(e) = self.session.refresh().await {
            warn!(error = %e, "Token refresh failed.");
            return RefreshOutcome::Failed(e);
        }
        match self.capture_from_session() {
            Some(_) => {
                info!("Token refreshed and saved.");
                RefreshOutcome::Refreshed
            }
            None => {
                warn!("Token refresh returned no credential.");
                RefreshOutcome::Failed(SessionError::NotAuthenticated)
            }
        }
    }

    fn cached_token(&self) -> Option<String> {
        match &self.credential {
            Some(credential) if !self.is_expiring_soon() => Some(credential.token.clone()),
            _ => None,
        }
    }

    /// Copies the session's current credential into the store and persists it.
    /// A failed save is logged; the in-memory credential still counts.
    fn capture_from_session(&mut self) -> Option<&Credential> {
        let credential = self.session.credential()?;
        if let Err(e) = self.backend.save(&credential) {
            error!(error = %e, "Failed to save token.");
        }
        self.credential = Some(credential);
        self.credential.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_modules::error::StorageError;

    #[derive(Default)]
    struct FakeSession {
        accept_cached: bool,
        accept_password: bool,
        fail_refresh: bool,
        issued_lifetime_secs: i64,
        current: Option<Credential>,
        cached_attempts: Vec<String>,
        password_attempts: usize,
        refresh_calls: usize,
    }

    impl FakeSession {
        fn issue(&mut self, token: &str) {
            self.current = Some(Credential {
                token: token.to_string(),
                token_kind: "owner".to_string(),
                expires_at: Utc::now() + ChronoDuration::seconds(self.issued_lifetime_secs),
            });
        }
    }

    #[async_trait]
    impl DeviceSession for FakeSession {
        async fn authenticate(
            &mut self,
            _username: &str,
            _password: &str,
            token: Option<&str>,
        ) -> Result<(), SessionError> {
            match token {
                Some(token) => {
                    self.cached_attempts.push(token.to_string());
                    if self.accept_cached {
                        Ok(())
                    } else {
                        Err(SessionError::Unauthorized("token rejected".to_string()))
                    }
                }
                None => {
                    self.password_attempts += 1;
                    if self.accept_password {
                        self.issue(&format!("fresh-{}", self.password_attempts));
                        Ok(())
                    } else {
                        Err(SessionError::Unauthorized("bad password".to_string()))
                    }
                }
            }
        }

        async fn refresh(&mut self) -> Result<(), SessionError> {
            self.refresh_calls += 1;
            if self.fail_refresh {
                return Err(SessionError::Status {
                    status: 503,
                    body: "rebooting".to_string(),
                });
            }
            self.issue(&format!("refreshed-{}", self.refresh_calls));
            Ok(())
        }

        fn credential(&self) -> Option<Credential> {
            self.current.clone()
        }
    }

    struct BrokenBackend;

    impl CredentialBackend for BrokenBackend {
        fn load(&self) -> Option<Credential> {
            None
        }

        fn save(&self, _credential: &Credential) -> Result<(), StorageError> {
            Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )))
        }
    }

    fn cached(token: &str, expires_in_secs: i64) -> Credential {
        Credential {
            token: token.to_string(),
            token_kind: "owner".to_string(),
            expires_at: Utc::now() + ChronoDuration::seconds(expires_in_secs),
        }
    }

    fn session() -> FakeSession {
        FakeSession {
            accept_cached: true,
            accept_password: true,
            issued_lifetime_secs: 365 * 24 * 3600,
            ..Default::default()
        }
    }

    #[test]
    fn test_expiry_uses_buffer() {
        let now = Utc::now();
        let credential = Credential {
            token: "t".to_string(),
            token_kind: "owner".to_string(),
            expires_at: now + ChronoDuration::seconds(600),
        };
        let buffer = ChronoDuration::seconds(600);

        assert!(credential.is_expiring_soon_at(now, buffer));
        assert!(!credential.is_expiring_soon_at(now - ChronoDuration::seconds(1), buffer));
    }

    #[tokio::test]
    async fn test_valid_cached_token_is_used() {
        let backend = MemoryCredentialBackend::with_credential(cached("cached", 86_400));
        let mut store = CredentialStore::new(session(), Box::new(backend.clone()), 600);

        store.authenticate("user", "pass").await.unwrap();

        assert_eq!(store.session().cached_attempts, vec!["cached".to_string()]);
        assert_eq!(store.session().password_attempts, 0);
        assert_eq!(store.credential().unwrap().token, "cached");
    }

    #[tokio::test]
    async fn test_rejected_cached_token_falls_back_to_password() {
        let backend = MemoryCredentialBackend::with_credential(cached("stale", 86_400));
        let mut fake = session();
        fake.accept_cached = false;
        let mut store = CredentialStore::new(fake, Box::new(backend.clone()), 600);

        store.authenticate("user", "pass").await.unwrap();

        assert_eq!(store.session().cached_attempts.len(), 1);
        assert_eq!(store.session().password_attempts, 1);
        assert_eq!(backend.stored().unwrap().token, "fresh-1");
    }

    #[tokio::test]
    async fn test_expiring_cached_token_skips_cached_path() {
        let backend = MemoryCredentialBackend::with_credential(cached("old", 60));
        let mut store = CredentialStore::new(session(), Box::new(backend.clone()), 600);
        assert!(store.is_expiring_soon());

        store.authenticate("user", "pass").await.unwrap();

        assert!(store.session().cached_attempts.is_empty());
        assert_eq!(store.session().password_attempts, 1);
        assert_eq!(backend.stored().unwrap().token, "fresh-1");
        assert!(!store.is_expiring_soon());
    }

    #[tokio::test]
    async fn test_no_cache_goes_to_password() {
        let backend = MemoryCredentialBackend::new();
        let mut store = CredentialStore::new(session(), Box::new(backend.clone()), 600);

        store.authenticate("user", "pass").await.unwrap();

        assert!(store.session().cached_attempts.is_empty());
        assert!(backend.stored().is_some());
    }

    #[tokio::test]
    async fn test_password_failure_is_fatal() {
        let mut fake = session();
        fake.accept_cached = false;
        fake.accept_password = false;
        let backend = MemoryCredentialBackend::with_credential(cached("stale", 86_400));
        let mut store = CredentialStore::new(fake, Box::new(backend.clone()), 600);

        let result = store.authenticate("user", "wrong").await;

        assert!(matches!(result, Err(AuthError::PasswordRejected(_))));
        assert_eq!(backend.stored().unwrap().token, "stale");
    }

    #[tokio::test]
    async fn test_refresh_not_needed_for_fresh_token() {
        let backend = MemoryCredentialBackend::with_credential(cached("good", 86_400));
        let mut store = CredentialStore::new(session(), Box::new(backend), 600);

        assert!(matches!(store.refresh_if_needed().await, RefreshOutcome::NotNeeded));
        assert_eq!(store.session().refresh_calls, 0);
    }

    #[tokio::test]
    async fn test_refresh_persists_new_token() {
        let backend = MemoryCredentialBackend::with_credential(cached("old", 30));
        let mut store = CredentialStore::new(session(), Box::new(backend.clone()), 600);

        assert!(matches!(store.refresh_if_needed().await, RefreshOutcome::Refreshed));
        assert_eq!(backend.stored().unwrap().token, "refreshed-1");
        assert!(!store.is_expiring_soon());
    }

    #[tokio::test]
    async fn test_refresh_failure_is_swallowed() {
        let backend = MemoryCredentialBackend::with_credential(cached("old", 30));
        let mut fake = session();
        fake.fail_refresh = true;
        let mut store = CredentialStore::new(fake, Box::new(backend.clone()), 600);

        assert!(matches!(store.refresh_if_needed().await, RefreshOutcome::Failed(_)));
        assert!(matches!(store.refresh_if_needed().await, RefreshOutcome::Failed(_)));
        assert_eq!(store.session().refresh_calls, 2);
        assert_eq!(backend.stored().unwrap().token, "old");
    }

    #[tokio::test]
    async fn test_save_failure_does_not_fail_authentication() {
        let mut store = CredentialStore::new(session(), Box::new(BrokenBackend), 600);

        store.authenticate("user", "pass").await.unwrap();

        assert_eq!(store.credential().unwrap().token, "fresh-1");
    }
}
