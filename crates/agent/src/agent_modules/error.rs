use thiserror::Error;

/// Failures reported by the device session (authentication, refresh, fetch).
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Device returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Session not authenticated")]
    NotAuthenticated,
}

/// Failures of a sink write. Every variant is treated as retriable.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Sink rejected batch with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl From<reqwest::Error> for WriteError {
    fn from(e: reqwest::Error) -> Self {
        WriteError::Transport(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Both the cached-token and the password path failed.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Password authentication failed: {0}")]
    PasswordRejected(#[source] SessionError),
    #[error("Authentication succeeded but the session exposed no credential")]
    MissingCredential,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// A single poll cycle could not produce telemetry. The loop logs it and moves on.
#[derive(Error, Debug)]
pub enum PollError {
    #[error("Failed to fetch snapshot: {0}")]
    Fetch(#[from] SessionError),
}
