use thiserror::Error;

/// Raised synchronously while building a session or a socket client.
///
/// Configuration errors are fatal to the construction call and are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("server url is required")]
    MissingServerUrl,
    #[error("invalid server url {url:?}: {reason}")]
    InvalidServerUrl { url: String, reason: String },
    #[error("app id is required")]
    MissingAppId,
    #[error("app id must be non-empty and must not contain a forward slash, got {0:?}")]
    InvalidAppId(String),
    #[error("token cannot be sent as a header: {0}")]
    InvalidToken(String),
    #[error("no tokio runtime available, provide one with `Config::with_runtime`")]
    NoRuntime,
}

/// Errors returned by session and channel handle operations.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("not connected, call `connect` first")]
    NotConnected,
    #[error("channel handle for {channel:?} was unsubscribed")]
    Retired { channel: String },
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}
