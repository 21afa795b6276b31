//! # Configuration Module
//!
//! This module provides configuration types for tokio-pully sessions.
//! It covers the connection options, namespace and token handling, and
//! reconnection strategies of the socket transport.
//!
//! ## Core Types
//!
//! - **Config**: Builder-style configuration for a session
//! - **ConnectionInfo**: Serde-friendly subset of the options (camelCase)
//! - **TokenPlacement**: Where the auth token travels during the handshake
//! - **Endpoint**: Resolved WebSocket URL and Socket.IO namespace
//! - **ReconnectStrategy**: Trait for custom reconnection behavior
//! - **BackoffReconnect**: Exponential backoff reconnection strategy

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio_tungstenite::tungstenite::http::{HeaderValue, Uri};

use crate::errors::ConfigError;
use crate::protocol::{DEFAULT_NAMESPACE, ENGINE_PROTOCOL, RECEIVE_MESSAGE};

/// Where the authentication token is attached when connecting.
///
/// ## Example
///
/// ```rust
/// use tokio_pully::config::{Config, TokenPlacement};
///
/// let config = Config::new().with_token_placement(TokenPlacement::Header);
/// assert_eq!(config.token_placement, TokenPlacement::Header);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TokenPlacement {
    /// Sent in the Socket.IO CONNECT packet as `{"token": ..., "appId": ...}`
    #[default]
    Auth,
    /// Sent as a `token` header on the WebSocket upgrade request
    Header,
}

/// Main configuration struct for sessions
///
/// ## Configuration Options
///
/// - **Connection**: Server URL, token, app id and auto-connect flag
/// - **Wire variants**: Token placement, token in payloads, default event name
/// - **Runtime**: Custom tokio runtime handle
/// - **Timeouts**: Handshake read timeout
/// - **Reconnection**: Reconnection strategy
///
/// ## Example
///
/// ```rust
/// use tokio_pully::config::Config;
/// use std::time::Duration;
///
/// let config = Config::new()
///     .with_server_url("https://pully.example.com")
///     .with_token("your-auth-token")
///     .with_app_id("my-app")
///     .with_read_timeout(Duration::from_secs(10));
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Server URL, `http(s)://` or `ws(s)://`
    ///
    /// The path of the URL, if any, becomes the Socket.IO namespace.
    pub server_url: String,

    /// Authentication token
    pub token: String,

    /// Application identifier, appended to the namespace as `/{app_id}`
    pub app_id: Option<String>,

    /// Reject configurations without an app id
    pub require_app_id: bool,

    /// Open the connection as soon as the session is created
    pub auto_connect: bool,

    /// Where the token is attached during the handshake
    pub token_placement: TokenPlacement,

    /// Also include the token in every control payload
    pub token_in_payload: bool,

    /// Event name used by `listen` when none is given
    pub default_event: String,

    /// Engine.IO endpoint path on the server
    pub path: String,

    /// Optional custom tokio runtime handle
    pub runtime: Option<Handle>,

    /// Timeout for each step of the handshake
    pub read_timeout: Duration,

    /// Reconnection strategy used after a connection is lost
    pub reconnect_strategy: Arc<dyn ReconnectStrategy>,
}

impl Default for Config {
    /// Creates default configuration
    ///
    /// Defaults:
    /// - Empty server url and token
    /// - No app id, not required
    /// - Auto-connect enabled
    /// - Token in the auth payload, not in control payloads
    /// - `"message"` as default event
    /// - `/socket.io/` engine path
    /// - 5 second read timeout
    /// - Exponential backoff reconnection
    fn default() -> Self {
        Config {
            server_url: String::new(),
            token: String::new(),
            app_id: None,
            require_app_id: false,
            auto_connect: true,
            token_placement: TokenPlacement::Auth,
            token_in_payload: false,
            default_event: String::from(RECEIVE_MESSAGE),
            path: String::from("/socket.io/"),
            runtime: None,
            read_timeout: Duration::from_secs(5),
            reconnect_strategy: Arc::new(BackoffReconnect::default()),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the server URL
    ///
    /// ## Example
    ///
    /// ```rust
    /// use tokio_pully::config::Config;
    ///
    /// let config = Config::new().with_server_url("http://localhost:3000");
    /// assert_eq!(config.server_url, "http://localhost:3000");
    /// ```
    pub fn with_server_url(mut self, server_url: impl Into<String>) -> Self {
        self.server_url = server_url.into();
        self
    }

    /// Sets the authentication token
    ///
    /// ## Example
    ///
    /// ```rust
    /// use tokio_pully::config::Config;
    ///
    /// let config = Config::new().with_token("secret-token");
    /// assert_eq!(config.token, "secret-token");
    /// ```
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    /// Sets the application identifier
    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    /// Makes the app id mandatory
    pub fn require_app_id(mut self) -> Self {
        self.require_app_id = true;
        self
    }

    /// Enables or disables connecting on construction
    ///
    /// ## Example
    ///
    /// ```rust
    /// use tokio_pully::config::Config;
    ///
    /// let config = Config::new().with_auto_connect(false);
    /// assert!(!config.auto_connect);
    /// ```
    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    pub fn with_token_placement(mut self, placement: TokenPlacement) -> Self {
        self.token_placement = placement;
        self
    }

    pub fn with_token_in_payload(mut self, enabled: bool) -> Self {
        self.token_in_payload = enabled;
        self
    }

    /// Sets the event name used by `listen` without an explicit name
    pub fn with_default_event(mut self, event: impl Into<String>) -> Self {
        self.default_event = event.into();
        self
    }

    /// Sets the Engine.IO path, `/socket.io/` by default
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets a custom tokio runtime handle
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Sets the handshake read timeout
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the reconnection strategy
    ///
    /// ## Example
    ///
    /// ```rust
    /// use tokio_pully::config::{Config, BackoffReconnect};
    /// use std::time::Duration;
    ///
    /// let strategy = BackoffReconnect {
    ///     factor: 1.5,
    ///     min_delay: Duration::from_millis(100),
    ///     max_delay: Duration::from_secs(10),
    /// };
    ///
    /// let config = Config::new().with_reconnect_strategy(strategy);
    /// ```
    pub fn with_reconnect_strategy(mut self, strategy: impl ReconnectStrategy) -> Self {
        self.reconnect_strategy = Arc::new(strategy);
        self
    }

    /// Checks the options without touching the network
    ///
    /// ## Example
    ///
    /// ```rust
    /// use tokio_pully::config::Config;
    /// use tokio_pully::errors::ConfigError;
    ///
    /// let config = Config::new().with_server_url("http://localhost:3000").with_app_id("a/b");
    /// assert_eq!(config.validate(), Err(ConfigError::InvalidAppId("a/b".into())));
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_url.is_empty() {
            return Err(ConfigError::MissingServerUrl);
        }

        match self.app_id.as_deref() {
            None if self.require_app_id => return Err(ConfigError::MissingAppId),
            Some(app_id) if app_id.is_empty() || app_id.contains('/') => {
                return Err(ConfigError::InvalidAppId(app_id.to_string()));
            }
            _ => {}
        }

        if self.token_placement == TokenPlacement::Header {
            HeaderValue::from_str(&self.token)
                .map_err(|err| ConfigError::InvalidToken(err.to_string()))?;
        }

        self.endpoint().map(|_| ())
    }

    /// Resolves the WebSocket URL and the namespace
    ///
    /// ## Example
    ///
    /// ```rust
    /// use tokio_pully::config::Config;
    ///
    /// let endpoint = Config::new()
    ///     .with_server_url("https://pully.example.com")
    ///     .with_app_id("app1")
    ///     .endpoint()
    ///     .unwrap();
    ///
    /// assert_eq!(endpoint.url, "wss://pully.example.com/socket.io/?EIO=4&transport=websocket");
    /// assert_eq!(endpoint.namespace, "/app1");
    /// ```
    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidServerUrl {
            url: self.server_url.clone(),
            reason: reason.to_string(),
        };

        let uri: Uri = self
            .server_url
            .parse()
            .map_err(|err: tokio_tungstenite::tungstenite::http::uri::InvalidUri| {
                invalid(&err.to_string())
            })?;

        let scheme = match uri.scheme_str() {
            Some("http") | Some("ws") => "ws",
            Some("https") | Some("wss") => "wss",
            Some(_) => return Err(invalid("unsupported scheme")),
            None => return Err(invalid("missing scheme")),
        };
        let Some(authority) = uri.authority() else {
            return Err(invalid("missing host"));
        };

        let base = uri.path().trim_end_matches('/');
        let namespace = match self.app_id.as_deref() {
            Some(app_id) => format!("{}/{}", base, app_id),
            None if base.is_empty() => DEFAULT_NAMESPACE.to_string(),
            None => base.to_string(),
        };

        let path = format!("/{}/", self.path.trim_matches('/'));
        let path = if path == "//" { "/".to_string() } else { path };
        let mut url = format!(
            "{}://{}{}?EIO={}&transport=websocket",
            scheme, authority, path, ENGINE_PROTOCOL
        );
        if let Some(query) = uri.query().filter(|q| !q.is_empty()) {
            url.push('&');
            url.push_str(query);
        }

        Ok(Endpoint { url, namespace })
    }
}

/// Resolved connection target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// WebSocket URL including the Engine.IO query
    pub url: String,
    /// Socket.IO namespace, `/` when neither the URL path nor an app id is set
    pub namespace: String,
}

/// Connection options in the camelCase shape used by the JavaScript clients
///
/// ## Example
///
/// ```rust
/// use tokio_pully::config::{Config, ConnectionInfo};
///
/// let info: ConnectionInfo = serde_json::from_str(
///     r#"{"serverUrl": "http://localhost:3000", "token": "t", "appId": "app1", "autoConnect": false}"#,
/// ).unwrap();
/// let config = Config::from(info);
///
/// assert_eq!(config.app_id.as_deref(), Some("app1"));
/// assert!(!config.auto_connect);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    #[serde(default)]
    pub server_url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_connect: Option<bool>,
}

impl From<ConnectionInfo> for Config {
    fn from(info: ConnectionInfo) -> Self {
        let mut config = Config::new()
            .with_server_url(info.server_url)
            .with_token(info.token)
            .with_auto_connect(info.auto_connect.unwrap_or(true));
        config.app_id = info.app_id;
        config
    }
}

/// Trait for implementing custom reconnection strategies
///
/// ## Example
///
/// ```rust
/// use tokio_pully::config::ReconnectStrategy;
/// use std::time::Duration;
///
/// #[derive(Debug)]
/// struct LinearReconnect {
///     base_delay: Duration,
/// }
///
/// impl ReconnectStrategy for LinearReconnect {
///     fn time_before_next_attempt(&self, attempt: u32) -> Duration {
///         self.base_delay * attempt
///     }
/// }
/// ```
pub trait ReconnectStrategy: std::fmt::Debug + Send + Sync + 'static {
    /// Calculates the delay before the next reconnection attempt (1-based)
    fn time_before_next_attempt(&self, attempt: u32) -> Duration;
}

/// Exponential backoff reconnection strategy
///
/// The delay is `min_delay * factor^attempt`, clamped between
/// `min_delay` and `max_delay`.
#[derive(Debug, Clone)]
pub struct BackoffReconnect {
    pub factor: f64,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectStrategy for BackoffReconnect {
    fn time_before_next_attempt(&self, attempt: u32) -> Duration {
        if self.min_delay > self.max_delay {
            return self.max_delay;
        }

        let time = self.min_delay.as_secs_f64() * self.factor.powi(attempt as i32);
        let time = time.clamp(self.min_delay.as_secs_f64(), self.max_delay.as_secs_f64());
        Duration::from_secs_f64(time)
    }
}

impl Default for BackoffReconnect {
    /// Socket.IO client defaults: 1 second doubling up to 5 seconds
    ///
    /// ```rust
    /// use tokio_pully::config::{BackoffReconnect, ReconnectStrategy};
    /// use std::time::Duration;
    ///
    /// let strategy = BackoffReconnect::default();
    /// assert_eq!(strategy.time_before_next_attempt(1), Duration::from_secs(2));
    /// assert_eq!(strategy.time_before_next_attempt(10), Duration::from_secs(5));
    /// ```
    fn default() -> Self {
        BackoffReconnect {
            factor: 2.0,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        }
    }
}
