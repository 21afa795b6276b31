//! Channel session facade.
//!
//! A [`Session`] wraps one [`Transport`] and turns channel operations
//! into the control events understood by Pully servers:
//!
//! - `subscribe` / `unsubscribe` with `{"channel": ...}`
//! - `send_message` with `{"channelName": ..., "message": ..., "event"?: ...}`
//!
//! It also keeps the ordered list of subscribed channel names. The list
//! is bookkeeping only, sends and listens never consult it.
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use tokio_pully::config::Config;
//! use tokio_pully::session::{OutboundMessage, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = Config::new()
//!         .with_server_url("http://localhost:3000")
//!         .with_app_id("my-app")
//!         .with_token("your-auth-token")
//!         .with_auto_connect(false);
//!
//!     let session = Session::new(&config)?;
//!     assert!(session.get_channels().is_empty());
//!
//!     // Note: In a real application you would connect to a running server
//!     // session.connect().await?;
//!     // let room = session.subscribe("room1")?;
//!     // room.listen(|data| println!("room1: {}", data))?;
//!     // room.send_message(OutboundMessage::new(json!({"text": "hi"})))?;
//!     let _ = OutboundMessage::new(json!({"text": "hi"}));
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use slotmap::{SlotMap, new_key_type};

use crate::channel::ChannelHandle;
use crate::client::{ConnectError, EmitError, FutureResult, ListenerId, SocketClient, State};
use crate::config::Config;
use crate::errors::{ConfigError, SessionError};
use crate::protocol::{ChannelRequest, SEND_MESSAGE, SUBSCRIBE, SendMessageRequest, UNSUBSCRIBE};
use crate::transport::Transport;

new_key_type! { pub(crate) struct ChannelId; }

pub(crate) struct ChannelEntry {
    pub(crate) name: Arc<str>,
    pub(crate) retired: Arc<AtomicBool>,
    /// Listeners registered through the owning handle
    pub(crate) listeners: Vec<ListenerId>,
}

pub(crate) struct SessionInner {
    /// Token added to control payloads, when enabled
    pub(crate) token: Option<String>,
    pub(crate) default_event: String,
    pub(crate) channels: SlotMap<ChannelId, ChannelEntry>,
    /// Subscription entries in insertion order
    pub(crate) order: Vec<ChannelId>,
}

impl SessionInner {
    /// Drops an entry and retires the handle owning it.
    ///
    /// Returns the listeners the handle registered, they are removed from
    /// the transport once the session lock is released.
    fn remove_entry(&mut self, id: ChannelId) -> Vec<ListenerId> {
        self.order.retain(|other| *other != id);
        match self.channels.remove(id) {
            Some(entry) => {
                entry.retired.store(true, Ordering::Release);
                log::debug!("channel entry removed, channel={}", entry.name);
                entry.listeners
            }
            None => Vec::new(),
        }
    }
}

/// Message sent to a channel
///
/// A `timeout` greater than zero asks the server for an acknowledgement
/// and waits for it at most that long.
///
/// ```rust
/// use std::time::Duration;
/// use serde_json::json;
/// use tokio_pully::session::OutboundMessage;
///
/// let message = OutboundMessage::new(json!({"text": "hi"}))
///     .with_event("chat")
///     .with_timeout(Duration::from_millis(500));
///
/// assert_eq!(message.event.as_deref(), Some("chat"));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutboundMessage {
    pub message: Value,
    pub event: Option<String>,
    pub timeout: Option<Duration>,
}

impl OutboundMessage {
    pub fn new(message: impl Into<Value>) -> Self {
        OutboundMessage {
            message: message.into(),
            event: None,
            timeout: None,
        }
    }

    /// Sets the event name the server should deliver the message under
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl From<Value> for OutboundMessage {
    fn from(message: Value) -> Self {
        OutboundMessage::new(message)
    }
}

/// Channel session over a real-time transport.
///
/// Sessions are cheap to clone, clones share the transport and the channel list.
#[derive(Clone)]
pub struct Session {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) inner: Arc<Mutex<SessionInner>>,
    server_url: Arc<str>,
}

impl Session {
    /// Creates a session over a [`SocketClient`].
    ///
    /// Connects right away unless auto-connect is disabled.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let client = SocketClient::new(config)?;
        Self::with_transport(config, Arc::new(client))
    }

    /// Creates a session over a custom transport.
    ///
    /// The configuration is validated before the transport is touched.
    pub fn with_transport(
        config: &Config,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let session = Session {
            transport,
            inner: Arc::new(Mutex::new(SessionInner {
                token: config
                    .token_in_payload
                    .then(|| config.token.clone()),
                default_event: config.default_event.clone(),
                channels: SlotMap::with_key(),
                order: Vec::new(),
            })),
            server_url: config.server_url.as_str().into(),
        };

        if config.auto_connect {
            // the attempt runs in the background, its outcome is not needed here
            drop(session.transport.connect());
        }

        Ok(session)
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Opens the transport.
    ///
    /// Only needed when auto-connect was disabled or after `disconnect`.
    /// The returned future resolves with the outcome of the next attempt,
    /// or right away when already connected, and may be dropped.
    pub fn connect(
        &self,
    ) -> FutureResult<impl Future<Output = Result<(), ConnectError>> + use<>> {
        FutureResult(self.transport.connect())
    }

    /// Closes the transport, the channel list is kept.
    pub fn disconnect(&self) -> FutureResult<impl Future<Output = ()> + use<>> {
        FutureResult(self.transport.disconnect())
    }

    pub fn state(&self) -> State {
        self.transport.state()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.state() == State::Connected
    }

    /// Subscribes to a channel.
    ///
    /// Emits `subscribe` and appends the name to the channel list, even
    /// when it is already there. The returned handle owns that one entry.
    pub fn subscribe(&self, channel: &str) -> Result<ChannelHandle, SessionError> {
        self.check_connection()?;

        let payload = serde_json::to_value(ChannelRequest {
            channel: channel.to_string(),
            token: self.payload_token(),
        })?;
        self.transport.emit(SUBSCRIBE, payload);

        let name: Arc<str> = channel.into();
        let retired = Arc::new(AtomicBool::new(false));
        let id = {
            let mut inner = self.inner.lock().unwrap();
            let id = inner.channels.insert(ChannelEntry {
                name: name.clone(),
                retired: retired.clone(),
                listeners: Vec::new(),
            });
            inner.order.push(id);
            id
        };
        log::debug!("subscribed, channel={}", channel);

        Ok(ChannelHandle::new(self.clone(), id, name, retired))
    }

    /// Unsubscribes from a channel by name.
    ///
    /// Emits `unsubscribe` and removes the first matching entry only. The
    /// handle owning that entry is retired. Unknown names still emit.
    pub fn unsubscribe(&self, channel: &str) -> Result<(), SessionError> {
        self.check_connection()?;
        self.emit_unsubscribe(channel)?;

        let listeners = {
            let mut inner = self.inner.lock().unwrap();
            let found = inner.order.iter().copied().find(|id| {
                inner
                    .channels
                    .get(*id)
                    .is_some_and(|entry| &*entry.name == channel)
            });
            match found {
                Some(id) => inner.remove_entry(id),
                None => {
                    log::debug!("unsubscribe for unknown channel {}", channel);
                    Vec::new()
                }
            }
        };
        for listener in listeners {
            self.transport.off(listener);
        }
        Ok(())
    }

    /// Whether the channel list holds at least one entry for `channel`
    pub fn channel_exists(&self, channel: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.channels.values().any(|entry| &*entry.name == channel)
    }

    /// Snapshot of the channel list in subscription order, duplicates included
    pub fn get_channels(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .order
            .iter()
            .filter_map(|id| inner.channels.get(*id))
            .map(|entry| entry.name.to_string())
            .collect()
    }

    /// Sends a message to a channel, subscribed or not.
    ///
    /// The returned future resolves to the server's acknowledgement when
    /// a timeout was given, and to `None` right away otherwise.
    ///
    /// # Example
    ///
    /// ```rust
    /// use serde_json::json;
    /// use tokio_pully::config::Config;
    /// use tokio_pully::errors::SessionError;
    /// use tokio_pully::session::{OutboundMessage, Session};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    ///     let config = Config::new()
    ///         .with_server_url("http://localhost:3000")
    ///         .with_auto_connect(false);
    ///     let session = Session::new(&config)?;
    ///
    ///     let result = session.send_message("room1", OutboundMessage::new(json!("hi")));
    ///     assert!(matches!(result, Err(SessionError::NotConnected)));
    ///     Ok(())
    /// }
    /// ```
    pub fn send_message(
        &self,
        channel: &str,
        message: OutboundMessage,
    ) -> Result<FutureResult<impl Future<Output = Result<Option<Value>, EmitError>> + use<>>, SessionError>
    {
        self.check_connection()?;

        let OutboundMessage {
            message,
            event,
            timeout,
        } = message;
        let payload = serde_json::to_value(SendMessageRequest {
            channel_name: channel.to_string(),
            message,
            event,
            token: self.payload_token(),
        })?;

        let ack = match timeout {
            Some(timeout) if !timeout.is_zero() => {
                Some(self.transport.emit_with_ack(SEND_MESSAGE, payload, timeout))
            }
            _ => {
                self.transport.emit(SEND_MESSAGE, payload);
                None
            }
        };

        Ok(FutureResult(async move {
            match ack {
                Some(ack) => ack.await.map(Some),
                None => Ok(None),
            }
        }))
    }

    /// Listens for the default event, `"message"` unless configured otherwise.
    pub fn listen(&self, func: impl FnMut(Value) + Send + 'static) -> Result<(), SessionError> {
        let event = self.default_event();
        self.listen_to(&event, func)
    }

    /// Listens for a named event. Listeners accumulate.
    pub fn listen_to(
        &self,
        event: &str,
        func: impl FnMut(Value) + Send + 'static,
    ) -> Result<(), SessionError> {
        self.check_connection()?;
        self.transport.on(event, Box::new(func));
        Ok(())
    }

    /// Fails with `NotConnected` while the transport is disconnected.
    ///
    /// A transport that is still connecting passes, it buffers emits until
    /// the connection is up.
    pub fn check_connection(&self) -> Result<(), SessionError> {
        match self.transport.state() {
            State::Disconnected => Err(SessionError::NotConnected),
            State::Connecting | State::Connected => Ok(()),
        }
    }

    pub(crate) fn default_event(&self) -> String {
        self.inner.lock().unwrap().default_event.clone()
    }

    pub(crate) fn payload_token(&self) -> Option<String> {
        self.inner.lock().unwrap().token.clone()
    }

    pub(crate) fn emit_unsubscribe(&self, channel: &str) -> Result<(), SessionError> {
        let payload = serde_json::to_value(ChannelRequest {
            channel: channel.to_string(),
            token: self.payload_token(),
        })?;
        self.transport.emit(UNSUBSCRIBE, payload);
        Ok(())
    }

    /// Removes the entry owned by a handle along with its listeners
    pub(crate) fn remove_channel(&self, id: ChannelId) {
        let listeners = self.inner.lock().unwrap().remove_entry(id);
        for listener in listeners {
            self.transport.off(listener);
        }
    }

    /// Ties a listener to a subscription entry.
    ///
    /// Returns false when the entry is already gone.
    pub(crate) fn attach_listener(&self, id: ChannelId, listener: ListenerId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.channels.get_mut(id) {
            Some(entry) => {
                entry.listeners.push(listener);
                true
            }
            None => false,
        }
    }
}
