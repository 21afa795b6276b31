//! Socket.IO client used as the default session transport.
//!
//! `SocketClient` keeps one WebSocket connection to a Pully server,
//! joins the configured namespace, reconnects when the connection is
//! lost, and dispatches inbound events to registered listeners.
//!
//! # Example
//!
//! ```rust
//! use tokio_pully::client::{SocketClient, State};
//! use tokio_pully::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = Config::new()
//!         .with_server_url("http://localhost:3000")
//!         .with_app_id("my-app")
//!         .with_token("your-auth-token");
//!
//!     let client = SocketClient::new(&config)?;
//!     assert_eq!(client.namespace(), "/my-app");
//!     assert_eq!(client.state(), State::Disconnected);
//!
//!     let listener = client.on("message", |data| println!("received {}", data));
//!     client.off(listener);
//!
//!     // Note: In a real application you would await the connection
//!     // client.connect().await?;
//!     // client.emit("subscribe", serde_json::json!({"channel": "news"}));
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod errors;
pub mod handshake;
pub mod inner;
pub mod types;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use slotmap::SlotMap;
use tokio::sync::oneshot;

use crate::config::Config;
use crate::errors::ConfigError;
use crate::protocol::Packet;
use crate::transport::Transport;
use crate::utils::build_request;

pub use errors::{ConnectError, EmitError, FutureResult};
use inner::ClientInner;
pub use types::{EventCallback, ListenerId, State};

/// Socket.IO client over a single WebSocket.
///
/// # Thread Safety
///
/// The client is safe to use from multiple threads and can be cloned.
/// All clones share one connection.
#[derive(Clone)]
pub struct SocketClient(pub(crate) Arc<Mutex<ClientInner>>);

impl SocketClient {
    /// Creates a disconnected client.
    ///
    /// The configuration is validated first. A tokio runtime is taken from
    /// the configuration or from the current context.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let endpoint = config.endpoint()?;

        let rt = match config.runtime.clone() {
            Some(rt) => rt,
            None => tokio::runtime::Handle::try_current().map_err(|_| ConfigError::NoRuntime)?,
        };

        let inner = ClientInner {
            rt,
            endpoint,
            state: State::Disconnected,
            token: config.token.clone(),
            token_placement: config.token_placement,
            app_id: config.app_id.clone(),
            reconnect_strategy: config.reconnect_strategy.clone(),
            read_timeout: config.read_timeout,
            closer_write: None,
            on_connecting: None,
            on_connected: None,
            on_connected_ch: Vec::new(),
            on_disconnected: None,
            on_disconnected_ch: Vec::new(),
            on_error: None,
            listeners: HashMap::new(),
            listener_ids: SlotMap::with_key(),
            emit_store: None,
            rejection: None,
        };
        build_request(&inner.endpoint.url, inner.header_token())?;

        Ok(Self(Arc::new(Mutex::new(inner))))
    }

    /// WebSocket URL the client connects to
    pub fn url(&self) -> String {
        self.0.lock().unwrap().endpoint.url.clone()
    }

    /// Socket.IO namespace joined by the client
    pub fn namespace(&self) -> String {
        self.0.lock().unwrap().endpoint.namespace.clone()
    }

    /// Initiates a connection to the server.
    ///
    /// The connection attempt starts immediately, the returned future
    /// resolves with the outcome of the first attempt. While the client is
    /// already connecting it resolves with the outcome of the attempt in
    /// progress or the next one, and right away once connected.
    ///
    /// After a failed attempt the client keeps reconnecting in the background,
    /// unless the server refused the namespace.
    pub fn connect(
        &self,
    ) -> FutureResult<impl Future<Output = Result<(), ConnectError>> + use<>> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.0.lock().unwrap();
        match inner.state {
            State::Disconnected => {
                inner.on_connected_ch.push(tx);
                inner.move_to_connecting(self.0.clone());
            }
            State::Connecting => inner.on_connected_ch.push(tx),
            State::Connected => {
                let _ = tx.send(Ok(()));
            }
        }
        FutureResult(async {
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(ConnectError::Failed),
            }
        })
    }

    /// Disconnects from the server.
    ///
    /// A Socket.IO DISCONNECT is sent for the namespace if connected.
    /// The returned future resolves once the connection is closed.
    pub fn disconnect(&self) -> FutureResult<impl Future<Output = ()> + use<>> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.0.lock().unwrap();
        if inner.state != State::Disconnected {
            inner.on_disconnected_ch.push(tx);
            inner.move_to_disconnected();
        } else {
            let _ = tx.send(());
        }
        FutureResult(async {
            let _ = rx.await;
        })
    }

    /// Emits an event without acknowledgement.
    ///
    /// The event is buffered while connecting and dropped while disconnected.
    pub fn emit(&self, event: &str, data: Value) {
        let mut inner = self.0.lock().unwrap();
        let packet = Packet::event(&inner.endpoint.namespace, event, data);
        match inner.emit_store.as_mut() {
            Some(store) => store.push(packet),
            None => log::debug!("not connected, dropping {} emit", event),
        }
    }

    /// Emits an event and waits for the server to acknowledge it.
    ///
    /// The timeout runs from this call, time spent in the buffer counts.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use serde_json::json;
    /// use tokio_pully::client::{EmitError, SocketClient};
    /// use tokio_pully::config::Config;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    ///     let config = Config::new().with_server_url("http://localhost:3000");
    ///     let client = SocketClient::new(&config)?;
    ///
    ///     // never connected, so there is no one to acknowledge
    ///     let result = client
    ///         .emit_with_ack("ping", json!({}), Duration::from_millis(100))
    ///         .await;
    ///     assert_eq!(result, Err(EmitError::Closed));
    ///     Ok(())
    /// }
    /// ```
    pub fn emit_with_ack(
        &self,
        event: &str,
        data: Value,
        timeout: Duration,
    ) -> FutureResult<impl Future<Output = Result<Value, EmitError>> + use<>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.0.lock().unwrap();
        let packet = Packet::event(&inner.endpoint.namespace, event, data);
        let rx = if let Some(ref mut store) = inner.emit_store {
            store.push_with_ack(packet, deadline)
        } else {
            log::debug!("not connected, failing {} emit", event);
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(Err(EmitError::Closed));
            rx
        };
        FutureResult(async move {
            match tokio::time::timeout_at(deadline.into(), rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(err)) => Err(err.into()),
                Err(err) => Err(err.into()),
            }
        })
    }

    /// Registers a listener for an inbound event.
    ///
    /// Listeners accumulate, each registered one is called for every event.
    /// The callback receives the first event argument, `null` when there is
    /// none and an array when there are several.
    pub fn on(&self, event: &str, func: impl FnMut(Value) + Send + 'static) -> ListenerId {
        self.0.lock().unwrap().add_listener(event, Box::new(func))
    }

    /// Removes a listener registered with [`on`](Self::on).
    ///
    /// A listener removed while its event is being dispatched is dropped once
    /// that dispatch finishes.
    pub fn off(&self, id: ListenerId) {
        self.0.lock().unwrap().remove_listener(id);
    }

    /// Sets a callback for when the client starts connecting.
    pub fn on_connecting(&self, func: impl FnMut() + Send + 'static) {
        self.0.lock().unwrap().on_connecting = Some(Box::new(func));
    }

    /// Sets a callback for when the namespace is joined.
    pub fn on_connected(&self, func: impl FnMut() + Send + 'static) {
        self.0.lock().unwrap().on_connected = Some(Box::new(func));
    }

    /// Sets a callback for when the client stops for good.
    ///
    /// Lost connections that are being re-established go through
    /// `on_connecting` instead.
    pub fn on_disconnected(&self, func: impl FnMut() + Send + 'static) {
        self.0.lock().unwrap().on_disconnected = Some(Box::new(func));
    }

    /// Sets a callback for errors raised by background tasks.
    ///
    /// # Example
    ///
    /// ```rust
    /// use tokio_pully::client::SocketClient;
    /// use tokio_pully::config::Config;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    ///     let config = Config::new().with_server_url("http://localhost:3000");
    ///     let client = SocketClient::new(&config)?;
    ///     client.on_error(|err| eprintln!("client error: {}", err));
    ///     Ok(())
    /// }
    /// ```
    pub fn on_error(&self, func: impl FnMut(anyhow::Error) + Send + 'static) {
        self.0.lock().unwrap().on_error = Some(Box::new(func));
    }

    /// Returns the current connection state.
    pub fn state(&self) -> State {
        self.0.lock().unwrap().state
    }

    /// Updates the authentication token used by the next connection attempt.
    pub fn set_token(&self, token: impl Into<String>) {
        self.0.lock().unwrap().token = token.into();
    }
}

impl Transport for SocketClient {
    fn connect(&self) -> BoxFuture<'static, Result<(), ConnectError>> {
        SocketClient::connect(self).into_future().boxed()
    }

    fn disconnect(&self) -> BoxFuture<'static, ()> {
        SocketClient::disconnect(self).into_future().boxed()
    }

    fn state(&self) -> State {
        SocketClient::state(self)
    }

    fn emit(&self, event: &str, data: Value) {
        SocketClient::emit(self, event, data)
    }

    fn emit_with_ack(
        &self,
        event: &str,
        data: Value,
        timeout: Duration,
    ) -> BoxFuture<'static, Result<Value, EmitError>> {
        SocketClient::emit_with_ack(self, event, data, timeout)
            .into_future()
            .boxed()
    }

    fn on(&self, event: &str, callback: EventCallback) -> ListenerId {
        self.0.lock().unwrap().add_listener(event, callback)
    }

    fn off(&self, id: ListenerId) {
        SocketClient::off(self, id)
    }
}
