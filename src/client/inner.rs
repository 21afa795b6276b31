//! Internal client implementation and connection lifecycle management.
//!
//! This module contains the state shared between the client handle and
//! its background tasks, the state transitions, and the connection cycle
//! driving connect, handshake, serving and reconnection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use slotmap::SlotMap;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

use crate::client::errors::ConnectError;
use crate::client::types::{EmitStore, EventCallback, ListenerId, State};
use crate::client_handler::ControlMessage;
use crate::config::{Endpoint, ReconnectStrategy, TokenPlacement};

use super::connection::ConnectionManager;
use super::handshake::HandshakeManager;

/// Internal client state shared with the background tasks.
pub(crate) struct ClientInner {
    /// Tokio runtime handle for spawning tasks
    pub(crate) rt: Handle,
    /// WebSocket URL and namespace
    pub(crate) endpoint: Endpoint,
    /// Current connection state
    pub(crate) state: State,
    /// Authentication token
    pub(crate) token: String,
    pub(crate) token_placement: TokenPlacement,
    pub(crate) app_id: Option<String>,
    /// Strategy for handling reconnection attempts
    pub(crate) reconnect_strategy: Arc<dyn ReconnectStrategy>,
    /// Timeout for each handshake step
    pub(crate) read_timeout: Duration,
    /// Channel for sending close signals
    pub(crate) closer_write: Option<mpsc::Sender<bool>>,
    pub(crate) on_connecting: Option<Box<dyn FnMut() + Send + 'static>>,
    pub(crate) on_connected: Option<Box<dyn FnMut() + Send + 'static>>,
    /// Channels waiting for the outcome of the current connection attempt
    pub(crate) on_connected_ch: Vec<oneshot::Sender<Result<(), ConnectError>>>,
    pub(crate) on_disconnected: Option<Box<dyn FnMut() + Send + 'static>>,
    /// Channels waiting for disconnection completion
    pub(crate) on_disconnected_ch: Vec<oneshot::Sender<()>>,
    pub(crate) on_error: Option<Box<dyn FnMut(anyhow::Error) + Send + 'static>>,
    /// Event listeners by event name, in registration order
    pub(crate) listeners: HashMap<String, Vec<(ListenerId, EventCallback)>>,
    /// Event name of every live listener
    pub(crate) listener_ids: SlotMap<ListenerId, String>,
    /// Outgoing packets, present unless disconnected
    pub(crate) emit_store: Option<EmitStore>,
    /// Reason given by the server for refusing the last handshake
    pub(crate) rejection: Option<String>,
}

impl ClientInner {
    /// Transitions the client to the connecting state and starts the connection cycle.
    pub(crate) fn move_to_connecting(&mut self, outer: Arc<Mutex<Self>>) {
        debug_assert_ne!(self.state, State::Connecting);
        if self.emit_store.is_none() {
            let (emit_store, _) = EmitStore::new();
            self.emit_store = Some(emit_store);
        }
        self.rejection = None;
        self._set_state(State::Connecting);
        self.start_connecting(outer);
    }

    /// Transitions the client to the connected state.
    ///
    /// Should only be called from the connecting state.
    pub(crate) fn move_to_connected(&mut self) {
        assert_eq!(self.state, State::Connecting);
        self._set_state(State::Connected);
    }

    /// Transitions the client to the disconnected state.
    ///
    /// Drops the close signal (which stops the running connection) and the
    /// emit buffer, failing whatever is still queued.
    pub(crate) fn move_to_disconnected(&mut self) {
        assert_ne!(self.state, State::Disconnected);
        self.closer_write = None;
        if let Some(store) = self.emit_store.take() {
            if store.len() > 0 {
                log::debug!("dropping {} queued emits", store.len());
            }
        }
        for ch in self.on_connected_ch.drain(..) {
            let _ = ch.send(Err(ConnectError::Disconnected));
        }
        self._set_state(State::Disconnected);
    }

    /// Runs connection attempts until one succeeds, serves it, and decides what comes next.
    async fn do_connection_cycle(client: Arc<Mutex<Self>>) {
        let client1 = client.clone();
        let need_reconnect = async move {
            let mut reconnect_attempt = 0;
            let (future, control_write) = loop {
                let mut closer_read = {
                    let mut inner = client.lock().unwrap();
                    let (closer_write, closer_read) = mpsc::channel::<bool>(1);
                    inner.closer_write = Some(closer_write);
                    closer_read
                };

                let result: Result<_, bool> = async {
                    reconnect_attempt += 1;
                    ConnectionManager::do_check_state(&client, State::Connecting)?;
                    ConnectionManager::do_delay(&client, &mut closer_read, reconnect_attempt - 1)
                        .await?;

                    ConnectionManager::do_check_state(&client, State::Connecting)?;
                    let stream = ConnectionManager::do_connect(&client, &mut closer_read).await?;

                    ConnectionManager::do_check_state(&client, State::Connecting)?;
                    HandshakeManager::do_handshake(&client, closer_read, stream).await
                }
                .await;

                let mut inner = client.lock().unwrap();
                if inner.state != State::Connecting {
                    return false;
                }
                if result.is_ok() {
                    // before waking the waiters
                    inner.move_to_connected();
                }
                let rejection = inner.rejection.clone();
                for ch in inner.on_connected_ch.drain(..) {
                    let _ = ch.send(match (result.as_ref(), rejection.as_ref()) {
                        (Ok(_), _) => Ok(()),
                        (Err(_), Some(message)) => Err(ConnectError::Rejected(message.clone())),
                        (Err(_), None) => Err(ConnectError::Failed),
                    });
                }
                if result.is_err() && rejection.is_some() {
                    // refused by the server, no reconnect
                    inner.move_to_disconnected();
                }

                match result {
                    Ok(established) => {
                        // connection successful
                        break established;
                    }
                    Err(true) => {
                        // reconnect
                        continue;
                    }
                    Err(false) => {
                        // interrupted or rejected
                        return false;
                    }
                }
            };

            let rt = client.lock().unwrap().rt.clone();

            let mut join_set = JoinSet::new();
            join_set.spawn_on(async move { Some(future.await) }, &rt);
            join_set.spawn_on(
                async move {
                    Self::flush_task(client, control_write).await;
                    None
                },
                &rt,
            );

            while let Some(result) = join_set.join_next().await {
                match result {
                    Ok(Some(need_reconnect)) => return need_reconnect,
                    Ok(None) => {}
                    Err(err) => {
                        log::debug!("task failed: {:?}", err);
                        return false;
                    }
                }
            }

            false
        }
        .await;

        let mut inner = client1.lock().unwrap();
        if need_reconnect && inner.state == State::Connected {
            // connection lost
            inner.move_to_connecting(client1.clone());
        } else {
            if inner.state != State::Disconnected {
                inner.move_to_disconnected();
            }
            for ch in inner.on_disconnected_ch.drain(..) {
                let _ = ch.send(());
            }
        }
    }

    /// Moves buffered emits to the websocket writer, in order.
    async fn flush_task(client: Arc<Mutex<Self>>, control_write: mpsc::Sender<ControlMessage>) {
        let mut activity = {
            let mut inner = client.lock().unwrap();
            let Some(store) = inner.emit_store.as_mut() else {
                return;
            };
            store.reset_channel()
        };

        const MAX_CAPACITY: usize = 32;
        let mut buffer = Vec::new();
        loop {
            {
                // lock mutex and fill our buffer
                let mut inner = client.lock().unwrap();
                let Some(store) = inner.emit_store.as_mut() else {
                    break;
                };
                let now = Instant::now();
                for _ in 0..MAX_CAPACITY {
                    if let Some(item) = store.get_next(now) {
                        buffer.push(item);
                    } else {
                        break;
                    }
                }
            }

            if buffer.is_empty() {
                // wait for activity
                let Some(()) = activity.recv().await else {
                    break;
                };
                continue;
            }

            for item in buffer.drain(..) {
                let ack = item.ack.map(|ack| {
                    let timeout = ack.deadline.saturating_duration_since(Instant::now());
                    (ack.reply, timeout)
                });
                if control_write.send((item.packet, ack)).await.is_err() {
                    return;
                }
            }
        }
    }

    /// Calls the listeners of `event` without holding the client lock.
    ///
    /// Listeners added while dispatching are kept and run on the next event,
    /// listeners removed while dispatching are dropped afterwards.
    pub(crate) fn dispatch(client: &Arc<Mutex<Self>>, event: &str, data: Value) {
        let mut callbacks = {
            let mut inner = client.lock().unwrap();
            match inner.listeners.get_mut(event) {
                Some(callbacks) if !callbacks.is_empty() => std::mem::take(callbacks),
                _ => {
                    log::trace!("no listener for event {}", event);
                    return;
                }
            }
        };

        for (_, callback) in callbacks.iter_mut() {
            callback(data.clone());
        }

        let mut inner = client.lock().unwrap();
        let inner = &mut *inner;
        callbacks.retain(|(id, _)| inner.listener_ids.contains_key(*id));
        let slot = inner.listeners.entry(event.to_string()).or_default();
        let added = std::mem::replace(slot, callbacks);
        slot.extend(added);
    }

    pub(crate) fn add_listener(&mut self, event: &str, callback: EventCallback) -> ListenerId {
        let id = self.listener_ids.insert(event.to_string());
        self.listeners
            .entry(event.to_string())
            .or_default()
            .push((id, callback));
        id
    }

    pub(crate) fn remove_listener(&mut self, id: ListenerId) {
        let Some(event) = self.listener_ids.remove(id) else {
            return;
        };
        if let Some(callbacks) = self.listeners.get_mut(&event) {
            callbacks.retain(|(other, _)| *other != id);
            if callbacks.is_empty() {
                self.listeners.remove(&event);
            }
        }
    }

    /// Calls the error callback without holding the client lock.
    pub(crate) fn report_error(client: &Arc<Mutex<Self>>, err: anyhow::Error) {
        let on_error = client.lock().unwrap().on_error.take();
        let Some(mut on_error) = on_error else {
            log::debug!("unreported error: {}", err);
            return;
        };
        on_error(err);

        let mut inner = client.lock().unwrap();
        if inner.on_error.is_none() {
            inner.on_error = Some(on_error);
        }
    }

    /// Auth payload of the CONNECT packet
    pub(crate) fn auth_payload(&self) -> Option<Value> {
        let app_id = self
            .app_id
            .as_ref()
            .map(|_| Value::String(self.endpoint.namespace.clone()));

        match (self.token_placement, app_id) {
            (TokenPlacement::Auth, Some(app_id)) => {
                Some(json!({ "token": self.token, "appId": app_id }))
            }
            (TokenPlacement::Auth, None) => Some(json!({ "token": self.token })),
            (TokenPlacement::Header, Some(app_id)) => Some(json!({ "appId": app_id })),
            (TokenPlacement::Header, None) => None,
        }
    }

    /// Token sent on the upgrade request, if it travels as a header
    pub(crate) fn header_token(&self) -> Option<&str> {
        match self.token_placement {
            TokenPlacement::Header => Some(&self.token),
            TokenPlacement::Auth => None,
        }
    }

    fn start_connecting(&mut self, client: Arc<Mutex<Self>>) {
        self.rt.spawn(Self::do_connection_cycle(client));
    }

    /// Updates the state and fires the matching callback.
    fn _set_state(&mut self, state: State) {
        log::debug!("state: {:?} -> {:?}", self.state, state);
        self.state = state;

        match state {
            State::Disconnected => {
                if let Some(ref mut on_disconnected) = self.on_disconnected {
                    on_disconnected();
                }
            }
            State::Connecting => {
                if let Some(ref mut on_connecting) = self.on_connecting {
                    on_connecting();
                }
            }
            State::Connected => {
                if let Some(ref mut on_connected) = self.on_connected {
                    on_connected();
                }
            }
        }
    }
}
