//! Transport seam between a [`Session`](crate::session::Session) and the network.
//!
//! [`SocketClient`](crate::client::SocketClient) is the default
//! implementation. Anything able to emit named JSON events and deliver
//! inbound ones can stand in for it.

use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::client::{ConnectError, EmitError, EventCallback, ListenerId, State};

/// Real-time transport used by a session.
///
/// Every method initiates its work synchronously. Returned futures only
/// report the outcome and may be dropped.
pub trait Transport: Send + Sync + 'static {
    /// Opens the connection, resolving with the outcome of the next attempt
    /// or right away when already connected
    fn connect(&self) -> BoxFuture<'static, Result<(), ConnectError>>;

    /// Closes the connection, resolving once it is closed
    fn disconnect(&self) -> BoxFuture<'static, ()>;

    fn state(&self) -> State;

    /// Emits a named event without acknowledgement
    fn emit(&self, event: &str, data: Value);

    /// Emits a named event and waits up to `timeout` for the server's acknowledgement
    fn emit_with_ack(
        &self,
        event: &str,
        data: Value,
        timeout: Duration,
    ) -> BoxFuture<'static, Result<Value, EmitError>>;

    /// Adds a listener for an inbound event, listeners never replace each other
    fn on(&self, event: &str, callback: EventCallback) -> ListenerId;

    /// Removes a listener, unknown keys are ignored
    fn off(&self, id: ListenerId);
}
