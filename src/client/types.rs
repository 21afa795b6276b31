//! Client types and state management.
//!
//! This module contains the connection state of the socket client and
//! the buffer holding emits until they can be written to the socket.

use std::collections::VecDeque;
use std::time::Instant;

use serde_json::Value;
use slotmap::new_key_type;
use tokio::sync::{mpsc, oneshot};

use super::errors::EmitError;
use crate::protocol::Packet;

/// Represents the current connection state of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Client is not connected and will not connect on its own
    Disconnected,
    /// Client is establishing (or re-establishing) a connection
    Connecting,
    /// Handshake completed, namespace joined
    Connected,
}

/// Callback invoked with the payload of an inbound event.
pub type EventCallback = Box<dyn FnMut(Value) + Send + 'static>;

new_key_type! {
    /// Key of a registered event listener, used to remove it again.
    pub struct ListenerId;
}

pub(crate) type AckSender = oneshot::Sender<Result<Value, EmitError>>;

pub(crate) struct PendingAck {
    pub(crate) reply: AckSender,
    pub(crate) deadline: Instant,
}

/// A packet waiting to be written, with its acknowledgement slot if any.
pub(crate) struct EmitStoreItem {
    pub(crate) packet: Packet,
    pub(crate) ack: Option<PendingAck>,
}

impl EmitStoreItem {
    /// Returns `None` and fails the waiter if the acknowledgement deadline passed.
    ///
    /// Fire-and-forget items never expire.
    fn check_expiration(self, now: Instant) -> Option<Self> {
        match self.ack {
            Some(ack) if ack.deadline <= now => {
                let _ = ack.reply.send(Err(EmitError::Timeout));
                None
            }
            _ => Some(self),
        }
    }
}

/// Ordered buffer of outgoing packets.
///
/// Items pile up while the client is connecting and are drained by the
/// flush task once the connection is up. Every push pings the activity
/// channel so the flush task can wake up.
pub(crate) struct EmitStore {
    activity: mpsc::Sender<()>,
    items: VecDeque<EmitStoreItem>,
}

impl EmitStore {
    pub(crate) fn new() -> (Self, mpsc::Receiver<()>) {
        let (activity_tx, activity_rx) = mpsc::channel(1);
        let store = Self {
            activity: activity_tx,
            items: VecDeque::new(),
        };
        (store, activity_rx)
    }

    pub(crate) fn push(&mut self, packet: Packet) {
        self.push_item(EmitStoreItem { packet, ack: None });
    }

    pub(crate) fn push_with_ack(&mut self, packet: Packet, deadline: Instant) -> oneshot::Receiver<Result<Value, EmitError>> {
        let (tx, rx) = oneshot::channel();
        self.push_item(EmitStoreItem {
            packet,
            ack: Some(PendingAck { reply: tx, deadline }),
        });
        rx
    }

    fn push_item(&mut self, item: EmitStoreItem) {
        self.items.push_back(item);
        let _ = self.activity.try_send(());
    }

    /// Replaces the activity channel, used when a new connection starts flushing.
    pub(crate) fn reset_channel(&mut self) -> mpsc::Receiver<()> {
        let (activity_tx, activity_rx) = mpsc::channel(1);
        self.activity = activity_tx;
        activity_rx
    }

    /// Next item still worth sending, expired ones are failed and skipped.
    pub(crate) fn get_next(&mut self, now: Instant) -> Option<EmitStoreItem> {
        loop {
            let item = self.items.pop_front()?;
            if let Some(item) = item.check_expiration(now) {
                return Some(item);
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }
}
