//! Per-channel handles returned by [`Session::subscribe`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;

use crate::client::{EmitError, FutureResult};
use crate::errors::SessionError;
use crate::session::{ChannelId, OutboundMessage, Session};

/// Whether a handle still owns its subscription entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Active,
    /// The entry was removed, by this handle or by `Session::unsubscribe`
    Retired,
}

/// Operations bound to one channel and one subscription entry.
///
/// Once retired a handle refuses to send or listen, and the listeners it
/// registered are removed from the transport.
#[derive(Clone)]
pub struct ChannelHandle {
    id: ChannelId,
    channel: Arc<str>,
    retired: Arc<AtomicBool>,
    session: Session,
}

impl ChannelHandle {
    pub(crate) fn new(
        session: Session,
        id: ChannelId,
        channel: Arc<str>,
        retired: Arc<AtomicBool>,
    ) -> Self {
        ChannelHandle {
            id,
            channel,
            retired,
            session,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn state(&self) -> HandleState {
        if self.retired.load(Ordering::Acquire) {
            HandleState::Retired
        } else {
            HandleState::Active
        }
    }

    /// Sends a message tagged with this channel.
    ///
    /// See [`Session::send_message`].
    pub fn send_message(
        &self,
        message: OutboundMessage,
    ) -> Result<FutureResult<impl Future<Output = Result<Option<Value>, EmitError>> + use<>>, SessionError>
    {
        self.check_active()?;
        self.session.send_message(&self.channel, message)
    }

    /// Listens for the default event while this handle is active.
    pub fn listen(&self, func: impl FnMut(Value) + Send + 'static) -> Result<(), SessionError> {
        let event = self.session.default_event();
        self.listen_to(&event, func)
    }

    /// Listens for a named event while this handle is active.
    ///
    /// Events are not filtered by channel, the server decides what reaches
    /// this client.
    pub fn listen_to(
        &self,
        event: &str,
        mut func: impl FnMut(Value) + Send + 'static,
    ) -> Result<(), SessionError> {
        self.check_active()?;
        self.session.check_connection()?;

        let retired = self.retired.clone();
        let listener = self.session.transport.on(
            event,
            Box::new(move |data| {
                if !retired.load(Ordering::Acquire) {
                    func(data);
                }
            }),
        );
        if !self.session.attach_listener(self.id, listener) {
            // retired in the meantime
            self.session.transport.off(listener);
            return Err(SessionError::Retired {
                channel: self.channel.to_string(),
            });
        }
        Ok(())
    }

    /// Emits `unsubscribe` for this channel, removes this handle's entry
    /// and the listeners registered through it.
    ///
    /// Does nothing on a retired handle.
    pub fn unsubscribe(&self) -> Result<(), SessionError> {
        if self.state() == HandleState::Retired {
            log::debug!("handle already retired, channel={}", self.channel);
            return Ok(());
        }
        self.session.check_connection()?;
        self.session.emit_unsubscribe(&self.channel)?;
        self.session.remove_channel(self.id);
        Ok(())
    }

    fn check_active(&self) -> Result<(), SessionError> {
        match self.state() {
            HandleState::Active => Ok(()),
            HandleState::Retired => Err(SessionError::Retired {
                channel: self.channel.to_string(),
            }),
        }
    }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("channel", &self.channel)
            .field("state", &self.state())
            .finish()
    }
}
