//! Connection management and reconnection logic.
//!
//! This module handles the low-level connection operations: waiting
//! between reconnection attempts and opening the WebSocket.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::client::types::State;
use crate::client_handler::WsStream;
use crate::utils::build_request;

use super::inner::ClientInner;

/// Manages connection establishment and reconnection logic.
pub(crate) struct ConnectionManager;

impl ConnectionManager {
    /// Waits before the next reconnection attempt.
    ///
    /// The first attempt is made without delay. Returns `Err(false)`
    /// if interrupted by the user.
    pub(crate) fn do_delay<'a>(
        client: &Arc<Mutex<ClientInner>>,
        closer_read: &'a mut mpsc::Receiver<bool>,
        reconnect_attempts: u32,
    ) -> impl Future<Output = Result<(), bool>> + 'a {
        let delay = {
            let inner = client.lock().unwrap();
            if reconnect_attempts > 0 {
                inner
                    .reconnect_strategy
                    .time_before_next_attempt(reconnect_attempts)
            } else {
                Duration::ZERO
            }
        };

        async move {
            let task = async {
                if reconnect_attempts > 0 {
                    log::debug!(
                        "reconnecting attempt {}, delay={:?}",
                        reconnect_attempts,
                        delay
                    );
                }
                tokio::time::sleep(delay).await;
                Ok(())
            };

            tokio::select! {
                biased;
                _ = closer_read.recv() => {
                    log::debug!("reconnect interrupted by user");
                    Err(false)
                }
                result = task => result
            }
        }
    }

    /// Opens the WebSocket to the Engine.IO endpoint.
    ///
    /// The upgrade request is rebuilt on every attempt so that a token
    /// changed with `set_token` is picked up. Returns `Err(true)` when
    /// another attempt should be made.
    pub(crate) fn do_connect<'a>(
        client: &Arc<Mutex<ClientInner>>,
        closer_read: &'a mut mpsc::Receiver<bool>,
    ) -> impl Future<Output = Result<WsStream, bool>> + 'a {
        let request = {
            let inner = client.lock().unwrap();
            build_request(&inner.endpoint.url, inner.header_token())
        };

        let client = client.clone();
        async move {
            let request = match request {
                Ok(request) => request,
                Err(err) => {
                    // invalid url or token, don't reconnect
                    log::debug!("{err}");
                    ClientInner::report_error(&client, err.into());
                    return Err(false);
                }
            };

            let task = async {
                log::debug!("connecting to {}", request.uri());
                match tokio_tungstenite::connect_async(request).await {
                    Ok((stream, _)) => Ok(stream),
                    Err(err) => {
                        log::debug!("{err}");
                        if client.lock().unwrap().state != State::Connecting {
                            return Err(false);
                        }

                        let do_reconnect = match err {
                            tokio_tungstenite::tungstenite::Error::Url(_) => {
                                // invalid url, don't reconnect
                                false
                            }
                            _ => true,
                        };

                        ClientInner::report_error(&client, err.into());
                        Err(do_reconnect)
                    }
                }
            };

            tokio::select! {
                biased;
                _ = closer_read.recv() => {
                    log::debug!("reconnect interrupted by user");
                    Err(false)
                }
                result = task => result
            }
        }
    }

    /// Returns `Err(false)` unless the client is in the expected state.
    pub(crate) fn do_check_state(
        client: &Arc<Mutex<ClientInner>>,
        expected: State,
    ) -> Result<(), bool> {
        let inner = client.lock().unwrap();
        if inner.state != expected {
            return Err(false);
        }
        Ok(())
    }
}
