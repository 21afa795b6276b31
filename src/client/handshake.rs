//! Engine.IO and Socket.IO handshake.
//!
//! After the WebSocket is open the server sends an Engine.IO `open`
//! packet, the client then joins its namespace with a CONNECT packet
//! and waits for the server to accept or refuse it.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::client_handler::{ControlMessage, HandlerParams, WsStream};
use crate::protocol::{EnginePacket, OpenInfo, Packet};
use crate::utils::{encode_engine, encode_packet};

use super::inner::ClientInner;

/// Handler future serving the connection, and the channel feeding its writer.
pub(crate) type Established = (
    Pin<Box<dyn Future<Output = bool> + Send>>,
    mpsc::Sender<ControlMessage>,
);

enum Failure {
    Retry,
    Rejected(String),
}

/// Manages the handshake on a freshly opened WebSocket.
pub(crate) struct HandshakeManager;

impl HandshakeManager {
    /// Performs the handshake, then hands the stream over to the websocket handler.
    ///
    /// Returns `Err(true)` when the attempt should be retried, `Err(false)`
    /// when the user interrupted it or the server refused the namespace.
    pub(crate) fn do_handshake(
        client: &Arc<Mutex<ClientInner>>,
        mut closer_read: mpsc::Receiver<bool>,
        mut stream: WsStream,
    ) -> impl Future<Output = Result<Established, bool>> + '_ {
        let (rt, namespace, auth, read_timeout) = {
            let inner = client.lock().unwrap();
            (
                inner.rt.clone(),
                inner.endpoint.namespace.clone(),
                inner.auth_payload(),
                inner.read_timeout,
            )
        };

        async move {
            let result = tokio::select! {
                biased;
                _ = closer_read.recv() => {
                    log::debug!("handshake interrupted by user");
                    Err(false)
                }
                result = Self::exchange(&mut stream, &namespace, auth, read_timeout) => {
                    result.map_err(|failure| match failure {
                        Failure::Retry => true,
                        Failure::Rejected(message) => {
                            log::debug!("handshake rejected: {}", message);
                            let err = anyhow!("connection rejected by server: {}", message);
                            client.lock().unwrap().rejection = Some(message);
                            ClientInner::report_error(client, err);
                            false
                        }
                    })
                }
            };

            let open = match result {
                Ok(open) => open,
                Err(do_reconnect) => {
                    let _ = stream.close(None).await;
                    return Err(do_reconnect);
                }
            };

            log::debug!("connection established, sid={} namespace={}", open.sid, namespace);

            let (control_write, control_read) = mpsc::channel(32);

            let client1 = client.clone();
            let client2 = client.clone();
            let handler_future: Pin<Box<dyn Future<Output = bool> + Send>> =
                Box::pin(crate::client_handler::websocket_handler(
                    rt,
                    stream,
                    control_read,
                    closer_read,
                    HandlerParams {
                        namespace: namespace.into(),
                        heartbeat: open.heartbeat(),
                    },
                    move |event, data| {
                        ClientInner::dispatch(&client1, &event, data);
                    },
                    move |err| {
                        ClientInner::report_error(&client2, err);
                    },
                ));

            Ok((handler_future, control_write))
        }
    }

    async fn exchange(
        stream: &mut WsStream,
        namespace: &str,
        auth: Option<Value>,
        read_timeout: Duration,
    ) -> Result<OpenInfo, Failure> {
        let open = tokio::time::timeout(read_timeout, Self::read_open(stream))
            .await
            .map_err(|_| {
                log::debug!("no open packet within {:?}", read_timeout);
                Failure::Retry
            })??;

        let connect = Packet::Connect {
            namespace: namespace.to_string(),
            data: auth,
        };
        if let Err(err) = stream.send(encode_packet(&connect)).await {
            log::debug!("failed to send connect: {}", err);
            return Err(Failure::Retry);
        }

        tokio::time::timeout(read_timeout, Self::read_connect_reply(stream, namespace))
            .await
            .map_err(|_| {
                log::debug!("no connect reply within {:?}", read_timeout);
                Failure::Retry
            })??;

        Ok(open)
    }

    async fn read_open(stream: &mut WsStream) -> Result<OpenInfo, Failure> {
        loop {
            match EnginePacket::decode(&Self::next_text(stream).await?) {
                Ok(EnginePacket::Open(open)) => return Ok(open),
                Ok(packet) => log::debug!("unexpected packet before open: {:?}", packet),
                Err(err) => {
                    log::debug!("failed to parse frame: {}", err);
                    return Err(Failure::Retry);
                }
            }
        }
    }

    // the server may ping or talk on other namespaces before it answers
    async fn read_connect_reply(stream: &mut WsStream, namespace: &str) -> Result<(), Failure> {
        loop {
            let payload = match EnginePacket::decode(&Self::next_text(stream).await?) {
                Ok(EnginePacket::Message(payload)) => payload,
                Ok(EnginePacket::Ping) => {
                    if stream.send(encode_engine(&EnginePacket::Pong)).await.is_err() {
                        return Err(Failure::Retry);
                    }
                    continue;
                }
                Ok(EnginePacket::Close) => return Err(Failure::Retry),
                Ok(_) => continue,
                Err(err) => {
                    log::debug!("failed to parse frame: {}", err);
                    return Err(Failure::Retry);
                }
            };

            match Packet::decode(&payload) {
                Ok(packet) if packet.namespace() != namespace => {
                    log::trace!("ignoring packet for namespace {}", packet.namespace());
                }
                Ok(Packet::Connect { .. }) => return Ok(()),
                Ok(Packet::ConnectError { data, .. }) => {
                    let message = match data.get("message").and_then(Value::as_str) {
                        Some(message) => message.to_string(),
                        None => data.to_string(),
                    };
                    return Err(Failure::Rejected(message));
                }
                Ok(packet) => log::debug!("unexpected packet before connect: {:?}", packet),
                Err(err) => {
                    log::debug!("failed to parse packet: {}", err);
                    return Err(Failure::Retry);
                }
            }
        }
    }

    async fn next_text(stream: &mut WsStream) -> Result<String, Failure> {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    log::trace!("<-- {}", text.as_str());
                    return Ok(text.as_str().to_string());
                }
                Some(Ok(Message::Close(close_frame))) => {
                    log::debug!("connection closed by remote: {:?}", close_frame);
                    return Err(Failure::Retry);
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    log::debug!("failed to read message: {}", err);
                    return Err(Failure::Retry);
                }
                None => return Err(Failure::Retry),
            }
        }
    }
}
