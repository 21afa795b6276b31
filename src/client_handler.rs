use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::client::errors::EmitError;
use crate::client::types::AckSender;
use crate::protocol::{EnginePacket, Packet, collapse_args};
use crate::utils::{encode_engine, encode_packet};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Packet to write, with the acknowledgement waiter and its remaining time.
pub(crate) type ControlMessage = (Packet, Option<(AckSender, Duration)>);

pub(crate) struct HandlerParams {
    pub(crate) namespace: Arc<str>,
    pub(crate) heartbeat: Duration,
}

// serves an established socket.io connection until it ends,
// returns whether the client should reconnect
#[allow(clippy::option_map_unit_fn)]
pub(crate) async fn websocket_handler(
    rt: tokio::runtime::Handle,
    stream: WsStream,
    mut control_ch: mpsc::Receiver<ControlMessage>,
    mut closer_ch: mpsc::Receiver<bool>,
    params: HandlerParams,
    on_event: impl Fn(String, Value) + Send + Sync + 'static,
    on_error: impl Fn(anyhow::Error) + Send + Sync + 'static,
) -> bool {
    struct AckMap<T> {
        id: AtomicU64,
        map: Mutex<HashMap<u64, (T, Option<AbortHandle>)>>,
    }
    let ack_map_arc = Arc::new(AckMap::<AckSender> {
        id: AtomicU64::new(0),
        map: Mutex::new(HashMap::new()),
    });

    let (mut write_ws, mut read_ws) = stream.split();
    let (pong_write, mut pong_read) = mpsc::channel::<()>(1);
    let on_error_arc = Arc::new(on_error);
    let HandlerParams { namespace, heartbeat } = params;

    let on_error = on_error_arc.clone();
    let ack_map = ack_map_arc.clone();
    let reader_namespace = namespace.clone();
    let reader_task = rt.spawn(async move {
        let namespace = reader_namespace;
        let silence = tokio::time::sleep(heartbeat);
        tokio::pin!(silence);

        // (reconnect, closed by us)
        let (do_reconnect, closed_locally) = 'outer: loop {
            tokio::select! {
                biased;

                do_reconnect = closer_ch.recv() => {
                    break 'outer (do_reconnect.unwrap_or(false), true);
                }

                _ = &mut silence => {
                    log::debug!("no packet from server within {:?}", heartbeat);
                    break 'outer (true, false);
                }

                remote_msg = read_ws.next() => {
                    let message = match remote_msg {
                        Some(Ok(message)) => message,
                        Some(Err(err)) => {
                            log::debug!("failed to read message: {}", err);
                            on_error(anyhow!(err));
                            break 'outer (true, false);
                        }
                        None => break 'outer (true, false),
                    };

                    silence.as_mut().reset(Instant::now() + heartbeat);

                    let text = match message {
                        Message::Text(text) => text,
                        Message::Binary(_) => {
                            log::debug!("binary frames are not supported, skipping");
                            continue 'outer;
                        }
                        Message::Close(close_frame) => {
                            log::debug!("connection closed by remote: {:?}", close_frame);
                            break 'outer (true, false);
                        }
                        _ => continue 'outer,
                    };

                    log::trace!("<-- {}", text.as_str());

                    let payload = match EnginePacket::decode(text.as_str()) {
                        Ok(EnginePacket::Message(payload)) => payload,
                        Ok(EnginePacket::Ping) => {
                            let _ = pong_write.try_send(());
                            continue 'outer;
                        }
                        Ok(EnginePacket::Close) => {
                            log::debug!("transport closed by remote");
                            break 'outer (true, false);
                        }
                        Ok(_) => continue 'outer,
                        Err(err) => {
                            log::debug!("failed to parse frame: {}", err);
                            on_error(err.into());
                            continue 'outer;
                        }
                    };

                    match Packet::decode(&payload) {
                        Ok(packet) if packet.namespace() != &*namespace => {
                            log::trace!("ignoring packet for namespace {}", packet.namespace());
                        }
                        Ok(Packet::Event { data, id, .. }) => {
                            let mut args = data.into_iter();
                            let Some(Value::String(name)) = args.next() else {
                                continue 'outer;
                            };
                            if let Some(id) = id {
                                log::trace!("server requested ack id={} for {}, not supported", id, name);
                            }
                            on_event(name, collapse_args(args.collect()));
                        }
                        Ok(Packet::Ack { id, data, .. }) => {
                            let mut map = ack_map.map.lock().unwrap();
                            match map.remove(&id) {
                                Some((reply_ch, abort_handle)) => {
                                    let _ = reply_ch.send(Ok(collapse_args(data)));
                                    abort_handle.map(|h| h.abort());
                                }
                                None => {
                                    // late ack after its timeout fired
                                    log::debug!("unknown ack id={}", id);
                                }
                            }
                        }
                        Ok(Packet::Disconnect { .. }) => {
                            log::debug!("disconnected by server");
                            break 'outer (false, false);
                        }
                        Ok(Packet::ConnectError { data, .. }) => {
                            on_error(anyhow!("connection error from server: {}", data));
                            break 'outer (false, false);
                        }
                        Ok(Packet::Connect { .. }) => {}
                        Err(err) => {
                            log::debug!("failed to parse packet: {}", err);
                            on_error(err.into());
                        }
                    }
                }
            }
        };

        drop(pong_write);
        (read_ws, do_reconnect, closed_locally)
    });

    let on_error = on_error_arc;
    let ack_map = ack_map_arc.clone();
    let timer_rt = rt.clone();
    let writer_task = rt.spawn(async move {
        let mut batch = Vec::new();

        'outer: loop {
            tokio::select! {
                biased;

                pong = pong_read.recv() => {
                    if pong.is_none() {
                        break 'outer;
                    }
                    if let Err(err) = write_ws.send(encode_engine(&EnginePacket::Pong)).await {
                        on_error(anyhow!(err));
                        break 'outer;
                    }
                }

                control_msgs = control_ch.recv_many(&mut batch, 32) => {
                    if control_msgs == 0 {
                        break 'outer;
                    }

                    for (mut packet, ack) in batch.drain(..) {
                        if let Some((reply_ch, timeout)) = ack {
                            if timeout == Duration::ZERO {
                                let _ = reply_ch.send(Err(EmitError::Timeout));
                                continue;
                            }

                            let id = ack_map.id.fetch_add(1, Ordering::Relaxed);

                            let abort_handle = {
                                let ack_map = ack_map.clone();
                                timer_rt.spawn(async move {
                                    tokio::time::sleep(timeout).await;
                                    let mut map = ack_map.map.lock().unwrap();
                                    if let Some((ch, _)) = map.remove(&id) {
                                        let _ = ch.send(Err(EmitError::Timeout));
                                    }
                                }).abort_handle()
                            };

                            {
                                let mut map = ack_map.map.lock().unwrap();
                                map.insert(id, (reply_ch, Some(abort_handle)));
                            }

                            packet.set_ack_id(id);
                        }

                        if let Err(err) = write_ws.feed(encode_packet(&packet)).await {
                            on_error(anyhow!(err));
                            break 'outer;
                        }
                    }

                    if let Err(err) = write_ws.flush().await {
                        on_error(anyhow!(err));
                        break 'outer;
                    }
                }
            }
        }

        write_ws
    });

    let (read_ws, write_ws) = tokio::join!(reader_task, writer_task);

    {
        let mut ack_map = ack_map_arc.map.lock().unwrap();
        for (_, (sender, abort_handle)) in ack_map.drain() {
            let _ = sender.send(Err(EmitError::Closed));
            abort_handle.map(|h| h.abort());
        }
    }

    match (read_ws, write_ws) {
        (Ok((read_ws, reconnect, closed_locally)), Ok(write_ws)) => {
            if let Ok(mut stream) = read_ws.reunite(write_ws) {
                if closed_locally && !reconnect {
                    let disconnect = Packet::Disconnect {
                        namespace: namespace.to_string(),
                    };
                    let _ = stream.send(encode_packet(&disconnect)).await;
                }
                let _ = stream.close(None).await;
            }
            log::debug!("websocket connection closed, reconnect={}", reconnect);
            reconnect
        }
        _ => {
            // don't reconnect in case of panic, because it can cause infinite reconnects
            log::debug!("websocket connection aborted, reconnect=false");
            false
        }
    }
}
