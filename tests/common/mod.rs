#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use slotmap::SlotMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_pully::Transport;
use tokio_pully::client::{ConnectError, EmitError, EventCallback, ListenerId, State};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

/// One recorded emit
#[derive(Debug, Clone, PartialEq)]
pub struct Emitted {
    pub event: String,
    pub data: Value,
    pub timeout: Option<Duration>,
}

/// Transport recording everything the session asks of it
pub struct MockTransport {
    state: Mutex<State>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    emitted: Mutex<Vec<Emitted>>,
    listeners: Mutex<HashMap<String, Vec<(ListenerId, EventCallback)>>>,
    listener_ids: Mutex<SlotMap<ListenerId, String>>,
    ack_reply: Mutex<Option<Value>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(MockTransport {
            state: Mutex::new(State::Disconnected),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            emitted: Mutex::new(Vec::new()),
            listeners: Mutex::new(HashMap::new()),
            listener_ids: Mutex::new(SlotMap::with_key()),
            ack_reply: Mutex::new(None),
        })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn emitted(&self) -> Vec<Emitted> {
        self.emitted.lock().unwrap().clone()
    }

    pub fn last_emitted(&self) -> Emitted {
        self.emitted.lock().unwrap().last().cloned().unwrap()
    }

    pub fn set_state(&self, state: State) {
        *self.state.lock().unwrap() = state;
    }

    /// Value returned to acked emits, unset means they time out
    pub fn set_ack_reply(&self, reply: Value) {
        *self.ack_reply.lock().unwrap() = Some(reply);
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners
            .lock()
            .unwrap()
            .get(event)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Delivers an inbound event the way the socket client does
    pub fn deliver(&self, event: &str, data: Value) {
        let mut callbacks = self
            .listeners
            .lock()
            .unwrap()
            .remove(event)
            .unwrap_or_default();
        for (_, callback) in callbacks.iter_mut() {
            callback(data.clone());
        }
        let ids = self.listener_ids.lock().unwrap();
        callbacks.retain(|(id, _)| ids.contains_key(*id));
        let mut listeners = self.listeners.lock().unwrap();
        let slot = listeners.entry(event.to_string()).or_default();
        let added = std::mem::replace(slot, callbacks);
        slot.extend(added);
    }
}

impl Transport for MockTransport {
    fn connect(&self) -> BoxFuture<'static, Result<(), ConnectError>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.set_state(State::Connected);
        futures::future::ready(Ok(())).boxed()
    }

    fn disconnect(&self) -> BoxFuture<'static, ()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.set_state(State::Disconnected);
        futures::future::ready(()).boxed()
    }

    fn state(&self) -> State {
        *self.state.lock().unwrap()
    }

    fn emit(&self, event: &str, data: Value) {
        self.emitted.lock().unwrap().push(Emitted {
            event: event.to_string(),
            data,
            timeout: None,
        });
    }

    fn emit_with_ack(
        &self,
        event: &str,
        data: Value,
        timeout: Duration,
    ) -> BoxFuture<'static, Result<Value, EmitError>> {
        self.emitted.lock().unwrap().push(Emitted {
            event: event.to_string(),
            data,
            timeout: Some(timeout),
        });
        let reply = self.ack_reply.lock().unwrap().clone();
        futures::future::ready(reply.ok_or(EmitError::Timeout)).boxed()
    }

    fn on(&self, event: &str, callback: EventCallback) -> ListenerId {
        let id = self.listener_ids.lock().unwrap().insert(event.to_string());
        self.listeners
            .lock()
            .unwrap()
            .entry(event.to_string())
            .or_default()
            .push((id, callback));
        id
    }

    fn off(&self, id: ListenerId) {
        let Some(event) = self.listener_ids.lock().unwrap().remove(id) else {
            return;
        };
        if let Some(callbacks) = self.listeners.lock().unwrap().get_mut(&event) {
            callbacks.retain(|(other, _)| *other != id);
        }
    }
}

/// Behavior of the fake Socket.IO server
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Refuse the namespace with this message
    pub reject: Option<String>,
    /// Acknowledge every event carrying an ack id with `{"ok": true}`
    pub ack: bool,
    pub ping_interval: u64,
    pub ping_timeout: u64,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            reject: None,
            ack: false,
            ping_interval: 25000,
            ping_timeout: 20000,
        }
    }
}

/// Upgrade request as seen by the server
#[derive(Debug, Clone)]
pub struct Handshake {
    pub uri: String,
    pub token: Option<String>,
}

/// Minimal Socket.IO server speaking the websocket transport only
pub struct FakeServer {
    pub addr: SocketAddr,
    handshakes: mpsc::UnboundedReceiver<Handshake>,
    frames: mpsc::UnboundedReceiver<String>,
    push: mpsc::UnboundedSender<String>,
}

impl FakeServer {
    pub async fn start(options: ServerOptions) -> FakeServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (handshake_tx, handshake_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (push_tx, push_rx) = mpsc::unbounded_channel::<String>();
        let push_rx = Arc::new(tokio::sync::Mutex::new(push_rx));

        tokio::spawn(async move {
            while let Ok((stream, _addr)) = listener.accept().await {
                let options = options.clone();
                let handshake_tx = handshake_tx.clone();
                let frame_tx = frame_tx.clone();
                let push_rx = push_rx.clone();
                tokio::spawn(async move {
                    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                        let token = req
                            .headers()
                            .get("token")
                            .and_then(|value| value.to_str().ok())
                            .map(String::from);
                        let _ = handshake_tx.send(Handshake {
                            uri: req.uri().to_string(),
                            token,
                        });
                        Ok(resp)
                    };
                    if let Ok(ws) = accept_hdr_async(stream, callback).await {
                        serve(ws, options, frame_tx, push_rx).await;
                    }
                });
            }
        });

        FakeServer {
            addr,
            handshakes: handshake_rx,
            frames: frame_rx,
            push: push_tx,
        }
    }

    pub fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn next_handshake(&mut self) -> Handshake {
        tokio::time::timeout(Duration::from_secs(5), self.handshakes.recv())
            .await
            .expect("no handshake in time")
            .expect("server stopped")
    }

    /// Next text frame received from the client
    pub async fn next_frame(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.frames.recv())
            .await
            .expect("no frame in time")
            .expect("server stopped")
    }

    /// Sends a raw text frame to the connected client
    pub fn push(&self, frame: &str) {
        self.push.send(frame.to_string()).unwrap();
    }
}

async fn serve(
    mut ws: WebSocketStream<TcpStream>,
    options: ServerOptions,
    frames: mpsc::UnboundedSender<String>,
    push_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>,
) {
    let mut push = push_rx.lock().await;

    let open = json!({
        "sid": "fake-sid",
        "upgrades": [],
        "pingInterval": options.ping_interval,
        "pingTimeout": options.ping_timeout,
        "maxPayload": 1000000,
    });
    if ws.send(Message::Text(format!("0{}", open).into())).await.is_err() {
        return;
    }

    let mut prefix = String::new();
    loop {
        tokio::select! {
            outgoing = push.recv() => {
                let Some(text) = outgoing else {
                    break;
                };
                if ws.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }

            incoming = ws.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                let _ = frames.send(text.clone());

                if let Some(rest) = text.strip_prefix("40") {
                    let namespace = if rest.starts_with('/') {
                        rest.split(',').next().unwrap_or("/").to_string()
                    } else {
                        "/".to_string()
                    };
                    prefix = if namespace == "/" {
                        String::new()
                    } else {
                        format!("{},", namespace)
                    };
                    let reply = match &options.reject {
                        Some(message) => format!("44{}{}", prefix, json!({ "message": message })),
                        None => format!("40{}{}", prefix, json!({ "sid": "fake-socket" })),
                    };
                    let _ = ws.send(Message::Text(reply.into())).await;
                } else if let Some(rest) = text.strip_prefix("42") {
                    let rest = rest.strip_prefix(prefix.as_str()).unwrap_or(rest);
                    let id: String = rest.chars().take_while(char::is_ascii_digit).collect();
                    if options.ack && !id.is_empty() {
                        let reply = format!("43{}{}[{}]", prefix, id, json!({ "ok": true }));
                        let _ = ws.send(Message::Text(reply.into())).await;
                    }
                } else if text.starts_with("41") {
                    break;
                }
            }
        }
    }

    let _ = ws.close(None).await;
}
