//! Minimal Socket.IO v4 server speaking the WebSocket transport only.

#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use realtime_sync::protocol::Packet;
use serde_json::{Value, json};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time::timeout,
};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        Message,
        handshake::server::{ErrorResponse, Request, Response},
    },
};

/// What the server observed from a client.
#[derive(Debug)]
pub enum Inbound {
    Handshake {
        uri: String,
        authorization: Option<String>,
        auth: Option<Value>,
    },
    Event {
        name: String,
        payload: Value,
        ack_id: Option<u64>,
    },
    Disconnect,
}

enum Control {
    Push(String),
    Drop,
}

struct Shared {
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    reject: AtomicBool,
    ack_sends: AtomicBool,
    heartbeat_ms: AtomicU64,
    accepted: AtomicUsize,
    connections: Mutex<Vec<mpsc::UnboundedSender<Control>>>,
}

pub struct FakeServer {
    pub url: String,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    shared: Arc<Shared>,
}

impl FakeServer {
    pub async fn start() -> Self {
        Self::start_with_heartbeat(Duration::from_secs(60)).await
    }

    /// Advertise `heartbeat` as both ping interval and ping timeout. The
    /// server never pings, so the client gives up after twice that.
    pub async fn start_with_heartbeat(heartbeat: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            inbound_tx,
            reject: AtomicBool::new(false),
            ack_sends: AtomicBool::new(true),
            heartbeat_ms: AtomicU64::new(heartbeat.as_millis() as u64),
            accepted: AtomicUsize::new(0),
            connections: Mutex::new(Vec::new()),
        });

        let accept_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(serve(stream, Arc::clone(&accept_shared)));
            }
        });

        Self {
            url: format!("http://{addr}"),
            inbound_rx,
            shared,
        }
    }

    /// Answer namespace connects with `44` instead of `40`.
    pub fn reject_connections(&self, reject: bool) {
        self.shared.reject.store(reject, Ordering::SeqCst);
    }

    /// Whether `send_message` emits get an ack.
    pub fn ack_sends(&self, ack: bool) {
        self.shared.ack_sends.store(ack, Ordering::SeqCst);
    }

    /// Number of accepted namespace connects.
    pub fn accepted(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    /// Push an event to every live connection.
    pub fn push_event(&self, name: &str, payload: Value) {
        let text = Packet::event(name, payload, None).encode().expect("encode");
        self.shared
            .connections
            .lock()
            .retain(|tx| tx.send(Control::Push(text.clone())).is_ok());
    }

    /// Close every live connection from the server side.
    pub fn drop_connections(&self) {
        for tx in self.shared.connections.lock().drain(..) {
            let _ = tx.send(Control::Drop);
        }
    }

    pub async fn next(&mut self) -> Inbound {
        match timeout(Duration::from_secs(3), self.inbound_rx.recv()).await {
            Ok(Some(inbound)) => inbound,
            Ok(None) => panic!("server channel closed"),
            Err(_) => panic!("timeout waiting for client traffic"),
        }
    }

    /// Next inbound must be a handshake; returns `(uri, authorization, auth)`.
    pub async fn expect_handshake(&mut self) -> (String, Option<String>, Option<Value>) {
        match self.next().await {
            Inbound::Handshake {
                uri,
                authorization,
                auth,
            } => (uri, authorization, auth),
            other => panic!("expected handshake, got {other:?}"),
        }
    }

    /// Next inbound must be an event called `name`; returns its payload.
    pub async fn expect_event(&mut self, name: &str) -> Value {
        match self.next().await {
            Inbound::Event {
                name: got, payload, ..
            } if got == name => payload,
            other => panic!("expected {name}, got {other:?}"),
        }
    }

    pub async fn assert_quiet(&mut self, duration: Duration, context: &str) {
        if let Ok(Some(inbound)) = timeout(duration, self.inbound_rx.recv()).await {
            panic!("unexpected traffic during {context}: {inbound:?}");
        }
    }
}

async fn serve(stream: TcpStream, shared: Arc<Shared>) {
    let mut seen = None;
    let callback = |req: &Request, resp: Response| {
        let authorization = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        seen = Some((req.uri().to_string(), authorization));
        Ok::<Response, ErrorResponse>(resp)
    };
    let Ok(mut ws) = accept_hdr_async(stream, callback).await else {
        return;
    };
    let (uri, authorization) = seen.unwrap_or_default();

    let n = shared.accepted.load(Ordering::SeqCst);
    let heartbeat = shared.heartbeat_ms.load(Ordering::SeqCst);
    let open = json!({
        "sid": format!("engine-{n}"),
        "upgrades": [],
        "pingInterval": heartbeat,
        "pingTimeout": heartbeat,
        "maxPayload": 1_000_000,
    });
    if ws.send(Message::text(format!("0{open}"))).await.is_err() {
        return;
    }

    let auth = loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                if let Ok(Packet::Connect(auth)) = Packet::decode(text.as_str()) {
                    break auth;
                }
            }
            Some(Ok(_)) => continue,
            _ => return,
        }
    };
    let _ = shared.inbound_tx.send(Inbound::Handshake {
        uri,
        authorization,
        auth,
    });

    if shared.reject.load(Ordering::SeqCst) {
        let refusal = Packet::ConnectError("Not authorized".into())
            .encode()
            .expect("encode");
        let _ = ws.send(Message::text(refusal)).await;
        let _ = ws.close(None).await;
        return;
    }

    // Pushes queue here until the loop below starts.
    let (control_tx, mut control_rx) = mpsc::unbounded_channel();
    shared.connections.lock().push(control_tx);

    shared.accepted.fetch_add(1, Ordering::SeqCst);
    let accepted = format!("40{}", json!({ "sid": format!("socket-{n}") }));
    if ws.send(Message::text(accepted)).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            control = control_rx.recv() => match control {
                Some(Control::Push(text)) => {
                    if ws.send(Message::text(text)).await.is_err() {
                        return;
                    }
                }
                Some(Control::Drop) | None => {
                    let _ = ws.close(None).await;
                    return;
                }
            },
            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => match Packet::decode(text.as_str()) {
                    Ok(Packet::Event { name, payload, ack_id }) => {
                        if name == "send_message"
                            && shared.ack_sends.load(Ordering::SeqCst)
                            && let Some(ack_id) = ack_id
                        {
                            let ack = Packet::Ack {
                                ack_id,
                                args: vec![json!({ "ok": true, "messageId": "srv-1" })],
                            };
                            let _ = ws.send(Message::text(ack.encode().expect("encode"))).await;
                        }
                        let _ = shared.inbound_tx.send(Inbound::Event { name, payload, ack_id });
                    }
                    Ok(Packet::Disconnect) => {
                        let _ = shared.inbound_tx.send(Inbound::Disconnect);
                    }
                    _ => {}
                },
                Some(Ok(_)) => {}
                _ => return,
            },
        }
    }
}
