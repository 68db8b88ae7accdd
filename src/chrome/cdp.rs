//! Minimal CDP client for a single target.
//!
//! Replies and events share one websocket, so a single reader task sees
//! every message in wire order and fans events out to subscribers without
//! reordering them.

use super::events::ProtocolEvent;
use crate::{HarError, Result, timeouts::secs};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;
type Subscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<ProtocolEvent>>>>;

#[derive(Debug, Deserialize)]
struct Incoming {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<RemoteError>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RemoteError {
    code: i64,
    message: String,
}

pub struct CdpSession {
    sink: tokio::sync::Mutex<SplitSink<WsStream, Message>>,
    pending: Pending,
    subscribers: Subscribers,
    next_id: AtomicU64,
    timeout: Duration,
}

impl CdpSession {
    /// Connect to a target websocket. `closed` is set once the socket ends.
    pub async fn connect(ws_url: &str, closed: Arc<watch::Sender<bool>>) -> Result<Self> {
        let (socket, _) = connect_async(ws_url)
            .await
            .map_err(|e| HarError::Connection(format!("{}: {}", ws_url, e)))?;
        let (sink, mut stream) = socket.split();

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let subscribers: Subscribers = Arc::new(Mutex::new(Vec::new()));

        let reader_pending = pending.clone();
        let reader_subscribers = subscribers.clone();
        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        dispatch(text.as_str(), &reader_pending, &reader_subscribers)
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!("Target socket error: {}", e);
                        break;
                    }
                }
            }
            // Dropping the reply senders fails every in-flight call.
            if let Ok(mut pending) = reader_pending.lock() {
                pending.clear();
            }
            if let Ok(mut subscribers) = reader_subscribers.lock() {
                subscribers.clear();
            }
            closed.send_replace(true);
        });

        Ok(Self {
            sink: tokio::sync::Mutex::new(sink),
            pending,
            subscribers,
            next_id: AtomicU64::new(1),
            timeout: Duration::from_secs(secs::REQUEST),
        })
    }

    pub fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<ProtocolEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .map_err(|_| HarError::General("Subscriber list poisoned".into()))?
            .push(tx);
        Ok(rx)
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| HarError::General("Pending call table poisoned".into()))?
            .insert(id, tx);

        let request = json!({"id": id, "method": method, "params": params});
        tracing::debug!("-> {} {}", id, method);
        let sent = self
            .sink
            .lock()
            .await
            .send(Message::Text(request.to_string().into()))
            .await;
        if sent.is_err() {
            if let Ok(mut pending) = self.pending.lock() {
                pending.remove(&id);
            }
            return Err(HarError::Disconnected);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(HarError::Disconnected),
            Err(_) => {
                if let Ok(mut pending) = self.pending.lock() {
                    pending.remove(&id);
                }
                Err(HarError::Protocol(format!("{} timed out", method)))
            }
        }
    }

    pub async fn close(&self) -> Result<()> {
        self.sink
            .lock()
            .await
            .close()
            .await
            .map_err(|e| HarError::Protocol(format!("Failed to close target socket: {}", e)))
    }
}

fn dispatch(text: &str, pending: &Pending, subscribers: &Subscribers) {
    let incoming: Incoming = match serde_json::from_str(text) {
        Ok(incoming) => incoming,
        Err(e) => {
            tracing::warn!("Discarding malformed CDP message: {}", e);
            return;
        }
    };

    if let Some(id) = incoming.id {
        let reply = match incoming.error {
            Some(error) => Err(HarError::Protocol(format!(
                "{} ({})",
                error.message, error.code
            ))),
            None => Ok(incoming.result.unwrap_or(Value::Null)),
        };
        let waiter = pending.lock().ok().and_then(|mut p| p.remove(&id));
        if let Some(waiter) = waiter {
            let _ = waiter.send(reply);
        }
        return;
    }

    let Some(method) = incoming.method else {
        return;
    };
    let event = match ProtocolEvent::from_message(&method, incoming.params) {
        Ok(Some(event)) => event,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!("Dropping undecodable event: {}", e);
            return;
        }
    };
    if let Ok(mut subscribers) = subscribers.lock() {
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
