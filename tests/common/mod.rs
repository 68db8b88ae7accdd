//! Scripted stand-ins for a browser, plus a builder for CDP event logs.
#![allow(dead_code)]

use async_trait::async_trait;
use har_capturer::chrome::{EventReceiver, PageHandle, ProtocolEvent, ResponseBody, SessionProvider};
use har_capturer::config::Config;
use har_capturer::loader::{HookContext, PostHook, PreHook};
use har_capturer::{HarError, Result};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const WALL_CLOCK_BASE: f64 = 1_500_000_000.0;

/// Builds a CDP event log with monotonically increasing timestamps.
#[derive(Default, Clone)]
pub struct LogBuilder {
    events: Vec<Value>,
    ts: f64,
}

fn timing(request_time: f64) -> Value {
    json!({
        "requestTime": request_time,
        "proxyStart": -1, "proxyEnd": -1,
        "dnsStart": 0.5, "dnsEnd": 1.0,
        "connectStart": 1.0, "connectEnd": 2.0,
        "sslStart": -1, "sslEnd": -1,
        "sendStart": 2.0, "sendEnd": 2.5,
        "receiveHeadersEnd": 5.0
    })
}

impl LogBuilder {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            ts: 100.0,
        }
    }

    /// A complete HTTP/1.1 page load of `url` under request id `1`.
    pub fn page(url: &str) -> Self {
        Self::new()
            .request("1", url, "other")
            .response("1", url, "http/1.1", json!({"Content-Type": "text/html"}))
            .data("1", 512)
            .finished("1", 700.0)
            .dom_content()
            .load()
    }

    fn tick(&mut self) -> f64 {
        self.ts += 0.01;
        self.ts
    }

    fn push(mut self, method: &str, params: Value) -> Self {
        self.events.push(json!({"method": method, "params": params}));
        self
    }

    pub fn request(mut self, id: &str, url: &str, initiator: &str) -> Self {
        let ts = self.tick();
        self.push(
            "Network.requestWillBeSent",
            json!({
                "requestId": id,
                "request": {"url": url, "method": "GET", "headers": {"Accept": "*/*"}},
                "timestamp": ts,
                "wallTime": WALL_CLOCK_BASE + ts,
                "initiator": {"type": initiator}
            }),
        )
    }

    /// Next leg of a redirect chain: `from` answered with a 302 to `to`.
    pub fn redirect(mut self, id: &str, from: &str, to: &str) -> Self {
        let ts = self.tick();
        self.push(
            "Network.requestWillBeSent",
            json!({
                "requestId": id,
                "request": {"url": to, "method": "GET", "headers": {}},
                "timestamp": ts,
                "wallTime": WALL_CLOCK_BASE + ts,
                "initiator": {"type": "other"},
                "redirectResponse": {
                    "url": from,
                    "status": 302,
                    "statusText": "Found",
                    "headers": {"Location": to},
                    "mimeType": "",
                    "protocol": "http/1.1",
                    "timing": timing(ts - 0.005),
                    "encodedDataLength": 120
                }
            }),
        )
    }

    pub fn response(mut self, id: &str, url: &str, protocol: &str, headers: Value) -> Self {
        let ts = self.tick();
        self.push(
            "Network.responseReceived",
            json!({
                "requestId": id,
                "timestamp": ts,
                "type": "Document",
                "response": {
                    "url": url,
                    "status": 200,
                    "statusText": "OK",
                    "headers": headers,
                    "mimeType": "text/html",
                    "protocol": protocol,
                    "timing": timing(ts - 0.005),
                    "remoteIPAddress": "93.184.216.34",
                    "connectionId": 12
                }
            }),
        )
    }

    pub fn data(mut self, id: &str, length: i64) -> Self {
        let ts = self.tick();
        self.push(
            "Network.dataReceived",
            json!({"requestId": id, "timestamp": ts, "dataLength": length, "encodedDataLength": 0}),
        )
    }

    pub fn finished(mut self, id: &str, encoded: f64) -> Self {
        let ts = self.tick();
        self.push(
            "Network.loadingFinished",
            json!({"requestId": id, "timestamp": ts, "encodedDataLength": encoded}),
        )
    }

    pub fn failed(mut self, id: &str, error: &str) -> Self {
        let ts = self.tick();
        self.push(
            "Network.loadingFailed",
            json!({"requestId": id, "timestamp": ts, "type": "Document", "errorText": error}),
        )
    }

    pub fn body(self, id: &str, body: &str, base64: bool) -> Self {
        self.push(
            "Network.getResponseBody",
            json!({"requestId": id, "body": body, "base64Encoded": base64}),
        )
    }

    /// A WebSocket opened, upgraded and closed under `id`.
    pub fn web_socket(mut self, id: &str) -> Self {
        let ts = self.tick();
        let this = self.push(
            "Network.webSocketWillSendHandshakeRequest",
            json!({
                "requestId": id,
                "timestamp": ts,
                "wallTime": WALL_CLOCK_BASE + ts,
                "request": {"headers": {"Upgrade": "websocket"}}
            }),
        );
        let mut this = this.push(
            "Network.webSocketHandshakeResponseReceived",
            json!({
                "requestId": id,
                "timestamp": ts + 0.001,
                "response": {
                    "status": 101,
                    "statusText": "Switching Protocols",
                    "headers": {"Upgrade": "websocket"}
                }
            }),
        );
        let ts = this.tick();
        this.push("Network.webSocketClosed", json!({"requestId": id, "timestamp": ts}))
    }

    pub fn dom_content(mut self) -> Self {
        let ts = self.tick();
        self.push("Page.domContentEventFired", json!({"timestamp": ts}))
    }

    pub fn load(mut self) -> Self {
        let ts = self.tick();
        self.push("Page.loadEventFired", json!({"timestamp": ts}))
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn json(&self) -> String {
        Value::Array(self.events.clone()).to_string()
    }

    pub fn events(&self) -> Vec<ProtocolEvent> {
        self.events
            .iter()
            .filter_map(|raw| {
                let method = raw["method"].as_str().unwrap_or_default();
                ProtocolEvent::from_message(method, raw["params"].clone()).unwrap()
            })
            .collect()
    }
}

/// What a fake page does once navigated.
#[derive(Clone)]
pub enum Script {
    /// Deliver the events right away.
    Load(Vec<ProtocolEvent>),
    /// Deliver the events after a delay.
    Slow(Duration, Vec<ProtocolEvent>),
    /// Deliver the first events right away and the rest after a delay,
    /// without holding up navigation.
    Then(Vec<ProtocolEvent>, Duration, Vec<ProtocolEvent>),
    /// Never complete.
    Hang,
    /// Lose the session.
    Disconnect,
}

fn unreachable(url: &str) -> Vec<ProtocolEvent> {
    LogBuilder::new()
        .request("1", url, "other")
        .failed("1", "net::ERR_NAME_NOT_RESOLVED")
        .events()
}

pub type Journal = Arc<Mutex<Vec<String>>>;

/// Session provider handing out scripted pages. URLs without a script behave
/// like unresolvable hosts.
#[derive(Default)]
pub struct FakeBrowser {
    scripts: HashMap<String, Script>,
    failing_bodies: HashSet<String>,
    offline: bool,
    pub journal: Journal,
    pub created: AtomicUsize,
    pub destroyed: Arc<AtomicUsize>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// A browser that cannot be reached at all.
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }

    pub fn script(mut self, url: &str, script: Script) -> Self {
        self.scripts.insert(url.to_string(), script);
        self
    }

    /// Make `Network.getResponseBody` fail for `request_id`.
    pub fn fail_body(mut self, request_id: &str) -> Self {
        self.failing_bodies.insert(request_id.to_string());
        self
    }

    pub fn serve(self, url: &str) -> Self {
        let events = LogBuilder::page(url).events();
        self.script(url, Script::Load(events))
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionProvider for FakeBrowser {
    async fn create(&self, _config: &Config) -> Result<Arc<dyn PageHandle>> {
        if self.offline {
            return Err(HarError::Connection("connection refused".into()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakePage {
            scripts: self.scripts.clone(),
            failing_bodies: self.failing_bodies.clone(),
            journal: self.journal.clone(),
            destroyed: self.destroyed.clone(),
            released: AtomicBool::new(false),
            subscriber: Mutex::new(None),
            closed: watch::channel(false).0,
        }))
    }
}

pub struct FakePage {
    scripts: HashMap<String, Script>,
    failing_bodies: HashSet<String>,
    journal: Journal,
    destroyed: Arc<AtomicUsize>,
    released: AtomicBool,
    subscriber: Mutex<Option<mpsc::UnboundedSender<ProtocolEvent>>>,
    closed: watch::Sender<bool>,
}

impl FakePage {
    fn note(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }

    fn deliver(&self, events: Vec<ProtocolEvent>) {
        if let Some(tx) = self.subscriber.lock().unwrap().as_ref() {
            for event in events {
                let _ = tx.send(event);
            }
        }
    }
}

#[async_trait]
impl PageHandle for FakePage {
    async fn enable(&self, _max_post_data_size: Option<u64>) -> Result<()> {
        Ok(())
    }

    async fn set_cache_disabled(&self, _disabled: bool) -> Result<()> {
        Ok(())
    }

    async fn set_user_agent(&self, user_agent: &str) -> Result<()> {
        self.note(format!("user-agent {}", user_agent));
        Ok(())
    }

    async fn set_extra_headers(&self, _headers: &BTreeMap<String, String>) -> Result<()> {
        Ok(())
    }

    async fn set_blocked_urls(&self, _patterns: &[String]) -> Result<()> {
        Ok(())
    }

    async fn set_ignore_certificate_errors(&self, _ignore: bool) -> Result<()> {
        Ok(())
    }

    async fn events(&self) -> Result<EventReceiver> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.subscriber.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        // Real protocol calls always suspend; let other workers run.
        tokio::task::yield_now().await;
        self.note(format!("navigate {}", url));

        match self.scripts.get(url).cloned() {
            Some(Script::Load(events)) => self.deliver(events),
            Some(Script::Slow(delay, events)) => {
                tokio::time::sleep(delay).await;
                self.deliver(events);
            }
            Some(Script::Then(now, delay, later)) => {
                self.deliver(now);
                let subscriber = self.subscriber.lock().unwrap().clone();
                if let Some(tx) = subscriber {
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        for event in later {
                            let _ = tx.send(event);
                        }
                    });
                }
            }
            Some(Script::Hang) => {}
            Some(Script::Disconnect) => {
                self.closed.send_replace(true);
            }
            None => self.deliver(unreachable(url)),
        }
        Ok(())
    }

    async fn response_body(&self, request_id: &str) -> Result<ResponseBody> {
        tokio::task::yield_now().await;
        if self.failing_bodies.contains(request_id) {
            return Err(HarError::Protocol(format!(
                "No resource with given identifier found: {}",
                request_id
            )));
        }
        Ok(ResponseBody {
            body: format!("body of {}", request_id),
            base64_encoded: false,
        })
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        Ok(json!({"evaluated": expression}))
    }

    async fn disconnected(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    async fn destroy(&self) -> Result<()> {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            self.note("destroy".into());
        }
        Ok(())
    }
}

/// Records `pre <index>` / `post <index>` in a journal.
pub struct JournalHook {
    pub journal: Journal,
    pub fail_pre: bool,
}

impl JournalHook {
    pub fn new(journal: Journal) -> Arc<Self> {
        Arc::new(Self {
            journal,
            fail_pre: false,
        })
    }

    pub fn failing(journal: Journal) -> Arc<Self> {
        Arc::new(Self {
            journal,
            fail_pre: true,
        })
    }
}

#[async_trait]
impl PreHook for JournalHook {
    async fn run(&self, ctx: &HookContext<'_>) -> Result<()> {
        self.journal.lock().unwrap().push(format!("pre {}", ctx.index));
        if self.fail_pre {
            return Err(HarError::Hook("pre-hook refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PostHook for JournalHook {
    async fn run(&self, ctx: &HookContext<'_>) -> Result<Value> {
        self.journal.lock().unwrap().push(format!("post {}", ctx.index));
        Ok(json!({"index": ctx.index, "url": ctx.url}))
    }
}

/// Configuration suitable for fake browsers: no timeout, no retries.
pub fn config() -> Config {
    Config::default()
}
