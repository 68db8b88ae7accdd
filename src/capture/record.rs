use crate::chrome::ResponseBody;
use crate::chrome::events::{Headers, Request, Response};
use serde_json::Value;
use std::collections::HashMap;

/// WebSocket handshakes are tracked with an empty URL and no timing
/// breakdown, so the archive never contains an entry for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Http,
    WebSocket,
}

/// One HTTP exchange (or WebSocket handshake) observed during a page load.
#[derive(Debug, Clone)]
pub struct RequestEntry {
    /// Protocol request id, or a synthetic `<id>_redirect_<ts>` key once the
    /// exchange has been closed out by a redirect.
    pub key: String,
    pub kind: EntryKind,
    pub request: Request,
    pub initiator: Value,
    /// Monotonic send time, seconds.
    pub timestamp: f64,
    /// Wall-clock send time, seconds since the epoch.
    pub wall_time: f64,
    pub response: Option<Response>,
    /// Decoded body bytes, accumulated from data chunks.
    pub decoded_length: i64,
    /// On-wire bytes, known once the exchange finishes.
    pub encoded_length: Option<f64>,
    pub finished_at: Option<f64>,
    pub failed_at: Option<f64>,
    pub redirected: bool,
    pub body: Option<ResponseBody>,
    pub priority: Option<String>,
}

impl RequestEntry {
    pub(crate) fn new(
        key: String,
        kind: EntryKind,
        request: Request,
        initiator: Value,
        timestamp: f64,
        wall_time: f64,
    ) -> Self {
        Self {
            key,
            kind,
            request,
            initiator,
            timestamp,
            wall_time,
            response: None,
            decoded_length: 0,
            encoded_length: None,
            finished_at: None,
            failed_at: None,
            redirected: false,
            body: None,
            priority: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failed_at.is_some()
    }
}

/// Everything captured about one page load attempt.
#[derive(Debug, Clone)]
pub struct PageRecord {
    pub url: String,
    pub first_request_id: Option<String>,
    /// Monotonic time of the primary request, milliseconds.
    pub first_request_ms: Option<f64>,
    pub first_request_wall_time: Option<f64>,
    pub dom_content_loaded_ms: Option<f64>,
    pub load_ms: Option<f64>,
    /// Entries in the order they were opened.
    pub entries: Vec<RequestEntry>,
    /// Value attached by the post-load hook.
    pub user: Option<Value>,
    pub(crate) live: HashMap<String, usize>,
    pub(crate) pending_request_headers: HashMap<String, Headers>,
    pub(crate) pending_response_headers: HashMap<String, Headers>,
    pub(crate) pending_bodies: usize,
}

impl PageRecord {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            first_request_id: None,
            first_request_ms: None,
            first_request_wall_time: None,
            dom_content_loaded_ms: None,
            load_ms: None,
            entries: Vec::new(),
            user: None,
            live: HashMap::new(),
            pending_request_headers: HashMap::new(),
            pending_response_headers: HashMap::new(),
            pending_bodies: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.first_request_ms.is_some()
            && self.dom_content_loaded_ms.is_some()
            && self.load_ms.is_some()
            && self.pending_bodies == 0
    }

    pub fn pending_bodies(&self) -> usize {
        self.pending_bodies
    }

    /// The entry currently registered under a protocol request id.
    pub fn entry(&self, request_id: &str) -> Option<&RequestEntry> {
        self.live.get(request_id).map(|&index| &self.entries[index])
    }

    pub(crate) fn entry_mut(&mut self, request_id: &str) -> Option<&mut RequestEntry> {
        match self.live.get(request_id) {
            Some(&index) => self.entries.get_mut(index),
            None => None,
        }
    }

    pub(crate) fn open(&mut self, request_id: &str, entry: RequestEntry) -> &mut RequestEntry {
        let index = self.entries.len();
        self.entries.push(entry);
        self.live.insert(request_id.to_string(), index);
        &mut self.entries[index]
    }

    /// Detach the live id from its entry so the next redirect leg can reuse it.
    pub(crate) fn close_out(&mut self, request_id: &str, key: String) -> Option<&mut RequestEntry> {
        let index = self.live.remove(request_id)?;
        let entry = &mut self.entries[index];
        entry.key = key;
        Some(entry)
    }
}
