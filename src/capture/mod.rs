//! Per-page capture: turns the protocol event stream of one tab into a
//! [`PageRecord`].
//!
//! [`Capture`] is the pure state machine; [`run`] drives it from a live
//! [`PageHandle`], fetching response bodies when asked to.

pub mod record;
pub mod replay;

use crate::chrome::events::{
    ExtraInfo, LoadingFailed, LoadingFinished, ProtocolEvent, RequestWillBeSent, ResponseReceived,
    WebSocketHandshakeRequest, merge_headers,
};
use crate::chrome::{PageHandle, ResponseBody};
use crate::config::CaptureConfig;
use crate::timer::Timer;
use crate::{HarError, Result};
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use std::time::Duration;

pub use record::{EntryKind, PageRecord, RequestEntry};
pub use replay::{from_log, parse_log, replay_events};

#[derive(Debug, Clone, Default)]
pub struct CaptureOptions {
    /// Fetch every response body; the page is not complete until all of
    /// them have arrived.
    pub content: bool,
    /// Keep applying events this long after the page completes.
    pub settle: Option<Duration>,
}

impl From<&CaptureConfig> for CaptureOptions {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            content: config.content,
            settle: config.settle(),
        }
    }
}

/// What the driver has to do after an event has been applied.
#[derive(Debug)]
pub enum Transition {
    Pending,
    FetchBody(String),
    Complete,
    Failed(HarError),
}

pub struct Capture {
    record: PageRecord,
    content: bool,
}

impl Capture {
    pub fn new(url: impl Into<String>, content: bool) -> Self {
        Self {
            record: PageRecord::new(url),
            content,
        }
    }

    pub fn record(&self) -> &PageRecord {
        &self.record
    }

    pub fn into_record(self) -> PageRecord {
        self.record
    }

    pub fn apply(&mut self, event: ProtocolEvent) -> Transition {
        match event {
            ProtocolEvent::DomContentEventFired(params) => {
                self.record
                    .dom_content_loaded_ms
                    .get_or_insert(params.timestamp * 1000.0);
                self.check()
            }
            ProtocolEvent::LoadEventFired(params) => {
                self.record.load_ms.get_or_insert(params.timestamp * 1000.0);
                self.check()
            }
            ProtocolEvent::RequestWillBeSent(params) => self.request_will_be_sent(*params),
            ProtocolEvent::DataReceived(params) => {
                if let Some(entry) = self.record.entry_mut(&params.request_id) {
                    entry.decoded_length += params.data_length;
                }
                Transition::Pending
            }
            ProtocolEvent::ResponseReceived(params) => {
                self.response_received(*params);
                Transition::Pending
            }
            ProtocolEvent::ResourceChangedPriority(params) => {
                if let Some(entry) = self.record.entry_mut(&params.request_id) {
                    entry.priority = Some(params.new_priority);
                }
                Transition::Pending
            }
            ProtocolEvent::LoadingFinished(params) => self.loading_finished(params),
            ProtocolEvent::LoadingFailed(params) => self.loading_failed(params),
            ProtocolEvent::ResponseBody(_) if !self.content => Transition::Pending,
            ProtocolEvent::ResponseBody(params) => {
                let request_id = params.request_id.clone();
                self.apply_body(
                    &request_id,
                    ResponseBody {
                        body: params.body,
                        base64_encoded: params.base64_encoded,
                    },
                )
            }
            ProtocolEvent::RequestExtraInfo(params) => {
                self.request_extra_info(params);
                Transition::Pending
            }
            ProtocolEvent::ResponseExtraInfo(params) => {
                self.response_extra_info(params);
                Transition::Pending
            }
            ProtocolEvent::WebSocketHandshakeRequest(params) => {
                self.web_socket_handshake(params);
                Transition::Pending
            }
            ProtocolEvent::WebSocketHandshakeResponse(params) => {
                self.response_received(*params);
                Transition::Pending
            }
            ProtocolEvent::WebSocketClosed(params) => {
                if let Some(entry) = self.record.entry_mut(&params.request_id) {
                    entry.finished_at = Some(params.timestamp);
                }
                Transition::Pending
            }
        }
    }

    /// Attach a fetched body and release its pending slot.
    pub fn apply_body(&mut self, request_id: &str, body: ResponseBody) -> Transition {
        self.record.pending_bodies = self.record.pending_bodies.saturating_sub(1);
        if let Some(entry) = self.record.entry_mut(request_id) {
            entry.body = Some(body);
        }
        self.check()
    }

    fn check(&self) -> Transition {
        if self.record.is_complete() {
            Transition::Complete
        } else {
            Transition::Pending
        }
    }

    fn request_will_be_sent(&mut self, params: RequestWillBeSent) -> Transition {
        if params.request.url.starts_with("data:") {
            return Transition::Pending;
        }

        let request_id = params.request_id.clone();

        if self.record.first_request_id.is_none()
            && params.redirect_response.is_none()
            && params.initiator_type() == Some("other")
        {
            self.record.first_request_id = Some(request_id.clone());
            self.record.first_request_ms = Some(params.timestamp * 1000.0);
            self.record.first_request_wall_time = Some(params.wall_time);
        }

        if let Some(redirect) = params.redirect_response {
            let key = format!("{}_redirect_{}", request_id, params.timestamp);
            match self.record.close_out(&request_id, key) {
                Some(entry) => {
                    entry.encoded_length = redirect.encoded_data_length;
                    entry.response = Some(redirect);
                    entry.finished_at = Some(params.timestamp);
                    entry.redirected = true;
                }
                None => tracing::debug!("Redirect for unknown request {}", request_id),
            }
        }

        let extra = self.record.pending_request_headers.remove(&request_id);
        let entry = self.record.open(
            &request_id,
            RequestEntry::new(
                request_id.clone(),
                EntryKind::Http,
                params.request,
                params.initiator,
                params.timestamp,
                params.wall_time,
            ),
        );
        if let Some(extra) = extra {
            merge_headers(&mut entry.request.headers, &extra);
        }

        self.check()
    }

    fn response_received(&mut self, params: ResponseReceived) {
        let pending = self.record.pending_response_headers.remove(&params.request_id);
        let Some(entry) = self.record.entry_mut(&params.request_id) else {
            return;
        };
        let mut response = params.response;
        if let Some(extra) = pending {
            merge_headers(&mut response.headers, &extra);
        }
        entry.response = Some(response);
    }

    fn loading_finished(&mut self, params: LoadingFinished) -> Transition {
        let Some(entry) = self.record.entry_mut(&params.request_id) else {
            return Transition::Pending;
        };
        entry.encoded_length = Some(params.encoded_data_length);
        entry.finished_at = Some(params.timestamp);

        if self.content {
            self.record.pending_bodies += 1;
            return Transition::FetchBody(params.request_id);
        }
        self.check()
    }

    fn loading_failed(&mut self, params: LoadingFailed) -> Transition {
        let Some(entry) = self.record.entry_mut(&params.request_id) else {
            return Transition::Pending;
        };
        entry.failed_at = Some(params.timestamp);

        if self.record.first_request_id.as_deref() == Some(params.request_id.as_str()) {
            let message = if params.error_text.is_empty() {
                "Canceled".to_string()
            } else {
                params.error_text
            };
            return Transition::Failed(HarError::Navigation(message));
        }
        Transition::Pending
    }

    fn request_extra_info(&mut self, params: ExtraInfo) {
        match self.record.entry_mut(&params.request_id) {
            Some(entry) => merge_headers(&mut entry.request.headers, &params.headers),
            None => {
                self.record
                    .pending_request_headers
                    .entry(params.request_id)
                    .or_default()
                    .extend(params.headers);
            }
        }
    }

    fn response_extra_info(&mut self, params: ExtraInfo) {
        if let Some(entry) = self.record.entry_mut(&params.request_id)
            && let Some(response) = entry.response.as_mut()
        {
            merge_headers(&mut response.headers, &params.headers);
            return;
        }
        self.record
            .pending_response_headers
            .entry(params.request_id)
            .or_default()
            .extend(params.headers);
    }

    fn web_socket_handshake(&mut self, params: WebSocketHandshakeRequest) {
        let request = crate::chrome::events::Request {
            url: String::new(),
            method: "GET".to_string(),
            headers: params.request.headers,
            post_data: None,
            initial_priority: None,
        };
        self.record.open(
            &params.request_id,
            RequestEntry::new(
                params.request_id.clone(),
                EntryKind::WebSocket,
                request,
                serde_json::Value::Null,
                params.timestamp,
                params.wall_time,
            ),
        );
    }
}

type BodyFetch<'a> = BoxFuture<'a, (String, Result<ResponseBody>)>;

/// Live driver state: the machine plus the in-flight body fetches.
struct LiveCapture<'a> {
    handle: &'a dyn PageHandle,
    capture: Capture,
    fetches: FuturesUnordered<BodyFetch<'a>>,
    complete: bool,
}

impl<'a> LiveCapture<'a> {
    fn on_event(&mut self, event: ProtocolEvent) -> Result<()> {
        match self.capture.apply(event) {
            Transition::Pending => {}
            Transition::Complete => self.complete = true,
            Transition::FetchBody(request_id) => {
                let handle = self.handle;
                self.fetches.push(Box::pin(async move {
                    let result = handle.response_body(&request_id).await;
                    (request_id, result)
                }));
            }
            // The first outcome wins; late failures only matter before it.
            Transition::Failed(err) if !self.complete => return Err(err),
            Transition::Failed(err) => tracing::debug!("Ignoring failure after load: {}", err),
        }
        Ok(())
    }

    fn on_body(&mut self, request_id: String, result: Result<ResponseBody>) -> Result<()> {
        match result {
            Ok(body) => {
                if let Transition::Complete = self.capture.apply_body(&request_id, body) {
                    self.complete = true;
                }
                Ok(())
            }
            Err(e) if !self.complete => Err(HarError::ResponseBody(format!(
                "{}: {}",
                request_id, e
            ))),
            Err(e) => {
                tracing::warn!("Dropping body of {}: {}", request_id, e);
                Ok(())
            }
        }
    }
}

/// Capture one page load on `handle`.
///
/// Subscribes to the event stream, then navigates to `url`. Resolves once
/// navigation has returned and the page is complete (and the settle window,
/// if any, has passed). Fails on the first primary-request failure, body
/// fetch failure or navigation error.
pub async fn run(handle: &dyn PageHandle, url: &str, options: &CaptureOptions) -> Result<PageRecord> {
    let mut events = handle.events().await?;
    let mut live = LiveCapture {
        handle,
        capture: Capture::new(url, options.content),
        fetches: FuturesUnordered::new(),
        complete: false,
    };

    let navigation = handle.navigate(url);
    tokio::pin!(navigation);
    let mut navigated = false;

    while !(navigated && live.complete) {
        tokio::select! {
            result = &mut navigation, if !navigated => {
                result?;
                navigated = true;
                tracing::debug!("Navigated to {}", url);
            }
            Some((request_id, result)) = live.fetches.next() => {
                live.on_body(request_id, result)?;
            }
            event = events.recv() => match event {
                Some(event) => live.on_event(event)?,
                None => return Err(HarError::Disconnected),
            },
        }
    }

    if let Some(settle) = options.settle {
        tracing::debug!("Settling {} for {:?}", url, settle);
        let timer = Timer::new(Some(settle));
        let window = timer.start();
        tokio::pin!(window);

        loop {
            tokio::select! {
                _ = &mut window => break,
                Some((request_id, result)) = live.fetches.next() => {
                    live.on_body(request_id, result)?;
                }
                event = events.recv() => match event {
                    Some(event) => live.on_event(event)?,
                    None => break,
                },
            }
        }
    }

    Ok(live.capture.into_record())
}
