//! Typed view of the CDP events the capture state machine consumes.
//!
//! Events are decoded from their wire form (`{"method": ..., "params": ...}`)
//! so the same types serve the live adapter and stored event logs.

use crate::{HarError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type Headers = Map<String, Value>;

/// One raw protocol message as it appears on the wire or in a stored log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub post_data: Option<String>,
    #[serde(default)]
    pub initial_priority: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTiming {
    pub request_time: f64,
    #[serde(default = "unset")]
    pub dns_start: f64,
    #[serde(default = "unset")]
    pub dns_end: f64,
    #[serde(default = "unset")]
    pub connect_start: f64,
    #[serde(default = "unset")]
    pub connect_end: f64,
    #[serde(default = "unset")]
    pub ssl_start: f64,
    #[serde(default = "unset")]
    pub ssl_end: f64,
    #[serde(default = "unset")]
    pub send_start: f64,
    #[serde(default = "unset")]
    pub send_end: f64,
    #[serde(default = "unset")]
    pub receive_headers_end: f64,
}

fn unset() -> f64 {
    -1.0
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(default)]
    pub url: String,
    pub status: i64,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub request_headers: Option<Headers>,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub timing: Option<ResourceTiming>,
    #[serde(default, rename = "remoteIPAddress")]
    pub remote_ip_address: Option<String>,
    #[serde(default)]
    pub connection_id: Option<f64>,
    #[serde(default)]
    pub from_disk_cache: Option<bool>,
    #[serde(default)]
    pub encoded_data_length: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageTimestamp {
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSent {
    pub request_id: String,
    pub request: Request,
    pub timestamp: f64,
    pub wall_time: f64,
    #[serde(default)]
    pub initiator: Value,
    #[serde(default)]
    pub redirect_response: Option<Response>,
}

impl RequestWillBeSent {
    pub fn initiator_type(&self) -> Option<&str> {
        self.initiator.get("type").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataReceived {
    pub request_id: String,
    #[serde(default)]
    pub timestamp: f64,
    pub data_length: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceived {
    pub request_id: String,
    #[serde(default)]
    pub timestamp: f64,
    pub response: Response,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceChangedPriority {
    pub request_id: String,
    pub new_priority: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFinished {
    pub request_id: String,
    pub timestamp: f64,
    pub encoded_data_length: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFailed {
    pub request_id: String,
    pub timestamp: f64,
    #[serde(default)]
    pub error_text: String,
    #[serde(default)]
    pub canceled: Option<bool>,
}

/// Reply of `Network.getResponseBody`, recorded in event logs as a
/// synthetic event so that replays see captured bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseBody {
    pub request_id: String,
    pub body: String,
    #[serde(default)]
    pub base64_encoded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraInfo {
    pub request_id: String,
    #[serde(default)]
    pub headers: Headers,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketRequest {
    #[serde(default)]
    pub headers: Headers,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketHandshakeRequest {
    pub request_id: String,
    pub timestamp: f64,
    pub wall_time: f64,
    pub request: WebSocketRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketClosed {
    pub request_id: String,
    pub timestamp: f64,
}

#[derive(Debug, Clone)]
pub enum ProtocolEvent {
    DomContentEventFired(PageTimestamp),
    LoadEventFired(PageTimestamp),
    RequestWillBeSent(Box<RequestWillBeSent>),
    DataReceived(DataReceived),
    ResponseReceived(Box<ResponseReceived>),
    ResourceChangedPriority(ResourceChangedPriority),
    LoadingFinished(LoadingFinished),
    LoadingFailed(LoadingFailed),
    ResponseBody(ResponseBody),
    RequestExtraInfo(ExtraInfo),
    ResponseExtraInfo(ExtraInfo),
    WebSocketHandshakeRequest(WebSocketHandshakeRequest),
    WebSocketHandshakeResponse(Box<ResponseReceived>),
    WebSocketClosed(WebSocketClosed),
}

pub mod method {
    pub const DOM_CONTENT_EVENT_FIRED: &str = "Page.domContentEventFired";
    pub const LOAD_EVENT_FIRED: &str = "Page.loadEventFired";
    pub const REQUEST_WILL_BE_SENT: &str = "Network.requestWillBeSent";
    pub const DATA_RECEIVED: &str = "Network.dataReceived";
    pub const RESPONSE_RECEIVED: &str = "Network.responseReceived";
    pub const RESOURCE_CHANGED_PRIORITY: &str = "Network.resourceChangedPriority";
    pub const LOADING_FINISHED: &str = "Network.loadingFinished";
    pub const LOADING_FAILED: &str = "Network.loadingFailed";
    pub const GET_RESPONSE_BODY: &str = "Network.getResponseBody";
    pub const REQUEST_EXTRA_INFO: &str = "Network.requestWillBeSentExtraInfo";
    pub const RESPONSE_EXTRA_INFO: &str = "Network.responseReceivedExtraInfo";
    pub const WEB_SOCKET_HANDSHAKE_REQUEST: &str = "Network.webSocketWillSendHandshakeRequest";
    pub const WEB_SOCKET_HANDSHAKE_RESPONSE: &str = "Network.webSocketHandshakeResponseReceived";
    pub const WEB_SOCKET_CLOSED: &str = "Network.webSocketClosed";
}

impl ProtocolEvent {
    /// Decode a wire message. Methods the capture does not track yield `None`.
    pub fn from_message(method_name: &str, params: Value) -> Result<Option<Self>> {
        fn decode<T: serde::de::DeserializeOwned>(method_name: &str, params: Value) -> Result<T> {
            serde_json::from_value(params)
                .map_err(|e| HarError::InvalidLog(format!("{}: {}", method_name, e)))
        }

        let event = match method_name {
            method::DOM_CONTENT_EVENT_FIRED => {
                Self::DomContentEventFired(decode(method_name, params)?)
            }
            method::LOAD_EVENT_FIRED => Self::LoadEventFired(decode(method_name, params)?),
            method::REQUEST_WILL_BE_SENT => {
                Self::RequestWillBeSent(Box::new(decode(method_name, params)?))
            }
            method::DATA_RECEIVED => Self::DataReceived(decode(method_name, params)?),
            method::RESPONSE_RECEIVED => {
                Self::ResponseReceived(Box::new(decode(method_name, params)?))
            }
            method::RESOURCE_CHANGED_PRIORITY => {
                Self::ResourceChangedPriority(decode(method_name, params)?)
            }
            method::LOADING_FINISHED => Self::LoadingFinished(decode(method_name, params)?),
            method::LOADING_FAILED => Self::LoadingFailed(decode(method_name, params)?),
            method::GET_RESPONSE_BODY => Self::ResponseBody(decode(method_name, params)?),
            method::REQUEST_EXTRA_INFO => Self::RequestExtraInfo(decode(method_name, params)?),
            method::RESPONSE_EXTRA_INFO => Self::ResponseExtraInfo(decode(method_name, params)?),
            method::WEB_SOCKET_HANDSHAKE_REQUEST => {
                Self::WebSocketHandshakeRequest(decode(method_name, params)?)
            }
            method::WEB_SOCKET_HANDSHAKE_RESPONSE => {
                Self::WebSocketHandshakeResponse(Box::new(decode(method_name, params)?))
            }
            method::WEB_SOCKET_CLOSED => Self::WebSocketClosed(decode(method_name, params)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    pub fn from_raw(raw: RawEvent) -> Result<Option<Self>> {
        Self::from_message(&raw.method, raw.params)
    }
}

/// Case-insensitive header lookup.
pub fn header_value<'a>(headers: &'a Headers, name: &str) -> Option<&'a Value> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value)
}

/// Overwrite `target` with `extra`, replacing keys that differ only by case.
pub fn merge_headers(target: &mut Headers, extra: &Headers) {
    for (name, value) in extra {
        target.retain(|key, _| !key.eq_ignore_ascii_case(name));
        target.insert(name.clone(), value.clone());
    }
}
