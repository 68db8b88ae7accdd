use super::iso_time;
use super::model::{
    Content, Entry, HarRequest, HarResponse, NameValue, PostData, Timings,
};
use crate::capture::RequestEntry;
use crate::chrome::events::{Headers, Request, ResourceTiming, Response, header_value};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static HTTP1_VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^http/[01]\.[01]$").expect("valid HTTP/1.x version regex")
});

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Convert one captured exchange. Entries without a response, a timing
/// breakdown or a finish/failure timestamp are dropped.
pub(crate) fn convert(pageref: &str, entry: &RequestEntry) -> Option<Entry> {
    let response = entry.response.as_ref()?;
    let finished = entry.finished_at.or(entry.failed_at)?;
    let timing = response.timing.as_ref()?;

    let request = &entry.request;
    let http_version = response
        .protocol
        .clone()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    let measurable = HTTP1_VERSION.is_match(&http_version);

    let request_headers = response.request_headers.as_ref().unwrap_or(&request.headers);
    let request_pairs = header_pairs(request_headers);
    let response_pairs = header_pairs(&response.headers);

    let request_headers_size = if measurable {
        raw_size(
            &format!("{} {} {}", request.method, request.url, http_version),
            &request_pairs,
        )
    } else {
        -1
    };
    let response_headers_size = if measurable {
        raw_size(
            &format!("{} {} {}", http_version, response.status, response.status_text),
            &response_pairs,
        )
    } else {
        -1
    };

    let timings = timings(timing, finished);
    let payload = payload(entry, response_headers_size);

    Some(Entry {
        pageref: pageref.to_string(),
        started_date_time: iso_time(entry.wall_time),
        time: timings.total(),
        request: HarRequest {
            method: request.method.clone(),
            url: request.url.clone(),
            http_version: http_version.clone(),
            cookies: Vec::new(),
            headers: request_pairs,
            query_string: query_string(&request.url),
            headers_size: request_headers_size,
            body_size: header_value(request_headers, "content-length")
                .and_then(value_text_ref)
                .and_then(|len| len.trim().parse().ok())
                .unwrap_or(-1),
            post_data: post_data(request, request_headers),
        },
        response: HarResponse {
            status: response.status,
            status_text: response.status_text.clone(),
            http_version,
            cookies: Vec::new(),
            headers: response_pairs,
            redirect_url: header_value(&response.headers, "location")
                .map(value_text)
                .unwrap_or_default(),
            headers_size: response_headers_size,
            body_size: payload.body_size,
            transfer_size: payload.transfer_size,
            content: Content {
                size: entry.decoded_length,
                mime_type: response.mime_type.clone(),
                compression: payload.compression,
                text: entry.body.as_ref().map(|b| b.body.clone()),
                encoding: entry
                    .body
                    .as_ref()
                    .filter(|b| b.base64_encoded)
                    .map(|_| "base64".to_string()),
            },
        },
        cache: Map::new(),
        from_disk_cache: response.from_disk_cache,
        timings,
        server_ip_address: server_ip_address(response),
        connection: response.connection_id.map(|id| (id as i64).to_string()),
        initiator: entry.initiator.clone(),
        priority: entry
            .priority
            .clone()
            .or_else(|| request.initial_priority.clone()),
    })
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn value_text_ref(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(value_text(other)),
    }
}

/// Header map to pairs; array values explode into one pair per element.
fn header_pairs(headers: &Headers) -> Vec<NameValue> {
    let mut pairs = Vec::with_capacity(headers.len());
    for (name, value) in headers {
        match value {
            Value::Array(values) => {
                pairs.extend(values.iter().map(|v| NameValue::new(name, value_text(v))))
            }
            other => pairs.push(NameValue::new(name, value_text(other))),
        }
    }
    pairs
}

/// Byte length of the start line, the header lines and the blank line.
fn raw_size(start_line: &str, pairs: &[NameValue]) -> i64 {
    let headers: usize = pairs
        .iter()
        .map(|pair| pair.name.len() + ": ".len() + pair.value.len() + "\r\n".len())
        .sum();
    (start_line.len() + "\r\n".len() + headers + "\r\n".len()) as i64
}

fn query_string(raw_url: &str) -> Vec<NameValue> {
    match url::Url::parse(raw_url) {
        Ok(parsed) => parsed
            .query_pairs()
            .map(|(name, value)| NameValue::new(name, value))
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn post_data(request: &Request, headers: &Headers) -> Option<PostData> {
    let text = request.post_data.as_ref().filter(|t| !t.is_empty())?;
    let mime_type = header_value(headers, "content-type")
        .map(value_text)
        .unwrap_or_default();

    let media_type = mime_type.split(';').next().unwrap_or_default().trim();
    let params = if media_type.eq_ignore_ascii_case(FORM_URLENCODED) {
        url::form_urlencoded::parse(text.as_bytes())
            .map(|(name, value)| NameValue::new(name, value))
            .collect()
    } else {
        Vec::new()
    };

    Some(PostData {
        mime_type,
        params,
        text: text.clone(),
    })
}

fn server_ip_address(response: &Response) -> Option<String> {
    let address = response.remote_ip_address.as_deref()?;
    let address = address
        .strip_prefix('[')
        .and_then(|a| a.strip_suffix(']'))
        .unwrap_or(address);
    Some(address.to_string())
}

fn first_non_negative(values: &[f64]) -> f64 {
    values.iter().copied().find(|v| *v >= 0.0).unwrap_or(-1.0)
}

fn timings(timing: &ResourceTiming, finished: f64) -> Timings {
    let elapsed = (finished - timing.request_time) * 1000.0;

    let blocked = first_non_negative(&[timing.dns_start, timing.connect_start, timing.send_start]);
    let dns = if timing.dns_start >= 0.0 {
        first_non_negative(&[timing.connect_start, timing.send_start]) - timing.dns_start
    } else {
        -1.0
    };
    let connect = if timing.connect_start >= 0.0 {
        timing.send_start - timing.connect_start
    } else {
        -1.0
    };
    let ssl = if timing.ssl_start >= 0.0 && timing.ssl_end >= 0.0 {
        timing.ssl_end - timing.ssl_start
    } else {
        -1.0
    };

    Timings {
        blocked,
        dns,
        connect,
        send: timing.send_end - timing.send_start,
        wait: timing.receive_headers_end - timing.send_end,
        receive: elapsed - timing.receive_headers_end,
        ssl,
    }
}

struct Payload {
    body_size: i64,
    transfer_size: Option<i64>,
    compression: Option<i64>,
}

fn payload(entry: &RequestEntry, headers_size: i64) -> Payload {
    let encoded = entry.encoded_length.map(|len| len as i64);

    if headers_size == -1 {
        // Header compression hides the real header size, so the body size
        // cannot be recovered from the transfer size.
        return Payload {
            body_size: -1,
            transfer_size: encoded,
            compression: None,
        };
    }
    if entry.is_failed() {
        return Payload {
            body_size: 0,
            transfer_size: Some(headers_size),
            compression: Some(0),
        };
    }
    if entry.redirected {
        return Payload {
            body_size: 0,
            transfer_size: encoded,
            compression: Some(0),
        };
    }

    let body_size = encoded.unwrap_or(0) - headers_size;
    Payload {
        body_size,
        transfer_size: encoded,
        compression: Some(entry.decoded_length - body_size),
    }
}
