//! Offline capture from a stored protocol event log.

use super::{Capture, PageRecord, Transition};
use crate::chrome::events::{ProtocolEvent, RawEvent};
use crate::config::CreatorConfig;
use crate::har::{self, Har, PageIdSource};
use crate::{HarError, Result};

/// Decode a JSON array of `{method, params}` messages, dropping methods the
/// capture does not track.
pub fn parse_log(json: &str) -> Result<Vec<ProtocolEvent>> {
    let raw: Vec<RawEvent> =
        serde_json::from_str(json).map_err(|e| HarError::InvalidLog(e.to_string()))?;
    let mut events = Vec::with_capacity(raw.len());
    for message in raw {
        if let Some(event) = ProtocolEvent::from_raw(message)? {
            events.push(event);
        }
    }
    Ok(events)
}

/// Apply every event in order. The first terminal outcome decides the
/// result; later events still update the record.
pub fn replay_events(
    url: &str,
    events: impl IntoIterator<Item = ProtocolEvent>,
    content: bool,
) -> Result<PageRecord> {
    let mut capture = Capture::new(url, content);
    let mut outcome: Option<Result<()>> = None;

    for event in events {
        let transition = capture.apply(event);
        if outcome.is_some() {
            continue;
        }
        match transition {
            Transition::Complete => outcome = Some(Ok(())),
            Transition::Failed(err) => outcome = Some(Err(err)),
            // Bodies arrive as synthetic events in the log itself.
            Transition::FetchBody(_) | Transition::Pending => {}
        }
    }

    match outcome {
        Some(Ok(())) => Ok(capture.into_record()),
        Some(Err(err)) => Err(err),
        None => Err(HarError::IncompleteCapture),
    }
}

/// Replay a stored log straight into a single-page archive.
pub fn from_log(
    url: &str,
    log: &str,
    content: bool,
    creator: &CreatorConfig,
    ids: &mut dyn PageIdSource,
) -> Result<Har> {
    let record = replay_events(url, parse_log(log)?, content)?;
    Ok(har::build(&[record], creator, ids))
}
