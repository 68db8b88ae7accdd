//! Archive synthesis: completed page records in, HAR document out.
//!
//! [`build`] is pure and total. Malformed or unfinished entries are dropped,
//! never reported.

mod entry;
pub mod model;

use crate::capture::PageRecord;
use crate::config::CreatorConfig;
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

pub use model::{
    Content, Creator, Entry, Har, HarRequest, HarResponse, Log, NameValue, Page, PageTimings,
    PostData, Timings,
};

/// Source of page identifiers. `index` is the page's position in the
/// document, starting at 0.
pub trait PageIdSource {
    fn page_id(&mut self, index: usize) -> String;
}

/// `page_<n>_<uuid>`, unique across runs.
#[derive(Debug, Default)]
pub struct RandomPageIds;

impl PageIdSource for RandomPageIds {
    fn page_id(&mut self, index: usize) -> String {
        format!("page_{}_{}", index + 1, Uuid::new_v4().simple())
    }
}

/// `page_<n>`, for reproducible documents.
#[derive(Debug, Default)]
pub struct SequentialPageIds;

impl PageIdSource for SequentialPageIds {
    fn page_id(&mut self, index: usize) -> String {
        format!("page_{}", index + 1)
    }
}

impl From<&CreatorConfig> for Creator {
    fn from(config: &CreatorConfig) -> Self {
        Self {
            name: config.name.clone(),
            version: config.version.clone(),
            comment: config.comment.clone(),
        }
    }
}

impl Har {
    pub fn empty(creator: &CreatorConfig) -> Self {
        build(&[], creator, &mut RandomPageIds)
    }
}

pub fn build(records: &[PageRecord], creator: &CreatorConfig, ids: &mut dyn PageIdSource) -> Har {
    let mut pages = Vec::with_capacity(records.len());
    let mut entries = Vec::new();

    for (index, record) in records.iter().enumerate() {
        let id = ids.page_id(index);
        entries.extend(
            record
                .entries
                .iter()
                .filter_map(|request| entry::convert(&id, request)),
        );
        pages.push(page(id, record));
    }

    Har {
        log: Log {
            version: model::HAR_VERSION.to_string(),
            creator: Creator::from(creator),
            pages,
            entries,
        },
    }
}

fn page(id: String, record: &PageRecord) -> Page {
    let first_request_ms = record.first_request_ms.unwrap_or_default();
    let since_first = |ms: Option<f64>| ms.map_or(-1.0, |ms| ms - first_request_ms);

    Page {
        started_date_time: iso_time(record.first_request_wall_time.unwrap_or_default()),
        id,
        title: record.url.clone(),
        page_timings: PageTimings {
            on_content_load: since_first(record.dom_content_loaded_ms),
            on_load: since_first(record.load_ms),
        },
        user: record.user.clone(),
    }
}

/// Seconds since the epoch to ISO-8601 with millisecond precision.
pub(crate) fn iso_time(wall_time: f64) -> String {
    let millis = (wall_time * 1000.0).round() as i64;
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}
