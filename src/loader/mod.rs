//! Orchestration of many page loads into one archive.
//!
//! Every attempt emits [`LoaderEvent::Load`] followed by either `Done` or
//! `Fail`; once all URLs are resolved exactly one `Archive` event carries the
//! document, which [`Loader::run`] also returns.

pub mod hooks;
mod live;

use crate::capture::PageRecord;
use crate::chrome::SessionProvider;
use crate::config::Config;
use crate::har::{self, Har, PageIdSource, RandomPageIds};
use crate::HarError;
use futures::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

pub use hooks::{EvaluateHook, HookContext, PostHook, PreHook};

#[derive(Debug)]
pub enum LoaderEvent {
    Load {
        url: String,
        index: usize,
        urls: Arc<[String]>,
    },
    Done {
        url: String,
        index: usize,
        urls: Arc<[String]>,
    },
    Fail {
        url: String,
        index: usize,
        urls: Arc<[String]>,
        error: HarError,
    },
    Archive(Box<Har>),
}

#[derive(Clone, Default)]
pub struct Hooks {
    pub pre: Option<Arc<dyn PreHook>>,
    pub post: Option<Arc<dyn PostHook>>,
}

pub struct Loader {
    urls: Arc<[String]>,
    config: Arc<Config>,
    provider: Arc<dyn SessionProvider>,
    hooks: Hooks,
    ids: Box<dyn PageIdSource + Send + Sync>,
    events: mpsc::UnboundedSender<LoaderEvent>,
}

impl Loader {
    pub fn new(
        urls: Vec<String>,
        config: Arc<Config>,
        provider: Arc<dyn SessionProvider>,
    ) -> (Self, mpsc::UnboundedReceiver<LoaderEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let loader = Self {
            urls: urls.into(),
            config,
            provider,
            hooks: Hooks::default(),
            ids: Box::new(RandomPageIds),
            events,
        };
        (loader, rx)
    }

    pub fn with_pre_hook(mut self, hook: Arc<dyn PreHook>) -> Self {
        self.hooks.pre = Some(hook);
        self
    }

    pub fn with_post_hook(mut self, hook: Arc<dyn PostHook>) -> Self {
        self.hooks.post = Some(hook);
        self
    }

    pub fn with_page_ids(mut self, ids: impl PageIdSource + Send + Sync + 'static) -> Self {
        self.ids = Box::new(ids);
        self
    }

    pub async fn run(mut self) -> Har {
        let records = match self.config.loader.parallel {
            Some(degree) => self.run_parallel(degree).await,
            None => self.run_sequential().await,
        };

        tracing::info!("Captured {} of {} pages", records.len(), self.urls.len());
        let har = har::build(&records, &self.config.creator, self.ids.as_mut());
        self.emit(LoaderEvent::Archive(Box::new(har.clone())));
        har
    }

    async fn run_sequential(&self) -> Vec<PageRecord> {
        let mut records = Vec::with_capacity(self.urls.len());
        for index in 0..self.urls.len() {
            match self.handle_url(index).await {
                Some(record) => records.push(record),
                None if self.config.loader.abort_on_failure => {
                    tracing::info!("Aborting after failure of {}", self.urls[index]);
                    break;
                }
                None => {}
            }
        }
        records
    }

    /// `degree` logical workers share one cursor. Abort-on-failure does not
    /// apply here: workers always drain the cursor.
    async fn run_parallel(&self, degree: usize) -> Vec<PageRecord> {
        if self.config.loader.abort_on_failure {
            tracing::debug!("abort_on_failure has no effect with parallel loading");
        }

        let cursor = AtomicUsize::new(0);
        let workers = (0..degree.max(1)).map(|_| async {
            let mut loaded = Vec::new();
            loop {
                let index = cursor.fetch_add(1, Ordering::SeqCst);
                if index >= self.urls.len() {
                    break;
                }
                if let Some(record) = self.handle_url(index).await {
                    loaded.push((index, record));
                }
            }
            loaded
        });

        let mut records: Vec<(usize, PageRecord)> =
            join_all(workers).await.into_iter().flatten().collect();
        records.sort_by_key(|(index, _)| *index);
        records.into_iter().map(|(_, record)| record).collect()
    }

    /// Load one URL, retrying up to the configured count.
    async fn handle_url(&self, index: usize) -> Option<PageRecord> {
        let url = &self.urls[index];
        let attempts = self.config.loader.retry + 1;

        for attempt in 1..=attempts {
            self.emit(LoaderEvent::Load {
                url: url.clone(),
                index,
                urls: self.urls.clone(),
            });

            match live::load(
                self.provider.as_ref(),
                &self.config,
                &self.hooks,
                &self.urls,
                index,
            )
            .await
            {
                Ok(record) => {
                    tracing::info!("Loaded {}", url);
                    self.emit(LoaderEvent::Done {
                        url: url.clone(),
                        index,
                        urls: self.urls.clone(),
                    });
                    return Some(record);
                }
                Err(error) => {
                    tracing::info!("Attempt {}/{} for {} failed: {}", attempt, attempts, url, error);
                    self.emit(LoaderEvent::Fail {
                        url: url.clone(),
                        index,
                        urls: self.urls.clone(),
                        error,
                    });
                    if attempt < attempts {
                        tokio::time::sleep(self.config.loader.retry_delay()).await;
                    }
                }
            }
        }
        None
    }

    fn emit(&self, event: LoaderEvent) {
        // Nobody listening is fine; the archive is returned as well.
        let _ = self.events.send(event);
    }
}
