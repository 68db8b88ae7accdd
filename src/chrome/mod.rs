pub mod cdp;
pub mod events;
pub mod session;

use crate::Result;
use crate::config::Config;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use events::{ProtocolEvent, RawEvent};
pub use session::{ChromePage, ChromeSessionProvider, discover_websocket_url};

pub type EventReceiver = mpsc::UnboundedReceiver<ProtocolEvent>;

#[derive(Debug, Clone)]
pub struct ResponseBody {
    pub body: String,
    pub base64_encoded: bool,
}

/// A connected browser tab: commands, an ordered event stream and a
/// disconnect signal.
#[async_trait::async_trait]
pub trait PageHandle: Send + Sync {
    /// Enable the Page and Network domains.
    async fn enable(&self, max_post_data_size: Option<u64>) -> Result<()>;

    async fn set_cache_disabled(&self, disabled: bool) -> Result<()>;

    async fn set_user_agent(&self, user_agent: &str) -> Result<()>;

    async fn set_extra_headers(&self, headers: &BTreeMap<String, String>) -> Result<()>;

    async fn set_blocked_urls(&self, patterns: &[String]) -> Result<()>;

    async fn set_ignore_certificate_errors(&self, ignore: bool) -> Result<()>;

    /// Subscribe to the page events. Events emitted after this call returns
    /// are delivered in order.
    async fn events(&self) -> Result<EventReceiver>;

    async fn navigate(&self, url: &str) -> Result<()>;

    async fn response_body(&self, request_id: &str) -> Result<ResponseBody>;

    async fn evaluate(&self, expression: &str) -> Result<Value>;

    /// Resolves once the underlying session is lost.
    async fn disconnected(&self);

    /// Release the tab, its browser context and the connection. Calling it
    /// again is a no-op.
    async fn destroy(&self) -> Result<()>;
}

#[async_trait::async_trait]
pub trait SessionProvider: Send + Sync {
    async fn create(&self, config: &Config) -> Result<Arc<dyn PageHandle>>;
}
