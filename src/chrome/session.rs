use super::cdp::CdpSession;
use super::{EventReceiver, PageHandle, ResponseBody, SessionProvider};
use crate::config::{BrowserConfig, Config};
use crate::{HarError, Result, timeouts::secs};
use async_trait::async_trait;
use chromiumoxide::Browser;
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{
    CloseTargetParams, CreateBrowserContextParams, CreateTargetParams,
    DisposeBrowserContextParams, TargetId,
};
use chromiumoxide::handler::HandlerConfig;
use futures::StreamExt;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

const BLANK_URL: &str = "about:blank";

/// Opens every page in a fresh browser context of an already running
/// Chrome, reached through its remote debugging endpoint.
#[derive(Debug, Default)]
pub struct ChromeSessionProvider;

impl ChromeSessionProvider {
    pub fn new() -> Self {
        Self
    }
}

/// Resolve the browser websocket URL through `/json/version`.
pub async fn discover_websocket_url(browser: &BrowserConfig) -> Result<String> {
    let url = format!("http://{}:{}/json/version", browser.host, browser.port);

    let response: Value = reqwest::Client::new()
        .get(&url)
        .timeout(Duration::from_secs(secs::DISCOVERY))
        .send()
        .await
        .map_err(|e| HarError::Connection(format!("{}: {}", url, e)))?
        .json()
        .await
        .map_err(|e| HarError::Connection(format!("{}: {}", url, e)))?;

    response
        .get("webSocketDebuggerUrl")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| HarError::Connection(format!("{}: no webSocketDebuggerUrl", url)))
}

#[async_trait]
impl SessionProvider for ChromeSessionProvider {
    async fn create(&self, config: &Config) -> Result<Arc<dyn PageHandle>> {
        let ws_url = discover_websocket_url(&config.browser).await?;
        tracing::debug!("Connecting to {}", ws_url);

        let handler_config = HandlerConfig {
            request_timeout: Duration::from_secs(secs::REQUEST),
            ..Default::default()
        };
        let (browser, mut handler) = Browser::connect_with_config(&ws_url, handler_config)
            .await
            .map_err(|e| HarError::Connection(e.to_string()))?;

        let closed = Arc::new(watch::channel(false).0);
        let handler_closed = closed.clone();
        let handler_task = tokio::spawn(async move {
            while handler.next().await.is_some() {}
            handler_closed.send_replace(true);
        });

        let mut page = ChromePage {
            browser: Mutex::new(Some(browser)),
            handler_task,
            context_id: None,
            target_id: None,
            session: None,
            closed,
            destroyed: AtomicBool::new(false),
        };

        // On any setup failure release whatever was acquired so far.
        if let Err(e) = page.open(config).await {
            if let Err(cleanup) = page.destroy().await {
                tracing::warn!("Cleanup after failed setup: {}", cleanup);
            }
            return Err(e);
        }

        Ok(Arc::new(page))
    }
}

/// One tab in its own browser context.
pub struct ChromePage {
    browser: Mutex<Option<Browser>>,
    handler_task: JoinHandle<()>,
    context_id: Option<BrowserContextId>,
    target_id: Option<TargetId>,
    session: Option<CdpSession>,
    closed: Arc<watch::Sender<bool>>,
    destroyed: AtomicBool,
}

impl ChromePage {
    async fn open(&mut self, config: &Config) -> Result<()> {
        let guard = self.browser.lock().await;
        let browser = guard.as_ref().ok_or(HarError::Disconnected)?;

        let context_id = browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(|e| HarError::Connection(format!("Failed to create browser context: {}", e)))?
            .result
            .browser_context_id;
        self.context_id = Some(context_id.clone());

        let params = CreateTargetParams::builder()
            .url(BLANK_URL)
            .width(config.browser.width as i64)
            .height(config.browser.height as i64)
            .browser_context_id(context_id)
            .build()
            .map_err(HarError::Protocol)?;
        let target_id = browser
            .execute(params)
            .await
            .map_err(|e| HarError::Connection(format!("Failed to create target: {}", e)))?
            .result
            .target_id;
        drop(guard);

        let target_url = format!(
            "ws://{}:{}/devtools/page/{}",
            config.browser.host,
            config.browser.port,
            target_id.inner()
        );
        self.target_id = Some(target_id);
        self.session = Some(CdpSession::connect(&target_url, self.closed.clone()).await?);
        Ok(())
    }

    fn session(&self) -> Result<&CdpSession> {
        self.session.as_ref().ok_or(HarError::Disconnected)
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.session()?.call(method, params).await
    }
}

#[async_trait]
impl PageHandle for ChromePage {
    async fn enable(&self, max_post_data_size: Option<u64>) -> Result<()> {
        let mut params = json!({});
        if let Some(size) = max_post_data_size {
            params["maxPostDataSize"] = json!(size);
        }
        self.call("Network.enable", params).await?;
        self.call("Page.enable", json!({})).await?;
        Ok(())
    }

    async fn set_cache_disabled(&self, disabled: bool) -> Result<()> {
        self.call("Network.setCacheDisabled", json!({"cacheDisabled": disabled}))
            .await
            .map(|_| ())
    }

    async fn set_user_agent(&self, user_agent: &str) -> Result<()> {
        self.call("Network.setUserAgentOverride", json!({"userAgent": user_agent}))
            .await
            .map(|_| ())
    }

    async fn set_extra_headers(&self, headers: &BTreeMap<String, String>) -> Result<()> {
        self.call("Network.setExtraHTTPHeaders", json!({"headers": headers}))
            .await
            .map(|_| ())
    }

    async fn set_blocked_urls(&self, patterns: &[String]) -> Result<()> {
        self.call("Network.setBlockedURLs", json!({"urls": patterns}))
            .await
            .map(|_| ())
    }

    async fn set_ignore_certificate_errors(&self, ignore: bool) -> Result<()> {
        self.call("Security.setIgnoreCertificateErrors", json!({"ignore": ignore}))
            .await
            .map(|_| ())
    }

    async fn events(&self) -> Result<EventReceiver> {
        self.session()?.subscribe()
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        let reply = self.call("Page.navigate", json!({"url": url})).await?;
        match reply.get("errorText").and_then(Value::as_str) {
            Some(error) if !error.is_empty() => Err(HarError::Navigation(error.to_string())),
            _ => Ok(()),
        }
    }

    async fn response_body(&self, request_id: &str) -> Result<ResponseBody> {
        let reply = self
            .call("Network.getResponseBody", json!({"requestId": request_id}))
            .await
            .map_err(|e| HarError::ResponseBody(e.to_string()))?;
        Ok(ResponseBody {
            body: reply
                .get("body")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            base64_encoded: reply
                .get("base64Encoded")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        let reply = self
            .call(
                "Runtime.evaluate",
                json!({"expression": expression, "returnByValue": true, "awaitPromise": true}),
            )
            .await?;
        if let Some(details) = reply.get("exceptionDetails") {
            let text = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("Evaluation failed");
            return Err(HarError::Protocol(text.to_string()));
        }
        Ok(reply
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn disconnected(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    async fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Reverse order of acquisition; every step runs even if one fails.
        let mut first_error = None;
        let mut record = |step: &str, result: Result<()>| {
            if let Err(e) = result {
                tracing::warn!("Failed to {}: {}", step, e);
                first_error.get_or_insert(e);
            }
        };

        if let Some(session) = &self.session {
            record("close target socket", session.close().await);
        }

        // The browser itself belongs to the user: only our connection goes.
        if let Some(browser) = self.browser.lock().await.take() {
            if let Some(target_id) = &self.target_id {
                let result = browser
                    .execute(CloseTargetParams::new(target_id.clone()))
                    .await
                    .map(|_| ())
                    .map_err(|e| HarError::Protocol(e.to_string()));
                record("close target", result);
            }
            if let Some(context_id) = &self.context_id {
                let result = browser
                    .execute(DisposeBrowserContextParams::new(context_id.clone()))
                    .await
                    .map(|_| ())
                    .map_err(|e| HarError::Protocol(e.to_string()));
                record("dispose browser context", result);
            }
        }
        self.handler_task.abort();

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
