//! One attempt at loading one URL.

use super::Hooks;
use super::hooks::HookContext;
use crate::capture::{self, CaptureOptions, PageRecord};
use crate::chrome::{PageHandle, SessionProvider};
use crate::config::{CaptureConfig, Config};
use crate::timer::Timer;
use crate::{HarError, Result};

/// Create a fresh page, capture `urls[index]` on it and release it again.
///
/// The capture races the disconnect signal and the page timeout; whichever
/// resolves first decides the outcome. The handle is destroyed on every
/// path, including a failing pre-hook.
pub(crate) async fn load(
    provider: &dyn SessionProvider,
    config: &Config,
    hooks: &Hooks,
    urls: &[String],
    index: usize,
) -> Result<PageRecord> {
    let handle = provider.create(config).await?;
    let ctx = HookContext {
        url: &urls[index],
        index,
        urls,
        handle: handle.as_ref(),
    };

    let outcome = race(&ctx, config, hooks).await;

    if let Err(e) = handle.destroy().await {
        tracing::warn!("Failed to release page for {}: {}", ctx.url, e);
    }
    outcome
}

async fn race(ctx: &HookContext<'_>, config: &Config, hooks: &Hooks) -> Result<PageRecord> {
    if let Some(pre) = &hooks.pre {
        pre.run(ctx).await?;
    }

    let timer = Timer::new(config.loader.timeout());
    let timeout = timer.start();
    let options = CaptureOptions::from(&config.capture);

    let page_load = async {
        configure(ctx.handle, &config.capture).await?;
        let mut record = capture::run(ctx.handle, ctx.url, &options).await?;
        if let Some(post) = &hooks.post {
            record.user = Some(post.run(ctx).await?);
        }
        Ok(record)
    };

    let outcome = tokio::select! {
        biased;
        _ = ctx.handle.disconnected() => Err(HarError::Disconnected),
        _ = timeout => Err(HarError::Timeout),
        result = page_load => result,
    };
    timer.cancel();
    outcome
}

async fn configure(handle: &dyn PageHandle, capture: &CaptureConfig) -> Result<()> {
    handle.enable(capture.max_post_data_size).await?;
    if !capture.cache {
        handle.set_cache_disabled(true).await?;
    }
    if let Some(user_agent) = &capture.user_agent {
        handle.set_user_agent(user_agent).await?;
    }
    if !capture.extra_headers.is_empty() {
        handle.set_extra_headers(&capture.extra_headers).await?;
    }
    if !capture.blocked_urls.is_empty() {
        handle.set_blocked_urls(&capture.blocked_urls).await?;
    }
    if capture.insecure {
        handle.set_ignore_certificate_errors(true).await?;
    }
    Ok(())
}
