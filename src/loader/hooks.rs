use crate::chrome::PageHandle;
use crate::{HarError, Result};
use async_trait::async_trait;
use serde_json::Value;

/// What a hook gets to see of the page it runs against.
pub struct HookContext<'a> {
    pub url: &'a str,
    pub index: usize,
    pub urls: &'a [String],
    pub handle: &'a dyn PageHandle,
}

/// Runs after the page handle is created and before navigation. A failure
/// aborts the attempt.
#[async_trait]
pub trait PreHook: Send + Sync {
    async fn run(&self, ctx: &HookContext<'_>) -> Result<()>;
}

/// Runs once the page is complete, before the handle is released. The
/// returned value is attached to the page as `_user`.
#[async_trait]
pub trait PostHook: Send + Sync {
    async fn run(&self, ctx: &HookContext<'_>) -> Result<Value>;
}

/// Post-hook evaluating a script in the loaded page.
pub struct EvaluateHook {
    expression: String,
}

impl EvaluateHook {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
        }
    }
}

#[async_trait]
impl PostHook for EvaluateHook {
    async fn run(&self, ctx: &HookContext<'_>) -> Result<Value> {
        ctx.handle
            .evaluate(&self.expression)
            .await
            .map_err(|e| HarError::Hook(format!("{}: {}", ctx.url, e)))
    }
}
