//! Update handlers.
//!
//! A [`Handler`] is the terminal unit of work for one update. Any async
//! closure or function taking an `Arc<DispatchContext>` is a handler, as long
//! as its output implements [`HandlerResponse`]:
//!
//! ```rust,ignore
//! async fn start(ctx: Arc<DispatchContext>) -> String {
//!     format!("Hello, {}!", ctx.text())
//! }
//!
//! async fn save(ctx: Arc<DispatchContext>) -> Result<(), SessionError> {
//!     ctx.session_set("name", ctx.text())?;
//!     Ok(())
//! }
//! ```

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{error, warn};

use crate::context::DispatchContext;

// ============================================================================
// Handler
// ============================================================================

/// The final step of a dispatch.
pub trait Handler: Send + Sync + 'static {
    /// Processes the update carried by `ctx`.
    fn call(&self, ctx: Arc<DispatchContext>) -> BoxFuture<'static, ()>;
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Arc<DispatchContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: HandlerResponse,
{
    fn call(&self, ctx: Arc<DispatchContext>) -> BoxFuture<'static, ()> {
        let fut = (self)(Arc::clone(&ctx));
        Box::pin(async move {
            fut.await.process_response(&ctx).await;
        })
    }
}

/// A shared handler trait object.
pub type BoxedHandler = Arc<dyn Handler>;

/// Boxes a handler for storage in a route table.
pub fn into_handler<H: Handler>(handler: H) -> BoxedHandler {
    Arc::new(handler)
}

/// A handler that does nothing. Used as the default until one is configured.
pub fn noop_handler() -> BoxedHandler {
    into_handler(|_ctx: Arc<DispatchContext>| async {})
}

// ============================================================================
// HandlerResponse
// ============================================================================

/// A trait for types that can be returned from handlers.
#[async_trait]
pub trait HandlerResponse: Send + 'static {
    /// Performs the side effects of the response, e.g. sending a reply.
    async fn process_response(self, ctx: &DispatchContext);
}

#[async_trait]
impl HandlerResponse for () {
    async fn process_response(self, _ctx: &DispatchContext) {}
}

/// Sends the string to the update's chat.
#[async_trait]
impl HandlerResponse for String {
    async fn process_response(self, ctx: &DispatchContext) {
        if let Err(e) = ctx.reply(&self).await {
            error!(request_id = %ctx.request_id(), error = %e, "Failed to send reply");
        }
    }
}

#[async_trait]
impl HandlerResponse for &'static str {
    async fn process_response(self, ctx: &DispatchContext) {
        self.to_string().process_response(ctx).await;
    }
}

#[async_trait]
impl<T: HandlerResponse> HandlerResponse for Option<T> {
    async fn process_response(self, ctx: &DispatchContext) {
        if let Some(t) = self {
            t.process_response(ctx).await;
        }
    }
}

/// On `Err`, logs the error and sends the configured fallback reply.
#[async_trait]
impl<T: HandlerResponse, E: Display + Send + 'static> HandlerResponse for Result<T, E> {
    async fn process_response(self, ctx: &DispatchContext) {
        match self {
            Ok(t) => t.process_response(ctx).await,
            Err(e) => {
                let message = e.to_string();
                report_failure(ctx, &message).await;
            }
        }
    }
}

/// Logs a handler failure and, if configured, tells the user about it.
pub async fn report_failure(ctx: &DispatchContext, error: &str) {
    error!(
        request_id = %ctx.request_id(),
        update_id = ctx.update().update_id,
        chat_id = ?ctx.chat_id(),
        error = %error,
        "Handler failed"
    );
    let Some(text) = ctx.fallback_reply() else {
        return;
    };
    if ctx.chat_id().is_none() {
        return;
    }
    if let Err(e) = ctx.reply(text).await {
        warn!(request_id = %ctx.request_id(), error = %e, "Failed to send fallback reply");
    }
}
