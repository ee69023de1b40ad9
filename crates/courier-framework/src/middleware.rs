//! Middleware chain.
//!
//! A [`Middleware`] wraps the rest of the dispatch: it may do work, call
//! [`Next::run`] to continue, do more work after the downstream returns, or
//! return early without calling `next` to short-circuit the chain.
//!
//! Middleware registered first is outermost. For a chain `[m1, m2]` around a
//! handler `h`, the order of effects is:
//!
//! ```text
//! m1 before -> m2 before -> h -> m2 after -> m1 after
//! ```
//!
//! Every step runs behind a panic guard: a panic in a handler or middleware is
//! logged and converted into an early return for that step, so the after
//! sections of the enclosing layers still run.

use std::any::Any;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use tower::Service;
use tracing::error;

use crate::context::DispatchContext;
use crate::handler::{BoxedHandler, Handler};

/// A layer around the downstream part of a dispatch.
pub trait Middleware: Send + Sync + 'static {
    /// Processes `ctx`, calling `next.run(ctx)` to continue the chain.
    fn handle(&self, ctx: Arc<DispatchContext>, next: Next) -> BoxFuture<'static, ()>;
}

impl<F, Fut> Middleware for F
where
    F: Fn(Arc<DispatchContext>, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn handle(&self, ctx: Arc<DispatchContext>, next: Next) -> BoxFuture<'static, ()> {
        Box::pin((self)(ctx, next))
    }
}

/// A shared middleware trait object.
pub type BoxedMiddleware = Arc<dyn Middleware>;

// ============================================================================
// Next
// ============================================================================

/// The remainder of the chain after the current middleware.
///
/// Consumed by [`run`](Self::run), so each layer continues at most once.
pub struct Next {
    chain: Arc<[BoxedMiddleware]>,
    index: usize,
    terminal: BoxedHandler,
}

impl Next {
    /// Runs the rest of the chain, then the handler.
    pub fn run(self, ctx: Arc<DispatchContext>) -> BoxFuture<'static, ()> {
        let Next {
            chain,
            index,
            terminal,
        } = self;
        let request_id = ctx.request_id();

        match chain.get(index).cloned() {
            Some(middleware) => {
                let next = Next {
                    chain,
                    index: index + 1,
                    terminal,
                };
                let step = async move { middleware.handle(ctx, next).await };
                guarded(step, request_id, "middleware", Some(index))
            }
            None => {
                let step = async move { terminal.call(ctx).await };
                guarded(step, request_id, "handler", None)
            }
        }
    }

    /// Number of middleware layers still ahead of the handler.
    pub fn remaining(&self) -> usize {
        self.chain.len().saturating_sub(self.index)
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("index", &self.index)
            .field("len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

fn guarded<F>(
    step: F,
    request_id: uuid::Uuid,
    kind: &'static str,
    index: Option<usize>,
) -> BoxFuture<'static, ()>
where
    F: Future<Output = ()> + Send + 'static,
{
    Box::pin(async move {
        if let Err(panic) = AssertUnwindSafe(step).catch_unwind().await {
            error!(
                %request_id,
                step = kind,
                index = ?index,
                panic = panic_message(&*panic),
                "Dispatch step panicked"
            );
        }
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

// ============================================================================
// MiddlewareChain
// ============================================================================

/// An ordered list of middleware.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middlewares: Vec<BoxedMiddleware>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware; it runs inside every earlier one.
    pub fn append<M: Middleware>(&mut self, middleware: M) -> &mut Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Appends an already shared middleware.
    pub fn append_boxed(&mut self, middleware: BoxedMiddleware) -> &mut Self {
        self.middlewares.push(middleware);
        self
    }

    /// Appends every middleware of `other`, preserving order.
    pub fn extend(&mut self, other: &MiddlewareChain) -> &mut Self {
        self.middlewares.extend(other.middlewares.iter().cloned());
        self
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Composes the chain around `terminal`.
    ///
    /// The chain is snapshotted: appending afterwards does not affect the
    /// returned handler, and wrapping twice yields two independent handlers.
    pub fn wrap<H: Handler>(&self, terminal: H) -> Composed {
        self.wrap_boxed(Arc::new(terminal))
    }

    /// Like [`wrap`](Self::wrap) for an already shared handler.
    pub fn wrap_boxed(&self, terminal: BoxedHandler) -> Composed {
        Composed {
            chain: self.middlewares.clone().into(),
            terminal,
        }
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("len", &self.middlewares.len())
            .finish()
    }
}

// ============================================================================
// Composed
// ============================================================================

/// A middleware chain bound to its terminal handler.
///
/// Usable both as a [`Handler`] and as a `tower::Service`.
#[derive(Clone)]
pub struct Composed {
    chain: Arc<[BoxedMiddleware]>,
    terminal: BoxedHandler,
}

impl Composed {
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    fn start(&self) -> Next {
        Next {
            chain: Arc::clone(&self.chain),
            index: 0,
            terminal: Arc::clone(&self.terminal),
        }
    }
}

impl Handler for Composed {
    fn call(&self, ctx: Arc<DispatchContext>) -> BoxFuture<'static, ()> {
        self.start().run(ctx)
    }
}

impl Service<Arc<DispatchContext>> for Composed {
    type Response = ();
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, ctx: Arc<DispatchContext>) -> Self::Future {
        let fut = self.start().run(ctx);
        Box::pin(async move {
            fut.await;
            Ok(())
        })
    }
}

impl fmt::Debug for Composed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Composed")
            .field("len", &self.chain.len())
            .finish_non_exhaustive()
    }
}
