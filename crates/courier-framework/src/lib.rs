//! # Courier Framework
//!
//! The dispatch pipeline of the Courier engine.
//!
//! This layer provides:
//! - [`DispatchContext`], the per-update carrier shared by every layer
//! - [`Handler`] and [`HandlerResponse`] for async closures and functions
//! - [`MiddlewareChain`] with onion-style [`Middleware`] composition
//! - [`RouteTable`] and [`RouterMiddleware`] for command, callback, document
//!   and state routing
//! - [`SessionMiddleware`] for per-chat session loading and write-back
//! - [`DispatcherBuilder`] and [`Dispatcher`] tying it all together
//!
//! The update loop, configuration and logging live in `courier-runtime`.

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod router;
pub mod session;

#[cfg(test)]
mod testing;

pub use context::DispatchContext;
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use error::{SetupError, SetupResult};
pub use handler::{
    BoxedHandler, Handler, HandlerResponse, into_handler, noop_handler, report_failure,
};
pub use middleware::{BoxedMiddleware, Composed, Middleware, MiddlewareChain, Next};
pub use router::{
    DOCUMENT_ROUTE, HandlerEntry, HandlerKind, PARAM_DELIMITER, PHOTO_ROUTE, Resolution,
    RouteMatch, RouteTable, RouterMiddleware, RoutingMiss, split_arguments, split_payload,
};
pub use session::SessionMiddleware;
