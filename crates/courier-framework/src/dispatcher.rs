//! Dispatcher assembly.
//!
//! [`DispatcherBuilder`] collects handler registrations and middleware, then
//! freezes them into an immutable [`Dispatcher`]. The dispatcher turns each
//! update into a [`DispatchContext`] and runs it through the composed chain:
//!
//! ```text
//! [custom layers...] -> session -> router -> [custom layers...] -> handler
//! ```
//!
//! Layer order is registration order. [`DispatcherBuilder::with_defaults`]
//! installs the session and routing layers first; custom middleware added
//! afterwards runs inside them and can see the resolved handler and session.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span};

use courier_core::{BotCommand, BoxedTransport, MemorySessionStore, SessionStore, Update};

use crate::context::DispatchContext;
use crate::error::SetupResult;
use crate::handler::{Handler, into_handler};
use crate::middleware::{BoxedMiddleware, Composed, Middleware, MiddlewareChain};
use crate::router::{DOCUMENT_ROUTE, HandlerKind, RouteTable, RouterMiddleware};
use crate::session::SessionMiddleware;

enum Layer {
    Session,
    Routing,
    Custom(BoxedMiddleware),
}

/// Collects registrations and middleware for a [`Dispatcher`].
pub struct DispatcherBuilder {
    transport: BoxedTransport,
    store: Arc<dyn SessionStore>,
    routes: RouteTable,
    layers: Vec<Layer>,
    commands: Vec<BotCommand>,
    fallback_reply: Option<Arc<str>>,
}

impl DispatcherBuilder {
    /// Creates a builder with no layers and an in-memory session store.
    pub fn new(transport: BoxedTransport) -> Self {
        Self {
            transport,
            store: Arc::new(MemorySessionStore::new()),
            routes: RouteTable::new(),
            layers: Vec::new(),
            commands: Vec::new(),
            fallback_reply: None,
        }
    }

    /// Creates a builder with the session and routing layers installed.
    pub fn with_defaults(transport: BoxedTransport) -> Self {
        let mut builder = Self::new(transport);
        builder.use_session().use_routing();
        builder
    }

    /// Replaces the session store.
    pub fn session_store(&mut self, store: Arc<dyn SessionStore>) -> &mut Self {
        self.store = store;
        self
    }

    /// Adds the session layer at the current position. Added at most once.
    pub fn use_session(&mut self) -> &mut Self {
        if self.layers.iter().any(|l| matches!(l, Layer::Session)) {
            debug!("Session layer already installed");
        } else {
            self.layers.push(Layer::Session);
        }
        self
    }

    /// Adds the routing layer at the current position. Added at most once.
    pub fn use_routing(&mut self) -> &mut Self {
        if self.layers.iter().any(|l| matches!(l, Layer::Routing)) {
            debug!("Routing layer already installed");
        } else {
            self.layers.push(Layer::Routing);
        }
        self
    }

    /// Adds a custom middleware at the current position.
    pub fn use_middleware<M: Middleware>(&mut self, middleware: M) -> &mut Self {
        self.layers.push(Layer::Custom(Arc::new(middleware)));
        self
    }

    /// Registers a command handler and adds it to the published command menu.
    pub fn register_command<H: Handler>(
        &mut self,
        name: &str,
        description: &str,
        handler: H,
    ) -> SetupResult<&mut Self> {
        self.routes
            .add_handler(name, HandlerKind::Command, into_handler(handler))?;
        self.commands.push(BotCommand::new(name, description));
        Ok(self)
    }

    /// Registers a handler for callback payloads whose action is `name`.
    pub fn register_callback<H: Handler>(&mut self, name: &str, handler: H) -> SetupResult<&mut Self> {
        self.routes
            .add_handler(name, HandlerKind::Callback, into_handler(handler))?;
        Ok(self)
    }

    /// Registers a handler for plain messages while the chat is in `state`.
    pub fn register_message<H: Handler>(&mut self, state: &str, handler: H) -> SetupResult<&mut Self> {
        self.routes
            .add_handler(state, HandlerKind::MessageState, into_handler(handler))?;
        Ok(self)
    }

    /// Registers a handler for any document or photo.
    pub fn register_document<H: Handler>(&mut self, handler: H) -> SetupResult<&mut Self> {
        self.routes
            .add_handler(DOCUMENT_ROUTE, HandlerKind::Document, into_handler(handler))?;
        Ok(self)
    }

    /// Registers a handler for documents of one MIME type, or for `"photo"`.
    pub fn register_document_type<H: Handler>(
        &mut self,
        mime_type: &str,
        handler: H,
    ) -> SetupResult<&mut Self> {
        self.routes
            .add_handler(mime_type, HandlerKind::Document, into_handler(handler))?;
        Ok(self)
    }

    /// Sets the handler for updates that match no registration.
    pub fn default_handler<H: Handler>(&mut self, handler: H) -> &mut Self {
        self.routes.set_default_handler(into_handler(handler));
        self
    }

    /// Sets the text sent to the chat when a handler returns an error.
    pub fn fallback_reply(&mut self, text: impl Into<String>) -> &mut Self {
        self.fallback_reply = Some(Arc::from(text.into()));
        self
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Freezes the configuration into a [`Dispatcher`].
    pub fn build(self) -> Dispatcher {
        let routes = Arc::new(self.routes);
        let session = SessionMiddleware::new(Arc::clone(&self.store));

        let mut chain = MiddlewareChain::new();
        for layer in self.layers {
            match layer {
                Layer::Session => chain.append(session.clone()),
                Layer::Routing => chain.append(RouterMiddleware::new(Arc::clone(&routes))),
                Layer::Custom(middleware) => chain.append_boxed(middleware),
            };
        }

        let pipeline = chain.wrap(invoke_resolved);
        debug!(
            layers = chain.len(),
            routes = routes.len(),
            "Dispatcher built"
        );

        Dispatcher {
            transport: self.transport,
            store: self.store,
            routes,
            pipeline,
            commands: self.commands,
            fallback_reply: self.fallback_reply,
        }
    }
}

impl fmt::Debug for DispatcherBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherBuilder")
            .field("transport", &self.transport.id())
            .field("layers", &self.layers.len())
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}

/// The terminal step: invokes whatever handler the router attached.
async fn invoke_resolved(ctx: Arc<DispatchContext>) {
    match ctx.handler() {
        Some(handler) => {
            info!(
                request_id = %ctx.request_id(),
                sender_id = ?ctx.sender_id(),
                route = ?ctx.route().map(|r| r.name),
                "Processing update"
            );
            handler.call(Arc::clone(&ctx)).await;
        }
        None => error!(
            request_id = %ctx.request_id(),
            "No handler attached to context, is the routing layer installed?"
        ),
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Runs updates through the configured middleware chain.
///
/// Immutable once built and safe to share across tasks.
pub struct Dispatcher {
    transport: BoxedTransport,
    store: Arc<dyn SessionStore>,
    routes: Arc<RouteTable>,
    pipeline: Composed,
    commands: Vec<BotCommand>,
    fallback_reply: Option<Arc<str>>,
}

impl Dispatcher {
    pub fn builder(transport: BoxedTransport) -> DispatcherBuilder {
        DispatcherBuilder::with_defaults(transport)
    }

    pub fn transport(&self) -> &BoxedTransport {
        &self.transport
    }

    pub fn session_store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Commands registered with a description, in registration order.
    pub fn commands(&self) -> &[BotCommand] {
        &self.commands
    }

    /// Number of middleware layers in the pipeline.
    pub fn layers(&self) -> usize {
        self.pipeline.len()
    }

    /// Creates the context a dispatch of `update` would use.
    pub fn context(&self, update: Update, cancel: CancellationToken) -> Arc<DispatchContext> {
        Arc::new(
            DispatchContext::new(update, Arc::clone(&self.transport), cancel)
                .with_fallback_reply(self.fallback_reply.clone()),
        )
    }

    /// Dispatches one update to completion.
    pub async fn dispatch(&self, update: Update, cancel: CancellationToken) {
        let ctx = self.context(update, cancel);
        self.dispatch_context(ctx).await;
    }

    /// Runs an existing context through the pipeline.
    pub async fn dispatch_context(&self, ctx: Arc<DispatchContext>) {
        let span = info_span!(
            "dispatch",
            request_id = %ctx.request_id(),
            update_id = ctx.update().update_id,
            kind = ctx.update().kind_name(),
            chat_id = ?ctx.chat_id(),
        );
        self.pipeline.call(ctx).instrument(span).await;
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("transport", &self.transport.id())
            .field("layers", &self.pipeline.len())
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SetupError;
    use crate::middleware::Next;
    use crate::testing::{RecordingTransport, callback_update, document_update, text_update};
    use courier_core::SessionStoreExt;

    fn dispatcher_with(
        transport: Arc<RecordingTransport>,
        setup: impl FnOnce(&mut DispatcherBuilder) -> SetupResult<()>,
    ) -> Dispatcher {
        let mut builder = DispatcherBuilder::with_defaults(transport);
        setup(&mut builder).unwrap();
        builder.build()
    }

    #[tokio::test]
    async fn test_state_machine_across_dispatches() {
        let transport = RecordingTransport::new();
        let dispatcher = dispatcher_with(transport.clone(), |b| {
            b.register_command("start", "Start the bot", |ctx: Arc<DispatchContext>| async move {
                ctx.set_state("awaiting_name");
                "What is your name?"
            })?
            .register_message("awaiting_name", |ctx: Arc<DispatchContext>| async move {
                ctx.session_set("name", ctx.text())?;
                ctx.clear_state();
                Ok::<_, courier_core::SessionError>(format!("Nice to meet you, {}!", ctx.text()))
            })?;
            Ok(())
        });

        let token = CancellationToken::new();
        dispatcher.dispatch(text_update(1, "/start"), token.clone()).await;
        dispatcher.dispatch(text_update(1, "Ada"), token.clone()).await;
        // State was cleared, so this goes to the default handler.
        dispatcher.dispatch(text_update(1, "again"), token).await;

        assert_eq!(
            transport.sent(),
            vec![
                (1, "What is your name?".to_string()),
                (1, "Nice to meet you, Ada!".to_string()),
            ]
        );
        let name = dispatcher
            .session_store()
            .mutate(1, |s| s.get::<String>("name"))
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn test_duplicate_registration_fails() {
        let mut builder = DispatcherBuilder::with_defaults(RecordingTransport::new());
        builder
            .register_callback("vote", |_ctx: Arc<DispatchContext>| async {})
            .unwrap();
        let err = builder
            .register_callback("vote", |_ctx: Arc<DispatchContext>| async {})
            .unwrap_err();
        assert!(matches!(err, SetupError::HandlerAlreadyExists { .. }));

        // Same name as a command is fine.
        builder
            .register_command("vote", "Vote", |_ctx: Arc<DispatchContext>| async {})
            .unwrap();
        assert_eq!(builder.build().commands(), &[BotCommand::new("vote", "Vote")]);
    }

    #[tokio::test]
    async fn test_failed_command_registration_is_not_published() {
        let mut builder = DispatcherBuilder::with_defaults(RecordingTransport::new());
        assert!(
            builder
                .register_command("", "Nothing", |_ctx: Arc<DispatchContext>| async {})
                .is_err()
        );
        assert!(builder.build().commands().is_empty());
    }

    #[tokio::test]
    async fn test_callback_params_reach_handler() {
        let transport = RecordingTransport::new();
        let dispatcher = dispatcher_with(transport.clone(), |b| {
            b.register_callback("vote", |ctx: Arc<DispatchContext>| async move {
                let _ = ctx.answer_callback(Some("Thanks")).await;
                format!("voted {}", ctx.params().join(","))
            })?;
            Ok(())
        });

        dispatcher
            .dispatch(callback_update(2, "vote@42@up"), CancellationToken::new())
            .await;

        assert_eq!(transport.sent(), vec![(2, "voted 42,up".to_string())]);
        assert_eq!(
            transport.answered(),
            vec![("cb-1".to_string(), Some("Thanks".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_unmatched_update_uses_default_handler() {
        let transport = RecordingTransport::new();
        let dispatcher = dispatcher_with(transport.clone(), |b| {
            b.default_handler(|_ctx: Arc<DispatchContext>| async { "Unknown input" });
            Ok(())
        });

        dispatcher
            .dispatch(text_update(3, "/unknown"), CancellationToken::new())
            .await;
        assert_eq!(transport.sent(), vec![(3, "Unknown input".to_string())]);
    }

    #[tokio::test]
    async fn test_document_handler() {
        let transport = RecordingTransport::new();
        let dispatcher = dispatcher_with(transport.clone(), |b| {
            b.register_document_type("application/pdf", |_ctx: Arc<DispatchContext>| async {
                "pdf"
            })?
            .register_document(|_ctx: Arc<DispatchContext>| async { "file" })?;
            Ok(())
        });

        let token = CancellationToken::new();
        dispatcher
            .dispatch(document_update(4, Some("application/pdf")), token.clone())
            .await;
        dispatcher
            .dispatch(document_update(4, Some("text/plain")), token)
            .await;
        assert_eq!(
            transport.sent(),
            vec![(4, "pdf".to_string()), (4, "file".to_string())]
        );
    }

    #[tokio::test]
    async fn test_handler_error_sends_fallback_reply() {
        let transport = RecordingTransport::new();
        let mut builder = DispatcherBuilder::with_defaults(transport.clone());
        builder
            .fallback_reply("Something went wrong")
            .register_command("fail", "Always fails", |_ctx: Arc<DispatchContext>| async {
                Err::<(), _>("database unavailable")
            })
            .unwrap();
        let dispatcher = builder.build();

        dispatcher
            .dispatch(text_update(5, "/fail"), CancellationToken::new())
            .await;
        assert_eq!(
            transport.sent(),
            vec![(5, "Something went wrong".to_string())]
        );
    }

    #[tokio::test]
    async fn test_custom_middleware_can_short_circuit() {
        let transport = RecordingTransport::new();
        let mut builder = DispatcherBuilder::new(transport.clone());
        builder
            .use_middleware(|ctx: Arc<DispatchContext>, next: Next| async move {
                if ctx.sender_id() == Some(666) {
                    return;
                }
                next.run(ctx).await;
            })
            .use_session()
            .use_routing()
            .register_command("ping", "Ping", |_ctx: Arc<DispatchContext>| async { "pong" })
            .unwrap();
        let dispatcher = builder.build();
        assert_eq!(dispatcher.layers(), 3);

        let token = CancellationToken::new();
        dispatcher.dispatch(text_update(666, "/ping"), token.clone()).await;
        dispatcher.dispatch(text_update(7, "/ping"), token).await;

        assert_eq!(transport.sent(), vec![(7, "pong".to_string())]);
    }

    #[tokio::test]
    async fn test_layers_are_installed_once() {
        let mut builder = DispatcherBuilder::with_defaults(RecordingTransport::new());
        builder.use_session().use_routing();
        assert_eq!(builder.build().layers(), 2);
    }

    #[tokio::test]
    async fn test_dispatch_context_exposes_results() {
        let dispatcher = dispatcher_with(RecordingTransport::new(), |b| {
            b.register_command("buy", "Buy", |ctx: Arc<DispatchContext>| async move {
                ctx.set_data("bought", ctx.param(0));
            })?;
            Ok(())
        });

        let ctx = dispatcher.context(text_update(8, "/buy 3"), CancellationToken::new());
        dispatcher.dispatch_context(Arc::clone(&ctx)).await;

        assert_eq!(
            ctx.get_data::<Option<String>>("bought"),
            Some(Some("3".to_string()))
        );
        assert_eq!(ctx.route().map(|r| r.kind), Some(HandlerKind::Command));
    }
}
