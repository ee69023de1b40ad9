//! Handler registry and routing.
//!
//! The [`RouteTable`] keeps one registry per [`HandlerKind`]. Resolution of an
//! update follows a fixed priority:
//!
//! 1. callback queries, keyed by the action part of the payload;
//! 2. command messages, keyed by the command name;
//! 3. document and photo messages, keyed by MIME type, then `"document"` or
//!    `"photo"`;
//! 4. any other message, keyed by the session's conversation state.
//!
//! Anything that does not resolve goes to the default handler.
//!
//! Callback payloads and command arguments carry parameters separated by
//! [`PARAM_DELIMITER`]: a button with data `"vote@42@up"` resolves the
//! `"vote"` callback with params `["42", "up"]`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use courier_core::{MessageShape, Session, Update, UpdateKind};

use crate::context::DispatchContext;
use crate::error::{SetupError, SetupResult};
use crate::handler::{BoxedHandler, noop_handler};
use crate::middleware::{Middleware, Next};

/// Separator between the action and its parameters.
pub const PARAM_DELIMITER: char = '@';

/// Generic document route name.
pub const DOCUMENT_ROUTE: &str = "document";

/// Photo route name.
pub const PHOTO_ROUTE: &str = "photo";

/// The registry a handler belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    /// Slash commands, keyed by command name.
    Command,
    /// Inline button presses, keyed by action.
    Callback,
    /// Plain messages, keyed by conversation state.
    MessageState,
    /// Media messages, keyed by MIME type or media name.
    Document,
}

impl HandlerKind {
    pub const ALL: [HandlerKind; 4] = [
        HandlerKind::Command,
        HandlerKind::Callback,
        HandlerKind::MessageState,
        HandlerKind::Document,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::Command => "command",
            HandlerKind::Callback => "callback",
            HandlerKind::MessageState => "message",
            HandlerKind::Document => "document",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered handler.
#[derive(Clone)]
pub struct HandlerEntry {
    kind: HandlerKind,
    name: String,
    handler: BoxedHandler,
}

impl HandlerEntry {
    pub fn kind(&self) -> HandlerKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> &BoxedHandler {
        &self.handler
    }

    /// Invokes the handler.
    pub fn call(&self, ctx: Arc<DispatchContext>) -> BoxFuture<'static, ()> {
        self.handler.call(ctx)
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// The registration an update was routed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub kind: HandlerKind,
    pub name: String,
}

/// Why an update fell through to the default handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingMiss {
    /// The update was classified, but nothing is registered under the name.
    NotRegistered { kind: HandlerKind, name: String },
    /// The update carries nothing to route on.
    Unroutable { update_kind: &'static str },
}

impl fmt::Display for RoutingMiss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingMiss::NotRegistered { kind, name } => {
                write!(f, "no {kind} handler registered for '{name}'")
            }
            RoutingMiss::Unroutable { update_kind } => {
                write!(f, "{update_kind} update cannot be routed")
            }
        }
    }
}

/// Outcome of [`RouteTable::resolve`].
#[derive(Clone)]
pub struct Resolution {
    /// The handler to invoke, never absent.
    pub handler: BoxedHandler,
    /// Parameters extracted from the payload or command arguments.
    pub params: Vec<String>,
    /// The matched registration, `None` for the default handler.
    pub route: Option<RouteMatch>,
    /// Set when the default handler was chosen.
    pub miss: Option<RoutingMiss>,
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolution")
            .field("params", &self.params)
            .field("route", &self.route)
            .field("miss", &self.miss)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// RouteTable
// ============================================================================

/// Handlers keyed by `(kind, name)`, plus a default.
pub struct RouteTable {
    routes: HashMap<HandlerKind, HashMap<String, HandlerEntry>>,
    default: BoxedHandler,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            routes: HashMap::new(),
            default: noop_handler(),
        }
    }
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name` in the `kind` registry.
    ///
    /// Names are unique per kind; the same name may be used across kinds.
    pub fn add_handler(
        &mut self,
        name: impl Into<String>,
        kind: HandlerKind,
        handler: BoxedHandler,
    ) -> SetupResult<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(SetupError::InvalidArgument { argument: "name" });
        }

        let registry = self.routes.entry(kind).or_default();
        if registry.contains_key(&name) {
            return Err(SetupError::HandlerAlreadyExists { kind, name });
        }

        debug!(%kind, name = %name, "Registered handler");
        registry.insert(
            name.clone(),
            HandlerEntry {
                kind,
                name,
                handler,
            },
        );
        Ok(())
    }

    /// Looks up a registration by exact name and kind.
    pub fn get_handler(&self, name: &str, kind: HandlerKind) -> Option<&HandlerEntry> {
        self.routes.get(&kind).and_then(|registry| registry.get(name))
    }

    pub fn set_default_handler(&mut self, handler: BoxedHandler) {
        self.default = handler;
    }

    pub fn default_handler(&self) -> &BoxedHandler {
        &self.default
    }

    /// Names registered under `kind`, sorted.
    pub fn names(&self, kind: HandlerKind) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .routes
            .get(&kind)
            .map(|registry| registry.keys().map(String::as_str).collect())
            .unwrap_or_default();
        names.sort_unstable();
        names
    }

    /// Total number of registrations across kinds.
    pub fn len(&self) -> usize {
        self.routes.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Picks the handler for `update`.
    ///
    /// `session` is the chat's session if one was loaded; without it, plain
    /// messages cannot be routed by state.
    pub fn resolve(&self, update: &Update, session: Option<&Session>) -> Resolution {
        let message = match &update.kind {
            UpdateKind::CallbackQuery(query) => {
                let (action, params) = split_payload(query.data.as_deref().unwrap_or(""));
                return self.lookup(HandlerKind::Callback, action, params);
            }
            UpdateKind::Message(message) => message,
            UpdateKind::Other => {
                return self.miss(
                    Vec::new(),
                    RoutingMiss::Unroutable {
                        update_kind: update.kind_name(),
                    },
                );
            }
        };

        let shape = message.shape();
        if shape == MessageShape::Command {
            let name = message.command().unwrap_or("");
            let params = split_arguments(message.command_arguments());
            return self.lookup(HandlerKind::Command, name, params);
        }

        let mut media_miss = None;
        if matches!(shape, MessageShape::Document | MessageShape::Photo) {
            let mime_type = message.document.as_ref().and_then(|d| d.mime_type.as_deref());
            let keys: Vec<&str> = match shape {
                MessageShape::Photo => vec![PHOTO_ROUTE, DOCUMENT_ROUTE],
                _ => mime_type.into_iter().chain([DOCUMENT_ROUTE]).collect(),
            };
            if let Some(entry) = keys
                .iter()
                .find_map(|key| self.get_handler(key, HandlerKind::Document))
            {
                return self.matched(entry, Vec::new());
            }
            media_miss = Some(RoutingMiss::NotRegistered {
                kind: HandlerKind::Document,
                name: keys.first().copied().unwrap_or(DOCUMENT_ROUTE).to_string(),
            });
        }

        match session {
            Some(session) => self.lookup(HandlerKind::MessageState, session.state(), Vec::new()),
            None => self.miss(
                Vec::new(),
                media_miss.unwrap_or(RoutingMiss::Unroutable {
                    update_kind: "sessionless message",
                }),
            ),
        }
    }

    fn lookup(&self, kind: HandlerKind, name: &str, params: Vec<String>) -> Resolution {
        match self.get_handler(name, kind) {
            Some(entry) => self.matched(entry, params),
            None => self.miss(
                params,
                RoutingMiss::NotRegistered {
                    kind,
                    name: name.to_string(),
                },
            ),
        }
    }

    fn matched(&self, entry: &HandlerEntry, params: Vec<String>) -> Resolution {
        Resolution {
            handler: Arc::clone(&entry.handler),
            params,
            route: Some(RouteMatch {
                kind: entry.kind,
                name: entry.name.clone(),
            }),
            miss: None,
        }
    }

    fn miss(&self, params: Vec<String>, miss: RoutingMiss) -> Resolution {
        Resolution {
            handler: Arc::clone(&self.default),
            params,
            route: None,
            miss: Some(miss),
        }
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for kind in HandlerKind::ALL {
            map.entry(&kind.as_str(), &self.names(kind));
        }
        map.finish()
    }
}

/// Splits a callback payload into its action and parameters.
///
/// An empty payload yields an empty action and no parameters.
pub fn split_payload(payload: &str) -> (&str, Vec<String>) {
    let mut parts = payload.split(PARAM_DELIMITER);
    let action = parts.next().unwrap_or("");
    (action, parts.map(str::to_string).collect())
}

/// Splits command arguments into parameters. Empty arguments yield none.
pub fn split_arguments(arguments: &str) -> Vec<String> {
    if arguments.is_empty() {
        return Vec::new();
    }
    arguments.split(PARAM_DELIMITER).map(str::to_string).collect()
}

// ============================================================================
// RouterMiddleware
// ============================================================================

/// Resolves the handler and parameters for each update and attaches them to
/// the context.
///
/// Must run after the session middleware so state routing sees the session.
#[derive(Debug, Clone)]
pub struct RouterMiddleware {
    table: Arc<RouteTable>,
}

impl RouterMiddleware {
    pub fn new(table: Arc<RouteTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &Arc<RouteTable> {
        &self.table
    }
}

impl Middleware for RouterMiddleware {
    fn handle(&self, ctx: Arc<DispatchContext>, next: Next) -> BoxFuture<'static, ()> {
        let table = Arc::clone(&self.table);
        Box::pin(async move {
            let session = ctx.session();
            let resolution = table.resolve(ctx.update(), session.as_ref());

            match &resolution.miss {
                Some(miss) => warn!(
                    request_id = %ctx.request_id(),
                    update_id = ctx.update().update_id,
                    reason = %miss,
                    "No handler found, using default handler"
                ),
                None => debug!(
                    request_id = %ctx.request_id(),
                    route = ?resolution.route,
                    params = ?resolution.params,
                    "Resolved handler"
                ),
            }

            ctx.set_params(resolution.params);
            if let Some(route) = resolution.route {
                ctx.set_route(route);
            }
            ctx.set_handler(resolution.handler);

            next.run(ctx).await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::into_handler;
    use crate::testing::{callback_update, context, document_update, text_update, user};
    use courier_core::{Chat, Message, PhotoSize};
    use rstest::rstest;

    fn marker(tag: &'static str) -> BoxedHandler {
        into_handler(move |ctx: Arc<DispatchContext>| async move {
            ctx.set_data("hit", tag.to_string());
        })
    }

    async fn hit(resolution: Resolution, update: Update) -> Option<String> {
        let ctx = context(update);
        resolution.handler.call(Arc::clone(&ctx)).await;
        ctx.get_data::<String>("hit")
    }

    fn table() -> RouteTable {
        let mut table = RouteTable::new();
        table
            .add_handler("start", HandlerKind::Command, marker("cmd:start"))
            .unwrap();
        table
            .add_handler("start", HandlerKind::Callback, marker("cb:start"))
            .unwrap();
        table
            .add_handler("vote", HandlerKind::Callback, marker("cb:vote"))
            .unwrap();
        table
            .add_handler("awaiting_name", HandlerKind::MessageState, marker("state:name"))
            .unwrap();
        table
            .add_handler("application/pdf", HandlerKind::Document, marker("doc:pdf"))
            .unwrap();
        table
            .add_handler(DOCUMENT_ROUTE, HandlerKind::Document, marker("doc:any"))
            .unwrap();
        table.set_default_handler(marker("default"));
        table
    }

    #[test]
    fn test_duplicate_name_same_kind_fails() {
        let mut table = table();
        let err = table
            .add_handler("start", HandlerKind::Command, marker("again"))
            .unwrap_err();
        assert_eq!(
            err,
            SetupError::HandlerAlreadyExists {
                kind: HandlerKind::Command,
                name: "start".into()
            }
        );
        assert_eq!(
            table.get_handler("start", HandlerKind::Command).map(|e| e.name()),
            Some("start")
        );
    }

    #[test]
    fn test_same_name_different_kind_is_allowed() {
        let table = table();
        assert!(table.get_handler("start", HandlerKind::Command).is_some());
        assert!(table.get_handler("start", HandlerKind::Callback).is_some());
        assert!(table.get_handler("start", HandlerKind::MessageState).is_none());
    }

    #[test]
    fn test_empty_name_is_rejected() {
        let mut table = RouteTable::new();
        assert_eq!(
            table.add_handler("", HandlerKind::Callback, marker("x")),
            Err(SetupError::InvalidArgument { argument: "name" })
        );
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_get_handler_returns_registered_handler() {
        let handler = marker("exact");
        let mut table = RouteTable::new();
        table
            .add_handler("ping", HandlerKind::Command, Arc::clone(&handler))
            .unwrap();

        let entry = table.get_handler("ping", HandlerKind::Command).unwrap();
        assert!(Arc::ptr_eq(entry.handler(), &handler));
        assert_eq!(entry.kind(), HandlerKind::Command);

        let ctx = context(text_update(1, "/ping"));
        entry.call(Arc::clone(&ctx)).await;
        assert_eq!(ctx.get_data::<String>("hit").as_deref(), Some("exact"));
    }

    #[rstest]
    #[case("vote@42@up", "vote", &["42", "up"])]
    #[case("vote", "vote", &[])]
    #[case("", "", &[])]
    #[case("vote@", "vote", &[""])]
    fn test_split_payload(#[case] payload: &str, #[case] action: &str, #[case] params: &[&str]) {
        let (a, p) = split_payload(payload);
        assert_eq!(a, action);
        assert_eq!(p, params);
    }

    #[rstest]
    #[case("", &[])]
    #[case("3", &["3"])]
    #[case("3@red", &["3", "red"])]
    fn test_split_arguments(#[case] arguments: &str, #[case] params: &[&str]) {
        assert_eq!(split_arguments(arguments), params);
    }

    #[tokio::test]
    async fn test_callback_resolves_action_and_params() {
        let table = table();
        let update = callback_update(1, "vote@42@up");
        let resolution = table.resolve(&update, None);

        assert_eq!(resolution.params, vec!["42", "up"]);
        assert_eq!(
            resolution.route,
            Some(RouteMatch {
                kind: HandlerKind::Callback,
                name: "vote".into()
            })
        );
        assert_eq!(hit(resolution, update).await.as_deref(), Some("cb:vote"));
    }

    #[tokio::test]
    async fn test_callback_takes_priority_over_command() {
        let table = table();
        // A callback whose attached message is itself a command.
        let anchor = Message::new(1, Chat::private(1)).with_text("/start");
        let query = courier_core::CallbackQuery::new("cb", user(1), "start").with_message(anchor);
        let update = Update::callback(1, query);

        let resolution = table.resolve(&update, Some(&Session::new(1)));
        assert_eq!(hit(resolution, update).await.as_deref(), Some("cb:start"));
    }

    #[tokio::test]
    async fn test_command_resolves_with_arguments() {
        let table = table();
        let update = text_update(1, "/start@my_bot ref@abc");
        let resolution = table.resolve(&update, Some(&Session::new(1).with_state("awaiting_name")));

        assert_eq!(resolution.params, vec!["ref", "abc"]);
        assert_eq!(hit(resolution, update).await.as_deref(), Some("cmd:start"));
    }

    #[tokio::test]
    async fn test_unknown_command_uses_default_and_keeps_params() {
        let table = table();
        let update = text_update(1, "/nope 7");
        let resolution = table.resolve(&update, None);

        assert_eq!(resolution.params, vec!["7"]);
        assert_eq!(
            resolution.miss,
            Some(RoutingMiss::NotRegistered {
                kind: HandlerKind::Command,
                name: "nope".into()
            })
        );
        assert_eq!(hit(resolution, update).await.as_deref(), Some("default"));
    }

    #[tokio::test]
    async fn test_state_routing() {
        let table = table();
        let update = text_update(1, "Ada");
        let session = Session::new(1).with_state("awaiting_name");

        let resolution = table.resolve(&update, Some(&session));
        assert!(resolution.params.is_empty());
        assert_eq!(hit(resolution, update).await.as_deref(), Some("state:name"));
    }

    #[tokio::test]
    async fn test_unknown_state_uses_default() {
        let table = table();
        let update = text_update(1, "hello");
        let resolution = table.resolve(&update, Some(&Session::new(1)));

        assert_eq!(
            resolution.miss,
            Some(RoutingMiss::NotRegistered {
                kind: HandlerKind::MessageState,
                name: String::new()
            })
        );
        assert_eq!(hit(resolution, update).await.as_deref(), Some("default"));
    }

    #[tokio::test]
    async fn test_message_without_session_uses_default() {
        let table = table();
        let update = text_update(1, "hello");
        let resolution = table.resolve(&update, None);
        assert!(matches!(
            resolution.miss,
            Some(RoutingMiss::Unroutable { .. })
        ));
        assert_eq!(hit(resolution, update).await.as_deref(), Some("default"));
    }

    #[tokio::test]
    async fn test_document_routing_prefers_mime_type() {
        let table = table();

        let pdf = document_update(1, Some("application/pdf"));
        let resolution = table.resolve(&pdf, None);
        assert_eq!(hit(resolution, pdf).await.as_deref(), Some("doc:pdf"));

        let zip = document_update(1, Some("application/zip"));
        let resolution = table.resolve(&zip, None);
        assert_eq!(hit(resolution, zip).await.as_deref(), Some("doc:any"));

        let untyped = document_update(1, None);
        let resolution = table.resolve(&untyped, None);
        assert_eq!(hit(resolution, untyped).await.as_deref(), Some("doc:any"));
    }

    #[tokio::test]
    async fn test_photo_falls_back_to_document_route() {
        let table = table();
        let message = Message::new(1, Chat::private(1)).with_photo(vec![PhotoSize {
            file_id: "p".into(),
            width: 90,
            height: 90,
            file_size: None,
        }]);
        let update = Update::message(1, message);

        let resolution = table.resolve(&update, None);
        assert_eq!(hit(resolution, update).await.as_deref(), Some("doc:any"));
    }

    #[tokio::test]
    async fn test_unregistered_document_falls_through_to_state() {
        let mut table = RouteTable::new();
        table
            .add_handler("awaiting_file", HandlerKind::MessageState, marker("state:file"))
            .unwrap();

        let update = document_update(1, Some("image/png"));
        let session = Session::new(1).with_state("awaiting_file");
        let resolution = table.resolve(&update, Some(&session));
        assert_eq!(hit(resolution, update).await.as_deref(), Some("state:file"));

        let update = document_update(1, Some("image/png"));
        let resolution = table.resolve(&update, None);
        assert_eq!(
            resolution.miss,
            Some(RoutingMiss::NotRegistered {
                kind: HandlerKind::Document,
                name: "image/png".into()
            })
        );
    }

    #[tokio::test]
    async fn test_other_update_uses_default() {
        let table = table();
        let update = Update::other(9);
        let resolution = table.resolve(&update, None);
        assert_eq!(
            resolution.miss,
            Some(RoutingMiss::Unroutable {
                update_kind: "other"
            })
        );
        assert_eq!(hit(resolution, update).await.as_deref(), Some("default"));
    }

    #[tokio::test]
    async fn test_router_middleware_attaches_resolution() {
        let table = Arc::new(table());
        let router = RouterMiddleware::new(Arc::clone(&table));
        let ctx = context(callback_update(3, "vote@1"));

        let mut chain = crate::middleware::MiddlewareChain::new();
        chain.append(router);
        let composed = chain.wrap(|ctx: Arc<DispatchContext>| async move {
            if let Some(handler) = ctx.handler() {
                handler.call(Arc::clone(&ctx)).await;
            }
        });
        crate::handler::Handler::call(&composed, Arc::clone(&ctx)).await;

        assert_eq!(ctx.params(), vec!["1"]);
        assert_eq!(ctx.route().map(|r| r.name), Some("vote".to_string()));
        assert_eq!(ctx.get_data::<String>("hit").as_deref(), Some("cb:vote"));
    }
}
