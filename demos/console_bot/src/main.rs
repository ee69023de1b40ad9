//! Console Bot Example
//!
//! A pizza ordering bot that reads updates from stdin and prints replies to
//! stdout, exercising the whole Courier pipeline without a chat platform.
//!
//! # Input
//!
//! Each line becomes one update:
//!
//! ```text
//! /order                 command
//! large                  plain text, routed by the chat's state
//! cb:confirm@yes         callback query with payload "confirm@yes"
//! doc:application/pdf    document with the given MIME type
//! photo                  photo
//! #7 /start              any of the above, sent from chat 7
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package console-bot -- --config demos/console_bot/courier.toml
//! ```

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use clap::Parser;
use courier::core::{Document, MessageId, PhotoSize};
use courier::framework::PHOTO_ROUTE;
use courier::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;

const AWAITING_SIZE: &str = "awaiting_size";
const AWAITING_ADDRESS: &str = "awaiting_address";
const AWAITING_CONFIRMATION: &str = "awaiting_confirmation";

const SIZES: [&str; 3] = ["small", "medium", "large"];

const HELP: &str = "\
/start        start over
/order        order a pizza
/status       show where your order is
/echo <text>  repeat <text>
/oven         try the oven (it is broken)
Send a PDF or a photo to share your own recipe.";

#[derive(Parser, Debug)]
#[command(name = "console-bot", about = "Order pizza from the terminal")]
struct Args {
    /// Configuration file; `courier.toml` in the current directory otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile (development, production, ...)
    #[arg(short, long)]
    profile: Option<String>,

    /// Chat that typed lines are sent from
    #[arg(long, default_value_t = 1)]
    chat: ChatId,
}

// ============================================================================
// Transport
// ============================================================================

/// Prints everything the bot sends.
#[derive(Default)]
struct ConsoleTransport {
    next_id: std::sync::atomic::AtomicI64,
}

#[async_trait]
impl Transport for ConsoleTransport {
    fn id(&self) -> &str {
        "console"
    }

    async fn send_message(&self, chat_id: ChatId, text: &str) -> TransportResult<MessageId> {
        for line in text.lines() {
            println!("[chat {chat_id}] bot: {line}");
        }
        Ok(self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed))
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> TransportResult<()> {
        let kind = if show_alert { "alert" } else { "toast" };
        println!("[{callback_id}] {kind}: {}", text.unwrap_or("(acknowledged)"));
        Ok(())
    }

    async fn set_commands(
        &self,
        commands: &[BotCommand],
        _language_code: Option<&str>,
    ) -> TransportResult<()> {
        println!("Commands:");
        for command in commands {
            println!("  /{:<8} {}", command.command, command.description);
        }
        Ok(())
    }

    async fn set_profile(&self, profile: &BotProfile) -> TransportResult<()> {
        if let Some(name) = &profile.name {
            println!("{name} ({})", profile.language_code);
        }
        if let Some(description) = &profile.description {
            println!("{description}");
        }
        Ok(())
    }

    async fn on_shutdown(&self) {
        println!("Kitchen closed.");
    }
}

// ============================================================================
// Input
// ============================================================================

/// Turns one input line into an update, or `None` for a blank line.
fn parse_line(update_id: i64, default_chat: ChatId, line: &str) -> Option<Update> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (chat, line) = match line.strip_prefix('#').and_then(|rest| rest.split_once(' ')) {
        Some((id, rest)) => match id.parse() {
            Ok(id) => (id, rest.trim()),
            Err(_) => (default_chat, line),
        },
        None => (default_chat, line),
    };

    let user = User::new(chat, "Console");
    let message = Message::new(update_id, Chat::private(chat)).with_from(user.clone());

    let update = if let Some(data) = line.strip_prefix("cb:") {
        let query = CallbackQuery::new(format!("cb-{update_id}"), user, data).with_message(message);
        Update::callback(update_id, query)
    } else if let Some(rest) = line.strip_prefix("doc:") {
        let mut parts = rest.split_whitespace();
        let document = Document {
            file_id: format!("file-{update_id}"),
            mime_type: parts.next().map(str::to_string),
            file_name: parts.next().map(str::to_string),
            file_size: None,
        };
        Update::message(update_id, message.with_document(document))
    } else if line == "photo" {
        let photo = PhotoSize {
            file_id: format!("photo-{update_id}"),
            width: 640,
            height: 480,
            file_size: None,
        };
        Update::message(update_id, message.with_photo(vec![photo]))
    } else {
        Update::message(update_id, message.with_text(line))
    };

    Some(update)
}

// ============================================================================
// Handlers
// ============================================================================

async fn start(ctx: Arc<DispatchContext>) -> String {
    ctx.clear_state();
    ctx.clear_session_data();
    let name = ctx
        .update()
        .sender()
        .map(|user| user.full_name())
        .unwrap_or_else(|| "stranger".to_string());
    format!("Hi {name}! Send /order to order a pizza or /help for everything else.")
}

async fn help(_ctx: Arc<DispatchContext>) -> &'static str {
    HELP
}

async fn echo(ctx: Arc<DispatchContext>) -> String {
    match ctx.command_arguments() {
        "" => "Nothing to echo.".to_string(),
        text => text.to_string(),
    }
}

async fn order(ctx: Arc<DispatchContext>) -> String {
    ctx.set_state(AWAITING_SIZE);
    format!("Which size? {}", SIZES.join(", "))
}

async fn status(ctx: Arc<DispatchContext>) -> String {
    let size: Option<String> = ctx.session_get("size");
    match (ctx.state().as_str(), size) {
        ("", _) => "No order in progress.".to_string(),
        (AWAITING_SIZE, _) => "Waiting for you to pick a size.".to_string(),
        (state, Some(size)) => format!("A {size} pizza, {}.", state.replace('_', " ")),
        (state, None) => state.replace('_', " "),
    }
}

async fn oven(_ctx: Arc<DispatchContext>) -> Result<&'static str> {
    Err(anyhow!("the oven is on fire"))
}

async fn choose_size(ctx: Arc<DispatchContext>) -> Result<String> {
    let size = ctx.text().trim().to_lowercase();
    if !SIZES.contains(&size.as_str()) {
        return Ok(format!("Sorry, we only bake {}.", SIZES.join(", ")));
    }

    ctx.session_set("size", &size)?;
    ctx.set_state(AWAITING_ADDRESS);
    Ok(format!("A {size} pizza. Where should we deliver it?"))
}

async fn enter_address(ctx: Arc<DispatchContext>) -> Result<String> {
    let address = ctx.text().trim().to_string();
    let size: String = ctx.session_get("size").unwrap_or_default();

    ctx.session_set("address", &address)?;
    ctx.set_state(AWAITING_CONFIRMATION);
    Ok(format!(
        "Deliver a {size} pizza to {address}?\nAnswer with cb:confirm@yes or cb:confirm@no"
    ))
}

async fn confirm(ctx: Arc<DispatchContext>) -> Result<Option<String>> {
    if ctx.state() != AWAITING_CONFIRMATION {
        ctx.answer_callback(Some("Nothing to confirm")).await?;
        return Ok(None);
    }

    let reply = match ctx.param(0).as_deref() {
        Some("yes") => {
            let size: String = ctx.session_get("size").unwrap_or_default();
            let address: String = ctx.session_get("address").unwrap_or_default();
            ctx.answer_callback(Some("Order placed")).await?;
            format!("Your {size} pizza is on its way to {address}.")
        }
        Some("no") => {
            ctx.answer_callback(None).await?;
            "Order cancelled.".to_string()
        }
        other => {
            ctx.answer_callback_alert(&format!("Unknown answer: {}", other.unwrap_or("")))
                .await?;
            return Ok(None);
        }
    };

    ctx.clear_state();
    ctx.clear_session_data();
    Ok(Some(reply))
}

async fn recipe_pdf(ctx: Arc<DispatchContext>) -> String {
    let name = ctx
        .update()
        .as_message()
        .and_then(|m| m.document.as_ref())
        .and_then(|d| d.file_name.clone())
        .unwrap_or_else(|| "your recipe".to_string());
    format!("Thanks, the chef will read {name}.")
}

async fn recipe_photo(_ctx: Arc<DispatchContext>) -> &'static str {
    "That looks delicious."
}

async fn any_document(_ctx: Arc<DispatchContext>) -> &'static str {
    "We only read recipes as PDF."
}

async fn unknown(ctx: Arc<DispatchContext>) -> Result<Option<String>> {
    if ctx.update().as_callback_query().is_some() {
        ctx.answer_callback(Some("That button does nothing")).await?;
        return Ok(None);
    }
    Ok(Some("I didn't get that. Try /help.".to_string()))
}

// ============================================================================
// Middleware
// ============================================================================

async fn timing(ctx: Arc<DispatchContext>, next: Next) {
    let started = Instant::now();
    next.run(Arc::clone(&ctx)).await;

    let route = ctx
        .route()
        .map(|r| format!("{}:{}", r.kind, r.name))
        .unwrap_or_else(|| "default".to_string());
    debug!(
        request_id = %ctx.request_id(),
        route = %route,
        elapsed_us = started.elapsed().as_micros() as u64,
        "Update handled"
    );
}

fn build_dispatcher(transport: BoxedTransport) -> Result<Dispatcher, SetupError> {
    let mut builder = Dispatcher::builder(transport);
    builder
        .register_command("start", "Start over", start)?
        .register_command("help", "List commands", help)?
        .register_command("order", "Order a pizza", order)?
        .register_command("status", "Show your order", status)?
        .register_command("echo", "Repeat the text", echo)?
        .register_command("oven", "Try the oven", oven)?
        .register_message(AWAITING_SIZE, choose_size)?
        .register_message(AWAITING_ADDRESS, enter_address)?
        .register_callback("confirm", confirm)?
        .register_document_type("application/pdf", recipe_pdf)?
        .register_document_type(PHOTO_ROUTE, recipe_photo)?
        .register_document(any_document)?
        .use_middleware(timing)
        .default_handler(unknown)
        .fallback_reply("Something went wrong, please try again.");
    Ok(builder.build())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let dispatcher = build_dispatcher(Arc::new(ConsoleTransport::default()))?;

    let mut runtime = CourierRuntime::builder();
    if let Some(path) = &args.config {
        runtime = runtime.config_file(path);
    }
    if let Some(profile) = &args.profile {
        runtime = runtime.profile(profile);
    }
    let runtime = runtime
        .build(dispatcher)?
        .before_start("banner", || async {
            info!("Type /help to see what the bot can do, Ctrl+D to quit");
            Ok(())
        })
        .before_shutdown("goodbye", || async {
            info!("No more orders today");
            Ok(())
        });

    let chat = args.chat;
    let mut update_id = 0;
    let updates = LinesStream::new(BufReader::new(tokio::io::stdin()).lines())
        .map_while(std::result::Result::ok)
        .filter_map(move |line| {
            update_id += 1;
            parse_line(update_id, chat, &line)
        });

    runtime.run(updates).await?;
    Ok(())
}
