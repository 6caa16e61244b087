//! Telegram bot client - simple polling version.
//!
//! Command handlers never talk to Telegram directly. Every reply is
//! enqueued on the [`Notifier`], so bot traffic shares the same paced
//! pipeline as alerts and API broadcasts.

use teloxide::prelude::*;

use crate::error::Error;
use crate::notify::Notifier;
use crate::store::{Limits, Store, User};

use super::format;

/// Everything a command handler needs.
#[derive(Clone)]
pub struct BotContext {
    pub store: Store,
    pub notifier: Notifier,
    /// Base URL shown in setup instructions, e.g. "http://127.0.0.1:8000".
    pub ingest_url: String,
    /// Accounts quiet for longer than this get the warning marker.
    pub stale_after_secs: i64,
}

/// Run the bot with long polling until the process stops.
pub async fn run_bot(bot: Bot, ctx: BotContext) -> Result<(), Error> {
    tracing::info!("Starting Telegram bot...");

    if let Err(e) = bot
        .set_my_commands(vec![
            teloxide::types::BotCommand::new("start", "Register and get your API key"),
            teloxide::types::BotCommand::new("key", "Show your API key"),
            teloxide::types::BotCommand::new("status", "Full status of all accounts"),
            teloxide::types::BotCommand::new("accounts", "List registered accounts"),
            teloxide::types::BotCommand::new("rename", "Rename an account"),
            teloxide::types::BotCommand::new("cent", "Toggle cent account scaling"),
            teloxide::types::BotCommand::new("delete", "Remove an account"),
            teloxide::types::BotCommand::new("limits", "Show or set alert thresholds"),
            teloxide::types::BotCommand::new("help", "Show help"),
        ])
        .await
    {
        tracing::warn!("Failed to set commands: {}", e);
    }

    tracing::info!("Telegram bot commands set");

    teloxide::repl(bot, move |msg: Message| {
        let ctx = ctx.clone();
        async move { handle_message(msg, ctx).await }
    })
    .await;

    Ok(())
}

/// Handle incoming messages.
async fn handle_message(msg: Message, ctx: BotContext) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let chat_id = msg.chat.id.0.to_string();

    if !text.starts_with('/') {
        ctx.notifier
            .queue(&chat_id, "Send /help to see what I can do.");
        return Ok(());
    }

    let mut parts = text.split_whitespace();
    let cmd = parts.next().unwrap_or("");
    let args: Vec<&str> = parts.collect();

    tracing::debug!("Command {} from chat {}", cmd, chat_id);

    match cmd {
        "/start" => cmd_start(&ctx, &chat_id),
        "/key" => cmd_key(&ctx, &chat_id),
        "/status" => cmd_status(&ctx, &chat_id),
        "/accounts" => cmd_accounts(&ctx, &chat_id),
        "/rename" => cmd_rename(&ctx, &chat_id, &args),
        "/cent" => cmd_cent(&ctx, &chat_id, args.first().copied()),
        "/delete" => cmd_delete(&ctx, &chat_id, args.first().copied()),
        "/limits" => cmd_limits(&ctx, &chat_id, &args),
        "/help" => ctx.notifier.queue(&chat_id, HELP_TEXT),
        _ => ctx
            .notifier
            .queue(&chat_id, "Unknown command. /help for available commands."),
    }

    Ok(())
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Fetch the user for a chat, pointing unregistered chats at /start.
fn require_user(ctx: &BotContext, chat_id: &str) -> Option<User> {
    match ctx.store.user_by_chat(chat_id) {
        Ok(Some(user)) => Some(user),
        Ok(None) => {
            ctx.notifier
                .queue(chat_id, "You are not registered yet. Send /start first.");
            None
        }
        Err(e) => {
            ctx.notifier.queue(chat_id, format!("Error: {}", e));
            None
        }
    }
}

fn cmd_start(ctx: &BotContext, chat_id: &str) {
    let user = match ctx.store.ensure_user(chat_id, now()) {
        Ok(user) => user,
        Err(e) => {
            ctx.notifier.queue(chat_id, format!("Error: {}", e));
            return;
        }
    };
    ctx.notifier.queue_html(
        chat_id,
        format!(
            "Welcome to FXPulse!\n\nYour API key:\n<code>{}</code>\n\nPoint the terminal monitor at POST {}/ingest with the X-API-KEY header. Accounts appear here after their first report.\n\n/help lists all commands.",
            user.api_key, ctx.ingest_url
        ),
    );
}

fn cmd_key(ctx: &BotContext, chat_id: &str) {
    let Some(user) = require_user(ctx, chat_id) else {
        return;
    };
    ctx.notifier.queue_html(
        chat_id,
        format!(
            "Your API key:\n<code>{}</code>\n\nDashboard: {}/web?key={}",
            user.api_key, ctx.ingest_url, user.api_key
        ),
    );
}

fn cmd_status(ctx: &BotContext, chat_id: &str) {
    let Some(user) = require_user(ctx, chat_id) else {
        return;
    };
    let statuses = match ctx.store.statuses_for_key(&user.api_key) {
        Ok(statuses) => statuses,
        Err(e) => {
            ctx.notifier.queue(chat_id, format!("Error: {}", e));
            return;
        }
    };
    if statuses.is_empty() {
        ctx.notifier.queue(
            chat_id,
            "No account data yet. Attach the monitor to your terminal.",
        );
        return;
    }
    ctx.notifier
        .queue_html(chat_id, format::render_statuses(&statuses));
}

fn cmd_accounts(ctx: &BotContext, chat_id: &str) {
    let Some(user) = require_user(ctx, chat_id) else {
        return;
    };
    let statuses = match ctx.store.statuses_for_key(&user.api_key) {
        Ok(statuses) => statuses,
        Err(e) => {
            ctx.notifier.queue(chat_id, format!("Error: {}", e));
            return;
        }
    };
    if statuses.is_empty() {
        ctx.notifier.queue(
            chat_id,
            "No accounts yet. They appear after the first report; /start shows the setup steps.",
        );
        return;
    }

    let cutoff = now() - ctx.stale_after_secs;
    let mut out = String::from("Your accounts:\n");
    for status in &statuses {
        let marker = match &status.snapshot {
            Some(snapshot) if snapshot.last_seen >= cutoff => "",
            _ => " ⚠️",
        };
        out.push_str(&format!(
            "• {} ({}){}\n",
            status.account.name, status.account.account_id, marker
        ));
    }
    out.push_str("\n⚠️ marks accounts without a recent report.");
    ctx.notifier.queue(chat_id, out);
}

fn cmd_rename(ctx: &BotContext, chat_id: &str, args: &[&str]) {
    let Some(user) = require_user(ctx, chat_id) else {
        return;
    };
    if args.len() < 2 {
        ctx.notifier
            .queue(chat_id, "Usage: /rename <account> <new name>");
        return;
    }
    let Ok(account_id) = args[0].parse::<i64>() else {
        ctx.notifier
            .queue(chat_id, "Usage: /rename <account> <new name>");
        return;
    };
    let name = args[1..].join(" ");
    match ctx.store.rename_account(&user.api_key, account_id, &name) {
        Ok(()) => ctx.notifier.queue(
            chat_id,
            format!("Renamed account {} to {}.", account_id, name),
        ),
        Err(Error::NotFound(_)) => ctx
            .notifier
            .queue(chat_id, format!("Account {} not found.", account_id)),
        Err(e) => ctx.notifier.queue(chat_id, format!("Error: {}", e)),
    }
}

fn cmd_cent(ctx: &BotContext, chat_id: &str, arg: Option<&str>) {
    let Some(user) = require_user(ctx, chat_id) else {
        return;
    };
    let Some(account_id) = arg.and_then(|a| a.parse::<i64>().ok()) else {
        ctx.notifier.queue(chat_id, "Usage: /cent <account>");
        return;
    };
    match ctx.store.toggle_cent(&user.api_key, account_id) {
        Ok(true) => ctx.notifier.queue(
            chat_id,
            format!(
                "Account {} is now a cent account. Dashboard values are scaled by 0.01.",
                account_id
            ),
        ),
        Ok(false) => ctx.notifier.queue(
            chat_id,
            format!("Account {} is now a standard account.", account_id),
        ),
        Err(Error::NotFound(_)) => ctx
            .notifier
            .queue(chat_id, format!("Account {} not found.", account_id)),
        Err(e) => ctx.notifier.queue(chat_id, format!("Error: {}", e)),
    }
}

fn cmd_delete(ctx: &BotContext, chat_id: &str, arg: Option<&str>) {
    let Some(user) = require_user(ctx, chat_id) else {
        return;
    };
    let Some(account_id) = arg.and_then(|a| a.parse::<i64>().ok()) else {
        ctx.notifier.queue(chat_id, "Usage: /delete <account>");
        return;
    };
    match ctx.store.delete_account(&user.api_key, account_id) {
        Ok(()) => ctx.notifier.queue(
            chat_id,
            format!("Deleted account {} and its reports.", account_id),
        ),
        Err(Error::NotFound(_)) => ctx
            .notifier
            .queue(chat_id, format!("Account {} not found.", account_id)),
        Err(e) => ctx.notifier.queue(chat_id, format!("Error: {}", e)),
    }
}

fn cmd_limits(ctx: &BotContext, chat_id: &str, args: &[&str]) {
    let Some(user) = require_user(ctx, chat_id) else {
        return;
    };

    if args.is_empty() {
        ctx.notifier.queue(
            chat_id,
            format!(
                "{}\n\n{}",
                format::render_limits(&user.limits),
                LIMITS_USAGE
            ),
        );
        return;
    }
    if args.len() != 4 {
        ctx.notifier.queue(chat_id, LIMITS_USAGE);
        return;
    }

    let current = &user.limits;
    let parsed = parse_limit(args[0], current.min_equity)
        .and_then(|min_equity| {
            parse_limit(args[1], current.min_margin_level).map(|m| (min_equity, m))
        })
        .and_then(|(min_equity, min_margin_level)| {
            parse_limit(args[2], current.max_daily_loss)
                .map(|l| (min_equity, min_margin_level, l))
        })
        .and_then(|(min_equity, min_margin_level, max_daily_loss)| {
            parse_limit(args[3], current.max_drawdown_percent)
                .map(|d| (min_equity, min_margin_level, max_daily_loss, d))
        });

    let (min_equity, min_margin_level, max_daily_loss, max_drawdown_percent) = match parsed {
        Ok(values) => values,
        Err(reason) => {
            ctx.notifier
                .queue(chat_id, format!("{}\n{}", reason, LIMITS_USAGE));
            return;
        }
    };

    let limits = Limits {
        min_equity,
        min_margin_level,
        max_daily_loss,
        max_drawdown_percent,
    };
    match ctx.store.set_limits(chat_id, &limits) {
        Ok(()) => ctx.notifier.queue(
            chat_id,
            format!("Thresholds updated.\n\n{}", format::render_limits(&limits)),
        ),
        Err(e) => ctx.notifier.queue(chat_id, format!("Error: {}", e)),
    }
}

/// One threshold argument: a number sets it, "-" keeps the current value,
/// "off" clears it.
fn parse_limit(arg: &str, current: Option<f64>) -> Result<Option<f64>, String> {
    match arg {
        "-" => Ok(current),
        "off" => Ok(None),
        value => value
            .parse::<f64>()
            .map(Some)
            .map_err(|_| format!("Not a number: {}", value)),
    }
}

const LIMITS_USAGE: &str = "Usage: /limits <min equity> <min margin %> <max daily loss> <max drawdown %>\nNumbers set a threshold, '-' keeps the current one, 'off' clears it.";

const HELP_TEXT: &str = r#"FXPulse Commands:

/start - Register and get your API key
/key - Show your API key and dashboard link
/status - Full status of all accounts
/accounts - List registered accounts
/rename <account> <name> - Rename an account
/cent <account> - Toggle cent account scaling
/delete <account> - Remove an account and its data
/limits - Show or set alert thresholds
/help - Show this help

Reports:
- The terminal monitor posts to /ingest with your X-API-KEY
- The dashboard lives at /web?key=<your key>
- Alerts fire when a threshold is crossed or an account goes quiet
"#;
