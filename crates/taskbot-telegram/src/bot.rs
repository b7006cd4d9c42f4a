//! Main Telegram bot implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::prelude::*;
use teloxide::types::CallbackQuery;
use teloxide::update_listeners::webhooks;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use taskbot_core::Settings;

use crate::error::{Result, TelegramError};
use crate::handlers::{handle_callback, handle_command, handle_message, process_units, Command};
use crate::state::{create_shared_state, TelegramState};

/// How often idle albums are flushed.
const SWEEP_INTERVAL_MS: u64 = 1000;

/// Path Telegram delivers updates to in webhook mode.
const WEBHOOK_PATH: &str = "/webhook";

/// The Telegram bot.
pub struct TelegramBot {
    /// The teloxide bot instance.
    bot: Bot,
    /// Shared state across handlers.
    state: Arc<TelegramState>,
}

impl TelegramBot {
    /// Create a bot with production collaborators.
    pub fn new(settings: Settings) -> Result<Self> {
        let bot = Bot::new(settings.telegram_bot_token.clone());
        let state = create_shared_state(settings)?;
        Ok(Self { bot, state })
    }

    /// Create a TelegramBot with custom state.
    pub fn with_state(state: Arc<TelegramState>) -> Self {
        let bot = Bot::new(state.settings().telegram_bot_token.clone());
        Self { bot, state }
    }

    /// Get the bot's username.
    pub async fn get_me(&self) -> Result<String> {
        let me = self
            .bot
            .get_me()
            .await
            .map_err(|e| TelegramError::BotStartFailed(e.to_string()))?;
        Ok(me.username().to_string())
    }

    /// Start in webhook mode when a webhook URL is configured, polling otherwise.
    pub async fn start(&self) -> Result<()> {
        match self.state.settings().webhook_url.clone() {
            Some(url) => self.start_webhook(&url).await,
            None => self.start_polling().await,
        }
    }

    /// Start the bot in polling mode.
    pub async fn start_polling(&self) -> Result<()> {
        info!("Starting Telegram bot in polling mode...");
        self.spawn_sweeper();

        Dispatcher::builder(self.bot.clone(), build_handler(Arc::clone(&self.state)))
            .default_handler(|upd| async move {
                debug!(update_id = ?upd.id, "Unhandled update");
            })
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;

        Ok(())
    }

    /// Start the bot behind a webhook, serving `/health` on the same port.
    pub async fn start_webhook(&self, public_url: &str) -> Result<()> {
        let settings = self.state.settings();
        let addr = SocketAddr::from(([0, 0, 0, 0], settings.webhook_port));
        let url = webhook_url(public_url)?;
        info!(url = %url, port = settings.webhook_port, "Starting Telegram bot in webhook mode...");

        let mut options = webhooks::Options::new(addr, url);
        if let Some(secret) = settings.webhook_secret.clone() {
            options = options.secret_token(secret);
        } else {
            warn!("TELEGRAM_WEBHOOK_SECRET not set, webhook deliveries are not authenticated");
        }

        let (listener, stop_flag, router) = webhooks::axum_to_router(self.bot.clone(), options)
            .await
            .map_err(|e| TelegramError::WebhookFailed(e.to_string()))?;
        let app = router.route("/health", get(health));

        let tcp = tokio::net::TcpListener::bind(addr).await?;
        tokio::spawn(async move {
            if let Err(e) = axum::serve(tcp, app).with_graceful_shutdown(stop_flag).await {
                error!(error = %e, "Webhook server failed");
            }
        });

        self.spawn_sweeper();

        Dispatcher::builder(self.bot.clone(), build_handler(Arc::clone(&self.state)))
            .default_handler(|upd| async move {
                debug!(update_id = ?upd.id, "Unhandled update");
            })
            .enable_ctrlc_handler()
            .build()
            .dispatch_with_listener(
                listener,
                LoggingErrorHandler::with_custom_text("An error from the webhook listener"),
            )
            .await;

        Ok(())
    }

    fn spawn_sweeper(&self) {
        let bot = self.bot.clone();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            sweep_media_groups_loop(bot, state).await;
        });
    }
}

/// The public URL with the webhook path appended once.
pub fn webhook_url(public_url: &str) -> Result<url::Url> {
    let trimmed = public_url.trim_end_matches('/');
    let full = if trimmed.ends_with(WEBHOOK_PATH) {
        trimmed.to_string()
    } else {
        format!("{trimmed}{WEBHOOK_PATH}")
    };
    Ok(full.parse()?)
}

async fn health() -> &'static str {
    "ok"
}

fn build_handler(state: Arc<TelegramState>) -> UpdateHandler<teloxide::RequestError> {
    let state_for_commands = Arc::clone(&state);
    let state_for_messages = Arc::clone(&state);
    let state_for_callbacks = Arc::clone(&state);

    dptree::entry()
        .branch(
            Update::filter_callback_query().endpoint(move |bot: Bot, q: CallbackQuery| {
                let state = Arc::clone(&state_for_callbacks);
                async move { handle_callback(bot, q, state).await }
            }),
        )
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(move |bot: Bot, msg: Message, cmd: Command| {
                    let state = Arc::clone(&state_for_commands);
                    info!(chat_id = %msg.chat.id, "Command matched: {:?}", cmd);
                    async move { handle_command(bot, msg, cmd, state).await }
                }),
        )
        .branch(
            Update::filter_message()
                .filter(|msg: Message| !msg.text().is_some_and(|t| t.starts_with('/')))
                .endpoint(move |bot: Bot, msg: Message| {
                    let state = Arc::clone(&state_for_messages);
                    debug!(chat_id = %msg.chat.id, message_id = msg.id.0, "Message received");
                    async move { handle_message(bot, msg, state).await }
                }),
        )
}

/// Background task that flushes albums whose last part arrived a while ago.
async fn sweep_media_groups_loop(bot: Bot, state: Arc<TelegramState>) {
    let mut sweep_interval = interval(Duration::from_millis(SWEEP_INTERVAL_MS));

    loop {
        sweep_interval.tick().await;

        let now = state.clock().now();
        for units in state.media_groups().sweep(now).await {
            let bot = bot.clone();
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                if let Err(e) = process_units(&bot, &state, units).await {
                    warn!(error = %e, "Failed to process swept media group");
                }
            });
        }
    }
}
