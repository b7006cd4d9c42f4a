//! Telegram bot interface for Taskbot.
//!
//! Employees describe a task in a private chat (text, voice, photos or
//! documents). The bot collects the details through the agent loop, shows a
//! task card with confirmation buttons, and appends the confirmed task to a
//! Google Sheets table.
//!
//! # Environment Variables
//!
//! Required:
//! - `TELEGRAM_BOT_TOKEN`: Bot token from @BotFather
//! - `OPENAI_API_KEY`: Model and transcription access
//!
//! Optional:
//! - `GOOGLE_SHEETS_SPREADSHEET_ID`, `GOOGLE_SHEETS_ACCESS_TOKEN`: Task table
//! - `TASKBOT_PUBLIC_FILES_URL`: Base URL attachments are served from
//! - `TELEGRAM_WEBHOOK_URL`: Run behind a webhook instead of polling
//!
//! # Commands
//!
//! - `/start` - Welcome message
//! - `/help` - Show available commands
//! - `/new` - Drop the current conversation and start a new task

pub mod bot;
pub mod error;
pub mod files;
pub mod handlers;
pub mod reply;
pub mod state;

pub use bot::TelegramBot;
pub use error::{Result, TelegramError};
pub use files::PublicFiles;
pub use reply::{confirm_keyboard, CallbackAction, OutboundReply};
pub use state::{create_shared_state, TelegramState};
