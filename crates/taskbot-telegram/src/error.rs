//! Error types for the Telegram bot.

use thiserror::Error;

/// Errors that can occur in the Telegram bot.
#[derive(Debug, Error)]
pub enum TelegramError {
    /// Failed to start the bot.
    #[error("Failed to start bot: {0}")]
    BotStartFailed(String),

    /// Webhook setup failed.
    #[error("Failed to set up webhook: {0}")]
    WebhookFailed(String),

    /// A file could not be fetched from Telegram.
    #[error("Failed to download file: {0}")]
    DownloadFailed(String),

    /// Telegram API request error.
    #[error("Telegram API error: {0}")]
    Request(#[from] teloxide::RequestError),

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] taskbot_core::CoreError),

    /// Agent error.
    #[error(transparent)]
    Agent(#[from] taskbot_agent::AgentError),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for Telegram operations.
pub type Result<T> = std::result::Result<T, TelegramError>;

impl From<url::ParseError> for TelegramError {
    fn from(e: url::ParseError) -> Self {
        TelegramError::WebhookFailed(e.to_string())
    }
}
