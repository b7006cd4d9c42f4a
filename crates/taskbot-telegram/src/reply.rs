//! Outbound messages.

use taskbot_agent::split_confirm_marker;
use taskbot_core::render;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InlineKeyboardButton, InlineKeyboardMarkup, ParseMode};
use tracing::{info, warn};

use crate::error::Result;

/// Callback data of the confirmation keyboard buttons.
pub const CALLBACK_CANCEL: &str = "task_cancel";
pub const CALLBACK_NEW: &str = "task_new";
pub const CALLBACK_CONFIRM: &str = "confirm_yes";

/// Inline button presses the bot understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Cancel,
    NewTask,
    Confirm,
}

impl CallbackAction {
    pub fn parse(data: &str) -> Option<Self> {
        match data {
            CALLBACK_CANCEL => Some(Self::Cancel),
            CALLBACK_NEW => Some(Self::NewTask),
            CALLBACK_CONFIRM => Some(Self::Confirm),
            _ => None,
        }
    }
}

/// `Отмена` / `Новая задача` / `Отправить` in one row.
pub fn confirm_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("Отмена", CALLBACK_CANCEL),
        InlineKeyboardButton::callback("Новая задача", CALLBACK_NEW),
        InlineKeyboardButton::callback("Отправить", CALLBACK_CONFIRM),
    ]])
}

/// A reply ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundReply {
    /// Text as produced upstream, without the confirmation marker.
    pub plain: String,
    /// MarkdownV2 rendering of `plain`.
    pub markdown: String,
    /// Attach the confirmation keyboard.
    pub needs_confirmation: bool,
}

impl OutboundReply {
    pub fn prepare(text: &str) -> Self {
        let (plain, needs_confirmation) = split_confirm_marker(text);
        let markdown = render(&plain);
        Self {
            plain,
            markdown,
            needs_confirmation,
        }
    }
}

/// Send `text` as MarkdownV2, retrying as plain text if Telegram rejects it.
pub async fn send_reply(bot: &Bot, chat_id: ChatId, text: &str) -> Result<()> {
    let reply = OutboundReply::prepare(text);

    let mut request = bot
        .send_message(chat_id, &reply.markdown)
        .parse_mode(ParseMode::MarkdownV2);
    if reply.needs_confirmation {
        request = request.reply_markup(confirm_keyboard());
    }

    match request.await {
        Ok(_) => {
            info!(chat_id = %chat_id, confirm = reply.needs_confirmation, "Reply sent");
            Ok(())
        }
        Err(e) => {
            warn!(chat_id = %chat_id, error = %e, "MarkdownV2 rejected, sending plain text");
            let mut fallback = bot.send_message(chat_id, truncate_plain(&reply.plain));
            if reply.needs_confirmation {
                fallback = fallback.reply_markup(confirm_keyboard());
            }
            fallback.await?;
            Ok(())
        }
    }
}

/// Clip plain text to the Telegram message limit.
fn truncate_plain(text: &str) -> String {
    let limit = taskbot_core::TELEGRAM_TEXT_LIMIT;
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(limit - 1).collect();
    clipped.push('…');
    clipped
}
