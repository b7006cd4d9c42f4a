//! Update handlers for the Telegram bot.

use std::sync::Arc;

use taskbot_agent::UserRef;
use taskbot_core::{collect_file_ids, first_text, InboundUnit};
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, ChatAction, ChatId, User};
use teloxide::utils::command::BotCommands;
use tracing::{debug, info, warn};

use crate::files::{download, resolve_links};
use crate::reply::{send_reply, CallbackAction};
use crate::state::TelegramState;

/// Fed to the orchestrator when the user presses `Отправить`.
pub const CONFIRMATION_TEXT: &str = "Да, все верно. Отправляй задачу.";

const GREETING: &str = "Привет! Я помогу поставить задачу.\n\n\
    Опишите задачу текстом или голосом, при необходимости приложите фото или документы. \
    Я уточню недостающие детали, покажу карточку задачи и после подтверждения \
    занесу ее в таблицу.\n\n\
    /new - начать новую задачу\n/help - список команд";

const NOT_ALLOWED: &str = "Извините, у вас нет доступа к этому боту.";
const UNSUPPORTED: &str =
    "Извините, я поддерживаю только текстовые и голосовые сообщения, фото и документы.";
const CONVERSATION_RESET: &str = "Начнем заново. Опишите новую задачу.";
const TASK_CANCELLED: &str = "Задача отменена.";
const VOICE_FAILED: &str =
    "Произошла ошибка при обработке голосового сообщения. Попробуйте еще раз.";
const VOICE_EMPTY: &str = "Не удалось распознать текст из голосового сообщения.";

/// Bot commands that can be invoked with /.
#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase", description = "Доступные команды:")]
pub enum Command {
    #[command(description = "начать работу с ботом")]
    Start,

    #[command(description = "показать список команд")]
    Help,

    #[command(description = "начать новую задачу")]
    New,
}

/// `first last`, or just the first name.
pub fn display_name(user: &User) -> String {
    match &user.last_name {
        Some(last) => format!("{} {last}", user.first_name),
        None => user.first_name.clone(),
    }
}

/// Sender as the orchestrator sees it.
pub fn user_ref(user: &User) -> UserRef {
    UserRef::new(user.id.0 as i64).with_display_name(display_name(user))
}

/// Sender of a batch, taken from its first unit.
pub fn batch_sender(units: &[InboundUnit]) -> Option<UserRef> {
    let first = units.first()?;
    let user = UserRef::new(first.user_id);
    Some(match units.iter().find_map(|u| u.sender_name.as_deref()) {
        Some(name) => user.with_display_name(name),
        None => user,
    })
}

/// Flatten a message into an [`InboundUnit`]. Only the largest photo size is kept.
pub fn inbound_unit(msg: &Message) -> Option<InboundUnit> {
    let user = msg.from.as_ref()?;

    let mut file_ids = Vec::new();
    if let Some(largest) = msg.photo().and_then(|sizes| sizes.last()) {
        file_ids.push(largest.file.id.0.clone());
    }
    if let Some(doc) = msg.document() {
        file_ids.push(doc.file.id.0.clone());
    }

    Some(InboundUnit {
        message_id: msg.id.0,
        chat_id: msg.chat.id.0,
        user_id: user.id.0 as i64,
        text: msg.text().or_else(|| msg.caption()).map(str::to_string),
        file_ids,
        voice_file_id: msg.voice().map(|v| v.file.id.0.clone()),
        media_group_id: msg.media_group_id().map(|id| id.0.clone()),
        sender_name: Some(display_name(user)),
    })
}

/// Text for the orchestrator: the first written text, followed by the voice transcript.
///
/// `None` when the units carry nothing to process.
pub fn compose_text(units: &[InboundUnit], transcript: Option<&str>) -> Option<String> {
    let transcript = transcript.map(str::trim).filter(|t| !t.is_empty());
    let text = match (transcript, first_text(units)) {
        (Some(spoken), Some(written)) => Some(format!("{written}\n\n{spoken}")),
        (Some(spoken), None) => Some(spoken.to_string()),
        (None, written) => written,
    };
    match text {
        Some(text) => Some(text),
        None if units.iter().any(|u| !u.file_ids.is_empty()) => Some(String::new()),
        None => None,
    }
}

/// Handle the /start command.
pub async fn handle_start(bot: Bot, msg: Message, state: Arc<TelegramState>) -> ResponseResult<()> {
    if let Some(user) = msg.from.as_ref() {
        state.reset_conversation(user.id.0 as i64).await;
    }
    bot.send_message(msg.chat.id, GREETING).await?;
    info!(chat_id = %msg.chat.id, user = ?msg.from.as_ref().map(|u| &u.username), "User started bot");
    Ok(())
}

/// Handle the /help command.
pub async fn handle_help(bot: Bot, msg: Message) -> ResponseResult<()> {
    bot.send_message(msg.chat.id, Command::descriptions().to_string())
        .await?;
    Ok(())
}

/// Handle the /new command.
pub async fn handle_new(bot: Bot, msg: Message, state: Arc<TelegramState>) -> ResponseResult<()> {
    if let Some(user) = msg.from.as_ref() {
        state.reset_conversation(user.id.0 as i64).await;
        info!(chat_id = %msg.chat.id, user_id = user.id.0, "Conversation reset by command");
    }
    bot.send_message(msg.chat.id, CONVERSATION_RESET).await?;
    Ok(())
}

pub async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    state: Arc<TelegramState>,
) -> ResponseResult<()> {
    if !admit(&bot, &msg, &state).await? {
        return Ok(());
    }
    match cmd {
        Command::Start => handle_start(bot, msg, state).await,
        Command::Help => handle_help(bot, msg).await,
        Command::New => handle_new(bot, msg, state).await,
    }
}

/// Handle a non-command message.
pub async fn handle_message(bot: Bot, msg: Message, state: Arc<TelegramState>) -> ResponseResult<()> {
    if !admit(&bot, &msg, &state).await? {
        return Ok(());
    }

    let Some(unit) = inbound_unit(&msg) else {
        return Ok(());
    };
    if unit.trimmed_text().is_none() && unit.file_ids.is_empty() && unit.voice_file_id.is_none() {
        debug!(chat_id = %msg.chat.id, "Unsupported message kind");
        bot.send_message(msg.chat.id, UNSUPPORTED).await?;
        return Ok(());
    }

    if unit.media_group_id.is_some() {
        match state.media_groups().add(unit).await {
            Some(units) => process_units(&bot, &state, units).await?,
            None => debug!(chat_id = %msg.chat.id, "Album part buffered"),
        }
        return Ok(());
    }

    process_units(&bot, &state, vec![unit]).await
}

/// Handle an inline keyboard press.
pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<TelegramState>,
) -> ResponseResult<()> {
    let user_id = q.from.id.0 as i64;
    if !state.is_user_allowed(user_id) {
        warn!(user_id, "Callback from user not allowed");
        bot.answer_callback_query(q.id.clone()).text(NOT_ALLOWED).await?;
        return Ok(());
    }

    let Some(action) = q.data.as_deref().and_then(CallbackAction::parse) else {
        debug!(data = ?q.data, "Ignoring unknown callback");
        bot.answer_callback_query(q.id.clone()).await?;
        return Ok(());
    };
    bot.answer_callback_query(q.id.clone()).await?;

    let Some(message) = q.message.as_ref() else {
        return Ok(());
    };
    let chat_id = message.chat().id;

    // The card is answered either way, so the buttons go.
    if let Err(e) = bot.edit_message_reply_markup(chat_id, message.id()).await {
        warn!(chat_id = %chat_id, error = %e, "Failed to remove keyboard");
    }

    info!(chat_id = %chat_id, user_id, action = ?action, "Callback received");
    match action {
        CallbackAction::Cancel => {
            state.reset_conversation(user_id).await;
            bot.send_message(chat_id, TASK_CANCELLED).await?;
        }
        CallbackAction::NewTask => {
            state.reset_conversation(user_id).await;
            bot.send_message(chat_id, CONVERSATION_RESET).await?;
        }
        CallbackAction::Confirm => {
            bot.send_chat_action(chat_id, ChatAction::Typing).await?;
            let reply = state.process(CONFIRMATION_TEXT, &[], &user_ref(&q.from)).await;
            deliver(&bot, chat_id, &reply).await?;
        }
    }
    Ok(())
}

/// Process one logical message: transcribe, link attachments, ask the orchestrator, reply.
pub async fn process_units(
    bot: &Bot,
    state: &TelegramState,
    units: Vec<InboundUnit>,
) -> ResponseResult<()> {
    let (Some(first), Some(user)) = (units.first(), batch_sender(&units)) else {
        return Ok(());
    };
    let chat_id = ChatId(first.chat_id);

    bot.send_chat_action(chat_id, ChatAction::Typing).await?;

    let transcript = match units.iter().find_map(|u| u.voice_file_id.as_deref()) {
        Some(voice_id) => match transcribe(bot, state, voice_id).await {
            Some(text) if !text.trim().is_empty() => Some(text),
            Some(_) => {
                bot.send_message(chat_id, VOICE_EMPTY).await?;
                return Ok(());
            }
            None => {
                bot.send_message(chat_id, VOICE_FAILED).await?;
                return Ok(());
            }
        },
        None => None,
    };

    let Some(text) = compose_text(&units, transcript.as_deref()) else {
        bot.send_message(chat_id, UNSUPPORTED).await?;
        return Ok(());
    };

    let links = resolve_links(bot, state.files(), &collect_file_ids(&units)).await;

    info!(
        chat_id = %chat_id,
        user_id = user.id,
        parts = units.len(),
        attachments = links.len(),
        voice = transcript.is_some(),
        "Processing message"
    );

    let reply = state.process(&text, &links, &user).await;
    deliver(bot, chat_id, &reply).await
}

async fn transcribe(bot: &Bot, state: &TelegramState, voice_id: &str) -> Option<String> {
    let audio = match download(bot, voice_id).await {
        Ok((bytes, _)) => bytes,
        Err(e) => {
            warn!(file_id = %voice_id, error = %e, "Failed to download voice note");
            return None;
        }
    };
    match state.transcribe(audio).await {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(file_id = %voice_id, error = %e, "Transcription failed");
            None
        }
    }
}

async fn deliver(bot: &Bot, chat_id: ChatId, text: &str) -> ResponseResult<()> {
    if let Err(e) = send_reply(bot, chat_id, text).await {
        warn!(chat_id = %chat_id, error = %e, "Failed to send reply");
    }
    Ok(())
}

/// Private chats with allowed users only.
async fn admit(bot: &Bot, msg: &Message, state: &TelegramState) -> ResponseResult<bool> {
    if !msg.chat.is_private() {
        debug!(chat_id = %msg.chat.id, "Ignoring non-private chat");
        return Ok(false);
    }
    let Some(user) = msg.from.as_ref() else {
        return Ok(false);
    };
    if !state.is_user_allowed(user.id.0 as i64) {
        warn!(chat_id = %msg.chat.id, user_id = user.id.0, "Message from user not allowed");
        bot.send_message(msg.chat.id, NOT_ALLOWED).await?;
        return Ok(false);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(text: Option<&str>, files: &[&str]) -> InboundUnit {
        InboundUnit {
            message_id: 1,
            chat_id: 10,
            user_id: 20,
            text: text.map(str::to_string),
            file_ids: files.iter().map(|f| f.to_string()).collect(),
            voice_file_id: None,
            media_group_id: None,
            sender_name: None,
        }
    }

    #[test]
    fn test_compose_text() {
        assert_eq!(
            compose_text(&[unit(Some("Отчет"), &[])], None).as_deref(),
            Some("Отчет")
        );
        assert_eq!(
            compose_text(&[unit(None, &[])], Some(" Голосом ")).as_deref(),
            Some("Голосом")
        );
        assert_eq!(
            compose_text(&[unit(Some("Подпись"), &[])], Some("Голосом")).as_deref(),
            Some("Подпись\n\nГолосом")
        );
        assert_eq!(compose_text(&[unit(None, &["f1"])], None).as_deref(), Some(""));
        assert_eq!(compose_text(&[unit(Some("  "), &[])], Some("")), None);
    }

    #[test]
    fn test_batch_sender_keeps_display_name() {
        let mut caption = unit(Some("Отчет"), &["f1"]);
        caption.sender_name = Some("Иван Петров".into());
        let batch = vec![unit(None, &["f0"]), caption];

        let sender = batch_sender(&batch).unwrap();
        assert_eq!(sender.id, 20);
        assert_eq!(sender.display_name.as_deref(), Some("Иван Петров"));

        assert_eq!(batch_sender(&[unit(None, &[])]).unwrap().display_name, None);
        assert!(batch_sender(&[]).is_none());
    }

    #[test]
    fn test_commands_parse() {
        assert!(matches!(Command::parse("/new", "taskbot"), Ok(Command::New)));
        assert!(matches!(Command::parse("/start", "taskbot"), Ok(Command::Start)));
        assert!(Command::parse("/connect x", "taskbot").is_err());
    }
}
