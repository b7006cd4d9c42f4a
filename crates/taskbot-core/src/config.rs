//! Shared configuration for Taskbot.
//!
//! Provides functions to locate Taskbot's state directory and the
//! environment-driven [`Settings`] used by every interface.
//!
//! # Storage Structure
//!
//! ```text
//! ~/.taskbot/
//! ├── config/       # .env.local with secrets
//! └── public/       # Downloaded attachments served by the web server
//! ```
//!
//! # Environment Variables
//!
//! - `TASKBOT_STATE_DIR`: Override the base state directory
//! - `TELEGRAM_BOT_TOKEN`, `OPENAI_API_KEY`: required secrets
//! - see [`Settings`] for the rest

use std::path::PathBuf;
use std::sync::OnceLock;

use chrono::{FixedOffset, Offset, Utc};
use tracing::debug;

use crate::error::{CoreError, Result};

/// Environment variable for custom state directory.
pub const STATE_DIR_ENV: &str = "TASKBOT_STATE_DIR";

/// Default state directory name under home.
const DEFAULT_STATE_DIR: &str = ".taskbot";

const CONFIG_SUBDIR: &str = "config";
const PUBLIC_SUBDIR: &str = "public";

const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_RANGE: &str = "A:Z";
const DEFAULT_EXECUTORS_RANGE: &str = "A:H";
const DEFAULT_TIMEZONE: &str = "Europe/Moscow";
const DEFAULT_UTC_OFFSET_HOURS: i32 = 3;
const DEFAULT_WEBHOOK_PORT: u16 = 8443;

static STATE_DIR_CACHE: OnceLock<PathBuf> = OnceLock::new();

/// Get the Taskbot state directory.
///
/// 1. `TASKBOT_STATE_DIR` environment variable if set
/// 2. `~/.taskbot` if home directory is available
/// 3. `.taskbot` in current directory as fallback
pub fn state_dir() -> PathBuf {
    STATE_DIR_CACHE
        .get_or_init(|| {
            std::env::var(STATE_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    dirs::home_dir()
                        .map(|h| h.join(DEFAULT_STATE_DIR))
                        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR))
                })
        })
        .clone()
}

/// Get the user config directory.
pub fn config_dir() -> PathBuf {
    state_dir().join(CONFIG_SUBDIR)
}

/// Default directory for downloaded attachments.
pub fn public_files_dir() -> PathBuf {
    state_dir().join(PUBLIC_SUBDIR)
}

/// Get the .env.local file path.
pub fn env_file() -> PathBuf {
    config_dir().join(".env.local")
}

/// Ensure the state directory and all subdirectories exist.
///
/// # Errors
/// Returns an error if any directory cannot be created.
pub fn ensure_all_dirs() -> std::io::Result<()> {
    std::fs::create_dir_all(config_dir())?;
    std::fs::create_dir_all(public_files_dir())?;
    Ok(())
}

/// Load environment files: the config dir first, then `.env.local` or `.env`.
///
/// Variables already set in the process environment win.
pub fn load_env() {
    let env_path = env_file();
    if env_path.exists() {
        let _ = dotenvy::from_path(&env_path);
    }
    let _ = dotenvy::from_filename(".env.local").or_else(|_| dotenvy::dotenv());
}

/// Runtime settings for the bot, resolved from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Bot token from @BotFather (`TELEGRAM_BOT_TOKEN`).
    pub telegram_bot_token: String,
    /// OpenAI API key (`OPENAI_API_KEY`).
    pub openai_api_key: String,
    /// Model used for task extraction (`OPENAI_MODEL`).
    pub openai_model: String,
    /// Target spreadsheet (`GOOGLE_SHEETS_SPREADSHEET_ID`).
    pub spreadsheet_id: Option<String>,
    /// Append range (`GOOGLE_SHEETS_DEFAULT_RANGE`).
    pub sheet_range: String,
    /// Pre-issued OAuth access token (`GOOGLE_SHEETS_ACCESS_TOKEN`).
    pub sheets_access_token: Option<String>,
    /// Fallback executor codes (`TASKBOT_EXECUTORS`, comma separated).
    pub executors: Vec<String>,
    /// Spreadsheet holding the executor directory (`TASKBOT_EXECUTORS_SPREADSHEET_ID`).
    pub executors_spreadsheet_id: Option<String>,
    /// Range of the executor directory (`TASKBOT_EXECUTORS_RANGE`).
    pub executors_range: String,
    /// Display name of the user timezone (`TASKBOT_TIMEZONE`).
    pub timezone_name: String,
    /// Offset of the user timezone in hours (`TASKBOT_UTC_OFFSET_HOURS`).
    pub utc_offset_hours: i32,
    /// Send `previous_response_id` on tool-bearing turns (`TASKBOT_CHAIN_TOOL_TURNS`).
    pub chain_tool_turns: bool,
    /// Telegram user ids allowed to use the bot; empty allows everyone (`TASKBOT_ALLOWED_USERS`).
    pub allowed_users: Vec<i64>,
    /// Where attachments are stored (`TASKBOT_PUBLIC_FILES_DIR`).
    pub public_files_dir: PathBuf,
    /// Public base URL of `public_files_dir` (`TASKBOT_PUBLIC_FILES_URL`).
    pub public_files_url: Option<String>,
    /// Public webhook URL (`TELEGRAM_WEBHOOK_URL`).
    pub webhook_url: Option<String>,
    /// Secret token checked on webhook deliveries (`TELEGRAM_WEBHOOK_SECRET`).
    pub webhook_secret: Option<String>,
    /// Local webhook port (`TELEGRAM_WEBHOOK_PORT`).
    pub webhook_port: u16,
}

impl Settings {
    /// Resolve settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve settings through an arbitrary lookup (used by tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let telegram_bot_token =
            get("TELEGRAM_BOT_TOKEN").ok_or(CoreError::MissingSetting("TELEGRAM_BOT_TOKEN"))?;
        let openai_api_key =
            get("OPENAI_API_KEY").ok_or(CoreError::MissingSetting("OPENAI_API_KEY"))?;

        let utc_offset_hours = match get("TASKBOT_UTC_OFFSET_HOURS") {
            Some(raw) => raw
                .parse::<i32>()
                .ok()
                .filter(|h| (-12..=14).contains(h))
                .ok_or(CoreError::InvalidSetting {
                    name: "TASKBOT_UTC_OFFSET_HOURS",
                    value: raw,
                })?,
            None => DEFAULT_UTC_OFFSET_HOURS,
        };

        let webhook_port = match get("TELEGRAM_WEBHOOK_PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|_| CoreError::InvalidSetting {
                name: "TELEGRAM_WEBHOOK_PORT",
                value: raw,
            })?,
            None => DEFAULT_WEBHOOK_PORT,
        };

        let allowed_users = match get("TASKBOT_ALLOWED_USERS") {
            Some(raw) => split_list(&raw)
                .into_iter()
                .map(|id| {
                    id.parse::<i64>().map_err(|_| CoreError::InvalidSetting {
                        name: "TASKBOT_ALLOWED_USERS",
                        value: id.clone(),
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        let settings = Self {
            telegram_bot_token,
            openai_api_key,
            openai_model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            spreadsheet_id: get("GOOGLE_SHEETS_SPREADSHEET_ID"),
            sheet_range: get("GOOGLE_SHEETS_DEFAULT_RANGE")
                .unwrap_or_else(|| DEFAULT_RANGE.to_string()),
            sheets_access_token: get("GOOGLE_SHEETS_ACCESS_TOKEN"),
            executors: get("TASKBOT_EXECUTORS")
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
            executors_spreadsheet_id: get("TASKBOT_EXECUTORS_SPREADSHEET_ID"),
            executors_range: get("TASKBOT_EXECUTORS_RANGE")
                .unwrap_or_else(|| DEFAULT_EXECUTORS_RANGE.to_string()),
            timezone_name: get("TASKBOT_TIMEZONE").unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()),
            utc_offset_hours,
            chain_tool_turns: get("TASKBOT_CHAIN_TOOL_TURNS")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(false),
            allowed_users,
            public_files_dir: get("TASKBOT_PUBLIC_FILES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(public_files_dir),
            public_files_url: get("TASKBOT_PUBLIC_FILES_URL")
                .map(|u| u.trim_end_matches('/').to_string()),
            webhook_url: get("TELEGRAM_WEBHOOK_URL"),
            webhook_secret: get("TELEGRAM_WEBHOOK_SECRET"),
            webhook_port,
        };

        debug!(
            model = %settings.openai_model,
            executors = settings.executors.len(),
            chain_tool_turns = settings.chain_tool_turns,
            "Settings resolved"
        );

        Ok(settings)
    }

    /// The user timezone as a fixed offset.
    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix())
    }

    /// Whether a Telegram user may use the bot.
    pub fn is_user_allowed(&self, user_id: i64) -> bool {
        self.allowed_users.is_empty() || self.allowed_users.contains(&user_id)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![("TELEGRAM_BOT_TOKEN", "123:abc"), ("OPENAI_API_KEY", "sk-test")]
    }

    #[test]
    fn test_state_dir_name() {
        let dir = state_dir();
        assert!(dir.is_absolute() || dir.ends_with(".taskbot"));
    }

    #[test]
    fn test_env_file_name() {
        assert!(env_file().ends_with(".env.local"));
        assert!(config_dir().ends_with("config"));
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_lookup(lookup(&required())).unwrap();
        assert_eq!(settings.openai_model, "gpt-4o");
        assert_eq!(settings.sheet_range, "A:Z");
        assert_eq!(settings.timezone_name, "Europe/Moscow");
        assert_eq!(settings.utc_offset().local_minus_utc(), 3 * 3600);
        assert!(!settings.chain_tool_turns);
        assert!(settings.executors.is_empty());
        assert!(settings.executors_spreadsheet_id.is_none());
        assert_eq!(settings.executors_range, "A:H");
        assert!(settings.spreadsheet_id.is_none());
        assert_eq!(settings.webhook_port, 8443);
        assert!(settings.is_user_allowed(42));
    }

    #[test]
    fn test_missing_token() {
        let err = Settings::from_lookup(lookup(&[("OPENAI_API_KEY", "sk")])).unwrap_err();
        assert!(matches!(err, CoreError::MissingSetting("TELEGRAM_BOT_TOKEN")));
    }

    #[test]
    fn test_blank_values_are_missing() {
        let err = Settings::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("OPENAI_API_KEY", "   "),
        ]))
        .unwrap_err();
        assert!(matches!(err, CoreError::MissingSetting("OPENAI_API_KEY")));
    }

    #[test]
    fn test_lists_and_flags() {
        let mut pairs = required();
        pairs.push(("TASKBOT_EXECUTORS", "ИТ ВУ, РОП ДА ,,ФД ДТ"));
        pairs.push(("TASKBOT_ALLOWED_USERS", "1, 2"));
        pairs.push(("TASKBOT_CHAIN_TOOL_TURNS", "true"));
        pairs.push(("TASKBOT_PUBLIC_FILES_URL", "https://files.example.com/"));

        let settings = Settings::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(settings.executors, vec!["ИТ ВУ", "РОП ДА", "ФД ДТ"]);
        assert_eq!(settings.allowed_users, vec![1, 2]);
        assert!(settings.chain_tool_turns);
        assert!(settings.is_user_allowed(2));
        assert!(!settings.is_user_allowed(3));
        assert_eq!(
            settings.public_files_url.as_deref(),
            Some("https://files.example.com")
        );
    }

    #[test]
    fn test_invalid_offset() {
        let mut pairs = required();
        pairs.push(("TASKBOT_UTC_OFFSET_HOURS", "99"));
        let err = Settings::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidSetting { .. }));
    }
}
