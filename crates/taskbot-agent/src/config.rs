//! Orchestration settings.

use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use taskbot_core::Settings;

use crate::context::context_ttl;
use crate::directory::DirectorySource;
use crate::executor::ExecutorConfig;

/// Default model.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Model turns allowed per processed message.
pub const MAX_ITERATIONS: usize = 5;

/// Upper bound for one model turn.
pub const TURN_TIMEOUT: Duration = Duration::from_secs(120);

/// Settings for [`ConversationOrchestrator`](crate::ConversationOrchestrator).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub model: String,

    pub max_iterations: usize,

    pub turn_timeout: Duration,

    /// Chain follow-up turns of one message with `previous_response_id`
    /// instead of the conversation handle.
    ///
    /// Off by default: chaining tool-bearing turns is unreliable on some
    /// provider versions.
    pub chain_tool_turns: bool,

    /// Inactivity after which a conversation is replaced.
    pub context_ttl: chrono::Duration,

    pub max_output_tokens: Option<u32>,

    pub temperature: Option<f32>,

    /// IANA name shown to the model.
    pub timezone_name: String,

    /// Offset used to compute the current date.
    pub utc_offset: FixedOffset,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.into(),
            max_iterations: MAX_ITERATIONS,
            turn_timeout: TURN_TIMEOUT,
            chain_tool_turns: false,
            context_ttl: context_ttl(),
            max_output_tokens: Some(4000),
            temperature: Some(0.3),
            timezone_name: "Europe/Moscow".into(),
            utc_offset: FixedOffset::east_opt(3 * 3600).unwrap_or_else(|| Utc.fix()),
        }
    }
}

impl OrchestratorConfig {
    /// Take model and timezone settings from the environment settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            model: settings.openai_model.clone(),
            chain_tool_turns: settings.chain_tool_turns,
            timezone_name: settings.timezone_name.clone(),
            utc_offset: settings.utc_offset(),
            ..Self::default()
        }
    }
}

impl ExecutorConfig {
    /// Take spreadsheet settings from the environment settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            spreadsheet_id: settings.spreadsheet_id.clone(),
            range: settings.sheet_range.clone(),
            utc_offset: settings.utc_offset(),
        }
    }
}

impl DirectorySource {
    /// The executor directory sheet, when one is configured.
    pub fn from_settings(settings: &Settings) -> Option<Self> {
        settings
            .executors_spreadsheet_id
            .as_ref()
            .map(|id| Self {
                spreadsheet_id: id.clone(),
                range: settings.executors_range.clone(),
            })
    }
}
