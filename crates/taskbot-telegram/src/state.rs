//! Shared state for the Telegram bot.

use std::sync::Arc;

use taskbot_agent::{
    ConversationOrchestrator, DirectorySource, Executor, ExecutorConfig, ExecutorDirectory,
    InMemoryContextStore, OpenAiClient, OrchestratorConfig, SheetsClient, StaticTokenProvider,
    ToolExecutor, UserRef,
};
use taskbot_core::{Clock, MediaGroupBuffer, Settings, SystemClock};
use tracing::{info, warn};

use crate::error::Result;
use crate::files::PublicFiles;

/// Language hint for voice transcription.
pub const TRANSCRIPTION_LANGUAGE: &str = "ru";

/// Everything handlers need, shared across updates.
pub struct TelegramState {
    settings: Settings,
    orchestrator: ConversationOrchestrator,
    directory: Arc<ExecutorDirectory>,
    media_groups: MediaGroupBuffer,
    files: Option<PublicFiles>,
    openai: OpenAiClient,
    clock: Arc<dyn Clock>,
}

impl TelegramState {
    /// Wire production collaborators from settings.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let openai = OpenAiClient::new(settings.openai_api_key.clone())?;

        if settings.spreadsheet_id.is_none() {
            warn!("GOOGLE_SHEETS_SPREADSHEET_ID not set, tasks cannot be saved");
        }
        let token = settings.sheets_access_token.clone().unwrap_or_else(|| {
            warn!("GOOGLE_SHEETS_ACCESS_TOKEN not set, Sheets appends will fail");
            String::new()
        });
        let sheets = Arc::new(SheetsClient::new(Arc::new(StaticTokenProvider::new(token)))?);
        let executor = ToolExecutor::new(
            sheets.clone(),
            ExecutorConfig::from_settings(&settings),
            clock.clone(),
        );

        let directory = Arc::new(match DirectorySource::from_settings(&settings) {
            Some(source) => {
                info!(spreadsheet_id = %source.spreadsheet_id, "Executor directory read from sheet");
                ExecutorDirectory::from_sheet(sheets, source, settings.executors.clone(), clock.clone())
            }
            None => {
                if settings.executors.is_empty() {
                    warn!("Neither TASKBOT_EXECUTORS_SPREADSHEET_ID nor TASKBOT_EXECUTORS set, executors are unrestricted");
                }
                ExecutorDirectory::fixed(settings.executors.clone(), clock.clone())
            }
        });

        let orchestrator = ConversationOrchestrator::new(
            Arc::new(openai.clone()),
            executor,
            directory.clone(),
            Arc::new(InMemoryContextStore::new(clock.clone())),
            clock.clone(),
            OrchestratorConfig::from_settings(&settings),
        );

        Ok(Self::new(settings, orchestrator, directory, openai, clock))
    }

    pub fn new(
        settings: Settings,
        orchestrator: ConversationOrchestrator,
        directory: Arc<ExecutorDirectory>,
        openai: OpenAiClient,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let files = PublicFiles::from_settings(&settings);
        match &files {
            Some(files) => info!(dir = %files.dir().display(), "Public file storage enabled"),
            None => warn!("TASKBOT_PUBLIC_FILES_URL not set, attachments will not be linked"),
        }
        Self {
            media_groups: MediaGroupBuffer::new(clock.clone()),
            settings,
            orchestrator,
            directory,
            files,
            openai,
            clock,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn media_groups(&self) -> &MediaGroupBuffer {
        &self.media_groups
    }

    pub fn files(&self) -> Option<&PublicFiles> {
        self.files.as_ref()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Whether the user may talk to the bot.
    pub fn is_user_allowed(&self, user_id: i64) -> bool {
        self.settings.is_user_allowed(user_id)
    }

    /// Run a message through the orchestrator.
    pub async fn process(&self, text: &str, attachments: &[String], user: &UserRef) -> String {
        self.orchestrator.process(text, attachments, user).await
    }

    /// Forget the user's conversation.
    pub async fn reset_conversation(&self, user_id: i64) {
        self.orchestrator.reset(user_id).await;
    }

    /// Re-read the executor directory, bypassing the cache.
    pub async fn refresh_executors(&self) -> Result<Vec<Executor>> {
        Ok(self.directory.refresh().await?)
    }

    /// Transcribe a voice note.
    pub async fn transcribe(&self, audio: Vec<u8>) -> Result<String> {
        Ok(self
            .openai
            .transcribe(audio, "voice_message.ogg", Some(TRANSCRIPTION_LANGUAGE))
            .await?)
    }
}

/// Build the shared state from settings.
pub fn create_shared_state(settings: Settings) -> Result<Arc<TelegramState>> {
    Ok(Arc::new(TelegramState::from_settings(settings)?))
}
