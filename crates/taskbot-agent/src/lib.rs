//! Taskbot Agent - turns chat messages into task rows.
//!
//! A message goes through [`ConversationOrchestrator`], which runs a bounded
//! loop of model turns inside the user's provider-side conversation. The
//! model may request the `add_row_to_sheets` tool, executed by
//! [`ToolExecutor`] against a [`RowAppender`] (Google Sheets in production).
//! Valid executors come from an [`ExecutorDirectory`].

pub mod catalog;
pub mod client;
pub mod config;
pub mod context;
pub mod directory;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod prompt;
pub mod response;
pub mod sheets;
pub mod tool;

pub use catalog::{ToolCatalog, ADD_ROW_TOOL};
pub use client::{LlmClient, OpenAiClient, TurnRequest, TurnResponse, TurnStatus};
pub use config::OrchestratorConfig;
pub use context::{ContextStore, ConversationContext, InMemoryContextStore};
pub use directory::{DirectorySource, Executor, ExecutorDirectory};
pub use error::{AgentError, Result};
pub use executor::{ExecutorConfig, ToolExecutor, TASK_CREATED_ACK};
pub use orchestrator::{ConversationOrchestrator, UserRef, APOLOGY, DEGRADED_NOTE};
pub use prompt::PromptBuilder;
pub use response::{parse_reply, split_confirm_marker, ParsedReply, CONFIRM_MARKER};
pub use sheets::{RowAppender, SheetsClient, StaticTokenProvider, TokenProvider, ValuesReader};
pub use tool::{ToolCall, ToolDefinition, ToolResult};
