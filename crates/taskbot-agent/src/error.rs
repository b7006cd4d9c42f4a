//! Error types for the agent crate.

use thiserror::Error;

/// Errors that can occur while talking to the model or the spreadsheet.
///
/// Validation problems with tool arguments are not errors: they are reported
/// as failed [`ToolResult`](crate::tool::ToolResult)s.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Model invocation failed.
    #[error("model invocation failed: {0}")]
    ModelInvocation(String),

    /// A turn did not complete in time.
    #[error("model turn timed out after {0} seconds")]
    Timeout(u64),

    /// Response parsing failed.
    #[error("failed to parse response: {0}")]
    ResponseParse(String),

    /// Spreadsheet backend rejected the request.
    #[error("sheets request failed: {0}")]
    Sheets(String),

    /// Audio transcription failed.
    #[error("transcription failed: {0}")]
    Transcription(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;
