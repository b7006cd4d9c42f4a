//! LLM client abstraction and the OpenAI Responses API implementation.
//!
//! The orchestrator only needs "create a turn from instructions, input and a
//! tool catalog"; [`LlmClient`] is that seam. [`OpenAiClient`] implements it
//! over `POST /v1/responses` and also exposes voice transcription.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, trace};

use crate::error::{AgentError, Result};
use crate::tool::{ToolCall, ToolDefinition};

/// Environment variable for the OpenAI API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// OpenAI API base URL.
const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Upper bound for one model request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const TRANSCRIPTION_TIMEOUT: Duration = Duration::from_secs(60);

const TRANSCRIPTION_MODEL: &str = "whisper-1";

/// One turn request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnRequest {
    pub model: String,

    /// User-side input text.
    pub input: String,

    /// System instructions.
    pub instructions: String,

    /// Functions the model may call.
    #[serde(skip_serializing_if = "Vec::is_empty", serialize_with = "serialize_tools")]
    pub tools: Vec<ToolDefinition>,

    /// Tool choice policy, e.g. `auto`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,

    /// Provider-side conversation the turn is appended to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation: Option<String>,

    /// Chain this turn onto an earlier response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Responses API expects flat function tools: `{type, name, description, parameters}`.
#[allow(clippy::ptr_arg)]
fn serialize_tools<S>(tools: &Vec<ToolDefinition>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    #[derive(Serialize)]
    struct FunctionTool<'a> {
        #[serde(rename = "type")]
        tool_type: &'static str,
        name: &'a str,
        description: &'a str,
        parameters: &'a Value,
    }

    serializer.collect_seq(tools.iter().map(|t| FunctionTool {
        tool_type: "function",
        name: &t.name,
        description: &t.description,
        parameters: &t.parameters,
    }))
}

/// Completion state of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Completed,
    /// Cut short, e.g. by the output token limit.
    Incomplete,
    Failed,
}

impl TurnStatus {
    fn from_wire(status: Option<&str>) -> Self {
        match status {
            None | Some("completed") => Self::Completed,
            Some("failed") | Some("cancelled") => Self::Failed,
            Some(_) => Self::Incomplete,
        }
    }
}

/// One turn response.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnResponse {
    /// Provider response id, usable as a context id.
    pub id: String,

    /// Concatenated output text.
    pub content: Option<String>,

    /// Requested function calls with normalized arguments.
    pub function_calls: Vec<ToolCall>,

    pub status: TurnStatus,
}

impl TurnResponse {
    /// Plain text reply.
    pub fn text(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: Some(content.into()),
            function_calls: Vec::new(),
            status: TurnStatus::Completed,
        }
    }

    /// Check if the response has function calls.
    pub fn has_function_calls(&self) -> bool {
        !self.function_calls.is_empty()
    }
}

/// Something that can run a model turn.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn create_turn(&self, request: TurnRequest) -> Result<TurnResponse>;

    /// Open a provider-side conversation and return its handle.
    async fn create_conversation(&self) -> Result<String>;
}

/// OpenAI API client.
#[derive(Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_key, OPENAI_API_URL)
    }

    /// Create a client against a compatible endpoint.
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AgentError::Configuration(format!(
                "Missing {OPENAI_API_KEY_ENV} environment variable"
            )));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Transcribe an audio file, e.g. a Telegram voice note.
    pub async fn transcribe(
        &self,
        audio: Vec<u8>,
        filename: &str,
        language: Option<&str>,
    ) -> Result<String> {
        let size = audio.len();
        let file = Part::bytes(audio)
            .file_name(filename.to_string())
            .mime_str("application/octet-stream")
            .map_err(|e| AgentError::Transcription(e.to_string()))?;
        let mut form = Form::new()
            .part("file", file)
            .text("model", TRANSCRIPTION_MODEL);
        if let Some(language) = language {
            form = form.text("language", language.to_string());
        }

        debug!(filename = %filename, bytes = size, "Transcribing audio");

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(TRANSCRIPTION_TIMEOUT)
            .multipart(form)
            .send()
            .await
            .map_err(|e| AgentError::Transcription(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(status = %status, "Transcription rejected");
            return Err(AgentError::Transcription(format!(
                "OpenAI API error {status}: {text}"
            )));
        }

        #[derive(Deserialize)]
        struct Transcription {
            text: String,
        }

        let body: Transcription = response
            .json()
            .await
            .map_err(|e| AgentError::ResponseParse(format!("transcription: {e}")))?;
        debug!(chars = body.text.chars().count(), "Transcription received");
        Ok(body.text)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn create_turn(&self, request: TurnRequest) -> Result<TurnResponse> {
        trace!(?request, "Sending turn request");

        let response = self
            .client
            .post(format!("{}/responses", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|e| AgentError::ModelInvocation(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::ModelInvocation(format!(
                "OpenAI API error {status}: {text}"
            )));
        }

        let body: ResponsesBody = response
            .json()
            .await
            .map_err(|e| AgentError::ResponseParse(format!("Failed to parse response: {e}")))?;
        let turn = body.into_turn();

        debug!(
            response_id = %turn.id,
            status = ?turn.status,
            function_calls = turn.function_calls.len(),
            "Turn response received"
        );
        Ok(turn)
    }

    async fn create_conversation(&self) -> Result<String> {
        #[derive(Deserialize)]
        struct Conversation {
            id: String,
        }

        let response = self
            .client
            .post(format!("{}/conversations", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| AgentError::ModelInvocation(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::ModelInvocation(format!(
                "Failed to create conversation {status}: {text}"
            )));
        }

        let body: Conversation = response
            .json()
            .await
            .map_err(|e| AgentError::ResponseParse(format!("conversation: {e}")))?;
        debug!(conversation_id = %body.id, "Conversation created");
        Ok(body.id)
    }
}

/// Responses API body, reduced to what a turn needs.
#[derive(Debug, Deserialize)]
struct ResponsesBody {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputItem {
    Message {
        #[serde(default)]
        content: Vec<ContentPart>,
    },
    FunctionCall {
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        id: Option<String>,
        name: String,
        #[serde(default)]
        arguments: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    OutputText { text: String },
    #[serde(other)]
    Other,
}

impl ResponsesBody {
    fn into_turn(self) -> TurnResponse {
        let mut texts = Vec::new();
        let mut function_calls = Vec::new();

        for (index, item) in self.output.into_iter().enumerate() {
            match item {
                OutputItem::Message { content } => {
                    texts.extend(content.into_iter().filter_map(|part| match part {
                        ContentPart::OutputText { text } => Some(text),
                        ContentPart::Other => None,
                    }));
                }
                OutputItem::FunctionCall {
                    call_id,
                    id,
                    name,
                    arguments,
                } => {
                    let call_id = call_id.or(id).unwrap_or_else(|| format!("call_{index}"));
                    function_calls.push(ToolCall::with_id(call_id, name, arguments));
                }
                OutputItem::Other => {}
            }
        }

        let content = (!texts.is_empty()).then(|| texts.join("\n"));
        TurnResponse {
            id: self.id,
            content,
            function_calls,
            status: TurnStatus::from_wire(self.status.as_deref()),
        }
    }
}
