//! The bounded tool-calling loop.
//!
//! One call to [`ConversationOrchestrator::process`] turns a user message into
//! a reply. Every turn is appended to the user's provider-side conversation,
//! so a confirmation sent later still sees the task card it confirms. The
//! conversation is replaced after an hour of inactivity and after a committed
//! row. Requested tool calls are executed at most once per call id, and the
//! loop ends as soon as a task row is committed, the model answers without
//! calls, or the turn budget runs out.
//!
//! Termination rules, in the order they are checked after a turn:
//!
//! - no function calls: the reply envelope is unwrapped and returned
//! - a successful [`ADD_ROW_TOOL`] call: context is cleared and the fixed
//!   acknowledgement is returned without another model turn
//! - no recognized calls: the best text so far plus a degraded note
//! - every recognized call failed: the failures are summarized into the next
//!   turn's input and the loop continues

#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::sync::Arc;

use taskbot_core::Clock;
use tracing::{debug, error, info, warn};

use crate::catalog::{ToolCatalog, ADD_ROW_TOOL};
use crate::client::{LlmClient, TurnRequest, TurnResponse, TurnStatus};
use crate::config::OrchestratorConfig;
use crate::context::ContextStore;
use crate::directory::ExecutorDirectory;
use crate::error::{AgentError, Result};
use crate::executor::{ToolExecutor, TASK_CREATED_ACK};
use crate::prompt::PromptBuilder;
use crate::response::parse_reply;
use crate::tool::ToolResult;

/// Reply used when a message could not be processed at all.
pub const APOLOGY: &str = "Произошла ошибка при обработке сообщения. Попробуйте еще раз.";

/// Appended when the loop ends without a definite answer.
pub const DEGRADED_NOTE: &str =
    "⚠️ Не удалось завершить обработку запроса. Попробуйте уточнить задачу или повторите позже.";

/// The sender of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRef {
    pub id: i64,
    /// Display name, passed to the model as a hint for the sender field.
    pub display_name: Option<String>,
}

impl UserRef {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Drives the model turn loop for incoming messages.
pub struct ConversationOrchestrator {
    llm: Arc<dyn LlmClient>,
    executor: ToolExecutor,
    directory: Arc<ExecutorDirectory>,
    contexts: Arc<dyn ContextStore>,
    prompt: PromptBuilder,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
}

impl ConversationOrchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        executor: ToolExecutor,
        directory: Arc<ExecutorDirectory>,
        contexts: Arc<dyn ContextStore>,
        clock: Arc<dyn Clock>,
        config: OrchestratorConfig,
    ) -> Self {
        let prompt = PromptBuilder::new(config.timezone_name.clone(), config.utc_offset);
        Self {
            llm,
            executor,
            directory,
            contexts,
            prompt,
            clock,
            config,
        }
    }

    /// Replace the system prompt template.
    pub fn with_prompt_template(mut self, template: impl Into<String>) -> Self {
        self.prompt = self.prompt.with_template(template);
        self
    }

    /// Drop the user's conversation context.
    pub async fn reset(&self, user_id: i64) {
        self.contexts.clear(user_id).await;
    }

    /// Process a message and always produce a reply.
    ///
    /// Provider failures become [`APOLOGY`].
    pub async fn process(&self, text: &str, attachments: &[String], user: &UserRef) -> String {
        match self.try_process(text, attachments, user).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(user_id = user.id, error = %e, "Failed to process message");
                APOLOGY.to_string()
            }
        }
    }

    /// Process a message, surfacing provider failures.
    pub async fn try_process(
        &self,
        text: &str,
        attachments: &[String],
        user: &UserRef,
    ) -> Result<String> {
        info!(
            user_id = user.id,
            chars = text.chars().count(),
            attachments = attachments.len(),
            "Processing message"
        );

        let executors = self.directory.approved().await;
        let catalog = ToolCatalog::new(executors.iter().map(|e| e.short_code.clone()).collect());
        let tools = catalog.definitions();
        let tool_schema = catalog.schema_json();

        let conversation = self.conversation_for(user.id).await;
        let mut last_response: Option<String> = None;
        let mut feedback: Vec<String> = Vec::new();
        let mut best_text: Option<String> = None;

        for iteration in 1..=self.config.max_iterations {
            let now = self.clock.now();
            let previous_response_id = last_response
                .clone()
                .filter(|_| self.config.chain_tool_turns);
            // The provider rejects a conversation together with a chained response.
            let turn_conversation = match previous_response_id {
                Some(_) => None,
                None => conversation.clone(),
            };
            let request = TurnRequest {
                model: self.config.model.clone(),
                input: compose_input(text, attachments, user, &feedback),
                instructions: self.prompt.build(now, &executors, &tool_schema),
                tools: tools.clone(),
                tool_choice: Some("auto".into()),
                conversation: turn_conversation,
                previous_response_id,
                max_output_tokens: self.config.max_output_tokens,
                temperature: self.config.temperature,
            };

            let response = self.dispatch(request).await?;
            if let Some(id) = conversation.as_deref() {
                self.contexts.touch(user.id, id).await;
            }
            last_response = Some(response.id.clone());

            debug!(
                user_id = user.id,
                iteration,
                response_id = %response.id,
                function_calls = response.function_calls.len(),
                "Turn completed"
            );

            if let Some(content) = response.content.as_deref().filter(|c| !c.trim().is_empty()) {
                best_text = Some(parse_reply(content).content);
            }

            if !response.has_function_calls() {
                return Ok(match response.content {
                    Some(raw) if !raw.trim().is_empty() => parse_reply(&raw).into_text(),
                    _ => degraded(best_text.as_deref(), &[]),
                });
            }

            let results = self.execute_calls(&catalog, &response).await;

            if results
                .iter()
                .any(|(name, result)| name == ADD_ROW_TOOL && result.success)
            {
                self.contexts.clear(user.id).await;
                info!(user_id = user.id, iteration, "Task committed");
                return Ok(TASK_CREATED_ACK.to_string());
            }

            if results.is_empty() {
                warn!(user_id = user.id, iteration, "No recognized function calls in turn");
                return Ok(degraded(best_text.as_deref(), &[]));
            }

            feedback.extend(results.iter().map(|(name, result)| result.summary(name)));
        }

        warn!(
            user_id = user.id,
            max_iterations = self.config.max_iterations,
            "Iteration budget exhausted"
        );
        Ok(degraded(best_text.as_deref(), &feedback))
    }

    /// The user's conversation handle, opening a new one when absent or stale.
    ///
    /// A failure to open one is logged and the message proceeds without it.
    async fn conversation_for(&self, user_id: i64) -> Option<String> {
        let now = self.clock.now();
        let fresh = self
            .contexts
            .get(user_id)
            .await
            .and_then(|ctx| ctx.fresh_id(now, self.config.context_ttl).map(str::to_string));
        if fresh.is_some() {
            return fresh;
        }

        let timeout = self.config.turn_timeout;
        match tokio::time::timeout(timeout, self.llm.create_conversation()).await {
            Ok(Ok(id)) => {
                self.contexts.touch(user_id, &id).await;
                info!(user_id, conversation_id = %id, "Conversation opened");
                Some(id)
            }
            Ok(Err(e)) => {
                warn!(user_id, error = %e, "Failed to open conversation, proceeding without one");
                None
            }
            Err(_) => {
                warn!(user_id, timeout_secs = timeout.as_secs(), "Opening conversation timed out");
                None
            }
        }
    }

    async fn dispatch(&self, request: TurnRequest) -> Result<TurnResponse> {
        let timeout = self.config.turn_timeout;
        let response = tokio::time::timeout(timeout, self.llm.create_turn(request))
            .await
            .map_err(|_| AgentError::Timeout(timeout.as_secs()))??;

        match response.status {
            TurnStatus::Completed => {}
            TurnStatus::Incomplete => {
                warn!(response_id = %response.id, "Model turn incomplete");
            }
            TurnStatus::Failed => {
                return Err(AgentError::ModelInvocation(format!(
                    "response {} failed",
                    response.id
                )));
            }
        }
        Ok(response)
    }

    /// Execute recognized calls once per call id, in order.
    async fn execute_calls(
        &self,
        catalog: &ToolCatalog,
        response: &TurnResponse,
    ) -> Vec<(String, ToolResult)> {
        let mut seen = HashSet::new();
        let mut results = Vec::new();

        for call in &response.function_calls {
            if !catalog.contains(&call.name) {
                warn!(tool = %call.name, call_id = %call.id, "Skipping unknown function call");
                continue;
            }
            if !seen.insert(call.id.as_str()) {
                debug!(call_id = %call.id, "Skipping duplicate call id");
                continue;
            }
            let result = self.executor.execute(call).await;
            info!(
                tool = %call.name,
                call_id = %call.id,
                success = result.success,
                "Tool call executed"
            );
            results.push((call.name.clone(), result));
        }
        results
    }
}

/// User text, enumerated attachments, sender hint and accumulated tool feedback.
fn compose_input(text: &str, attachments: &[String], user: &UserRef, feedback: &[String]) -> String {
    let mut input = text.trim().to_string();

    if !attachments.is_empty() {
        input.push_str("\n\nПрикрепленные файлы:");
        for (i, link) in attachments.iter().enumerate() {
            input.push_str(&format!("\n{}. {link}", i + 1));
        }
    }

    if let Some(name) = user.display_name.as_deref().filter(|n| !n.trim().is_empty()) {
        input.push_str(&format!("\n\nОтправитель в Telegram: {name}"));
    }

    if !feedback.is_empty() {
        input.push_str("\n\nРезультаты предыдущих вызовов функций:");
        for line in feedback {
            input.push('\n');
            input.push_str(line);
        }
    }

    input
}

/// Best available text, failure summaries and the degraded note.
fn degraded(best_text: Option<&str>, failures: &[String]) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if let Some(text) = best_text.filter(|t| !t.trim().is_empty()) {
        parts.push(text);
    }
    parts.extend(failures.iter().map(String::as_str));
    parts.push(DEGRADED_NOTE);
    parts.join("\n\n")
}
