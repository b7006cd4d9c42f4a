//! Execution of model-requested tool calls.

use std::sync::Arc;

use chrono::{FixedOffset, Offset, Utc};
use taskbot_core::Clock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::{ADD_ROW_TOOL, FILE_LINK_FIELDS, REQUIRED_FIELDS};
use crate::sheets::RowAppender;
use crate::tool::{ToolCall, ToolResult};

/// Reply shown to the user once a task row is committed.
pub const TASK_CREATED_ACK: &str = "💼 Задача поставлена 🔔 Ответственный уведомлен";

/// Columns in a task row.
pub const ROW_WIDTH: usize = 30;

/// Index of the verification flag column.
pub const VERIFICATION_COLUMN: usize = ROW_WIDTH - 1;

const TIMESTAMP_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

/// Where and how rows are written.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub spreadsheet_id: Option<String>,
    pub range: String,
    /// Offset used for the creation timestamp column.
    pub utc_offset: FixedOffset,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: None,
            range: "A:Z".into(),
            utc_offset: FixedOffset::east_opt(3 * 3600).unwrap_or_else(|| Utc.fix()),
        }
    }
}

/// Runs tool calls against the spreadsheet.
pub struct ToolExecutor {
    appender: Arc<dyn RowAppender>,
    config: ExecutorConfig,
    clock: Arc<dyn Clock>,
}

impl ToolExecutor {
    pub fn new(appender: Arc<dyn RowAppender>, config: ExecutorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            appender,
            config,
            clock,
        }
    }

    /// Execute one call.
    ///
    /// Never fails: unknown functions, missing fields, missing configuration
    /// and backend errors all come back as failed results. Validation runs
    /// before any side effect, so a failed validation appends nothing.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        if call.name != ADD_ROW_TOOL {
            warn!(tool = %call.name, call_id = %call.id, "Unknown tool requested");
            return ToolResult::failure(&call.id, format!("Неизвестная функция: {}", call.name));
        }

        if let Some(field) = first_missing_field(call) {
            warn!(call_id = %call.id, field, "Tool call rejected: required field missing");
            return ToolResult::failure(
                &call.id,
                format!("Обязательное поле '{field}' не заполнено"),
            );
        }

        let Some(sheet_id) = self
            .config
            .spreadsheet_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
        else {
            warn!(call_id = %call.id, "Tool call rejected: spreadsheet id not configured");
            return ToolResult::failure(&call.id, "Не настроен ID таблицы Google Sheets");
        };

        let row = self.build_row(call);
        match self
            .appender
            .append_row(sheet_id, &self.config.range, row)
            .await
        {
            Ok(outcome) => {
                info!(
                    call_id = %call.id,
                    updated_cells = outcome.updated_cells.unwrap_or(0),
                    "Task row appended"
                );
                ToolResult::success(&call.id, TASK_CREATED_ACK)
            }
            Err(e) => {
                warn!(call_id = %call.id, error = %e, "Task row append failed");
                ToolResult::failure(&call.id, e.to_string())
            }
        }
    }

    /// Lay out the task row in the sheet's fixed column order.
    pub fn build_row(&self, call: &ToolCall) -> Vec<String> {
        let text = |key: &str| call.get_text_arg(key).unwrap_or_default();
        let created_at = self
            .clock
            .now()
            .with_timezone(&self.config.utc_offset)
            .format(TIMESTAMP_FORMAT)
            .to_string();

        let mut row = Vec::with_capacity(ROW_WIDTH);
        row.push(short_task_id());
        row.push(created_at);
        row.push(text("sender_name"));
        row.push(text("executor"));
        row.push(text("task_type"));
        row.push(text("task_title"));
        row.push(text("task_description"));
        row.push(text("expected_result"));
        row.push(text("priority"));
        row.extend(FILE_LINK_FIELDS.iter().map(|f| text(f)));
        // Workflow columns are filled in later by people working the sheet.
        row.resize(VERIFICATION_COLUMN, String::new());
        row.push(text("requires_verification"));
        row
    }
}

/// First required field that is absent or blank, in catalog order.
fn first_missing_field(call: &ToolCall) -> Option<&'static str> {
    REQUIRED_FIELDS
        .into_iter()
        .find(|field| call.get_text_arg(field).is_none())
}

fn short_task_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id.to_uppercase()
}
