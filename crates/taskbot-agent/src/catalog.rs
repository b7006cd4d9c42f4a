//! The functions offered to the model.
//!
//! There is exactly one: [`ADD_ROW_TOOL`], which records a task as a new
//! spreadsheet row.

use serde_json::{json, Map, Value};

use crate::tool::ToolDefinition;

/// Name of the row-append function.
pub const ADD_ROW_TOOL: &str = "add_row_to_sheets";

/// Required argument fields, in validation order.
pub const REQUIRED_FIELDS: [&str; 8] = [
    "task_title",
    "task_description",
    "expected_result",
    "priority",
    "task_type",
    "executor",
    "sender_name",
    "requires_verification",
];

/// Optional attachment link fields.
pub const FILE_LINK_FIELDS: [&str; 3] = ["file_link_1", "file_link_2", "file_link_3"];

/// Allowed priorities.
pub const PRIORITIES: [&str; 3] = ["Высокий", "Средний", "Низкий"];

/// Allowed verification flags.
pub const VERIFICATION_FLAGS: [&str; 2] = ["Да", "Нет"];

/// Verification flag used unless the sender explicitly asks for review.
pub const DEFAULT_VERIFICATION: &str = "Нет";

/// Tool catalog bound to the known executor codes.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    executors: Vec<String>,
}

impl ToolCatalog {
    /// Create a catalog whose `executor` field is restricted to `executors`.
    pub fn new(executors: Vec<String>) -> Self {
        Self { executors }
    }

    /// Known executor codes.
    pub fn executors(&self) -> &[String] {
        &self.executors
    }

    /// Whether `name` is a function this catalog offers.
    pub fn contains(&self, name: &str) -> bool {
        name == ADD_ROW_TOOL
    }

    /// All definitions, ready to send to the model.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        vec![self.add_row_definition()]
    }

    /// Definitions as pretty JSON, for embedding into the system prompt.
    pub fn schema_json(&self) -> String {
        serde_json::to_string_pretty(&self.definitions()).unwrap_or_default()
    }

    /// Definition of [`ADD_ROW_TOOL`].
    pub fn add_row_definition(&self) -> ToolDefinition {
        let mut executor = json!({
            "type": "string",
            "description": "Код исполнителя задачи из списка, например ИТ ВУ"
        });
        // An empty enum would reject every call.
        if !self.executors.is_empty() {
            executor["enum"] = json!(self.executors);
        }

        let mut properties = Map::new();
        properties.insert(
            "task_title".into(),
            json!({"type": "string", "description": "Краткое название задачи"}),
        );
        properties.insert(
            "task_description".into(),
            json!({"type": "string", "description": "Подробное описание задачи"}),
        );
        properties.insert(
            "expected_result".into(),
            json!({"type": "string", "description": "Ожидаемый конечный результат"}),
        );
        properties.insert(
            "priority".into(),
            json!({"type": "string", "enum": PRIORITIES, "description": "Приоритет задачи"}),
        );
        properties.insert(
            "task_type".into(),
            json!({
                "type": "string",
                "description": "Тип задачи (например: Разработка, Настройка, Исправление, Анализ)"
            }),
        );
        properties.insert("executor".into(), executor);
        properties.insert(
            "sender_name".into(),
            json!({"type": "string", "description": "Код отправителя задачи, например ГД НТ"}),
        );
        for (field, ordinal) in FILE_LINK_FIELDS.iter().zip(["первый", "второй", "третий"]) {
            properties.insert(
                (*field).into(),
                json!({
                    "type": "string",
                    "description": format!("Ссылка на {ordinal} файл от отправителя (опционально)")
                }),
            );
        }
        properties.insert(
            "requires_verification".into(),
            json!({
                "type": "string",
                "enum": VERIFICATION_FLAGS,
                "default": DEFAULT_VERIFICATION,
                "description": "Требуется ли проверка задачи постановщиком перед приемкой. \"Да\" только если это явно указано"
            }),
        );

        ToolDefinition::new(
            ADD_ROW_TOOL,
            "Добавляет новую строку с данными задачи в таблицу Google Sheets",
            json!({
                "type": "object",
                "additionalProperties": false,
                "properties": Value::Object(properties),
                "required": REQUIRED_FIELDS,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_definition() {
        let catalog = ToolCatalog::new(vec!["ИТ ВУ".into()]);
        let defs = catalog.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, ADD_ROW_TOOL);
        assert!(catalog.contains(ADD_ROW_TOOL));
        assert!(!catalog.contains("delete_row"));
    }

    #[test]
    fn test_schema_contract() {
        let catalog = ToolCatalog::new(vec!["ИТ ВУ".into(), "ФД ДТ".into()]);
        let params = catalog.add_row_definition().parameters;

        assert_eq!(params["additionalProperties"], json!(false));
        assert_eq!(params["required"], json!(REQUIRED_FIELDS));
        assert_eq!(params["properties"]["executor"]["enum"], json!(["ИТ ВУ", "ФД ДТ"]));
        assert_eq!(
            params["properties"]["priority"]["enum"],
            json!(["Высокий", "Средний", "Низкий"])
        );
        assert_eq!(
            params["properties"]["requires_verification"]["default"],
            json!("Нет")
        );
        for field in FILE_LINK_FIELDS {
            assert!(params["properties"].get(field).is_some());
            assert!(!REQUIRED_FIELDS.contains(&field));
        }
    }

    #[test]
    fn test_executor_enum_omitted_when_unknown() {
        let params = ToolCatalog::default().add_row_definition().parameters;
        assert!(params["properties"]["executor"].get("enum").is_none());
    }

    #[test]
    fn test_schema_json_mentions_tool() {
        let schema = ToolCatalog::default().schema_json();
        assert!(schema.contains(ADD_ROW_TOOL));
    }
}
