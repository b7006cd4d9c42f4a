//! Tool types shared by the catalog, the client and the executor.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Definition of a function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Function name.
    pub name: String,

    /// What the function does, shown to the model.
    pub description: String,

    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A function call requested by the model.
///
/// `arguments` is always a JSON object; see [`normalize_arguments`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, unique within one turn.
    pub id: String,

    /// Function name.
    pub name: String,

    /// Decoded arguments object.
    pub arguments: Value,
}

impl ToolCall {
    /// Create a call, normalizing the argument payload.
    pub fn with_id(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: normalize_arguments(arguments),
        }
    }

    /// Get a raw argument.
    pub fn get_arg(&self, key: &str) -> Option<&Value> {
        self.arguments.get(key)
    }

    /// Get an argument as trimmed, non-empty text.
    ///
    /// Numbers and booleans are accepted in their JSON spelling.
    pub fn get_text_arg(&self, key: &str) -> Option<String> {
        let text = match self.get_arg(key)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => return None,
        };
        (!text.is_empty()).then_some(text)
    }
}

/// Reduce a provider argument payload to a JSON object.
///
/// Providers send either a structured object or a JSON-encoded string.
/// Strings are decoded once; anything that does not yield an object becomes `{}`.
pub fn normalize_arguments(raw: Value) -> Value {
    match raw {
        Value::Object(_) => raw,
        Value::String(encoded) => match serde_json::from_str::<Value>(&encoded) {
            Ok(decoded @ Value::Object(_)) => decoded,
            _ => Value::Object(Map::new()),
        },
        _ => Value::Object(Map::new()),
    }
}

/// Outcome of one tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Call this result answers.
    pub call_id: String,

    /// Whether the side effect committed.
    pub success: bool,

    /// Confirmation text on success, error description on failure.
    pub content: String,
}

impl ToolResult {
    /// Successful result.
    pub fn success(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            success: true,
            content: content.into(),
        }
    }

    /// Failed result.
    pub fn failure(call_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            success: false,
            content: error.into(),
        }
    }

    /// Error description, if the call failed.
    pub fn error(&self) -> Option<&str> {
        (!self.success).then_some(self.content.as_str())
    }

    /// One-line human readable summary fed back to the model.
    pub fn summary(&self, tool_name: &str) -> String {
        if self.success {
            format!("✅ {tool_name} ({}): {}", self.call_id, self.content)
        } else {
            format!("❌ {tool_name} ({}): ошибка: {}", self.call_id, self.content)
        }
    }
}
