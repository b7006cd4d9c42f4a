//! Reply envelope parsing.
//!
//! The model is asked to answer with `{"content": "...", "need_confirm": bool}`,
//! optionally wrapped in a ```` ```json ```` fence. Anything else is taken as
//! plain text.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

/// Appended to a reply that should be sent with the confirmation keyboard.
pub const CONFIRM_MARKER: &str = "<!-- NEED_CONFIRM -->";

/// Parsed model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    pub content: String,
    pub need_confirm: bool,
}

impl ParsedReply {
    /// Reply text, with [`CONFIRM_MARKER`] appended when confirmation is needed.
    pub fn into_text(self) -> String {
        if self.need_confirm {
            format!("{}{CONFIRM_MARKER}", self.content)
        } else {
            self.content
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    content: String,
    #[serde(default)]
    need_confirm: bool,
}

/// Parse a raw model reply.
///
/// Never fails: a reply that is not a valid envelope is returned verbatim.
pub fn parse_reply(raw: &str) -> ParsedReply {
    let candidate = strip_code_fence(raw.trim());
    match serde_json::from_str::<Envelope>(candidate) {
        Ok(envelope) => ParsedReply {
            content: envelope.content,
            need_confirm: envelope.need_confirm,
        },
        Err(_) => ParsedReply {
            content: raw.to_string(),
            need_confirm: false,
        },
    }
}

fn strip_code_fence(text: &str) -> &str {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?s)\A```(?:json|JSON)?[ \t]*\n?(.*?)\n?```\z").expect("fence pattern must compile")
    });
    fence
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map_or(text, |m| m.as_str().trim())
}

/// Split a reply into its text and whether it carried [`CONFIRM_MARKER`].
pub fn split_confirm_marker(text: &str) -> (String, bool) {
    if text.contains(CONFIRM_MARKER) {
        (text.replace(CONFIRM_MARKER, "").trim_end().to_string(), true)
    } else {
        (text.to_string(), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_passes_through() {
        let reply = parse_reply("Уточните исполнителя.");
        assert_eq!(reply.content, "Уточните исполнителя.");
        assert!(!reply.need_confirm);
    }

    #[test]
    fn test_envelope() {
        let reply = parse_reply(r#"{"content": "Проверьте задачу", "need_confirm": true}"#);
        assert_eq!(reply.content, "Проверьте задачу");
        assert!(reply.need_confirm);
        assert_eq!(reply.into_text(), format!("Проверьте задачу{CONFIRM_MARKER}"));
    }

    #[test]
    fn test_fenced_envelope() {
        let raw = "```json\n{\"content\": \"Готово\", \"need_confirm\": false}\n```";
        let reply = parse_reply(raw);
        assert_eq!(reply.content, "Готово");
        assert_eq!(reply.into_text(), "Готово");
    }

    #[test]
    fn test_need_confirm_defaults_false() {
        assert!(!parse_reply(r#"{"content": "x"}"#).need_confirm);
    }

    #[test]
    fn test_invalid_json_is_raw_text() {
        let raw = "{\"content\": broken";
        assert_eq!(parse_reply(raw).content, raw);
    }

    #[test]
    fn test_split_confirm_marker() {
        let (text, confirm) = split_confirm_marker(&format!("Задача\n{CONFIRM_MARKER}"));
        assert_eq!(text, "Задача");
        assert!(confirm);

        let (text, confirm) = split_confirm_marker("Задача");
        assert_eq!(text, "Задача");
        assert!(!confirm);
    }
}
