//! System prompt for task intake.

use std::sync::OnceLock;

use chrono::{DateTime, FixedOffset, Utc};
use regex::Regex;
use tracing::warn;

use crate::directory::Executor;

/// Default instructions. Placeholders are `{{name}}`.
pub const DEFAULT_TEMPLATE: &str = r#"Ты ассистент, который принимает задачи от сотрудников в Telegram и заносит их в таблицу задач.

Сегодня {{current_date}}, часовой пояс пользователя {{user_timezone}}.

## Исполнители
Допустимые исполнители (код, имя, Telegram):
{{executors}}

## Как работать
1. Из сообщения пользователя (текст, расшифровка голосового, приложенные файлы) собери поля задачи:
   название, описание, ожидаемый результат, приоритет, тип задачи, исполнитель, отправитель.
2. Если чего-то не хватает или исполнитель не из списка, задай короткий уточняющий вопрос.
3. Когда все поля собраны, покажи пользователю карточку задачи и попроси подтвердить отправку
   (need_confirm = true). Не вызывай функцию до подтверждения.
4. После подтверждения вызови функцию add_row_to_sheets ровно один раз.
   Ссылки на приложенные файлы передай в file_link_1..3.
5. requires_verification = "Да" только если пользователь явно просит проверку, иначе "Нет".

## Формат ответа
Если функцию не вызываешь, отвечай JSON-объектом:
{"content": "текст для пользователя в Markdown", "need_confirm": true|false}

## Доступные функции
{{tool_schema}}
"#;

/// Builds instructions for a turn.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    template: String,
    timezone_name: String,
    utc_offset: FixedOffset,
}

impl PromptBuilder {
    pub fn new(timezone_name: impl Into<String>, utc_offset: FixedOffset) -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
            timezone_name: timezone_name.into(),
            utc_offset,
        }
    }

    /// Replace the template.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    /// Render the instructions for `now` with the current executor directory.
    pub fn build(&self, now: DateTime<Utc>, executors: &[Executor], tool_schema: &str) -> String {
        let current_date = now
            .with_timezone(&self.utc_offset)
            .format("%Y-%m-%d")
            .to_string();
        let executors = if executors.is_empty() {
            "(список не задан)".to_string()
        } else {
            executors
                .iter()
                .map(Executor::prompt_line)
                .collect::<Vec<_>>()
                .join("\n")
        };

        substitute(
            &self.template,
            &[
                ("current_date", current_date.as_str()),
                ("user_timezone", self.timezone_name.as_str()),
                ("executors", executors.as_str()),
                ("tool_schema", tool_schema),
            ],
        )
    }
}

/// Replace `{{name}}` placeholders, warning about any left over.
pub fn substitute(template: &str, vars: &[(&str, &str)]) -> String {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();

    let mut prompt = template.to_string();
    for (name, value) in vars {
        prompt = prompt.replace(&format!("{{{{{name}}}}}"), value);
    }

    let placeholder = PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{\{(.*?)\}\}").expect("placeholder pattern must compile"));
    let missing: Vec<&str> = placeholder
        .captures_iter(&prompt)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    if !missing.is_empty() {
        warn!(variables = ?missing, "Unsubstituted variables found in prompt");
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_substitute() {
        let out = substitute("Hi {{name}}, {{name}}! {{other}}", &[("name", "Ann")]);
        assert_eq!(out, "Hi Ann, Ann! {{other}}");
    }

    #[test]
    fn test_build_fills_every_placeholder() {
        let builder = PromptBuilder::new("Europe/Moscow", FixedOffset::east_opt(3 * 3600).unwrap());
        let executors = vec![
            Executor {
                name: "Владислав Умнов".into(),
                short_code: "ИТ ВУ".into(),
                tg_username: "@vumnov".into(),
            },
            Executor::from_code("ФД ДТ"),
        ];
        // 22:30 UTC is already the next day in Moscow
        let now = Utc.with_ymd_and_hms(2025, 1, 31, 22, 30, 0).unwrap();
        let prompt = builder.build(now, &executors, "[schema]");

        assert!(prompt.contains("Сегодня 2025-02-01"));
        assert!(prompt.contains("Europe/Moscow"));
        assert!(prompt.contains("- ИТ ВУ (Владислав Умнов), @vumnov\n- ФД ДТ"));
        assert!(prompt.contains("[schema]"));
        assert!(!prompt.contains("{{"));
    }

    #[test]
    fn test_custom_template() {
        let builder = PromptBuilder::new("UTC", FixedOffset::east_opt(0).unwrap())
            .with_template("tz={{user_timezone}}");
        assert_eq!(builder.build(Utc::now(), &[], ""), "tz=UTC");
    }
}
