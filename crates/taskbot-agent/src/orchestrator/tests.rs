use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use serde_json::json;
use taskbot_core::ManualClock;

use super::*;
use crate::context::InMemoryContextStore;
use crate::directory::ExecutorDirectory;
use crate::executor::ExecutorConfig;
use crate::response::CONFIRM_MARKER;
use crate::sheets::{AppendOutcome, RowAppender};
use crate::tool::ToolCall;

#[derive(Clone)]
enum Step {
    Reply(TurnResponse),
    Fail(String),
    Hang,
}

/// Plays back scripted turns; the last step repeats forever.
struct ScriptedLlm {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<TurnRequest>>,
    conversations: AtomicUsize,
    conversations_down: AtomicBool,
}

impl ScriptedLlm {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
            conversations: AtomicUsize::new(0),
            conversations_down: AtomicBool::new(false),
        })
    }

    fn conversations_opened(&self) -> usize {
        self.conversations.load(Ordering::SeqCst)
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, index: usize) -> TurnRequest {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn create_turn(&self, request: TurnRequest) -> Result<TurnResponse> {
        self.requests.lock().unwrap().push(request);
        let step = {
            let mut steps = self.steps.lock().unwrap();
            if steps.len() > 1 {
                steps.pop_front()
            } else {
                steps.front().cloned()
            }
        };
        match step {
            Some(Step::Reply(response)) => Ok(response),
            Some(Step::Fail(message)) => Err(AgentError::ModelInvocation(message)),
            Some(Step::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            None => Err(AgentError::ModelInvocation("script exhausted".into())),
        }
    }

    async fn create_conversation(&self) -> Result<String> {
        if self.conversations_down.load(Ordering::SeqCst) {
            return Err(AgentError::ModelInvocation("conversations unavailable".into()));
        }
        let n = self.conversations.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("conv_{n}"))
    }
}

#[derive(Default)]
struct CountingAppender {
    rows: Mutex<Vec<Vec<String>>>,
}

impl CountingAppender {
    fn count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl RowAppender for CountingAppender {
    async fn append_row(
        &self,
        _sheet_id: &str,
        _range: &str,
        row: Vec<String>,
    ) -> Result<AppendOutcome> {
        self.rows.lock().unwrap().push(row);
        Ok(AppendOutcome::default())
    }
}

struct Harness {
    orchestrator: ConversationOrchestrator,
    llm: Arc<ScriptedLlm>,
    appender: Arc<CountingAppender>,
    contexts: Arc<InMemoryContextStore>,
    clock: Arc<ManualClock>,
}

fn harness(steps: Vec<Step>, config: OrchestratorConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 3, 4, 9, 0, 0).unwrap(),
    ));
    let llm = ScriptedLlm::new(steps);
    let appender = Arc::new(CountingAppender::default());
    let contexts = Arc::new(InMemoryContextStore::new(clock.clone()));
    let executor = ToolExecutor::new(
        appender.clone(),
        ExecutorConfig {
            spreadsheet_id: Some("sheet-1".into()),
            ..ExecutorConfig::default()
        },
        clock.clone(),
    );
    let directory = Arc::new(ExecutorDirectory::fixed(vec!["ИТ ВУ".into()], clock.clone()));
    let orchestrator = ConversationOrchestrator::new(
        llm.clone(),
        executor,
        directory,
        contexts.clone(),
        clock.clone(),
        config,
    );
    Harness {
        orchestrator,
        llm,
        appender,
        contexts,
        clock,
    }
}

fn config() -> OrchestratorConfig {
    OrchestratorConfig::default()
}

fn user() -> UserRef {
    UserRef::new(42).with_display_name("Иван")
}

fn full_row_args() -> serde_json::Value {
    json!({
        "task_title": "Настроить CRM",
        "task_description": "Интеграция форм сайта",
        "expected_result": "Заявки попадают в CRM",
        "priority": "Высокий",
        "task_type": "Настройка",
        "executor": "ИТ ВУ",
        "sender_name": "Иван",
        "requires_verification": "Нет"
    })
}

fn calls(id: &str, calls: Vec<ToolCall>) -> Step {
    Step::Reply(TurnResponse {
        id: id.into(),
        content: None,
        function_calls: calls,
        status: TurnStatus::Completed,
    })
}

fn text(id: &str, content: &str) -> Step {
    Step::Reply(TurnResponse::text(id, content))
}

#[tokio::test]
async fn test_plain_reply_without_calls() {
    let h = harness(vec![text("resp_1", "Уточните исполнителя.")], config());

    let reply = h.orchestrator.process("Сделать отчет", &[], &user()).await;

    assert_eq!(reply, "Уточните исполнителя.");
    assert_eq!(h.llm.calls(), 1);
    assert_eq!(h.appender.count(), 0);
    let ctx = h.contexts.get(42).await.unwrap();
    assert_eq!(ctx.context_id.as_deref(), Some("conv_1"));
    assert_eq!(h.llm.request(0).conversation.as_deref(), Some("conv_1"));
}

#[tokio::test]
async fn test_need_confirm_appends_marker() {
    let h = harness(
        vec![text(
            "resp_1",
            r#"{"content": "**Задача:** Настроить CRM", "need_confirm": true}"#,
        )],
        config(),
    );

    let reply = h.orchestrator.process("Настроить CRM", &[], &user()).await;

    assert_eq!(reply, format!("**Задача:** Настроить CRM{CONFIRM_MARKER}"));
}

#[tokio::test]
async fn test_successful_add_row_returns_ack() {
    let h = harness(
        vec![calls(
            "resp_1",
            vec![ToolCall::with_id("call_1", ADD_ROW_TOOL, full_row_args())],
        )],
        config(),
    );

    let reply = h.orchestrator.process("Да, отправляй", &[], &user()).await;

    assert_eq!(reply, TASK_CREATED_ACK);
    assert_eq!(h.appender.count(), 1);
    assert_eq!(h.llm.calls(), 1);
    assert!(h.contexts.get(42).await.is_none());
}

#[tokio::test]
async fn test_duplicate_call_ids_execute_once() {
    let call = ToolCall::with_id("call_1", ADD_ROW_TOOL, full_row_args());
    let h = harness(
        vec![calls("resp_1", vec![call.clone(), call])],
        config(),
    );

    let reply = h.orchestrator.process("Да", &[], &user()).await;

    assert_eq!(reply, TASK_CREATED_ACK);
    assert_eq!(h.appender.count(), 1);
}

#[tokio::test]
async fn test_unknown_calls_degrade() {
    let h = harness(
        vec![Step::Reply(TurnResponse {
            id: "resp_1".into(),
            content: Some("Сейчас поищу".into()),
            function_calls: vec![ToolCall::with_id("call_1", "web_search", json!({}))],
            status: TurnStatus::Completed,
        })],
        config(),
    );

    let reply = h.orchestrator.process("Найди", &[], &user()).await;

    assert!(reply.starts_with("Сейчас поищу"));
    assert!(reply.ends_with(DEGRADED_NOTE));
    assert_eq!(h.llm.calls(), 1);
    assert_eq!(h.appender.count(), 0);
}

#[tokio::test]
async fn test_failure_feedback_reaches_next_turn() {
    let mut partial = full_row_args();
    partial["executor"] = json!("");
    let h = harness(
        vec![
            calls(
                "resp_1",
                vec![ToolCall::with_id("call_1", ADD_ROW_TOOL, partial)],
            ),
            text("resp_2", "Кто будет исполнителем?"),
        ],
        config(),
    );

    let reply = h.orchestrator.process("Задача без исполнителя", &[], &user()).await;

    assert_eq!(reply, "Кто будет исполнителем?");
    assert_eq!(h.llm.calls(), 2);
    assert!(!h.llm.request(0).input.contains("Результаты предыдущих вызовов"));
    let second = h.llm.request(1).input;
    assert!(second.contains("Задача без исполнителя"));
    assert!(second.contains("❌ add_row_to_sheets (call_1)"));
    assert!(second.contains("'executor'"));
}

#[tokio::test]
async fn test_budget_exhaustion() {
    let h = harness(
        vec![calls(
            "resp_n",
            vec![ToolCall::with_id("call_1", ADD_ROW_TOOL, json!({}))],
        )],
        config(),
    );

    let reply = h.orchestrator.process("Задача", &[], &user()).await;

    assert_eq!(h.llm.calls(), crate::config::MAX_ITERATIONS);
    assert_eq!(h.appender.count(), 0);
    assert!(reply.contains("❌ add_row_to_sheets"));
    assert!(reply.ends_with(DEGRADED_NOTE));
}

#[tokio::test]
async fn test_provider_error_gives_apology() {
    let h = harness(vec![Step::Fail("502 Bad Gateway".into())], config());

    let reply = h.orchestrator.process("Задача", &[], &user()).await;
    assert_eq!(reply, APOLOGY);

    let err = h
        .orchestrator
        .try_process("Задача", &[], &user())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::ModelInvocation(_)));
}

#[tokio::test]
async fn test_failed_status_gives_apology() {
    let h = harness(
        vec![Step::Reply(TurnResponse {
            status: TurnStatus::Failed,
            ..TurnResponse::text("resp_1", "partial")
        })],
        config(),
    );

    assert_eq!(h.orchestrator.process("Задача", &[], &user()).await, APOLOGY);
}

#[tokio::test(start_paused = true)]
async fn test_turn_timeout() {
    let h = harness(vec![Step::Hang], config());

    let err = h
        .orchestrator
        .try_process("Задача", &[], &user())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Timeout(120)));
    assert_eq!(h.orchestrator.process("Задача", &[], &user()).await, APOLOGY);
}

#[tokio::test]
async fn test_confirmation_reaches_same_conversation() {
    let h = harness(
        vec![
            text(
                "resp_1",
                r#"{"content": "**Задача:** Настроить CRM", "need_confirm": true}"#,
            ),
            calls(
                "resp_2",
                vec![ToolCall::with_id("call_1", ADD_ROW_TOOL, full_row_args())],
            ),
        ],
        config(),
    );

    h.orchestrator
        .process("Настроить CRM, исполнитель ИТ ВУ", &[], &user())
        .await;
    let reply = h
        .orchestrator
        .process("Да, все верно. Отправляй задачу.", &[], &user())
        .await;

    assert_eq!(reply, TASK_CREATED_ACK);
    assert_eq!(h.llm.conversations_opened(), 1);
    assert_eq!(h.llm.request(0).conversation.as_deref(), Some("conv_1"));
    assert_eq!(h.llm.request(1).conversation.as_deref(), Some("conv_1"));
    assert_eq!(h.llm.request(1).previous_response_id, None);
}

#[tokio::test]
async fn test_conversation_replaced_when_stale() {
    let h = harness(vec![text("resp_1", "Ок")], config());

    h.orchestrator.process("Раз", &[], &user()).await;
    h.clock.advance(Duration::minutes(59));
    h.orchestrator.process("Два", &[], &user()).await;
    h.clock.advance(Duration::minutes(61));
    h.orchestrator.process("Три", &[], &user()).await;

    assert_eq!(h.llm.request(1).conversation.as_deref(), Some("conv_1"));
    assert_eq!(h.llm.request(2).conversation.as_deref(), Some("conv_2"));
}

#[tokio::test]
async fn test_commit_starts_new_conversation() {
    let h = harness(
        vec![
            calls(
                "resp_1",
                vec![ToolCall::with_id("call_1", ADD_ROW_TOOL, full_row_args())],
            ),
            text("resp_2", "Опишите задачу"),
        ],
        config(),
    );

    assert_eq!(h.orchestrator.process("Да", &[], &user()).await, TASK_CREATED_ACK);
    h.orchestrator.process("Новая задача", &[], &user()).await;

    assert_eq!(h.llm.request(1).conversation.as_deref(), Some("conv_2"));
}

#[tokio::test]
async fn test_proceeds_without_conversation() {
    let h = harness(vec![text("resp_1", "Ок")], config());
    h.llm.conversations_down.store(true, Ordering::SeqCst);

    let reply = h.orchestrator.process("Раз", &[], &user()).await;

    assert_eq!(reply, "Ок");
    assert_eq!(h.llm.request(0).conversation, None);
    assert!(h.contexts.get(42).await.is_none());
}

#[tokio::test]
async fn test_chaining_disabled_by_default() {
    let h = harness(
        vec![
            calls(
                "resp_1",
                vec![ToolCall::with_id("call_1", ADD_ROW_TOOL, json!({}))],
            ),
            text("resp_2", "Кто исполнитель?"),
        ],
        config(),
    );

    h.orchestrator.process("Задача", &[], &user()).await;

    let follow_up = h.llm.request(1);
    assert_eq!(follow_up.previous_response_id, None);
    assert_eq!(follow_up.conversation.as_deref(), Some("conv_1"));
}

#[tokio::test]
async fn test_chaining_follow_up_turns() {
    let h = harness(
        vec![
            calls(
                "resp_1",
                vec![ToolCall::with_id("call_1", ADD_ROW_TOOL, json!({}))],
            ),
            text("resp_2", "Кто исполнитель?"),
        ],
        OrchestratorConfig {
            chain_tool_turns: true,
            ..config()
        },
    );

    h.orchestrator.process("Задача", &[], &user()).await;

    let first = h.llm.request(0);
    assert_eq!(first.previous_response_id, None);
    assert_eq!(first.conversation.as_deref(), Some("conv_1"));
    let follow_up = h.llm.request(1);
    assert_eq!(follow_up.previous_response_id.as_deref(), Some("resp_1"));
    assert_eq!(follow_up.conversation, None);
}

#[tokio::test]
async fn test_executor_directory_feeds_schema_and_prompt() {
    let h = harness(vec![text("resp_1", "Ок")], config());

    h.orchestrator.process("Задача", &[], &user()).await;

    let request = h.llm.request(0);
    assert_eq!(
        request.tools[0].parameters["properties"]["executor"]["enum"],
        json!(["ИТ ВУ"])
    );
    assert!(request.instructions.contains("- ИТ ВУ"));
}

#[tokio::test]
async fn test_reset_clears_context() {
    let h = harness(vec![text("resp_1", "Ок")], config());
    h.orchestrator.process("Раз", &[], &user()).await;
    assert!(h.contexts.get(42).await.is_some());

    h.orchestrator.reset(42).await;
    assert!(h.contexts.get(42).await.is_none());
}

#[test]
fn test_compose_input() {
    let input = compose_input(
        "  Сделать отчет  ",
        &["https://f/a.pdf".into(), "https://f/b.png".into()],
        &user(),
        &["❌ add_row_to_sheets (call_1): ошибка: x".into()],
    );

    assert!(input.starts_with("Сделать отчет\n\nПрикрепленные файлы:\n1. https://f/a.pdf\n2. https://f/b.png"));
    assert!(input.contains("Отправитель в Telegram: Иван"));
    assert!(input.ends_with("❌ add_row_to_sheets (call_1): ошибка: x"));
}

#[test]
fn test_degraded_without_text() {
    assert_eq!(degraded(None, &[]), DEGRADED_NOTE);
    assert_eq!(
        degraded(Some("Черновик"), &["❌ f (1): ошибка: x".into()]),
        format!("Черновик\n\n❌ f (1): ошибка: x\n\n{DEGRADED_NOTE}")
    );
}
