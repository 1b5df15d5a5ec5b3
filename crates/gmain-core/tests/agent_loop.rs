//! End-to-end loop scenarios against a scripted transport.
//!
//! The fake transport serves genuine SSE byte frames, so every run
//! exercises the real decoder, permission path and compaction machinery.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use gmain_core::agent::{Agent, AgentConfig, AgentEvent, AgentServices};
use gmain_core::agents::{register_builtin_agents, AgentInfo, AgentMode, AgentRegistry};
use gmain_core::ai::sse::StreamReader;
use gmain_core::ai::types::{ContentBlock, Message, MessagesRequest, MessagesResponse, Role};
use gmain_core::compaction::truncate::outputs_dir;
use gmain_core::compaction::ModelLimits;
use gmain_core::permission::{Action, Evaluator, RepeatCallDetector, Ruleset};
use gmain_core::tools::{Tool, ToolContext, ToolRegistry, ToolResult};

// ── Scripted transport ─────────────────────────────────────────────────

struct FakeTransport {
    streams: Mutex<VecDeque<String>>,
    summaries: Mutex<VecDeque<String>>,
    stream_requests: Mutex<Vec<MessagesRequest>>,
    create_requests: Mutex<Vec<MessagesRequest>>,
}

impl FakeTransport {
    fn new() -> Self {
        Self {
            streams: Mutex::new(VecDeque::new()),
            summaries: Mutex::new(VecDeque::new()),
            stream_requests: Mutex::new(Vec::new()),
            create_requests: Mutex::new(Vec::new()),
        }
    }

    fn push_stream(&self, body: String) {
        self.streams.lock().unwrap().push_back(body);
    }

    fn push_summary(&self, text: &str) {
        self.summaries.lock().unwrap().push_back(text.to_string());
    }

    fn stream_request_count(&self) -> usize {
        self.stream_requests.lock().unwrap().len()
    }
}

#[async_trait]
impl gmain_core::Transport for FakeTransport {
    fn model(&self) -> &str {
        "claude-test"
    }

    async fn create_message(
        &self,
        req: &MessagesRequest,
        _cancel: &CancellationToken,
    ) -> Result<MessagesResponse> {
        self.create_requests.lock().unwrap().push(req.clone());
        let Some(text) = self.summaries.lock().unwrap().pop_front() else {
            bail!("no scripted create_message response");
        };
        Ok(MessagesResponse {
            content: vec![ContentBlock::text(text)],
            ..Default::default()
        })
    }

    async fn stream_message(
        &self,
        req: &MessagesRequest,
        _cancel: &CancellationToken,
    ) -> Result<StreamReader> {
        self.stream_requests.lock().unwrap().push(req.clone());
        let Some(body) = self.streams.lock().unwrap().pop_front() else {
            bail!("no scripted stream response");
        };
        let chunks: Vec<Result<Bytes>> = vec![Ok(Bytes::from(body))];
        Ok(StreamReader::new(futures::stream::iter(chunks)))
    }
}

// ── SSE script helpers ─────────────────────────────────────────────────

fn frames(lines: &[String]) -> String {
    lines.join("\n") + "\ndata: [DONE]\n"
}

fn message_start(input_tokens: usize) -> String {
    format!(
        r#"data: {{"type":"message_start","message":{{"id":"msg_x","model":"claude-test","role":"assistant","usage":{{"input_tokens":{input_tokens}}}}}}}"#
    )
}

fn text_stream(text: &str, input_tokens: usize, output_tokens: usize) -> String {
    frames(&[
        message_start(input_tokens),
        r#"data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#.into(),
        format!(r#"data: {{"type":"content_block_delta","index":0,"delta":{{"type":"text_delta","text":"{text}"}}}}"#),
        r#"data: {"type":"content_block_stop","index":0}"#.into(),
        format!(r#"data: {{"type":"message_delta","delta":{{"stop_reason":"end_turn"}},"usage":{{"output_tokens":{output_tokens}}}}}"#),
        r#"data: {"type":"message_stop"}"#.into(),
    ])
}

fn tool_stream(id: &str, name: &str, input: &Value) -> String {
    let partial = input.to_string().replace('\\', "\\\\").replace('"', "\\\"");
    frames(&[
        message_start(10),
        format!(
            r#"data: {{"type":"content_block_start","index":0,"content_block":{{"type":"tool_use","id":"{id}","name":"{name}","input":{{}}}}}}"#
        ),
        format!(
            r#"data: {{"type":"content_block_delta","index":0,"delta":{{"type":"input_json_delta","partial_json":"{partial}"}}}}"#
        ),
        r#"data: {"type":"content_block_stop","index":0}"#.into(),
        r#"data: {"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":7}}"#.into(),
        r#"data: {"type":"message_stop"}"#.into(),
    ])
}

// ── Harness ────────────────────────────────────────────────────────────

struct Harness {
    agent: Agent,
    transport: Arc<FakeTransport>,
    events: Arc<Mutex<Vec<AgentEvent>>>,
}

async fn harness(initial_agent: &str, extra_agents: Vec<AgentInfo>, tools: Vec<Arc<dyn Tool>>) -> Harness {
    let transport = Arc::new(FakeTransport::new());
    let agents = Arc::new(AgentRegistry::new());
    register_builtin_agents(&agents).unwrap();
    for info in extra_agents {
        agents.register(info).unwrap();
    }

    let registry = Arc::new(ToolRegistry::new());
    for tool in tools {
        registry.register(tool).await;
    }

    let agent = Agent::new(
        AgentServices {
            transport: transport.clone(),
            tools: registry,
            agents,
            evaluator: Arc::new(Evaluator::new()),
            repeat: Arc::new(RepeatCallDetector::new()),
            prompt: None,
        },
        AgentConfig {
            session_id: format!("itest-{initial_agent}"),
            work_dir: PathBuf::from("/tmp"),
            initial_agent: initial_agent.to_string(),
            limits: ModelLimits::default(),
        },
    )
    .unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    agent.set_event_handler(Box::new(move |event| {
        sink.lock().unwrap().push(event);
    }));

    Harness {
        agent,
        transport,
        events,
    }
}

struct StaticTool {
    name: &'static str,
    output: String,
    calls: Arc<AtomicUsize>,
}

impl StaticTool {
    fn new(name: &'static str, output: impl Into<String>) -> (Arc<Self>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Self {
                name,
                output: output.into(),
                calls: calls.clone(),
            }),
            calls,
        )
    }
}

#[async_trait]
impl Tool for StaticTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "static test tool"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> ToolResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ToolResult::success(self.output.clone())
    }
}

// ── Scenarios ──────────────────────────────────────────────────────────

#[tokio::test]
async fn trivial_turn_streams_text_and_ends() {
    let h = harness("build", vec![], vec![]).await;
    h.transport.push_stream(text_stream("hello", 12, 5));

    h.agent
        .chat(&CancellationToken::new(), "hi")
        .await
        .unwrap();

    let messages = h.agent.conversation().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0], Message::user_text("hi"));
    assert_eq!(
        messages[1],
        Message::assistant(vec![ContentBlock::text("hello")])
    );

    let events = h.events.lock().unwrap();
    assert!(events.contains(&AgentEvent::Text {
        text: "hello".into()
    }));
    assert!(matches!(
        events.last(),
        Some(AgentEvent::ConversationEnd { note: None })
    ));
    assert!(!events
        .iter()
        .any(|e| matches!(e, AgentEvent::ToolUseStart { .. })));

    let totals = h.agent.token_usage();
    assert_eq!(totals.input, 12);
    assert_eq!(totals.output, 5);

    assert_eq!(h.transport.stream_request_count(), 1);
}

#[tokio::test]
async fn single_tool_call_round_trips() {
    let (tool, calls) = StaticTool::new("read", "FILE");
    let h = harness("build", vec![], vec![tool]).await;

    h.transport.push_stream(tool_stream(
        "T1",
        "read",
        &json!({"file_path": "/a/b.go"}),
    ));
    h.transport.push_stream(text_stream("done", 20, 3));

    h.agent
        .chat(&CancellationToken::new(), "read that file")
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.transport.stream_request_count(), 2);

    let messages = h.agent.conversation().messages();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(
        messages[1].content,
        vec![ContentBlock::ToolUse {
            id: "T1".into(),
            name: "read".into(),
            input: json!({"file_path": "/a/b.go"}),
        }]
    );
    assert_eq!(messages[2].role, Role::User);
    assert_eq!(
        messages[2].content,
        vec![ContentBlock::tool_result("T1", "FILE", false)]
    );
    assert_eq!(messages[3].text(), "done");

    // The second request's history already carries the tool response.
    let requests = h.transport.stream_requests.lock().unwrap();
    assert_eq!(requests[1].messages.len(), 3);
    drop(requests);

    let events = h.events.lock().unwrap();
    assert!(events.contains(&AgentEvent::ToolUseStart {
        id: "T1".into(),
        name: "read".into()
    }));
    assert!(events.iter().any(|e| matches!(
        e,
        AgentEvent::ToolUseEnd { id, is_error: false, .. } if id == "T1"
    )));
}

#[tokio::test]
async fn denied_tool_never_executes() {
    let (tool, calls) = StaticTool::new("bash", "should never run");
    let h = harness("explore", vec![], vec![tool]).await;

    h.transport.push_stream(tool_stream(
        "T1",
        "bash",
        &json!({"command": "rm -rf /"}),
    ));
    h.transport.push_stream(text_stream("understood", 20, 3));

    h.agent
        .chat(&CancellationToken::new(), "clean up")
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0, "no process may be spawned");

    let messages = h.agent.conversation().messages();
    let result = messages
        .iter()
        .flat_map(|m| &m.content)
        .find_map(|b| match b {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
                ..
            } if tool_use_id == "T1" => Some((content.clone(), *is_error)),
            _ => None,
        })
        .expect("tool_use must be answered");

    assert!(result.0.starts_with("Permission denied: agent 'explore'"));
    assert_eq!(result.1, Some(true));

    // The loop continued to a second iteration after the denial.
    assert_eq!(h.transport.stream_request_count(), 2);
}

#[tokio::test]
async fn oversized_tool_output_is_truncated_and_saved() {
    let big = "z".repeat(50_000);
    let (tool, _) = StaticTool::new("read", big.clone());
    let h = harness("build", vec![], vec![tool]).await;

    h.transport.push_stream(tool_stream(
        "C",
        "read",
        &json!({"file_path": "/big/file"}),
    ));
    h.transport.push_stream(text_stream("ok", 10, 2));

    h.agent
        .chat(&CancellationToken::new(), "read the big file")
        .await
        .unwrap();

    let messages = h.agent.conversation().messages();
    let content = messages
        .iter()
        .flat_map(|m| &m.content)
        .find_map(|b| match b {
            ContentBlock::ToolResult { content, .. } => Some(content.clone()),
            _ => None,
        })
        .unwrap();

    assert!(content.len() < 50_000);
    assert!(content.contains("output truncated"));

    let saved_path = outputs_dir("itest-build").join("read-C.txt");
    let saved = std::fs::read_to_string(&saved_path).unwrap();
    assert_eq!(saved, big);

    // The conversation encodes without leaking internal flags.
    let encoded = serde_json::to_string(&messages).unwrap();
    assert!(!encoded.contains("pruned"));

    let _ = std::fs::remove_file(saved_path);
}

#[tokio::test]
async fn compaction_summarizes_when_nothing_is_prunable() {
    let h = harness("build", vec![], vec![]).await;

    // Seed 19 alternating messages so the turn's own pair lands on an
    // assistant-led tail.
    for i in 0..19 {
        if i % 2 == 0 {
            h.agent.conversation().append_user_text(format!("u{i}"));
        } else {
            h.agent
                .conversation()
                .append_assistant(vec![ContentBlock::text(format!("a{i}"))]);
        }
    }

    // Usage at ~86% of available triggers the compactor.
    h.transport.push_stream(text_stream("reply", 165_000, 5));
    h.transport.push_summary("everything that happened so far");

    h.agent
        .chat(&CancellationToken::new(), "continue")
        .await
        .unwrap();

    let messages = h.agent.conversation().messages();
    assert_eq!(messages.len(), 5);
    assert_eq!(messages[0].role, Role::User);
    assert!(messages[0]
        .text()
        .starts_with("[Previous conversation summary]"));
    assert!(messages[0].text().contains("everything that happened"));

    // Exactly one nested, non-streaming summarization call.
    let creates = h.transport.create_requests.lock().unwrap();
    assert_eq!(creates.len(), 1);
    assert!(!creates[0].stream);

    let events = h.events.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e, AgentEvent::Compaction { info } if info.contains("Compacted"))));
}

#[tokio::test]
async fn cancellation_between_iterations_sends_nothing() {
    let h = harness("build", vec![], vec![]).await;
    h.transport.push_stream(text_stream("never read", 1, 1));

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h.agent.chat(&cancel, "hi").await.unwrap_err();
    assert!(err.is::<gmain_core::Cancelled>());

    // No upstream request was made and no assistant message appended.
    assert_eq!(h.transport.stream_request_count(), 0);
    let messages = h.agent.conversation().messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::User);
}

#[tokio::test]
async fn max_steps_caps_the_loop() {
    let mut ruleset = Ruleset::default();
    ruleset.add_rule("noop", "*", Action::Allow);
    let looper = AgentInfo::new("looper")
        .with_mode(AgentMode::All)
        .with_permission(ruleset)
        .with_max_steps(2);

    let (tool, calls) = StaticTool::new("noop", "ok");
    let h = harness("looper", vec![looper], vec![tool]).await;

    // The model asks for a tool forever; the cap must stop it.
    for i in 0..3 {
        h.transport
            .push_stream(tool_stream(&format!("T{i}"), "noop", &json!({})));
    }

    h.agent
        .chat(&CancellationToken::new(), "loop forever")
        .await
        .unwrap();

    assert_eq!(h.transport.stream_request_count(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let events = h.events.lock().unwrap();
    assert!(matches!(
        events.last(),
        Some(AgentEvent::ConversationEnd { note: Some(_) })
    ));
}

#[tokio::test]
async fn repeat_tripwire_resets_without_a_prompt_channel() {
    let mut ruleset = Ruleset::default();
    ruleset.add_rule("read", "*", Action::Allow);
    let reader = AgentInfo::new("reader")
        .with_mode(AgentMode::All)
        .with_permission(ruleset);

    let (tool, calls) = StaticTool::new("read", "same file");
    let h = harness("reader", vec![reader], vec![tool]).await;

    let args = json!({"file_path": "/a"});
    for i in 0..3 {
        h.transport
            .push_stream(tool_stream(&format!("T{i}"), "read", &args));
    }
    h.transport.push_stream(text_stream("done", 10, 2));

    h.agent
        .chat(&CancellationToken::new(), "keep reading")
        .await
        .unwrap();

    // Without a user channel the tripwire resets and execution continues.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let messages = h.agent.conversation().messages();
    let errors = messages
        .iter()
        .flat_map(|m| &m.content)
        .filter(|b| matches!(b, ContentBlock::ToolResult { is_error: Some(true), .. }))
        .count();
    assert_eq!(errors, 0);
}

#[tokio::test]
async fn switch_agent_swaps_system_prompt_and_keeps_history() {
    let h = harness("build", vec![], vec![]).await;

    h.transport.push_stream(tool_stream(
        "T1",
        "switch_agent",
        &json!({"agent": "plan"}),
    ));
    h.transport.push_stream(text_stream("now planning", 10, 2));

    let system_before = h.agent.conversation().system();

    h.agent
        .chat(&CancellationToken::new(), "switch to planning")
        .await
        .unwrap();

    assert_eq!(h.agent.current_agent(), "plan");
    assert_ne!(h.agent.conversation().system(), system_before);

    // History preserved, including the switch call and its result.
    let messages = h.agent.conversation().messages();
    assert_eq!(messages.len(), 4);

    let events = h.events.lock().unwrap();
    assert!(events.contains(&AgentEvent::AgentSwitch {
        name: "plan".into()
    }));
}

#[tokio::test]
async fn clear_keeps_system_prompt() {
    let h = harness("build", vec![], vec![]).await;
    h.transport.push_stream(text_stream("hello", 5, 1));

    h.agent.chat(&CancellationToken::new(), "hi").await.unwrap();
    assert_eq!(h.agent.conversation().message_count(), 2);

    let system = h.agent.conversation().system();
    h.agent.clear();
    assert_eq!(h.agent.conversation().message_count(), 0);
    assert_eq!(h.agent.conversation().system(), system);
}
