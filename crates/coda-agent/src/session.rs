//! The per-session turn loop.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use coda_ace::Playbook;
use coda_llm::{
    ChatMessage, ChatRequest, ModelManager, StreamEvent, ToolCall, parse_xml_tool_calls,
};
use coda_retrieval::Retriever;
use coda_store::Store;
use coda_types::{ModelConfig, WorkspacePolicy};

use crate::approvals::ApprovalBroker;
use crate::events::AgentEvent;
use crate::policy::{PolicyDecision, evaluate_tool_policy};
use crate::tool::ToolRegistry;

/// Default iteration cap per turn.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Knowledge retrieval parameters for the turn.
const KNOWLEDGE_LIMIT: usize = 5;
const KNOWLEDGE_THRESHOLD: f32 = 0.6;

/// Bullet retrieval parameters for the turn.
const BULLET_LIMIT: usize = 5;
const BULLET_THRESHOLD: f32 = 0.5;

/// Display cap for untruncated tool results.
const DISPLAY_RESULT_CAP: usize = 8000;

/// Static configuration of one agent session.
#[derive(Debug, Clone)]
pub struct AgentSessionConfig {
    /// The session row id.
    pub session_id: String,
    /// The workspace the session operates on.
    pub workspace_id: String,
    /// Module id partitioning knowledge and playbook collections.
    pub module_id: String,
    /// Model the session runs against.
    pub model: ModelConfig,
    /// Iteration cap per turn.
    pub max_iterations: usize,
    /// Module-dependent system prompt; may be empty.
    pub system_prompt: String,
}

impl AgentSessionConfig {
    /// Create a config with the default iteration cap and no system prompt.
    pub fn new(
        session_id: impl Into<String>,
        workspace_id: impl Into<String>,
        module_id: impl Into<String>,
        model: ModelConfig,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            workspace_id: workspace_id.into(),
            module_id: module_id.into(),
            model,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            system_prompt: String::new(),
        }
    }
}

/// One live agent session: conversation history, tools, approvals, and the
/// per-turn bullet bookkeeping.
pub struct AgentSession {
    config: AgentSessionConfig,
    model_manager: Arc<ModelManager>,
    registry: Arc<ToolRegistry>,
    policy: WorkspacePolicy,
    approvals: Arc<ApprovalBroker>,
    retriever: Option<Arc<Retriever>>,
    playbook: Option<Arc<tokio::sync::Mutex<Playbook>>>,
    mirror: Option<coda_ace::VectorMirror>,
    store: Option<Store>,
    history: Vec<ChatMessage>,
    used_bullet_ids: Vec<String>,
}

impl AgentSession {
    /// Create a session.
    pub fn new(
        config: AgentSessionConfig,
        model_manager: Arc<ModelManager>,
        registry: ToolRegistry,
        policy: WorkspacePolicy,
    ) -> Self {
        Self {
            config,
            model_manager,
            registry: Arc::new(registry),
            policy,
            approvals: Arc::new(ApprovalBroker::new()),
            retriever: None,
            playbook: None,
            mirror: None,
            store: None,
            history: Vec::new(),
            used_bullet_ids: Vec::new(),
        }
    }

    /// Attach a retriever for knowledge and bullet augmentation.
    pub fn with_retriever(mut self, retriever: Arc<Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Attach the shared playbook for this module.
    pub fn with_playbook(mut self, playbook: Arc<tokio::sync::Mutex<Playbook>>) -> Self {
        self.playbook = Some(playbook);
        self
    }

    /// Attach vector mirroring for playbook mutations.
    pub fn with_mirror(mut self, mirror: coda_ace::VectorMirror) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Attach the relational store for tool-event records.
    pub fn with_store(mut self, store: Store) -> Self {
        self.store = Some(store);
        self
    }

    /// The session's approval broker. The transport resolves requests here.
    pub fn approvals(&self) -> Arc<ApprovalBroker> {
        self.approvals.clone()
    }

    /// The session config.
    pub fn config(&self) -> &AgentSessionConfig {
        &self.config
    }

    /// Bullet ids surfaced for the most recent turn.
    pub fn used_bullet_ids(&self) -> &[String] {
        &self.used_bullet_ids
    }

    pub(crate) fn model_manager(&self) -> &Arc<ModelManager> {
        &self.model_manager
    }

    pub(crate) fn playbook(&self) -> Option<&Arc<tokio::sync::Mutex<Playbook>>> {
        self.playbook.as_ref()
    }

    pub(crate) fn mirror(&self) -> Option<&coda_ace::VectorMirror> {
        self.mirror.as_ref()
    }

    /// Process one user message, emitting events in order.
    ///
    /// Cancellation is cooperative: the token is observed at every stream
    /// read and before each tool call; history already written remains.
    pub async fn process_message(
        &mut self,
        user_message: &str,
        context: Option<&serde_json::Value>,
        events: &mpsc::Sender<AgentEvent>,
        cancel: &CancellationToken,
    ) {
        let user_content = self.augment_user_message(user_message, context).await;
        self.history.push(ChatMessage::user(user_content));

        let backend = match self
            .model_manager
            .ensure_loaded(self.config.model.clone())
            .await
        {
            Ok(backend) => backend,
            Err(e) => {
                tracing::error!(session_id = %self.config.session_id, error = %e, "No model available");
                let _ = events
                    .send(AgentEvent::Error {
                        code: "agent_error".to_string(),
                        message: format!("No model loaded: {}", e),
                    })
                    .await;
                return;
            }
        };

        let system_content = self.build_system_content().await;
        let mut iteration = 0usize;
        let mut last_content = String::new();

        while iteration < self.config.max_iterations {
            iteration += 1;

            let _ = events
                .send(AgentEvent::Thinking {
                    phase: "reasoning".to_string(),
                    message: format!("Thinking... (step {})", iteration),
                })
                .await;

            let request = self.build_request(&system_content);

            let guard = self.model_manager.acquire_for_inference();
            let mut stream = match backend.stream(request).await {
                Ok(stream) => stream,
                Err(e) => {
                    drop(guard);
                    tracing::error!(error = %e, "Completion request failed");
                    let _ = events
                        .send(AgentEvent::Error {
                            code: "agent_error".to_string(),
                            message: e.to_string(),
                        })
                        .await;
                    return;
                }
            };

            let mut content = String::new();
            let mut tool_calls: Vec<ToolCall> = Vec::new();
            let mut stream_error = None;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!(session_id = %self.config.session_id, "Turn cancelled mid-stream");
                        return;
                    }
                    event = stream.next() => match event {
                        None => break,
                        Some(Ok(StreamEvent::Content { text })) => {
                            content.push_str(&text);
                            let _ = events.send(AgentEvent::MessageDelta { delta: text }).await;
                        }
                        Some(Ok(StreamEvent::ToolCall { call })) => tool_calls.push(call),
                        Some(Ok(StreamEvent::Done { .. })) => break,
                        Some(Err(e)) => {
                            stream_error = Some(e);
                            break;
                        }
                    }
                }
            }
            drop(guard);

            // Inline-XML tool-call regions were streamed as raw content;
            // the canonical text has them stripped.
            let (clean_content, _) = parse_xml_tool_calls(&content);

            if let Some(e) = stream_error {
                tracing::error!(error = %e, "Stream failed mid-response");
                self.history
                    .push(ChatMessage::assistant_with_tools(clean_content.clone(), tool_calls));
                let _ = events
                    .send(AgentEvent::MessageFinal {
                        message: clean_content,
                        metadata: serde_json::json!({
                            "iterations": iteration,
                            "success": false,
                            "error": e.to_string(),
                        }),
                    })
                    .await;
                return;
            }

            self.history.push(ChatMessage::assistant_with_tools(
                clean_content.clone(),
                tool_calls.clone(),
            ));
            last_content = clean_content.clone();

            if tool_calls.is_empty() {
                let _ = events
                    .send(AgentEvent::MessageFinal {
                        message: clean_content,
                        metadata: serde_json::json!({
                            "iterations": iteration,
                            "success": true,
                        }),
                    })
                    .await;
                return;
            }

            for call in tool_calls {
                if cancel.is_cancelled() {
                    return;
                }
                let _ = events
                    .send(AgentEvent::ToolUse {
                        tool: call.name.clone(),
                        arguments: call.arguments.clone(),
                    })
                    .await;

                let Some(result) = self.dispatch_tool(&call, events, cancel).await else {
                    return; // cancelled while awaiting approval
                };

                if let Some(ref store) = self.store {
                    if let Err(e) = store.record_tool_event(
                        &self.config.session_id,
                        &call.name,
                        &call.arguments,
                        Some(&result),
                        result["success"].as_bool(),
                    ) {
                        tracing::warn!(error = %e, "Tool event record failed");
                    }
                }

                // The model sees the full result; the client a display-sized one.
                self.history
                    .push(ChatMessage::tool_result(&call.id, &call.name, result.to_string()));
                let _ = events
                    .send(AgentEvent::ToolResult {
                        tool: call.name.clone(),
                        result: display_result(&call.name, &result),
                    })
                    .await;
            }
        }

        let message = if last_content.is_empty() {
            "I've completed the maximum number of steps. Please let me know if you need anything else."
                .to_string()
        } else {
            last_content
        };
        let _ = events
            .send(AgentEvent::MessageFinal {
                message,
                metadata: serde_json::json!({
                    "iterations": iteration,
                    "success": true,
                    "max_iterations_reached": true,
                }),
            })
            .await;
    }

    /// Prepend retrieved knowledge and bullets to the user content, and
    /// record which bullet ids were surfaced.
    async fn augment_user_message(
        &mut self,
        user_message: &str,
        context: Option<&serde_json::Value>,
    ) -> String {
        self.used_bullet_ids.clear();
        let formatted = format_user_message(user_message, context);

        let Some(retriever) = self.retriever.clone() else {
            return formatted;
        };

        let mut rag_block = String::new();
        let knowledge = retriever
            .retrieve(user_message, KNOWLEDGE_LIMIT, KNOWLEDGE_THRESHOLD)
            .await;
        if !knowledge.is_empty() {
            rag_block.push_str("\n\n## Relevant Knowledge\n");
            for result in &knowledge {
                rag_block.push_str(&format!(
                    "\n### {} (score: {:.2})\n{}\n",
                    result.source, result.score, result.content
                ));
            }
            tracing::info!(chunks = knowledge.len(), "Knowledge retrieved");
        }

        let mut ace_block = String::new();
        let bullets = retriever
            .retrieve_ace_bullets(user_message, BULLET_LIMIT, BULLET_THRESHOLD)
            .await;
        if !bullets.is_empty() {
            ace_block.push_str("\n\n## Playbook - Relevant Bullets\n");
            for result in &bullets {
                let payload = &result.metadata;
                let bullet_id = payload["bullet_id"]
                    .as_str()
                    .or_else(|| payload["id"].as_str());
                let section = payload["section"].as_str().unwrap_or("unknown");
                let helpful = payload["helpful_count"].as_u64().unwrap_or(0);
                let harmful = payload["harmful_count"].as_u64().unwrap_or(0);
                let quality = if helpful + harmful > 0 {
                    helpful as f32 / (helpful + harmful) as f32
                } else {
                    0.5
                };
                let content = payload["content"].as_str().unwrap_or(&result.content);

                ace_block.push_str(&format!(
                    "\n- [{}] {} (id: {}, score: {:.2}, relevance: {:.2})",
                    section,
                    content,
                    bullet_id.unwrap_or("unknown"),
                    quality,
                    result.score
                ));
                if let Some(id) = bullet_id {
                    self.used_bullet_ids.push(id.to_string());
                }
            }
            tracing::info!(bullets = bullets.len(), "Playbook bullets retrieved");
        }

        if rag_block.is_empty() && ace_block.is_empty() {
            formatted
        } else {
            format!("{}{}\n\n---\n\n{}", rag_block, ace_block, formatted)
        }
    }

    /// System content for the turn. The playbook is embedded only when no
    /// retriever exists; with retrieval available, bullets arrive per-turn.
    async fn build_system_content(&self) -> String {
        let mut system = self.config.system_prompt.clone();
        if self.retriever.is_none() {
            if let Some(ref playbook) = self.playbook {
                let text = playbook.lock().await.to_text();
                if !text.trim().is_empty() {
                    system.push_str(&format!("\n\n## Playbook - Learned Strategies\n{}", text));
                }
            }
        }
        system
    }

    fn build_request(&self, system_content: &str) -> ChatRequest {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        if !system_content.trim().is_empty() {
            messages.push(ChatMessage::system(system_content));
        }
        messages.extend(self.history.iter().cloned());

        let mut request = ChatRequest::new(messages)
            .with_temperature(self.config.model.temperature)
            .with_context_window(self.config.model.context_window);
        let definitions = self.registry.to_definitions();
        if !definitions.is_empty() {
            request = request.with_tools(definitions);
        }
        request
    }

    /// Run one tool call through the policy gate and registry. `None`
    /// means the turn was cancelled while awaiting approval.
    async fn dispatch_tool(
        &self,
        call: &ToolCall,
        events: &mpsc::Sender<AgentEvent>,
        cancel: &CancellationToken,
    ) -> Option<serde_json::Value> {
        let Some(tool) = self.registry.get(&call.name) else {
            return Some(serde_json::json!({
                "success": false,
                "error": format!("Unknown tool: {}", call.name),
            }));
        };

        if tool.requires_approval() {
            match evaluate_tool_policy(
                &self.policy,
                &call.name,
                tool.approval_scope(),
                &call.arguments,
            ) {
                PolicyDecision::Approve => {}
                PolicyDecision::Deny(reason) => {
                    tracing::info!(tool = %call.name, reason = %reason, "Tool denied by policy");
                    return Some(serde_json::json!({ "success": false, "error": reason }));
                }
                PolicyDecision::Prompt => {
                    let (request_id, receiver) = self.approvals.request();
                    let _ = events
                        .send(AgentEvent::ApprovalRequest {
                            request_id: request_id.clone(),
                            prompt: tool.approval_prompt(&call.arguments),
                            tool: call.name.clone(),
                        })
                        .await;

                    let approved = tokio::select! {
                        _ = cancel.cancelled() => return None,
                        decision = receiver => decision.unwrap_or(false),
                    };
                    if !approved {
                        tracing::info!(tool = %call.name, request_id, "Tool approval denied");
                        return Some(serde_json::json!({ "success": false, "error": "denied" }));
                    }
                }
            }
        }

        Some(tool.execute(call.arguments.clone()).await)
    }
}

/// Render the user message with optional editor context.
fn format_user_message(message: &str, context: Option<&serde_json::Value>) -> String {
    let Some(context) = context else {
        return message.to_string();
    };
    let mut parts = vec![message.to_string()];

    if let Some(active_file) = context.get("active_file") {
        if let Some(path) = active_file["file_path"].as_str() {
            parts.push(format!("\n\nActive file: {}", path));
        }
        if let Some(selection) = active_file.get("selection") {
            parts.push(format!(
                "Selected lines {}-{}",
                selection["start"], selection["end"]
            ));
        }
    }

    if let Some(diagnostics) = context.get("diagnostics").and_then(|d| d.as_array()) {
        if !diagnostics.is_empty() {
            parts.push("\n\nCurrent errors/warnings:".to_string());
            for diagnostic in diagnostics.iter().take(5) {
                parts.push(format!(
                    "- {}:{} - {}",
                    diagnostic["file_path"].as_str().unwrap_or("?"),
                    diagnostic["line"],
                    diagnostic["message"].as_str().unwrap_or("")
                ));
            }
        }
    }

    if let Some(editors) = context.get("open_editors").and_then(|e| e.as_array()) {
        if !editors.is_empty() {
            let names: Vec<&str> = editors.iter().filter_map(|e| e.as_str()).collect();
            parts.push(format!("\n\nOpen files: {}", names.join(", ")));
        }
    }

    parts.join("\n")
}

/// Build the display-sized version of a tool result.
///
/// `read_file` shows a 50-line / 2000-char preview with totals;
/// `list_files` shows the first 20 files with totals; everything else
/// passes through unless it exceeds the display cap.
pub fn display_result(tool_name: &str, result: &serde_json::Value) -> serde_json::Value {
    if result["success"] != true {
        return result.clone();
    }

    if tool_name == "read_file" {
        let content = result["content"].as_str().unwrap_or_default();
        let size = result["size"].as_u64().unwrap_or(content.len() as u64);
        let lines: Vec<&str> = content.split('\n').collect();
        let mut preview = lines
            .iter()
            .take(50)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        if preview.len() > 2000 {
            let mut cut = 2000;
            while cut > 0 && !preview.is_char_boundary(cut) {
                cut -= 1;
            }
            preview.truncate(cut);
        }
        return serde_json::json!({
            "success": true,
            "file_path": result["file_path"],
            "preview": preview,
            "total_lines": lines.len(),
            "total_size": size,
            "truncated": lines.len() > 50 || content.len() > 2000,
        });
    }

    if tool_name == "list_files" {
        let files = result["files"].as_array().cloned().unwrap_or_default();
        if files.len() > 20 {
            return serde_json::json!({
                "success": true,
                "directory": result["directory"],
                "sample_files": files[..20].to_vec(),
                "total_files": result["total_files"],
                "total_directories": result["total_directories"],
                "truncated": true,
            });
        }
        return result.clone();
    }

    let rendered = result.to_string();
    if rendered.len() > DISPLAY_RESULT_CAP {
        let mut cut = DISPLAY_RESULT_CAP;
        while cut > 0 && !rendered.is_char_boundary(cut) {
            cut -= 1;
        }
        return serde_json::json!({
            "success": true,
            "preview": &rendered[..cut],
            "truncated": true,
        });
    }
    result.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ListFilesTool, RunCommandTool};
    use coda_llm::{BackendFactory, MockBackend, SharedBackend};
    use coda_types::Provider;

    fn model_config() -> ModelConfig {
        ModelConfig::new(Provider::Ollama, "mock-model", "http://localhost:11434")
    }

    fn manager_for(backend: Arc<MockBackend>) -> Arc<ModelManager> {
        let factory: BackendFactory =
            Arc::new(move |_| Ok(backend.clone() as SharedBackend));
        Arc::new(ModelManager::with_factory(factory).without_warmup())
    }

    async fn collect_events(mut rx: mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_tool_round_trip_turn() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.txt", "b.txt", "c.txt"] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }

        let backend = Arc::new(MockBackend::new(vec![
            MockBackend::tool_call_response(ToolCall::new(
                "call_0",
                "list_files",
                serde_json::json!({"directory": "."}),
            )),
            MockBackend::text_response("Found 3 files."),
        ]));

        let mut registry = ToolRegistry::new();
        registry.register(ListFilesTool::new(dir.path()));

        let mut session = AgentSession::new(
            AgentSessionConfig::new("s1", "ws1", "vscode", model_config()),
            manager_for(backend),
            registry,
            WorkspacePolicy::default(),
        );

        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        session.process_message("list files", None, &tx, &cancel).await;
        drop(tx);

        let events = collect_events(rx).await;
        let kinds: Vec<&str> = events
            .iter()
            .map(|e| match e {
                AgentEvent::Thinking { .. } => "thinking",
                AgentEvent::MessageDelta { .. } => "delta",
                AgentEvent::ToolUse { .. } => "tool_use",
                AgentEvent::ToolResult { .. } => "tool_result",
                AgentEvent::ApprovalRequest { .. } => "approval",
                AgentEvent::MessageFinal { .. } => "final",
                AgentEvent::Error { .. } => "error",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["thinking", "tool_use", "tool_result", "thinking", "delta", "final"]
        );

        match events.last().unwrap() {
            AgentEvent::MessageFinal { message, metadata } => {
                assert_eq!(message, "Found 3 files.");
                assert_eq!(metadata["iterations"], 2);
                assert_eq!(metadata["success"], true);
                assert!(metadata.get("max_iterations_reached").is_none());
            }
            other => panic!("unexpected terminal event: {:?}", other),
        }

        match &events[2] {
            AgentEvent::ToolResult { tool, result } => {
                assert_eq!(tool, "list_files");
                assert_eq!(result["total_files"], 3);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_approval_denied_continues_loop() {
        let dir = tempfile::tempdir().unwrap();
        // Marker file: if the command ran, it would create it.
        let marker = dir.path().join("ran.txt");

        let backend = Arc::new(MockBackend::new(vec![
            MockBackend::tool_call_response(ToolCall::new(
                "call_0",
                "run_command",
                serde_json::json!({"command": format!("touch {}", marker.display())}),
            )),
            MockBackend::text_response("Understood, not running it."),
        ]));

        let mut registry = ToolRegistry::new();
        registry.register(RunCommandTool::new(dir.path()));

        let mut session = AgentSession::new(
            AgentSessionConfig::new("s1", "ws1", "vscode", model_config()),
            manager_for(backend),
            registry,
            WorkspacePolicy::default(), // command_approval = prompt
        );
        let approvals = session.approvals();

        let (tx, mut rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let turn = tokio::spawn(async move {
            session.process_message("run it", None, &tx, &cancel).await;
        });

        // Drain events until the approval request, then deny it.
        let mut saw_denied_result = false;
        let mut final_metadata = None;
        while let Some(event) = rx.recv().await {
            match event {
                AgentEvent::ApprovalRequest { request_id, prompt, tool } => {
                    assert_eq!(tool, "run_command");
                    assert!(prompt.contains("touch"));
                    approvals.resolve(&request_id, false);
                }
                AgentEvent::ToolResult { result, .. } => {
                    assert_eq!(result["success"], false);
                    assert_eq!(result["error"], "denied");
                    saw_denied_result = true;
                }
                AgentEvent::MessageFinal { metadata, .. } => {
                    final_metadata = Some(metadata);
                }
                _ => {}
            }
        }
        turn.await.unwrap();

        assert!(saw_denied_result);
        assert_eq!(final_metadata.unwrap()["success"], true);
        // The subprocess never executed.
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_no_model_emits_agent_error() {
        let factory: BackendFactory = Arc::new(|_| {
            Err(coda_llm::LlmError::Backend("no server".to_string()))
        });
        let manager = Arc::new(ModelManager::with_factory(factory).without_warmup());

        let mut session = AgentSession::new(
            AgentSessionConfig::new("s1", "ws1", "vscode", model_config()),
            manager,
            ToolRegistry::new(),
            WorkspacePolicy::default(),
        );

        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        session.process_message("hello", None, &tx, &cancel).await;
        drop(tx);

        let events = collect_events(rx).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            AgentEvent::Error { code, .. } if code == "agent_error"
        ));
    }

    #[tokio::test]
    async fn test_iteration_cap() {
        // Every response asks for another tool call; the cap must fire.
        let scripts: Vec<_> = (0..5)
            .map(|i| {
                MockBackend::tool_call_response(ToolCall::new(
                    format!("call_{}", i),
                    "list_files",
                    serde_json::json!({"directory": "."}),
                ))
            })
            .collect();
        let backend = Arc::new(MockBackend::new(scripts));

        let dir = tempfile::tempdir().unwrap();
        let mut registry = ToolRegistry::new();
        registry.register(ListFilesTool::new(dir.path()));

        let mut config = AgentSessionConfig::new("s1", "ws1", "vscode", model_config());
        config.max_iterations = 2;
        let mut session = AgentSession::new(
            config,
            manager_for(backend),
            registry,
            WorkspacePolicy::default(),
        );

        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        session.process_message("loop forever", None, &tx, &cancel).await;
        drop(tx);

        let events = collect_events(rx).await;
        match events.last().unwrap() {
            AgentEvent::MessageFinal { metadata, .. } => {
                assert_eq!(metadata["iterations"], 2);
                assert_eq!(metadata["max_iterations_reached"], true);
            }
            other => panic!("unexpected terminal event: {:?}", other),
        }
    }

    #[test]
    fn test_display_result_read_file() {
        let content: String = (0..80).map(|i| format!("line {}\n", i)).collect();
        let result = serde_json::json!({
            "success": true,
            "file_path": "big.txt",
            "content": content,
            "size": content.len(),
        });
        let display = display_result("read_file", &result);
        assert_eq!(display["truncated"], true);
        assert_eq!(display["total_lines"], 81);
        assert!(display["preview"].as_str().unwrap().lines().count() <= 50);
    }

    #[test]
    fn test_display_result_list_files() {
        let files: Vec<String> = (0..30).map(|i| format!("f{}.rs", i)).collect();
        let result = serde_json::json!({
            "success": true,
            "directory": ".",
            "files": files,
            "total_files": 30,
            "total_directories": 0,
        });
        let display = display_result("list_files", &result);
        assert_eq!(display["truncated"], true);
        assert_eq!(display["sample_files"].as_array().unwrap().len(), 20);

        // Failures pass through untouched.
        let error = serde_json::json!({"success": false, "error": "nope"});
        assert_eq!(display_result("list_files", &error), error);
    }

    #[test]
    fn test_format_user_message_with_context() {
        let context = serde_json::json!({
            "active_file": {"file_path": "src/main.rs", "selection": {"start": 3, "end": 9}},
            "diagnostics": [{"file_path": "src/main.rs", "line": 4, "message": "unused import"}],
            "open_editors": ["src/main.rs", "Cargo.toml"],
        });
        let formatted = format_user_message("fix this", Some(&context));
        assert!(formatted.starts_with("fix this"));
        assert!(formatted.contains("Active file: src/main.rs"));
        assert!(formatted.contains("Selected lines 3-9"));
        assert!(formatted.contains("unused import"));
        assert!(formatted.contains("Open files: src/main.rs, Cargo.toml"));
    }
}
