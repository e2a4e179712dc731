//! The per-session WebSocket endpoint.

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use coda_ace::VectorMirror;
use coda_agent::{
    AgentEvent, AgentSession, AgentSessionConfig, ApprovalBroker, ToolRegistry,
    tools::register_builtin_tools,
};
use coda_retrieval::{Retriever, ace_collection};
use coda_store::{SessionRecord, StoreError};
use coda_types::{ModelConfig, Provider};

use crate::protocol::{ClientEvent, ServerEvent};
use crate::state::{ActiveSession, AppState};

/// Outbound queue depth per connection.
const WRITER_QUEUE_DEPTH: usize = 256;

/// Upgrade handler for `/v1/sessions/{session_id}/stream`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, session_id: String) {
    tracing::info!(session_id, "WebSocket connected");
    let (mut sink, mut source) = socket.split();

    // All outbound events flow through one queue drained by a dedicated
    // writer, so delivery order equals enqueue order.
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(WRITER_QUEUE_DEPTH);
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let model_config = state.model_manager.current_config().await;
    let _ = tx
        .send(ServerEvent::Hello {
            protocol_version: state.config.protocol_version.clone(),
            server_info: serde_json::json!({
                "version": state.config.version,
                "model": {
                    "provider": model_config
                        .as_ref()
                        .map(|m| m.provider.as_str())
                        .unwrap_or(state.config.default_model.provider.as_str()),
                    "model_name": model_config
                        .as_ref()
                        .map(|m| m.model_name.clone())
                        .unwrap_or_else(|| state.config.default_model.model_name.clone()),
                    "capabilities": ["chat", "code_completion", "refactor"],
                },
                "capabilities": ["agentic_rag", "ace", "multi_file_edit"],
            }),
        })
        .await;

    let cancel = CancellationToken::new();
    let mut connection = Connection {
        state: &state,
        session_id: &session_id,
        tx: tx.clone(),
        cancel: cancel.clone(),
        session: None,
        approvals: None,
        turn_tasks: Vec::new(),
    };

    while let Some(message) = source.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    let _ = tx
                        .send(ServerEvent::error("invalid_message", "Binary data must be UTF-8"))
                        .await;
                    continue;
                }
            },
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "WebSocket receive error");
                break;
            }
        };

        let event: ClientEvent = match serde_json::from_str(&text) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "Undecodable client event");
                let _ = tx
                    .send(ServerEvent::error("invalid_message", e.to_string()))
                    .await;
                continue;
            }
        };

        if !connection.handle(event).await {
            break;
        }
    }

    // Disconnect: cancel in-flight turns, reject approvals, drain the
    // writer, and drop the session from the active map.
    cancel.cancel();
    if let Some(approvals) = &connection.approvals {
        approvals.reject_all();
    }
    for task in connection.turn_tasks.drain(..) {
        let _ = task.await;
    }
    state.remove_session(&session_id).await;
    drop(connection);
    drop(tx);
    let _ = writer.await;
    tracing::info!(session_id, "WebSocket disconnected");
}

struct Connection<'a> {
    state: &'a AppState,
    session_id: &'a str,
    tx: mpsc::Sender<ServerEvent>,
    cancel: CancellationToken,
    session: Option<Arc<tokio::sync::Mutex<AgentSession>>>,
    approvals: Option<Arc<ApprovalBroker>>,
    turn_tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Connection<'_> {
    /// Handle one client event. Returns `false` to close the connection.
    async fn handle(&mut self, event: ClientEvent) -> bool {
        match event {
            ClientEvent::Hello { client_info } => {
                tracing::info!(session_id = %self.session_id, ?client_info, "Client hello");
                true
            }
            ClientEvent::Ping => {
                let _ = self
                    .tx
                    .send(ServerEvent::Pong {
                        timestamp: chrono::Utc::now().to_rfc3339(),
                    })
                    .await;
                true
            }
            ClientEvent::ApprovalResponse {
                request_id,
                approved,
            } => {
                tracing::info!(request_id, approved, "Approval response");
                if let Some(approvals) = &self.approvals {
                    approvals.resolve(&request_id, approved);
                }
                true
            }
            ClientEvent::Cancel => {
                tracing::info!(session_id = %self.session_id, "Client cancelled");
                false
            }
            ClientEvent::UserMessage { message, context } => {
                self.handle_user_message(message, context).await;
                true
            }
        }
    }

    async fn handle_user_message(&mut self, message: String, context: Option<serde_json::Value>) {
        // The user row is persisted before the turn starts.
        if let Err(e) = self.state.store.append_message(
            self.session_id,
            "user",
            &message,
            context.as_ref(),
            None,
        ) {
            let code = match e {
                StoreError::NotFound { .. } => "session_not_found",
                _ => "storage_error",
            };
            let _ = self.tx.send(ServerEvent::error(code, e.to_string())).await;
            return;
        }

        let session = match self.get_or_create_session(context.as_ref()).await {
            Some(session) => session,
            None => return,
        };

        let tx = self.tx.clone();
        let cancel = self.cancel.clone();
        let store = self.state.store.clone();
        let session_id = self.session_id.to_string();
        let ace_learning = self.state.config.ace_learning;

        let task = tokio::spawn(async move {
            // The session lock serializes turns; only one processes at a time.
            let mut session = session.lock().await;

            let (ev_tx, mut ev_rx) = mpsc::channel::<AgentEvent>(WRITER_QUEUE_DEPTH);
            let mut deltas = String::new();
            let mut final_message: Option<String> = None;
            let mut final_metadata: Option<serde_json::Value> = None;
            let mut trajectory = vec![format!("user: {}", message)];

            let forward = async {
                while let Some(event) = ev_rx.recv().await {
                    match &event {
                        AgentEvent::MessageDelta { delta } => deltas.push_str(delta),
                        AgentEvent::ToolUse { tool, arguments } => {
                            trajectory.push(format!("tool_use {}: {}", tool, arguments));
                        }
                        AgentEvent::ToolResult { tool, result } => {
                            trajectory.push(format!(
                                "tool_result {}: success={}",
                                tool, result["success"]
                            ));
                        }
                        AgentEvent::MessageFinal { message, metadata } => {
                            final_message = Some(message.clone());
                            final_metadata = Some(metadata.clone());
                        }
                        _ => {}
                    }
                    let _ = tx.send(event.into()).await;
                }
            };
            let run = async {
                session
                    .process_message(&message, context.as_ref(), &ev_tx, &cancel)
                    .await;
                drop(ev_tx);
            };
            tokio::join!(run, forward);

            // The assistant row falls back to accumulated deltas when the
            // turn errored after partial output.
            let assistant_text = final_message
                .clone()
                .unwrap_or_else(|| deltas.trim().to_string());
            if !assistant_text.is_empty() {
                if let Err(e) = store.append_message(
                    &session_id,
                    "assistant",
                    &assistant_text,
                    None,
                    final_metadata.as_ref(),
                ) {
                    tracing::warn!(session_id, error = %e, "Assistant row persist failed");
                }
            }

            if ace_learning && final_message.is_some() && !cancel.is_cancelled() {
                trajectory.push(format!("assistant: {}", assistant_text));
                let outcome = final_metadata.unwrap_or_else(|| serde_json::json!({}));
                session
                    .learn_from_interaction(&message, &trajectory.join("\n"), &outcome, None)
                    .await;
            }
        });
        self.turn_tasks.push(task);
        self.turn_tasks.retain(|task| !task.is_finished());
    }

    /// Build the agent session on first use, resolving the session row's
    /// model overrides and workspace policy.
    async fn get_or_create_session(
        &mut self,
        context: Option<&serde_json::Value>,
    ) -> Option<Arc<tokio::sync::Mutex<AgentSession>>> {
        if let Some(session) = &self.session {
            return Some(session.clone());
        }

        let row = match self.state.store.get_session(self.session_id) {
            Ok(row) => row,
            Err(e) => {
                let _ = self
                    .tx
                    .send(ServerEvent::error("session_not_found", e.to_string()))
                    .await;
                return None;
            }
        };
        let (_, workspace_path) = match self.state.store.get_workspace(&row.workspace_id) {
            Ok(workspace) => workspace,
            Err(e) => {
                let _ = self
                    .tx
                    .send(ServerEvent::error("workspace_not_found", e.to_string()))
                    .await;
                return None;
            }
        };
        let policy = match self.state.store.get_policy(&row.workspace_id) {
            Ok(policy) => policy,
            Err(e) => {
                tracing::warn!(error = %e, "Policy load failed; using defaults");
                Default::default()
            }
        };

        let module_id = context
            .and_then(|c| c["module_id"].as_str())
            .unwrap_or(&self.state.config.module_id)
            .to_string();
        let model = resolve_model(&row, &self.state.config.default_model);

        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry, FsPath::new(&workspace_path), &policy);

        let retriever = Arc::new(
            Retriever::new(
                module_id.clone(),
                self.state.embedder.clone(),
                self.state.vector_store.clone(),
            )
            .with_store(self.state.store.clone())
            .with_workspace_path(&workspace_path),
        );
        let playbook = self.state.playbook_for(&module_id).await;
        let mirror = VectorMirror {
            embedder: self.state.embedder.clone(),
            store: self.state.vector_store.clone(),
            collection: ace_collection(&module_id),
        };

        let config = AgentSessionConfig::new(
            self.session_id,
            row.workspace_id.clone(),
            module_id.clone(),
            model,
        );
        let session = AgentSession::new(
            config,
            self.state.model_manager.clone(),
            registry,
            policy,
        )
        .with_retriever(retriever)
        .with_playbook(playbook)
        .with_mirror(mirror)
        .with_store(self.state.store.clone());

        let approvals = session.approvals();
        self.state
            .register_session(
                self.session_id,
                ActiveSession {
                    approvals: approvals.clone(),
                    cancel: self.cancel.clone(),
                },
            )
            .await;

        tracing::info!(
            session_id = %self.session_id,
            workspace_path,
            module_id,
            "Agent session created"
        );

        let session = Arc::new(tokio::sync::Mutex::new(session));
        self.approvals = Some(approvals);
        self.session = Some(session.clone());
        Some(session)
    }
}

/// Session-row model overrides on top of the server default.
fn resolve_model(row: &SessionRecord, default: &ModelConfig) -> ModelConfig {
    let provider = row
        .model_provider
        .as_deref()
        .and_then(Provider::parse)
        .unwrap_or(default.provider);
    let model_name = row
        .model_name
        .clone()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| default.model_name.clone());
    let url = row
        .model_url
        .clone()
        .filter(|url| !url.is_empty())
        .unwrap_or_else(|| default.url.clone());

    ModelConfig {
        provider,
        model_name,
        url,
        context_window: row.context_window.unwrap_or(default.context_window),
        temperature: row.temperature.unwrap_or(default.temperature),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_model_overrides() {
        let default = ModelConfig::new(Provider::Ollama, "default-model", "http://localhost:11434");
        let row = SessionRecord {
            id: "s1".into(),
            workspace_id: "ws1".into(),
            agent_config_id: None,
            model_provider: Some("vllm".into()),
            model_name: Some("big-model".into()),
            model_url: Some(String::new()), // empty falls back
            context_window: Some(32768),
            temperature: None,
            title: None,
            status: "active".into(),
            message_count: 0,
        };

        let model = resolve_model(&row, &default);
        assert_eq!(model.provider, Provider::Vllm);
        assert_eq!(model.model_name, "big-model");
        assert_eq!(model.url, "http://localhost:11434");
        assert_eq!(model.context_window, 32768);
        assert_eq!(model.temperature, default.temperature);
    }
}
