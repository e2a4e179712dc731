//! Application state shared across handlers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use coda_ace::Playbook;
use coda_agent::ApprovalBroker;
use coda_llm::ModelManager;
use coda_retrieval::ace_collection;
use coda_store::Store;
use coda_vector::{
    Distance, MemoryVectorStore, OllamaEmbedder, QdrantStore, SharedEmbedder, SharedVectorStore,
    VectorStore,
};

use crate::config::ServerConfig;
use crate::error::Result;

/// Live per-connection bookkeeping for cancellation and approvals.
#[derive(Clone)]
pub struct ActiveSession {
    /// Broker resolving this session's approval requests.
    pub approvals: Arc<ApprovalBroker>,
    /// Token cancelling this session's in-flight turns.
    pub cancel: CancellationToken,
}

/// Shared playbook handles, one per module.
type PlaybookMap = Arc<Mutex<HashMap<String, Arc<Mutex<Playbook>>>>>;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Relational store.
    pub store: Store,
    /// Singleton model manager.
    pub model_manager: Arc<ModelManager>,
    /// Shared embedding engine.
    pub embedder: SharedEmbedder,
    /// Shared vector store client.
    pub vector_store: SharedVectorStore,
    /// Per-module playbooks, loaded from the vector store on first use.
    playbooks: PlaybookMap,
    /// Sessions with a live connection.
    pub active_sessions: Arc<RwLock<HashMap<String, ActiveSession>>>,
}

impl AppState {
    /// Assemble state from configuration: open the database and construct
    /// the vector and embedding clients.
    pub fn from_config(config: ServerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .map_err(|e| crate::error::ServerError::Serve(e.to_string()))?;
        let store = Store::open(config.db_path())?;

        let vector_store: SharedVectorStore = match config.qdrant_url {
            Some(ref url) => Arc::new(QdrantStore::new(url.clone())?),
            None => Arc::new(MemoryVectorStore::new()),
        };
        let embedder: SharedEmbedder = Arc::new(OllamaEmbedder::new(
            config.default_model.url.clone(),
            config.embedding_model.clone(),
            config.embedding_dimensions,
        )?);

        Ok(Self::new(
            config,
            store,
            Arc::new(ModelManager::new()),
            embedder,
            vector_store,
        ))
    }

    /// Assemble state from pre-built parts. Tests inject mocks here.
    pub fn new(
        config: ServerConfig,
        store: Store,
        model_manager: Arc<ModelManager>,
        embedder: SharedEmbedder,
        vector_store: SharedVectorStore,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            model_manager,
            embedder,
            vector_store,
            playbooks: Arc::new(Mutex::new(HashMap::new())),
            active_sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// The shared playbook for a module, loading it from the vector store
    /// on first use (falling back to an empty playbook).
    pub async fn playbook_for(&self, module_id: &str) -> Arc<Mutex<Playbook>> {
        let mut playbooks = self.playbooks.lock().await;
        if let Some(playbook) = playbooks.get(module_id) {
            return playbook.clone();
        }

        let collection = ace_collection(module_id);
        let _ = self
            .vector_store
            .create_collection(&collection, self.embedder.dimensions(), Distance::Cosine)
            .await;
        let playbook = match Playbook::load_from_vector_db(&self.vector_store, &collection, 1000)
            .await
        {
            Ok(playbook) => {
                tracing::info!(module_id, bullets = playbook.bullet_count(), "Playbook loaded");
                playbook
            }
            Err(e) => {
                tracing::error!(module_id, error = %e, "Playbook load failed; starting empty");
                Playbook::new()
            }
        };

        let handle = Arc::new(Mutex::new(playbook));
        playbooks.insert(module_id.to_string(), handle.clone());
        handle
    }

    /// Track a connected session.
    pub async fn register_session(&self, session_id: &str, active: ActiveSession) {
        self.active_sessions
            .write()
            .await
            .insert(session_id.to_string(), active);
    }

    /// Remove a session on disconnect.
    pub async fn remove_session(&self, session_id: &str) {
        if self.active_sessions.write().await.remove(session_id).is_some() {
            tracing::info!(session_id, "Session removed from active map");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coda_vector::MockEmbedder;

    fn test_state() -> AppState {
        AppState::new(
            ServerConfig::default(),
            Store::open_in_memory().unwrap(),
            Arc::new(ModelManager::new()),
            Arc::new(MockEmbedder::new(8)),
            Arc::new(MemoryVectorStore::new()),
        )
    }

    #[tokio::test]
    async fn test_playbook_for_caches_handle() {
        let state = test_state();
        let a = state.playbook_for("vscode").await;
        let b = state.playbook_for("vscode").await;
        assert!(Arc::ptr_eq(&a, &b));

        a.lock().await.add_bullet("domain_knowledge", "fact", None);
        assert_eq!(b.lock().await.bullet_count(), 1);
    }

    #[tokio::test]
    async fn test_session_registry() {
        let state = test_state();
        state
            .register_session(
                "s1",
                ActiveSession {
                    approvals: Arc::new(ApprovalBroker::new()),
                    cancel: CancellationToken::new(),
                },
            )
            .await;
        assert!(state.active_sessions.read().await.contains_key("s1"));
        state.remove_session("s1").await;
        assert!(!state.active_sessions.read().await.contains_key("s1"));
    }
}
