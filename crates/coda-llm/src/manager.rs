//! Model manager: single-active-model lifecycle with hot-swap.
//!
//! At most one model is resident at a time. Switches are serialized by a
//! switch lock, wait for in-flight inference to drain, unload via the
//! provider's strategy, and warm the new model with a one-token request so
//! residency is forced before the switch commits.

use std::sync::Arc;
use std::time::{Duration, Instant};

use coda_types::{ModelConfig, Provider};
use tokio::sync::Mutex;

use crate::backend::SharedBackend;
use crate::error::{LlmError, Result};
use crate::ollama::OllamaBackend;
use crate::openai_compat::OpenAiCompatBackend;
use crate::types::{ChatMessage, ChatRequest};

/// Default bound on waiting for in-flight requests before a switch fails.
pub const DEFAULT_SWITCH_WAIT: Duration = Duration::from_secs(30);

/// Pause between unload and load so the provider can release VRAM.
const SETTLE_INTERVAL: Duration = Duration::from_secs(2);

/// Poll interval while waiting for the refcount to drain.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Constructs a backend for a config. Injected so tests can substitute mocks.
pub type BackendFactory = Arc<dyn Fn(&ModelConfig) -> Result<SharedBackend> + Send + Sync>;

/// The default factory covering all supported providers.
pub fn default_backend_factory() -> BackendFactory {
    Arc::new(|config: &ModelConfig| -> Result<SharedBackend> {
        Ok(match config.provider {
            Provider::Ollama => Arc::new(OllamaBackend::new(config.clone())?),
            Provider::Vllm | Provider::Llamacpp => {
                Arc::new(OpenAiCompatBackend::new(config.clone())?)
            }
        })
    })
}

struct ManagerState {
    current: Option<(ModelConfig, SharedBackend)>,
}

/// Owns the single active LLM backend and serializes model switches.
pub struct ModelManager {
    state: Mutex<ManagerState>,
    refcount: parking_lot::Mutex<usize>,
    factory: BackendFactory,
    switch_wait: Duration,
    settle_interval: Duration,
    warmup: bool,
}

impl ModelManager {
    /// Create a manager using the default backend factory.
    pub fn new() -> Self {
        Self::with_factory(default_backend_factory())
    }

    /// Create a manager with an injected backend factory.
    pub fn with_factory(factory: BackendFactory) -> Self {
        Self {
            state: Mutex::new(ManagerState { current: None }),
            refcount: parking_lot::Mutex::new(0),
            factory,
            switch_wait: DEFAULT_SWITCH_WAIT,
            settle_interval: SETTLE_INTERVAL,
            warmup: true,
        }
    }

    /// Override the drain-wait bound. Intended for tests.
    pub fn with_switch_wait(mut self, wait: Duration) -> Self {
        self.switch_wait = wait;
        self
    }

    /// Skip the settle pause and warmup request. Intended for tests.
    pub fn without_warmup(mut self) -> Self {
        self.settle_interval = Duration::ZERO;
        self.warmup = false;
        self
    }

    /// Register an in-flight inference request. The returned guard blocks
    /// model unloads until dropped; hold it across the whole stream.
    pub fn acquire_for_inference(self: &Arc<Self>) -> InferenceGuard {
        let mut count = self.refcount.lock();
        *count += 1;
        tracing::debug!(active_requests = *count, "Inference acquired");
        InferenceGuard {
            manager: Arc::clone(self),
        }
    }

    /// In-flight inference requests.
    pub fn active_requests(&self) -> usize {
        *self.refcount.lock()
    }

    /// The active backend, if a model is loaded.
    pub async fn current(&self) -> Option<SharedBackend> {
        self.state.lock().await.current.as_ref().map(|(_, b)| b.clone())
    }

    /// The active model configuration, if a model is loaded.
    pub async fn current_config(&self) -> Option<ModelConfig> {
        self.state.lock().await.current.as_ref().map(|(c, _)| c.clone())
    }

    /// Whether any model is loaded.
    pub async fn is_loaded(&self) -> bool {
        self.state.lock().await.current.is_some()
    }

    /// Ensure `config` is the active model, switching if needed.
    pub async fn ensure_loaded(&self, config: ModelConfig) -> Result<SharedBackend> {
        self.switch_model(config).await
    }

    /// Switch to a different model (hot-swap).
    ///
    /// Same provider/model/url as the active model just updates the tuning
    /// fields. Otherwise the switch drains the refcount (bounded), unloads,
    /// settles, loads and warms the new model, and commits. On a failed load
    /// the previous config is reloaded once; a second failure leaves the
    /// manager unloaded and surfaces the original error.
    pub async fn switch_model(&self, config: ModelConfig) -> Result<SharedBackend> {
        // The state mutex doubles as the switch lock; it is held for the
        // entire unload/load sequence.
        let mut state = self.state.lock().await;

        if let Some((ref mut current_config, ref backend)) = state.current {
            if current_config.same_model(&config) {
                if !current_config.same_tuning(&config) {
                    tracing::info!(
                        model = %config,
                        context_window = config.context_window,
                        temperature = config.temperature,
                        "Model config updated in place"
                    );
                    *current_config = config;
                } else {
                    tracing::debug!(model = %config, "Model already loaded");
                }
                return Ok(backend.clone());
            }
        }

        tracing::info!(
            old_model = %state.current.as_ref().map(|(c, _)| c.to_string()).unwrap_or_else(|| "none".into()),
            new_model = %config,
            "Model switch started"
        );

        // Drain before touching state so a timeout keeps the current model.
        if state.current.is_some() {
            self.wait_for_drain().await?;
        }

        let old = state.current.take();
        if let Some((ref old_config, ref old_backend)) = old {
            match old_backend.unload().await {
                Ok(()) => {}
                Err(LlmError::HotSwapUnsupported(provider)) => {
                    tracing::warn!(%provider, model = %old_config, "Provider cannot unload in place");
                }
                Err(e) => {
                    tracing::warn!(model = %old_config, error = %e, "Unload failed");
                }
            }
            if !self.settle_interval.is_zero() {
                tokio::time::sleep(self.settle_interval).await;
            }
        }

        match self.load(&config).await {
            Ok(backend) => {
                state.current = Some((config.clone(), backend.clone()));
                tracing::info!(model = %config, "Model switch complete");
                Ok(backend)
            }
            Err(e) => {
                tracing::error!(model = %config, error = %e, "Model load failed");
                if let Some((old_config, _)) = old {
                    tracing::warn!(model = %old_config, "Attempting rollback to previous model");
                    match self.load(&old_config).await {
                        Ok(backend) => {
                            state.current = Some((old_config, backend));
                        }
                        Err(rollback_err) => {
                            tracing::error!(error = %rollback_err, "Rollback failed; no model loaded");
                        }
                    }
                }
                Err(e)
            }
        }
    }

    /// Shut down: wait for in-flight requests, unload, clear state.
    pub async fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.current.is_some() {
            self.wait_for_drain().await?;
        }
        if let Some((config, backend)) = state.current.take() {
            if let Err(e) = backend.unload().await {
                tracing::warn!(model = %config, error = %e, "Unload during shutdown failed");
            }
            tracing::info!(model = %config, "Model manager shut down");
        }
        Ok(())
    }

    async fn wait_for_drain(&self) -> Result<()> {
        let start = Instant::now();
        loop {
            let active = self.active_requests();
            if active == 0 {
                return Ok(());
            }
            if start.elapsed() > self.switch_wait {
                return Err(LlmError::SwitchTimeout { active });
            }
            tracing::info!(
                active_requests = active,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Waiting for in-flight requests before unload"
            );
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    async fn load(&self, config: &ModelConfig) -> Result<SharedBackend> {
        tracing::info!(model = %config, "Loading model");
        let backend = (self.factory)(config)?;

        if self.warmup {
            // One token is enough to force residency before the switch commits.
            use futures::StreamExt;
            let warmup_request =
                ChatRequest::new(vec![ChatMessage::user("test")]).with_max_tokens(1);
            let mut stream = backend.stream(warmup_request).await?;
            if let Some(event) = stream.next().await {
                event?;
            }
            tracing::info!(model = %config, "Model warmed up");
        }

        Ok(backend)
    }
}

impl Default for ModelManager {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard registering one in-flight inference request.
pub struct InferenceGuard {
    manager: Arc<ModelManager>,
}

impl Drop for InferenceGuard {
    fn drop(&mut self) {
        let mut count = self.manager.refcount.lock();
        *count = count.saturating_sub(1);
        tracing::debug!(active_requests = *count, "Inference released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;

    fn mock_factory() -> BackendFactory {
        Arc::new(|_config: &ModelConfig| -> Result<SharedBackend> {
            Ok(Arc::new(MockBackend::new(vec![
                MockBackend::text_response("warm"),
                MockBackend::text_response("ready"),
            ])))
        })
    }

    /// Factory that fails on exactly the given (1-based) call numbers.
    fn flaky_factory(fail_calls: &'static [usize]) -> BackendFactory {
        let calls = Arc::new(parking_lot::Mutex::new(0usize));
        Arc::new(move |_config: &ModelConfig| -> Result<SharedBackend> {
            let mut count = calls.lock();
            *count += 1;
            if fail_calls.contains(&*count) {
                Err(LlmError::Backend("load refused".to_string()))
            } else {
                Ok(Arc::new(MockBackend::new(vec![
                    MockBackend::text_response("warm"),
                    MockBackend::text_response("ready"),
                ])))
            }
        })
    }

    fn config(name: &str) -> ModelConfig {
        ModelConfig::new(Provider::Ollama, name, "http://localhost:11434")
    }

    #[tokio::test]
    async fn test_switch_loads_model() {
        let manager = ModelManager::with_factory(mock_factory()).without_warmup();
        assert!(!manager.is_loaded().await);

        manager.switch_model(config("a")).await.unwrap();
        assert!(manager.is_loaded().await);
        assert_eq!(manager.current_config().await.unwrap().model_name, "a");
    }

    #[tokio::test]
    async fn test_same_model_updates_tuning_without_reload() {
        let manager = ModelManager::with_factory(mock_factory()).without_warmup();
        manager.switch_model(config("a")).await.unwrap();

        let mut updated = config("a");
        updated.temperature = 0.1;
        updated.context_window = 32768;
        manager.switch_model(updated).await.unwrap();

        let current = manager.current_config().await.unwrap();
        assert_eq!(current.temperature, 0.1);
        assert_eq!(current.context_window, 32768);
    }

    #[tokio::test]
    async fn test_switch_blocks_on_refcount() {
        let manager = Arc::new(
            ModelManager::with_factory(mock_factory())
                .without_warmup()
                .with_switch_wait(Duration::from_millis(100)),
        );
        manager.switch_model(config("a")).await.unwrap();

        let guard = manager.acquire_for_inference();
        let err = manager.switch_model(config("b")).await.unwrap_err();
        assert!(matches!(err, LlmError::SwitchTimeout { active: 1 }));
        // Timed-out switch keeps the current model.
        assert_eq!(manager.current_config().await.unwrap().model_name, "a");

        drop(guard);
        manager.switch_model(config("b")).await.unwrap();
        assert_eq!(manager.current_config().await.unwrap().model_name, "b");
    }

    #[tokio::test]
    async fn test_switch_proceeds_after_release() {
        let manager = Arc::new(
            ModelManager::with_factory(mock_factory())
                .without_warmup()
                .with_switch_wait(Duration::from_secs(5)),
        );
        manager.switch_model(config("a")).await.unwrap();

        let guard = manager.acquire_for_inference();
        let guard2 = manager.acquire_for_inference();
        assert_eq!(manager.active_requests(), 2);

        let mgr = Arc::clone(&manager);
        let switch = tokio::spawn(async move { mgr.switch_model(config("b")).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!switch.is_finished());
        drop(guard);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!switch.is_finished());
        drop(guard2);

        switch.await.unwrap().unwrap();
        assert_eq!(manager.current_config().await.unwrap().model_name, "b");
    }

    #[tokio::test]
    async fn test_rollback_restores_previous_model() {
        // Call 1 loads a, call 2 (load b) fails, call 3 (rollback) succeeds.
        let manager = ModelManager::with_factory(flaky_factory(&[2])).without_warmup();
        manager.switch_model(config("a")).await.unwrap();

        let err = manager.switch_model(config("b")).await.unwrap_err();
        assert!(matches!(err, LlmError::Backend(_)));
        assert_eq!(manager.current_config().await.unwrap().model_name, "a");
    }

    #[tokio::test]
    async fn test_double_failure_leaves_unloaded() {
        // Load b and the rollback to a both fail; the original error surfaces
        // and nothing is resident.
        let manager = ModelManager::with_factory(flaky_factory(&[2, 3])).without_warmup();
        manager.switch_model(config("a")).await.unwrap();

        let err = manager.switch_model(config("b")).await.unwrap_err();
        assert!(matches!(err, LlmError::Backend(_)));
        assert!(!manager.is_loaded().await);
    }

    #[tokio::test]
    async fn test_shutdown_unloads() {
        let manager = ModelManager::with_factory(mock_factory()).without_warmup();
        manager.switch_model(config("a")).await.unwrap();
        manager.shutdown().await.unwrap();
        assert!(!manager.is_loaded().await);
    }
}
