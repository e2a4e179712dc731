//! The post-turn ACE learning loop.

use coda_ace::{Curator, GROW_REFINE_THRESHOLD, PRUNE_HARMFUL_THRESHOLD, Reflector};

use crate::session::AgentSession;

impl AgentSession {
    /// Run the reflect/curate loop for a completed turn.
    ///
    /// Reflects on the trajectory, curates delta operations, applies bullet
    /// feedback (mirroring touched bullets), applies the delta, and — when
    /// the playbook has outgrown the refine threshold — deduplicates and
    /// prunes harmful bullets, keeping the vector collection in step.
    ///
    /// Learning never fails the turn: missing prerequisites skip with a
    /// warning and internal errors are logged by the components.
    pub async fn learn_from_interaction(
        &self,
        task: &str,
        trajectory: &str,
        outcome: &serde_json::Value,
        ground_truth: Option<&serde_json::Value>,
    ) {
        let Some(playbook_handle) = self.playbook() else {
            tracing::warn!("Learning skipped: no playbook configured");
            return;
        };
        let Some(backend) = self.model_manager().current().await else {
            tracing::warn!("Learning skipped: no model loaded");
            return;
        };

        tracing::info!(task = %task.chars().take(100).collect::<String>(), "Learning started");

        let reflector = Reflector::new(backend.clone());
        let curator = match self.mirror() {
            Some(mirror) => Curator::with_mirror(backend, mirror.clone()),
            None => Curator::new(backend),
        };

        let used: Vec<String> = self.used_bullet_ids().to_vec();
        let reflection = reflector
            .reflect(
                task,
                trajectory,
                outcome,
                ground_truth,
                if used.is_empty() { None } else { Some(&used) },
                None,
            )
            .await;

        // The playbook lock is held across curation and mutation; learning
        // for the same module is serialized.
        let mut playbook = playbook_handle.lock().await;

        let operations = curator.curate(task, &reflection, &playbook).await;

        if !reflection.bullet_feedback.is_empty() {
            playbook.apply_feedback(&reflection.bullet_feedback);
            if let Some(mirror) = curator.mirror() {
                for item in &reflection.bullet_feedback {
                    if playbook.get_bullet(&item.bullet_id).is_some() {
                        playbook
                            .save_bullet_to_vector_db(
                                &item.bullet_id,
                                &mirror.store,
                                &mirror.embedder,
                                &mirror.collection,
                            )
                            .await;
                    }
                }
            }
        }

        curator.apply_delta(&mut playbook, &operations).await;

        if playbook.bullet_count() > GROW_REFINE_THRESHOLD {
            let (removed, updated) = playbook.dedup();
            let pruned = playbook.prune_harmful(PRUNE_HARMFUL_THRESHOLD);

            if let Some(mirror) = curator.mirror() {
                let mut gone = removed;
                gone.extend(pruned);
                if !gone.is_empty() {
                    if let Err(e) = mirror.store.delete_points(&mirror.collection, &gone).await {
                        tracing::warn!(error = %e, "Pruned bullet vector delete failed");
                    }
                }
                for id in updated {
                    playbook
                        .save_bullet_to_vector_db(
                            &id,
                            &mirror.store,
                            &mirror.embedder,
                            &mirror.collection,
                        )
                        .await;
                }
            }
        }

        tracing::info!(
            operations = operations.len(),
            total_bullets = playbook.bullet_count(),
            "Learning complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use coda_ace::{Playbook, VectorMirror};
    use coda_llm::{BackendFactory, MockBackend, SharedBackend};
    use coda_types::{ModelConfig, Provider, WorkspacePolicy};
    use coda_vector::{Distance, MemoryVectorStore, MockEmbedder, VectorStore};

    use crate::session::{AgentSession, AgentSessionConfig};
    use crate::tool::ToolRegistry;
    use coda_llm::ModelManager;

    fn reflection_json() -> String {
        serde_json::json!({
            "reasoning": "went fine",
            "error_identification": "none",
            "root_cause_analysis": "n/a",
            "correct_approach": "same",
            "key_insight": "list before reading",
            "bullet_feedback": [{"bullet_id": "str-seed1", "tag": "helpful"}]
        })
        .to_string()
    }

    fn curation_json() -> String {
        serde_json::json!({
            "reasoning": "one new insight",
            "operations": [{
                "type": "ADD",
                "section": "strategies_and_hard_rules",
                "content": "list before reading"
            }]
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_learning_loop_updates_playbook_and_vectors() {
        let backend = Arc::new(MockBackend::new(vec![
            MockBackend::text_response(reflection_json()),
            MockBackend::text_response(curation_json()),
        ]));
        let factory: BackendFactory = {
            let backend = backend.clone();
            Arc::new(move |_| Ok(backend.clone() as SharedBackend))
        };
        let manager = Arc::new(ModelManager::with_factory(factory).without_warmup());
        let model = ModelConfig::new(Provider::Ollama, "mock-model", "http://localhost:11434");
        manager.switch_model(model.clone()).await.unwrap();

        let store = Arc::new(MemoryVectorStore::new());
        let shared: coda_vector::SharedVectorStore = store.clone();
        shared.create_collection("ace_vscode", 8, Distance::Cosine).await.unwrap();
        let embedder: coda_vector::SharedEmbedder = Arc::new(MockEmbedder::new(8));

        let mut playbook = Playbook::new();
        playbook.add_bullet("strategies_and_hard_rules", "seed strategy", Some("str-seed1".into()));
        let playbook = Arc::new(tokio::sync::Mutex::new(playbook));

        let session = AgentSession::new(
            AgentSessionConfig::new("s1", "ws1", "vscode", model),
            manager,
            ToolRegistry::new(),
            WorkspacePolicy::default(),
        )
        .with_playbook(playbook.clone())
        .with_mirror(VectorMirror {
            embedder,
            store: shared,
            collection: "ace_vscode".to_string(),
        });

        session
            .learn_from_interaction(
                "list files",
                "user asked; agent listed",
                &serde_json::json!({"success": true}),
                None,
            )
            .await;

        let playbook = playbook.lock().await;
        // Feedback applied to the seed bullet.
        assert_eq!(playbook.get_bullet("str-seed1").unwrap().helpful_count, 1);
        // Curated ADD landed in memory and in the collection.
        assert_eq!(playbook.bullet_count(), 2);
        let point_ids = store.point_ids("ace_vscode");
        assert_eq!(point_ids.len(), 2);
        for bullet in playbook.all_bullets() {
            assert!(point_ids.contains(&bullet.id));
        }
    }

    #[tokio::test]
    async fn test_learning_skips_without_playbook() {
        let factory: BackendFactory =
            Arc::new(|_| Ok(Arc::new(MockBackend::with_text("unused")) as SharedBackend));
        let manager = Arc::new(ModelManager::with_factory(factory).without_warmup());
        let model = ModelConfig::new(Provider::Ollama, "mock-model", "http://localhost:11434");

        let session = AgentSession::new(
            AgentSessionConfig::new("s1", "ws1", "vscode", model),
            manager,
            ToolRegistry::new(),
            WorkspacePolicy::default(),
        );
        // No playbook configured: a no-op, not a panic.
        session
            .learn_from_interaction("t", "tr", &serde_json::json!({}), None)
            .await;
    }
}
