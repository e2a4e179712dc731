//! The curator: synthesizes reflections into delta operations and merges
//! them into the playbook deterministically.

use coda_llm::{ChatMessage, ChatRequest, SharedBackend, StreamEvent};
use coda_vector::{SharedEmbedder, SharedVectorStore};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::json::extract_json_object;
use crate::playbook::Playbook;
use crate::reflector::Reflection;

/// Vector-mirroring configuration: where playbook mutations are persisted.
#[derive(Clone)]
pub struct VectorMirror {
    /// Embedder for bullet content.
    pub embedder: SharedEmbedder,
    /// The vector store.
    pub store: SharedVectorStore,
    /// The `ace_<module>` collection.
    pub collection: String,
}

/// One delta operation produced by curation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CuratorOp {
    /// `ADD`, `UPDATE`, or `REMOVE`.
    #[serde(rename = "type")]
    pub op_type: String,
    /// Target section (ADD).
    #[serde(default)]
    pub section: Option<String>,
    /// Bullet content (ADD, UPDATE).
    #[serde(default)]
    pub content: Option<String>,
    /// Target bullet (UPDATE, REMOVE).
    #[serde(default)]
    pub bullet_id: Option<String>,
}

/// Curator component of ACE.
pub struct Curator {
    backend: SharedBackend,
    mirror: Option<VectorMirror>,
}

impl Curator {
    /// Create a curator without vector mirroring.
    pub fn new(backend: SharedBackend) -> Self {
        tracing::info!(has_vector_storage = false, "Curator initialized");
        Self {
            backend,
            mirror: None,
        }
    }

    /// Create a curator that mirrors mutations into a vector collection.
    pub fn with_mirror(backend: SharedBackend, mirror: VectorMirror) -> Self {
        tracing::info!(
            has_vector_storage = true,
            collection = %mirror.collection,
            "Curator initialized"
        );
        Self {
            backend,
            mirror: Some(mirror),
        }
    }

    /// Curate a reflection into delta operations.
    ///
    /// Requests a JSON response, tolerates fenced or wrapped output, and
    /// returns an empty list on any parse failure. Never errors.
    pub async fn curate(
        &self,
        task: &str,
        reflection: &Reflection,
        playbook: &Playbook,
    ) -> Vec<CuratorOp> {
        let prompt = build_curation_prompt(task, reflection, playbook);
        let request = ChatRequest::new(vec![
            ChatMessage::system(CURATOR_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ])
        .with_temperature(0.7)
        .with_json_format();

        let mut response_text = String::new();
        let mut stream = match self.backend.stream(request).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(error = %e, "Curation request failed");
                return Vec::new();
            }
        };
        while let Some(event) = stream.next().await {
            match event {
                Ok(StreamEvent::Content { text }) => response_text.push_str(&text),
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Curation stream failed");
                    return Vec::new();
                }
            }
        }

        let Some(parsed) = extract_json_object(&response_text) else {
            let preview: String = response_text.chars().take(200).collect();
            tracing::error!(
                response_length = response_text.len(),
                preview = %preview.replace('\n', "\\n"),
                "Curation response was not valid JSON"
            );
            return Vec::new();
        };

        let operations: Vec<CuratorOp> = parsed["operations"]
            .as_array()
            .map(|array| {
                array
                    .iter()
                    .filter_map(|op| serde_json::from_value(op.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();

        tracing::info!(operations = operations.len(), "Curation complete");
        operations
    }

    /// Apply delta operations to the playbook, mirroring each change into
    /// the vector collection when configured.
    pub async fn apply_delta(&self, playbook: &mut Playbook, operations: &[CuratorOp]) {
        for op in operations {
            match op.op_type.as_str() {
                "ADD" => {
                    let (Some(section), Some(content)) = (&op.section, &op.content) else {
                        tracing::warn!("ADD operation missing section or content");
                        continue;
                    };
                    let bullet_id = playbook.add_bullet(section, content.clone(), None);
                    if let Some(ref mirror) = self.mirror {
                        playbook
                            .save_bullet_to_vector_db(
                                &bullet_id,
                                &mirror.store,
                                &mirror.embedder,
                                &mirror.collection,
                            )
                            .await;
                    }
                }
                "UPDATE" => {
                    let (Some(bullet_id), Some(content)) = (&op.bullet_id, &op.content) else {
                        continue;
                    };
                    if playbook.update_bullet_content(bullet_id, content.clone()) {
                        if let Some(ref mirror) = self.mirror {
                            playbook
                                .save_bullet_to_vector_db(
                                    bullet_id,
                                    &mirror.store,
                                    &mirror.embedder,
                                    &mirror.collection,
                                )
                                .await;
                        }
                    }
                }
                "REMOVE" => {
                    let Some(bullet_id) = &op.bullet_id else {
                        continue;
                    };
                    if playbook.remove_bullet(bullet_id) {
                        if let Some(ref mirror) = self.mirror {
                            Playbook::delete_bullet_from_vector_db(
                                bullet_id,
                                &mirror.store,
                                &mirror.collection,
                            )
                            .await;
                        }
                    }
                }
                other => tracing::warn!(op_type = other, "Unknown curator operation"),
            }
        }
        tracing::info!(operations = operations.len(), "Delta applied");
    }

    /// The mirror, if configured. Used by the learning loop to persist
    /// grow-and-refine results.
    pub fn mirror(&self) -> Option<&VectorMirror> {
        self.mirror.as_ref()
    }
}

const CURATOR_SYSTEM_PROMPT: &str = "You are a master curator of knowledge for coding agents.

Your role is to:
1. Synthesize reflections into actionable insights
2. Avoid redundancy with existing knowledge
3. Create structured, incremental updates
4. Maintain playbook quality and organization

Focus on:
- Concrete, specific insights
- Actionable strategies
- Clear corrections to errors
- Reusable patterns and principles

Output ONLY valid JSON with the specified structure. Do not include markdown or code fences.";

fn build_curation_prompt(task: &str, reflection: &Reflection, playbook: &Playbook) -> String {
    let reflection_json =
        serde_json::to_string_pretty(reflection).unwrap_or_else(|_| "{}".to_string());
    format!(
        r#"You are curating a coding agent's playbook. Based on a reflection, identify what NEW insights should be added.

**Task Context:**
{task}

**Current Playbook:**
{playbook}

**Reflection:**
{reflection_json}

**Your Task:**
Identify ONLY NEW insights, strategies, or corrections that are MISSING from the current playbook.

**Rules:**
1. Avoid redundancy - only add content that complements existing bullets
2. Be specific and actionable
3. Focus on quality over quantity
4. For code-related insights, include actual code patterns or API schemas

**Output Format (JSON only, no markdown or code fences):**
{{
    "reasoning": "Your analysis of what needs to be added",
    "operations": [
        {{
            "type": "ADD",
            "section": "strategies_and_hard_rules",
            "content": "Specific strategy or rule to add"
        }}
    ]
}}

**Available Sections:**
- strategies_and_hard_rules: General strategies and important rules
- useful_code_snippets: Code patterns and templates
- troubleshooting_and_pitfalls: Common errors and how to avoid them
- apis_and_schemas: API usage patterns and response schemas
- domain_knowledge: Domain-specific concepts and facts

**Operation Types:**
- ADD: Create new bullet point
- UPDATE: Modify existing bullet (requires bullet_id)
- REMOVE: Delete bullet (requires bullet_id)
"#,
        task = task,
        playbook = playbook.to_text(),
        reflection_json = reflection_json,
    )
}
