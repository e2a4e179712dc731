//! The reflector: distills a trajectory into structured insights.

use coda_llm::{ChatMessage, ChatRequest, SharedBackend, StreamEvent};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::playbook::{BulletFeedback, FeedbackTag};

/// Default refinement rounds before giving up on valid JSON.
pub const DEFAULT_MAX_ROUNDS: usize = 5;

/// A structured reflection over one task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reflection {
    /// Detailed analysis of the execution.
    pub reasoning: String,
    /// What specifically went wrong.
    pub error_identification: String,
    /// Why it went wrong.
    pub root_cause_analysis: String,
    /// What should have been done instead.
    pub correct_approach: String,
    /// The principle to remember.
    pub key_insight: String,
    /// Feedback on the bullets that were surfaced for the turn.
    #[serde(default)]
    pub bullet_feedback: Vec<BulletFeedback>,
}

const REQUIRED_FIELDS: [&str; 5] = [
    "reasoning",
    "error_identification",
    "root_cause_analysis",
    "correct_approach",
    "key_insight",
];

/// Reflector component of ACE.
pub struct Reflector {
    backend: SharedBackend,
    max_rounds: usize,
}

impl Reflector {
    /// Create a reflector with the default round limit.
    pub fn new(backend: SharedBackend) -> Self {
        Self {
            backend,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    /// Reflect on a trajectory.
    ///
    /// Accepts the first response that parses to JSON with all five
    /// required fields; otherwise feeds the malformed response back with a
    /// corrective nudge and retries. Exhausting `max_rounds` yields a
    /// default filler reflection.
    pub async fn reflect(
        &self,
        task: &str,
        trajectory: &str,
        outcome: &serde_json::Value,
        ground_truth: Option<&serde_json::Value>,
        used_bullet_ids: Option<&[String]>,
        max_rounds: Option<usize>,
    ) -> Reflection {
        let max_rounds = max_rounds.unwrap_or(self.max_rounds);
        let prompt = build_reflection_prompt(task, trajectory, outcome, ground_truth, used_bullet_ids);
        let mut messages = vec![
            ChatMessage::system(REFLECTOR_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ];

        for round in 0..max_rounds {
            tracing::info!(round = round + 1, "Reflection round");

            let request = ChatRequest::new(messages.clone()).with_temperature(0.7);
            let mut response_text = String::new();
            let mut stream = match self.backend.stream(request).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "Reflection request failed");
                    break;
                }
            };
            let mut stream_failed = false;
            while let Some(event) = stream.next().await {
                match event {
                    Ok(StreamEvent::Content { text }) => response_text.push_str(&text),
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "Reflection stream failed");
                        stream_failed = true;
                        break;
                    }
                }
            }
            if stream_failed {
                break;
            }

            if let Some(reflection) = parse_reflection(&response_text) {
                tracing::info!(rounds = round + 1, "Reflection complete");
                return reflection;
            }
            tracing::warn!(round = round + 1, "Reflection response was not valid JSON");

            if round + 1 < max_rounds {
                messages.push(ChatMessage::assistant(response_text));
                messages.push(ChatMessage::user(
                    "Please provide a valid JSON response with all required fields.",
                ));
            }
        }

        default_reflection()
    }
}

fn parse_reflection(text: &str) -> Option<Reflection> {
    let value: serde_json::Value = serde_json::from_str(text.trim()).ok()?;
    if !REQUIRED_FIELDS.iter().all(|field| value.get(field).is_some()) {
        return None;
    }

    let field = |name: &str| value[name].as_str().unwrap_or_default().to_string();
    // Feedback entries are parsed individually so one malformed item (or an
    // unknown tag, which reads as neutral) does not sink the reflection.
    let bullet_feedback = value["bullet_feedback"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let bullet_id = item["bullet_id"].as_str()?.to_string();
                    let tag = match item["tag"].as_str()? {
                        "helpful" => FeedbackTag::Helpful,
                        "harmful" => FeedbackTag::Harmful,
                        _ => FeedbackTag::Neutral,
                    };
                    Some(BulletFeedback { bullet_id, tag })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(Reflection {
        reasoning: field("reasoning"),
        error_identification: field("error_identification"),
        root_cause_analysis: field("root_cause_analysis"),
        correct_approach: field("correct_approach"),
        key_insight: field("key_insight"),
        bullet_feedback,
    })
}

fn default_reflection() -> Reflection {
    Reflection {
        reasoning: "Unable to generate detailed reflection".to_string(),
        error_identification: "Unknown error".to_string(),
        root_cause_analysis: "Unable to determine root cause".to_string(),
        correct_approach: "Review the execution trace manually".to_string(),
        key_insight: "Ensure proper error handling and validation".to_string(),
        bullet_feedback: Vec::new(),
    }
}

const REFLECTOR_SYSTEM_PROMPT: &str = "You are an expert code analyst and educator. Your role is to:

1. Analyze execution traces to identify errors and successes
2. Extract concrete, actionable insights
3. Diagnose root causes, not just symptoms
4. Provide specific corrections and strategies

Focus on:
- What went wrong and why
- What conceptual misunderstandings occurred
- What should be done differently
- What principles should be remembered

Be specific, concrete, and actionable in your insights.";

fn build_reflection_prompt(
    task: &str,
    trajectory: &str,
    outcome: &serde_json::Value,
    ground_truth: Option<&serde_json::Value>,
    used_bullet_ids: Option<&[String]>,
) -> String {
    let mut parts = vec![
        "Analyze the following task execution and provide insights.\n".to_string(),
        format!("\n**Task:**\n{}\n", task),
        format!("\n**Execution Trajectory:**\n{}\n", trajectory),
        format!(
            "\n**Outcome:**\n{}\n",
            serde_json::to_string_pretty(outcome).unwrap_or_default()
        ),
    ];

    if let Some(ground_truth) = ground_truth {
        parts.push(format!("\n**Ground Truth:**\n{}\n", ground_truth));
    }
    if let Some(bullet_ids) = used_bullet_ids {
        if !bullet_ids.is_empty() {
            parts.push("\n**Playbook Bullets Used:**\n".to_string());
            for id in bullet_ids {
                parts.push(format!("- {}\n", id));
            }
        }
    }

    parts.push(
        r#"
**Your Task:**
Provide a detailed reflection analyzing what went wrong (or what went right).

**Output Format (JSON):**
```json
{
    "reasoning": "Your detailed analysis of the execution",
    "error_identification": "What specifically went wrong",
    "root_cause_analysis": "Why this error occurred and what was misunderstood",
    "correct_approach": "What should have been done instead",
    "key_insight": "The key principle or strategy to remember",
    "bullet_feedback": [
        {"bullet_id": "str-00001", "tag": "helpful"},
        {"bullet_id": "api-00002", "tag": "harmful"}
    ]
}
```

Tags: "helpful", "harmful", or "neutral"
"#
        .to_string(),
    );

    parts.concat()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playbook::FeedbackTag;
    use coda_llm::MockBackend;
    use std::sync::Arc;

    fn valid_json() -> String {
        serde_json::json!({
            "reasoning": "the model guessed the path",
            "error_identification": "wrong file read",
            "root_cause_analysis": "no directory listing first",
            "correct_approach": "list before reading",
            "key_insight": "enumerate, then act",
            "bullet_feedback": [
                {"bullet_id": "str-1", "tag": "helpful"},
                {"bullet_id": "api-2", "tag": "neutral"}
            ]
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_accepts_valid_first_round() {
        let backend: SharedBackend = Arc::new(MockBackend::with_text(valid_json()));
        let reflector = Reflector::new(backend);

        let reflection = reflector
            .reflect("task", "trace", &serde_json::json!({"success": false}), None, None, None)
            .await;
        assert_eq!(reflection.key_insight, "enumerate, then act");
        assert_eq!(reflection.bullet_feedback.len(), 2);
        assert_eq!(reflection.bullet_feedback[1].tag, FeedbackTag::Neutral);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let backend = Arc::new(MockBackend::new(vec![
            MockBackend::text_response("I think the problem was..."),
            MockBackend::text_response(valid_json()),
        ]));
        let reflector = Reflector::new(backend.clone() as SharedBackend);

        let reflection = reflector
            .reflect("task", "trace", &serde_json::json!({}), None, None, Some(3))
            .await;
        assert_eq!(reflection.key_insight, "enumerate, then act");
        assert_eq!(backend.request_count(), 2);

        // The retry carried the malformed response and a nudge.
        let second_request = &backend.requests()[1];
        let last = second_request.messages.last().unwrap();
        assert!(last.content.contains("valid JSON"));
    }

    #[tokio::test]
    async fn test_exhaustion_returns_default() {
        let backend = Arc::new(MockBackend::new(vec![
            MockBackend::text_response("nope"),
            MockBackend::text_response("{\"reasoning\": \"missing fields\"}"),
        ]));
        let reflector = Reflector::new(backend as SharedBackend);

        let reflection = reflector
            .reflect("task", "trace", &serde_json::json!({}), None, None, Some(2))
            .await;
        assert_eq!(reflection.error_identification, "Unknown error");
        assert!(reflection.bullet_feedback.is_empty());
    }
}
