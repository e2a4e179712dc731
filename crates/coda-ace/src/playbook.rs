//! The playbook: bullets, sections, feedback, and vector mirroring.

use std::collections::HashMap;

use coda_vector::{Point, SharedEmbedder, SharedVectorStore};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Sections every playbook starts with. Unknown sections are created on
/// demand by curator operations.
pub const SEED_SECTIONS: [&str; 5] = [
    "strategies_and_hard_rules",
    "useful_code_snippets",
    "troubleshooting_and_pitfalls",
    "apis_and_schemas",
    "domain_knowledge",
];

/// One unit of learned guidance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bullet {
    /// Opaque id, unique within the playbook.
    pub id: String,
    /// Owning section.
    pub section: String,
    /// Guidance text.
    pub content: String,
    /// Times this bullet was tagged helpful.
    #[serde(default)]
    pub helpful_count: u32,
    /// Times this bullet was tagged harmful.
    #[serde(default)]
    pub harmful_count: u32,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Bullet {
    /// Quality score: helpful / (helpful + harmful); 0.5 with no feedback.
    pub fn quality(&self) -> f32 {
        let total = self.helpful_count + self.harmful_count;
        if total == 0 {
            0.5
        } else {
            self.helpful_count as f32 / total as f32
        }
    }

    /// The payload stored on this bullet's vector point.
    pub fn to_payload(&self) -> serde_json::Value {
        let mut payload = serde_json::to_value(self).unwrap_or_default();
        // bullet_id duplicates id for older readers of the collection.
        payload["bullet_id"] = serde_json::Value::String(self.id.clone());
        payload
    }

    /// Rebuild a bullet from a point payload, tolerating legacy shapes
    /// that predate the full bullet dict.
    pub fn from_payload(payload: &serde_json::Value, fallback_id: &str) -> Bullet {
        if payload.get("id").is_some()
            && payload.get("section").is_some()
            && payload.get("content").is_some()
        {
            if let Ok(bullet) = serde_json::from_value::<Bullet>(payload.clone()) {
                return bullet;
            }
        }
        Bullet {
            id: payload["bullet_id"]
                .as_str()
                .unwrap_or(fallback_id)
                .to_string(),
            section: payload["section"]
                .as_str()
                .unwrap_or("strategies_and_hard_rules")
                .to_string(),
            content: payload["content"].as_str().unwrap_or_default().to_string(),
            helpful_count: payload["helpful_count"].as_u64().unwrap_or(0) as u32,
            harmful_count: payload["harmful_count"].as_u64().unwrap_or(0) as u32,
            metadata: payload["metadata"]
                .as_object()
                .cloned()
                .unwrap_or_default(),
        }
    }
}

/// Feedback tag for a bullet used in a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackTag {
    Helpful,
    Harmful,
    /// Accepted but currently a no-op on counters.
    Neutral,
}

/// One feedback entry from a reflection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulletFeedback {
    /// The bullet being tagged.
    pub bullet_id: String,
    /// The tag.
    pub tag: FeedbackTag,
}

/// The module's evolving set of bullets.
///
/// Bullets live in a map; each section keeps an ordered id list, and a
/// global insertion order drives deduplication so the oldest duplicate
/// survives.
#[derive(Debug, Clone, Default)]
pub struct Playbook {
    bullets: HashMap<String, Bullet>,
    sections: Vec<(String, Vec<String>)>,
    insertion_order: Vec<String>,
}

impl Playbook {
    /// Create an empty playbook with the seed sections.
    pub fn new() -> Self {
        Self {
            bullets: HashMap::new(),
            sections: SEED_SECTIONS
                .iter()
                .map(|name| (name.to_string(), Vec::new()))
                .collect(),
            insertion_order: Vec::new(),
        }
    }

    /// Add a bullet, generating `<sec>-<short-uuid>` when no id is given.
    /// Returns the bullet id.
    pub fn add_bullet(
        &mut self,
        section: &str,
        content: impl Into<String>,
        bullet_id: Option<String>,
    ) -> String {
        let id = bullet_id.unwrap_or_else(|| {
            let prefix: String = section.chars().take(3).collect();
            let uuid = uuid::Uuid::new_v4().to_string();
            format!("{}-{}", prefix, &uuid[..8])
        });

        let bullet = Bullet {
            id: id.clone(),
            section: section.to_string(),
            content: content.into(),
            helpful_count: 0,
            harmful_count: 0,
            metadata: serde_json::Map::new(),
        };

        self.insert(bullet);
        tracing::debug!(bullet_id = %id, section, "Bullet added");
        id
    }

    /// Insert a pre-built bullet (load path).
    fn insert(&mut self, bullet: Bullet) {
        let section_ids = self.section_ids_mut(&bullet.section);
        if !section_ids.contains(&bullet.id) {
            section_ids.push(bullet.id.clone());
        }
        if !self.insertion_order.contains(&bullet.id) {
            self.insertion_order.push(bullet.id.clone());
        }
        self.bullets.insert(bullet.id.clone(), bullet);
    }

    fn section_ids_mut(&mut self, section: &str) -> &mut Vec<String> {
        if let Some(index) = self.sections.iter().position(|(name, _)| name == section) {
            &mut self.sections[index].1
        } else {
            self.sections.push((section.to_string(), Vec::new()));
            &mut self.sections.last_mut().unwrap().1
        }
    }

    /// Update a bullet's content. Returns whether it existed.
    pub fn update_bullet_content(&mut self, bullet_id: &str, content: impl Into<String>) -> bool {
        match self.bullets.get_mut(bullet_id) {
            Some(bullet) => {
                bullet.content = content.into();
                true
            }
            None => {
                tracing::warn!(bullet_id, "Bullet not found for update");
                false
            }
        }
    }

    /// Remove a bullet from the map and its section. Returns whether it
    /// existed.
    pub fn remove_bullet(&mut self, bullet_id: &str) -> bool {
        let Some(bullet) = self.bullets.remove(bullet_id) else {
            return false;
        };
        if let Some((_, ids)) = self
            .sections
            .iter_mut()
            .find(|(name, _)| *name == bullet.section)
        {
            ids.retain(|id| id != bullet_id);
        }
        self.insertion_order.retain(|id| id != bullet_id);
        tracing::debug!(bullet_id, "Bullet removed");
        true
    }

    /// Increment a bullet's helpful counter.
    pub fn mark_helpful(&mut self, bullet_id: &str) -> bool {
        match self.bullets.get_mut(bullet_id) {
            Some(bullet) => {
                bullet.helpful_count += 1;
                true
            }
            None => {
                tracing::warn!(bullet_id, "Bullet not found for helpful mark");
                false
            }
        }
    }

    /// Increment a bullet's harmful counter.
    pub fn mark_harmful(&mut self, bullet_id: &str) -> bool {
        match self.bullets.get_mut(bullet_id) {
            Some(bullet) => {
                bullet.harmful_count += 1;
                true
            }
            None => {
                tracing::warn!(bullet_id, "Bullet not found for harmful mark");
                false
            }
        }
    }

    /// Apply a feedback list. `neutral` tags are accepted but change no
    /// counters. Returns the ids whose counters changed.
    pub fn apply_feedback(&mut self, feedback: &[BulletFeedback]) -> Vec<String> {
        let mut updated = Vec::new();
        for item in feedback {
            let changed = match item.tag {
                FeedbackTag::Helpful => self.mark_helpful(&item.bullet_id),
                FeedbackTag::Harmful => self.mark_harmful(&item.bullet_id),
                FeedbackTag::Neutral => false,
            };
            if changed {
                updated.push(item.bullet_id.clone());
            }
        }
        if !updated.is_empty() {
            tracing::info!(count = updated.len(), "Bullet feedback applied");
        }
        updated
    }

    /// A bullet by id.
    pub fn get_bullet(&self, bullet_id: &str) -> Option<&Bullet> {
        self.bullets.get(bullet_id)
    }

    /// Bullets of one section, in order.
    pub fn bullets_in_section(&self, section: &str) -> Vec<&Bullet> {
        self.sections
            .iter()
            .find(|(name, _)| name == section)
            .map(|(_, ids)| ids.iter().filter_map(|id| self.bullets.get(id)).collect())
            .unwrap_or_default()
    }

    /// All bullets in insertion order.
    pub fn all_bullets(&self) -> Vec<&Bullet> {
        self.insertion_order
            .iter()
            .filter_map(|id| self.bullets.get(id))
            .collect()
    }

    /// Total bullet count.
    pub fn bullet_count(&self) -> usize {
        self.bullets.len()
    }

    /// Render the playbook as section-headed text.
    pub fn to_text(&self) -> String {
        let mut parts = Vec::new();
        for (name, ids) in &self.sections {
            if ids.is_empty() {
                continue;
            }
            let title = name
                .split('_')
                .map(|word| {
                    let mut chars = word.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                        None => String::new(),
                    }
                })
                .collect::<Vec<_>>()
                .join(" ");
            parts.push(format!("\n## {}\n", title));
            for id in ids {
                if let Some(bullet) = self.bullets.get(id) {
                    parts.push(format!("[{}] {}", bullet.id, bullet.content));
                }
            }
        }
        parts.join("\n")
    }

    // ─────────────────────────────────────────────────────────────────────
    // Grow-and-refine
    // ─────────────────────────────────────────────────────────────────────

    /// Remove case-insensitive duplicate bullets, merging counters into the
    /// earliest-inserted survivor. Returns `(removed_ids, updated_ids)`.
    /// Applying twice has the same effect as once.
    pub fn dedup(&mut self) -> (Vec<String>, Vec<String>) {
        let mut seen: HashMap<String, String> = HashMap::new();
        let mut removed = Vec::new();
        let mut updated = Vec::new();

        for id in self.insertion_order.clone() {
            let Some(bullet) = self.bullets.get(&id) else {
                continue;
            };
            let normalized = bullet.content.trim().to_lowercase();
            match seen.get(&normalized) {
                Some(survivor_id) => {
                    let (helpful, harmful) = (bullet.helpful_count, bullet.harmful_count);
                    if let Some(survivor) = self.bullets.get_mut(survivor_id) {
                        survivor.helpful_count += helpful;
                        survivor.harmful_count += harmful;
                    }
                    if !updated.contains(survivor_id) {
                        updated.push(survivor_id.clone());
                    }
                    removed.push(id);
                }
                None => {
                    seen.insert(normalized, id);
                }
            }
        }

        for id in &removed {
            self.remove_bullet(id);
        }
        if !removed.is_empty() {
            tracing::info!(removed = removed.len(), "Deduplication complete");
        }
        (removed, updated)
    }

    /// Remove bullets whose harmful count reached the threshold. Returns
    /// removed ids.
    pub fn prune_harmful(&mut self, threshold: u32) -> Vec<String> {
        let to_remove: Vec<String> = self
            .insertion_order
            .iter()
            .filter(|id| {
                self.bullets
                    .get(*id)
                    .is_some_and(|b| b.harmful_count >= threshold)
            })
            .cloned()
            .collect();

        for id in &to_remove {
            self.remove_bullet(id);
        }
        if !to_remove.is_empty() {
            tracing::info!(count = to_remove.len(), "Harmful bullets pruned");
        }
        to_remove
    }

    // ─────────────────────────────────────────────────────────────────────
    // Vector mirroring
    // ─────────────────────────────────────────────────────────────────────

    /// Save every bullet as a point in the collection. Returns the count.
    pub async fn save_to_vector_db(
        &self,
        store: &SharedVectorStore,
        embedder: &SharedEmbedder,
        collection: &str,
    ) -> Result<usize> {
        if self.bullets.is_empty() {
            tracing::warn!(collection, "No bullets to save");
            return Ok(0);
        }

        let bullets = self.all_bullets();
        let contents: Vec<String> = bullets.iter().map(|b| b.content.clone()).collect();
        let vectors = embedder.embed(&contents).await?;

        let points: Vec<Point> = bullets
            .iter()
            .zip(vectors)
            .map(|(bullet, vector)| Point::new(bullet.id.clone(), vector, bullet.to_payload()))
            .collect();

        let count = points.len();
        store.upsert(collection, points).await?;
        tracing::info!(collection, count, "Playbook saved to vector store");
        Ok(count)
    }

    /// Save one bullet's point. Errors are logged, not raised.
    pub async fn save_bullet_to_vector_db(
        &self,
        bullet_id: &str,
        store: &SharedVectorStore,
        embedder: &SharedEmbedder,
        collection: &str,
    ) -> bool {
        let Some(bullet) = self.bullets.get(bullet_id) else {
            tracing::error!(bullet_id, "Bullet not found for vector save");
            return false;
        };

        let vector = match embedder.embed_single(&bullet.content).await {
            Ok(vector) => vector,
            Err(e) => {
                tracing::error!(bullet_id, error = %e, "Bullet embedding failed");
                return false;
            }
        };

        let point = Point::new(bullet.id.clone(), vector, bullet.to_payload());
        match store.upsert(collection, vec![point]).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(bullet_id, error = %e, "Bullet vector save failed");
                false
            }
        }
    }

    /// Delete one bullet's point. Errors are logged, not raised.
    pub async fn delete_bullet_from_vector_db(
        bullet_id: &str,
        store: &SharedVectorStore,
        collection: &str,
    ) -> bool {
        match store
            .delete_points(collection, &[bullet_id.to_string()])
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(bullet_id, error = %e, "Bullet vector delete failed");
                false
            }
        }
    }

    /// Reconstruct a playbook by scrolling the collection in pages.
    /// Payloads lacking the modern fields fall back to legacy defaults.
    pub async fn load_from_vector_db(
        store: &SharedVectorStore,
        collection: &str,
        max_bullets: usize,
    ) -> Result<Playbook> {
        let mut playbook = Playbook::new();
        let mut offset = None;
        let mut loaded = 0usize;

        loop {
            let remaining = max_bullets.saturating_sub(loaded);
            if remaining == 0 {
                break;
            }
            let page = store
                .scroll(collection, remaining.min(100), offset)
                .await?;
            if page.points.is_empty() {
                break;
            }

            loaded += page.points.len();
            for point in page.points {
                playbook.insert(Bullet::from_payload(&point.payload, &point.id));
            }

            match page.next_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        tracing::info!(collection, bullets = playbook.bullet_count(), "Playbook loaded");
        Ok(playbook)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coda_vector::{Distance, MemoryVectorStore, MockEmbedder, VectorStore};
    use std::sync::Arc;

    #[test]
    fn test_quality_bounds() {
        let mut playbook = Playbook::new();
        let id = playbook.add_bullet("strategies_and_hard_rules", "plan first", None);
        assert_eq!(playbook.get_bullet(&id).unwrap().quality(), 0.5);

        playbook.mark_helpful(&id);
        playbook.mark_helpful(&id);
        playbook.mark_harmful(&id);
        let quality = playbook.get_bullet(&id).unwrap().quality();
        assert!((quality - 2.0 / 3.0).abs() < 1e-6);
        assert!((0.0..=1.0).contains(&quality));
    }

    #[test]
    fn test_generated_id_shape() {
        let mut playbook = Playbook::new();
        let id = playbook.add_bullet("apis_and_schemas", "check the schema", None);
        assert!(id.starts_with("api-"));
        assert_eq!(id.len(), 3 + 1 + 8);
    }

    #[test]
    fn test_add_then_remove_leaves_nothing() {
        let mut playbook = Playbook::new();
        let id = playbook.add_bullet("domain_knowledge", "meshes are metric", None);
        assert!(playbook.remove_bullet(&id));
        assert!(playbook.get_bullet(&id).is_none());
        assert!(playbook.bullets_in_section("domain_knowledge").is_empty());
        assert!(!playbook.remove_bullet(&id));
    }

    #[test]
    fn test_dedup_merges_counters_into_oldest() {
        let mut playbook = Playbook::new();
        let first = playbook.add_bullet("strategies_and_hard_rules", "Use caching", None);
        playbook.mark_helpful(&first);
        let second = playbook.add_bullet("strategies_and_hard_rules", "use caching", None);
        playbook.mark_harmful(&second);
        playbook.mark_harmful(&second);

        let (removed, updated) = playbook.dedup();
        assert_eq!(removed, vec![second]);
        assert_eq!(updated, vec![first.clone()]);

        let survivor = playbook.get_bullet(&first).unwrap();
        assert_eq!(survivor.helpful_count, 1);
        assert_eq!(survivor.harmful_count, 2);
    }

    #[test]
    fn test_dedup_idempotent() {
        let mut playbook = Playbook::new();
        playbook.add_bullet("domain_knowledge", "alpha", None);
        playbook.add_bullet("domain_knowledge", "ALPHA", None);
        playbook.add_bullet("domain_knowledge", "beta", None);

        playbook.dedup();
        let count_after_first = playbook.bullet_count();
        let (removed, updated) = playbook.dedup();
        assert!(removed.is_empty());
        assert!(updated.is_empty());
        assert_eq!(playbook.bullet_count(), count_after_first);
        assert_eq!(count_after_first, 2);
    }

    #[test]
    fn test_prune_harmful() {
        let mut playbook = Playbook::new();
        let bad = playbook.add_bullet("troubleshooting_and_pitfalls", "bad advice", None);
        let fine = playbook.add_bullet("troubleshooting_and_pitfalls", "fine advice", None);
        for _ in 0..3 {
            playbook.mark_harmful(&bad);
        }
        playbook.mark_harmful(&fine);

        let removed = playbook.prune_harmful(3);
        assert_eq!(removed, vec![bad]);
        assert!(playbook.get_bullet(&fine).is_some());
    }

    #[test]
    fn test_neutral_feedback_is_noop() {
        let mut playbook = Playbook::new();
        let id = playbook.add_bullet("domain_knowledge", "fact", None);
        let updated = playbook.apply_feedback(&[
            BulletFeedback {
                bullet_id: id.clone(),
                tag: FeedbackTag::Neutral,
            },
            BulletFeedback {
                bullet_id: "ghost".to_string(),
                tag: FeedbackTag::Helpful,
            },
        ]);
        assert!(updated.is_empty());
        let bullet = playbook.get_bullet(&id).unwrap();
        assert_eq!(bullet.helpful_count, 0);
        assert_eq!(bullet.harmful_count, 0);
    }

    #[test]
    fn test_to_text_sections() {
        let mut playbook = Playbook::new();
        playbook.add_bullet("useful_code_snippets", "prefer iterators", None);
        let text = playbook.to_text();
        assert!(text.contains("## Useful Code Snippets"));
        assert!(text.contains("prefer iterators"));
        assert!(!text.contains("## Domain Knowledge"));
    }

    #[tokio::test]
    async fn test_vector_round_trip() {
        let store: SharedVectorStore = Arc::new(MemoryVectorStore::new());
        let embedder: SharedEmbedder = Arc::new(MockEmbedder::new(8));
        store.create_collection("ace_vscode", 8, Distance::Cosine).await.unwrap();

        let mut playbook = Playbook::new();
        let a = playbook.add_bullet("strategies_and_hard_rules", "plan first", None);
        let b = playbook.add_bullet("apis_and_schemas", "check schemas", None);
        playbook.mark_helpful(&a);
        playbook.mark_harmful(&b);

        let saved = playbook
            .save_to_vector_db(&store, &embedder, "ace_vscode")
            .await
            .unwrap();
        assert_eq!(saved, 2);

        let loaded = Playbook::load_from_vector_db(&store, "ace_vscode", 1000)
            .await
            .unwrap();
        assert_eq!(loaded.bullet_count(), 2);
        let bullet_a = loaded.get_bullet(&a).unwrap();
        assert_eq!(bullet_a.section, "strategies_and_hard_rules");
        assert_eq!(bullet_a.helpful_count, 1);
        let bullet_b = loaded.get_bullet(&b).unwrap();
        assert_eq!(bullet_b.harmful_count, 1);
    }

    #[tokio::test]
    async fn test_load_legacy_payload() {
        let store: SharedVectorStore = Arc::new(MemoryVectorStore::new());
        store.create_collection("ace_old", 4, Distance::Cosine).await.unwrap();
        store
            .upsert(
                "ace_old",
                vec![Point::new(
                    "legacy-1",
                    vec![1.0, 0.0, 0.0, 0.0],
                    serde_json::json!({ "content": "old wisdom" }),
                )],
            )
            .await
            .unwrap();

        let loaded = Playbook::load_from_vector_db(&store, "ace_old", 1000)
            .await
            .unwrap();
        let bullet = loaded.get_bullet("legacy-1").unwrap();
        assert_eq!(bullet.content, "old wisdom");
        assert_eq!(bullet.section, "strategies_and_hard_rules");
        assert_eq!(bullet.quality(), 0.5);
    }
}
