//! ACE: the playbook of learned heuristics and the reflect/curate loop
//! that evolves it.
//!
//! A [`Playbook`] holds bullets partitioned into sections, mirrored into a
//! vector collection for semantic retrieval. After a turn, a [`Reflector`]
//! distills the trajectory into insights and a [`Curator`] merges them back
//! as incremental delta operations, followed by grow-and-refine
//! (deduplication and harmful-bullet pruning).

mod curator;
mod error;
mod json;
mod playbook;
mod reflector;

pub use curator::{Curator, CuratorOp, VectorMirror};
pub use error::{AceError, Result};
pub use json::extract_json_object;
pub use playbook::{Bullet, BulletFeedback, FeedbackTag, Playbook, SEED_SECTIONS};
pub use reflector::{Reflection, Reflector};

/// Bullet count above which the learning loop runs grow-and-refine.
pub const GROW_REFINE_THRESHOLD: usize = 50;

/// Default harmful-count threshold for pruning.
pub const PRUNE_HARMFUL_THRESHOLD: u32 = 3;
