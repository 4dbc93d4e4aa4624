//! Curated festival-customs knowledge base.
//!
//! ## Snapshot format
//!
//! ```json
//! { "data": [ { "id": "fu-character", "title": "倒贴福", "description": "...",
//!               "keywords": ["福字"], "scenarios": ["..."], "related": ["couplets"] } ] }
//! ```
//!
//! The snapshot is parsed once and never mutated. [`KnowledgeRetriever::reload`]
//! swaps in a freshly parsed snapshot as a whole.

mod retriever;
mod store;

pub use retriever::{score_entry, KnowledgeRetriever, ScoredEntry, CANONICAL_QUESTIONS};
pub use store::{KnowledgeBase, KnowledgeEntry};
pub(crate) use store::DEFAULT_PATH;
