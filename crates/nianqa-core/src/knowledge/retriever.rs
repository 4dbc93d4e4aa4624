//! Weighted keyword retrieval over the knowledge-base snapshot.

use super::store::{KnowledgeBase, KnowledgeEntry};
use crate::error::KnowledgeError;
use crate::question::{Intent, Query};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

const TITLE_MATCH: f32 = 3.0;
const TITLE_EXACT: f32 = 2.0;
const DESCRIPTION_MATCH: f32 = 2.0;
const KEYWORD_MATCH: f32 = 2.5;
const SCENARIO_MATCH: f32 = 1.5;
const INTENT_BONUS: f32 = 1.5;
const CANONICAL_BONUS: f32 = 5.0;

/// Phrases that pin a question to a known entry regardless of keyword overlap.
pub const CANONICAL_QUESTIONS: [(&str, &str); 26] = [
    ("过年", "spring-festival"),
    ("春节", "spring-festival"),
    ("除夕", "new-years-eve"),
    ("守岁", "shou-sui"),
    ("压岁钱", "lucky-money"),
    ("红包", "red-packets"),
    ("春联", "couplets"),
    ("福字", "fu-character"),
    ("倒贴福", "fu-character"),
    ("年糕", "rice-cake"),
    ("饺子", "dumplings"),
    ("放鞭炮", "firecrackers"),
    ("烟花", "firecrackers"),
    ("庙会", "temple-fair"),
    ("舞龙", "dragon-lion-dance"),
    ("舞狮", "dragon-lion-dance"),
    ("元宵节", "lantern-festival"),
    ("灯会", "lanterns"),
    ("猜灯谜", "lantern-riddles"),
    ("清明", "qingming-festival"),
    ("端午节", "dragon-boat-festival"),
    ("粽子", "dragon-boat-festival"),
    ("七夕", "qixi-festival"),
    ("中秋", "mid-autumn-festival"),
    ("月饼", "mid-autumn-festival"),
    ("重阳", "double-ninth-festival"),
];

/// An entry paired with its relevance score (always > 0).
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub entry: KnowledgeEntry,
    pub score: f32,
}

/// Relevance of `entry` to `query`; additive over the query keywords.
pub fn score_entry(entry: &KnowledgeEntry, query: &Query) -> f32 {
    let mut score = 0.0;

    for keyword in &query.keywords {
        if entry.title.contains(keyword.as_str()) {
            score += TITLE_MATCH;
            if *keyword == entry.title {
                score += TITLE_EXACT;
            }
        }
        if entry.description.contains(keyword.as_str()) {
            score += DESCRIPTION_MATCH;
        }
        if entry.keywords.iter().any(|k| k == keyword) {
            score += KEYWORD_MATCH;
        }
        let scenario_hits = entry
            .scenarios
            .iter()
            .filter(|s| s.contains(keyword.as_str()))
            .count();
        score += SCENARIO_MATCH * scenario_hits as f32;
    }

    if query.intent != Intent::What
        && query
            .intent
            .description_indicators()
            .iter()
            .any(|w| entry.description.contains(*w))
    {
        score += INTENT_BONUS;
    }

    for (phrase, id) in CANONICAL_QUESTIONS {
        let asked = query.original_text.contains(phrase) || query.cleaned_text.contains(phrase);
        if asked && entry.id == id {
            score += CANONICAL_BONUS;
        }
    }

    score
}

/// Owns the snapshot; readers always see one complete snapshot.
#[derive(Debug)]
pub struct KnowledgeRetriever {
    snapshot: RwLock<Arc<KnowledgeBase>>,
    source: Option<PathBuf>,
}

impl KnowledgeRetriever {
    /// Loads the snapshot at `path`. Failure here is fatal for the caller.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self, KnowledgeError> {
        let path = path.as_ref().to_path_buf();
        let kb = KnowledgeBase::load_path(&path)?;
        tracing::info!(
            target: "nianqa::retrieval",
            entries = kb.len(),
            path = %path.display(),
            "Knowledge base loaded"
        );
        Ok(Self {
            snapshot: RwLock::new(Arc::new(kb)),
            source: Some(path),
        })
    }

    /// In-memory snapshot with no backing file; `reload` keeps it as is.
    pub fn from_snapshot(kb: KnowledgeBase) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(kb)),
            source: None,
        }
    }

    /// Current snapshot. Holding it keeps that version alive across a reload.
    pub fn snapshot(&self) -> Arc<KnowledgeBase> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Top `top_n` entries by descending score; ties keep file order.
    pub fn retrieve(&self, query: &Query, top_n: usize) -> Vec<ScoredEntry> {
        let kb = self.snapshot();
        let mut scored: Vec<ScoredEntry> = kb
            .data
            .iter()
            .filter_map(|entry| {
                let score = score_entry(entry, query);
                (score > 0.0).then(|| ScoredEntry {
                    entry: entry.clone(),
                    score,
                })
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored.truncate(top_n);

        tracing::debug!(
            target: "nianqa::retrieval",
            intent = query.intent.as_str(),
            keywords = ?query.keywords,
            hits = scored.len(),
            top = scored.first().map(|s| s.entry.id.as_str()).unwrap_or("-"),
            "Retrieval finished"
        );
        scored
    }

    /// Up to `top_n` entries listed in `entry_id`'s `related` field, in file order.
    pub fn get_related(&self, entry_id: &str, top_n: usize) -> Vec<KnowledgeEntry> {
        let kb = self.snapshot();
        let Some(target) = kb.entry(entry_id) else {
            return Vec::new();
        };
        kb.data
            .iter()
            .filter(|e| target.related.contains(&e.id))
            .take(top_n)
            .cloned()
            .collect()
    }

    /// Re-reads the backing file and swaps the snapshot in one step.
    /// On failure the previous snapshot stays in place.
    pub fn reload(&self) -> Result<usize, KnowledgeError> {
        let Some(path) = &self.source else {
            return Ok(self.len());
        };
        let fresh = Arc::new(KnowledgeBase::load_path(path)?);
        let count = fresh.len();
        match self.snapshot.write() {
            Ok(mut guard) => *guard = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
        tracing::info!(
            target: "nianqa::retrieval",
            entries = count,
            "Knowledge base reloaded"
        );
        Ok(count)
    }
}
