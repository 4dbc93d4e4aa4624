//! Immutable knowledge-base snapshot and its JSON loader.

use crate::error::KnowledgeError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default location of the snapshot, relative to the working directory.
pub(crate) const DEFAULT_PATH: &str = "data/knowledge-base.json";

/// One custom or festival in the knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Typical situations the custom shows up in, most representative first.
    #[serde(default)]
    pub scenarios: Vec<String>,
    /// Ids of related entries.
    #[serde(default)]
    pub related: Vec<String>,
}

/// Parsed snapshot. Entry order is the file order and breaks score ties.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub data: Vec<KnowledgeEntry>,
}

impl KnowledgeBase {
    pub fn new(data: Vec<KnowledgeEntry>) -> Self {
        Self { data }
    }

    /// Reads and parses the snapshot at `path`.
    pub fn load_path<P: AsRef<Path>>(path: P) -> Result<Self, KnowledgeError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| KnowledgeError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, KnowledgeError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn entry(&self, id: &str) -> Option<&KnowledgeEntry> {
        self.data.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_optional_fields_default_to_empty() {
        let kb = KnowledgeBase::from_json_str(
            r#"{"data":[{"id":"shou-sui","title":"守岁","description":"除夕夜不睡觉"}]}"#,
        )
        .unwrap();
        let entry = kb.entry("shou-sui").unwrap();
        assert!(entry.keywords.is_empty());
        assert!(entry.related.is_empty());
        assert!(kb.entry("nope").is_none());
    }

    #[test]
    fn load_path_reports_io_and_parse_failures() {
        let missing = KnowledgeBase::load_path("./does/not/exist.json");
        assert!(matches!(missing, Err(KnowledgeError::Io { .. })));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        assert!(matches!(
            KnowledgeBase::load_path(file.path()),
            Err(KnowledgeError::Parse(_))
        ));
    }

    #[test]
    fn bundled_snapshot_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join(DEFAULT_PATH);
        let kb = KnowledgeBase::load_path(path).unwrap();
        assert!(kb.entry("fu-character").is_some());
        assert!(kb.entry("spring-festival").is_some());
    }
}
