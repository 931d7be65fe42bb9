//! Vector index over memory entries.
//!
//! Entry id → fixed-dimension vector, plus an entry snapshot so search
//! hits can be rendered without re-reading the markdown files. Search is
//! brute-force cosine over all records; the store is persisted as
//! `vectors.json`. A vector record exists iff its entry does: deleting
//! an entry deletes its record.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use hivegate_types::Result;

use super::store::MemoryEntry;

/// A search hit: entry id and cosine similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub entry_id: String,
    pub score: f32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    dimension: usize,
    vectors: HashMap<String, Vec<f32>>,
    entries: HashMap<String, MemoryEntry>,
}

/// Cosine similarity; 0 for mismatched lengths or zero norms.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// In-memory vector index with JSON persistence.
pub struct VectorIndex {
    dimension: usize,
    storage_path: Option<PathBuf>,
    inner: Mutex<IndexFile>,
}

impl VectorIndex {
    /// Create an unpersisted index.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            storage_path: None,
            inner: Mutex::new(IndexFile {
                dimension,
                ..Default::default()
            }),
        }
    }

    /// Open a persisted index from `path`, creating it when absent.
    pub fn open(dimension: usize, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let inner = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str::<IndexFile>(&content)
                .unwrap_or_else(|e| {
                    warn!(error = %e, "vector index unreadable, starting fresh");
                    IndexFile {
                        dimension,
                        ..Default::default()
                    }
                }),
            Err(_) => IndexFile {
                dimension,
                ..Default::default()
            },
        };
        Self {
            dimension,
            storage_path: Some(path),
            inner: Mutex::new(inner),
        }
    }

    fn persist(&self, inner: &IndexFile) {
        let Some(path) = &self.storage_path else { return };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string(inner) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    warn!(error = %e, "failed to persist vector index");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize vector index"),
        }
    }

    /// Insert or replace an entry's vector.
    pub fn upsert(&self, entry: &MemoryEntry, vector: Vec<f32>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.vectors.insert(entry.id.clone(), vector);
        inner.entries.insert(entry.id.clone(), entry.clone());
        self.persist(&inner);
        Ok(())
    }

    /// Remove an entry and its vector. Returns `true` if present.
    pub fn remove(&self, entry_id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let existed = inner.vectors.remove(entry_id).is_some();
        inner.entries.remove(entry_id);
        if existed {
            self.persist(&inner);
        }
        existed
    }

    /// Top-k entries by cosine similarity, above `threshold`.
    pub fn search(&self, query: &[f32], k: usize, threshold: f32) -> Vec<VectorHit> {
        let inner = self.inner.lock().unwrap();
        let mut hits: Vec<VectorHit> = inner
            .vectors
            .iter()
            .map(|(id, vector)| VectorHit {
                entry_id: id.clone(),
                score: cosine_similarity(query, vector),
            })
            .filter(|hit| hit.score >= threshold)
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        hits
    }

    /// The entry snapshot stored with a vector.
    pub fn entry(&self, entry_id: &str) -> Option<MemoryEntry> {
        self.inner.lock().unwrap().entries.get(entry_id).cloned()
    }

    /// All indexed entry ids.
    pub fn ids(&self) -> Vec<String> {
        self.inner.lock().unwrap().vectors.keys().cloned().collect()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().vectors.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The configured dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn entry(id: &str, content: &str) -> MemoryEntry {
        MemoryEntry {
            id: id.into(),
            content: content.into(),
            source: "daily".into(),
            timestamp: Utc::now(),
            tags: Vec::new(),
            importance: 0.5,
            metadata: Default::default(),
        }
    }

    #[test]
    fn upsert_and_search() {
        let index = VectorIndex::new(3);
        index.upsert(&entry("a", "alpha"), vec![1.0, 0.0, 0.0]).unwrap();
        index.upsert(&entry("b", "beta"), vec![0.0, 1.0, 0.0]).unwrap();

        let hits = index.search(&[1.0, 0.0, 0.0], 2, 0.0);
        assert_eq!(hits[0].entry_id, "a");
        assert!((hits[0].score - 1.0).abs() < 0.01);
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn threshold_filters() {
        let index = VectorIndex::new(2);
        index.upsert(&entry("a", "x"), vec![1.0, 0.0]).unwrap();
        index.upsert(&entry("b", "y"), vec![0.0, 1.0]).unwrap();
        let hits = index.search(&[1.0, 0.0], 10, 0.5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry_id, "a");
    }

    #[test]
    fn remove_deletes_vector_and_snapshot() {
        let index = VectorIndex::new(2);
        index.upsert(&entry("a", "x"), vec![1.0, 0.0]).unwrap();
        assert!(index.remove("a"));
        assert!(index.entry("a").is_none());
        assert!(index.search(&[1.0, 0.0], 10, 0.0).is_empty());
        assert!(!index.remove("a"));
    }

    #[test]
    fn persistence_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vectors.json");
        {
            let index = VectorIndex::open(2, &path);
            index.upsert(&entry("a", "persisted"), vec![0.6, 0.8]).unwrap();
        }
        let reopened = VectorIndex::open(2, &path);
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.entry("a").unwrap().content, "persisted");
        let hits = reopened.search(&[0.6, 0.8], 1, 0.0);
        assert!((hits[0].score - 1.0).abs() < 0.01);
    }

    #[test]
    fn cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) < 0.0);
    }

    #[test]
    fn empty_index_search() {
        let index = VectorIndex::new(2);
        assert!(index.search(&[1.0, 0.0], 5, 0.0).is_empty());
        assert!(index.is_empty());
    }
}
