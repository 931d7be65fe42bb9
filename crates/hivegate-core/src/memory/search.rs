//! Hybrid retrieval over the memory store.
//!
//! Combines three signals per entry: vector similarity, TF-weighted
//! keyword overlap (with a phrase-match bonus), and recency (quadratic
//! decay over a configurable window). The operator tunes the mix through
//! [`SearchWeights`]; defaults are 0.6 / 0.3 / 0.1.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use super::embedder::Embedder;
use super::store::{MemoryEntry, MemoryStore};
use super::vector::VectorIndex;

/// Signal weights for hybrid scoring.
#[derive(Debug, Clone, Copy)]
pub struct SearchWeights {
    pub vector: f64,
    pub keyword: f64,
    pub recency: f64,
    /// Days a memory stays "recent".
    pub recency_days: i64,
}

impl Default for SearchWeights {
    fn default() -> Self {
        Self {
            vector: 0.6,
            keyword: 0.3,
            recency: 0.1,
            recency_days: 30,
        }
    }
}

/// One hybrid search hit with its score breakdown.
#[derive(Debug, Clone)]
pub struct HybridHit {
    pub entry: MemoryEntry,
    pub combined_score: f64,
    pub vector_score: f64,
    pub keyword_score: f64,
    pub recency_score: f64,
}

/// Hybrid search over a store, a vector index, and an embedder.
pub struct HybridSearch {
    store: Arc<MemoryStore>,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    weights: SearchWeights,
}

impl HybridSearch {
    /// Create a hybrid search with default weights.
    pub fn new(
        store: Arc<MemoryStore>,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
            weights: SearchWeights::default(),
        }
    }

    /// Override the weights.
    pub fn with_weights(mut self, weights: SearchWeights) -> Self {
        self.weights = weights;
        self
    }

    /// (Re)index every active entry.
    pub async fn index_all(&self) -> usize {
        let entries = self.store.active_entries();
        let mut count = 0;
        for entry in &entries {
            if let Ok(vector) = self.embedder.embed(&entry.content).await
                && self.index.upsert(entry, vector).is_ok()
            {
                count += 1;
            }
        }
        count
    }

    /// TF score over query terms with a phrase bonus, clamped to 1.
    fn keyword_score(query: &str, content: &str) -> f64 {
        let content_lower = content.to_lowercase();
        let query_lower = query.to_lowercase();
        let terms: Vec<&str> = query_lower.split_whitespace().collect();
        if terms.is_empty() {
            return 0.0;
        }
        let matches = terms
            .iter()
            .filter(|t| content_lower.contains(*t))
            .count();
        if matches == 0 {
            return 0.0;
        }
        let mut tf = matches as f64 / terms.len() as f64;
        if content_lower.contains(&query_lower) {
            tf *= 1.5;
        }
        tf.min(1.0)
    }

    /// Quadratic decay from 1 (now) to 0 (window edge and beyond).
    fn recency_score(entry: &MemoryEntry, max_days: i64) -> f64 {
        let age_days = (Utc::now() - entry.timestamp).num_days();
        if age_days <= 0 {
            return 1.0;
        }
        if age_days >= max_days {
            return 0.0;
        }
        let linear = 1.0 - age_days as f64 / max_days as f64;
        linear * linear
    }

    /// Run a hybrid search, returning the top `k` hits.
    pub async fn search(&self, query: &str, k: usize) -> Vec<HybridHit> {
        // Vector candidates: top-2k by similarity.
        let mut vector_scores: HashMap<String, f64> = HashMap::new();
        if let Ok(query_vector) = self.embedder.embed(query).await {
            for hit in self.index.search(&query_vector, k * 2, 0.0) {
                vector_scores.insert(hit.entry_id, hit.score as f64);
            }
        }

        // Keyword candidates: top-2k by substring match.
        let keyword_entries = self.store.search_by_keyword(query, k * 2);

        // Union the candidate sets, preferring the freshly parsed entry
        // over the index snapshot.
        let mut candidates: HashMap<String, MemoryEntry> = HashMap::new();
        for id in vector_scores.keys() {
            if let Some(entry) = self.index.entry(id) {
                candidates.insert(id.clone(), entry);
            }
        }
        for entry in keyword_entries {
            candidates.insert(entry.id.clone(), entry);
        }

        let weights = self.weights;
        let mut hits: Vec<HybridHit> = candidates
            .into_values()
            .map(|entry| {
                let vector_score =
                    vector_scores.get(&entry.id).copied().unwrap_or(0.0);
                let keyword_score = Self::keyword_score(query, &entry.content);
                let recency_score = Self::recency_score(&entry, weights.recency_days);
                let combined_score = weights.vector * vector_score
                    + weights.keyword * keyword_score
                    + weights.recency * recency_score;
                HybridHit {
                    entry,
                    combined_score,
                    vector_score,
                    keyword_score,
                    recency_score,
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::embedder::HashEmbedder;
    use tempfile::TempDir;

    async fn searchable() -> (HybridSearch, Arc<MemoryStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new(dir.path()));
        let index = Arc::new(VectorIndex::new(384));
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::default());
        let search = HybridSearch::new(store.clone(), index, embedder);
        (search, store, dir)
    }

    #[tokio::test]
    async fn finds_exact_phrase_first() {
        let (search, store, _dir) = searchable().await;
        store.add_to_daily("the database migration completed last night").unwrap();
        store.add_to_daily("lunch plans with the platform team").unwrap();
        search.index_all().await;

        let hits = search.search("database migration", 5).await;
        assert!(!hits.is_empty());
        assert!(hits[0].entry.content.contains("database migration"));
        assert!(hits[0].keyword_score > 0.9);
    }

    #[tokio::test]
    async fn keyword_only_entries_still_rank() {
        let (search, store, _dir) = searchable().await;
        store.add_to_daily("kubernetes upgrade notes").unwrap();
        // No index_all: vector store is empty, keyword still hits.
        let hits = search.search("kubernetes", 5).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].vector_score, 0.0);
        assert!(hits[0].keyword_score > 0.0);
    }

    #[tokio::test]
    async fn recent_entries_score_one_on_recency() {
        let (search, store, _dir) = searchable().await;
        store.add_to_daily("today's standup notes").unwrap();
        search.index_all().await;
        let hits = search.search("standup", 5).await;
        assert!((hits[0].recency_score - 1.0).abs() < 0.2);
    }

    #[tokio::test]
    async fn respects_k() {
        let (search, store, _dir) = searchable().await;
        for i in 0..10 {
            store.add_to_daily(&format!("meeting note number {i}")).unwrap();
        }
        search.index_all().await;
        let hits = search.search("meeting note", 3).await;
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn keyword_score_partial_and_phrase() {
        let full = HybridSearch::keyword_score("alpha beta", "alpha beta gamma");
        let partial = HybridSearch::keyword_score("alpha beta", "only alpha here");
        let none = HybridSearch::keyword_score("alpha beta", "nothing relevant");
        assert!(full > partial);
        assert!((partial - 0.5).abs() < 1e-9);
        assert_eq!(none, 0.0);
    }

    #[tokio::test]
    async fn weights_shift_ranking() {
        let (search, store, _dir) = searchable().await;
        store.add_to_daily("rust memory ownership rules").unwrap();
        search.index_all().await;

        let keyword_heavy = HybridSearch::new(
            search.store.clone(),
            search.index.clone(),
            search.embedder.clone(),
        )
        .with_weights(SearchWeights {
            vector: 0.0,
            keyword: 1.0,
            recency: 0.0,
            recency_days: 30,
        });
        let hits = keyword_heavy.search("rust ownership", 5).await;
        assert!(!hits.is_empty());
        assert!((hits[0].combined_score - hits[0].keyword_score).abs() < 1e-9);
    }
}
