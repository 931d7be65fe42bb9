//! Memory evolution lifecycle.
//!
//! A periodic, idempotent cycle over all entries:
//! promotion (frequently accessed memories gain score), decay (idle ones
//! lose it), archival (long-idle or low-importance entries leave the
//! active set), cross-referencing (shared tags or vector similarity link
//! entries), and consolidation (near-duplicate pairs merge into the
//! longer entry). Every step supports `dry_run`, reporting the ids it
//! would change without touching them.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use tracing::info;

use super::embedder::Embedder;
use super::store::{MemoryEntry, MemoryStore};
use super::vector::{VectorIndex, cosine_similarity};

/// Tunables for the evolution cycle.
#[derive(Debug, Clone)]
pub struct EvolutionConfig {
    /// Accesses within the window needed for promotion.
    pub promotion_access_threshold: u64,
    /// Trailing window for counting accesses, in days.
    pub promotion_window_days: i64,
    /// Score boost on promotion.
    pub promotion_boost: f64,
    /// Idle days before decay applies.
    pub decay_inactive_days: i64,
    /// Score reduction per decay.
    pub decay_amount: f64,
    /// Idle days before archival (ordinary entries).
    pub archive_inactive_days: i64,
    /// Idle days before archival for low-importance entries.
    pub archive_fast_days: i64,
    /// Effective importance below which the fast window applies.
    pub archive_min_importance: f64,
    /// Shared tags needed for a tag cross-reference.
    pub cross_reference_min_tags: usize,
    /// Vector similarity for a similarity cross-reference.
    pub cross_reference_similarity: f32,
    /// Vector similarity at which two entries consolidate.
    pub consolidation_threshold: f32,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            promotion_access_threshold: 3,
            promotion_window_days: 7,
            promotion_boost: 0.1,
            decay_inactive_days: 30,
            decay_amount: 0.1,
            archive_inactive_days: 90,
            archive_fast_days: 30,
            archive_min_importance: 0.1,
            cross_reference_min_tags: 2,
            cross_reference_similarity: 0.7,
            consolidation_threshold: 0.85,
        }
    }
}

/// Report from one evolution cycle.
#[derive(Debug, Clone, Default)]
pub struct EvolutionReport {
    pub promoted: Vec<String>,
    pub decayed: Vec<String>,
    pub archived: Vec<String>,
    pub cross_refs_added: usize,
    pub consolidated: usize,
    pub duration_ms: f64,
}

/// Runs the evolution lifecycle over a memory store.
pub struct EvolutionEngine {
    store: Arc<MemoryStore>,
    index: Option<Arc<VectorIndex>>,
    embedder: Option<Arc<dyn Embedder>>,
    config: EvolutionConfig,
}

impl EvolutionEngine {
    /// Engine without vector support (tag cross-referencing only; no
    /// consolidation).
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            index: None,
            embedder: None,
            config: EvolutionConfig::default(),
        }
    }

    /// Enable vector-based cross-referencing and consolidation.
    pub fn with_vectors(
        mut self,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        self.index = Some(index);
        self.embedder = Some(embedder);
        self
    }

    /// Override the tunables.
    pub fn with_config(mut self, config: EvolutionConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the full cycle. With `dry_run` the report lists would-change
    /// ids and nothing is written.
    pub async fn evolve(&self, dry_run: bool) -> EvolutionReport {
        let start = Instant::now();
        let mut report = EvolutionReport::default();

        report.promoted = self.run_promotion(dry_run);
        report.decayed = self.run_decay(dry_run);
        report.archived = self.run_archival(dry_run);
        report.cross_refs_added = self.run_cross_reference(dry_run).await;
        report.consolidated = self.run_consolidation(dry_run).await;

        report.duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        info!(
            promoted = report.promoted.len(),
            decayed = report.decayed.len(),
            archived = report.archived.len(),
            cross_refs = report.cross_refs_added,
            consolidated = report.consolidated,
            dry_run,
            "evolution cycle complete"
        );
        report
    }

    /// Promotion: boost entries accessed enough times within the window,
    /// clamped at 1.0.
    fn run_promotion(&self, dry_run: bool) -> Vec<String> {
        let window_start = Utc::now() - Duration::days(self.config.promotion_window_days);
        let mut promoted = Vec::new();

        for entry in self.store.all_entries() {
            let data = self.store.evolution_data(&entry.id);
            if data.archived {
                continue;
            }
            if data.access_count >= self.config.promotion_access_threshold
                && data.last_accessed.map(|t| t >= window_start).unwrap_or(false)
            {
                if !dry_run {
                    let boost = self.config.promotion_boost;
                    self.store.update_evolution(&entry.id, |d| {
                        d.promotion_score = (d.promotion_score + boost).min(1.0);
                    });
                }
                promoted.push(entry.id);
            }
        }
        promoted
    }

    /// Decay: reduce score for entries idle past the cutoff, clamped at
    /// -0.5.
    fn run_decay(&self, dry_run: bool) -> Vec<String> {
        let cutoff = Utc::now() - Duration::days(self.config.decay_inactive_days);
        let mut decayed = Vec::new();

        for entry in self.store.all_entries() {
            let data = self.store.evolution_data(&entry.id);
            if data.archived {
                continue;
            }
            let last_activity = data.last_accessed.unwrap_or(entry.timestamp);
            if last_activity < cutoff {
                if !dry_run {
                    let amount = self.config.decay_amount;
                    self.store.update_evolution(&entry.id, |d| {
                        d.promotion_score = (d.promotion_score - amount).max(-0.5);
                    });
                }
                decayed.push(entry.id);
            }
        }
        decayed
    }

    /// Archival: entries below the importance floor archive after the
    /// short window, everything else after the long one.
    fn run_archival(&self, dry_run: bool) -> Vec<String> {
        let now = Utc::now();
        let slow_cutoff = now - Duration::days(self.config.archive_inactive_days);
        let fast_cutoff = now - Duration::days(self.config.archive_fast_days);
        let mut archived = Vec::new();

        for entry in self.store.all_entries() {
            let data = self.store.evolution_data(&entry.id);
            if data.archived {
                continue;
            }
            let effective = entry.importance + data.promotion_score;
            let cutoff = if effective < self.config.archive_min_importance {
                fast_cutoff
            } else {
                slow_cutoff
            };
            let last_activity = data.last_accessed.unwrap_or(entry.timestamp);
            if last_activity < cutoff {
                if !dry_run {
                    let _ = self.store.archive_entry(&entry);
                    if let Some(index) = &self.index {
                        index.remove(&entry.id);
                    }
                }
                archived.push(entry.id);
            }
        }
        archived
    }

    /// Cross-reference entries sharing enough tags, plus vector-similar
    /// pairs when an index is attached.
    async fn run_cross_reference(&self, dry_run: bool) -> usize {
        let entries = self.store.active_entries();
        let mut added = 0;

        for (i, entry) in entries.iter().enumerate() {
            if entry.tags.is_empty() {
                continue;
            }
            let existing = self.store.evolution_data(&entry.id).cross_references;
            for other in entries.iter().skip(i + 1) {
                if other.tags.is_empty() || existing.contains(&other.id) {
                    continue;
                }
                let shared = entry
                    .tags
                    .iter()
                    .filter(|t| other.tags.contains(t))
                    .count();
                if shared >= self.config.cross_reference_min_tags {
                    if !dry_run {
                        self.store.add_cross_reference(&entry.id, &other.id);
                    }
                    added += 1;
                }
            }
        }

        if let (Some(index), Some(embedder)) = (&self.index, &self.embedder) {
            for entry in entries.iter().take(50) {
                let existing = self.store.evolution_data(&entry.id).cross_references;
                let Ok(vector) = embedder.embed(&entry.content).await else {
                    continue;
                };
                for hit in index.search(&vector, 5, self.config.cross_reference_similarity)
                {
                    if hit.entry_id != entry.id && !existing.contains(&hit.entry_id) {
                        if !dry_run {
                            self.store.add_cross_reference(&entry.id, &hit.entry_id);
                        }
                        added += 1;
                    }
                }
            }
        }
        added
    }

    /// Consolidation: merge near-duplicate pairs, keeping the longer
    /// entry, transferring the access count, and linking the two.
    async fn run_consolidation(&self, dry_run: bool) -> usize {
        let (Some(index), Some(embedder)) = (&self.index, &self.embedder) else {
            return 0;
        };

        let entries = self.store.active_entries();
        let mut merged: Vec<String> = Vec::new();
        let mut consolidated = 0;

        for entry in &entries {
            if merged.contains(&entry.id) {
                continue;
            }
            let Ok(vector) = embedder.embed(&entry.content).await else {
                continue;
            };
            for hit in index.search(&vector, 3, self.config.consolidation_threshold) {
                if hit.entry_id == entry.id || merged.contains(&hit.entry_id) {
                    continue;
                }
                let Some(other) = entries.iter().find(|e| e.id == hit.entry_id) else {
                    continue;
                };

                let (keeper, loser) = if other.content.len() > entry.content.len() {
                    (other, entry)
                } else {
                    (entry, other)
                };

                if !dry_run {
                    let loser_data = self.store.evolution_data(&loser.id);
                    let _ = self.store.archive_entry(loser);
                    index.remove(&loser.id);
                    self.store.add_cross_reference(&keeper.id, &loser.id);
                    self.store.update_evolution(&keeper.id, |d| {
                        d.access_count += loser_data.access_count;
                    });
                }
                merged.push(loser.id.clone());
                consolidated += 1;
            }
        }
        consolidated
    }

    /// Verify two vectors' similarity (exposed for tests and tooling).
    pub fn similarity(a: &[f32], b: &[f32]) -> f32 {
        cosine_similarity(a, b)
    }
}
