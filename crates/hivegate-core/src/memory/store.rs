//! Durable memory store.
//!
//! Layout under the memory directory:
//! - `MEMORY.md`: long-term memory, section per topic
//! - `YYYY-MM-DD.md`: daily notes
//! - `index.json`: evolution side-table keyed by entry id
//! - `archive/`: snapshots of archived entries
//!
//! Entries are parsed out of the markdown files on read: each
//! header-delimited section becomes one [`MemoryEntry`], with `#hashtag`
//! and `[[wiki-link]]` tags captured at parse time. Evolution fields live
//! in the side-table and are write-owned by the evolution engine.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use hivegate_types::Result;

/// One memory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Stable id: `{source}:{yyyymmdd}:{ordinal}`.
    pub id: String,
    /// Section content.
    pub content: String,
    /// Origin: "daily", "long_term", or "session".
    pub source: String,
    /// Entry date.
    pub timestamp: DateTime<Utc>,
    /// Tags extracted from the content.
    pub tags: Vec<String>,
    /// Base importance in `[0, 1]`.
    pub importance: f64,
    /// Arbitrary metadata (section header, etc.).
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Evolution side-table record for one entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionData {
    #[serde(default)]
    pub access_count: u64,
    #[serde(default)]
    pub last_accessed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub promotion_score: f64,
    #[serde(default = "default_decay_rate")]
    pub decay_rate: f64,
    #[serde(default)]
    pub cross_references: Vec<String>,
    #[serde(default)]
    pub archived: bool,
}

fn default_decay_rate() -> f64 {
    0.01
}

impl Default for EvolutionData {
    fn default() -> Self {
        Self {
            access_count: 0,
            last_accessed: None,
            promotion_score: 0.0,
            decay_rate: default_decay_rate(),
            cross_references: Vec::new(),
            archived: false,
        }
    }
}

/// File-backed memory store with an evolution side-table.
pub struct MemoryStore {
    dir: PathBuf,
    evolution: Mutex<HashMap<String, EvolutionData>>,
}

impl MemoryStore {
    /// Open (or initialize) a store under `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let evolution = match std::fs::read_to_string(dir.join("index.json")) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(error = %e, "evolution index unreadable, starting fresh");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        Self {
            dir,
            evolution: Mutex::new(evolution),
        }
    }

    fn long_term_path(&self) -> PathBuf {
        self.dir.join("MEMORY.md")
    }

    fn daily_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.md", date.format("%Y-%m-%d")))
    }

    /// Long-term memory content, empty when absent.
    pub fn long_term(&self) -> String {
        std::fs::read_to_string(self.long_term_path()).unwrap_or_default()
    }

    /// Daily notes for a date, empty when absent.
    pub fn daily(&self, date: NaiveDate) -> String {
        std::fs::read_to_string(self.daily_path(date)).unwrap_or_default()
    }

    /// Append timestamped content to today's daily notes.
    pub fn add_to_daily(&self, content: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let now = Utc::now();
        let path = self.daily_path(now.date_naive());
        let existing = std::fs::read_to_string(&path).unwrap_or_default();
        let entry = format!("\n### {}\n\n{}\n", now.format("%H:%M"), content);
        std::fs::write(&path, existing + &entry)?;
        Ok(())
    }

    /// Append content to long-term memory, under `section` when given.
    ///
    /// An existing `## section` is extended; a new one is created at the
    /// end of the file.
    pub fn add_to_long_term(&self, content: &str, section: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let mut existing = self.long_term();

        if section.is_empty() {
            existing = format!("{}\n\n{}\n", existing.trim_end(), content);
        } else {
            let pattern =
                Regex::new(&format!(r"(?s)(## {}\b.*?)(\n## |\z)", regex::escape(section)))
                    .expect("section regex");
            let replacement = pattern.captures(&existing).and_then(|captures| {
                captures.get(1).map(|matched| {
                    (
                        matched.range(),
                        format!("{}\n\n{}\n", matched.as_str().trim_end(), content),
                    )
                })
            });
            if let Some((range, updated)) = replacement {
                existing.replace_range(range, &updated);
            } else {
                existing = format!(
                    "{}\n\n## {}\n\n{}\n",
                    existing.trim_end(),
                    section,
                    content
                );
            }
        }
        std::fs::write(self.long_term_path(), existing)?;
        Ok(())
    }

    /// Extract `#hashtag` and `[[wiki-link]]` tags.
    fn extract_tags(content: &str) -> Vec<String> {
        let hashtag = Regex::new(r"#(\w+)").expect("hashtag regex");
        let wikilink = Regex::new(r"\[\[([^\]]+)\]\]").expect("wikilink regex");
        let mut tags: Vec<String> = hashtag
            .captures_iter(content)
            .map(|c| c[1].to_string())
            .chain(wikilink.captures_iter(content).map(|c| c[1].to_string()))
            .collect();
        tags.sort();
        tags.dedup();
        tags
    }

    /// Parse markdown into entries, one per header-delimited section.
    fn parse_content(
        content: &str,
        source: &str,
        date: DateTime<Utc>,
    ) -> Vec<MemoryEntry> {
        let header = Regex::new(r"(?m)^(#+\s+.+)$").expect("header regex");
        let mut entries = Vec::new();
        let mut current_header = String::new();
        let mut last_end = 0;
        let mut ordinal = 0;

        let mut push_section = |text: &str, header: &str, ordinal: &mut usize| {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return;
            }
            let mut metadata = HashMap::new();
            if !header.is_empty() {
                metadata.insert(
                    "header".to_string(),
                    serde_json::json!(header.trim_start_matches('#').trim()),
                );
            }
            entries.push(MemoryEntry {
                id: format!("{}:{}:{}", source, date.format("%Y%m%d"), ordinal),
                content: trimmed.to_string(),
                source: source.to_string(),
                timestamp: date,
                tags: Self::extract_tags(trimmed),
                importance: 0.5,
                metadata,
            });
            *ordinal += 1;
        };

        for m in header.find_iter(content) {
            push_section(&content[last_end..m.start()], &current_header, &mut ordinal);
            current_header = m.as_str().to_string();
            last_end = m.end();
        }
        push_section(&content[last_end..], &current_header, &mut ordinal);
        entries
    }

    /// All entries across long-term and daily files.
    pub fn all_entries(&self) -> Vec<MemoryEntry> {
        let mut entries = Vec::new();

        let long_term = self.long_term();
        if !long_term.is_empty() {
            entries.extend(Self::parse_content(&long_term, "long_term", Utc::now()));
        }

        let Ok(dir_entries) = std::fs::read_dir(&self.dir) else {
            return entries;
        };
        let mut daily_files: Vec<(NaiveDate, PathBuf)> = dir_entries
            .flatten()
            .filter_map(|e| {
                let path = e.path();
                let stem = path.file_stem()?.to_str()?.to_string();
                let date = NaiveDate::parse_from_str(&stem, "%Y-%m-%d").ok()?;
                Some((date, path))
            })
            .collect();
        daily_files.sort();

        for (date, path) in daily_files {
            if let Ok(content) = std::fs::read_to_string(&path) {
                let timestamp = date
                    .and_hms_opt(0, 0, 0)
                    .map(|dt| dt.and_utc())
                    .unwrap_or_else(Utc::now);
                entries.extend(Self::parse_content(&content, "daily", timestamp));
            }
        }
        entries
    }

    /// Active (non-archived) entries.
    pub fn active_entries(&self) -> Vec<MemoryEntry> {
        self.all_entries()
            .into_iter()
            .filter(|e| !self.evolution_data(&e.id).archived)
            .collect()
    }

    /// Substring keyword search over entry content.
    pub fn search_by_keyword(&self, query: &str, limit: usize) -> Vec<MemoryEntry> {
        let query = query.to_lowercase();
        self.active_entries()
            .into_iter()
            .filter(|e| e.content.to_lowercase().contains(&query))
            .take(limit)
            .collect()
    }

    /// Memory context for the system prompt: long-term first, then the
    /// most recent daily notes, within a rough token budget.
    pub fn context_for_prompt(&self, max_tokens: usize) -> String {
        let mut parts = Vec::new();
        let mut used = 0usize;

        let long_term = self.long_term();
        if !long_term.is_empty() {
            let tokens = long_term.len() / 4;
            if used + tokens < max_tokens {
                parts.push(format!("# Long-term Memory\n\n{long_term}"));
                used += tokens;
            }
        }

        let today = Utc::now().date_naive();
        for offset in 0..7 {
            let Some(date) = today.checked_sub_days(chrono::Days::new(offset)) else {
                break;
            };
            let content = self.daily(date);
            if content.is_empty() {
                continue;
            }
            let tokens = content.len() / 4;
            if used + tokens >= max_tokens {
                break;
            }
            parts.push(format!("# Daily Notes ({date})\n\n{content}"));
            used += tokens;
        }

        parts.join("\n\n---\n\n")
    }

    // ── Evolution side-table ────────────────────────────────────────────

    fn save_evolution(&self, evolution: &HashMap<String, EvolutionData>) {
        if std::fs::create_dir_all(&self.dir).is_err() {
            return;
        }
        match serde_json::to_string_pretty(evolution) {
            Ok(json) => {
                if let Err(e) = std::fs::write(self.dir.join("index.json"), json) {
                    warn!(error = %e, "failed to save evolution index");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize evolution index"),
        }
    }

    /// Evolution data for an entry (default record when untracked).
    pub fn evolution_data(&self, entry_id: &str) -> EvolutionData {
        self.evolution
            .lock()
            .unwrap()
            .get(entry_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Merge updates into an entry's evolution record.
    pub fn update_evolution(&self, entry_id: &str, update: impl FnOnce(&mut EvolutionData)) {
        let mut evolution = self.evolution.lock().unwrap();
        let record = evolution.entry(entry_id.to_string()).or_default();
        update(record);
        let snapshot = evolution.clone();
        drop(evolution);
        self.save_evolution(&snapshot);
    }

    /// Record an access: bumps count, touch time, and a small promotion.
    pub fn record_access(&self, entry_id: &str) {
        self.update_evolution(entry_id, |data| {
            data.access_count += 1;
            data.last_accessed = Some(Utc::now());
            data.promotion_score += 0.02;
        });
    }

    /// Create a bidirectional cross-reference between two entries.
    pub fn add_cross_reference(&self, a: &str, b: &str) {
        let mut evolution = self.evolution.lock().unwrap();
        let entry_a = evolution.entry(a.to_string()).or_default();
        if !entry_a.cross_references.contains(&b.to_string()) {
            entry_a.cross_references.push(b.to_string());
        }
        let entry_b = evolution.entry(b.to_string()).or_default();
        if !entry_b.cross_references.contains(&a.to_string()) {
            entry_b.cross_references.push(a.to_string());
        }
        let snapshot = evolution.clone();
        drop(evolution);
        self.save_evolution(&snapshot);
    }

    /// Archive an entry: flag it and snapshot its content under
    /// `archive/`.
    pub fn archive_entry(&self, entry: &MemoryEntry) -> Result<()> {
        let archive_dir = self.dir.join("archive");
        std::fs::create_dir_all(&archive_dir)?;
        let file_name = entry.id.replace([':', '/'], "_");
        std::fs::write(
            archive_dir.join(format!("{file_name}.md")),
            format!(
                "<!-- archived {} from {} -->\n{}\n",
                Utc::now().to_rfc3339(),
                entry.source,
                entry.content
            ),
        )?;
        self.update_evolution(&entry.id, |data| data.archived = true);
        Ok(())
    }

    /// Effective importance: base + promotion score.
    pub fn effective_importance(&self, entry: &MemoryEntry) -> f64 {
        entry.importance + self.evolution_data(&entry.id).promotion_score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (MemoryStore, TempDir) {
        let dir = TempDir::new().unwrap();
        (MemoryStore::new(dir.path()), dir)
    }

    #[test]
    fn daily_and_long_term_roundtrip() {
        let (store, _dir) = store();
        store.add_to_daily("met with the infra team").unwrap();
        store
            .add_to_long_term("prefers dark mode", "User Preferences")
            .unwrap();

        assert!(store.daily(Utc::now().date_naive()).contains("infra team"));
        let long_term = store.long_term();
        assert!(long_term.contains("## User Preferences"));
        assert!(long_term.contains("dark mode"));
    }

    #[test]
    fn long_term_section_appends_in_place() {
        let (store, _dir) = store();
        store.add_to_long_term("fact one", "Facts").unwrap();
        store.add_to_long_term("fact two", "Facts").unwrap();
        store.add_to_long_term("other", "Other").unwrap();

        let content = store.long_term();
        assert_eq!(content.matches("## Facts").count(), 1);
        let facts_pos = content.find("fact two").unwrap();
        let other_pos = content.find("## Other").unwrap();
        assert!(facts_pos < other_pos);
    }

    #[test]
    fn entries_parsed_with_tags() {
        let (store, _dir) = store();
        store
            .add_to_daily("talked about #rust and [[storage engines]]")
            .unwrap();
        let entries = store.all_entries();
        assert!(!entries.is_empty());
        let entry = entries
            .iter()
            .find(|e| e.content.contains("rust"))
            .unwrap();
        assert!(entry.tags.contains(&"rust".to_string()));
        assert!(entry.tags.contains(&"storage engines".to_string()));
        assert_eq!(entry.source, "daily");
    }

    #[test]
    fn keyword_search_filters_archived() {
        let (store, _dir) = store();
        store.add_to_daily("the database migration finished").unwrap();
        let hits = store.search_by_keyword("migration", 10);
        assert_eq!(hits.len(), 1);

        store.archive_entry(&hits[0]).unwrap();
        assert!(store.search_by_keyword("migration", 10).is_empty());
    }

    #[test]
    fn record_access_updates_side_table() {
        let (store, _dir) = store();
        store.record_access("daily:20250101:0");
        store.record_access("daily:20250101:0");
        let data = store.evolution_data("daily:20250101:0");
        assert_eq!(data.access_count, 2);
        assert!(data.last_accessed.is_some());
        assert!((data.promotion_score - 0.04).abs() < 1e-9);
    }

    #[test]
    fn evolution_index_persists() {
        let dir = TempDir::new().unwrap();
        {
            let store = MemoryStore::new(dir.path());
            store.record_access("x:1:0");
        }
        let reopened = MemoryStore::new(dir.path());
        assert_eq!(reopened.evolution_data("x:1:0").access_count, 1);
    }

    #[test]
    fn cross_references_are_bidirectional() {
        let (store, _dir) = store();
        store.add_cross_reference("a", "b");
        assert!(store.evolution_data("a").cross_references.contains(&"b".into()));
        assert!(store.evolution_data("b").cross_references.contains(&"a".into()));
        // Adding again does not duplicate.
        store.add_cross_reference("a", "b");
        assert_eq!(store.evolution_data("a").cross_references.len(), 1);
    }

    #[test]
    fn archive_writes_snapshot() {
        let (store, dir) = store();
        store.add_to_daily("ephemeral detail").unwrap();
        let entry = store.all_entries().pop().unwrap();
        store.archive_entry(&entry).unwrap();

        assert!(store.evolution_data(&entry.id).archived);
        let archive: Vec<_> = std::fs::read_dir(dir.path().join("archive"))
            .unwrap()
            .collect();
        assert_eq!(archive.len(), 1);
    }

    #[test]
    fn context_respects_budget() {
        let (store, _dir) = store();
        store.add_to_long_term(&"x".repeat(4000), "Big").unwrap();
        store.add_to_daily("today's note").unwrap();

        // Budget too small for the long-term blob but fine for the note.
        let context = store.context_for_prompt(500);
        assert!(!context.contains("Big"));
        assert!(context.contains("today's note"));
    }

    #[test]
    fn effective_importance_combines_base_and_promotion() {
        let (store, _dir) = store();
        store.add_to_daily("note").unwrap();
        let entry = store.all_entries().pop().unwrap();
        assert!((store.effective_importance(&entry) - 0.5).abs() < 1e-9);
        store.update_evolution(&entry.id, |d| d.promotion_score = 0.2);
        assert!((store.effective_importance(&entry) - 0.7).abs() < 1e-9);
    }
}
