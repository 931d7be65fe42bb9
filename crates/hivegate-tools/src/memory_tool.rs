//! The `memory` tool.
//!
//! Lets the model search and extend the deep memory store: hybrid search,
//! daily notes, long-term sections, and a recent-memories digest.

use std::sync::Arc;

use async_trait::async_trait;

use hivegate_core::memory::{HybridSearch, MemoryStore};
use hivegate_core::tools::{Tool, ToolError};

/// Memory access tool over the store and hybrid search.
pub struct MemoryTool {
    store: Arc<MemoryStore>,
    search: Arc<HybridSearch>,
}

impl MemoryTool {
    /// Create the tool.
    pub fn new(store: Arc<MemoryStore>, search: Arc<HybridSearch>) -> Self {
        Self { store, search }
    }
}

#[async_trait]
impl Tool for MemoryTool {
    fn name(&self) -> &str {
        "memory"
    }

    fn description(&self) -> &str {
        "Search and manage long-term memory. Actions: search (query), \
         add_daily (content), add_long_term (content, section), \
         get_recent (days)."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["search", "add_daily", "add_long_term", "get_recent"],
                    "description": "The memory action to perform"
                },
                "query": {
                    "type": "string",
                    "description": "Search query (action=search)"
                },
                "content": {
                    "type": "string",
                    "description": "Content to store (add actions)"
                },
                "section": {
                    "type": "string",
                    "description": "Long-term section name (action=add_long_term)"
                },
                "days": {
                    "type": "integer",
                    "description": "Days of recent memory to return (action=get_recent)"
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let action = args
            .get("action")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("missing 'action'".into()))?;

        match action {
            "search" => {
                let query = args
                    .get("query")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| ToolError::InvalidArgs("search needs 'query'".into()))?;
                let hits = self.search.search(query, 5).await;
                if hits.is_empty() {
                    return Ok("No memories found matching the query.".into());
                }
                let mut lines = vec![format!("Found {} relevant memories:", hits.len())];
                for (i, hit) in hits.iter().enumerate() {
                    let snippet: String = hit.entry.content.chars().take(200).collect();
                    lines.push(format!(
                        "{}. [score {:.2}] ({}) {}",
                        i + 1,
                        hit.combined_score,
                        hit.entry.source,
                        snippet
                    ));
                    self.store.record_access(&hit.entry.id);
                }
                Ok(lines.join("\n"))
            }
            "add_daily" => {
                let content = args
                    .get("content")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| ToolError::InvalidArgs("add_daily needs 'content'".into()))?;
                self.store
                    .add_to_daily(content)
                    .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
                Ok("Added to daily notes".into())
            }
            "add_long_term" => {
                let content = args
                    .get("content")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        ToolError::InvalidArgs("add_long_term needs 'content'".into())
                    })?;
                let section = args.get("section").and_then(|v| v.as_str()).unwrap_or("");
                self.store
                    .add_to_long_term(content, section)
                    .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
                Ok(if section.is_empty() {
                    "Added to long-term memory".to_string()
                } else {
                    format!("Added to long-term memory in section '{section}'")
                })
            }
            "get_recent" => {
                let days = args.get("days").and_then(|v| v.as_u64()).unwrap_or(7);
                let context = self.store.context_for_prompt(4000);
                if context.is_empty() {
                    Ok(format!("No memories from the last {days} days"))
                } else {
                    Ok(context)
                }
            }
            other => Err(ToolError::InvalidArgs(format!("unknown action: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hivegate_core::memory::{ChainEmbedder, Embedder, VectorIndex};
    use tempfile::TempDir;

    fn tool() -> (MemoryTool, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new(dir.path()));
        let index = Arc::new(VectorIndex::new(384));
        let embedder: Arc<dyn Embedder> = Arc::new(ChainEmbedder::local_only(384));
        let search = Arc::new(HybridSearch::new(store.clone(), index, embedder));
        (MemoryTool::new(store, search), dir)
    }

    #[tokio::test]
    async fn add_then_search() {
        let (tool, _dir) = tool();
        tool.execute(serde_json::json!({
            "action": "add_daily",
            "content": "the deploy pipeline moved to blue-green"
        }))
        .await
        .unwrap();

        let output = tool
            .execute(serde_json::json!({"action": "search", "query": "deploy pipeline"}))
            .await
            .unwrap();
        assert!(output.contains("relevant memories"));
        assert!(output.contains("blue-green"));
    }

    #[tokio::test]
    async fn search_records_access() {
        let (tool, _dir) = tool();
        tool.execute(serde_json::json!({
            "action": "add_daily",
            "content": "kubernetes cluster upgraded"
        }))
        .await
        .unwrap();
        tool.execute(serde_json::json!({"action": "search", "query": "kubernetes"}))
            .await
            .unwrap();

        let entry = tool.store.all_entries().pop().unwrap();
        assert_eq!(tool.store.evolution_data(&entry.id).access_count, 1);
    }

    #[tokio::test]
    async fn add_long_term_with_section() {
        let (tool, _dir) = tool();
        let output = tool
            .execute(serde_json::json!({
                "action": "add_long_term",
                "content": "prefers tabs",
                "section": "Preferences"
            }))
            .await
            .unwrap();
        assert!(output.contains("Preferences"));
        assert!(tool.store.long_term().contains("## Preferences"));
    }

    #[tokio::test]
    async fn get_recent_empty_and_filled() {
        let (tool, _dir) = tool();
        let output = tool
            .execute(serde_json::json!({"action": "get_recent"}))
            .await
            .unwrap();
        assert!(output.contains("No memories"));

        tool.execute(serde_json::json!({"action": "add_daily", "content": "note"}))
            .await
            .unwrap();
        let output = tool
            .execute(serde_json::json!({"action": "get_recent", "days": 3}))
            .await
            .unwrap();
        assert!(output.contains("note"));
    }

    #[tokio::test]
    async fn bad_action_and_missing_params() {
        let (tool, _dir) = tool();
        assert!(tool
            .execute(serde_json::json!({"action": "transmogrify"}))
            .await
            .is_err());
        assert!(tool
            .execute(serde_json::json!({"action": "search"}))
            .await
            .is_err());
    }
}
