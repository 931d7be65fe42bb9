//! Session persistence.
//!
//! One JSONL file per session key under the sessions directory. Line 1 is
//! a metadata object; every further line is one turn. Keys are
//! percent-encoded into file names so arbitrary fabric/conversation ids
//! survive the filesystem. Writes are serialized behind the store's lock;
//! readers get a clone of the cached session.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use hivegate_types::session::Session;
use hivegate_types::{GatewayError, Result};

/// Session store backed by one JSONL file per key.
pub struct SessionStore {
    dir: PathBuf,
    cache: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    /// Create a store rooted at `dir` (created on first write).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() || key.len() > 512 {
            return Err(GatewayError::InvalidIdentifier(format!(
                "session key length out of range: {}",
                key.len()
            )));
        }
        if key.contains('\0') || key.contains('/') || key.contains('\\') {
            return Err(GatewayError::InvalidIdentifier(
                "session key contains path characters".into(),
            ));
        }
        Ok(())
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let encoded = utf8_percent_encode(key, NON_ALPHANUMERIC).to_string();
        self.dir.join(format!("{encoded}.jsonl"))
    }

    /// Get a session from cache or disk, creating it when absent.
    pub async fn get_or_create(&self, key: &str) -> Result<Session> {
        Self::validate_key(key)?;

        let mut cache = self.cache.lock().await;
        if let Some(session) = cache.get(key) {
            return Ok(session.clone());
        }

        let session = match self.load_from_disk(key).await {
            Ok(session) => session,
            Err(_) => Session::new(key),
        };
        cache.insert(key.to_string(), session.clone());
        Ok(session)
    }

    async fn load_from_disk(&self, key: &str) -> Result<Session> {
        let path = self.path_for(key);
        let content = tokio::fs::read_to_string(&path).await?;
        let mut lines = content.lines();

        let meta_line = lines.next().ok_or_else(|| GatewayError::ConfigInvalid {
            reason: format!("session file is empty: {}", path.display()),
        })?;
        let meta: serde_json::Value = serde_json::from_str(meta_line)?;

        let mut session = Session::new(key);
        if let Some(created) = meta
            .get("created_at")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
        {
            session.created_at = created;
        }
        if let Some(updated) = meta
            .get("updated_at")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
        {
            session.updated_at = updated;
        }
        if let Some(metadata) = meta
            .get("metadata")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
        {
            session.metadata = metadata;
        }

        for line in lines {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<serde_json::Value>(trimmed) {
                Ok(turn) => session.turns.push(turn),
                Err(e) => {
                    warn!(key, error = %e, "skipping malformed turn line");
                }
            }
        }

        debug!(key, turns = session.turns.len(), "loaded session from disk");
        Ok(session)
    }

    /// Persist a session snapshot (metadata line + every turn) and update
    /// the cache.
    pub async fn save(&self, session: &Session) -> Result<()> {
        Self::validate_key(&session.key)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let meta = serde_json::json!({
            "_type": "metadata",
            "created_at": session.created_at.to_rfc3339(),
            "updated_at": session.updated_at.to_rfc3339(),
            "metadata": session.metadata,
        });
        let mut content = serde_json::to_string(&meta)?;
        content.push('\n');
        for turn in &session.turns {
            content.push_str(&serde_json::to_string(turn)?);
            content.push('\n');
        }

        let path = self.path_for(&session.key);
        tokio::fs::write(&path, content).await?;

        let mut cache = self.cache.lock().await;
        cache.insert(session.key.clone(), session.clone());
        debug!(key = %session.key, "saved session");
        Ok(())
    }

    /// Append a single turn, creating the session if needed.
    pub async fn append_turn(
        &self,
        key: &str,
        role: &str,
        content: &str,
    ) -> Result<()> {
        Self::validate_key(key)?;
        let mut session = self.get_or_create(key).await?;
        session.append(role, content, None, None);

        let path = self.path_for(key);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return self.save(&session).await;
        }

        let turn = serde_json::json!({
            "role": role,
            "content": content,
            "timestamp": Utc::now().to_rfc3339(),
        });
        let mut line = serde_json::to_string(&turn)?;
        line.push('\n');
        append_to_file(&path, &line).await?;

        let mut cache = self.cache.lock().await;
        cache.insert(key.to_string(), session);
        Ok(())
    }

    /// List all session keys found on disk.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(keys),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".jsonl") {
                match percent_decode_str(stem).decode_utf8() {
                    Ok(decoded) => keys.push(decoded.into_owned()),
                    Err(e) => warn!(file = %name, error = %e, "undecodable session file"),
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

async fn append_to_file(path: &Path, line: &str) -> Result<()> {
    use tokio::io::AsyncWriteExt;
    let mut file = tokio::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (SessionStore, TempDir) {
        let dir = TempDir::new().unwrap();
        (SessionStore::new(dir.path()), dir)
    }

    #[tokio::test]
    async fn create_save_reload() {
        let (store, _dir) = store();
        let mut session = store.get_or_create("cli:local").await.unwrap();
        session.append("user", "hello", None, None);
        session.append("assistant", "hi", None, None);
        store.save(&session).await.unwrap();

        // Fresh store on the same dir sees the persisted session.
        let store2 = SessionStore::new(_dir.path());
        let loaded = store2.get_or_create("cli:local").await.unwrap();
        assert_eq!(loaded.turns.len(), 2);
        assert_eq!(loaded.history(10)[1].content, "hi");
    }

    #[tokio::test]
    async fn append_turn_persists_incrementally() {
        let (store, dir) = store();
        store.append_turn("teams:t1", "user", "one").await.unwrap();
        store.append_turn("teams:t1", "assistant", "two").await.unwrap();

        let store2 = SessionStore::new(dir.path());
        let loaded = store2.get_or_create("teams:t1").await.unwrap();
        assert_eq!(loaded.turns.len(), 2);
    }

    #[tokio::test]
    async fn keys_with_special_characters_roundtrip() {
        let (store, _dir) = store();
        let key = "matrix:!room:server.org";
        let mut session = store.get_or_create(key).await.unwrap();
        session.append("user", "x", None, None);
        store.save(&session).await.unwrap();

        let keys = store.list().await.unwrap();
        assert_eq!(keys, vec![key.to_string()]);
    }

    #[tokio::test]
    async fn rejects_path_traversal_keys() {
        let (store, _dir) = store();
        assert!(store.get_or_create("../evil").await.is_err());
        assert!(store.get_or_create("a/b").await.is_err());
        assert!(store.get_or_create("").await.is_err());
    }

    #[tokio::test]
    async fn list_on_missing_dir_is_empty() {
        let store = SessionStore::new("/nonexistent/hivegate-test-sessions");
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_turn_lines_are_skipped() {
        let (store, dir) = store();
        let mut session = store.get_or_create("cli:x").await.unwrap();
        session.append("user", "good", None, None);
        store.save(&session).await.unwrap();

        // Corrupt the file with a garbage line.
        let path = dir.path().join("cli%3Ax.jsonl");
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{not json\n");
        std::fs::write(&path, content).unwrap();

        let store2 = SessionStore::new(dir.path());
        let loaded = store2.get_or_create("cli:x").await.unwrap();
        assert_eq!(loaded.turns.len(), 1);
    }

    #[tokio::test]
    async fn save_preserves_tool_call_turns() {
        let (store, dir) = store();
        let mut session = store.get_or_create("cli:t").await.unwrap();
        session.append(
            "assistant",
            "",
            Some(vec![serde_json::json!({"id": "c1", "type": "function"})]),
            None,
        );
        session.append("tool", "result", None, Some("c1"));
        store.save(&session).await.unwrap();

        let loaded = SessionStore::new(dir.path())
            .get_or_create("cli:t")
            .await
            .unwrap();
        let history = loaded.history(10);
        assert!(history[0].tool_calls.is_some());
        assert_eq!(history[1].tool_call_id.as_deref(), Some("c1"));
    }
}
