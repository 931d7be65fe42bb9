//! Job store persistence: one JSON file holding every job.

use std::path::PathBuf;

use tracing::debug;

use hivegate_types::cron::{CronJob, JobStore};

use crate::error::Result;

/// File-backed job storage.
pub struct JobStorage {
    path: PathBuf,
}

impl JobStorage {
    /// Storage at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load all jobs; an absent file is an empty store.
    pub async fn load(&self) -> Result<Vec<CronJob>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        let store: JobStore = serde_json::from_str(&content)?;
        debug!(jobs = store.jobs.len(), "loaded cron jobs");
        Ok(store.jobs)
    }

    /// Persist all jobs.
    pub async fn save(&self, jobs: &[CronJob]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let store = JobStore {
            version: 1,
            jobs: jobs.to_vec(),
        };
        tokio::fs::write(&self.path, serde_json::to_string_pretty(&store)?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hivegate_types::cron::{JobPayload, JobState, Schedule};
    use tempfile::TempDir;

    fn job(id: &str) -> CronJob {
        CronJob {
            id: id.into(),
            name: format!("job {id}"),
            enabled: true,
            schedule: Schedule::Every { every_ms: 1000 },
            payload: JobPayload::default(),
            state: JobState::default(),
            delete_after_run: false,
            created_at_ms: 0,
        }
    }

    #[tokio::test]
    async fn missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let storage = JobStorage::new(dir.path().join("cron.json"));
        assert!(storage.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_and_load() {
        let dir = TempDir::new().unwrap();
        let storage = JobStorage::new(dir.path().join("cron.json"));
        storage.save(&[job("a"), job("b")]).await.unwrap();
        let loaded = storage.load().await.unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[tokio::test]
    async fn corrupt_file_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cron.json");
        tokio::fs::write(&path, "{broken").await.unwrap();
        assert!(JobStorage::new(&path).load().await.is_err());
    }
}
