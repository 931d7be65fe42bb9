//! The cron service: scheduler + storage + the ticker that injects
//! synthetic envelopes into the bus.

pub mod scheduler;
pub mod storage;

pub use scheduler::Scheduler;
pub use storage::JobStorage;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hivegate_core::bus::MessageBus;
use hivegate_types::cron::{CronJob, JobOutcome, JobPayload, Schedule};
use hivegate_types::event::InboundEnvelope;

use crate::error::{Result, ServiceError};

/// Fabric identifier stamped on scheduler-originated envelopes before
/// they are wrapped as system envelopes.
pub const SCHEDULER_FABRIC: &str = "scheduler";

/// The cron service.
pub struct CronService {
    bus: Arc<MessageBus>,
    scheduler: Mutex<Scheduler>,
    storage: Option<JobStorage>,
    tick_interval: Duration,
}

impl CronService {
    /// In-memory service with a 1s tick.
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self {
            bus,
            scheduler: Mutex::new(Scheduler::new()),
            storage: None,
            tick_interval: Duration::from_secs(1),
        }
    }

    /// Service persisting jobs at `path`, loading existing ones eagerly.
    pub async fn with_storage(bus: Arc<MessageBus>, path: impl Into<std::path::PathBuf>) -> Self {
        let storage = JobStorage::new(path);
        let mut scheduler = Scheduler::new();
        match storage.load().await {
            Ok(jobs) => {
                for job in jobs {
                    if let Err(e) = scheduler.add(job) {
                        warn!(error = %e, "skipping unloadable job");
                    }
                }
            }
            Err(e) => warn!(error = %e, "job store unreadable, starting empty"),
        }
        Self {
            bus,
            scheduler: Mutex::new(scheduler),
            storage: Some(storage),
            tick_interval: Duration::from_secs(1),
        }
    }

    /// Tick cadence (tests shorten this).
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    async fn persist(&self, scheduler: &Scheduler) {
        if let Some(storage) = &self.storage
            && let Err(e) = storage.save(&scheduler.list()).await
        {
            warn!(error = %e, "failed to persist cron jobs");
        }
    }

    /// Add a job (id generated when empty) and schedule its first run.
    pub async fn add_job(&self, mut job: CronJob) -> Result<String> {
        if job.id.is_empty() {
            job.id = Uuid::new_v4().to_string();
        }
        if job.created_at_ms == 0 {
            job.created_at_ms = Utc::now().timestamp_millis();
        }
        job.state.next_run_at_ms =
            Scheduler::next_run(&job.schedule, &Utc::now())?;

        let id = job.id.clone();
        let mut scheduler = self.scheduler.lock().await;
        scheduler.add(job)?;
        self.persist(&scheduler).await;
        info!(job = %id, "cron job added");
        Ok(id)
    }

    /// Remove a job.
    pub async fn remove_job(&self, job_id: &str) -> Result<()> {
        let mut scheduler = self.scheduler.lock().await;
        scheduler.remove(job_id)?;
        self.persist(&scheduler).await;
        info!(job = %job_id, "cron job removed");
        Ok(())
    }

    /// List all jobs.
    pub async fn list_jobs(&self) -> Vec<CronJob> {
        self.scheduler.lock().await.list()
    }

    /// Enable or disable a job.
    pub async fn set_enabled(&self, job_id: &str, enabled: bool) -> Result<()> {
        let mut scheduler = self.scheduler.lock().await;
        let job = scheduler
            .get_mut(job_id)
            .ok_or_else(|| ServiceError::JobNotFound(job_id.to_string()))?;
        job.enabled = enabled;
        self.persist(&scheduler).await;
        Ok(())
    }

    /// Fire a job outside its schedule. With `force`, disabled jobs fire
    /// too.
    pub async fn run_job(&self, job_id: &str, force: bool) -> Result<()> {
        let job = {
            let scheduler = self.scheduler.lock().await;
            scheduler
                .get(job_id)
                .cloned()
                .ok_or_else(|| ServiceError::JobNotFound(job_id.to_string()))?
        };
        if !job.enabled && !force {
            return Err(ServiceError::JobNotFound(format!(
                "{job_id} is disabled (use force)"
            )));
        }
        self.fire(&job).await?;
        self.after_fire(&job.id).await;
        Ok(())
    }

    /// Publish the job's synthetic inbound envelope.
    ///
    /// The envelope is a system envelope whose conversation encodes the
    /// delivery target, so the agent loop routes the reply to the job's
    /// fabric/conversation, or back to the scheduler's own session when
    /// no target is configured.
    async fn fire(&self, job: &CronJob) -> Result<()> {
        let JobPayload {
            message,
            fabric,
            conversation,
        } = &job.payload;

        let (origin_fabric, origin_conversation) = match (fabric, conversation) {
            (Some(fabric), Some(conversation)) => {
                (fabric.clone(), conversation.clone())
            }
            _ => (SCHEDULER_FABRIC.to_string(), job.id.clone()),
        };

        let envelope =
            InboundEnvelope::system(&origin_fabric, &origin_conversation, message);
        debug!(job = %job.id, fabric = %origin_fabric, "cron job firing");
        self.bus
            .publish_inbound(envelope)
            .map_err(|e| ServiceError::Bus(e.to_string()))
    }

    /// Post-fire bookkeeping: record the run, compute the next one, drop
    /// `delete_after_run` jobs and exhausted one-shots.
    async fn after_fire(&self, job_id: &str) {
        let mut scheduler = self.scheduler.lock().await;
        let now = Utc::now();

        let delete = match scheduler.get_mut(job_id) {
            Some(job) => {
                job.state.last_run_at_ms = Some(now.timestamp_millis());
                job.state.last_outcome = Some(JobOutcome::Ok);
                job.state.next_run_at_ms = Scheduler::next_run(&job.schedule, &now)
                    .ok()
                    .flatten();
                job.delete_after_run
                    || (matches!(job.schedule, Schedule::At { .. })
                        && job.state.next_run_at_ms.is_none())
            }
            None => false,
        };

        if delete {
            let _ = scheduler.remove(job_id);
            info!(job = %job_id, "cron job removed after firing");
        }
        self.persist(&scheduler).await;
    }

    /// One scheduler pass: fire everything due.
    pub async fn tick(&self) -> usize {
        let due = {
            let scheduler = self.scheduler.lock().await;
            scheduler.due_jobs(&Utc::now())
        };
        let mut fired = 0;
        for job in due {
            match self.fire(&job).await {
                Ok(()) => {
                    fired += 1;
                    self.after_fire(&job.id).await;
                }
                Err(e) => {
                    warn!(job = %job.id, error = %e, "cron fire failed");
                    let mut scheduler = self.scheduler.lock().await;
                    if let Some(job) = scheduler.get_mut(&job.id) {
                        job.state.last_outcome = Some(JobOutcome::Error);
                        job.state.last_error = Some(e.to_string());
                    }
                }
            }
        }
        fired
    }

    /// Run the ticker until the token fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("cron service started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("cron service stopped");
                    return;
                }
                _ = tokio::time::sleep(self.tick_interval) => {
                    self.tick().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hivegate_types::cron::JobState;

    fn every_job(id: &str, name: &str, every_ms: i64) -> CronJob {
        CronJob {
            id: id.into(),
            name: name.into(),
            enabled: true,
            schedule: Schedule::Every { every_ms },
            payload: JobPayload {
                message: "scheduled check-in".into(),
                fabric: Some("teams".into()),
                conversation: Some("standup".into()),
            },
            state: JobState::default(),
            delete_after_run: false,
            created_at_ms: 0,
        }
    }

    #[tokio::test]
    async fn add_list_remove() {
        let bus = Arc::new(MessageBus::new());
        let service = CronService::new(bus);
        let id = service.add_job(every_job("", "hourly", 3_600_000)).await.unwrap();
        assert!(!id.is_empty());
        assert_eq!(service.list_jobs().await.len(), 1);
        service.remove_job(&id).await.unwrap();
        assert!(service.list_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn due_job_fires_system_envelope_with_target() {
        let bus = Arc::new(MessageBus::new());
        let service = CronService::new(bus.clone());
        let mut job = every_job("j1", "check-in", 3_600_000);
        job.state.next_run_at_ms = Some(Utc::now().timestamp_millis() - 1000);
        {
            let mut scheduler = service.scheduler.lock().await;
            scheduler.add(job).unwrap();
        }

        assert_eq!(service.tick().await, 1);

        let envelope = bus.consume_inbound().await.unwrap();
        assert!(envelope.is_system());
        assert_eq!(envelope.content, "scheduled check-in");
        assert_eq!(
            envelope.origin(),
            ("teams".to_string(), "standup".to_string())
        );

        // Next run was recomputed into the future.
        let jobs = service.list_jobs().await;
        assert!(jobs[0].state.next_run_at_ms.unwrap() > Utc::now().timestamp_millis());
        assert_eq!(jobs[0].state.last_outcome, Some(JobOutcome::Ok));
    }

    #[tokio::test]
    async fn job_without_target_routes_to_scheduler_session() {
        let bus = Arc::new(MessageBus::new());
        let service = CronService::new(bus.clone());
        let mut job = every_job("j1", "introspect", 3_600_000);
        job.payload.fabric = None;
        job.payload.conversation = None;
        service.add_job(job).await.unwrap();
        service.run_job("j1", false).await.unwrap();

        let envelope = bus.consume_inbound().await.unwrap();
        assert_eq!(
            envelope.origin(),
            (SCHEDULER_FABRIC.to_string(), "j1".to_string())
        );
    }

    #[tokio::test]
    async fn delete_after_run_removes_job() {
        let bus = Arc::new(MessageBus::new());
        let service = CronService::new(bus.clone());
        let mut job = every_job("once", "one-shot", 3_600_000);
        job.delete_after_run = true;
        service.add_job(job).await.unwrap();

        service.run_job("once", false).await.unwrap();
        assert!(service.list_jobs().await.is_empty());
        assert!(bus.consume_inbound().await.is_some());
    }

    #[tokio::test]
    async fn at_job_fires_once_and_is_removed() {
        let bus = Arc::new(MessageBus::new());
        let service = CronService::new(bus.clone());
        let job = CronJob {
            id: "at1".into(),
            name: "deadline".into(),
            enabled: true,
            schedule: Schedule::At {
                at_ms: Utc::now().timestamp_millis() + 50,
            },
            payload: JobPayload {
                message: "go".into(),
                fabric: None,
                conversation: None,
            },
            state: JobState::default(),
            delete_after_run: false,
            created_at_ms: 0,
        };
        service.add_job(job).await.unwrap();

        // Not yet due.
        assert_eq!(service.tick().await, 0);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(service.tick().await, 1);

        // One fire, then gone: a fired At schedule has no next run.
        assert!(bus.consume_inbound().await.is_some());
        assert!(service.list_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn disabled_job_needs_force() {
        let bus = Arc::new(MessageBus::new());
        let service = CronService::new(bus.clone());
        service.add_job(every_job("j1", "n", 3_600_000)).await.unwrap();
        service.set_enabled("j1", false).await.unwrap();

        assert!(service.run_job("j1", false).await.is_err());
        service.run_job("j1", true).await.unwrap();
        assert!(bus.consume_inbound().await.is_some());
    }

    #[tokio::test]
    async fn persistence_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cron.json");
        let bus = Arc::new(MessageBus::new());
        {
            let service = CronService::with_storage(bus.clone(), &path).await;
            service.add_job(every_job("", "hourly", 3_600_000)).await.unwrap();
        }
        let service = CronService::with_storage(bus, &path).await;
        assert_eq!(service.list_jobs().await.len(), 1);
        assert_eq!(service.list_jobs().await[0].name, "hourly");
    }

    #[tokio::test]
    async fn ticker_fires_with_short_interval() {
        let bus = Arc::new(MessageBus::new());
        let service = Arc::new(
            CronService::new(bus.clone())
                .with_tick_interval(Duration::from_millis(10)),
        );
        let mut job = every_job("fast", "fast", 10);
        job.state.next_run_at_ms = Some(Utc::now().timestamp_millis());
        {
            let mut scheduler = service.scheduler.lock().await;
            scheduler.add(job).unwrap();
        }

        let cancel = CancellationToken::new();
        let runner = {
            let service = service.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { service.run(cancel).await })
        };

        let envelope =
            tokio::time::timeout(Duration::from_secs(2), bus.consume_inbound())
                .await
                .expect("job should fire")
                .unwrap();
        assert_eq!(envelope.content, "scheduled check-in");

        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(1), runner).await;
    }
}
