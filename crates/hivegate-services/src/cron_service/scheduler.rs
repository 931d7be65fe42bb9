//! In-memory job scheduler.
//!
//! Holds the job map, answers which jobs are due, and computes next run
//! times for all three schedule kinds. `at` schedules have no next run
//! once their instant has passed; `every` schedules advance by their
//! interval; `cron` schedules use the 7-field expression grammar of the
//! `cron` crate (seconds first).

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule as CronExpr;

use hivegate_types::cron::{CronJob, Schedule};

use crate::error::{Result, ServiceError};

/// Job map with due-job selection.
#[derive(Default)]
pub struct Scheduler {
    jobs: HashMap<String, CronJob>,
}

impl Scheduler {
    /// Empty scheduler.
    pub fn new() -> Self {
        Self {
            jobs: HashMap::new(),
        }
    }

    /// Compute the next run for a schedule after `now`, in epoch
    /// milliseconds. `None` means the schedule has no further fires.
    pub fn next_run(schedule: &Schedule, now: &DateTime<Utc>) -> Result<Option<i64>> {
        match schedule {
            Schedule::At { at_ms } => {
                Ok((*at_ms > now.timestamp_millis()).then_some(*at_ms))
            }
            Schedule::Every { every_ms } => {
                if *every_ms <= 0 {
                    return Err(ServiceError::InvalidCronExpression(
                        "every_ms must be positive".into(),
                    ));
                }
                Ok(Some(now.timestamp_millis() + every_ms))
            }
            Schedule::Cron { expr } => {
                let parsed = CronExpr::from_str(expr)
                    .map_err(|e| ServiceError::InvalidCronExpression(e.to_string()))?;
                Ok(parsed.after(now).next().map(|dt| dt.timestamp_millis()))
            }
        }
    }

    /// Add a job, validating its schedule and rejecting duplicate names.
    pub fn add(&mut self, job: CronJob) -> Result<()> {
        // Validation: next_run errors on bad expressions/intervals.
        Self::next_run(&job.schedule, &Utc::now())?;

        if self
            .jobs
            .values()
            .any(|j| j.name == job.name && j.id != job.id)
        {
            return Err(ServiceError::DuplicateJobName(job.name.clone()));
        }
        self.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    /// Remove a job by id.
    pub fn remove(&mut self, job_id: &str) -> Result<()> {
        self.jobs
            .remove(job_id)
            .map(|_| ())
            .ok_or_else(|| ServiceError::JobNotFound(job_id.to_string()))
    }

    /// Enabled jobs whose next run is at or before `now`.
    pub fn due_jobs(&self, now: &DateTime<Utc>) -> Vec<CronJob> {
        let now_ms = now.timestamp_millis();
        self.jobs
            .values()
            .filter(|j| {
                j.enabled && j.state.next_run_at_ms.is_some_and(|next| next <= now_ms)
            })
            .cloned()
            .collect()
    }

    /// All jobs, sorted by id.
    pub fn list(&self) -> Vec<CronJob> {
        let mut jobs: Vec<CronJob> = self.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    /// Borrow a job.
    pub fn get(&self, job_id: &str) -> Option<&CronJob> {
        self.jobs.get(job_id)
    }

    /// Mutably borrow a job.
    pub fn get_mut(&mut self, job_id: &str) -> Option<&mut CronJob> {
        self.jobs.get_mut(job_id)
    }
}
