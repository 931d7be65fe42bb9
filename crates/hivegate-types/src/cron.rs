//! Scheduled job types.
//!
//! A [`CronJob`] describes a synthetic message injected into the bus on a
//! schedule. The three schedule forms (`at`, `every`, `cron`) are a tagged
//! [`Schedule`] union; runtime bookkeeping lives in [`JobState`].

use serde::{Deserialize, Serialize};

/// When a job fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Fire once at a timestamp (milliseconds since epoch).
    At {
        /// The fire time.
        at_ms: i64,
    },
    /// Fire repeatedly at a fixed interval.
    Every {
        /// Interval in milliseconds.
        every_ms: i64,
    },
    /// Fire according to a cron expression.
    Cron {
        /// The cron expression (7-field, seconds first).
        expr: String,
    },
}

/// What a job delivers when it fires.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    /// The message injected as a synthetic inbound envelope.
    #[serde(default)]
    pub message: String,

    /// Delivery target fabric; when set, the reply is routed to
    /// `fabric:conversation` instead of the scheduler's own session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fabric: Option<String>,

    /// Delivery target conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<String>,
}

/// Outcome of the last firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Ok,
    Error,
    Skipped,
}

/// Runtime state of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    /// Next scheduled run (ms since epoch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at_ms: Option<i64>,

    /// Last actual run (ms since epoch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at_ms: Option<i64>,

    /// Outcome of the last run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<JobOutcome>,

    /// Error message from the last failed run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// A scheduled job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronJob {
    /// Unique job id.
    pub id: String,

    /// Human-readable name.
    pub name: String,

    /// Whether the job is active.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// When to fire.
    pub schedule: Schedule,

    /// What to deliver.
    #[serde(default)]
    pub payload: JobPayload,

    /// Runtime bookkeeping.
    #[serde(default)]
    pub state: JobState,

    /// Remove the job after its next fire.
    #[serde(default)]
    pub delete_after_run: bool,

    /// Creation time (ms since epoch).
    #[serde(default)]
    pub created_at_ms: i64,
}

fn default_true() -> bool {
    true
}

/// Persistent container for all jobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStore {
    /// Schema version.
    #[serde(default = "default_store_version")]
    pub version: u32,

    /// All registered jobs.
    #[serde(default)]
    pub jobs: Vec<CronJob>,
}

fn default_store_version() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_tagging() {
        let s = Schedule::Every { every_ms: 60_000 };
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["kind"], "every");
        assert_eq!(json["every_ms"], 60_000);

        let s: Schedule =
            serde_json::from_str(r#"{"kind": "cron", "expr": "0 0 9 * * * *"}"#)
                .unwrap();
        assert_eq!(
            s,
            Schedule::Cron {
                expr: "0 0 9 * * * *".into()
            }
        );
    }

    #[test]
    fn job_roundtrip() {
        let job = CronJob {
            id: "j1".into(),
            name: "standup reminder".into(),
            enabled: true,
            schedule: Schedule::At { at_ms: 1_800_000_000_000 },
            payload: JobPayload {
                message: "post the standup summary".into(),
                fabric: Some("teams".into()),
                conversation: Some("standup".into()),
            },
            state: JobState::default(),
            delete_after_run: true,
            created_at_ms: 0,
        };
        let json = serde_json::to_string(&job).unwrap();
        let back: CronJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn job_defaults() {
        let json = r#"{"id": "j", "name": "n", "schedule": {"kind": "every", "every_ms": 1000}}"#;
        let job: CronJob = serde_json::from_str(json).unwrap();
        assert!(job.enabled);
        assert!(!job.delete_after_run);
        assert!(job.state.next_run_at_ms.is_none());
    }

    #[test]
    fn outcome_serde() {
        assert_eq!(serde_json::to_string(&JobOutcome::Ok).unwrap(), "\"ok\"");
        assert_eq!(
            serde_json::to_string(&JobOutcome::Skipped).unwrap(),
            "\"skipped\""
        );
    }

    #[test]
    fn store_default_version() {
        let store: JobStore = serde_json::from_str("{}").unwrap();
        assert_eq!(store.version, 1);
        assert!(store.jobs.is_empty());
    }
}
