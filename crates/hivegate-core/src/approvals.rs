//! Human-in-the-loop approvals.
//!
//! An approval is an entity with state transitions, not a callback chain:
//! requesters poll [`ApprovalManager::wait_for_decision`] while an
//! operator resolves the entry via [`approve`](ApprovalManager::approve)
//! or [`deny`](ApprovalManager::deny). A background sweep auto-denies
//! expired entries and purges old completed ones.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use hivegate_types::{GatewayError, Result};

/// Status of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Expired,
    Cancelled,
}

/// One approval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    /// Synthetic id (`approval_<n>_<epoch>`).
    pub id: String,
    /// Tool awaiting approval.
    pub tool_name: String,
    /// The call's arguments, for operator display.
    pub arguments: serde_json::Value,
    /// Requesting session or subsystem.
    pub requester: String,
    /// Why approval is needed.
    pub reason: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Expiry time.
    pub expires_at: DateTime<Utc>,
    /// Current status.
    pub status: ApprovalStatus,
    /// Who decided.
    #[serde(default)]
    pub decided_by: String,
    /// Why it was decided that way.
    #[serde(default)]
    pub decision_reason: String,
    /// When it was decided.
    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,
}

impl Approval {
    /// True when past the expiry time.
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Callback invoked when a request is created or decided.
pub type ApprovalHook = Arc<dyn Fn(&Approval) + Send + Sync>;

/// Queue of pending approvals plus a table of completed ones.
pub struct ApprovalManager {
    timeout: Duration,
    auto_deny_on_timeout: bool,
    pending: Mutex<HashMap<String, Approval>>,
    completed: Mutex<HashMap<String, Approval>>,
    counter: AtomicU64,
    on_request: Mutex<Vec<ApprovalHook>>,
    on_decision: Mutex<Vec<ApprovalHook>>,
}

impl ApprovalManager {
    /// Create a manager with the default 300s timeout.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(300))
    }

    /// Create a manager with a custom timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            auto_deny_on_timeout: true,
            pending: Mutex::new(HashMap::new()),
            completed: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
            on_request: Mutex::new(Vec::new()),
            on_decision: Mutex::new(Vec::new()),
        }
    }

    /// Expired entries stay `Expired` instead of being auto-denied.
    pub fn without_auto_deny(mut self) -> Self {
        self.auto_deny_on_timeout = false;
        self
    }

    /// Register a listener for new requests.
    pub async fn on_request(&self, hook: ApprovalHook) {
        self.on_request.lock().await.push(hook);
    }

    /// Register a listener for decisions.
    pub async fn on_decision(&self, hook: ApprovalHook) {
        self.on_decision.lock().await.push(hook);
    }

    /// Enqueue an approval request and fire request listeners.
    pub async fn request(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
        requester: &str,
        reason: &str,
    ) -> Approval {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let approval = Approval {
            id: format!("approval_{n}_{}", now.timestamp()),
            tool_name: tool_name.to_string(),
            arguments,
            requester: requester.to_string(),
            reason: if reason.is_empty() {
                format!("Approval needed for {tool_name}")
            } else {
                reason.to_string()
            },
            created_at: now,
            expires_at: now + chrono::Duration::from_std(self.timeout).unwrap_or_default(),
            status: ApprovalStatus::Pending,
            decided_by: String::new(),
            decision_reason: String::new(),
            decided_at: None,
        };

        info!(id = %approval.id, tool = tool_name, "approval requested");
        self.pending
            .lock()
            .await
            .insert(approval.id.clone(), approval.clone());

        for hook in self.on_request.lock().await.iter() {
            hook(&approval);
        }
        approval
    }

    async fn decide(
        &self,
        id: &str,
        status: ApprovalStatus,
        decided_by: &str,
        reason: &str,
    ) -> bool {
        let approval = {
            let mut pending = self.pending.lock().await;
            let Some(mut approval) = pending.remove(id) else {
                // Repeating a decision is idempotent: the completed entry
                // keeps its original outcome.
                return false;
            };
            if status == ApprovalStatus::Approved && approval.is_expired() {
                approval.status = ApprovalStatus::Expired;
                approval.decided_at = Some(Utc::now());
                self.completed.lock().await.insert(id.to_string(), approval);
                return false;
            }
            approval.status = status;
            approval.decided_by = decided_by.to_string();
            approval.decision_reason = reason.to_string();
            approval.decided_at = Some(Utc::now());
            approval
        };

        info!(id, status = ?approval.status, by = decided_by, "approval decided");
        self.completed
            .lock()
            .await
            .insert(id.to_string(), approval.clone());

        for hook in self.on_decision.lock().await.iter() {
            hook(&approval);
        }
        true
    }

    /// Grant a pending approval. Idempotent: a second call is a no-op
    /// returning `false` and the recorded decision is unchanged.
    pub async fn approve(&self, id: &str, decided_by: &str, reason: &str) -> bool {
        self.decide(id, ApprovalStatus::Approved, decided_by, reason)
            .await
    }

    /// Deny a pending approval.
    pub async fn deny(&self, id: &str, decided_by: &str, reason: &str) -> bool {
        let reason = if reason.is_empty() { "Denied by user" } else { reason };
        self.decide(id, ApprovalStatus::Denied, decided_by, reason)
            .await
    }

    /// Cancel a pending approval.
    pub async fn cancel(&self, id: &str) -> bool {
        self.decide(id, ApprovalStatus::Cancelled, "system", "Cancelled")
            .await
    }

    /// Poll until the approval is decided.
    ///
    /// On expiry the entry is auto-denied (when configured) or marked
    /// expired; on overall timeout returns [`GatewayError::Timeout`].
    pub async fn wait_for_decision(
        &self,
        id: &str,
        timeout: Option<Duration>,
    ) -> Result<Approval> {
        let timeout = timeout.unwrap_or(self.timeout);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(done) = self.completed.lock().await.get(id) {
                return Ok(done.clone());
            }

            let expired = {
                let pending = self.pending.lock().await;
                match pending.get(id) {
                    Some(approval) => approval.is_expired(),
                    None => false,
                }
            };
            if expired {
                if self.auto_deny_on_timeout {
                    self.deny(id, "system", "Timed out").await;
                } else {
                    self.decide(id, ApprovalStatus::Expired, "system", "Expired")
                        .await;
                }
                continue;
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(GatewayError::Timeout {
                    operation: format!("approval {id}"),
                });
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// All pending approvals.
    pub async fn pending(&self) -> Vec<Approval> {
        self.pending.lock().await.values().cloned().collect()
    }

    /// Look up an approval in either table.
    pub async fn get(&self, id: &str) -> Option<Approval> {
        if let Some(approval) = self.pending.lock().await.get(id) {
            return Some(approval.clone());
        }
        self.completed.lock().await.get(id).cloned()
    }

    /// One housekeeping pass: auto-deny expired pending entries and purge
    /// completed entries older than an hour.
    pub async fn sweep(&self) {
        let expired: Vec<String> = {
            let pending = self.pending.lock().await;
            pending
                .values()
                .filter(|a| a.is_expired())
                .map(|a| a.id.clone())
                .collect()
        };
        for id in expired {
            warn!(id = %id, "approval expired");
            if self.auto_deny_on_timeout {
                self.deny(&id, "system", "Expired").await;
            } else {
                self.decide(&id, ApprovalStatus::Expired, "system", "Expired")
                    .await;
            }
        }

        let cutoff = Utc::now() - chrono::Duration::hours(1);
        let mut completed = self.completed.lock().await;
        completed.retain(|_, a| a.decided_at.map(|t| t >= cutoff).unwrap_or(true));
    }

    /// Spawn the background sweep, running once a minute until the
    /// returned handle is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                manager.sweep().await;
            }
        })
    }
}

impl Default for ApprovalManager {
    fn default() -> Self {
        Self::new()
    }
}
