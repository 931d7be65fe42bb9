//! Host-local exec approvals.
//!
//! Every `system.run` on a host passes an ordered decision: user deny
//! entries, built-in deny patterns, user allow entries, built-in safe
//! patterns, then the configured default. Patterns are globs by default
//! with opt-in regex entries; everything persists to a single JSON file.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use hivegate_types::Result;

/// Destructive patterns always denied when the default deny list is on.
const DEFAULT_DENY_PATTERNS: &[&str] = &[
    "rm -rf /*",
    "rm -rf /",
    "rmdir /*",
    "del /s /q *",
    "format *",
    "shutdown*",
    "reboot*",
    "poweroff*",
    "halt*",
    "init *",
    "systemctl *stop*",
    "systemctl *disable*",
    "iptables -F*",
    "iptables -X*",
    "ufw disable*",
    "chmod 777 /*",
    "chown -R * /*",
];

/// Read-only commands always allowed when the default safe list is on.
const DEFAULT_SAFE_PATTERNS: &[&str] = &[
    "ls *", "pwd", "whoami", "hostname", "uname *", "cat *", "head *",
    "tail *", "grep *", "find *", "which *", "echo *", "date", "uptime",
    "df *", "du *", "free *", "ps *", "env", "printenv*",
    "git status*", "git log*", "git diff*", "git show*", "git branch*",
    "git remote*",
    "python --version*", "python3 --version*", "node --version*",
    "npm --version*", "cargo --version*", "rustc --version*", "go version*",
];

/// Outcome of an approval check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalCheck {
    pub allowed: bool,
    pub reason: String,
    pub matched_pattern: String,
}

impl ApprovalCheck {
    fn allowed(reason: &str, pattern: &str) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            matched_pattern: pattern.into(),
        }
    }

    fn denied(reason: &str, pattern: &str) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            matched_pattern: pattern.into(),
        }
    }
}

/// One operator-managed pattern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalEntry {
    pub pattern: String,
    #[serde(default)]
    pub is_regex: bool,
    #[serde(default = "default_true")]
    pub allow: bool,
    #[serde(default = "Utc::now")]
    pub added_at: DateTime<Utc>,
    #[serde(default)]
    pub added_by: String,
    #[serde(default)]
    pub note: String,
}

fn default_true() -> bool {
    true
}

impl ApprovalEntry {
    fn matches(&self, command: &str) -> bool {
        if self.is_regex {
            Regex::new(&self.pattern)
                .map(|re| re.is_match(command))
                .unwrap_or(false)
        } else {
            glob_match(&self.pattern, command)
        }
    }
}

/// `fnmatch`-style glob: `*` any run, `?` one character.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let mut pi = 0;
    let mut ti = 0;
    let mut star: Option<(usize, usize)> = None;

    while ti < text.len() {
        if pi < pattern.len() && (pattern[pi] == '?' || pattern[pi] == text[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < pattern.len() && pattern[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((spi, sti)) = star {
            pi = spi + 1;
            ti = sti + 1;
            star = Some((spi, sti + 1));
        } else {
            return false;
        }
    }
    while pi < pattern.len() && pattern[pi] == '*' {
        pi += 1;
    }
    pi == pattern.len()
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ApprovalsFile {
    #[serde(default)]
    entries: Vec<ApprovalEntry>,
    #[serde(default)]
    allow_by_default: bool,
    #[serde(default = "default_true")]
    use_default_safe: bool,
    #[serde(default = "default_true")]
    use_default_deny: bool,
    #[serde(default = "Utc::now")]
    updated_at: DateTime<Utc>,
}

/// Manages the host's exec allow/deny lists.
pub struct ExecApprovalManager {
    storage_path: Option<PathBuf>,
    allow_by_default: bool,
    use_default_safe: bool,
    use_default_deny: bool,
    entries: Mutex<Vec<ApprovalEntry>>,
}

impl ExecApprovalManager {
    /// In-memory manager with secure defaults (default-deny).
    pub fn new() -> Self {
        Self {
            storage_path: None,
            allow_by_default: false,
            use_default_safe: true,
            use_default_deny: true,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Persistent manager rooted at `path`, loading prior state.
    pub fn with_storage(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut manager = Self::new();
        if let Ok(content) = std::fs::read_to_string(&path) {
            match serde_json::from_str::<ApprovalsFile>(&content) {
                Ok(file) => {
                    manager.allow_by_default = file.allow_by_default;
                    manager.use_default_safe = file.use_default_safe;
                    manager.use_default_deny = file.use_default_deny;
                    manager.entries = Mutex::new(file.entries);
                }
                Err(e) => warn!(error = %e, "exec approvals unreadable, starting fresh"),
            }
        }
        manager.storage_path = Some(path);
        manager
    }

    /// Toggle allow-by-default for unmatched commands.
    pub fn with_allow_by_default(mut self, allow: bool) -> Self {
        self.allow_by_default = allow;
        self
    }

    /// Toggle the built-in safe list.
    pub fn with_default_safe(mut self, enabled: bool) -> Self {
        self.use_default_safe = enabled;
        self
    }

    /// Toggle the built-in deny list.
    pub fn with_default_deny(mut self, enabled: bool) -> Self {
        self.use_default_deny = enabled;
        self
    }

    fn save(&self) -> Result<()> {
        let Some(path) = &self.storage_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = ApprovalsFile {
            entries: self.entries.lock().unwrap().clone(),
            allow_by_default: self.allow_by_default,
            use_default_safe: self.use_default_safe,
            use_default_deny: self.use_default_deny,
            updated_at: Utc::now(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    /// The ordered approval decision for a command.
    pub fn check(&self, command: &str) -> ApprovalCheck {
        let command = command.trim();
        let entries = self.entries.lock().unwrap();

        // 1. User deny entries.
        for entry in entries.iter().filter(|e| !e.allow) {
            if entry.matches(command) {
                return ApprovalCheck::denied("matched user deny pattern", &entry.pattern);
            }
        }

        // 2. Built-in deny patterns.
        if self.use_default_deny {
            for pattern in DEFAULT_DENY_PATTERNS {
                if glob_match(pattern, command) {
                    return ApprovalCheck::denied("matched dangerous pattern", pattern);
                }
            }
        }

        // 3. User allow entries.
        for entry in entries.iter().filter(|e| e.allow) {
            if entry.matches(command) {
                return ApprovalCheck::allowed("matched user allow pattern", &entry.pattern);
            }
        }

        // 4. Built-in safe patterns.
        if self.use_default_safe {
            for pattern in DEFAULT_SAFE_PATTERNS {
                if glob_match(pattern, command) {
                    return ApprovalCheck::allowed("matched safe pattern", pattern);
                }
            }
        }

        // 5. Default.
        if self.allow_by_default {
            ApprovalCheck::allowed("default allow", "")
        } else {
            ApprovalCheck::denied("not in allowlist", "")
        }
    }

    /// Add an allow pattern.
    pub fn add_allow(&self, pattern: &str, is_regex: bool, added_by: &str) -> Result<()> {
        info!(pattern, "adding exec allow pattern");
        self.entries.lock().unwrap().push(ApprovalEntry {
            pattern: pattern.into(),
            is_regex,
            allow: true,
            added_at: Utc::now(),
            added_by: added_by.into(),
            note: String::new(),
        });
        self.save()
    }

    /// Add a deny pattern.
    pub fn add_deny(&self, pattern: &str, is_regex: bool, added_by: &str) -> Result<()> {
        info!(pattern, "adding exec deny pattern");
        self.entries.lock().unwrap().push(ApprovalEntry {
            pattern: pattern.into(),
            is_regex,
            allow: false,
            added_at: Utc::now(),
            added_by: added_by.into(),
            note: String::new(),
        });
        self.save()
    }

    /// Remove all entries with the given pattern. Returns `true` when
    /// something was removed.
    pub fn remove(&self, pattern: &str) -> Result<bool> {
        let removed = {
            let mut entries = self.entries.lock().unwrap();
            let before = entries.len();
            entries.retain(|e| e.pattern != pattern);
            entries.len() < before
        };
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    /// Snapshot of the user entries.
    pub fn entries(&self) -> Vec<ApprovalEntry> {
        self.entries.lock().unwrap().clone()
    }
}

impl Default for ExecApprovalManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn glob_semantics() {
        assert!(glob_match("ls *", "ls -la /tmp"));
        assert!(!glob_match("ls *", "lsof"));
        assert!(glob_match("git status*", "git status --short"));
        assert!(glob_match("pwd", "pwd"));
        assert!(!glob_match("pwd", "pwd; rm -rf /"));
        assert!(glob_match("read_?", "read_a"));
    }

    #[test]
    fn default_safe_commands_allowed() {
        let manager = ExecApprovalManager::new();
        assert!(manager.check("ls -la /tmp").allowed);
        assert!(manager.check("git status").allowed);
        assert!(manager.check("uptime").allowed);
    }

    #[test]
    fn destructive_commands_denied() {
        let manager = ExecApprovalManager::new();
        let check = manager.check("rm -rf /");
        assert!(!check.allowed);
        assert_eq!(check.reason, "matched dangerous pattern");
        assert!(!manager.check("shutdown -h now").allowed);
        assert!(!manager.check("format c:").allowed);
    }

    #[test]
    fn unknown_command_follows_default() {
        let strict = ExecApprovalManager::new();
        assert!(!strict.check("my-custom-binary --flag").allowed);

        let permissive = ExecApprovalManager::new().with_allow_by_default(true);
        assert!(permissive.check("my-custom-binary --flag").allowed);
    }

    #[test]
    fn user_deny_beats_default_safe() {
        let manager = ExecApprovalManager::new();
        manager.add_deny("ls *", false, "op").unwrap();
        let check = manager.check("ls /secret");
        assert!(!check.allowed);
        assert_eq!(check.reason, "matched user deny pattern");
    }

    #[test]
    fn user_allow_beats_default_deny_ordering() {
        // User allow is checked AFTER built-in deny: destructive commands
        // stay denied even with a broad user allow.
        let manager = ExecApprovalManager::new();
        manager.add_allow("*", false, "op").unwrap();
        assert!(!manager.check("rm -rf /").allowed);
        assert!(manager.check("my-tool run").allowed);
    }

    #[test]
    fn regex_entries() {
        let manager = ExecApprovalManager::new();
        manager
            .add_allow(r"^docker (ps|images)\b", true, "op")
            .unwrap();
        assert!(manager.check("docker ps -a").allowed);
        assert!(!manager.check("docker rm everything").allowed);
    }

    #[test]
    fn invalid_regex_never_matches() {
        let manager = ExecApprovalManager::new();
        manager.add_allow("([unclosed", true, "op").unwrap();
        assert!(!manager.check("([unclosed").allowed);
    }

    #[test]
    fn persistence_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("exec-approvals.json");
        {
            let manager = ExecApprovalManager::with_storage(&path);
            manager.add_allow("make *", false, "op").unwrap();
            manager.add_deny("make clean-all", false, "op").unwrap();
        }
        let reloaded = ExecApprovalManager::with_storage(&path);
        assert_eq!(reloaded.entries().len(), 2);
        assert!(reloaded.check("make build").allowed);
        assert!(!reloaded.check("make clean-all").allowed);
    }

    #[test]
    fn remove_pattern() {
        let manager = ExecApprovalManager::new();
        manager.add_allow("make *", false, "op").unwrap();
        assert!(manager.remove("make *").unwrap());
        assert!(!manager.remove("make *").unwrap());
        assert!(!manager.check("make build").allowed);
    }

    #[test]
    fn disabled_default_safe_denies_reads() {
        let manager = ExecApprovalManager::new().with_default_safe(false);
        assert!(!manager.check("ls /tmp").allowed);
    }
}
