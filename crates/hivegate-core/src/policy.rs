//! Tool access policy.
//!
//! A [`ToolPolicy`] decides what happens before a tool runs: allow, deny,
//! require human approval, or require elevated mode. Names in the policy
//! lists may be literal tool names, glob patterns, or `@group` references
//! expanded through the group table.
//!
//! Decision order: deny → require-approval (unless the call id is already
//! approved) → require-elevated (unless elevated) → allow → default-deny.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use hivegate_types::config::ToolPolicyConfig;

/// Outcome of a policy check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    Allow,
    Deny,
    RequireApproval,
    RequireElevated,
}

/// Match a name against a glob pattern supporting `*` and `?`.
pub(crate) fn glob_matches(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (plen, tlen) = (pattern.len(), text.len());

    let mut pi = 0;
    let mut ti = 0;
    let mut star_pi = None;
    let mut star_ti = 0;

    while ti < tlen {
        if pi < plen && (pattern[pi] == '?' || pattern[pi] == text[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < plen && pattern[pi] == '*' {
            star_pi = Some(pi);
            star_ti = ti;
            pi += 1;
        } else if let Some(spi) = star_pi {
            pi = spi + 1;
            star_ti += 1;
            ti = star_ti;
        } else {
            return false;
        }
    }

    while pi < plen && pattern[pi] == '*' {
        pi += 1;
    }
    pi == plen
}

/// Tool access policy with group expansion and approval tracking.
#[derive(Debug, Clone)]
pub struct ToolPolicy {
    /// Allow patterns.
    pub allow: Vec<String>,
    /// Deny patterns (checked first).
    pub deny: Vec<String>,
    /// Patterns requiring a human approval per call.
    pub require_approval: Vec<String>,
    /// Patterns requiring elevated mode.
    pub require_elevated: Vec<String>,
    /// Current elevated state.
    pub elevated: bool,
    /// Call ids already granted approval.
    approved_calls: HashSet<String>,
    /// Group name -> member tools.
    groups: HashMap<String, Vec<String>>,
}

impl Default for ToolPolicy {
    fn default() -> Self {
        let mut groups = HashMap::new();
        groups.insert(
            "filesystem".to_string(),
            vec!["read_file", "write_file", "edit_file", "list_dir"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        groups.insert(
            "web".to_string(),
            vec!["web_fetch".to_string(), "web_search".to_string()],
        );
        groups.insert("shell".to_string(), vec!["exec".to_string()]);
        groups.insert(
            "dangerous".to_string(),
            vec!["exec", "browser", "gateway", "spawn"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        groups.insert("messaging".to_string(), vec!["message".to_string()]);
        groups.insert(
            "memory".to_string(),
            vec!["memory".to_string(), "memory_search".to_string()],
        );

        Self {
            allow: vec!["*".into()],
            deny: Vec::new(),
            require_approval: Vec::new(),
            require_elevated: vec!["gateway".into()],
            elevated: false,
            approved_calls: HashSet::new(),
            groups,
        }
    }
}

impl ToolPolicy {
    /// Build a policy from the configuration surface.
    pub fn from_config(config: &ToolPolicyConfig) -> Self {
        Self {
            allow: config.allow.clone(),
            deny: config.deny.clone(),
            require_approval: config.require_approval.clone(),
            require_elevated: config.require_elevated.clone(),
            ..Self::default()
        }
    }

    /// Expand `@group` references to member tools; other names pass
    /// through unchanged.
    fn expand(&self, name: &str) -> Vec<String> {
        if let Some(group) = name.strip_prefix('@') {
            self.groups.get(group).cloned().unwrap_or_default()
        } else {
            vec![name.to_string()]
        }
    }

    /// True if the tool matches any pattern in the list (after group
    /// expansion).
    fn matches(&self, tool: &str, patterns: &[String]) -> bool {
        patterns
            .iter()
            .flat_map(|p| self.expand(p))
            .any(|p| glob_matches(&p, tool))
    }

    /// Mark a call id as approved.
    pub fn approve_call(&mut self, call_id: &str) {
        self.approved_calls.insert(call_id.to_string());
    }

    /// True if a call id has been approved.
    pub fn is_call_approved(&self, call_id: &str) -> bool {
        self.approved_calls.contains(call_id)
    }

    /// Enter or leave elevated mode.
    pub fn set_elevated(&mut self, elevated: bool) {
        self.elevated = elevated;
    }

    /// Check access for one call.
    pub fn check(&self, tool: &str, call_id: &str) -> PolicyDecision {
        if self.matches(tool, &self.deny) {
            return PolicyDecision::Deny;
        }
        if self.matches(tool, &self.require_approval)
            && !(!call_id.is_empty() && self.is_call_approved(call_id))
        {
            return PolicyDecision::RequireApproval;
        }
        if self.matches(tool, &self.require_elevated) && !self.elevated {
            return PolicyDecision::RequireElevated;
        }
        if self.matches(tool, &self.allow) {
            return PolicyDecision::Allow;
        }
        PolicyDecision::Deny
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_basics() {
        assert!(glob_matches("*", "anything"));
        assert!(glob_matches("file_*", "file_read"));
        assert!(!glob_matches("file_*", "web_search"));
        assert!(glob_matches("read_?", "read_a"));
        assert!(!glob_matches("read_?", "read_file"));
        assert!(glob_matches("exec", "exec"));
        assert!(!glob_matches("exec", "exec2"));
    }

    #[test]
    fn default_allows_ordinary_tools() {
        let policy = ToolPolicy::default();
        assert_eq!(policy.check("read_file", ""), PolicyDecision::Allow);
        assert_eq!(policy.check("exec", ""), PolicyDecision::Allow);
    }

    #[test]
    fn default_gates_gateway_behind_elevation() {
        let mut policy = ToolPolicy::default();
        assert_eq!(policy.check("gateway", ""), PolicyDecision::RequireElevated);
        policy.set_elevated(true);
        assert_eq!(policy.check("gateway", ""), PolicyDecision::Allow);
    }

    #[test]
    fn deny_wins_over_everything() {
        let mut policy = ToolPolicy::default();
        policy.deny = vec!["@dangerous".into()];
        policy.elevated = true;
        assert_eq!(policy.check("exec", ""), PolicyDecision::Deny);
        assert_eq!(policy.check("browser", ""), PolicyDecision::Deny);
        // Non-group tools still allowed.
        assert_eq!(policy.check("read_file", ""), PolicyDecision::Allow);
    }

    #[test]
    fn approval_flow_by_call_id() {
        let mut policy = ToolPolicy::default();
        policy.require_approval = vec!["write_file".into()];

        assert_eq!(
            policy.check("write_file", "call-1"),
            PolicyDecision::RequireApproval
        );
        policy.approve_call("call-1");
        assert_eq!(policy.check("write_file", "call-1"), PolicyDecision::Allow);
        // A different call id still needs its own approval.
        assert_eq!(
            policy.check("write_file", "call-2"),
            PolicyDecision::RequireApproval
        );
    }

    #[test]
    fn empty_call_id_never_counts_as_approved() {
        let mut policy = ToolPolicy::default();
        policy.require_approval = vec!["write_file".into()];
        policy.approve_call("");
        assert_eq!(
            policy.check("write_file", ""),
            PolicyDecision::RequireApproval
        );
    }

    #[test]
    fn unlisted_tool_default_denied() {
        let mut policy = ToolPolicy::default();
        policy.allow = vec!["@filesystem".into()];
        assert_eq!(policy.check("read_file", ""), PolicyDecision::Allow);
        assert_eq!(policy.check("web_search", ""), PolicyDecision::Deny);
    }

    #[test]
    fn unknown_group_expands_to_nothing() {
        let mut policy = ToolPolicy::default();
        policy.allow = vec!["@nope".into()];
        assert_eq!(policy.check("read_file", ""), PolicyDecision::Deny);
    }

    #[test]
    fn from_config_copies_lists() {
        let config = ToolPolicyConfig {
            allow: vec!["@web".into()],
            deny: vec!["web_fetch".into()],
            require_approval: vec![],
            require_elevated: vec![],
        };
        let policy = ToolPolicy::from_config(&config);
        assert_eq!(policy.check("web_search", ""), PolicyDecision::Allow);
        assert_eq!(policy.check("web_fetch", ""), PolicyDecision::Deny);
    }
}
