//! Tiered model routing.
//!
//! Classification picks a task label; the router walks the configured
//! tiers in declaration order and selects the first tier whose triggers
//! contain the label (else the fallback tier), then the first model in
//! that tier that is not in health cooldown. Health is shared with the
//! chat client so a provider failure observed by either is visible to
//! both.

use std::sync::Arc;

use tracing::{debug, info};

use hivegate_llm::{ChatClient, HealthRegistry};
use hivegate_types::config::TieredRoutingConfig;

use crate::classify;

/// One routing outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDecision {
    /// The classified task label.
    pub task_type: String,
    /// The tier that matched.
    pub tier: String,
    /// The selected model.
    pub model: String,
    /// Human-readable explanation.
    pub reason: String,
}

/// Status row for one tier.
#[derive(Debug, Clone)]
pub struct TierStatus {
    pub name: String,
    pub triggers: Vec<String>,
    /// `(model, available)` pairs in preference order.
    pub models: Vec<(String, bool)>,
}

/// Classification-driven model router with per-model health.
pub struct TieredRouter {
    config: TieredRoutingConfig,
    health: Arc<HealthRegistry>,
}

impl TieredRouter {
    /// Create a router sharing the given health registry.
    pub fn new(config: TieredRoutingConfig, health: Arc<HealthRegistry>) -> Self {
        Self { config, health }
    }

    /// Tier names in declaration order, with any tiers missing from
    /// `tier_order` appended in map order.
    fn ordered_tiers(&self) -> Vec<&str> {
        let mut names: Vec<&str> =
            self.config.tier_order.iter().map(String::as_str).collect();
        for name in self.config.tiers.keys() {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
        names
    }

    fn tier_for_label(&self, label: &str) -> String {
        for name in self.ordered_tiers() {
            if let Some(tier) = self.config.tiers.get(name)
                && tier.triggers.iter().any(|t| t == label)
            {
                return name.to_string();
            }
        }
        self.config.fallback_tier.clone()
    }

    /// Pick the first available model from a tier; when every model is
    /// cooling down, fall back to the tier's first model anyway so the
    /// chain in the chat client still gets a starting point.
    fn model_from_tier(&self, tier_name: &str) -> Option<String> {
        let tier = self.config.tiers.get(tier_name)?;
        for model in &tier.models {
            if self.health.is_available(model) {
                return Some(model.clone());
            }
        }
        tier.models.first().cloned()
    }

    /// Route a message using the rule-based classifier.
    pub fn route(&self, content: &str) -> Option<RoutingDecision> {
        self.route_label(classify::classify(content))
    }

    /// Route a message, classifying with the configured classifier model
    /// when one is set.
    pub async fn route_with_client(
        &self,
        content: &str,
        client: &ChatClient,
    ) -> Option<RoutingDecision> {
        let label = classify::classify_with_model(
            content,
            client,
            &self.config.classifier_model,
        )
        .await;
        self.route_label(&label)
    }

    /// Route an already-classified label.
    pub fn route_label(&self, label: &str) -> Option<RoutingDecision> {
        if !self.config.enabled {
            return None;
        }
        let tier = self.tier_for_label(label);
        let model = self.model_from_tier(&tier)?;
        let decision = RoutingDecision {
            task_type: label.to_string(),
            tier: tier.clone(),
            model: model.clone(),
            reason: format!("label '{label}' matched tier '{tier}'"),
        };
        info!(
            task_type = %decision.task_type,
            tier = %decision.tier,
            model = %decision.model,
            "routing decision"
        );
        Some(decision)
    }

    /// Record a successful call for a model.
    pub fn mark_success(&self, model: &str) {
        debug!(model, "router: model success");
        self.health.mark_success(model);
    }

    /// Record a failed call for a model.
    pub fn mark_failure(&self, model: &str, error: &str) {
        debug!(model, error, "router: model failure");
        self.health.mark_failure(model, error);
    }

    /// Read-only status: every tier with its models' availability.
    pub fn status(&self) -> Vec<TierStatus> {
        self.ordered_tiers()
            .into_iter()
            .filter_map(|name| {
                let tier = self.config.tiers.get(name)?;
                Some(TierStatus {
                    name: name.to_string(),
                    triggers: tier.triggers.clone(),
                    models: tier
                        .models
                        .iter()
                        .map(|m| (m.clone(), self.health.is_available(m)))
                        .collect(),
                })
            })
            .collect()
    }
}
