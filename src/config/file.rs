// src/config/file.rs
// File-based configuration from ~/.lanewise/config.toml

use super::env::{ConfigValidation, EnvConfig};
use crate::backend::{
    BackendSet, CapabilityScores, CostTier, HttpBackend, ProviderSpec, shared_client,
};
use crate::budget::BudgetProfile;
use crate::error::{LanewiseError, Result};
use crate::health::BreakerConfig;
use crate::routing::RoutingPolicy;
use crate::types::{BudgetTier, LaneName, ProviderId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Top-level config structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub budgets: BudgetsSection,
    pub breaker: BreakerSection,
    pub routing: RoutingSection,
    pub aggregation: AggregationSection,
    pub providers: Vec<ProviderEntry>,
}

/// `[budgets.fast]`, `[budgets.standard]`, `[budgets.thorough]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetsSection {
    pub fast: TierBudget,
    pub standard: TierBudget,
    pub thorough: TierBudget,
}

impl Default for BudgetsSection {
    fn default() -> Self {
        Self {
            fast: TierBudget::new(1500, 200, [800, 1000, 1200, 1200]),
            standard: TierBudget::new(3000, 300, [1500, 2000, 2500, 2500]),
            thorough: TierBudget::new(8000, 500, [3000, 4000, 6000, 7000]),
        }
    }
}

impl BudgetsSection {
    pub fn tier(&self, tier: BudgetTier) -> &TierBudget {
        match tier {
            BudgetTier::Fast => &self.fast,
            BudgetTier::Standard => &self.standard,
            BudgetTier::Thorough => &self.thorough,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierBudget {
    pub global_ms: u64,
    #[serde(default)]
    pub reserve_ms: u64,
    #[serde(default)]
    pub lanes: LaneBudgetsMs,
}

impl TierBudget {
    /// Lane budgets in kg, vector, web, llm order
    fn new(global_ms: u64, reserve_ms: u64, lanes: [u64; 4]) -> Self {
        let [kg, vector, web, llm] = lanes.map(Some);
        Self {
            global_ms,
            reserve_ms,
            lanes: LaneBudgetsMs {
                kg,
                vector,
                web,
                llm,
            },
        }
    }
}

/// Per-lane budgets in milliseconds; an absent lane is not run for the tier
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaneBudgetsMs {
    pub kg: Option<u64>,
    pub vector: Option<u64>,
    pub web: Option<u64>,
    pub llm: Option<u64>,
}

impl LaneBudgetsMs {
    fn iter(&self) -> impl Iterator<Item = (LaneName, u64)> + '_ {
        [
            (LaneName::KnowledgeGraph, self.kg),
            (LaneName::Vector, self.vector),
            (LaneName::Web, self.web),
            (LaneName::Llm, self.llm),
        ]
        .into_iter()
        .filter_map(|(lane, ms)| ms.map(|ms| (lane, ms)))
    }
}

/// `[breaker]` defaults plus `[breaker.providers.<id>]` overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSection {
    pub failure_threshold: u32,
    pub window_size: usize,
    pub recovery_timeout_ms: u64,
    pub success_threshold: u32,
    pub providers: BTreeMap<String, BreakerOverride>,
}

impl Default for BreakerSection {
    fn default() -> Self {
        let defaults = BreakerConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            window_size: defaults.window_size,
            recovery_timeout_ms: defaults.recovery_timeout.as_millis() as u64,
            success_threshold: defaults.success_threshold,
            providers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakerOverride {
    pub failure_threshold: Option<u32>,
    pub window_size: Option<usize>,
    pub recovery_timeout_ms: Option<u64>,
    pub success_threshold: Option<u32>,
}

impl BreakerSection {
    pub fn defaults(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            window_size: self.window_size,
            recovery_timeout: Duration::from_millis(self.recovery_timeout_ms),
            success_threshold: self.success_threshold,
        }
    }

    pub fn overrides(&self) -> HashMap<ProviderId, BreakerConfig> {
        let base = self.defaults();
        self.providers
            .iter()
            .map(|(id, o)| {
                let config = BreakerConfig {
                    failure_threshold: o.failure_threshold.unwrap_or(base.failure_threshold),
                    window_size: o.window_size.unwrap_or(base.window_size),
                    recovery_timeout: o
                        .recovery_timeout_ms
                        .map(Duration::from_millis)
                        .unwrap_or(base.recovery_timeout),
                    success_threshold: o.success_threshold.unwrap_or(base.success_threshold),
                };
                (ProviderId::new(id.as_str()), config)
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingSection {
    pub prefer_free: bool,
    pub cost_ceiling: Option<f64>,
    pub skip_lane_when_all_open: bool,
    /// Citation order between lanes, best first
    pub lane_priority: Vec<LaneName>,
}

impl Default for RoutingSection {
    fn default() -> Self {
        let policy = RoutingPolicy::default();
        Self {
            prefer_free: policy.prefer_free,
            cost_ceiling: policy.cost_ceiling,
            skip_lane_when_all_open: policy.skip_lane_when_all_open,
            lane_priority: LaneName::ALL.to_vec(),
        }
    }
}

impl RoutingSection {
    pub fn policy(&self) -> RoutingPolicy {
        RoutingPolicy {
            prefer_free: self.prefer_free,
            cost_ceiling: self.cost_ceiling,
            skip_lane_when_all_open: self.skip_lane_when_all_open,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationSection {
    pub max_citations: usize,
    /// Evidence snippets quoted in a degraded answer
    pub fallback_snippets: usize,
}

impl Default for AggregationSection {
    fn default() -> Self {
        Self {
            max_citations: 10,
            fallback_snippets: 3,
        }
    }
}

/// One `[[providers]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub id: String,
    /// Lane name: kg, vector, web or llm
    pub lane: String,
    #[serde(default = "default_tier")]
    pub tier: CostTier,
    pub endpoint: Option<String>,
    /// Name of the env var holding the bearer token
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub cost_per_call: f64,
    #[serde(default)]
    pub capability: CapabilityScores,
}

fn default_tier() -> CostTier {
    CostTier::Free
}

impl ProviderEntry {
    pub fn lane(&self) -> Result<LaneName> {
        self.lane.parse().map_err(|_| {
            LanewiseError::Config(format!(
                "provider {} names unknown lane '{}' (expected kg, vector, web or llm)",
                self.id, self.lane
            ))
        })
    }

    pub fn spec(&self) -> Result<ProviderSpec> {
        Ok(ProviderSpec::new(self.id.as_str(), self.lane()?, self.tier)
            .with_capability(self.capability)
            .with_cost(self.cost_per_call))
    }
}

impl OrchestratorConfig {
    /// Load config from `path`; missing or unparsable files fall back to defaults
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match Self::from_toml_str(&contents) {
                Ok(config) => {
                    debug!(path = %path.display(), "Loaded config from file");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse config file");
                    Self::default()
                }
            },
            Err(_) => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
        }
    }

    /// Load from LANEWISE_CONFIG or the default path, then apply env overrides
    pub fn load_with_env(env: &EnvConfig) -> Self {
        let path = env.config_path.clone().unwrap_or_else(Self::config_path);
        let mut config = Self::load(&path);
        config.apply_env(env);
        config
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".lanewise")
            .join("config.toml")
    }

    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(prefer_free) = env.prefer_free {
            self.routing.prefer_free = prefer_free;
        }
        if let Some(ceiling) = env.cost_ceiling {
            self.routing.cost_ceiling = Some(ceiling);
        }
        if !env.disabled_providers.is_empty() {
            let before = self.providers.len();
            self.providers.retain(|p| !env.is_disabled(&p.id));
            debug!(removed = before - self.providers.len(), "Applied disabled providers");
        }
    }

    pub fn budget_profile(&self, tier: BudgetTier) -> Result<BudgetProfile> {
        let section = self.budgets.tier(tier);
        let lanes = section
            .lanes
            .iter()
            .map(|(lane, ms)| (lane, Duration::from_millis(ms)))
            .collect();
        BudgetProfile::new(
            tier,
            lanes,
            Duration::from_millis(section.global_ms),
            Duration::from_millis(section.reserve_ms),
        )
    }

    /// HTTP backends for every provider with an endpoint. `secret` resolves
    /// `api_key_env` names to values.
    pub fn http_backends(&self, secret: impl Fn(&str) -> Option<String>) -> Result<BackendSet> {
        let mut set = BackendSet::new();
        let client = shared_client()?;
        for entry in &self.providers {
            let Some(endpoint) = entry.endpoint.as_deref() else {
                debug!(provider = %entry.id, "Provider has no endpoint, skipping");
                continue;
            };
            let mut backend = HttpBackend::new(entry.spec()?, endpoint, client.clone());
            if let Some(key) = entry.api_key_env.as_deref().and_then(&secret) {
                backend = backend.with_api_key(key);
            }
            set.register(Arc::new(backend))?;
        }
        Ok(set)
    }

    pub fn validate(&self) -> ConfigValidation {
        let mut validation = ConfigValidation::new();

        for tier in [BudgetTier::Fast, BudgetTier::Standard, BudgetTier::Thorough] {
            if let Err(e) = self.budget_profile(tier) {
                validation.add_error(e.to_string());
            }
        }

        let breaker = &self.breaker;
        check_breaker(&mut validation, "breaker", &breaker.defaults());
        for (id, config) in breaker.overrides() {
            check_breaker(&mut validation, &format!("breaker.providers.{id}"), &config);
        }

        let mut seen = HashSet::new();
        for entry in &self.providers {
            if let Err(e) = entry.lane() {
                validation.add_error(e.to_string());
            }
            if !seen.insert(entry.id.as_str()) {
                validation.add_error(format!("duplicate provider id '{}'", entry.id));
            }
            if entry.endpoint.is_none() {
                validation.add_warning(format!(
                    "provider '{}' has no endpoint and will not be called",
                    entry.id
                ));
            }
            if !entry.cost_per_call.is_finite() || entry.cost_per_call < 0.0 {
                validation.add_error(format!(
                    "provider '{}' has an invalid cost_per_call",
                    entry.id
                ));
            }
        }
        for id in breaker.providers.keys() {
            if !self.providers.iter().any(|p| &p.id == id) {
                validation.add_warning(format!(
                    "breaker override for unknown provider '{}'",
                    id
                ));
            }
        }

        if self.providers.is_empty() {
            validation.add_warning("No providers configured; every request will degrade");
        } else if !self
            .providers
            .iter()
            .any(|p| p.lane().ok() == Some(LaneName::Llm))
        {
            validation.add_warning("No llm provider configured; answers will be evidence-only");
        }

        if self.aggregation.max_citations == 0 {
            validation.add_warning("aggregation.max_citations is 0; treated as 1");
        }

        validation
    }
}

fn check_breaker(validation: &mut ConfigValidation, name: &str, config: &BreakerConfig) {
    for problem in config.problems() {
        validation.add_error(format!("{name}: {problem}"));
    }
    if config.recovery_timeout.is_zero() {
        validation.add_warning(format!("{name}: recovery_timeout_ms is 0; open circuits re-probe immediately"));
    }
}
