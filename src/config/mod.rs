// src/config/mod.rs
// Configuration: TOML file plus environment overrides

pub mod env;
pub mod file;

pub use env::{ConfigValidation, EnvConfig};
pub use file::{
    AggregationSection, BreakerOverride, BreakerSection, BudgetsSection, LaneBudgetsMs,
    OrchestratorConfig, ProviderEntry, RoutingSection, TierBudget,
};
