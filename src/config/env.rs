// src/config/env.rs
// Environment-based configuration - single source of truth for all env vars

use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Configuration validation result
#[derive(Debug)]
pub struct ConfigValidation {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl Default for ConfigValidation {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigValidation {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: ConfigValidation) {
        self.warnings.extend(other.warnings);
        self.errors.extend(other.errors);
    }

    /// Format as a human-readable report
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        if !self.errors.is_empty() {
            lines.push("Errors:".to_string());
            for err in &self.errors {
                lines.push(format!("  - {}", err));
            }
        }

        if !self.warnings.is_empty() {
            lines.push("Warnings:".to_string());
            for warn in &self.warnings {
                lines.push(format!("  - {}", warn));
            }
        }

        if lines.is_empty() {
            "Configuration OK".to_string()
        } else {
            lines.join("\n")
        }
    }
}

/// Environment configuration - all env vars in one place
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvConfig {
    /// Config file override (LANEWISE_CONFIG)
    pub config_path: Option<PathBuf>,
    /// Override routing.prefer_free (LANEWISE_PREFER_FREE)
    pub prefer_free: Option<bool>,
    /// Override routing.cost_ceiling (LANEWISE_COST_CEILING)
    pub cost_ceiling: Option<f64>,
    /// Provider ids to drop from the config (LANEWISE_DISABLED_PROVIDERS, comma separated)
    pub disabled_providers: Vec<String>,
    /// Values that were set but could not be parsed
    pub invalid: Vec<String>,
}

impl EnvConfig {
    /// Load all environment configuration (call once at startup)
    pub fn from_env() -> Self {
        info!("Loading environment configuration");
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut invalid = Vec::new();

        let prefer_free = read("LANEWISE_PREFER_FREE").and_then(|v| {
            let parsed = parse_bool(&v);
            if parsed.is_none() {
                warn!(value = %v, "Invalid LANEWISE_PREFER_FREE, ignoring");
                invalid.push(format!("LANEWISE_PREFER_FREE='{}' is not a boolean", v));
            }
            parsed
        });

        let cost_ceiling = read("LANEWISE_COST_CEILING").and_then(|v| {
            match v.trim().parse::<f64>() {
                Ok(c) if c.is_finite() && c >= 0.0 => Some(c),
                _ => {
                    warn!(value = %v, "Invalid LANEWISE_COST_CEILING, ignoring");
                    invalid.push(format!(
                        "LANEWISE_COST_CEILING='{}' is not a non-negative number",
                        v
                    ));
                    None
                }
            }
        });

        let disabled_providers: Vec<String> = read("LANEWISE_DISABLED_PROVIDERS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        if !disabled_providers.is_empty() {
            debug!(providers = ?disabled_providers, "Providers disabled by environment");
        }

        Self {
            config_path: read("LANEWISE_CONFIG").map(PathBuf::from),
            prefer_free,
            cost_ceiling,
            disabled_providers,
            invalid,
        }
    }

    pub fn is_disabled(&self, provider_id: &str) -> bool {
        self.disabled_providers.iter().any(|p| p == provider_id)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigValidation {
        let mut validation = ConfigValidation::new();
        for msg in &self.invalid {
            validation.add_warning(msg.clone());
        }
        if let Some(ref path) = self.config_path {
            if !path.exists() {
                validation.add_warning(format!(
                    "LANEWISE_CONFIG points to {} which does not exist; using defaults",
                    path.display()
                ));
            }
        }
        validation
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> EnvConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_empty_environment() {
        let config = env(&[]);
        assert_eq!(config, EnvConfig::default());
        assert!(config.validate().is_valid());
        assert!(config.validate().warnings.is_empty());
    }

    #[test]
    fn test_parses_all_variables() {
        let config = env(&[
            ("LANEWISE_CONFIG", "/tmp/lanewise.toml"),
            ("LANEWISE_PREFER_FREE", "off"),
            ("LANEWISE_COST_CEILING", "0.02"),
            ("LANEWISE_DISABLED_PROVIDERS", "openai, , brave "),
        ]);
        assert_eq!(config.config_path, Some(PathBuf::from("/tmp/lanewise.toml")));
        assert_eq!(config.prefer_free, Some(false));
        assert_eq!(config.cost_ceiling, Some(0.02));
        assert_eq!(config.disabled_providers, vec!["openai", "brave"]);
        assert!(config.is_disabled("openai"));
        assert!(!config.is_disabled("ollama"));
    }

    #[test]
    fn test_invalid_values_become_warnings() {
        let config = env(&[
            ("LANEWISE_PREFER_FREE", "maybe"),
            ("LANEWISE_COST_CEILING", "-1"),
        ]);
        assert_eq!(config.prefer_free, None);
        assert_eq!(config.cost_ceiling, None);
        let validation = config.validate();
        assert!(validation.is_valid());
        assert_eq!(validation.warnings.len(), 2);
    }

    #[test]
    fn test_blank_values_are_unset() {
        let config = env(&[("LANEWISE_CONFIG", "  "), ("LANEWISE_PREFER_FREE", "")]);
        assert!(config.config_path.is_none());
        assert!(config.prefer_free.is_none());
    }

    #[test]
    fn test_validation_report() {
        let mut validation = ConfigValidation::new();
        assert_eq!(validation.report(), "Configuration OK");
        validation.add_error("bad budget");
        validation.add_warning("unused provider");
        let report = validation.report();
        assert!(report.contains("Errors:\n  - bad budget"));
        assert!(report.contains("Warnings:\n  - unused provider"));
        assert!(!validation.is_valid());
    }
}
