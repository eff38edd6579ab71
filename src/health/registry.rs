// src/health/registry.rs
// Process-wide registry of per-provider circuit breakers

use super::circuit_breaker::{BreakerConfig, CircuitBreaker, HealthSnapshot};
use crate::types::ProviderId;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Shared across requests. Breakers are created lazily on first reference and
/// live for the lifetime of the registry; each one serializes its own updates,
/// so the map lock is only held to look up or insert entries.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    defaults: BreakerConfig,
    overrides: HashMap<ProviderId, BreakerConfig>,
    breakers: RwLock<HashMap<ProviderId, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(defaults: BreakerConfig) -> Self {
        Self::with_overrides(defaults, HashMap::new())
    }

    pub fn with_overrides(
        defaults: BreakerConfig,
        overrides: HashMap<ProviderId, BreakerConfig>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                defaults,
                overrides,
                breakers: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Breaker for a provider, created on first use
    pub fn breaker(&self, provider: &ProviderId) -> Arc<CircuitBreaker> {
        {
            let breakers = self
                .inner
                .breakers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(b) = breakers.get(provider) {
                return b.clone();
            }
        }

        let mut breakers = self
            .inner
            .breakers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        breakers
            .entry(provider.clone())
            .or_insert_with(|| {
                let config = self
                    .inner
                    .overrides
                    .get(provider)
                    .copied()
                    .unwrap_or(self.inner.defaults);
                Arc::new(CircuitBreaker::new(provider.clone(), config))
            })
            .clone()
    }

    pub fn allow(&self, provider: &ProviderId) -> bool {
        self.breaker(provider).allow()
    }

    pub fn snapshot(&self, provider: &ProviderId) -> HealthSnapshot {
        self.breaker(provider).snapshot()
    }

    /// Snapshots of every provider referenced so far, sorted by id
    pub fn snapshots(&self) -> Vec<HealthSnapshot> {
        let breakers = self
            .inner
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut snaps: Vec<_> = breakers.values().map(|b| b.snapshot()).collect();
        snaps.sort_by(|a, b| a.provider.cmp(&b.provider));
        snaps
    }
}
