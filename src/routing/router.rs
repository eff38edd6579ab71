// src/routing/router.rs
// Provider selection: ordered candidate list per lane

use crate::backend::{Backend, BackendSet};
use crate::health::{CircuitBreakerRegistry, HealthSnapshot};
use crate::types::{LaneName, ProviderId, QueryClass};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Cost/latency preferences applied when ranking providers
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingPolicy {
    /// Rank local and free providers ahead of paid ones
    pub prefer_free: bool,
    /// Providers whose per-call cost exceeds this are dropped
    pub cost_ceiling: Option<f64>,
    /// Skip the lane when every provider's breaker is open, instead of
    /// attempting the best-ranked one anyway
    pub skip_lane_when_all_open: bool,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            prefer_free: true,
            cost_ceiling: None,
            skip_lane_when_all_open: false,
        }
    }
}

struct Ranked<'a> {
    backend: &'a Arc<dyn Backend>,
    health: HealthSnapshot,
}

/// Picks an ordered preference list of providers for a lane.
///
/// Pure over the static backend set and the current breaker snapshots: asking
/// for an order never changes breaker state.
#[derive(Debug, Clone)]
pub struct ProviderRouter {
    backends: Arc<BackendSet>,
    health: CircuitBreakerRegistry,
}

impl ProviderRouter {
    pub fn new(backends: Arc<BackendSet>, health: CircuitBreakerRegistry) -> Self {
        Self { backends, health }
    }

    pub fn backends(&self) -> &Arc<BackendSet> {
        &self.backends
    }

    /// Ordered provider ids for a lane.
    ///
    /// Ranking: policy tier (free/local before paid), then capability for the
    /// class (higher first), then last observed latency (lower first, unknown
    /// last), then provider id. Providers whose breaker denies calls are
    /// removed, but one provider is kept when all are open unless the policy
    /// says to skip the lane.
    pub fn select_order(
        &self,
        lane: LaneName,
        class: QueryClass,
        policy: &RoutingPolicy,
    ) -> Vec<ProviderId> {
        self.rank(lane, class, policy)
            .into_iter()
            .map(|b| b.id().clone())
            .collect()
    }

    /// Same as `select_order`, resolved to backends
    pub fn select_backends(
        &self,
        lane: LaneName,
        class: QueryClass,
        policy: &RoutingPolicy,
    ) -> Vec<Arc<dyn Backend>> {
        self.rank(lane, class, policy)
    }

    fn rank(
        &self,
        lane: LaneName,
        class: QueryClass,
        policy: &RoutingPolicy,
    ) -> Vec<Arc<dyn Backend>> {
        let providers = self.backends.providers(lane);
        if providers.is_empty() {
            return Vec::new();
        }

        let mut candidates: Vec<Ranked<'_>> = providers
            .iter()
            .filter(|b| {
                policy
                    .cost_ceiling
                    .is_none_or(|ceiling| b.spec().cost_per_call <= ceiling)
            })
            .map(|b| Ranked {
                backend: b,
                health: self.health.snapshot(b.id()),
            })
            .collect();

        if candidates.is_empty() {
            // Everything is over the ceiling; fall back to the cheapest provider
            if let Some(cheapest) = providers.iter().min_by(|a, b| {
                a.spec()
                    .cost_per_call
                    .total_cmp(&b.spec().cost_per_call)
                    .then_with(|| a.id().cmp(b.id()))
            }) {
                debug!(lane = %lane, provider = %cheapest.id(), "All providers over cost ceiling, keeping cheapest");
                candidates.push(Ranked {
                    backend: cheapest,
                    health: self.health.snapshot(cheapest.id()),
                });
            }
        }

        candidates.sort_by(|a, b| compare(a, b, class, policy));

        let available: Vec<Arc<dyn Backend>> = candidates
            .iter()
            .filter(|c| c.health.available)
            .map(|c| c.backend.clone())
            .collect();

        let order = if !available.is_empty() {
            available
        } else if policy.skip_lane_when_all_open {
            debug!(lane = %lane, "All providers open, skipping lane");
            Vec::new()
        } else {
            candidates
                .first()
                .map(|c| vec![c.backend.clone()])
                .unwrap_or_default()
        };

        debug!(
            lane = %lane,
            class = %class,
            order = ?order.iter().map(|b| b.id().as_str()).collect::<Vec<_>>(),
            "Provider order selected"
        );
        order
    }
}

fn compare(a: &Ranked<'_>, b: &Ranked<'_>, class: QueryClass, policy: &RoutingPolicy) -> Ordering {
    let tier_rank = |r: &Ranked<'_>| -> u8 {
        if policy.prefer_free && !r.backend.spec().tier.is_free() {
            1
        } else {
            0
        }
    };
    let latency = |r: &Ranked<'_>| r.health.last_latency.unwrap_or(Duration::MAX);

    tier_rank(a)
        .cmp(&tier_rank(b))
        .then_with(|| {
            let ca = a.backend.spec().capability.score(class);
            let cb = b.backend.spec().capability.score(class);
            cb.total_cmp(&ca)
        })
        .then_with(|| latency(a).cmp(&latency(b)))
        .then_with(|| a.backend.id().cmp(b.backend.id()))
}
