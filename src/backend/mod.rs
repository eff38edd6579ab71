// src/backend/mod.rs
// Backend abstraction: every lane provider implements `Backend`

mod http;
mod simulated;

pub use http::{HttpBackend, shared_client};
pub use simulated::{Scripted, SimulatedBackend};

use crate::error::{ErrorKind, LanewiseError, Result};
use crate::types::{LaneName, LanePayload, ProviderId, QueryClass, QueryContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Pricing tier of a provider, used by the routing policy
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::IntoStaticStr,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CostTier {
    /// Runs on this machine (Ollama, local index)
    Local,
    /// Hosted but free of charge
    Free,
    /// Billed per call or per token
    Paid,
}

impl CostTier {
    pub fn is_free(&self) -> bool {
        !matches!(self, CostTier::Paid)
    }
}

/// Declared model capability per query class, 0.0 - 1.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityScores {
    pub simple: f32,
    pub technical: f32,
    pub research: f32,
}

impl Default for CapabilityScores {
    fn default() -> Self {
        Self::uniform(0.5)
    }
}

impl CapabilityScores {
    pub fn uniform(score: f32) -> Self {
        Self {
            simple: score,
            technical: score,
            research: score,
        }
    }

    pub fn score(&self, class: QueryClass) -> f32 {
        match class {
            QueryClass::Simple => self.simple,
            QueryClass::Technical => self.technical,
            QueryClass::Research => self.research,
        }
    }
}

/// Static description of a provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSpec {
    pub id: ProviderId,
    pub lane: LaneName,
    pub tier: CostTier,
    pub capability: CapabilityScores,
    /// Estimated cost of one call in USD, checked against the cost ceiling
    pub cost_per_call: f64,
}

impl ProviderSpec {
    pub fn new(id: impl Into<String>, lane: LaneName, tier: CostTier) -> Self {
        Self {
            id: ProviderId::new(id),
            lane,
            tier,
            capability: CapabilityScores::default(),
            cost_per_call: 0.0,
        }
    }

    pub fn with_capability(mut self, capability: CapabilityScores) -> Self {
        self.capability = capability;
        self
    }

    pub fn with_cost(mut self, cost_per_call: f64) -> Self {
        self.cost_per_call = cost_per_call;
        self
    }
}

/// Per-call context handed to a backend: its deadline and a cancellation signal.
///
/// Backends should stop work when `cancel` fires; the executor stops waiting
/// either way.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub deadline: Instant,
    pub cancel: CancellationToken,
}

impl CallContext {
    pub fn new(deadline: Instant, cancel: CancellationToken) -> Self {
        Self { deadline, cancel }
    }

    /// Time left before the deadline, zero once it has passed
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Errors a backend may return
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("call cancelled")]
    Cancelled,

    #[error("backend error: {0}")]
    Other(String),
}

impl BackendError {
    /// Classify into the lane failure taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackendError::Unavailable(_) | BackendError::RateLimited(_) | BackendError::Other(_) => {
                ErrorKind::ProviderUnavailable
            }
            BackendError::InvalidResponse(_) => ErrorKind::InvalidResponse,
            BackendError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            if status.as_u16() == 429 {
                BackendError::RateLimited(status.to_string())
            } else {
                BackendError::Unavailable(status.to_string())
            }
        } else {
            BackendError::Unavailable(err.to_string())
        }
    }
}

/// A pluggable lane provider (vector search, knowledge graph, web search, LLM).
///
/// The lane in `spec()` decides which variant a backend is.
#[async_trait]
pub trait Backend: Send + Sync {
    fn spec(&self) -> &ProviderSpec;

    async fn call(
        &self,
        ctx: &CallContext,
        query: &QueryContext,
    ) -> std::result::Result<LanePayload, BackendError>;

    fn id(&self) -> &ProviderId {
        &self.spec().id
    }

    fn lane(&self) -> LaneName {
        self.spec().lane
    }
}

/// Registered backends grouped by lane
#[derive(Clone, Default)]
pub struct BackendSet {
    lanes: BTreeMap<LaneName, Vec<Arc<dyn Backend>>>,
}

impl BackendSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend; provider ids must be unique within a lane
    pub fn register(&mut self, backend: Arc<dyn Backend>) -> Result<()> {
        let providers = self.lanes.entry(backend.lane()).or_default();
        if providers.iter().any(|b| b.id() == backend.id()) {
            return Err(LanewiseError::Config(format!(
                "provider {} registered twice for lane {}",
                backend.id(),
                backend.lane()
            )));
        }
        providers.push(backend);
        Ok(())
    }

    /// Builder form of `register`; a backend with the same id replaces the old one
    pub fn with(mut self, backend: Arc<dyn Backend>) -> Self {
        let providers = self.lanes.entry(backend.lane()).or_default();
        providers.retain(|b| b.id() != backend.id());
        providers.push(backend);
        self
    }

    /// Lanes that have at least one provider
    pub fn lanes(&self) -> impl Iterator<Item = LaneName> + '_ {
        self.lanes
            .iter()
            .filter(|(_, providers)| !providers.is_empty())
            .map(|(lane, _)| *lane)
    }

    pub fn providers(&self, lane: LaneName) -> &[Arc<dyn Backend>] {
        self.lanes.get(&lane).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get(&self, lane: LaneName, id: &ProviderId) -> Option<Arc<dyn Backend>> {
        self.providers(lane).iter().find(|b| b.id() == id).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.values().all(Vec::is_empty)
    }
}

impl fmt::Debug for BackendSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (lane, providers) in &self.lanes {
            let ids: Vec<&str> = providers.iter().map(|b| b.id().as_str()).collect();
            map.entry(lane, &ids);
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim(id: &str, lane: LaneName) -> Arc<dyn Backend> {
        Arc::new(SimulatedBackend::new(
            ProviderSpec::new(id, lane, CostTier::Local),
            Duration::from_millis(1),
            Scripted::Evidence(vec![]),
        ))
    }

    #[test]
    fn test_register_rejects_duplicate_ids() {
        let mut set = BackendSet::new();
        set.register(sim("qdrant", LaneName::Vector)).unwrap();
        assert!(set.register(sim("qdrant", LaneName::Vector)).is_err());
        // Same id on another lane is fine
        set.register(sim("qdrant", LaneName::Web)).unwrap();
    }

    #[test]
    fn test_with_replaces_same_id() {
        let set = BackendSet::new()
            .with(sim("a", LaneName::Vector))
            .with(sim("a", LaneName::Vector))
            .with(sim("b", LaneName::Vector));
        assert_eq!(set.providers(LaneName::Vector).len(), 2);
        assert!(set.get(LaneName::Vector, &ProviderId::new("b")).is_some());
        assert!(set.get(LaneName::Web, &ProviderId::new("b")).is_none());
    }

    #[test]
    fn test_lanes_lists_configured_lanes_in_order() {
        let set = BackendSet::new()
            .with(sim("llm", LaneName::Llm))
            .with(sim("kg", LaneName::KnowledgeGraph));
        let lanes: Vec<_> = set.lanes().collect();
        assert_eq!(lanes, vec![LaneName::KnowledgeGraph, LaneName::Llm]);
    }

    #[test]
    fn test_backend_error_kinds() {
        assert_eq!(
            BackendError::RateLimited("429".into()).kind(),
            ErrorKind::ProviderUnavailable
        );
        assert_eq!(
            BackendError::InvalidResponse("no answer".into()).kind(),
            ErrorKind::InvalidResponse
        );
        assert_eq!(BackendError::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_capability_lookup() {
        let caps = CapabilityScores {
            simple: 0.2,
            technical: 0.9,
            research: 0.5,
        };
        assert!((caps.score(QueryClass::Technical) - 0.9).abs() < f32::EPSILON);
        assert!(CostTier::Local.is_free());
        assert!(!CostTier::Paid.is_free());
    }
}
