// src/types.rs
// Request-scoped data model shared by every lane

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Coarse query classification used for budget and provider selection
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
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum QueryClass {
    /// Short factual lookup
    Simple,
    /// Code, APIs, error messages
    Technical,
    /// Open-ended, comparative or multi-part questions
    Research,
}

impl QueryClass {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// Tier used when the caller does not ask for one
    pub fn default_tier(&self) -> BudgetTier {
        match self {
            QueryClass::Simple => BudgetTier::Fast,
            QueryClass::Technical => BudgetTier::Standard,
            QueryClass::Research => BudgetTier::Thorough,
        }
    }
}

impl fmt::Display for QueryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested latency tier; each maps to a BudgetProfile
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::IntoStaticStr,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BudgetTier {
    Fast,
    Standard,
    Thorough,
}

impl BudgetTier {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

impl fmt::Display for BudgetTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One independent retrieval or generation path.
///
/// Declaration order is the default citation priority (KG, vector, web, LLM).
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
pub enum LaneName {
    #[serde(rename = "kg")]
    #[strum(to_string = "kg", serialize = "graph", serialize = "knowledge_graph")]
    KnowledgeGraph,
    #[serde(rename = "vector")]
    #[strum(serialize = "vector")]
    Vector,
    #[serde(rename = "web")]
    #[strum(serialize = "web")]
    Web,
    #[serde(rename = "llm")]
    #[strum(serialize = "llm")]
    Llm,
}

impl LaneName {
    pub const ALL: [LaneName; 4] = [
        LaneName::KnowledgeGraph,
        LaneName::Vector,
        LaneName::Web,
        LaneName::Llm,
    ];

    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// Retrieval lanes feed evidence; the LLM lane feeds the answer
    pub fn is_retrieval(&self) -> bool {
        !matches!(self, LaneName::Llm)
    }
}

impl fmt::Display for LaneName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable provider identifier ("openai", "ollama", "qdrant-main", ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Immutable per-request context. Shared between lane tasks behind an `Arc`.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub query: String,
    pub class: QueryClass,
    pub tier: BudgetTier,
    pub trace_id: String,
}

impl QueryContext {
    pub fn new(
        query: impl Into<String>,
        class: QueryClass,
        tier: BudgetTier,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            query: query.into(),
            class,
            tier,
            trace_id: trace_id.into(),
        }
    }
}

/// A single retrieved fact or passage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Source identifier (URL, document id, graph node id)
    #[serde(alias = "sourceId", alias = "id", alias = "url")]
    pub source_id: String,
    #[serde(alias = "text", alias = "fact", alias = "passage")]
    pub snippet: String,
    /// Confidence / relevance in [0, 1]
    #[serde(default, alias = "relevance", alias = "score")]
    pub confidence: f32,
}

impl Evidence {
    pub fn new(source_id: impl Into<String>, snippet: impl Into<String>, confidence: f32) -> Self {
        Self {
            source_id: source_id.into(),
            snippet: snippet.into(),
            confidence,
        }
    }
}

/// What a backend hands back on success
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LanePayload {
    #[serde(default)]
    pub items: Vec<Evidence>,
    /// Synthesized answer (LLM lane only)
    #[serde(default)]
    pub answer: Option<String>,
}

impl LanePayload {
    pub fn evidence(items: Vec<Evidence>) -> Self {
        Self {
            items,
            answer: None,
        }
    }

    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            items: Vec::new(),
            answer: Some(text.into()),
        }
    }

    pub fn with_items(mut self, items: Vec<Evidence>) -> Self {
        self.items = items;
        self
    }
}

/// Coarse outcome reported in `perLaneStatus`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LaneOutcome {
    Success,
    Timeout,
    Failure,
}

impl LaneOutcome {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

impl fmt::Display for LaneOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one lane for one request. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub enum LaneResult {
    Success {
        payload: LanePayload,
        provider: ProviderId,
        latency: Duration,
    },
    Timeout {
        provider: Option<ProviderId>,
        latency: Duration,
    },
    Failure {
        kind: ErrorKind,
        provider: Option<ProviderId>,
        latency: Duration,
        reason: String,
    },
}

impl LaneResult {
    pub fn failure(
        kind: ErrorKind,
        provider: Option<ProviderId>,
        latency: Duration,
        reason: impl Into<String>,
    ) -> Self {
        Self::Failure {
            kind,
            provider,
            latency,
            reason: reason.into(),
        }
    }

    pub fn outcome(&self) -> LaneOutcome {
        match self {
            Self::Success { .. } => LaneOutcome::Success,
            Self::Timeout { .. } => LaneOutcome::Timeout,
            Self::Failure { .. } => LaneOutcome::Failure,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn latency(&self) -> Duration {
        match self {
            Self::Success { latency, .. }
            | Self::Timeout { latency, .. }
            | Self::Failure { latency, .. } => *latency,
        }
    }

    pub fn provider(&self) -> Option<&ProviderId> {
        match self {
            Self::Success { provider, .. } => Some(provider),
            Self::Timeout { provider, .. } | Self::Failure { provider, .. } => provider.as_ref(),
        }
    }

    /// Error classification, `None` for successes
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Success { .. } => None,
            Self::Timeout { .. } => Some(ErrorKind::LaneTimeout),
            Self::Failure { kind, .. } => Some(*kind),
        }
    }

    pub fn payload(&self) -> Option<&LanePayload> {
        match self {
            Self::Success { payload, .. } => Some(payload),
            _ => None,
        }
    }

    /// Rebuild with a different latency (lane-wide rather than per-attempt)
    pub fn with_latency(self, latency: Duration) -> Self {
        match self {
            Self::Success {
                payload, provider, ..
            } => Self::Success {
                payload,
                provider,
                latency,
            },
            Self::Timeout { provider, .. } => Self::Timeout { provider, latency },
            Self::Failure {
                kind,
                provider,
                reason,
                ..
            } => Self::Failure {
                kind,
                provider,
                latency,
                reason,
            },
        }
    }

    pub fn status(&self) -> LaneStatus {
        LaneStatus {
            outcome: self.outcome(),
            latency_ms: self.latency().as_millis() as u64,
            provider: self.provider().cloned(),
            error: self.error_kind(),
        }
    }
}

/// Final per-request lane results, keyed by lane
pub type LaneResults = BTreeMap<LaneName, LaneResult>;

/// How much evidence or synthesis was missing. Ordered best to worst.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DegradationLevel {
    Full,
    PartialEvidence,
    #[serde(rename = "llm_degraded")]
    #[strum(serialize = "llm_degraded")]
    LlmDegraded,
    Emergency,
}

impl DegradationLevel {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// Keep the worse of two levels
    pub fn worst(self, other: DegradationLevel) -> DegradationLevel {
        self.max(other)
    }

    /// The answer cannot come from the LLM lane
    pub fn requires_fallback(&self) -> bool {
        matches!(self, DegradationLevel::LlmDegraded | DegradationLevel::Emergency)
    }
}

impl fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A numbered citation attached to a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub id: usize,
    pub snippet: String,
    /// Source identifier as reported by the backend
    pub source: String,
    pub lane: LaneName,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneStatus {
    pub outcome: LaneOutcome,
    pub latency_ms: u64,
    pub provider: Option<ProviderId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

/// Terminal output for one request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub degradation_level: DegradationLevel,
    pub per_lane_status: BTreeMap<LaneName, LaneStatus>,
    pub trace_id: String,
    pub total_latency_ms: u64,
}
