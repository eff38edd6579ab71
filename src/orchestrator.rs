// src/orchestrator.rs
// Per-request composition: classify, fan out, aggregate, degrade, respond

use crate::aggregate::ResultAggregator;
use crate::backend::BackendSet;
use crate::budget::BudgetProfile;
use crate::classify::classify;
use crate::config::OrchestratorConfig;
use crate::degradation::{GracefulDegradationManager, failure_reason};
use crate::error::{ErrorKind, LanewiseError, Result};
use crate::health::{CircuitBreakerRegistry, HealthSnapshot};
use crate::lane::{LaneExecutor, LaneScheduler};
use crate::routing::{ProviderRouter, RoutingPolicy};
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::types::{
    AggregatedResponse, BudgetTier, DegradationLevel, QueryClass, QueryContext,
};
use chrono::Utc;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Per-request overrides; everything defaults to the orchestrator's config
#[derive(Debug, Clone, Default)]
pub struct QueryPreferences {
    pub tier: Option<BudgetTier>,
    pub class: Option<QueryClass>,
    pub policy: Option<RoutingPolicy>,
    /// Caller-supplied trace id, e.g. from an inbound request header
    pub trace_id: Option<String>,
}

impl QueryPreferences {
    pub fn with_tier(mut self, tier: BudgetTier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn with_class(mut self, class: QueryClass) -> Self {
        self.class = Some(class);
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

/// Top-level entry point. Cheap to share behind an `Arc`; the breaker
/// registry inside is the only state that outlives a request.
pub struct Orchestrator {
    profiles: HashMap<BudgetTier, BudgetProfile>,
    policy: RoutingPolicy,
    scheduler: LaneScheduler,
    aggregator: ResultAggregator,
    degradation: Arc<GracefulDegradationManager>,
    health: CircuitBreakerRegistry,
    telemetry: Arc<dyn TelemetrySink>,
}

impl Orchestrator {
    /// Validates every budget tier and breaker setting up front so requests
    /// never see a bad profile or a breaker that cannot trip
    pub fn new(
        config: &OrchestratorConfig,
        backends: BackendSet,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self> {
        let mut profiles = HashMap::new();
        for tier in [BudgetTier::Fast, BudgetTier::Standard, BudgetTier::Thorough] {
            profiles.insert(tier, config.budget_profile(tier)?);
        }

        let defaults = config.breaker.defaults();
        defaults.validate("breaker")?;
        let overrides = config.breaker.overrides();
        for (id, breaker) in &overrides {
            breaker.validate(&format!("breaker.providers.{id}"))?;
        }
        let health = CircuitBreakerRegistry::with_overrides(defaults, overrides);
        let degradation = Arc::new(GracefulDegradationManager::new(
            config.aggregation.fallback_snippets,
        ));
        let router = ProviderRouter::new(Arc::new(backends), health.clone());
        let executor = LaneExecutor::new(health.clone(), telemetry.clone(), degradation.clone());
        let scheduler = LaneScheduler::new(router, executor, telemetry.clone());
        let aggregator = ResultAggregator::new(
            config.routing.lane_priority.clone(),
            config.aggregation.max_citations,
        );

        info!(
            lanes = ?scheduler.router().backends().lanes().collect::<Vec<_>>(),
            "Orchestrator initialized"
        );

        Ok(Self {
            profiles,
            policy: config.routing.policy(),
            scheduler,
            aggregator,
            degradation,
            health,
            telemetry,
        })
    }

    pub fn health(&self) -> &CircuitBreakerRegistry {
        &self.health
    }

    pub fn health_snapshots(&self) -> Vec<HealthSnapshot> {
        self.health.snapshots()
    }

    pub fn profile(&self, tier: BudgetTier) -> Result<&BudgetProfile> {
        self.profiles
            .get(&tier)
            .ok_or_else(|| LanewiseError::Config(format!("no budget profile for tier {tier}")))
    }

    /// Answer a query within the tier's global budget
    pub async fn handle(&self, raw: &str, prefs: QueryPreferences) -> Result<AggregatedResponse> {
        self.handle_with_cancel(raw, prefs, CancellationToken::new())
            .await
    }

    /// Like `handle`, but stops waiting on lanes as soon as `cancel` fires.
    ///
    /// Returns `Err` only for empty input or an internal bug in aggregation;
    /// every lane failure resolves to a labelled response.
    pub async fn handle_with_cancel(
        &self,
        raw: &str,
        prefs: QueryPreferences,
        cancel: CancellationToken,
    ) -> Result<AggregatedResponse> {
        let start = Instant::now();
        let text = raw.trim();
        if text.is_empty() {
            return Err(LanewiseError::InvalidInput("query is empty".into()));
        }

        let class = prefs.class.unwrap_or_else(|| classify(text));
        let tier = prefs.tier.unwrap_or_else(|| class.default_tier());
        let trace_id = prefs
            .trace_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let profile = self.profile(tier)?;
        let policy = prefs.policy.as_ref().unwrap_or(&self.policy);
        let query = Arc::new(QueryContext::new(text, class, tier, trace_id));

        info!(
            trace_id = %query.trace_id,
            class = %class,
            tier = %tier,
            global_ms = profile.global().as_millis() as u64,
            "Handling query"
        );

        // Lanes must finish before the synthesis reserve begins
        let lane_cap = start + profile.global().saturating_sub(profile.reserve());
        let results = self
            .scheduler
            .fan_out(Arc::clone(&query), profile, policy, Some(lane_cap), &cancel)
            .await;

        let aggregated = catch_unwind(AssertUnwindSafe(|| self.aggregator.aggregate(&results)));
        let (citations, level, llm_answer, aggregation_error) = match aggregated {
            Ok(Ok(agg)) => (agg.citations, agg.level, agg.answer, None),
            Ok(Err(e)) => {
                warn!(
                    trace_id = %query.trace_id,
                    error = %e,
                    kind = %ErrorKind::AggregationFailure,
                    "Aggregation failed, degrading to emergency"
                );
                (Vec::new(), DegradationLevel::Emergency, None, Some(e))
            }
            Err(_) => {
                error!(trace_id = %query.trace_id, "Aggregator panicked");
                return Err(LanewiseError::Internal(format!(
                    "aggregation panicked (trace {})",
                    query.trace_id
                )));
            }
        };

        let answer = match llm_answer {
            Some(llm_text) if level == DegradationLevel::PartialEvidence => {
                self.degradation.annotate_partial(&llm_text, &results)
            }
            Some(llm_text) if !level.requires_fallback() => llm_text,
            _ => {
                let reason = match &aggregation_error {
                    Some(e) => format!("{}: {}", ErrorKind::AggregationFailure, e),
                    None => failure_reason(&results),
                };
                self.degradation
                    .synthesize_fallback(&query, &citations, level, &reason)
            }
        };

        let elapsed = start.elapsed();
        let budget_exceeded = elapsed > profile.global();
        if budget_exceeded {
            warn!(
                trace_id = %query.trace_id,
                kind = %ErrorKind::TotalBudgetExceeded,
                elapsed_ms = elapsed.as_millis() as u64,
                global_ms = profile.global().as_millis() as u64,
                "Global budget exceeded, returning what is available"
            );
        }

        let response = AggregatedResponse {
            answer,
            citations,
            degradation_level: level,
            per_lane_status: results.iter().map(|(lane, r)| (*lane, r.status())).collect(),
            trace_id: query.trace_id.clone(),
            total_latency_ms: elapsed.as_millis() as u64,
        };

        self.telemetry.emit(TelemetryEvent::RequestSummary {
            trace_id: response.trace_id.clone(),
            degradation_level: level,
            lanes: results.len(),
            lanes_succeeded: results.values().filter(|r| r.is_success()).count(),
            citations: response.citations.len(),
            total_latency_ms: response.total_latency_ms,
            budget_exceeded,
            at: Utc::now(),
        });

        Ok(response)
    }
}
