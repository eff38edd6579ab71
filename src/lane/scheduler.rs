// src/lane/scheduler.rs
// Concurrent fan-out of all configured lanes under one cancellable scope

use super::executor::LaneExecutor;
use crate::budget::BudgetProfile;
use crate::error::ErrorKind;
use crate::routing::{ProviderRouter, RoutingPolicy};
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::types::{LaneName, LaneResult, LaneResults, QueryContext};
use futures::FutureExt;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long to wait for lane tasks to acknowledge a stop signal
const DRAIN_GRACE: Duration = Duration::from_millis(25);

/// Launches one task per configured lane and collects results without
/// waiting on stragglers past the longest lane budget
#[derive(Clone)]
pub struct LaneScheduler {
    router: ProviderRouter,
    executor: LaneExecutor,
    telemetry: Arc<dyn TelemetrySink>,
}

impl LaneScheduler {
    pub fn new(
        router: ProviderRouter,
        executor: LaneExecutor,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            router,
            executor,
            telemetry,
        }
    }

    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    /// Lanes that have both a budget in `profile` and at least one backend
    pub fn configured_lanes(&self, profile: &BudgetProfile) -> Vec<LaneName> {
        profile
            .lanes()
            .map(|(lane, _)| lane)
            .filter(|lane| !self.router.backends().providers(*lane).is_empty())
            .collect()
    }

    /// Run every configured lane concurrently.
    ///
    /// Each lane gets `min(start + lane budget, deadline_cap)` as its deadline.
    /// Returns when all lanes are done, when the longest lane deadline passes,
    /// or when `cancel` fires, whichever comes first. Every configured lane
    /// has an entry in the result map.
    pub async fn fan_out(
        &self,
        query: Arc<QueryContext>,
        profile: &BudgetProfile,
        policy: &RoutingPolicy,
        deadline_cap: Option<Instant>,
        cancel: &CancellationToken,
    ) -> LaneResults {
        let start = Instant::now();
        let scope = cancel.child_token();
        let mut tasks: JoinSet<(LaneName, LaneResult)> = JoinSet::new();
        let mut deadlines: BTreeMap<LaneName, Instant> = BTreeMap::new();

        for (lane, budget) in profile.lanes() {
            if self.router.backends().providers(lane).is_empty() {
                debug!(lane = %lane, "No backends registered, lane not configured");
                continue;
            }
            let deadline = match deadline_cap {
                Some(cap) => (start + budget).min(cap),
                None => start + budget,
            };
            deadlines.insert(lane, deadline);

            let candidates = self.router.select_backends(lane, query.class, policy);
            let executor = self.executor.clone();
            let query = Arc::clone(&query);
            let token = scope.clone();
            tasks.spawn(async move {
                let run = executor.run_candidates(lane, &candidates, &query, deadline, &token);
                let result = match AssertUnwindSafe(run).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => LaneResult::failure(
                        ErrorKind::Internal,
                        None,
                        start.elapsed(),
                        "lane task panicked",
                    ),
                };
                (lane, result)
            });
        }

        let Some(hard_stop) = deadlines.values().max().copied() else {
            debug!(trace_id = %query.trace_id, "No lanes configured for this tier");
            return LaneResults::new();
        };

        let mut results = LaneResults::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(trace_id = %query.trace_id, "Fan-out cancelled");
                    break;
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok((lane, result))) => self.complete(&query, &mut results, lane, result),
                    Some(Err(e)) => warn!(trace_id = %query.trace_id, error = %e, "Lane task failed to join"),
                    None => break,
                },
                _ = sleep_until(hard_stop) => {
                    debug!(trace_id = %query.trace_id, pending = tasks.len(), "Longest lane budget expired");
                    break;
                }
            }
        }

        if !tasks.is_empty() {
            scope.cancel();
            let drain = async {
                while let Some(joined) = tasks.join_next().await {
                    if let Ok((lane, result)) = joined {
                        self.complete(&query, &mut results, lane, result);
                    }
                }
            };
            if timeout(DRAIN_GRACE, drain).await.is_err() {
                warn!(
                    trace_id = %query.trace_id,
                    pending = tasks.len(),
                    "Lane tasks ignored the stop signal, abandoning them"
                );
            }
            tasks.abort_all();
        }

        let cancelled = cancel.is_cancelled();
        for lane in deadlines.keys() {
            if results.contains_key(lane) {
                continue;
            }
            let result = if cancelled {
                LaneResult::failure(ErrorKind::Cancelled, None, start.elapsed(), "request cancelled")
            } else {
                LaneResult::Timeout {
                    provider: None,
                    latency: start.elapsed(),
                }
            };
            self.complete(&query, &mut results, *lane, result);
        }
        results
    }

    /// Store a lane's final result and report it as soon as it is known
    fn complete(
        &self,
        query: &QueryContext,
        results: &mut LaneResults,
        lane: LaneName,
        result: LaneResult,
    ) {
        if let LaneResult::Timeout { latency, .. } = &result {
            warn!(trace_id = %query.trace_id, lane = %lane, latency_ms = latency.as_millis() as u64, "Lane timed out");
        }
        self.telemetry
            .emit(TelemetryEvent::lane_completed(&query.trace_id, lane, &result));
        results.insert(lane, result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, BackendSet, CostTier, ProviderSpec, Scripted, SimulatedBackend};
    use crate::degradation::GracefulDegradationManager;
    use crate::health::{BreakerConfig, CircuitBreakerRegistry};
    use crate::telemetry::MemorySink;
    use crate::types::{BudgetTier, Evidence, LaneOutcome, QueryClass};

    fn sim(id: &str, lane: LaneName, latency_ms: u64, outcome: Scripted) -> Arc<dyn Backend> {
        Arc::new(SimulatedBackend::new(
            ProviderSpec::new(id, lane, CostTier::Local),
            Duration::from_millis(latency_ms),
            outcome,
        ))
    }

    fn evidence(id: &str) -> Scripted {
        Scripted::Evidence(vec![Evidence::new(id, "fact", 0.8)])
    }

    fn scheduler(backends: Vec<Arc<dyn Backend>>) -> (LaneScheduler, Arc<MemorySink>) {
        let set = backends.into_iter().fold(BackendSet::new(), |s, b| s.with(b));
        let health = CircuitBreakerRegistry::new(BreakerConfig::default());
        let sink = Arc::new(MemorySink::new());
        let router = ProviderRouter::new(Arc::new(set), health.clone());
        let executor = LaneExecutor::new(
            health,
            sink.clone(),
            Arc::new(GracefulDegradationManager::default()),
        );
        (LaneScheduler::new(router, executor, sink.clone()), sink)
    }

    fn profile(lanes: &[(LaneName, u64)]) -> BudgetProfile {
        BudgetProfile::new(
            BudgetTier::Standard,
            lanes
                .iter()
                .map(|(l, ms)| (*l, Duration::from_millis(*ms)))
                .collect(),
            Duration::from_millis(3000),
            Duration::from_millis(300),
        )
        .unwrap()
    }

    fn standard_profile() -> BudgetProfile {
        profile(&[
            (LaneName::KnowledgeGraph, 1500),
            (LaneName::Vector, 2000),
            (LaneName::Web, 2500),
            (LaneName::Llm, 2500),
        ])
    }

    fn query() -> Arc<QueryContext> {
        Arc::new(QueryContext::new(
            "What is the capital of France?",
            QueryClass::Simple,
            BudgetTier::Standard,
            "trace-fan",
        ))
    }

    fn healthy_backends() -> Vec<Arc<dyn Backend>> {
        vec![
            sim("graph", LaneName::KnowledgeGraph, 200, evidence("kg:paris")),
            sim("qdrant", LaneName::Vector, 300, evidence("doc:france")),
            sim("search", LaneName::Web, 400, evidence("https://example.org/paris")),
            sim("ollama", LaneName::Llm, 900, Scripted::Answer("Paris".into())),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn test_lanes_run_concurrently() {
        let (scheduler, sink) = scheduler(healthy_backends());
        let start = Instant::now();
        let results = scheduler
            .fan_out(query(), &standard_profile(), &RoutingPolicy::default(), None, &CancellationToken::new())
            .await;
        assert_eq!(results.len(), 4);
        assert!(results.values().all(LaneResult::is_success));
        // Bounded by the slowest lane, not the sum
        assert!(start.elapsed() < Duration::from_millis(1000));

        let completed = sink
            .events()
            .into_iter()
            .filter(|e| matches!(e, TelemetryEvent::LaneCompleted { .. }))
            .count();
        assert_eq!(completed, 4);
    }

    fn completed_lanes(sink: &MemorySink) -> Vec<LaneName> {
        sink.events()
            .into_iter()
            .filter_map(|e| match e {
                TelemetryEvent::LaneCompleted { lane, .. } => Some(lane),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_lane_completion_reported_as_each_lane_finishes() {
        let mut backends = healthy_backends();
        backends[1] = sim("qdrant", LaneName::Vector, 5000, evidence("doc:late"));
        let (scheduler, sink) = scheduler(backends);
        let fan_out = tokio::spawn({
            let scheduler = scheduler.clone();
            async move {
                scheduler
                    .fan_out(query(), &standard_profile(), &RoutingPolicy::default(), None, &CancellationToken::new())
                    .await
            }
        });

        // KG (200ms) has finished, LLM (900ms) has not
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(completed_lanes(&sink), vec![LaneName::KnowledgeGraph]);

        let results = fan_out.await.unwrap();
        assert_eq!(results.len(), 4);
        assert_eq!(
            completed_lanes(&sink),
            vec![LaneName::KnowledgeGraph, LaneName::Web, LaneName::Llm, LaneName::Vector]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_lane_times_out_without_blocking_others() {
        let mut backends = healthy_backends();
        backends[1] = sim("qdrant", LaneName::Vector, 5000, evidence("doc:late"));
        let (scheduler, _) = scheduler(backends);
        let start = Instant::now();
        let results = scheduler
            .fan_out(query(), &standard_profile(), &RoutingPolicy::default(), None, &CancellationToken::new())
            .await;

        assert!(start.elapsed() <= Duration::from_millis(2500) + DRAIN_GRACE);
        assert_eq!(results[&LaneName::Vector].outcome(), LaneOutcome::Timeout);
        assert!(results[&LaneName::Vector].latency() >= Duration::from_millis(2000));
        assert!(results[&LaneName::Llm].is_success());
        assert!(results[&LaneName::KnowledgeGraph].is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_reaches_every_lane() {
        let backends = vec![
            sim("graph", LaneName::KnowledgeGraph, 10, evidence("kg:1")),
            sim("qdrant", LaneName::Vector, 1800, evidence("doc:1")),
            sim("ollama", LaneName::Llm, 2000, Scripted::Answer("late".into())),
        ];
        let (scheduler, _) = scheduler(backends);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let results = scheduler
            .fan_out(query(), &standard_profile(), &RoutingPolicy::default(), None, &cancel)
            .await;
        assert!(start.elapsed() < Duration::from_millis(200));
        // Already-completed lanes keep their result
        assert!(results[&LaneName::KnowledgeGraph].is_success());
        assert_eq!(results[&LaneName::Vector].error_kind(), Some(ErrorKind::Cancelled));
        assert_eq!(results[&LaneName::Llm].error_kind(), Some(ErrorKind::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_lanes_with_budget_and_backends_run() {
        let backends = vec![
            sim("qdrant", LaneName::Vector, 10, evidence("doc:1")),
            sim("search", LaneName::Web, 10, evidence("https://a.org")),
        ];
        let (scheduler, _) = scheduler(backends);
        let results = scheduler
            .fan_out(
                query(),
                &profile(&[(LaneName::Vector, 1000), (LaneName::Llm, 1000)]),
                &RoutingPolicy::default(),
                None,
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(results.keys().copied().collect::<Vec<_>>(), vec![LaneName::Vector]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cap_shortens_lane_budgets() {
        let backends = vec![sim("ollama", LaneName::Llm, 2000, Scripted::Answer("x".into()))];
        let (scheduler, _) = scheduler(backends);
        let start = Instant::now();
        let results = scheduler
            .fan_out(
                query(),
                &standard_profile(),
                &RoutingPolicy::default(),
                Some(start + Duration::from_millis(500)),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(results[&LaneName::Llm].outcome(), LaneOutcome::Timeout);
        assert!(start.elapsed() <= Duration::from_millis(500) + DRAIN_GRACE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_configured_lanes_returns_empty() {
        let (scheduler, _) = scheduler(vec![]);
        let results = scheduler
            .fan_out(query(), &standard_profile(), &RoutingPolicy::default(), None, &CancellationToken::new())
            .await;
        assert!(results.is_empty());
        assert!(scheduler.configured_lanes(&standard_profile()).is_empty());
    }
}
