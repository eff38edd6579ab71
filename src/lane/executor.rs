// src/lane/executor.rs
// Runs one backend call under a deadline and reports the outcome

use crate::backend::{Backend, CallContext};
use crate::degradation::GracefulDegradationManager;
use crate::error::LaneError;
use crate::health::CircuitBreakerRegistry;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::types::{LaneName, LaneResult, QueryContext};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Wraps backend calls with a deadline, classifies the outcome, and reports it
/// to the provider's breaker and the telemetry sink. Never retries on its own.
#[derive(Clone)]
pub struct LaneExecutor {
    health: CircuitBreakerRegistry,
    telemetry: Arc<dyn TelemetrySink>,
    degradation: Arc<GracefulDegradationManager>,
}

/// Fallback chain state: each step either finishes or moves to a later candidate
enum Step {
    Attempt(usize),
    Exhausted(Option<LaneResult>),
    Done(LaneResult),
}

impl LaneExecutor {
    pub fn new(
        health: CircuitBreakerRegistry,
        telemetry: Arc<dyn TelemetrySink>,
        degradation: Arc<GracefulDegradationManager>,
    ) -> Self {
        Self {
            health,
            telemetry,
            degradation,
        }
    }

    /// One attempt against one provider.
    ///
    /// A breaker denial returns `Failure(CircuitOpen)` immediately and is not
    /// recorded against the breaker again. On deadline expiry or cancellation
    /// the in-flight call is dropped and the backend's token is cancelled.
    pub async fn run(
        &self,
        lane: LaneName,
        backend: &Arc<dyn Backend>,
        query: &QueryContext,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> LaneResult {
        let provider = backend.id().clone();
        let breaker = self.health.breaker(&provider);
        let start = Instant::now();

        // Held across the call: if this future is dropped mid-call the
        // admission is dropped with it and a half-open probe slot is freed.
        let Some(admission) = breaker.admit() else {
            let result = self.degradation.handle_lane_error(
                lane,
                Some(provider.clone()),
                LaneError::CircuitOpen,
                start.elapsed(),
            );
            self.telemetry
                .emit(TelemetryEvent::attempt(&query.trace_id, lane, &provider, &result));
            return result;
        };

        let ctx = CallContext::new(deadline, cancel.child_token());
        let outcome = {
            let call = AssertUnwindSafe(backend.call(&ctx, query)).catch_unwind();
            tokio::select! {
                biased;
                // A stop signal at or after the lane deadline is still a timeout
                _ = cancel.cancelled() => if Instant::now() >= deadline {
                    Err(LaneError::Timeout)
                } else {
                    Err(LaneError::Cancelled)
                },
                res = call => match res {
                    Ok(Ok(payload)) => Ok(payload),
                    Ok(Err(e)) => Err(LaneError::Backend(e)),
                    Err(panic) => Err(LaneError::Panicked(panic_message(panic))),
                },
                _ = sleep_until(deadline) => Err(LaneError::Timeout),
            }
        };
        // Best-effort abort for backends that spawned their own work
        ctx.cancel.cancel();
        let latency = start.elapsed();

        let result = match outcome {
            Ok(payload) => LaneResult::Success {
                payload,
                provider: provider.clone(),
                latency,
            },
            Err(err) => {
                self.degradation
                    .handle_lane_error(lane, Some(provider.clone()), err, latency)
            }
        };

        match result.error_kind() {
            None => admission.succeed(latency),
            Some(kind) if kind.counts_against_provider() => admission.fail(latency),
            Some(_) => drop(admission),
        }

        self.telemetry
            .emit(TelemetryEvent::attempt(&query.trace_id, lane, &provider, &result));
        result
    }

    /// Walk an ordered candidate list until one provider succeeds, the lane
    /// deadline passes, or the list is exhausted. Attempts are strictly
    /// sequential; the returned latency covers the whole lane.
    pub async fn run_candidates(
        &self,
        lane: LaneName,
        candidates: &[Arc<dyn Backend>],
        query: &QueryContext,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> LaneResult {
        let start = Instant::now();
        let mut step = if candidates.is_empty() {
            Step::Exhausted(None)
        } else {
            Step::Attempt(0)
        };

        loop {
            step = match step {
                Step::Attempt(i) => {
                    let backend = &candidates[i];
                    if Instant::now() >= deadline {
                        Step::Done(LaneResult::Timeout {
                            provider: Some(backend.id().clone()),
                            latency: start.elapsed(),
                        })
                    } else {
                        let result = self.run(lane, backend, query, deadline, cancel).await;
                        match &result {
                            LaneResult::Success { .. } | LaneResult::Timeout { .. } => {
                                Step::Done(result)
                            }
                            LaneResult::Failure { .. } if cancel.is_cancelled() => {
                                Step::Done(result)
                            }
                            LaneResult::Failure { kind, .. } => {
                                if i + 1 < candidates.len() {
                                    debug!(
                                        lane = %lane,
                                        provider = %backend.id(),
                                        error = %kind,
                                        next = %candidates[i + 1].id(),
                                        "Falling back to next provider"
                                    );
                                    Step::Attempt(i + 1)
                                } else {
                                    Step::Exhausted(Some(result))
                                }
                            }
                        }
                    }
                }
                Step::Exhausted(last) => Step::Done(last.unwrap_or_else(|| {
                    self.degradation.handle_lane_error(
                        lane,
                        None,
                        LaneError::NoProvider,
                        start.elapsed(),
                    )
                })),
                Step::Done(result) => return result.with_latency(start.elapsed()),
            };
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
