// src/health/circuit_breaker.rs
// Circuit breaker for a single provider: tracks consecutive failures and
// temporarily excludes providers that are down or rate-limited.

use crate::error::{LanewiseError, Result};
use crate::types::ProviderId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Thresholds for one breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures (within the window) before the circuit trips
    pub failure_threshold: u32,
    /// Number of recent outcomes kept for the rolling window
    pub window_size: usize,
    /// How long a tripped circuit stays open before allowing a probe
    pub recovery_timeout: Duration,
    /// Consecutive half-open successes required to close again
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_size: 10,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

impl BreakerConfig {
    /// Settings that would leave the breaker unable to trip or to stay closed
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.failure_threshold == 0 {
            problems.push("failure_threshold must be > 0".to_string());
        }
        if self.success_threshold == 0 {
            problems.push("success_threshold must be > 0".to_string());
        }
        if self.window_size == 0 {
            problems.push("window_size must be > 0".to_string());
        }
        if self.failure_threshold as usize > self.window_size {
            problems.push(format!(
                "failure_threshold ({}) exceeds window_size ({})",
                self.failure_threshold, self.window_size
            ));
        }
        problems
    }

    /// `name` prefixes the error, e.g. `breaker.providers.openai`
    pub fn validate(&self, name: &str) -> Result<()> {
        match self.problems().as_slice() {
            [] => Ok(()),
            problems => Err(LanewiseError::Config(format!("{name}: {}", problems.join("; ")))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation: calls pass through
    Closed,
    /// Tripped: calls are denied until the recovery timeout elapses
    Open,
    /// Recovery timeout elapsed: probes are admitted one at a time
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s: &'static str = self.into();
        f.write_str(s)
    }
}

/// Point-in-time view of a provider's health. Taking one never changes state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub provider: ProviderId,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Failure share of the rolling window, 0.0 when empty
    pub failure_rate: f32,
    #[serde(skip)]
    pub last_latency: Option<Duration>,
    /// Whether `allow()` would admit a call right now
    pub available: bool,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    /// Start of the half-open probe currently holding the slot
    probe_started: Option<Instant>,
    /// Bumped on every transition and probe takeover; stale probes no longer match
    epoch: u64,
    changed_at: Instant,
    /// Recent outcomes, `true` = success; newest at the back
    window: VecDeque<bool>,
    last_latency: Option<Duration>,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            probe_started: None,
            epoch: 0,
            changed_at: Instant::now(),
            window: VecDeque::new(),
            last_latency: None,
        }
    }

    fn push(&mut self, ok: bool, window_size: usize, latency: Duration) {
        self.window.push_back(ok);
        while self.window.len() > window_size {
            self.window.pop_front();
        }
        self.last_latency = Some(latency);
    }

    fn trailing_failures(&self) -> usize {
        self.window.iter().rev().take_while(|ok| !**ok).count()
    }

    fn transition(&mut self, to: CircuitState) {
        self.state = to;
        self.changed_at = Instant::now();
        self.half_open_successes = 0;
        self.probe_started = None;
        self.epoch += 1;
    }

    fn is_current_probe(&self, epoch: u64) -> bool {
        self.state == CircuitState::HalfOpen && self.probe_started.is_some() && self.epoch == epoch
    }

    /// A probe that outlived the recovery timeout no longer blocks the slot
    fn probe_slot_free(&self, recovery_timeout: Duration) -> bool {
        self.probe_started
            .is_none_or(|started| started.elapsed() >= recovery_timeout)
    }
}

/// Thread-safe breaker for one provider. All transitions happen under a single
/// lock so concurrent requests never lose updates.
#[derive(Debug)]
pub struct CircuitBreaker {
    provider: ProviderId,
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

/// Permission for one call, handed out by [`CircuitBreaker::admit`].
///
/// Report the outcome with `succeed` or `fail`. Dropping it unreported (a
/// cancelled or aborted call) frees a half-open probe slot without counting.
#[derive(Debug)]
#[must_use = "an admission must be settled or dropped after the call"]
pub struct Admission {
    breaker: Arc<CircuitBreaker>,
    /// `Some(epoch)` when this call is the half-open probe
    probe: Option<u64>,
    settled: bool,
}

impl Admission {
    pub fn is_probe(&self) -> bool {
        self.probe.is_some()
    }

    pub fn succeed(mut self, latency: Duration) {
        self.settled = true;
        self.breaker.settle(self.probe, true, latency);
    }

    pub fn fail(mut self, latency: Duration) {
        self.settled = true;
        self.breaker.settle(self.probe, false, latency);
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(epoch) = self.probe {
            self.breaker.release_probe(epoch);
        }
    }
}

impl CircuitBreaker {
    pub fn new(provider: ProviderId, config: BreakerConfig) -> Self {
        Self {
            provider,
            config,
            state: Mutex::new(BreakerState::new()),
        }
    }

    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Whether a call may proceed right now. Read-only; see [`admit`](Self::admit)
    /// to actually take the call (and the half-open probe slot).
    pub fn allow(&self) -> bool {
        let Ok(s) = self.state.lock() else {
            return true; // If mutex is poisoned, allow the request
        };
        self.admissible(&s)
    }

    fn admissible(&self, s: &BreakerState) -> bool {
        match s.state {
            CircuitState::Closed => true,
            CircuitState::Open => s.changed_at.elapsed() >= self.config.recovery_timeout,
            CircuitState::HalfOpen => s.probe_slot_free(self.config.recovery_timeout),
        }
    }

    /// Admit one call.
    ///
    /// Closed admits everything. Open admits nothing until the recovery timeout
    /// elapses, then moves to HalfOpen and admits this call as the probe.
    /// HalfOpen admits one probe at a time.
    pub fn admit(self: &Arc<Self>) -> Option<Admission> {
        let probe = {
            let Ok(mut s) = self.state.lock() else {
                return Some(self.admission(None)); // If mutex is poisoned, allow the request
            };

            match s.state {
                CircuitState::Closed => None,
                CircuitState::Open => {
                    if s.changed_at.elapsed() < self.config.recovery_timeout {
                        return None;
                    }
                    info!(provider = %self.provider, "Circuit half-open, allowing probe request");
                    s.transition(CircuitState::HalfOpen);
                    s.probe_started = Some(Instant::now());
                    Some(s.epoch)
                }
                CircuitState::HalfOpen => {
                    if !s.probe_slot_free(self.config.recovery_timeout) {
                        return None;
                    }
                    if s.probe_started.is_some() {
                        debug!(provider = %self.provider, "Stale half-open probe replaced");
                        s.epoch += 1;
                    }
                    s.probe_started = Some(Instant::now());
                    Some(s.epoch)
                }
            }
        };
        Some(self.admission(probe))
    }

    fn admission(self: &Arc<Self>, probe: Option<u64>) -> Admission {
        Admission {
            breaker: Arc::clone(self),
            probe,
            settled: false,
        }
    }

    /// Record a successful call that was not a half-open probe
    pub fn record_success(&self, latency: Duration) {
        self.settle(None, true, latency);
    }

    /// Record a failed call that was not a half-open probe; may trip a closed circuit
    pub fn record_failure(&self, latency: Duration) {
        self.settle(None, false, latency);
    }

    fn settle(&self, probe: Option<u64>, ok: bool, latency: Duration) {
        let Ok(mut s) = self.state.lock() else {
            return;
        };
        s.push(ok, self.config.window_size, latency);
        if ok {
            s.consecutive_failures = 0;
        } else {
            s.consecutive_failures += 1;
        }

        if let Some(epoch) = probe {
            if s.is_current_probe(epoch) {
                self.settle_probe(&mut s, ok);
                return;
            }
        }

        // Outcomes of ordinary calls only move a closed circuit. Late results
        // landing while Open or HalfOpen are kept in the window and nothing else.
        if !ok && s.state == CircuitState::Closed {
            let failures = s.trailing_failures();
            if failures as u32 >= self.config.failure_threshold {
                warn!(
                    provider = %self.provider,
                    failures,
                    "Circuit tripped, provider will be skipped for {}s",
                    self.config.recovery_timeout.as_secs()
                );
                s.transition(CircuitState::Open);
            }
        }
    }

    fn settle_probe(&self, s: &mut BreakerState, ok: bool) {
        s.probe_started = None;
        if !ok {
            warn!(provider = %self.provider, "Half-open probe failed, circuit re-tripped");
            s.transition(CircuitState::Open);
            return;
        }

        s.half_open_successes += 1;
        if s.half_open_successes >= self.config.success_threshold {
            info!(provider = %self.provider, "Circuit recovered (half-open probes succeeded)");
            s.transition(CircuitState::Closed);
        } else {
            debug!(
                provider = %self.provider,
                successes = s.half_open_successes,
                needed = self.config.success_threshold,
                "Half-open probe succeeded"
            );
        }
    }

    fn release_probe(&self, epoch: u64) {
        if let Ok(mut s) = self.state.lock() {
            if s.is_current_probe(epoch) {
                debug!(provider = %self.provider, "Half-open probe released without outcome");
                s.probe_started = None;
            }
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let Ok(s) = self.state.lock() else {
            return HealthSnapshot {
                provider: self.provider.clone(),
                state: CircuitState::Closed,
                consecutive_failures: 0,
                failure_rate: 0.0,
                last_latency: None,
                available: true,
            };
        };

        let failures = s.window.iter().filter(|ok| !**ok).count();
        let failure_rate = if s.window.is_empty() {
            0.0
        } else {
            failures as f32 / s.window.len() as f32
        };

        HealthSnapshot {
            provider: self.provider.clone(),
            state: s.state,
            consecutive_failures: s.consecutive_failures,
            failure_rate,
            last_latency: s.last_latency,
            available: self.admissible(&s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            ProviderId::new("openai"),
            BreakerConfig {
                failure_threshold: 3,
                window_size: 5,
                recovery_timeout: Duration::from_secs(10),
                success_threshold: 2,
            },
        ))
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn trip(cb: &CircuitBreaker) {
        for _ in 0..cb.config().failure_threshold {
            cb.record_failure(ms(10));
        }
    }

    #[test]
    fn test_new_provider_is_available() {
        let cb = breaker();
        assert!(cb.allow());
        assert!(cb.admit().is_some_and(|a| !a.is_probe()));
        assert_eq!(cb.snapshot().state, CircuitState::Closed);
    }

    #[test]
    fn test_single_failure_does_not_trip() {
        let cb = breaker();
        cb.record_failure(ms(10));
        assert!(cb.allow());
    }

    #[test]
    fn test_threshold_failures_trips_circuit() {
        let cb = breaker();
        trip(&cb);
        assert!(!cb.allow());
        assert!(cb.admit().is_none());
        assert!(cb.admit().is_none(), "denials must not change state");
        assert_eq!(cb.snapshot().state, CircuitState::Open);
    }

    #[test]
    fn test_success_resets_failures() {
        let cb = breaker();
        cb.record_failure(ms(10));
        cb.record_failure(ms(10));
        cb.record_success(ms(10));
        // After success, the run resets; one more failure should not trip
        cb.record_failure(ms(10));
        assert!(cb.allow());
        assert_eq!(cb.snapshot().consecutive_failures, 1);
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let config = BreakerConfig {
            failure_threshold: 0,
            window_size: 0,
            ..BreakerConfig::default()
        };
        assert_eq!(config.problems().len(), 2);
        let err = config.validate("breaker").unwrap_err();
        assert!(err.to_string().contains("breaker: failure_threshold must be > 0"));
        assert!(BreakerConfig::default().validate("breaker").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_half_opens_after_recovery_timeout() {
        let cb = breaker();
        trip(&cb);
        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(cb.admit().is_none());
        assert!(!cb.snapshot().available);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.snapshot().available);
        assert!(cb.allow());
        assert_eq!(cb.snapshot().state, CircuitState::Open, "allow() is read-only");

        let probe = cb.admit().unwrap();
        assert!(probe.is_probe());
        assert_eq!(cb.snapshot().state, CircuitState::HalfOpen);
        // Only one probe at a time
        assert!(cb.admit().is_none());
        assert!(!cb.allow());
        drop(probe);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_successes_close_circuit() {
        let cb = breaker();
        trip(&cb);
        tokio::time::advance(Duration::from_secs(10)).await;

        cb.admit().unwrap().succeed(ms(5));
        assert_eq!(cb.snapshot().state, CircuitState::HalfOpen);

        cb.admit().unwrap().succeed(ms(5));
        assert_eq!(cb.snapshot().state, CircuitState::Closed);
        assert!(cb.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_retrips_circuit() {
        let cb = breaker();
        trip(&cb);
        tokio::time::advance(Duration::from_secs(10)).await;
        cb.admit().unwrap().succeed(ms(5));
        cb.admit().unwrap().fail(ms(5));

        assert_eq!(cb.snapshot().state, CircuitState::Open);
        assert!(cb.admit().is_none());
        // Timer was reset by the re-trip
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cb.admit().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_probe_frees_slot() {
        let cb = breaker();
        trip(&cb);
        tokio::time::advance(Duration::from_secs(10)).await;
        let probe = cb.admit().unwrap();
        assert!(cb.admit().is_none());
        drop(probe);

        let next = cb.admit().unwrap();
        assert!(next.is_probe());
        assert_eq!(cb.snapshot().state, CircuitState::HalfOpen);
        assert_eq!(cb.snapshot().consecutive_failures, 3, "a dropped probe is not counted");
        next.succeed(ms(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_probe_is_replaced_after_recovery_timeout() {
        let cb = breaker();
        trip(&cb);
        tokio::time::advance(Duration::from_secs(10)).await;
        let stuck = cb.admit().unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(cb.admit().is_none());
        tokio::time::advance(Duration::from_secs(1)).await;
        let fresh = cb.admit().unwrap();
        assert!(fresh.is_probe());

        // The superseded probe's late result does not decide the circuit
        stuck.fail(ms(20_000));
        assert_eq!(cb.snapshot().state, CircuitState::HalfOpen);
        assert!(cb.admit().is_none(), "the fresh probe still holds the slot");
        fresh.succeed(ms(5));
        cb.admit().unwrap().succeed(ms(5));
        assert_eq!(cb.snapshot().state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_success_from_closed_call_does_not_count_as_probe() {
        let cb = breaker();
        let slow_call = cb.admit().unwrap();
        assert!(!slow_call.is_probe());
        trip(&cb);
        tokio::time::advance(Duration::from_secs(10)).await;
        let probe = cb.admit().unwrap();

        // The call admitted while Closed finishes first
        slow_call.succeed(ms(10_000));
        assert_eq!(cb.snapshot().state, CircuitState::HalfOpen);
        assert!(cb.admit().is_none(), "probe slot must stay taken");

        probe.succeed(ms(5));
        assert_eq!(cb.snapshot().state, CircuitState::HalfOpen);
        cb.admit().unwrap().succeed(ms(5));
        assert_eq!(cb.snapshot().state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_failure_from_closed_call_does_not_retrip() {
        let cb = breaker();
        let slow_call = cb.admit().unwrap();
        trip(&cb);
        tokio::time::advance(Duration::from_secs(10)).await;
        let probe = cb.admit().unwrap();

        slow_call.fail(ms(10_000));
        assert_eq!(cb.snapshot().state, CircuitState::HalfOpen);
        probe.succeed(ms(5));
        assert_eq!(cb.snapshot().state, CircuitState::HalfOpen);
    }

    #[test]
    fn test_failure_rate_tracks_window() {
        let cb = breaker();
        cb.record_success(ms(1));
        cb.record_failure(ms(1));
        cb.record_success(ms(1));
        cb.record_failure(ms(40));
        let snap = cb.snapshot();
        assert!((snap.failure_rate - 0.5).abs() < f32::EPSILON);
        assert_eq!(snap.last_latency, Some(ms(40)));
    }
}
