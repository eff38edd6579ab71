// src/telemetry.rs
// Structured telemetry events and sinks

use crate::error::ErrorKind;
use crate::types::{DegradationLevel, LaneName, LaneOutcome, LaneResult, ProviderId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// One telemetry record. Serialised as camelCase JSON with a `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// A single backend call made by the lane executor
    #[serde(rename_all = "camelCase")]
    Attempt {
        trace_id: String,
        lane: LaneName,
        provider: ProviderId,
        outcome: LaneOutcome,
        error: Option<ErrorKind>,
        latency_ms: u64,
        at: DateTime<Utc>,
    },
    /// Final result of a lane after any provider fallback
    #[serde(rename_all = "camelCase")]
    LaneCompleted {
        trace_id: String,
        lane: LaneName,
        provider: Option<ProviderId>,
        outcome: LaneOutcome,
        error: Option<ErrorKind>,
        latency_ms: u64,
        at: DateTime<Utc>,
    },
    /// One per request
    #[serde(rename_all = "camelCase")]
    RequestSummary {
        trace_id: String,
        degradation_level: DegradationLevel,
        lanes: usize,
        lanes_succeeded: usize,
        citations: usize,
        total_latency_ms: u64,
        budget_exceeded: bool,
        at: DateTime<Utc>,
    },
}

impl TelemetryEvent {
    pub fn attempt(trace_id: &str, lane: LaneName, provider: &ProviderId, result: &LaneResult) -> Self {
        Self::Attempt {
            trace_id: trace_id.to_string(),
            lane,
            provider: provider.clone(),
            outcome: result.outcome(),
            error: result.error_kind(),
            latency_ms: result.latency().as_millis() as u64,
            at: Utc::now(),
        }
    }

    pub fn lane_completed(trace_id: &str, lane: LaneName, result: &LaneResult) -> Self {
        Self::LaneCompleted {
            trace_id: trace_id.to_string(),
            lane,
            provider: result.provider().cloned(),
            outcome: result.outcome(),
            error: result.error_kind(),
            latency_ms: result.latency().as_millis() as u64,
            at: Utc::now(),
        }
    }

    pub fn trace_id(&self) -> &str {
        match self {
            Self::Attempt { trace_id, .. }
            | Self::LaneCompleted { trace_id, .. }
            | Self::RequestSummary { trace_id, .. } => trace_id,
        }
    }
}

/// Receives telemetry. Implementations must not block: `emit` is called on
/// the request path.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

/// Writes events as structured tracing records
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit(&self, event: TelemetryEvent) {
        match &event {
            TelemetryEvent::Attempt {
                trace_id,
                lane,
                provider,
                outcome,
                error,
                latency_ms,
                ..
            } => info!(
                trace_id = %trace_id,
                lane = %lane,
                provider = %provider,
                outcome = %outcome,
                error = ?error,
                latency_ms,
                "lane attempt"
            ),
            TelemetryEvent::LaneCompleted {
                trace_id,
                lane,
                provider,
                outcome,
                error,
                latency_ms,
                ..
            } => info!(
                trace_id = %trace_id,
                lane = %lane,
                provider = ?provider.as_ref().map(ProviderId::as_str),
                outcome = %outcome,
                error = ?error,
                latency_ms,
                "lane completed"
            ),
            TelemetryEvent::RequestSummary {
                trace_id,
                degradation_level,
                lanes,
                lanes_succeeded,
                citations,
                total_latency_ms,
                budget_exceeded,
                ..
            } => info!(
                trace_id = %trace_id,
                degradation = %degradation_level,
                lanes,
                lanes_succeeded,
                citations,
                total_latency_ms,
                budget_exceeded,
                "request complete"
            ),
        }
    }
}

/// Forwards events to an external collector over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<TelemetryEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TelemetryEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TelemetrySink for ChannelSink {
    fn emit(&self, event: TelemetryEvent) {
        if self.tx.send(event).is_err() {
            warn!("Telemetry receiver dropped, event discarded");
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TelemetrySink for MemorySink {
    fn emit(&self, event: TelemetryEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
