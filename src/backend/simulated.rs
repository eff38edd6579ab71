// src/backend/simulated.rs
// Scripted in-process backend for demos, chaos drills and tests

use super::{Backend, BackendError, CallContext, ProviderSpec};
use crate::types::{Evidence, LanePayload, QueryContext};
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// What a simulated call produces once its latency has elapsed
#[derive(Debug, Clone)]
pub enum Scripted {
    Evidence(Vec<Evidence>),
    Answer(String),
    Payload(LanePayload),
    Fail(BackendError),
    /// Panics inside the backend (exercises the executor's error boundary)
    Panic(String),
}

/// Backend with a fixed latency and a scripted sequence of outcomes.
///
/// Each call consumes the next scripted outcome; the last one repeats.
pub struct SimulatedBackend {
    spec: ProviderSpec,
    latency: Duration,
    script: Mutex<Vec<Scripted>>,
    calls: AtomicUsize,
}

impl SimulatedBackend {
    pub fn new(spec: ProviderSpec, latency: Duration, outcome: Scripted) -> Self {
        Self::with_sequence(spec, latency, vec![outcome])
    }

    pub fn with_sequence(spec: ProviderSpec, latency: Duration, mut outcomes: Vec<Scripted>) -> Self {
        // Stored reversed so `pop` yields the next outcome
        outcomes.reverse();
        Self {
            spec,
            latency,
            script: Mutex::new(outcomes),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of times `call` has been invoked
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> Scripted {
        let Ok(mut script) = self.script.lock() else {
            return Scripted::Fail(BackendError::Other("script lock poisoned".into()));
        };
        if script.len() > 1 {
            script.pop().unwrap_or(Scripted::Evidence(Vec::new()))
        } else {
            script
                .last()
                .cloned()
                .unwrap_or(Scripted::Evidence(Vec::new()))
        }
    }
}

#[async_trait]
impl Backend for SimulatedBackend {
    fn spec(&self) -> &ProviderSpec {
        &self.spec
    }

    async fn call(
        &self,
        ctx: &CallContext,
        _query: &QueryContext,
    ) -> Result<LanePayload, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self.next_outcome();

        tokio::select! {
            _ = tokio::time::sleep(self.latency) => {}
            _ = ctx.cancel.cancelled() => return Err(BackendError::Cancelled),
        }

        match outcome {
            Scripted::Evidence(items) => Ok(LanePayload::evidence(items)),
            Scripted::Answer(text) => Ok(LanePayload::answer(text)),
            Scripted::Payload(payload) => Ok(payload),
            Scripted::Fail(err) => Err(err),
            Scripted::Panic(msg) => panic!("{msg}"),
        }
    }
}
