// src/degradation.rs
// Graceful degradation: typed lane errors and LLM-free fallback answers

use crate::error::{ErrorKind, LaneError};
use crate::types::{
    Citation, DegradationLevel, LaneName, LaneResult, LaneResults, ProviderId, QueryClass,
    QueryContext,
};
use std::fmt::Write;
use std::time::Duration;
use tracing::{debug, warn};

/// Longest snippet quoted in a fallback answer, in characters
const MAX_SNIPPET_CHARS: usize = 280;

/// Builds labelled answers when the LLM lane cannot supply one, and converts
/// every lane error into a `LaneResult`.
///
/// Never performs I/O: fallback synthesis is plain string templating so it
/// cannot threaten the request budget.
#[derive(Debug, Clone)]
pub struct GracefulDegradationManager {
    /// How many evidence snippets a fallback answer quotes
    fallback_snippets: usize,
}

impl Default for GracefulDegradationManager {
    fn default() -> Self {
        Self::new(3)
    }
}

impl GracefulDegradationManager {
    pub fn new(fallback_snippets: usize) -> Self {
        Self {
            fallback_snippets: fallback_snippets.max(1),
        }
    }

    /// Error boundary for the lane executor: every failure becomes a typed result
    pub fn handle_lane_error(
        &self,
        lane: LaneName,
        provider: Option<ProviderId>,
        error: LaneError,
        latency: Duration,
    ) -> LaneResult {
        match &error {
            LaneError::Panicked(msg) => {
                warn!(lane = %lane, provider = ?provider, panic = %msg, "Backend panicked")
            }
            other => debug!(lane = %lane, provider = ?provider, error = %other, "Lane attempt failed"),
        }

        match error {
            LaneError::Timeout => LaneResult::Timeout { provider, latency },
            other => {
                let reason = match (&other, &provider) {
                    (LaneError::CircuitOpen, Some(p)) => format!("circuit open for {p}"),
                    _ => other.to_string(),
                };
                LaneResult::failure(other.kind(), provider, latency, reason)
            }
        }
    }

    /// Answer built purely from retrieved evidence, labelled as degraded and
    /// carrying the trace id
    pub fn synthesize_fallback(
        &self,
        query: &QueryContext,
        evidence: &[Citation],
        level: DegradationLevel,
        failure_reason: &str,
    ) -> String {
        let mut out = format!("[Degraded mode: {}] ", level_label(level));
        let technical = query.class == QueryClass::Technical;
        let quoted: Vec<&Citation> = evidence.iter().take(self.fallback_snippets).collect();

        if quoted.is_empty() {
            if technical {
                let _ = write!(
                    out,
                    "No documentation, code or reference sources responded for \"{}\" ({}). \
                     Retry shortly, or check the upstream service status.",
                    query.query, failure_reason
                );
            } else {
                let _ = write!(
                    out,
                    "I can't answer \"{}\" right now because none of my knowledge sources \
                     responded ({}). Please try again in a moment.",
                    query.query, failure_reason
                );
            }
        } else {
            if technical {
                let _ = write!(
                    out,
                    "The answer service is unavailable ({}). The most relevant technical \
                     references for \"{}\" are:\n",
                    failure_reason, query.query
                );
            } else {
                let _ = write!(
                    out,
                    "I couldn't compose a full answer ({}), but here is what my sources say \
                     about \"{}\":\n",
                    failure_reason, query.query
                );
            }
            for c in &quoted {
                let _ = write!(out, "\n[{}] {} ({})", c.id, truncate(&c.snippet), c.source);
            }
            if technical {
                out.push_str("\n\nVerify details against the cited sources before relying on them.");
            }
        }

        let _ = write!(out, "\n\nTrace ID: {}", query.trace_id);
        out
    }

    /// Label an LLM answer produced while some retrieval lanes were missing
    pub fn annotate_partial(&self, answer: &str, results: &LaneResults) -> String {
        let missing: Vec<String> = results
            .iter()
            .filter(|(lane, r)| lane.is_retrieval() && !r.is_success())
            .map(|(lane, r)| {
                let kind = r.error_kind().unwrap_or(ErrorKind::ProviderUnavailable);
                format!("{lane} ({kind})")
            })
            .collect();
        if missing.is_empty() {
            return answer.to_string();
        }
        format!(
            "{}\n\nNote: answered with partial evidence; unavailable sources: {}.",
            answer.trim_end(),
            missing.join(", ")
        )
    }
}

fn level_label(level: DegradationLevel) -> &'static str {
    match level {
        DegradationLevel::Full => "full",
        DegradationLevel::PartialEvidence => "partial evidence",
        DegradationLevel::LlmDegraded => "answer synthesis unavailable",
        DegradationLevel::Emergency => "emergency",
    }
}

fn truncate(s: &str) -> String {
    let s = s.trim();
    if s.chars().count() <= MAX_SNIPPET_CHARS {
        return s.to_string();
    }
    let cut: String = s.chars().take(MAX_SNIPPET_CHARS).collect();
    format!("{}...", cut.trim_end())
}

/// Human-readable summary of failed lanes, e.g. "llm: circuit_open; web: lane_timeout"
pub fn failure_reason(results: &LaneResults) -> String {
    let parts: Vec<String> = results
        .iter()
        .filter_map(|(lane, r)| r.error_kind().map(|k| format!("{lane}: {k}")))
        .collect();
    if parts.is_empty() {
        "no lanes configured".to_string()
    } else {
        parts.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::types::{BudgetTier, LanePayload};

    fn query(class: QueryClass) -> QueryContext {
        QueryContext::new("What is the capital of France?", class, BudgetTier::Fast, "trace-42")
    }

    fn citation(id: usize, snippet: &str) -> Citation {
        Citation {
            id,
            snippet: snippet.into(),
            source: format!("src-{id}"),
            lane: LaneName::Vector,
            confidence: 0.8,
        }
    }

    #[test]
    fn test_emergency_answer_is_never_empty() {
        let mgr = GracefulDegradationManager::default();
        let answer = mgr.synthesize_fallback(
            &query(QueryClass::Simple),
            &[],
            DegradationLevel::Emergency,
            "all lanes timed out",
        );
        assert!(answer.starts_with("[Degraded mode: emergency]"));
        assert!(answer.contains("all lanes timed out"));
        assert!(answer.contains("Trace ID: trace-42"));
    }

    #[test]
    fn test_fallback_quotes_evidence_with_citation_numbers() {
        let mgr = GracefulDegradationManager::new(2);
        let evidence = vec![
            citation(1, "Paris is the capital of France."),
            citation(2, "France's capital city is Paris."),
            citation(3, "Not quoted."),
        ];
        let answer = mgr.synthesize_fallback(
            &query(QueryClass::Simple),
            &evidence,
            DegradationLevel::LlmDegraded,
            "llm: circuit_open",
        );
        assert!(answer.contains("[1] Paris is the capital of France. (src-1)"));
        assert!(answer.contains("[2]"));
        assert!(!answer.contains("Not quoted"));
        assert!(answer.contains("answer synthesis unavailable"));
    }

    #[test]
    fn test_technical_template_differs() {
        let mgr = GracefulDegradationManager::default();
        let evidence = vec![citation(1, "Use tokio::time::timeout.")];
        let general = mgr.synthesize_fallback(
            &query(QueryClass::Simple),
            &evidence,
            DegradationLevel::LlmDegraded,
            "x",
        );
        let technical = mgr.synthesize_fallback(
            &query(QueryClass::Technical),
            &evidence,
            DegradationLevel::LlmDegraded,
            "x",
        );
        assert_ne!(general, technical);
        assert!(technical.contains("technical references"));
        assert!(technical.contains("Verify details"));
    }

    #[test]
    fn test_long_snippets_are_truncated() {
        let long = "a".repeat(MAX_SNIPPET_CHARS + 50);
        assert_eq!(truncate(&long).chars().count(), MAX_SNIPPET_CHARS + 3);
        assert_eq!(truncate("  short  "), "short");
    }

    #[test]
    fn test_handle_lane_error_maps_every_variant() {
        let mgr = GracefulDegradationManager::default();
        let latency = Duration::from_millis(7);
        let p = Some(ProviderId::new("openai"));

        let r = mgr.handle_lane_error(LaneName::Llm, p.clone(), LaneError::Timeout, latency);
        assert!(matches!(r, LaneResult::Timeout { .. }));

        let r = mgr.handle_lane_error(LaneName::Llm, p.clone(), LaneError::CircuitOpen, latency);
        assert_eq!(r.error_kind(), Some(ErrorKind::CircuitOpen));
        assert!(matches!(r, LaneResult::Failure { ref reason, .. } if reason.contains("openai")));

        let r = mgr.handle_lane_error(
            LaneName::Llm,
            p.clone(),
            BackendError::RateLimited("429".into()).into(),
            latency,
        );
        assert_eq!(r.error_kind(), Some(ErrorKind::ProviderUnavailable));

        let r = mgr.handle_lane_error(LaneName::Llm, p, LaneError::Panicked("boom".into()), latency);
        assert_eq!(r.error_kind(), Some(ErrorKind::Internal));
        assert_eq!(r.latency(), latency);
    }

    #[test]
    fn test_annotate_partial_names_missing_lanes() {
        let mgr = GracefulDegradationManager::default();
        let mut results = LaneResults::new();
        results.insert(
            LaneName::Llm,
            LaneResult::Success {
                payload: LanePayload::answer("Paris"),
                provider: ProviderId::new("ollama"),
                latency: Duration::from_millis(900),
            },
        );
        results.insert(
            LaneName::Web,
            LaneResult::Timeout {
                provider: None,
                latency: Duration::from_millis(2500),
            },
        );
        let answer = mgr.annotate_partial("Paris", &results);
        assert!(answer.starts_with("Paris"));
        assert!(answer.contains("web (lane_timeout)"));
        assert_eq!(failure_reason(&results), "web: lane_timeout");
    }
}
