// src/aggregate.rs
// Merge lane results into one ranked, deduplicated citation list

use crate::error::{LanewiseError, Result};
use crate::types::{Citation, DegradationLevel, Evidence, LaneName, LaneResult, LaneResults};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;
use url::Url;

/// Output of one aggregation pass
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub citations: Vec<Citation>,
    pub level: DegradationLevel,
    /// Answer from the LLM lane, when it succeeded with a non-empty answer
    pub answer: Option<String>,
}

struct Candidate<'a> {
    evidence: &'a Evidence,
    lane: LaneName,
    confidence: f32,
}

/// Order-independent merge of lane results
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    lane_priority: Vec<LaneName>,
    max_citations: usize,
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new(LaneName::ALL.to_vec(), 10)
    }
}

impl ResultAggregator {
    /// `lane_priority` lists lanes best first; unlisted lanes rank after the
    /// listed ones in their natural order
    pub fn new(lane_priority: Vec<LaneName>, max_citations: usize) -> Self {
        Self {
            lane_priority,
            max_citations: max_citations.max(1),
        }
    }

    fn rank(&self, lane: LaneName) -> usize {
        self.lane_priority
            .iter()
            .position(|l| *l == lane)
            .unwrap_or(self.lane_priority.len() + lane as usize)
    }

    /// Dedup evidence by normalized source id, keep the most confident copy,
    /// number citations by lane priority then confidence, and derive the
    /// degradation level. Only successful lanes contribute evidence.
    pub fn aggregate(&self, results: &LaneResults) -> Result<Aggregation> {
        let mut best: HashMap<String, Candidate<'_>> = HashMap::new();

        for (lane, result) in results {
            let Some(payload) = result.payload() else {
                continue;
            };
            for evidence in &payload.items {
                if !evidence.confidence.is_finite() {
                    return Err(LanewiseError::Aggregation(format!(
                        "non-finite confidence for {} from lane {}",
                        evidence.source_id, lane
                    )));
                }
                let key = normalize_source_id(&evidence.source_id);
                if key.is_empty() {
                    debug!(lane = %lane, "Dropping evidence without a source id");
                    continue;
                }
                let candidate = Candidate {
                    evidence,
                    lane: *lane,
                    confidence: evidence.confidence.clamp(0.0, 1.0),
                };
                match best.get(&key) {
                    Some(existing) if self.prefer(existing, &candidate) != Ordering::Greater => {}
                    _ => {
                        best.insert(key, candidate);
                    }
                }
            }
        }

        let mut kept: Vec<Candidate<'_>> = best.into_values().collect();
        kept.sort_by(|a, b| {
            self.rank(a.lane)
                .cmp(&self.rank(b.lane))
                .then_with(|| b.confidence.total_cmp(&a.confidence))
                .then_with(|| a.evidence.source_id.cmp(&b.evidence.source_id))
        });
        kept.truncate(self.max_citations);

        let citations = kept
            .into_iter()
            .enumerate()
            .map(|(i, c)| Citation {
                id: i + 1,
                snippet: c.evidence.snippet.clone(),
                source: c.evidence.source_id.clone(),
                lane: c.lane,
                confidence: c.confidence,
            })
            .collect();

        let answer = results
            .get(&LaneName::Llm)
            .and_then(LaneResult::payload)
            .and_then(|p| p.answer.as_deref())
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string);

        Ok(Aggregation {
            citations,
            level: degradation_level(results, answer.is_some()),
            answer,
        })
    }

    /// `Greater` when `challenger` should replace `existing`
    fn prefer(&self, existing: &Candidate<'_>, challenger: &Candidate<'_>) -> Ordering {
        challenger
            .confidence
            .total_cmp(&existing.confidence)
            .then_with(|| self.rank(existing.lane).cmp(&self.rank(challenger.lane)))
            .then_with(|| existing.evidence.snippet.cmp(&challenger.evidence.snippet))
    }
}

/// Worst level triggered across the configured lanes
fn degradation_level(results: &LaneResults, llm_answered: bool) -> DegradationLevel {
    let retrieval: Vec<&LaneResult> = results
        .iter()
        .filter(|(lane, _)| lane.is_retrieval())
        .map(|(_, r)| r)
        .collect();
    let any_retrieval_ok = retrieval.iter().any(|r| r.is_success());
    let all_retrieval_ok = retrieval.iter().all(|r| r.is_success());

    match (llm_answered, any_retrieval_ok) {
        (false, false) => DegradationLevel::Emergency,
        (false, true) => DegradationLevel::LlmDegraded,
        (true, _) if all_retrieval_ok => DegradationLevel::Full,
        (true, _) => DegradationLevel::PartialEvidence,
    }
}

/// Canonical form of a source id used for dedup.
///
/// URLs compare by host (lowercased, without `www.`), port, path without
/// trailing slash, and query; scheme and fragment are ignored. Anything else
/// is lowercased with whitespace collapsed.
pub fn normalize_source_id(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Ok(url) = Url::parse(trimmed) {
        if let Some(host) = url.host_str() {
            let mut key = host.trim_start_matches("www.").to_ascii_lowercase();
            if let Some(port) = url.port() {
                key.push_str(&format!(":{port}"));
            }
            key.push_str(url.path().trim_end_matches('/'));
            if let Some(query) = url.query() {
                key.push('?');
                key.push_str(query);
            }
            return key;
        }
    }
    trimmed
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
