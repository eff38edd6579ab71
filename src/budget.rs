// src/budget.rs
// Per-lane and global time budgets

use crate::error::{LanewiseError, Result};
use crate::types::{BudgetTier, LaneName};
use std::collections::BTreeMap;
use std::time::Duration;

/// Lane budgets plus the global budget for one request.
///
/// Lanes run in parallel, so only `max(lane) + reserve <= global` is enforced;
/// the sum of lane budgets may exceed the global budget.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetProfile {
    tier: BudgetTier,
    lanes: BTreeMap<LaneName, Duration>,
    global: Duration,
    reserve: Duration,
}

impl BudgetProfile {
    pub fn new(
        tier: BudgetTier,
        lanes: BTreeMap<LaneName, Duration>,
        global: Duration,
        reserve: Duration,
    ) -> Result<Self> {
        let profile = Self {
            tier,
            lanes,
            global,
            reserve,
        };
        profile.validate()?;
        Ok(profile)
    }

    fn validate(&self) -> Result<()> {
        if self.global.is_zero() {
            return Err(LanewiseError::Config(format!(
                "{} budget: global budget must be positive",
                self.tier
            )));
        }
        if let Some((lane, budget)) = self.lanes.iter().find(|(_, d)| d.is_zero()) {
            return Err(LanewiseError::Config(format!(
                "{} budget: lane {} has a zero budget ({:?})",
                self.tier, lane, budget
            )));
        }
        let longest = self.longest_lane();
        if longest + self.reserve > self.global {
            return Err(LanewiseError::Config(format!(
                "{} budget: longest lane ({}ms) + reserve ({}ms) exceeds global budget ({}ms)",
                self.tier,
                longest.as_millis(),
                self.reserve.as_millis(),
                self.global.as_millis()
            )));
        }
        Ok(())
    }

    pub fn tier(&self) -> BudgetTier {
        self.tier
    }

    pub fn global(&self) -> Duration {
        self.global
    }

    /// Time kept back for aggregation and synthesis after lanes return
    pub fn reserve(&self) -> Duration {
        self.reserve
    }

    /// Budget for a lane, `None` when the lane is not configured for this tier
    pub fn lane(&self, lane: LaneName) -> Option<Duration> {
        self.lanes.get(&lane).copied()
    }

    pub fn lanes(&self) -> impl Iterator<Item = (LaneName, Duration)> + '_ {
        self.lanes.iter().map(|(l, d)| (*l, *d))
    }

    pub fn longest_lane(&self) -> Duration {
        self.lanes.values().copied().max().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lanes(pairs: &[(LaneName, u64)]) -> BTreeMap<LaneName, Duration> {
        pairs
            .iter()
            .map(|(l, ms)| (*l, Duration::from_millis(*ms)))
            .collect()
    }

    #[test]
    fn test_sum_of_lanes_may_exceed_global() {
        let profile = BudgetProfile::new(
            BudgetTier::Standard,
            lanes(&[
                (LaneName::Vector, 2000),
                (LaneName::KnowledgeGraph, 1500),
                (LaneName::Web, 2500),
                (LaneName::Llm, 2500),
            ]),
            Duration::from_millis(3000),
            Duration::from_millis(300),
        )
        .unwrap();
        assert_eq!(profile.longest_lane(), Duration::from_millis(2500));
        assert_eq!(profile.lane(LaneName::Vector), Some(Duration::from_millis(2000)));
    }

    #[test]
    fn test_longest_lane_plus_reserve_must_fit() {
        let err = BudgetProfile::new(
            BudgetTier::Fast,
            lanes(&[(LaneName::Llm, 2900)]),
            Duration::from_millis(3000),
            Duration::from_millis(300),
        )
        .unwrap_err();
        assert!(err.to_string().contains("exceeds global budget"));
    }

    #[test]
    fn test_zero_lane_budget_rejected() {
        let err = BudgetProfile::new(
            BudgetTier::Fast,
            lanes(&[(LaneName::Web, 0)]),
            Duration::from_millis(1000),
            Duration::from_millis(100),
        )
        .unwrap_err();
        assert!(err.to_string().contains("zero budget"));
    }

    #[test]
    fn test_unconfigured_lane_has_no_budget() {
        let profile = BudgetProfile::new(
            BudgetTier::Fast,
            lanes(&[(LaneName::Vector, 500)]),
            Duration::from_millis(1000),
            Duration::from_millis(100),
        )
        .unwrap();
        assert_eq!(profile.lane(LaneName::Web), None);
    }
}
