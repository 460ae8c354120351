//! Throttling strategy selection from remaining-quota ratios.
//!
//! The continuous "how much quota is left" signal is banded into four
//! discrete postures so the orchestrator stays simple and testable. The
//! bands are deliberately wide: they act as hysteresis so the client does
//! not flap on every unit change in remaining quota.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::QuotaState;

/// Pre-call delay per strategy.
pub const AGGRESSIVE_DELAY: Duration = Duration::ZERO;
pub const MODERATE_DELAY: Duration = Duration::from_millis(100);
pub const CONSERVATIVE_DELAY: Duration = Duration::from_millis(500);
pub const CRITICAL_DELAY: Duration = Duration::from_millis(2000);

/// Discrete throttling posture, ordered from most to least generous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdaptiveStrategy {
    /// Plenty of quota left; no delay.
    Aggressive,
    /// Window past one third used; small damping delay.
    Moderate,
    /// Window nearly spent; significant delay.
    Conservative,
    /// Window effectively exhausted; long delay, callers should defer.
    Critical,
}

/// Per-strategy behavior knobs handed back to the orchestrator and caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptiveConfig {
    /// Delay applied before the upstream call is issued.
    pub delay: Duration,
    /// When true the caller should skip its own pre-check and take a
    /// degraded/deferred path rather than attempt the call normally.
    pub skip_precheck: bool,
}

impl AdaptiveConfig {
    /// Static lookup of the config for a strategy.
    pub fn for_strategy(strategy: AdaptiveStrategy) -> Self {
        match strategy {
            AdaptiveStrategy::Aggressive => Self {
                delay: AGGRESSIVE_DELAY,
                skip_precheck: false,
            },
            AdaptiveStrategy::Moderate => Self {
                delay: MODERATE_DELAY,
                skip_precheck: false,
            },
            AdaptiveStrategy::Conservative => Self {
                delay: CONSERVATIVE_DELAY,
                skip_precheck: false,
            },
            AdaptiveStrategy::Critical => Self {
                delay: CRITICAL_DELAY,
                skip_precheck: true,
            },
        }
    }
}

/// Remaining-ratio boundaries between the strategy bands.
///
/// Injectable so deployments (and tests) can tune them; the defaults give
/// the 0.7 / 0.3 / 0.1 bands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrategyThresholds {
    /// Above this min-ratio the client runs aggressive (no delay).
    pub aggressive_above: f64,
    /// Above this min-ratio (and at or below aggressive) it runs moderate.
    pub moderate_above: f64,
    /// Above this min-ratio (and at or below moderate) it runs
    /// conservative; at or below it is critical.
    pub conservative_above: f64,
}

impl Default for StrategyThresholds {
    fn default() -> Self {
        Self {
            aggressive_above: 0.7,
            moderate_above: 0.3,
            conservative_above: 0.1,
        }
    }
}

/// Map the current shared state to a strategy.
///
/// Takes the *minimum* of the request and token ratios, so the scarcer
/// resource dimension drives the posture.
pub fn select_strategy(state: &QuotaState, thresholds: &StrategyThresholds) -> AdaptiveStrategy {
    let min_ratio = state.requests_ratio().min(state.tokens_ratio());
    if min_ratio > thresholds.aggressive_above {
        AdaptiveStrategy::Aggressive
    } else if min_ratio > thresholds.moderate_above {
        AdaptiveStrategy::Moderate
    } else if min_ratio > thresholds.conservative_above {
        AdaptiveStrategy::Conservative
    } else {
        AdaptiveStrategy::Critical
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuotaDefaults;

    /// State with the given remaining counts over a 1000/100000 window.
    fn state_with(requests_remaining: u64, tokens_remaining: u64) -> QuotaState {
        let mut state = QuotaState::fresh(&QuotaDefaults {
            requests_limit: 1000,
            tokens_limit: 100_000,
        });
        state.requests_remaining = requests_remaining;
        state.tokens_remaining = tokens_remaining;
        state
    }

    fn strategy_for_ratio(ratio: f64) -> AdaptiveStrategy {
        // Both dimensions at the same ratio so min() is exact.
        let state = state_with((ratio * 1000.0).round() as u64, (ratio * 100_000.0) as u64);
        select_strategy(&state, &StrategyThresholds::default())
    }

    #[test]
    fn test_band_boundaries() {
        assert_eq!(strategy_for_ratio(0.71), AdaptiveStrategy::Aggressive);
        assert_eq!(strategy_for_ratio(0.7), AdaptiveStrategy::Moderate);
        assert_eq!(strategy_for_ratio(0.31), AdaptiveStrategy::Moderate);
        assert_eq!(strategy_for_ratio(0.3), AdaptiveStrategy::Conservative);
        assert_eq!(strategy_for_ratio(0.11), AdaptiveStrategy::Conservative);
        assert_eq!(strategy_for_ratio(0.1), AdaptiveStrategy::Critical);
        assert_eq!(strategy_for_ratio(0.0), AdaptiveStrategy::Critical);
        assert_eq!(strategy_for_ratio(1.0), AdaptiveStrategy::Aggressive);
    }

    #[test]
    fn test_min_ratio_drives_selection() {
        // Requests nearly full but tokens nearly empty: tokens win.
        let state = state_with(990, 5_000);
        assert_eq!(
            select_strategy(&state, &StrategyThresholds::default()),
            AdaptiveStrategy::Critical
        );
        // And the mirror case.
        let state = state_with(40, 95_000);
        assert_eq!(
            select_strategy(&state, &StrategyThresholds::default()),
            AdaptiveStrategy::Critical
        );
    }

    #[test]
    fn test_generosity_monotonic_as_ratio_decreases() {
        // Sweep ratio pairs; the selected strategy must never get more
        // generous as the minimum ratio shrinks.
        let steps: Vec<f64> = (0..=100).map(|i| i as f64 / 100.0).collect();
        for &a in &steps {
            let mut previous: Option<AdaptiveStrategy> = None;
            // Walk the second dimension downward with the first fixed.
            for &b in steps.iter().rev() {
                let state = state_with((a * 1000.0) as u64, (b * 100_000.0) as u64);
                let strategy = select_strategy(&state, &StrategyThresholds::default());
                if let Some(prev) = previous {
                    assert!(
                        strategy >= prev,
                        "strategy got more generous as ratio dropped: {prev:?} -> {strategy:?} at a={a} b={b}"
                    );
                }
                previous = Some(strategy);
            }
        }
    }

    #[test]
    fn test_config_lookup_table() {
        let aggressive = AdaptiveConfig::for_strategy(AdaptiveStrategy::Aggressive);
        assert_eq!(aggressive.delay, Duration::ZERO);
        assert!(!aggressive.skip_precheck);

        let moderate = AdaptiveConfig::for_strategy(AdaptiveStrategy::Moderate);
        assert_eq!(moderate.delay, Duration::from_millis(100));
        assert!(!moderate.skip_precheck);

        let conservative = AdaptiveConfig::for_strategy(AdaptiveStrategy::Conservative);
        assert_eq!(conservative.delay, Duration::from_millis(500));
        assert!(
            !conservative.skip_precheck,
            "only critical forces the degraded path"
        );

        let critical = AdaptiveConfig::for_strategy(AdaptiveStrategy::Critical);
        assert_eq!(critical.delay, Duration::from_millis(2000));
        assert!(critical.skip_precheck);
    }

    #[test]
    fn test_scenario_healthy_window_is_aggressive() {
        let mut state = QuotaState::fresh(&QuotaDefaults::default());
        state.requests_limit = 60;
        state.requests_remaining = 58;
        state.tokens_limit = 100_000;
        state.tokens_remaining = 95_000;
        let strategy = select_strategy(&state, &StrategyThresholds::default());
        assert_eq!(strategy, AdaptiveStrategy::Aggressive);
        assert_eq!(
            AdaptiveConfig::for_strategy(strategy).delay,
            Duration::ZERO
        );
    }

    #[test]
    fn test_serde_names() {
        let encoded = serde_json::to_string(&AdaptiveStrategy::Critical).unwrap();
        assert_eq!(encoded, "\"critical\"");
        let decoded: AdaptiveStrategy = serde_json::from_str("\"moderate\"").unwrap();
        assert_eq!(decoded, AdaptiveStrategy::Moderate);
    }
}
