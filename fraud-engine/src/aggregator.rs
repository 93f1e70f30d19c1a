//! Weighted aggregation of signal scores

use crate::config::SignalWeights;
use crate::types::{clamp_score, SignalScore, SignalSource};
use crate::{Error, Result};

/// Combines per-source scores into one aggregate in [0, 100].
///
/// Weights are never renormalized: a source without a score contributes the
/// fallback value at its full weight.
#[derive(Debug, Clone)]
pub struct RiskAggregator {
    weights: SignalWeights,
    fallback_score: f64,
}

impl RiskAggregator {
    /// Create aggregator; refuses weights that do not sum to 1.0
    pub fn new(weights: SignalWeights, fallback_score: f64) -> Result<Self> {
        weights.validate()?;
        if !fallback_score.is_finite() || !(0.0..=100.0).contains(&fallback_score) {
            return Err(Error::InvalidConfig(format!(
                "fallback score must be in [0, 100], got {}",
                fallback_score
            )));
        }
        Ok(Self {
            weights,
            fallback_score,
        })
    }

    /// Weights in use
    pub fn weights(&self) -> &SignalWeights {
        &self.weights
    }

    /// Weighted contribution of every source, in aggregation order
    pub fn contributions(&self, signals: &[SignalScore]) -> Vec<(SignalSource, f64)> {
        SignalSource::ALL
            .iter()
            .map(|source| {
                let score = signals
                    .iter()
                    .find(|s| s.source == *source)
                    .map_or(self.fallback_score, |s| clamp_score(s.score));
                (*source, self.weights.weight(*source) * score)
            })
            .collect()
    }

    /// Aggregate score. The first score per source counts.
    pub fn aggregate(&self, signals: &[SignalScore]) -> f64 {
        let total: f64 = self.contributions(signals).iter().map(|(_, c)| c).sum();
        clamp_score(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all(score: f64) -> Vec<SignalScore> {
        SignalSource::ALL
            .iter()
            .map(|s| SignalScore::new(*s, score))
            .collect()
    }

    #[test]
    fn test_uniform_scores_aggregate_to_same_value() {
        let agg = RiskAggregator::new(SignalWeights::default(), 50.0).unwrap();
        assert!((agg.aggregate(&all(0.0))).abs() < 1e-9);
        assert!((agg.aggregate(&all(100.0)) - 100.0).abs() < 1e-9);
        assert!((agg.aggregate(&all(42.0)) - 42.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_source_uses_fallback_without_renormalizing() {
        let agg = RiskAggregator::new(SignalWeights::default(), 50.0).unwrap();
        let signals: Vec<SignalScore> = all(0.0)
            .into_iter()
            .filter(|s| s.source != SignalSource::Ai)
            .collect();
        // 0.30 * 50
        assert!((agg.aggregate(&signals) - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_example() {
        let agg = RiskAggregator::new(SignalWeights::default(), 50.0).unwrap();
        let signals = vec![
            SignalScore::new(SignalSource::RuleBased, 100.0),
            SignalScore::new(SignalSource::Ai, 50.0),
            SignalScore::new(SignalSource::Behavioral, 0.0),
            SignalScore::new(SignalSource::Device, 0.0),
            SignalScore::new(SignalSource::Velocity, 10.0),
            SignalScore::new(SignalSource::Geolocation, 0.0),
        ];
        // 20 + 15 + 0 + 0 + 1.5
        assert!((agg.aggregate(&signals) - 36.5).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_source_counts_once() {
        let agg = RiskAggregator::new(SignalWeights::default(), 0.0).unwrap();
        let mut signals = all(0.0);
        signals.push(SignalScore::new(SignalSource::Ai, 100.0));
        assert!(agg.aggregate(&signals).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_weights_refused() {
        let mut weights = SignalWeights::default();
        weights.device = 0.5;
        assert!(matches!(
            RiskAggregator::new(weights, 50.0),
            Err(Error::InvalidConfig(_))
        ));
    }
}
