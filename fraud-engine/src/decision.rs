//! Risk classification and block decision
//!
//! Hard overrides are applied before the score cutoffs: when one fires the
//! level is HIGH whatever the aggregate.

use crate::config::DecisionConfig;
use crate::types::{HardOverride, RiskAssessment, RiskLevel, SignalScore};
use chrono::{DateTime, Utc};

/// Decision engine
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    config: DecisionConfig,
}

impl DecisionEngine {
    /// Create decision engine
    pub fn new(config: DecisionConfig) -> Self {
        Self { config }
    }

    /// Level for a score, ignoring overrides
    pub fn classify(&self, score: f64) -> RiskLevel {
        if score >= self.config.high_cutoff {
            RiskLevel::High
        } else if score >= self.config.medium_cutoff {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// Recommendations for a level and score
    pub fn recommendations(&self, level: RiskLevel, score: f64) -> Vec<String> {
        let recs: &[&str] = match level {
            RiskLevel::High => &["Block transaction", "Flag account for review"],
            RiskLevel::Medium if score >= self.config.review_cutoff => {
                &["Request additional authentication", "Apply transaction limits"]
            }
            RiskLevel::Medium => &["Monitor account activity"],
            RiskLevel::Low => &[],
        };
        recs.iter().map(|r| r.to_string()).collect()
    }

    /// Build the assessment for a scored transaction
    pub fn decide(
        &self,
        transaction_id: &str,
        aggregate_score: f64,
        signals: Vec<SignalScore>,
        overrides: Vec<HardOverride>,
        assessed_at: DateTime<Utc>,
    ) -> RiskAssessment {
        let (risk_level, reason) = if overrides.is_empty() {
            (self.classify(aggregate_score), None)
        } else {
            let reason = overrides
                .iter()
                .map(HardOverride::describe)
                .collect::<Vec<_>>()
                .join("; ");
            (RiskLevel::High, Some(reason))
        };

        RiskAssessment {
            transaction_id: transaction_id.to_string(),
            aggregate_score,
            risk_level,
            is_fraudulent: risk_level == RiskLevel::High,
            signals,
            recommendations: self.recommendations(risk_level, aggregate_score),
            overrides,
            reason,
            assessed_at,
        }
    }
}
