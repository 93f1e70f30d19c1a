//! Behavioral pattern analysis
//!
//! Four sub-scores are averaged: typing cadence, navigation trace, pasted
//! fields and dwell time on the payment page.

use super::{SignalCollector, SignalContext};
use crate::types::{BehaviorDescriptor, SignalScore, SignalSource};
use crate::Result;
use async_trait::async_trait;
use serde_json::json;

/// Score when the client sent no behavioral telemetry
pub const MISSING_BEHAVIOR_SCORE: f64 = 50.0;

const SENSITIVE_FIELDS: &[&str] = &[
    "card_number",
    "cvv",
    "cvc",
    "expiry",
    "account_number",
    "pin",
    "otp",
];

/// Per-aspect behavioral scores
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BehaviorBreakdown {
    /// Keystroke cadence
    pub typing: f64,
    /// Page trace
    pub navigation: f64,
    /// Pasted fields
    pub paste: f64,
    /// Dwell time
    pub dwell: f64,
}

impl BehaviorBreakdown {
    /// Analyze a descriptor
    pub fn analyze(behavior: &BehaviorDescriptor) -> Self {
        Self {
            typing: typing_score(&behavior.keystroke_intervals_ms),
            navigation: navigation_score(&behavior.navigation),
            paste: paste_score(&behavior.pasted_fields),
            dwell: dwell_score(behavior.dwell_time_ms),
        }
    }

    /// Mean of the four aspects
    pub fn mean(&self) -> f64 {
        (self.typing + self.navigation + self.paste + self.dwell) / 4.0
    }
}

fn typing_score(intervals: &[u32]) -> f64 {
    if intervals.is_empty() {
        return 50.0;
    }
    let n = intervals.len() as f64;
    let mean = intervals.iter().map(|i| f64::from(*i)).sum::<f64>() / n;
    let variance = intervals
        .iter()
        .map(|i| (f64::from(*i) - mean).powi(2))
        .sum::<f64>()
        / n;

    if mean < 30.0 {
        100.0
    } else if mean < 60.0 {
        60.0
    } else if intervals.len() >= 5 && variance.sqrt() < 5.0 {
        // Machine-regular cadence
        80.0
    } else {
        0.0
    }
}

fn navigation_score(trace: &[String]) -> f64 {
    match trace.len() {
        0 => 50.0,
        1 => 60.0,
        _ => {
            let mut longest = 1;
            let mut run = 1;
            for pair in trace.windows(2) {
                if pair[0] == pair[1] {
                    run += 1;
                    longest = longest.max(run);
                } else {
                    run = 1;
                }
            }
            if longest >= 3 {
                80.0
            } else {
                0.0
            }
        }
    }
}

fn paste_score(fields: &[String]) -> f64 {
    if fields.is_empty() {
        0.0
    } else if fields
        .iter()
        .any(|f| SENSITIVE_FIELDS.contains(&f.to_ascii_lowercase().as_str()))
    {
        100.0
    } else {
        40.0
    }
}

fn dwell_score(dwell_ms: u64) -> f64 {
    match dwell_ms {
        0..=2_999 => 100.0,
        3_000..=9_999 => 50.0,
        ms if ms > 30 * 60 * 1_000 => 60.0,
        _ => 0.0,
    }
}

/// Behavioral pattern analyzer
#[derive(Debug, Default, Clone, Copy)]
pub struct BehavioralPatternAnalyzer;

impl BehavioralPatternAnalyzer {
    /// Create analyzer
    pub fn new() -> Self {
        Self
    }

    /// Score a descriptor synchronously
    pub fn score(&self, behavior: Option<&BehaviorDescriptor>) -> SignalScore {
        let Some(behavior) = behavior else {
            return SignalScore::new(SignalSource::Behavioral, MISSING_BEHAVIOR_SCORE)
                .with_reason("no behavioral telemetry");
        };

        let breakdown = BehaviorBreakdown::analyze(behavior);
        SignalScore::new(SignalSource::Behavioral, breakdown.mean()).with_details(json!({
            "typing": breakdown.typing,
            "navigation": breakdown.navigation,
            "paste": breakdown.paste,
            "dwell": breakdown.dwell,
        }))
    }
}

#[async_trait]
impl SignalCollector for BehavioralPatternAnalyzer {
    fn source(&self) -> SignalSource {
        SignalSource::Behavioral
    }

    async fn collect(&self, ctx: &SignalContext<'_>) -> Result<SignalScore> {
        Ok(self.score(ctx.transaction.behavior.as_ref()))
    }
}
