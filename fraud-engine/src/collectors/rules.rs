//! Static per-payment-method rules

use super::{SignalCollector, SignalContext};
use crate::config::MethodPolicies;
use crate::types::{PaymentInstrument, SignalScore, SignalSource};
use crate::Result;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::json;

/// Rule that fired for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleHit {
    /// Amount approaches or exceeds the method ceiling
    Amount,
    /// Burst window of the method exceeded
    Burst,
    /// Instrument country differs from the billing country
    LocationMismatch,
    /// Instrument details are malformed
    InvalidInstrument,
    /// Source address belongs to a known mixer
    MixerAddress,
}

impl RuleHit {
    fn as_str(&self) -> &'static str {
        match self {
            RuleHit::Amount => "amount",
            RuleHit::Burst => "burst",
            RuleHit::LocationMismatch => "location_mismatch",
            RuleHit::InvalidInstrument => "invalid_instrument",
            RuleHit::MixerAddress => "mixer_address",
        }
    }
}

/// Rule-based evaluator
///
/// Each rule yields a component score; the signal is the strongest
/// component, so one saturated rule saturates the signal.
pub struct RuleBasedEvaluator {
    mixers: Vec<String>,
}

impl RuleBasedEvaluator {
    /// Create evaluator from the method table
    pub fn new(policies: &MethodPolicies) -> Self {
        Self {
            mixers: policies
                .known_mixer_addresses
                .iter()
                .map(|a| a.to_ascii_lowercase())
                .collect(),
        }
    }

    /// Score a transaction synchronously
    pub fn score(&self, ctx: &SignalContext<'_>) -> SignalScore {
        let tx = ctx.transaction;
        let policy = ctx.policy;
        let mut components: Vec<(RuleHit, f64)> = Vec::new();

        if let Some(ceiling) = policy.amount_ceiling {
            let score = amount_score(tx.amount, ceiling);
            if score > 0.0 {
                components.push((RuleHit::Amount, score));
            }
        }

        if ctx.velocity.burst.as_ref().map_or(false, |b| b.exceeded) {
            components.push((RuleHit::Burst, 100.0));
        }

        if policy.location_mismatch_check && location_mismatch(&tx.instrument, tx.billing_country.as_deref()) {
            components.push((RuleHit::LocationMismatch, 100.0));
        }

        if policy.instrument_validation && !instrument_is_well_formed(&tx.instrument) {
            components.push((RuleHit::InvalidInstrument, 100.0));
        }

        if policy.chain_analysis {
            if let PaymentInstrument::Crypto { address, .. } = &tx.instrument {
                if self.mixers.contains(&address.to_ascii_lowercase()) {
                    components.push((RuleHit::MixerAddress, 100.0));
                }
            }
        }

        let score = components.iter().map(|(_, s)| *s).fold(0.0, f64::max);
        let hits: Vec<&str> = components.iter().map(|(h, _)| h.as_str()).collect();

        let signal = SignalScore::new(SignalSource::RuleBased, score).with_details(json!({
            "method": ctx.class,
            "rules": hits,
        }));
        if hits.is_empty() {
            signal
        } else {
            signal.with_reason(hits.join(", "))
        }
    }
}

#[async_trait]
impl SignalCollector for RuleBasedEvaluator {
    fn source(&self) -> SignalSource {
        SignalSource::RuleBased
    }

    async fn collect(&self, ctx: &SignalContext<'_>) -> Result<SignalScore> {
        Ok(self.score(ctx))
    }
}

/// 0 up to half the ceiling, rising linearly to 100 at the ceiling
fn amount_score(amount: Decimal, ceiling: Decimal) -> f64 {
    if ceiling <= Decimal::ZERO {
        return 100.0;
    }
    let ratio = amount
        .checked_div(ceiling)
        .and_then(|r| r.to_f64())
        .unwrap_or(f64::MAX);
    if ratio <= 0.5 {
        0.0
    } else if ratio >= 1.0 {
        100.0
    } else {
        (ratio - 0.5) * 200.0
    }
}

fn location_mismatch(instrument: &PaymentInstrument, billing_country: Option<&str>) -> bool {
    match (instrument, billing_country) {
        (
            PaymentInstrument::Card {
                issuing_country: Some(issuing),
                ..
            },
            Some(billing),
        ) => !issuing.eq_ignore_ascii_case(billing),
        _ => false,
    }
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn instrument_is_well_formed(instrument: &PaymentInstrument) -> bool {
    match instrument {
        PaymentInstrument::Card { bin, last4, .. } => {
            (6..=8).contains(&bin.len())
                && all_digits(bin)
                && matches!(bin.as_bytes()[0], b'2'..=b'6')
                && last4.len() == 4
                && all_digits(last4)
        }
        PaymentInstrument::MobileMoney { msisdn, provider } => {
            let digits = msisdn.strip_prefix('+').unwrap_or("");
            (8..=15).contains(&digits.len()) && all_digits(digits) && !provider.trim().is_empty()
        }
        PaymentInstrument::Crypto { address, .. } => {
            (26..=90).contains(&address.len()) && address.bytes().all(|b| b.is_ascii_alphanumeric())
        }
    }
}
