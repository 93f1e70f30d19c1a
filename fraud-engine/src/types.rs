//! Core types for fraud engine

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Payment method class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethodClass {
    /// Card payments
    Card,
    /// Mobile money wallets
    MobileMoney,
    /// Crypto transfers
    Crypto,
}

impl PaymentMethodClass {
    /// Stable label used in store keys and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethodClass::Card => "CARD",
            PaymentMethodClass::MobileMoney => "MOBILE_MONEY",
            PaymentMethodClass::Crypto => "CRYPTO",
        }
    }
}

impl fmt::Display for PaymentMethodClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instrument the payment is drawn from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentInstrument {
    /// Card instrument
    Card {
        /// Bank identification number (leading digits)
        bin: String,
        /// Last four digits of the PAN
        last4: String,
        /// ISO country of the issuing bank
        #[serde(default)]
        issuing_country: Option<String>,
    },
    /// Mobile money wallet
    MobileMoney {
        /// Wallet phone number (E.164)
        msisdn: String,
        /// Wallet provider
        provider: String,
    },
    /// Crypto wallet
    Crypto {
        /// Source wallet address
        address: String,
        /// Chain / network name
        network: String,
    },
}

impl PaymentInstrument {
    /// Payment method class of this instrument
    pub fn class(&self) -> PaymentMethodClass {
        match self {
            PaymentInstrument::Card { .. } => PaymentMethodClass::Card,
            PaymentInstrument::MobileMoney { .. } => PaymentMethodClass::MobileMoney,
            PaymentInstrument::Crypto { .. } => PaymentMethodClass::Crypto,
        }
    }
}

/// Screen resolution reported by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenResolution {
    /// Width in CSS pixels
    pub width: u32,
    /// Height in CSS pixels
    pub height: u32,
}

impl fmt::Display for ScreenResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Device descriptor collected by the checkout client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Raw user agent
    pub user_agent: String,

    /// Screen resolution
    #[serde(default)]
    pub screen: Option<ScreenResolution>,

    /// IANA timezone (e.g. "Africa/Lagos")
    #[serde(default)]
    pub timezone: Option<String>,

    /// Browser language (e.g. "en-US")
    #[serde(default)]
    pub language: Option<String>,

    /// Addresses from the X-Forwarded-For chain
    #[serde(default)]
    pub forwarded_for: Vec<IpAddr>,

    /// Address leaked through WebRTC, if the client reported one
    #[serde(default)]
    pub webrtc_ip: Option<IpAddr>,
}

/// Behavioral telemetry captured during checkout
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BehaviorDescriptor {
    /// Intervals between keystrokes in milliseconds
    #[serde(default)]
    pub keystroke_intervals_ms: Vec<u32>,

    /// Ordered page trace leading to the payment
    #[serde(default)]
    pub navigation: Vec<String>,

    /// Form fields filled by paste
    #[serde(default)]
    pub pasted_fields: Vec<String>,

    /// Time spent on the payment page in milliseconds
    pub dwell_time_ms: u64,
}

/// Inbound payment transaction.
///
/// Read-only for the engine: every evaluation stage takes `&Transaction`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction ID
    pub transaction_id: String,

    /// Paying user
    pub user_id: String,

    /// Receiving merchant
    pub merchant_id: String,

    /// Amount in `currency`
    pub amount: Decimal,

    /// ISO 4217 currency code
    pub currency: String,

    /// Payment instrument
    pub instrument: PaymentInstrument,

    /// Customer billing country
    #[serde(default)]
    pub billing_country: Option<String>,

    /// Origin IP of the request
    pub origin_ip: IpAddr,

    /// Device descriptor
    #[serde(default)]
    pub device: Option<DeviceDescriptor>,

    /// Behavioral descriptor
    #[serde(default)]
    pub behavior: Option<BehaviorDescriptor>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Payment method class
    pub fn method_class(&self) -> PaymentMethodClass {
        self.instrument.class()
    }
}

/// Source of a risk signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    /// Static per-method rules
    RuleBased,
    /// External AI classifier
    Ai,
    /// Behavioral pattern analysis
    Behavioral,
    /// Device fingerprint analysis
    Device,
    /// Velocity windows
    Velocity,
    /// Geolocation / anonymization check
    Geolocation,
}

impl SignalSource {
    /// Every source, in aggregation order
    pub const ALL: [SignalSource; 6] = [
        SignalSource::RuleBased,
        SignalSource::Ai,
        SignalSource::Behavioral,
        SignalSource::Device,
        SignalSource::Velocity,
        SignalSource::Geolocation,
    ];

    /// Stable label
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSource::RuleBased => "rule_based",
            SignalSource::Ai => "ai",
            SignalSource::Behavioral => "behavioral",
            SignalSource::Device => "device",
            SignalSource::Velocity => "velocity",
            SignalSource::Geolocation => "geolocation",
        }
    }
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounded score produced by one signal collector for one transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalScore {
    /// Signal source
    pub source: SignalSource,

    /// Score in [0, 100]
    pub score: f64,

    /// Validity verdict for signals that can veto a transaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid: Option<bool>,

    /// True when the score is a fallback substitute
    #[serde(default)]
    pub error: bool,

    /// Short human-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Structured details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl SignalScore {
    /// Create a successful score, clamped to [0, 100]. Non-finite input maps to 100.
    pub fn new(source: SignalSource, score: f64) -> Self {
        Self {
            source,
            score: clamp_score(score),
            valid: None,
            error: false,
            reason: None,
            details: None,
        }
    }

    /// Create a fallback score flagged as an error
    pub fn fallback(source: SignalSource, score: f64, reason: impl Into<String>) -> Self {
        Self {
            source,
            score: clamp_score(score),
            valid: None,
            error: true,
            reason: Some(reason.into()),
            details: None,
        }
    }

    /// Attach structured details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attach a reason
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attach a validity verdict
    pub fn with_validity(mut self, valid: bool) -> Self {
        self.valid = Some(valid);
        self
    }

    /// True when the signal vetoes the transaction
    pub fn is_invalid(&self) -> bool {
        self.valid == Some(false)
    }
}

/// Clamp a score to [0, 100]
pub(crate) fn clamp_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 100.0)
    } else {
        100.0
    }
}

/// Risk level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    /// Low risk
    Low,
    /// Medium risk
    Medium,
    /// High risk
    High,
}

impl RiskLevel {
    /// Stable label
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hard fraud pattern detected for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FraudPattern {
    /// Amount above the anomaly ceiling
    AnomalousAmount,
    /// Burst of small-amount attempts
    CardTesting,
    /// Too many recent failed attempts
    RepeatedFailures,
    /// Pattern state could not be read
    StoreUnavailable,
}

impl FraudPattern {
    /// Stable label
    pub fn as_str(&self) -> &'static str {
        match self {
            FraudPattern::AnomalousAmount => "anomalous_amount",
            FraudPattern::CardTesting => "card_testing",
            FraudPattern::RepeatedFailures => "multiple_failures",
            FraudPattern::StoreUnavailable => "store_unavailable",
        }
    }
}

/// Condition that forces a HIGH / blocked verdict regardless of score
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HardOverride {
    /// Geolocation check failed
    LocationInvalid {
        /// Why the location was rejected
        reason: String,
    },
    /// A non-geolocation signal vetoed the transaction
    SignalInvalid {
        /// Vetoing signal
        source: SignalSource,
        /// Why
        reason: String,
    },
    /// A velocity window was exceeded (or could not be checked)
    VelocityExceeded {
        /// Count observed in the window
        count: u64,
        /// Threshold of the window
        threshold: u64,
    },
    /// Hard pattern match
    PatternMatch {
        /// Matched pattern
        pattern: FraudPattern,
    },
}

impl HardOverride {
    /// Short label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            HardOverride::LocationInvalid { .. } => "location_invalid",
            HardOverride::SignalInvalid { .. } => "signal_invalid",
            HardOverride::VelocityExceeded { .. } => "velocity_exceeded",
            HardOverride::PatternMatch { pattern } => pattern.as_str(),
        }
    }

    /// Human-readable description
    pub fn describe(&self) -> String {
        match self {
            HardOverride::LocationInvalid { reason } => format!("location check failed: {}", reason),
            HardOverride::SignalInvalid { source, reason } => {
                format!("{} signal rejected transaction: {}", source, reason)
            }
            HardOverride::VelocityExceeded { count, threshold } => {
                format!("velocity threshold exceeded: {} > {}", count, threshold)
            }
            HardOverride::PatternMatch { pattern } => format!("fraud pattern matched: {}", pattern.as_str()),
        }
    }
}

/// Reason attached to assessments produced by the fail-safe path
pub const EVALUATION_ERROR_REASON: &str = "evaluation error: defaulting to reject";

/// Risk assessment result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Transaction ID
    pub transaction_id: String,

    /// Aggregate score in [0, 100]
    pub aggregate_score: f64,

    /// Risk level
    pub risk_level: RiskLevel,

    /// Block verdict (`risk_level == HIGH`)
    pub is_fraudulent: bool,

    /// Contributing signal scores
    pub signals: Vec<SignalScore>,

    /// Hard overrides that fired
    pub overrides: Vec<HardOverride>,

    /// Recommendations for the caller
    pub recommendations: Vec<String>,

    /// Explanation when the verdict was forced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Decision timestamp
    pub assessed_at: DateTime<Utc>,
}

impl RiskAssessment {
    /// Maximally conservative assessment used when evaluation fails
    pub fn conservative(
        transaction_id: impl Into<String>,
        reason: impl Into<String>,
        assessed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            aggregate_score: 100.0,
            risk_level: RiskLevel::High,
            is_fraudulent: true,
            signals: Vec::new(),
            overrides: Vec::new(),
            recommendations: vec![
                "Block transaction".to_string(),
                "Flag account for review".to_string(),
            ],
            reason: Some(reason.into()),
            assessed_at,
        }
    }

    /// Find the score for a source
    pub fn signal(&self, source: SignalSource) -> Option<&SignalScore> {
        self.signals.iter().find(|s| s.source == source)
    }

    /// Fraud patterns among the overrides
    pub fn patterns(&self) -> Vec<FraudPattern> {
        self.overrides
            .iter()
            .filter_map(|o| match o {
                HardOverride::PatternMatch { pattern } => Some(*pattern),
                _ => None,
            })
            .collect()
    }
}

/// Entry of an identity's sliding velocity window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VelocityWindowEntry {
    /// Identity key the entry belongs to
    pub identity_key: String,
    /// Transaction reference
    pub transaction_id: String,
    /// When the transaction was recorded
    pub timestamp: DateTime<Utc>,
}

/// Proof that a transaction was rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMarker {
    /// Blocked transaction
    pub transaction_id: String,
    /// When the marker was written
    pub set_at: DateTime<Utc>,
    /// When the marker expires
    pub expires_at: DateTime<Utc>,
}

/// Advisory per-identity risk trend record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    /// Identity (user ID)
    pub identity: String,
    /// Last aggregate score
    pub last_risk_score: f64,
    /// Last risk level
    pub last_risk_level: RiskLevel,
    /// Patterns matched on the last evaluation
    pub last_patterns: Vec<FraudPattern>,
    /// Last update
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_score_is_clamped() {
        assert_eq!(SignalScore::new(SignalSource::Ai, 140.0).score, 100.0);
        assert_eq!(SignalScore::new(SignalSource::Ai, -3.0).score, 0.0);
        assert_eq!(SignalScore::new(SignalSource::Ai, f64::NAN).score, 100.0);
    }

    #[test]
    fn test_fallback_is_flagged() {
        let score = SignalScore::fallback(SignalSource::Ai, 50.0, "timeout");
        assert!(score.error);
        assert_eq!(score.score, 50.0);
        assert_eq!(score.reason.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_instrument_serde_tag() {
        let json = r#"{"method":"MOBILE_MONEY","msisdn":"+254700000000","provider":"mpesa"}"#;
        let instrument: PaymentInstrument = serde_json::from_str(json).unwrap();
        assert_eq!(instrument.class(), PaymentMethodClass::MobileMoney);
    }

    #[test]
    fn test_conservative_assessment() {
        let a = RiskAssessment::conservative("tx-1", EVALUATION_ERROR_REASON, Utc::now());
        assert!(a.is_fraudulent);
        assert_eq!(a.risk_level, RiskLevel::High);
        assert_eq!(a.aggregate_score, 100.0);
    }
}
