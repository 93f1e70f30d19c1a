//! Configuration for the fraud engine

use crate::types::{PaymentMethodClass, SignalSource};
use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Tolerance for the weight-sum invariant
pub const WEIGHT_EPSILON: f64 = 1e-6;

/// Grace the AI collector guard allows past `ai_timeout_ms`
pub const AI_GUARD_MARGIN_MS: u64 = 50;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Service name
    pub service_name: String,

    /// Signal weights
    pub weights: SignalWeights,

    /// Score cutoffs
    pub decision: DecisionConfig,

    /// Identity velocity window
    pub velocity: VelocityConfig,

    /// Per payment-method thresholds
    pub methods: MethodPolicies,

    /// Collector timeouts and fallback
    pub collectors: CollectorConfig,

    /// Geolocation check
    pub geolocation: GeoConfig,

    /// Hard pattern thresholds
    pub patterns: PatternConfig,

    /// Block markers and verdict retention
    pub block: BlockConfig,

    /// External classifier
    pub classifier: ClassifierConfig,

    /// Outcome feedback store
    pub feedback: FeedbackConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            service_name: "fraud-engine".to_string(),
            weights: SignalWeights::default(),
            decision: DecisionConfig::default(),
            velocity: VelocityConfig::default(),
            methods: MethodPolicies::default(),
            collectors: CollectorConfig::default(),
            geolocation: GeoConfig::default(),
            patterns: PatternConfig::default(),
            block: BlockConfig::default(),
            classifier: ClassifierConfig::default(),
            feedback: FeedbackConfig::default(),
        }
    }
}

/// Aggregation weights per signal source. Must sum to 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalWeights {
    /// Rule-based evaluator
    pub rule_based: f64,
    /// AI classifier
    pub ai: f64,
    /// Behavioral analyzer
    pub behavioral: f64,
    /// Device fingerprint analyzer
    pub device: f64,
    /// Velocity windows
    pub velocity: f64,
    /// Geolocation checker (acts mostly through its hard override)
    pub geolocation: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        // Inherited defaults; not yet calibrated against labelled outcomes.
        Self {
            rule_based: 0.20,
            ai: 0.30,
            behavioral: 0.20,
            device: 0.15,
            velocity: 0.15,
            geolocation: 0.0,
        }
    }
}

impl SignalWeights {
    /// Weight of a source
    pub fn weight(&self, source: SignalSource) -> f64 {
        match source {
            SignalSource::RuleBased => self.rule_based,
            SignalSource::Ai => self.ai,
            SignalSource::Behavioral => self.behavioral,
            SignalSource::Device => self.device,
            SignalSource::Velocity => self.velocity,
            SignalSource::Geolocation => self.geolocation,
        }
    }

    /// Sum of all weights
    pub fn sum(&self) -> f64 {
        SignalSource::ALL.iter().map(|s| self.weight(*s)).sum()
    }

    /// Check every weight is finite and non-negative and the total is 1.0
    pub fn validate(&self) -> Result<()> {
        for source in SignalSource::ALL {
            let w = self.weight(source);
            if !w.is_finite() || w < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "weight for {} must be a finite non-negative number, got {}",
                    source, w
                )));
            }
        }

        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_EPSILON {
            return Err(Error::InvalidConfig(format!(
                "signal weights must sum to 1.0, got {:.6}",
                sum
            )));
        }
        Ok(())
    }
}

/// Score cutoffs for risk levels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// HIGH at or above
    pub high_cutoff: f64,
    /// MEDIUM at or above
    pub medium_cutoff: f64,
    /// Inside MEDIUM, step-up authentication at or above
    pub review_cutoff: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            high_cutoff: 70.0,
            medium_cutoff: 40.0,
            review_cutoff: 60.0,
        }
    }
}

impl DecisionConfig {
    /// Check 0 <= medium <= review <= high <= 100
    pub fn validate(&self) -> Result<()> {
        let ordered = 0.0 <= self.medium_cutoff
            && self.medium_cutoff <= self.review_cutoff
            && self.review_cutoff <= self.high_cutoff
            && self.high_cutoff <= 100.0;
        if !ordered {
            return Err(Error::InvalidConfig(format!(
                "cutoffs must satisfy 0 <= medium ({}) <= review ({}) <= high ({}) <= 100",
                self.medium_cutoff, self.review_cutoff, self.high_cutoff
            )));
        }
        Ok(())
    }
}

/// Identity velocity window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VelocityConfig {
    /// Sliding window duration (default: 1 hour)
    pub window_secs: u64,

    /// Transactions allowed inside the window
    pub max_transactions: u64,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            window_secs: 3600,
            max_transactions: 10,
        }
    }
}

impl VelocityConfig {
    /// Window as chrono duration
    pub fn window(&self) -> chrono::Duration {
        secs(self.window_secs)
    }
}

/// Static thresholds for one payment-method class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodPolicy {
    /// Burst ceiling per user and merchant; `None` disables the burst window
    pub burst_limit: Option<u64>,

    /// Burst window duration
    pub burst_window_secs: u64,

    /// Amount at which the amount rule saturates
    pub amount_ceiling: Option<Decimal>,

    /// Compare instrument country with billing country
    pub location_mismatch_check: bool,

    /// Validate BIN / wallet number / address format
    pub instrument_validation: bool,

    /// Screen the source address against known mixers
    pub chain_analysis: bool,
}

impl Default for MethodPolicy {
    fn default() -> Self {
        Self::card()
    }
}

impl MethodPolicy {
    /// CARD defaults: 5 per minute, 10000 amount ceiling
    pub fn card() -> Self {
        Self {
            burst_limit: Some(5),
            burst_window_secs: 60,
            amount_ceiling: Some(Decimal::from(10_000)),
            location_mismatch_check: true,
            instrument_validation: true,
            chain_analysis: false,
        }
    }

    /// MOBILE_MONEY defaults: 3 per minute, 5000 amount ceiling
    pub fn mobile_money() -> Self {
        Self {
            burst_limit: Some(3),
            burst_window_secs: 60,
            amount_ceiling: Some(Decimal::from(5_000)),
            location_mismatch_check: false,
            instrument_validation: true,
            chain_analysis: false,
        }
    }

    /// CRYPTO defaults: no fixed ceiling, chain analysis instead
    pub fn crypto() -> Self {
        Self {
            burst_limit: None,
            burst_window_secs: 60,
            amount_ceiling: None,
            location_mismatch_check: false,
            instrument_validation: true,
            chain_analysis: true,
        }
    }

    /// Burst window as chrono duration
    pub fn burst_window(&self) -> chrono::Duration {
        secs(self.burst_window_secs)
    }

    fn validate(&self, class: PaymentMethodClass) -> Result<()> {
        if let Some(ceiling) = self.amount_ceiling {
            if ceiling <= Decimal::ZERO {
                return Err(Error::InvalidConfig(format!(
                    "{} amount ceiling must be positive, got {}",
                    class, ceiling
                )));
            }
        }
        if self.burst_limit == Some(0) {
            return Err(Error::InvalidConfig(format!("{} burst limit must be positive", class)));
        }
        if self.burst_limit.is_some() && self.burst_window_secs == 0 {
            return Err(Error::InvalidConfig(format!("{} burst window must be positive", class)));
        }
        Ok(())
    }
}

/// Method-indexed threshold table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodPolicies {
    /// CARD policy
    pub card: MethodPolicy,
    /// MOBILE_MONEY policy
    pub mobile_money: MethodPolicy,
    /// CRYPTO policy
    pub crypto: MethodPolicy,
    /// Addresses of known mixing services
    pub known_mixer_addresses: Vec<String>,
}

impl Default for MethodPolicies {
    fn default() -> Self {
        Self {
            card: MethodPolicy::card(),
            mobile_money: MethodPolicy::mobile_money(),
            crypto: MethodPolicy::crypto(),
            known_mixer_addresses: Vec::new(),
        }
    }
}

impl MethodPolicies {
    /// Resolve the policy for a class
    pub fn for_class(&self, class: PaymentMethodClass) -> &MethodPolicy {
        match class {
            PaymentMethodClass::Card => &self.card,
            PaymentMethodClass::MobileMoney => &self.mobile_money,
            PaymentMethodClass::Crypto => &self.crypto,
        }
    }
}

/// Collector timeouts and fallback score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Score substituted when a collector fails
    pub fallback_score: f64,

    /// AI classifier timeout (milliseconds)
    pub ai_timeout_ms: u64,

    /// Geolocation lookup timeout (milliseconds)
    pub geo_timeout_ms: u64,

    /// In-process collector timeout (milliseconds)
    pub local_timeout_ms: u64,

    /// Whole-evaluation deadline (milliseconds)
    pub evaluation_deadline_ms: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            fallback_score: 50.0,
            ai_timeout_ms: 2_000,
            geo_timeout_ms: 500,
            local_timeout_ms: 250,
            evaluation_deadline_ms: 5_000,
        }
    }
}

impl CollectorConfig {
    /// AI timeout
    pub fn ai_timeout(&self) -> Duration {
        Duration::from_millis(self.ai_timeout_ms)
    }

    /// Geolocation timeout
    pub fn geo_timeout(&self) -> Duration {
        Duration::from_millis(self.geo_timeout_ms)
    }

    /// Local collector timeout
    pub fn local_timeout(&self) -> Duration {
        Duration::from_millis(self.local_timeout_ms)
    }

    /// Whole-evaluation deadline
    pub fn evaluation_deadline(&self) -> Duration {
        Duration::from_millis(self.evaluation_deadline_ms)
    }

    fn validate(&self) -> Result<()> {
        if !self.fallback_score.is_finite() || !(0.0..=100.0).contains(&self.fallback_score) {
            return Err(Error::InvalidConfig(format!(
                "fallback score must be in [0, 100], got {}",
                self.fallback_score
            )));
        }
        if self.ai_timeout_ms == 0 || self.geo_timeout_ms == 0 || self.local_timeout_ms == 0 {
            return Err(Error::InvalidConfig("collector timeouts must be positive".to_string()));
        }
        let slowest = self
            .ai_timeout_ms
            .saturating_add(AI_GUARD_MARGIN_MS)
            .max(self.geo_timeout_ms)
            .max(self.local_timeout_ms);
        if self.evaluation_deadline_ms <= slowest {
            return Err(Error::InvalidConfig(format!(
                "evaluation deadline ({}ms) must exceed every collector timeout ({}ms)",
                self.evaluation_deadline_ms, slowest
            )));
        }
        Ok(())
    }
}

/// Static network entry for the built-in geolocator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoNetwork {
    /// CIDR block (e.g. "41.58.0.0/16")
    pub cidr: String,
    /// ISO country code
    pub country: String,
    /// Known VPN / proxy / Tor range
    #[serde(default)]
    pub anonymizer: bool,
}

/// Geolocation check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    /// Countries whose traffic fails the location check
    pub high_risk_countries: Vec<String>,

    /// Networks known to the static geolocator
    pub networks: Vec<GeoNetwork>,

    /// Treat an unresolvable IP as an invalid location. Only meaningful with a
    /// populated network table or an external geolocator.
    pub reject_unresolved: bool,

    /// Treat a lookup failure or timeout as an invalid location
    pub fail_closed: bool,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            high_risk_countries: ["IR", "KP", "SY", "CU", "VE", "AF", "MM", "ZW", "SD", "BY"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            networks: Vec::new(),
            reject_unresolved: false,
            fail_closed: false,
        }
    }
}

/// Hard pattern thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// Amounts above this are anomalous
    pub anomalous_amount: Decimal,

    /// Amounts at or below this count as card-testing probes
    pub card_testing_amount: Decimal,

    /// Probes allowed inside the card-testing window
    pub card_testing_max_attempts: u64,

    /// Card-testing window
    pub card_testing_window_secs: u64,

    /// Failed attempts that trigger the override
    pub failed_attempts_threshold: u64,

    /// Lifetime of the failed-attempt counter
    pub failed_attempt_ttl_secs: u64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            anomalous_amount: Decimal::from(10_000),
            card_testing_amount: Decimal::from(5),
            card_testing_max_attempts: 5,
            card_testing_window_secs: 3600,
            failed_attempts_threshold: 4,
            failed_attempt_ttl_secs: 3600,
        }
    }
}

impl PatternConfig {
    /// Card-testing window
    pub fn card_testing_window(&self) -> chrono::Duration {
        secs(self.card_testing_window_secs)
    }

    /// Failed-attempt counter lifetime
    pub fn failed_attempt_ttl(&self) -> chrono::Duration {
        secs(self.failed_attempt_ttl_secs)
    }
}

/// Block markers and verdict retention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockConfig {
    /// Block marker lifetime (default: 24 hours)
    pub marker_ttl_secs: u64,

    /// How long verdicts stay available to `record_outcome`
    pub verdict_retention_secs: u64,

    /// Risk profile lifetime
    pub profile_ttl_secs: u64,

    /// Alert publish timeout (milliseconds)
    pub alert_timeout_ms: u64,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            marker_ttl_secs: 86_400,
            verdict_retention_secs: 7 * 86_400,
            profile_ttl_secs: 30 * 86_400,
            alert_timeout_ms: 500,
        }
    }
}

impl BlockConfig {
    /// Marker lifetime
    pub fn marker_ttl(&self) -> chrono::Duration {
        secs(self.marker_ttl_secs)
    }

    /// Verdict retention
    pub fn verdict_retention(&self) -> chrono::Duration {
        secs(self.verdict_retention_secs)
    }

    /// Profile lifetime
    pub fn profile_ttl(&self) -> chrono::Duration {
        secs(self.profile_ttl_secs)
    }

    /// Alert publish timeout
    pub fn alert_timeout(&self) -> Duration {
        Duration::from_millis(self.alert_timeout_ms)
    }
}

/// External classifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// HTTP endpoint of the classification service
    pub endpoint: Option<String>,

    /// Consecutive failures before the breaker opens
    pub failure_threshold: u32,

    /// Successes in half-open before the breaker closes
    pub recovery_threshold: u32,

    /// Seconds the breaker stays open before half-opening
    pub open_timeout_secs: i64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            failure_threshold: 5,
            recovery_threshold: 2,
            open_timeout_secs: 30,
        }
    }
}

/// Outcome feedback store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// JSON-lines file
    pub path: PathBuf,

    /// Chain records with SHA-256 hashes
    pub hash_chain: bool,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/fraud-feedback.log"),
            hash_chain: true,
        }
    }
}

impl EngineConfig {
    /// Load from TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)
            .map_err(|e| Error::InvalidConfig(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables on top of defaults
    pub fn from_env() -> Result<Self> {
        let mut config = EngineConfig::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `FRAUD_*` environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(endpoint) = std::env::var("FRAUD_CLASSIFIER_ENDPOINT") {
            self.classifier.endpoint = Some(endpoint);
        }

        if let Ok(path) = std::env::var("FRAUD_FEEDBACK_PATH") {
            self.feedback.path = PathBuf::from(path);
        }

        if let Some(ms) = env_number("FRAUD_AI_TIMEOUT_MS")? {
            self.collectors.ai_timeout_ms = ms;
        }

        if let Some(ms) = env_number("FRAUD_EVALUATION_DEADLINE_MS")? {
            self.collectors.evaluation_deadline_ms = ms;
        }

        if let Some(max) = env_number("FRAUD_VELOCITY_THRESHOLD")? {
            self.velocity.max_transactions = max;
        }

        if let Some(window) = env_number("FRAUD_VELOCITY_WINDOW_SECS")? {
            self.velocity.window_secs = window;
        }

        if let Some(ttl) = env_number("FRAUD_BLOCK_TTL_SECS")? {
            self.block.marker_ttl_secs = ttl;
        }

        Ok(())
    }

    /// Validate every section. Called by `FraudEngine::new`.
    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;
        self.decision.validate()?;
        self.collectors.validate()?;

        if self.velocity.window_secs == 0 || self.velocity.max_transactions == 0 {
            return Err(Error::InvalidConfig(
                "velocity window and threshold must be positive".to_string(),
            ));
        }

        self.methods.card.validate(PaymentMethodClass::Card)?;
        self.methods.mobile_money.validate(PaymentMethodClass::MobileMoney)?;
        self.methods.crypto.validate(PaymentMethodClass::Crypto)?;

        if self.block.marker_ttl_secs == 0 {
            return Err(Error::InvalidConfig("block marker TTL must be positive".to_string()));
        }

        if self.patterns.card_testing_window_secs == 0 || self.patterns.failed_attempt_ttl_secs == 0 {
            return Err(Error::InvalidConfig(
                "pattern windows must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_number(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|e| Error::InvalidConfig(format!("{}={:?}: {}", name, raw, e))),
        Err(_) => Ok(None),
    }
}

fn secs(value: u64) -> chrono::Duration {
    let value = i64::try_from(value).unwrap_or(i64::MAX);
    chrono::Duration::try_seconds(value).unwrap_or(chrono::Duration::MAX)
}
