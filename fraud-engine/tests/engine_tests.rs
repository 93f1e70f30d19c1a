//! End-to-end evaluation scenarios against in-process test doubles

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use fraud_engine::collectors::classifier::{Classification, ClassifierFeatures};
use fraud_engine::collectors::{FraudClassifier, StaticGeoLocator};
use fraud_engine::config::GeoNetwork;
use fraud_engine::store::keys;
use fraud_engine::*;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 14, 30, 0).unwrap()
}

fn transaction(id: &str) -> Transaction {
    Transaction {
        transaction_id: id.to_string(),
        user_id: "user-42".to_string(),
        merchant_id: "merchant-7".to_string(),
        amount: dec!(120.00),
        currency: "USD".to_string(),
        instrument: PaymentInstrument::Card {
            bin: "535522".to_string(),
            last4: "0044".to_string(),
            issuing_country: Some("US".to_string()),
        },
        billing_country: Some("US".to_string()),
        origin_ip: "198.51.100.23".parse().unwrap(),
        device: Some(DeviceDescriptor {
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_2) AppleWebKit/605.1.15 Version/17.2 Safari/605.1.15"
                .to_string(),
            screen: Some(ScreenResolution {
                width: 2560,
                height: 1440,
            }),
            timezone: Some("America/Chicago".to_string()),
            language: Some("en-US".to_string()),
            forwarded_for: Vec::new(),
            webrtc_ip: None,
        }),
        behavior: Some(BehaviorDescriptor {
            keystroke_intervals_ms: vec![120, 190, 85, 240, 150, 175],
            navigation: vec![
                "/".to_string(),
                "/search".to_string(),
                "/item/991".to_string(),
                "/checkout".to_string(),
            ],
            pasted_fields: Vec::new(),
            dwell_time_ms: 62_000,
        }),
        created_at: t0(),
    }
}

struct FixedClassifier(f64);

#[async_trait]
impl FraudClassifier for FixedClassifier {
    async fn classify(&self, _features: &ClassifierFeatures) -> Result<Classification> {
        Ok(Classification {
            probability: self.0,
            rationale: None,
        })
    }
}

struct HangingClassifier;

#[async_trait]
impl FraudClassifier for HangingClassifier {
    async fn classify(&self, _features: &ClassifierFeatures) -> Result<Classification> {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        Ok(Classification {
            probability: 0.0,
            rationale: None,
        })
    }
}

struct PanickingClassifier;

#[async_trait]
impl FraudClassifier for PanickingClassifier {
    async fn classify(&self, _features: &ClassifierFeatures) -> Result<Classification> {
        panic!("model crashed")
    }
}

/// Store whose every operation fails
struct UnreachableStore;

#[async_trait]
impl RiskStore for UnreachableStore {
    async fn record_and_count(&self, _: &str, _: &str, _: DateTime<Utc>, _: Duration) -> Result<u64> {
        Err(Error::StoreUnavailable("connection refused".to_string()))
    }

    async fn increment(&self, _: &str, _: DateTime<Utc>, _: Duration) -> Result<u64> {
        Err(Error::StoreUnavailable("connection refused".to_string()))
    }

    async fn counter(&self, _: &str, _: DateTime<Utc>) -> Result<u64> {
        Err(Error::StoreUnavailable("connection refused".to_string()))
    }

    async fn set_if_absent(&self, _: &str, _: String, _: DateTime<Utc>, _: Duration) -> Result<bool> {
        Err(Error::StoreUnavailable("connection refused".to_string()))
    }

    async fn put(&self, _: &str, _: String, _: DateTime<Utc>, _: Option<Duration>) -> Result<()> {
        Err(Error::StoreUnavailable("connection refused".to_string()))
    }

    async fn get(&self, _: &str, _: DateTime<Utc>) -> Result<Option<String>> {
        Err(Error::StoreUnavailable("connection refused".to_string()))
    }
}

fn everywhere(country: &str, anonymizer: bool) -> Arc<StaticGeoLocator> {
    Arc::new(
        StaticGeoLocator::new(&[GeoNetwork {
            cidr: "0.0.0.0/0".to_string(),
            country: country.to_string(),
            anonymizer,
        }])
        .unwrap(),
    )
}

struct Harness {
    engine: FraudEngine,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    alerts: tokio::sync::broadcast::Receiver<SecurityAlert>,
    feedback: Arc<MemoryFeedbackStore>,
}

struct HarnessBuilder {
    config: EngineConfig,
    classifier: Arc<dyn FraudClassifier>,
    geolocator: Arc<StaticGeoLocator>,
    store: Option<Arc<dyn RiskStore>>,
}

impl HarnessBuilder {
    fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            classifier: Arc::new(FixedClassifier(0.05)),
            geolocator: everywhere("US", false),
            store: None,
        }
    }

    fn config(mut self, f: impl FnOnce(&mut EngineConfig)) -> Self {
        f(&mut self.config);
        self
    }

    fn classifier(mut self, classifier: Arc<dyn FraudClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    fn geolocator(mut self, geolocator: Arc<StaticGeoLocator>) -> Self {
        self.geolocator = geolocator;
        self
    }

    fn store(mut self, store: Arc<dyn RiskStore>) -> Self {
        self.store = Some(store);
        self
    }

    fn build(self) -> Harness {
        let memory = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let channel = Arc::new(BroadcastAlertChannel::new(64));
        let alerts = channel.subscribe();
        let feedback = Arc::new(MemoryFeedbackStore::new());

        let deps = EngineDependencies {
            store: self
                .store
                .unwrap_or_else(|| memory.clone() as Arc<dyn RiskStore>),
            classifier: self.classifier,
            geolocator: self.geolocator,
            alerts: channel,
            feedback: feedback.clone(),
            clock: clock.clone(),
        };

        Harness {
            engine: FraudEngine::new(self.config, deps).unwrap(),
            store: memory,
            clock,
            alerts,
            feedback,
        }
    }
}

#[tokio::test]
async fn test_clean_transaction_is_low_risk() {
    let mut h = HarnessBuilder::new().build();
    let tx = transaction("tx-low");

    let assessment = h.engine.evaluate(&tx).await;

    assert_eq!(assessment.risk_level, RiskLevel::Low);
    assert!(!assessment.is_fraudulent);
    assert!(assessment.recommendations.is_empty());
    assert!(assessment.overrides.is_empty());
    assert_eq!(assessment.signals.len(), SignalSource::ALL.len());
    assert!(assessment.signals.iter().all(|s| !s.error));
    assert!((assessment.signal(SignalSource::Ai).unwrap().score - 5.0).abs() < 1e-9);
    assert_eq!(assessment.assessed_at, t0());

    assert!(!h.engine.is_blocked("tx-low").await.unwrap());
    assert!(h.alerts.try_recv().is_err());
}

#[tokio::test]
async fn test_eleventh_transaction_in_window_is_blocked() {
    let h = HarnessBuilder::new()
        .config(|c| c.methods.card.burst_limit = None)
        .build();

    for i in 1..=10 {
        let assessment = h.engine.evaluate(&transaction(&format!("tx-{}", i))).await;
        assert!(!assessment.is_fraudulent, "transaction {} blocked", i);
    }

    let assessment = h.engine.evaluate(&transaction("tx-11")).await;
    assert_eq!(assessment.risk_level, RiskLevel::High);
    assert!(assessment.is_fraudulent);
    assert!(assessment.overrides.contains(&HardOverride::VelocityExceeded {
        count: 11,
        threshold: 10
    }));
    assert!(h.engine.is_blocked("tx-11").await.unwrap());
}

#[tokio::test]
async fn test_window_slides_with_clock() {
    let h = HarnessBuilder::new()
        .config(|c| c.methods.card.burst_limit = None)
        .build();

    for i in 1..=10 {
        h.engine.evaluate(&transaction(&format!("tx-{}", i))).await;
    }
    h.clock.advance(Duration::minutes(61));

    let assessment = h.engine.evaluate(&transaction("tx-11")).await;
    assert!(!assessment.is_fraudulent);
    assert_eq!(
        h.store
            .window_entries(&keys::velocity("user-42"), h.clock.now())
            .len(),
        1
    );
}

#[tokio::test]
async fn test_classifier_timeout_falls_back_within_bound() {
    let h = HarnessBuilder::new()
        .classifier(Arc::new(HangingClassifier))
        .config(|c| c.collectors.ai_timeout_ms = 100)
        .build();

    let started = std::time::Instant::now();
    let assessment = h.engine.evaluate(&transaction("tx-slow")).await;
    let elapsed = started.elapsed();

    let ai = assessment.signal(SignalSource::Ai).unwrap();
    assert!(ai.error);
    assert_eq!(ai.score, 50.0);
    assert!(elapsed < std::time::Duration::from_secs(2), "took {:?}", elapsed);
    // 0.30 * 50 from the fallback, 0.15 * 20 from the burst window
    assert!((assessment.aggregate_score - 18.0).abs() < 1e-9);
    assert_eq!(assessment.risk_level, RiskLevel::Low);
}

#[tokio::test]
async fn test_classifier_panic_is_contained() {
    let h = HarnessBuilder::new()
        .classifier(Arc::new(PanickingClassifier))
        .build();

    let assessment = h.engine.evaluate(&transaction("tx-panic")).await;
    let ai = assessment.signal(SignalSource::Ai).unwrap();
    assert!(ai.error);
    assert_eq!(ai.score, 50.0);
    assert!(assessment.reason.is_none());
}

#[tokio::test]
async fn test_amount_over_card_ceiling_saturates_rule_score() {
    let h = HarnessBuilder::new().build();
    let mut tx = transaction("tx-big");
    tx.amount = dec!(15000);

    let assessment = h.engine.evaluate(&tx).await;

    let rule = assessment.signal(SignalSource::RuleBased).unwrap();
    assert_eq!(rule.score, 100.0);

    let aggregator = RiskAggregator::new(h.engine.config().weights.clone(), 50.0).unwrap();
    let contributions = aggregator.contributions(&assessment.signals);
    let (_, rule_share) = contributions
        .iter()
        .find(|(s, _)| *s == SignalSource::RuleBased)
        .unwrap();
    assert!((rule_share - 20.0).abs() < 1e-9);

    // Above the anomaly ceiling as well
    assert!(assessment.is_fraudulent);
    assert_eq!(assessment.patterns(), vec![FraudPattern::AnomalousAmount]);
}

#[tokio::test]
async fn test_invalid_location_blocks_low_score() {
    let mut h = HarnessBuilder::new().geolocator(everywhere("KP", false)).build();

    let assessment = h.engine.evaluate(&transaction("tx-geo")).await;

    assert!(assessment.aggregate_score < 40.0);
    assert_eq!(assessment.risk_level, RiskLevel::High);
    assert!(assessment.is_fraudulent);
    assert_eq!(
        assessment.overrides,
        vec![HardOverride::LocationInvalid {
            reason: "High-risk country".to_string()
        }]
    );
    assert_eq!(
        assessment.recommendations,
        vec!["Block transaction".to_string(), "Flag account for review".to_string()]
    );

    // Both block side effects happened
    assert!(h.engine.is_blocked("tx-geo").await.unwrap());
    let alert = h.alerts.try_recv().unwrap();
    assert_eq!(alert.transaction_id, "tx-geo");
    assert_eq!(alert.user_id, "user-42");
    assert_eq!(alert.signals, assessment.signals);
    assert_eq!(alert.created_at, t0());
}

#[tokio::test]
async fn test_anonymizer_blocks() {
    let h = HarnessBuilder::new().geolocator(everywhere("NL", true)).build();
    let assessment = h.engine.evaluate(&transaction("tx-vpn")).await;
    assert!(assessment.is_fraudulent);
    assert_eq!(
        assessment.signal(SignalSource::Geolocation).unwrap().reason.as_deref(),
        Some("Anonymization network detected")
    );
}

#[tokio::test]
async fn test_identical_input_and_state_give_identical_assessment() {
    let h = HarnessBuilder::new().build();
    let tx = transaction("tx-replay");

    let first = h.engine.evaluate(&tx).await;
    let second = h.engine.evaluate(&tx).await;

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_unreachable_store_fails_closed() {
    let mut h = HarnessBuilder::new().store(Arc::new(UnreachableStore)).build();

    let assessment = h.engine.evaluate(&transaction("tx-outage")).await;

    assert!(assessment.is_fraudulent);
    assert_eq!(assessment.risk_level, RiskLevel::High);
    let velocity = assessment.signal(SignalSource::Velocity).unwrap();
    assert!(velocity.error);
    assert_eq!(velocity.score, 100.0);
    assert!(assessment.patterns().contains(&FraudPattern::StoreUnavailable));

    // Marker write failed, alert still went out
    assert!(h.alerts.try_recv().is_ok());
    assert!(h.engine.is_blocked("tx-outage").await.is_err());
}

#[tokio::test]
async fn test_repeated_failures_block() {
    let h = HarnessBuilder::new().build();

    for expected in 1..=4 {
        assert_eq!(h.engine.record_failed_attempt("user-42").await.unwrap(), expected);
    }

    let assessment = h.engine.evaluate(&transaction("tx-after-failures")).await;
    assert!(assessment.is_fraudulent);
    assert_eq!(assessment.patterns(), vec![FraudPattern::RepeatedFailures]);
}

#[tokio::test]
async fn test_card_testing_probes_block() {
    let h = HarnessBuilder::new()
        .config(|c| c.methods.card.burst_limit = None)
        .build();

    for i in 1..=5 {
        let mut probe = transaction(&format!("probe-{}", i));
        probe.amount = dec!(1.00);
        assert!(!h.engine.evaluate(&probe).await.is_fraudulent);
    }

    let mut probe = transaction("probe-6");
    probe.amount = dec!(1.00);
    let assessment = h.engine.evaluate(&probe).await;
    assert_eq!(assessment.patterns(), vec![FraudPattern::CardTesting]);
}

#[tokio::test]
async fn test_outcome_round_trip() {
    let h = HarnessBuilder::new().build();
    let tx = transaction("tx-labelled");

    let assessment = h.engine.evaluate(&tx).await;
    h.clock.advance(Duration::days(2));
    h.engine.record_outcome("tx-labelled", true).await.unwrap();

    let records = h.feedback.read_all().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].transaction_id, "tx-labelled");
    assert_eq!(records[0].predicted_fraud, assessment.is_fraudulent);
    assert_eq!(records[0].aggregate_score, assessment.aggregate_score);
    assert!(records[0].actual_fraud);
    assert_eq!(records[0].recorded_at, t0() + Duration::days(2));

    let summary = h.engine.feedback_summary().await.unwrap();
    assert_eq!(summary.false_negatives, 1);

    assert!(matches!(
        h.engine.record_outcome("tx-never-seen", false).await,
        Err(Error::UnknownTransaction(_))
    ));
}

#[tokio::test]
async fn test_verdict_retention_expires() {
    let h = HarnessBuilder::new().build();
    h.engine.evaluate(&transaction("tx-old")).await;
    h.clock.advance(Duration::days(8));

    assert!(matches!(
        h.engine.record_outcome("tx-old", false).await,
        Err(Error::UnknownTransaction(_))
    ));
}

#[tokio::test]
async fn test_cancelled_evaluation_keeps_velocity_entry() {
    let h = HarnessBuilder::new()
        .classifier(Arc::new(HangingClassifier))
        .build();
    let token = CancellationToken::new();

    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            token.cancel();
        })
    };

    let assessment = h
        .engine
        .evaluate_with_cancel(&transaction("tx-cancelled"), token)
        .await;
    canceller.await.unwrap();

    assert!(assessment.is_fraudulent);
    assert_eq!(assessment.reason.as_deref(), Some(EVALUATION_ERROR_REASON));
    let entries = h
        .store
        .window_entries(&keys::velocity("user-42"), h.clock.now());
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].transaction_id, "tx-cancelled");
}

#[tokio::test]
async fn test_malformed_transaction_defaults_to_reject() {
    let h = HarnessBuilder::new().build();
    let mut tx = transaction("tx-bad");
    tx.merchant_id = String::new();

    let assessment = h.engine.evaluate(&tx).await;
    assert!(assessment.is_fraudulent);
    assert_eq!(assessment.aggregate_score, 100.0);
    assert_eq!(assessment.reason.as_deref(), Some(EVALUATION_ERROR_REASON));
}

#[tokio::test]
async fn test_risk_profile_tracks_last_evaluation() {
    let h = HarnessBuilder::new().build();
    assert!(h.engine.risk_profile("user-42").await.unwrap().is_none());

    let mut tx = transaction("tx-profile");
    tx.amount = dec!(12000);
    let assessment = h.engine.evaluate(&tx).await;

    let profile = h.engine.risk_profile("user-42").await.unwrap().unwrap();
    assert_eq!(profile.last_risk_score, assessment.aggregate_score);
    assert_eq!(profile.last_risk_level, RiskLevel::High);
    assert_eq!(profile.last_patterns, vec![FraudPattern::AnomalousAmount]);
    assert_eq!(profile.updated_at, t0());
}

#[tokio::test]
async fn test_block_marker_expires_after_ttl() {
    let h = HarnessBuilder::new().geolocator(everywhere("IR", false)).build();

    h.engine.evaluate(&transaction("tx-ttl")).await;
    assert!(h.engine.is_blocked("tx-ttl").await.unwrap());

    h.clock.advance(Duration::hours(24));
    assert!(!h.engine.is_blocked("tx-ttl").await.unwrap());
}

#[test]
fn test_invalid_weights_refused_at_construction() {
    let mut config = EngineConfig::default();
    config.weights.ai = 0.20;

    let deps = EngineDependencies {
        store: Arc::new(MemoryStore::new()),
        classifier: Arc::new(FixedClassifier(0.1)),
        geolocator: everywhere("US", false),
        alerts: Arc::new(TracingAlertChannel),
        feedback: Arc::new(MemoryFeedbackStore::new()),
        clock: Arc::new(SystemClock),
    };

    assert!(matches!(
        FraudEngine::new(config, deps),
        Err(Error::InvalidConfig(_))
    ));
}

#[tokio::test]
async fn test_default_wiring_accepts_clean_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.feedback.path = dir.path().join("feedback.log");

    let deps = EngineDependencies::from_config(&config).unwrap();
    let engine = FraudEngine::new(config, deps).unwrap();

    let mut tx = transaction("tx-default");
    tx.origin_ip = "8.8.8.8".parse().unwrap();
    let assessment = engine.evaluate(&tx).await;

    assert!(!assessment.is_fraudulent, "{:?}", assessment.overrides);
    assert_eq!(assessment.risk_level, RiskLevel::Low);
    assert_eq!(assessment.signal(SignalSource::Geolocation).unwrap().valid, Some(true));
    // No classifier endpoint configured: AI falls back
    assert!(assessment.signal(SignalSource::Ai).unwrap().error);
}

#[tokio::test]
async fn test_rejecting_unresolved_without_networks_refused() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.feedback.path = dir.path().join("feedback.log");
    config.geolocation.reject_unresolved = true;

    assert!(matches!(
        EngineDependencies::from_config(&config),
        Err(Error::InvalidConfig(_))
    ));
}
