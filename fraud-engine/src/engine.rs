//! Fraud engine: evaluation pipeline
//!
//! One evaluation runs in four stages:
//!
//! 1. record the transaction in its velocity windows and scan hard patterns
//! 2. run every signal collector concurrently behind its guard
//! 3. aggregate, apply hard overrides, classify
//! 4. on a block verdict, write the marker and raise the alert
//!
//! Anything that escapes these stages (an error, a panic, the evaluation
//! deadline, cancellation) yields the conservative reject assessment.

use crate::aggregator::RiskAggregator;
use crate::alert::{AlertChannel, TracingAlertChannel};
use crate::clock::{Clock, SystemClock};
use crate::collectors::{
    AiClassifierAdapter, BehavioralPatternAnalyzer, DeviceFingerprintAnalyzer, FraudClassifier,
    GeoLocator, GeolocationChecker, GuardedCollector, HttpClassifier, OfflineClassifier,
    RuleBasedEvaluator, SignalContext, StaticGeoLocator,
};
use crate::config::{EngineConfig, AI_GUARD_MARGIN_MS};
use crate::decision::DecisionEngine;
use crate::feedback::{FeedbackStore, FeedbackSummary, JsonlFeedbackStore, OutcomeRecord};
use crate::metrics::{EVALUATIONS_TOTAL, EVALUATION_DURATION, EVALUATION_FAILURES_TOTAL, OVERRIDES_TOTAL};
use crate::patterns::PatternMatcher;
use crate::sink::BlockSink;
use crate::store::{keys, MemoryStore, RiskStore};
use crate::types::{
    HardOverride, RiskAssessment, RiskLevel, RiskProfile, SignalSource, Transaction,
    EVALUATION_ERROR_REASON,
};
use crate::velocity::VelocityTracker;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Extra time the AI guard grants beyond the adapter's own timeout, so the
/// adapter's timeout fires first and is counted by its circuit breaker.
const AI_GUARD_MARGIN: Duration = Duration::from_millis(AI_GUARD_MARGIN_MS);

/// External capabilities injected into the engine
#[derive(Clone)]
pub struct EngineDependencies {
    /// Shared expiring key-value store
    pub store: Arc<dyn RiskStore>,
    /// AI classifier
    pub classifier: Arc<dyn FraudClassifier>,
    /// IP geolocation
    pub geolocator: Arc<dyn GeoLocator>,
    /// Alert channel
    pub alerts: Arc<dyn AlertChannel>,
    /// Outcome feedback store
    pub feedback: Arc<dyn FeedbackStore>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

impl EngineDependencies {
    /// Standalone wiring from configuration: in-process store, HTTP classifier
    /// when an endpoint is configured, static geolocation table, log alerts and
    /// the JSON-lines feedback log.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        if config.geolocation.reject_unresolved && config.geolocation.networks.is_empty() {
            return Err(Error::InvalidConfig(
                "geolocation.reject_unresolved needs a network table; every address would be rejected"
                    .to_string(),
            ));
        }

        let classifier: Arc<dyn FraudClassifier> = match &config.classifier.endpoint {
            Some(endpoint) => Arc::new(HttpClassifier::new(
                endpoint.clone(),
                config.collectors.ai_timeout(),
            )?),
            None => Arc::new(OfflineClassifier),
        };

        Ok(Self {
            store: Arc::new(MemoryStore::new()),
            classifier,
            geolocator: Arc::new(StaticGeoLocator::new(&config.geolocation.networks)?),
            alerts: Arc::new(TracingAlertChannel),
            feedback: Arc::new(JsonlFeedbackStore::open(&config.feedback)?),
            clock: Arc::new(SystemClock),
        })
    }
}

/// Verdict retained for outcome labelling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredVerdict {
    transaction_id: String,
    user_id: String,
    predicted_fraud: bool,
    risk_level: RiskLevel,
    aggregate_score: f64,
}

/// Fraud engine
pub struct FraudEngine {
    config: EngineConfig,
    store: Arc<dyn RiskStore>,
    clock: Arc<dyn Clock>,
    feedback: Arc<dyn FeedbackStore>,
    velocity: VelocityTracker,
    patterns: PatternMatcher,
    collectors: Vec<GuardedCollector>,
    aggregator: RiskAggregator,
    decision: DecisionEngine,
    sink: BlockSink,
}

impl FraudEngine {
    /// Create engine. Fails fast on an invalid configuration.
    pub fn new(config: EngineConfig, deps: EngineDependencies) -> Result<Self> {
        config.validate()?;

        let aggregator = RiskAggregator::new(config.weights.clone(), config.collectors.fallback_score)?;
        let fallback = config.collectors.fallback_score;
        let local_timeout = config.collectors.local_timeout();

        let ai = AiClassifierAdapter::new(
            deps.classifier.clone(),
            &config.classifier,
            config.collectors.ai_timeout(),
            deps.clock.clone(),
        );

        let collectors = vec![
            GuardedCollector::new(
                Arc::new(RuleBasedEvaluator::new(&config.methods)),
                local_timeout,
                fallback,
            ),
            GuardedCollector::new(
                Arc::new(ai),
                config.collectors.ai_timeout() + AI_GUARD_MARGIN,
                fallback,
            ),
            GuardedCollector::new(Arc::new(BehavioralPatternAnalyzer::new()), local_timeout, fallback),
            GuardedCollector::new(Arc::new(DeviceFingerprintAnalyzer::new()), local_timeout, fallback),
            GuardedCollector::new(
                Arc::new(GeolocationChecker::new(deps.geolocator.clone(), &config.geolocation)),
                config.collectors.geo_timeout(),
                fallback,
            )
            .fail_closed(config.geolocation.fail_closed),
        ];

        info!(
            service = %config.service_name,
            collectors = collectors.len(),
            velocity_threshold = config.velocity.max_transactions,
            "Fraud engine initialized"
        );

        Ok(Self {
            velocity: VelocityTracker::new(deps.store.clone(), config.velocity.clone()),
            patterns: PatternMatcher::new(deps.store.clone(), config.patterns.clone()),
            decision: DecisionEngine::new(config.decision.clone()),
            sink: BlockSink::new(deps.store.clone(), deps.alerts, config.block.clone()),
            store: deps.store,
            clock: deps.clock,
            feedback: deps.feedback,
            collectors,
            aggregator,
            config,
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Evaluate a transaction. Never fails: any failure yields the
    /// conservative reject assessment.
    pub async fn evaluate(&self, transaction: &Transaction) -> RiskAssessment {
        let started = Instant::now();
        let deadline = self.config.collectors.evaluation_deadline();
        let guarded = AssertUnwindSafe(self.try_evaluate(transaction)).catch_unwind();

        let assessment = match tokio::time::timeout(deadline, guarded).await {
            Ok(Ok(Ok(assessment))) => assessment,
            Ok(Ok(Err(e))) => self.fail_safe(transaction, "error", &e.to_string()),
            Ok(Err(_)) => self.fail_safe(transaction, "panic", "evaluation panicked"),
            Err(_) => self.fail_safe(
                transaction,
                "deadline",
                &format!("evaluation exceeded {}ms", deadline.as_millis()),
            ),
        };

        let method = transaction.method_class();
        EVALUATIONS_TOTAL
            .with_label_values(&[assessment.risk_level.as_str(), method.as_str()])
            .inc();
        EVALUATION_DURATION
            .with_label_values(&[method.as_str()])
            .observe(started.elapsed().as_secs_f64());

        assessment
    }

    /// Evaluate unless `cancel` fires first. A cancelled evaluation returns the
    /// conservative assessment; velocity entries already recorded stay.
    pub async fn evaluate_with_cancel(
        &self,
        transaction: &Transaction,
        cancel: CancellationToken,
    ) -> RiskAssessment {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.fail_safe(transaction, "cancelled", &Error::Cancelled.to_string())
            }
            assessment = self.evaluate(transaction) => assessment,
        }
    }

    async fn try_evaluate(&self, tx: &Transaction) -> Result<RiskAssessment> {
        validate_transaction(tx)?;

        let now = self.clock.now();
        let class = tx.method_class();
        let policy = self.config.methods.for_class(class);

        let (velocity, scan) = tokio::join!(
            self.velocity.record(tx, policy, now),
            self.patterns.scan(tx, now),
        );

        let ctx = SignalContext {
            transaction: tx,
            class,
            policy,
            velocity: &velocity,
            recent_failures: scan.recent_failures,
        };

        let mut signals = join_all(self.collectors.iter().map(|c| c.evaluate(&ctx))).await;
        signals.push(velocity.to_signal());

        let aggregate_score = self.aggregator.aggregate(&signals);

        let mut overrides = Vec::new();
        for signal in signals.iter().filter(|s| s.is_invalid()) {
            let reason = signal.reason.clone().unwrap_or_else(|| "invalid".to_string());
            overrides.push(match signal.source {
                SignalSource::Geolocation => HardOverride::LocationInvalid { reason },
                source => HardOverride::SignalInvalid { source, reason },
            });
        }
        overrides.extend(velocity.hard_override());
        overrides.extend(
            scan.patterns
                .iter()
                .map(|pattern| HardOverride::PatternMatch { pattern: *pattern }),
        );
        for o in &overrides {
            OVERRIDES_TOTAL.with_label_values(&[o.label()]).inc();
        }

        let assessment = self
            .decision
            .decide(&tx.transaction_id, aggregate_score, signals, overrides, now);

        if assessment.is_fraudulent {
            warn!(
                transaction_id = %tx.transaction_id,
                user_id = %tx.user_id,
                score = assessment.aggregate_score,
                reason = assessment.reason.as_deref().unwrap_or("score above cutoff"),
                "Blocking fraudulent transaction"
            );
            self.sink.on_fraud(tx, &assessment, now).await;
        } else {
            debug!(
                transaction_id = %tx.transaction_id,
                score = assessment.aggregate_score,
                level = %assessment.risk_level,
                "Transaction evaluated"
            );
        }

        self.retain(tx, &assessment, now).await;
        Ok(assessment)
    }

    fn fail_safe(&self, tx: &Transaction, cause: &str, detail: &str) -> RiskAssessment {
        error!(
            transaction_id = %tx.transaction_id,
            cause,
            detail,
            "Evaluation failed, defaulting to reject"
        );
        EVALUATION_FAILURES_TOTAL.with_label_values(&[cause]).inc();
        RiskAssessment::conservative(&tx.transaction_id, EVALUATION_ERROR_REASON, self.clock.now())
    }

    /// Best-effort write of the verdict and the identity's risk profile
    async fn retain(&self, tx: &Transaction, assessment: &RiskAssessment, now: DateTime<Utc>) {
        let verdict = StoredVerdict {
            transaction_id: tx.transaction_id.clone(),
            user_id: tx.user_id.clone(),
            predicted_fraud: assessment.is_fraudulent,
            risk_level: assessment.risk_level,
            aggregate_score: assessment.aggregate_score,
        };
        let profile = RiskProfile {
            identity: tx.user_id.clone(),
            last_risk_score: assessment.aggregate_score,
            last_risk_level: assessment.risk_level,
            last_patterns: assessment.patterns(),
            updated_at: now,
        };

        let verdict_key = keys::verdict(&tx.transaction_id);
        let profile_key = keys::profile(&tx.user_id);
        let (verdict, profile) = tokio::join!(
            self.put_json(&verdict_key, &verdict, now, self.config.block.verdict_retention()),
            self.put_json(&profile_key, &profile, now, self.config.block.profile_ttl()),
        );
        for result in [verdict, profile] {
            if let Err(e) = result {
                warn!(transaction_id = %tx.transaction_id, error = %e, "Failed to retain evaluation state");
            }
        }
    }

    async fn put_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<()> {
        self.store
            .put(key, serde_json::to_string(value)?, now, Some(ttl))
            .await
    }

    /// Label a past evaluation with its ground truth, looked up by
    /// transaction ID among retained verdicts
    pub async fn record_outcome(&self, transaction_id: &str, actual_fraud: bool) -> Result<()> {
        let now = self.clock.now();
        let raw = self
            .store
            .get(&keys::verdict(transaction_id), now)
            .await?
            .ok_or_else(|| Error::UnknownTransaction(transaction_id.to_string()))?;
        let verdict: StoredVerdict = serde_json::from_str(&raw)?;

        self.feedback
            .append(OutcomeRecord {
                transaction_id: verdict.transaction_id,
                user_id: verdict.user_id,
                predicted_fraud: verdict.predicted_fraud,
                risk_level: verdict.risk_level,
                aggregate_score: verdict.aggregate_score,
                actual_fraud,
                recorded_at: now,
            })
            .await
    }

    /// Label an evaluation the caller still holds
    pub async fn record_outcome_for(
        &self,
        transaction: &Transaction,
        assessment: &RiskAssessment,
        actual_fraud: bool,
    ) -> Result<()> {
        self.feedback
            .append(OutcomeRecord {
                transaction_id: transaction.transaction_id.clone(),
                user_id: transaction.user_id.clone(),
                predicted_fraud: assessment.is_fraudulent,
                risk_level: assessment.risk_level,
                aggregate_score: assessment.aggregate_score,
                actual_fraud,
                recorded_at: self.clock.now(),
            })
            .await
    }

    /// Confusion counts over every recorded outcome. Reads the feedback store;
    /// never called on the evaluation path.
    pub async fn feedback_summary(&self) -> Result<FeedbackSummary> {
        let records = self.feedback.read_all().await?;
        Ok(FeedbackSummary::from_records(&records))
    }

    /// Count a failed payment attempt; returns the attempts inside the counter's lifetime
    pub async fn record_failed_attempt(&self, user_id: &str) -> Result<u64> {
        self.patterns.record_failure(user_id, self.clock.now()).await
    }

    /// True while an unexpired block marker exists for the transaction
    pub async fn is_blocked(&self, transaction_id: &str) -> Result<bool> {
        self.sink.is_blocked(transaction_id, self.clock.now()).await
    }

    /// Advisory risk profile of an identity
    pub async fn risk_profile(&self, user_id: &str) -> Result<Option<RiskProfile>> {
        match self.store.get(&keys::profile(user_id), self.clock.now()).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

fn validate_transaction(tx: &Transaction) -> Result<()> {
    let blank = [
        ("transaction_id", &tx.transaction_id),
        ("user_id", &tx.user_id),
        ("merchant_id", &tx.merchant_id),
    ]
    .into_iter()
    .find(|(_, v)| v.trim().is_empty());
    if let Some((field, _)) = blank {
        return Err(Error::InvalidTransaction(format!("{} is empty", field)));
    }

    if tx.amount.is_sign_negative() {
        return Err(Error::InvalidTransaction(format!("negative amount {}", tx.amount)));
    }

    if tx.currency.len() != 3 || !tx.currency.bytes().all(|b| b.is_ascii_alphabetic()) {
        return Err(Error::InvalidTransaction(format!("invalid currency {:?}", tx.currency)));
    }

    Ok(())
}
