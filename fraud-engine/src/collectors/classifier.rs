//! AI classifier adapter
//!
//! The classifier is a remote dependency: every call runs inside a circuit
//! breaker and its own timeout, and only non-identifying features leave the
//! process.

use super::{SignalCollector, SignalContext};
use crate::circuit::CircuitBreaker;
use crate::clock::Clock;
use crate::collectors::device;
use crate::config::ClassifierConfig;
use crate::types::{PaymentMethodClass, SignalScore, SignalSource};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Timelike;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Features sent to the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierFeatures {
    /// Transaction amount
    pub amount: Decimal,
    /// Currency code
    pub currency: String,
    /// Payment method class
    pub method: PaymentMethodClass,
    /// UTC hour of creation
    pub hour_of_day: u32,
    /// Identity window count
    pub velocity_count: u64,
    /// Burst window count, if the method has one
    pub burst_count: Option<u64>,
    /// Recent failed attempts
    pub recent_failures: u64,
    /// Device fingerprint hash
    pub device_fingerprint: Option<String>,
    /// Client sent a device descriptor
    pub has_device: bool,
    /// Client sent behavioral telemetry
    pub has_behavior: bool,
    /// Billing country
    pub billing_country: Option<String>,
}

impl ClassifierFeatures {
    /// Extract features from a collector context
    pub fn from_context(ctx: &SignalContext<'_>) -> Self {
        let tx = ctx.transaction;
        Self {
            amount: tx.amount,
            currency: tx.currency.clone(),
            method: ctx.class,
            hour_of_day: tx.created_at.hour(),
            velocity_count: ctx.velocity.identity.count,
            burst_count: ctx.velocity.burst.as_ref().map(|b| b.count),
            recent_failures: ctx.recent_failures,
            device_fingerprint: device::fingerprint(tx),
            has_device: tx.device.is_some(),
            has_behavior: tx.behavior.is_some(),
            billing_country: tx.billing_country.clone(),
        }
    }
}

/// Classifier answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Fraud probability in [0, 1]
    pub probability: f64,
    /// Optional explanation
    #[serde(default)]
    pub rationale: Option<String>,
}

/// Fraud probability model
#[async_trait]
pub trait FraudClassifier: Send + Sync {
    /// Classify a feature vector
    async fn classify(&self, features: &ClassifierFeatures) -> Result<Classification>;
}

/// HTTP classification service
pub struct HttpClassifier {
    endpoint: String,
    client: Client,
}

impl HttpClassifier {
    /// Create client for `endpoint`
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Classifier(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }
}

#[async_trait]
impl FraudClassifier for HttpClassifier {
    async fn classify(&self, features: &ClassifierFeatures) -> Result<Classification> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(features)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json::<Classification>().await?)
    }
}

/// Classifier used when no endpoint is configured; every call fails
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineClassifier;

#[async_trait]
impl FraudClassifier for OfflineClassifier {
    async fn classify(&self, _features: &ClassifierFeatures) -> Result<Classification> {
        Err(Error::Classifier("no classifier endpoint configured".to_string()))
    }
}

/// Signal collector over a [`FraudClassifier`]
pub struct AiClassifierAdapter {
    classifier: Arc<dyn FraudClassifier>,
    breaker: CircuitBreaker,
    timeout: Duration,
}

impl AiClassifierAdapter {
    /// Create adapter
    pub fn new(
        classifier: Arc<dyn FraudClassifier>,
        config: &ClassifierConfig,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            classifier,
            breaker: CircuitBreaker::with_config(
                "ai_classifier",
                config.failure_threshold,
                config.recovery_threshold,
                config.open_timeout_secs,
                clock,
            ),
            timeout,
        }
    }

    /// Circuit breaker guarding the classifier
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn classify(&self, features: &ClassifierFeatures) -> Result<Classification> {
        let answer = tokio::time::timeout(self.timeout, self.classifier.classify(features))
            .await
            .map_err(|_| Error::Timeout {
                millis: self.timeout.as_millis() as u64,
                operation: "ai classification".to_string(),
            })??;

        if !answer.probability.is_finite() || !(0.0..=1.0).contains(&answer.probability) {
            return Err(Error::Classifier(format!(
                "probability out of range: {}",
                answer.probability
            )));
        }
        Ok(answer)
    }
}

#[async_trait]
impl SignalCollector for AiClassifierAdapter {
    fn source(&self) -> SignalSource {
        SignalSource::Ai
    }

    async fn collect(&self, ctx: &SignalContext<'_>) -> Result<SignalScore> {
        let features = ClassifierFeatures::from_context(ctx);
        let answer = self.breaker.call(|| self.classify(&features)).await?;

        debug!(
            transaction_id = %ctx.transaction.transaction_id,
            probability = answer.probability,
            "AI classification received"
        );

        let score = SignalScore::new(SignalSource::Ai, answer.probability * 100.0)
            .with_details(json!({ "probability": answer.probability }));
        Ok(match answer.rationale {
            Some(rationale) => score.with_reason(rationale),
            None => score,
        })
    }
}
