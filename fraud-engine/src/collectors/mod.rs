//! Signal collectors
//!
//! Each collector scores one aspect of a transaction. Collectors run
//! concurrently behind a [`GuardedCollector`], whose `evaluate` returns a
//! [`SignalScore`] rather than a `Result`: errors, timeouts and panics all
//! become fallback scores flagged with `error = true`.

use crate::config::MethodPolicy;
use crate::metrics::COLLECTOR_FALLBACK_TOTAL;
use crate::types::{PaymentMethodClass, SignalScore, SignalSource, Transaction};
use crate::velocity::VelocitySnapshot;
use crate::Result;
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub mod behavior;
pub mod classifier;
pub mod device;
pub mod geo;
pub mod rules;

pub use behavior::BehavioralPatternAnalyzer;
pub use classifier::{AiClassifierAdapter, FraudClassifier, HttpClassifier, OfflineClassifier};
pub use device::DeviceFingerprintAnalyzer;
pub use geo::{GeoLocator, GeoLookup, GeolocationChecker, StaticGeoLocator};
pub use rules::RuleBasedEvaluator;

/// Everything a collector may read about the transaction under evaluation
#[derive(Debug, Clone, Copy)]
pub struct SignalContext<'a> {
    /// Transaction
    pub transaction: &'a Transaction,

    /// Payment method class, resolved once
    pub class: PaymentMethodClass,

    /// Thresholds of that class
    pub policy: &'a MethodPolicy,

    /// Velocity windows after recording this transaction
    pub velocity: &'a VelocitySnapshot,

    /// Recent failed attempts of the paying identity
    pub recent_failures: u64,
}

/// Independent risk signal evaluator
#[async_trait]
pub trait SignalCollector: Send + Sync {
    /// Source this collector scores
    fn source(&self) -> SignalSource;

    /// Score the transaction
    async fn collect(&self, ctx: &SignalContext<'_>) -> Result<SignalScore>;
}

/// Collector boundary: timeout, error and panic isolation
pub struct GuardedCollector {
    inner: Arc<dyn SignalCollector>,
    timeout: Duration,
    fallback_score: f64,
    fail_closed: bool,
}

impl GuardedCollector {
    /// Wrap a collector
    pub fn new(inner: Arc<dyn SignalCollector>, timeout: Duration, fallback_score: f64) -> Self {
        Self {
            inner,
            timeout,
            fallback_score,
            fail_closed: false,
        }
    }

    /// Mark fallback scores of this collector as invalid (vetoing) verdicts
    pub fn fail_closed(mut self, fail_closed: bool) -> Self {
        self.fail_closed = fail_closed;
        self
    }

    /// Source of the wrapped collector
    pub fn source(&self) -> SignalSource {
        self.inner.source()
    }

    /// Evaluate, never failing
    pub async fn evaluate(&self, ctx: &SignalContext<'_>) -> SignalScore {
        let source = self.inner.source();
        let guarded = AssertUnwindSafe(self.inner.collect(ctx)).catch_unwind();

        match tokio::time::timeout(self.timeout, guarded).await {
            Ok(Ok(Ok(score))) if score.source == source => score,
            Ok(Ok(Ok(score))) => self.fallback(
                source,
                format!("collector returned a {} score", score.source),
                ctx,
            ),
            Ok(Ok(Err(e))) => self.fallback(source, e.to_string(), ctx),
            Ok(Err(_)) => self.fallback(source, "collector panicked".to_string(), ctx),
            Err(_) => self.fallback(
                source,
                format!("timed out after {}ms", self.timeout.as_millis()),
                ctx,
            ),
        }
    }

    fn fallback(&self, source: SignalSource, reason: String, ctx: &SignalContext<'_>) -> SignalScore {
        warn!(
            transaction_id = %ctx.transaction.transaction_id,
            source = %source,
            reason = %reason,
            fallback = self.fallback_score,
            "Signal collector failed, using fallback score"
        );
        COLLECTOR_FALLBACK_TOTAL
            .with_label_values(&[source.as_str()])
            .inc();

        let score = SignalScore::fallback(source, self.fallback_score, reason);
        if self.fail_closed {
            score.with_validity(false)
        } else {
            score
        }
    }
}
