//! Hard fraud patterns
//!
//! Patterns never contribute to the weighted score; any match forces a HIGH
//! decision.

use crate::config::PatternConfig;
use crate::store::{keys, RiskStore};
use crate::types::{FraudPattern, Transaction};
use crate::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, warn};

/// Outcome of a pattern scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternScan {
    /// Matched patterns
    pub patterns: Vec<FraudPattern>,

    /// Failed attempts seen for the identity
    pub recent_failures: u64,

    /// Pattern state could not be read; the scan failed closed
    pub degraded: bool,
}

/// Pattern matcher over the shared store
pub struct PatternMatcher {
    store: Arc<dyn RiskStore>,
    config: PatternConfig,
}

impl PatternMatcher {
    /// Create matcher
    pub fn new(store: Arc<dyn RiskStore>, config: PatternConfig) -> Self {
        Self { store, config }
    }

    /// Scan a transaction. Small amounts are recorded in the card-testing window.
    pub async fn scan(&self, transaction: &Transaction, now: DateTime<Utc>) -> PatternScan {
        let mut scan = PatternScan::default();

        if transaction.amount > self.config.anomalous_amount {
            scan.patterns.push(FraudPattern::AnomalousAmount);
        }

        let failures_key = keys::failed_attempts(&transaction.user_id);
        let (probes, failures) = tokio::join!(
            self.card_testing_probes(transaction, now),
            self.store.counter(&failures_key, now),
        );

        match probes {
            Ok(Some(count)) if count > self.config.card_testing_max_attempts => {
                warn!(
                    user_id = %transaction.user_id,
                    probes = count,
                    "Card testing pattern detected"
                );
                scan.patterns.push(FraudPattern::CardTesting);
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "Card-testing window unavailable, failing closed");
                scan.degraded = true;
            }
        }

        match failures {
            Ok(count) => {
                scan.recent_failures = count;
                if count >= self.config.failed_attempts_threshold {
                    scan.patterns.push(FraudPattern::RepeatedFailures);
                }
            }
            Err(e) => {
                error!(error = %e, "Failed-attempt counter unavailable, failing closed");
                scan.degraded = true;
            }
        }

        if scan.degraded {
            scan.patterns.push(FraudPattern::StoreUnavailable);
        }
        scan
    }

    /// Count a failed payment attempt for `user_id`
    pub async fn record_failure(&self, user_id: &str, now: DateTime<Utc>) -> Result<u64> {
        self.store
            .increment(
                &keys::failed_attempts(user_id),
                now,
                self.config.failed_attempt_ttl(),
            )
            .await
    }

    async fn card_testing_probes(
        &self,
        transaction: &Transaction,
        now: DateTime<Utc>,
    ) -> Result<Option<u64>> {
        if transaction.amount > self.config.card_testing_amount {
            return Ok(None);
        }
        self.store
            .record_and_count(
                &keys::card_testing(&transaction.user_id),
                &transaction.transaction_id,
                now,
                self.config.card_testing_window(),
            )
            .await
            .map(Some)
    }
}
