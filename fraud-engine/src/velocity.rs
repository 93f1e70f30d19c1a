//! Velocity controls for transaction monitoring
//!
//! Two sliding windows are tracked per transaction:
//!
//! - the identity window (per user, default 10 per hour)
//! - the payment-method burst window (per user and merchant, e.g. CARD 5 per minute)
//!
//! Both are recorded before any signal collector runs. A recorded entry is never
//! rolled back, even if the evaluation is later cancelled.

use crate::config::{MethodPolicy, VelocityConfig};
use crate::store::{keys, RiskStore};
use crate::types::{HardOverride, SignalScore, SignalSource, Transaction};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

/// Result of one window check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VelocityCheck {
    /// Entries in the window after this transaction was recorded
    pub count: u64,

    /// Configured ceiling
    pub threshold: u64,

    /// `count > threshold`, or store unreachable
    pub exceeded: bool,

    /// Window length in seconds
    pub window_secs: i64,

    /// Store could not be reached; the check failed closed
    pub degraded: bool,
}

impl VelocityCheck {
    fn failed_closed(threshold: u64, window: Duration) -> Self {
        Self {
            count: threshold.saturating_add(1),
            threshold,
            exceeded: true,
            window_secs: window.num_seconds(),
            degraded: true,
        }
    }

    /// Utilisation of the window in percent, capped at 100
    pub fn utilisation(&self) -> f64 {
        if self.exceeded {
            return 100.0;
        }
        (self.count as f64 / self.threshold as f64 * 100.0).min(100.0)
    }
}

/// Velocity state of a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VelocitySnapshot {
    /// Identity window
    pub identity: VelocityCheck,

    /// Burst window, when the payment method has one
    pub burst: Option<VelocityCheck>,
}

impl VelocitySnapshot {
    /// Any window exceeded
    pub fn exceeded(&self) -> bool {
        self.identity.exceeded || self.burst.as_ref().map_or(false, |b| b.exceeded)
    }

    /// Any window failed closed
    pub fn degraded(&self) -> bool {
        self.identity.degraded || self.burst.as_ref().map_or(false, |b| b.degraded)
    }

    /// The hard override for the first exceeded window
    pub fn hard_override(&self) -> Option<HardOverride> {
        std::iter::once(&self.identity)
            .chain(self.burst.as_ref())
            .find(|c| c.exceeded)
            .map(|c| HardOverride::VelocityExceeded {
                count: c.count,
                threshold: c.threshold,
            })
    }

    /// Weighted signal derived from the windows
    pub fn to_signal(&self) -> SignalScore {
        let score = std::iter::once(&self.identity)
            .chain(self.burst.as_ref())
            .map(VelocityCheck::utilisation)
            .fold(0.0, f64::max);

        let details = json!({
            "identity_count": self.identity.count,
            "identity_threshold": self.identity.threshold,
            "burst_count": self.burst.as_ref().map(|b| b.count),
            "burst_threshold": self.burst.as_ref().map(|b| b.threshold),
        });

        if self.degraded() {
            SignalScore::fallback(SignalSource::Velocity, 100.0, "velocity store unavailable")
                .with_details(details)
        } else {
            SignalScore::new(SignalSource::Velocity, score).with_details(details)
        }
    }
}

/// Velocity tracker over the shared store
pub struct VelocityTracker {
    store: Arc<dyn RiskStore>,
    config: VelocityConfig,
}

impl VelocityTracker {
    /// Create new velocity tracker
    pub fn new(store: Arc<dyn RiskStore>, config: VelocityConfig) -> Self {
        Self { store, config }
    }

    /// Record `transaction_id` in the identity window and count it.
    ///
    /// Fails closed: when the store is unreachable the window reports exceeded.
    pub async fn record_and_count(
        &self,
        identity_key: &str,
        transaction_id: &str,
        now: DateTime<Utc>,
    ) -> VelocityCheck {
        self.record_window(
            &keys::velocity(identity_key),
            transaction_id,
            now,
            self.config.window(),
            self.config.max_transactions,
        )
        .await
    }

    /// Record a transaction in every window that applies to it
    pub async fn record(
        &self,
        transaction: &Transaction,
        policy: &MethodPolicy,
        now: DateTime<Utc>,
    ) -> VelocitySnapshot {
        let identity = self.record_and_count(&transaction.user_id, &transaction.transaction_id, now);

        let burst = async {
            match policy.burst_limit {
                Some(limit) => Some(
                    self.record_window(
                        &keys::burst(
                            transaction.method_class(),
                            &transaction.user_id,
                            &transaction.merchant_id,
                        ),
                        &transaction.transaction_id,
                        now,
                        policy.burst_window(),
                        limit,
                    )
                    .await,
                ),
                None => None,
            }
        };

        let (identity, burst) = tokio::join!(identity, burst);
        VelocitySnapshot { identity, burst }
    }

    async fn record_window(
        &self,
        key: &str,
        transaction_id: &str,
        now: DateTime<Utc>,
        window: Duration,
        threshold: u64,
    ) -> VelocityCheck {
        match self.store.record_and_count(key, transaction_id, now, window).await {
            Ok(count) => {
                let exceeded = count > threshold;
                if exceeded {
                    warn!(
                        key = %key,
                        count,
                        threshold,
                        "Velocity threshold exceeded"
                    );
                }
                VelocityCheck {
                    count,
                    threshold,
                    exceeded,
                    window_secs: window.num_seconds(),
                    degraded: false,
                }
            }
            Err(e) => {
                error!(key = %key, error = %e, "Velocity store unavailable, failing closed");
                VelocityCheck::failed_closed(threshold, window)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn tracker(max_transactions: u64) -> VelocityTracker {
        VelocityTracker::new(
            Arc::new(MemoryStore::new()),
            VelocityConfig {
                window_secs: 3600,
                max_transactions,
            },
        )
    }

    #[tokio::test]
    async fn test_velocity_transaction_count_limit() {
        let tracker = tracker(10);
        let now = Utc::now();

        for i in 1..=10 {
            let check = tracker.record_and_count("ACC001", &format!("tx-{}", i), now).await;
            assert_eq!(check.count, i);
            assert!(!check.exceeded);
        }

        // 11th transaction breaches the threshold
        let check = tracker.record_and_count("ACC001", "tx-11", now).await;
        assert_eq!(check.count, 11);
        assert!(check.exceeded);
    }

    #[tokio::test]
    async fn test_velocity_window_slides() {
        let tracker = tracker(2);
        let now = Utc::now();

        tracker.record_and_count("ACC002", "tx-1", now).await;
        tracker.record_and_count("ACC002", "tx-2", now).await;

        let later = now + Duration::minutes(61);
        let check = tracker.record_and_count("ACC002", "tx-3", later).await;
        assert_eq!(check.count, 1);
        assert!(!check.exceeded);
    }

    #[tokio::test]
    async fn test_identities_are_independent() {
        let tracker = tracker(1);
        let now = Utc::now();

        tracker.record_and_count("ACC003", "tx-1", now).await;
        let check = tracker.record_and_count("ACC004", "tx-2", now).await;
        assert_eq!(check.count, 1);
    }

    #[test]
    fn test_snapshot_signal_and_override() {
        let snapshot = VelocitySnapshot {
            identity: VelocityCheck {
                count: 3,
                threshold: 10,
                exceeded: false,
                window_secs: 3600,
                degraded: false,
            },
            burst: Some(VelocityCheck {
                count: 6,
                threshold: 5,
                exceeded: true,
                window_secs: 60,
                degraded: false,
            }),
        };

        assert!(snapshot.exceeded());
        assert_eq!(snapshot.to_signal().score, 100.0);
        assert_eq!(
            snapshot.hard_override(),
            Some(HardOverride::VelocityExceeded { count: 6, threshold: 5 })
        );
    }

    #[test]
    fn test_signal_scales_with_utilisation() {
        let snapshot = VelocitySnapshot {
            identity: VelocityCheck {
                count: 4,
                threshold: 10,
                exceeded: false,
                window_secs: 3600,
                degraded: false,
            },
            burst: None,
        };
        let signal = snapshot.to_signal();
        assert!((signal.score - 40.0).abs() < 1e-9);
        assert!(!signal.error);
        assert!(snapshot.hard_override().is_none());
    }
}
