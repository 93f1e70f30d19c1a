//! Block sink: marker write plus security alert
//!
//! Both side effects are attempted for every fraudulent verdict; a failure
//! of one never suppresses the other.

use crate::alert::{AlertChannel, SecurityAlert};
use crate::config::BlockConfig;
use crate::metrics::{ALERT_FAILURES_TOTAL, BLOCK_MARKERS_TOTAL};
use crate::store::{keys, RiskStore};
use crate::types::{BlockMarker, RiskAssessment, Transaction};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

/// What happened to the side effects of a block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockOutcome {
    /// A marker now exists for the transaction
    pub marker_present: bool,

    /// This call wrote the marker (false when one was already present)
    pub marker_written: bool,

    /// Alert accepted by the channel
    pub alert_published: bool,

    /// Errors of the attempts that failed
    pub errors: Vec<String>,
}

/// Block sink
pub struct BlockSink {
    store: Arc<dyn RiskStore>,
    alerts: Arc<dyn AlertChannel>,
    config: BlockConfig,
}

impl BlockSink {
    /// Create block sink
    pub fn new(store: Arc<dyn RiskStore>, alerts: Arc<dyn AlertChannel>, config: BlockConfig) -> Self {
        Self {
            store,
            alerts,
            config,
        }
    }

    /// Write the block marker and publish the alert
    pub async fn on_fraud(
        &self,
        transaction: &Transaction,
        assessment: &RiskAssessment,
        now: DateTime<Utc>,
    ) -> BlockOutcome {
        let alert = SecurityAlert::for_assessment(transaction, assessment);
        let (marker, published) = tokio::join!(
            self.write_marker(&transaction.transaction_id, now),
            self.publish(&alert),
        );

        let mut outcome = BlockOutcome::default();

        match marker {
            Ok(written) => {
                outcome.marker_present = true;
                outcome.marker_written = written;
                if written {
                    BLOCK_MARKERS_TOTAL.inc();
                }
            }
            Err(e) => {
                error!(
                    transaction_id = %transaction.transaction_id,
                    error = %e,
                    "Failed to write block marker"
                );
                outcome.errors.push(e.to_string());
            }
        }

        match published {
            Ok(()) => outcome.alert_published = true,
            Err(e) => {
                error!(
                    transaction_id = %transaction.transaction_id,
                    error = %e,
                    "Failed to publish security alert"
                );
                ALERT_FAILURES_TOTAL.inc();
                outcome.errors.push(e.to_string());
            }
        }

        info!(
            transaction_id = %transaction.transaction_id,
            marker_written = outcome.marker_written,
            alert_published = outcome.alert_published,
            "Fraudulent transaction blocked"
        );
        outcome
    }

    /// True while an unexpired block marker exists
    pub async fn is_blocked(&self, transaction_id: &str, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.store.get(&keys::blocked(transaction_id), now).await?.is_some())
    }

    async fn write_marker(&self, transaction_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let ttl = self.config.marker_ttl();
        let marker = BlockMarker {
            transaction_id: transaction_id.to_string(),
            set_at: now,
            expires_at: now + ttl,
        };
        self.store
            .set_if_absent(&keys::blocked(transaction_id), serde_json::to_string(&marker)?, now, ttl)
            .await
    }

    async fn publish(&self, alert: &SecurityAlert) -> Result<()> {
        let timeout = self.config.alert_timeout();
        tokio::time::timeout(timeout, self.alerts.publish(alert))
            .await
            .map_err(|_| Error::Timeout {
                millis: timeout.as_millis() as u64,
                operation: "alert publish".to_string(),
            })?
    }
}
