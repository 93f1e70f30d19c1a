//! Security alerts for blocked transactions

use crate::types::{RiskAssessment, RiskLevel, SignalScore, Transaction};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::error;
use uuid::Uuid;

/// Alert raised for a fraudulent transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAlert {
    /// Alert ID (time-ordered)
    pub alert_id: Uuid,
    /// Blocked transaction
    pub transaction_id: String,
    /// Paying user
    pub user_id: String,
    /// Receiving merchant
    pub merchant_id: String,
    /// Aggregate score
    pub risk_score: f64,
    /// Risk level
    pub risk_level: RiskLevel,
    /// Why the transaction was blocked
    pub reasons: Vec<String>,
    /// Per-source scores behind the verdict
    pub signals: Vec<SignalScore>,
    /// Raised at
    pub created_at: DateTime<Utc>,
}

impl SecurityAlert {
    /// Build the alert for an assessment
    pub fn for_assessment(transaction: &Transaction, assessment: &RiskAssessment) -> Self {
        let mut reasons: Vec<String> = assessment.overrides.iter().map(|o| o.describe()).collect();
        if reasons.is_empty() {
            reasons.push(format!("aggregate score {:.1}", assessment.aggregate_score));
        }

        Self {
            alert_id: Uuid::now_v7(),
            transaction_id: transaction.transaction_id.clone(),
            user_id: transaction.user_id.clone(),
            merchant_id: transaction.merchant_id.clone(),
            risk_score: assessment.aggregate_score,
            risk_level: assessment.risk_level,
            reasons,
            signals: assessment.signals.clone(),
            created_at: assessment.assessed_at,
        }
    }
}

/// Destination for security alerts
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// Publish an alert
    async fn publish(&self, alert: &SecurityAlert) -> Result<()>;
}

/// Writes alerts to the log at ERROR level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertChannel;

#[async_trait]
impl AlertChannel for TracingAlertChannel {
    async fn publish(&self, alert: &SecurityAlert) -> Result<()> {
        let signals: Vec<(&str, f64)> = alert
            .signals
            .iter()
            .map(|s| (s.source.as_str(), s.score))
            .collect();
        error!(
            alert_id = %alert.alert_id,
            transaction_id = %alert.transaction_id,
            user_id = %alert.user_id,
            merchant_id = %alert.merchant_id,
            risk_score = alert.risk_score,
            reasons = ?alert.reasons,
            signals = ?signals,
            "SECURITY ALERT: fraudulent transaction blocked"
        );
        Ok(())
    }
}

/// Fans alerts out to in-process subscribers
#[derive(Debug, Clone)]
pub struct BroadcastAlertChannel {
    sender: broadcast::Sender<SecurityAlert>,
}

impl BroadcastAlertChannel {
    /// Create channel buffering up to `capacity` alerts per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to alerts published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<SecurityAlert> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl AlertChannel for BroadcastAlertChannel {
    async fn publish(&self, alert: &SecurityAlert) -> Result<()> {
        self.sender
            .send(alert.clone())
            .map(|_| ())
            .map_err(|_| Error::Alert("no alert subscribers".to_string()))
    }
}
