//! Shared expiring key-value store
//!
//! Everything the engine keeps between evaluations lives behind [`RiskStore`]:
//!
//! - velocity and card-testing windows (`record_and_count`)
//! - failed-attempt counters (`increment` / `counter`)
//! - block markers (`set_if_absent`)
//! - verdicts and risk profiles (`put` / `get`)
//!
//! Implementations must make every single-key operation atomic. Operations on
//! different keys must not contend beyond what the backing store requires.

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

pub mod memory;
#[cfg(feature = "redis-store")]
pub mod redis;

pub use memory::MemoryStore;
#[cfg(feature = "redis-store")]
pub use self::redis::RedisStore;

/// Shared expiring key-value store
#[async_trait]
pub trait RiskStore: Send + Sync {
    /// Insert `member` at `now` into the window at `key`, drop every entry at or
    /// before `now - window`, and return the remaining count. Re-inserting an
    /// existing member refreshes its timestamp instead of adding a duplicate.
    async fn record_and_count(
        &self,
        key: &str,
        member: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<u64>;

    /// Increment the counter at `key` and reset its lifetime to `ttl`
    async fn increment(&self, key: &str, now: DateTime<Utc>, ttl: Duration) -> Result<u64>;

    /// Read a counter (0 when absent or expired)
    async fn counter(&self, key: &str, now: DateTime<Utc>) -> Result<u64>;

    /// Write `value` only if no unexpired value exists. Returns true when written.
    async fn set_if_absent(
        &self,
        key: &str,
        value: String,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool>;

    /// Write `value`, replacing any previous one
    async fn put(
        &self,
        key: &str,
        value: String,
        now: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> Result<()>;

    /// Read an unexpired value
    async fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<String>>;
}

/// Key layout shared by every store implementation
pub mod keys {
    use crate::types::PaymentMethodClass;

    /// Identity velocity window
    pub fn velocity(user_id: &str) -> String {
        format!("velocity:{}", user_id)
    }

    /// Per-class burst window for a user at a merchant. The user ID is
    /// length-prefixed so IDs containing `:` cannot collide.
    pub fn burst(class: PaymentMethodClass, user_id: &str, merchant_id: &str) -> String {
        format!(
            "burst:{}:{}:{}:{}",
            class.as_str(),
            user_id.len(),
            user_id,
            merchant_id
        )
    }

    /// Small-amount probe window
    pub fn card_testing(user_id: &str) -> String {
        format!("cardTest:{}", user_id)
    }

    /// Failed-attempt counter
    pub fn failed_attempts(user_id: &str) -> String {
        format!("failedAttempts:{}", user_id)
    }

    /// Block marker
    pub fn blocked(transaction_id: &str) -> String {
        format!("blocked:{}", transaction_id)
    }

    /// Retained verdict
    pub fn verdict(transaction_id: &str) -> String {
        format!("verdict:{}", transaction_id)
    }

    /// Advisory risk profile
    pub fn profile(user_id: &str) -> String {
        format!("riskProfile:{}", user_id)
    }
}
