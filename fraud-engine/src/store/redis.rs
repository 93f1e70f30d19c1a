//! Redis-backed store for multi-instance deployments
//!
//! Windows are sorted sets scored by millisecond timestamps. The
//! insert/prune/count sequence runs as one MULTI/EXEC pipeline.

use super::RiskStore;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;

/// Redis [`RiskStore`]
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://redis:6379`)
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to Redis store at {}", url);
        Ok(Self { conn })
    }
}

fn millis(d: Duration) -> i64 {
    d.num_milliseconds().max(1)
}

#[async_trait]
impl RiskStore for RedisStore {
    async fn record_and_count(
        &self,
        key: &str,
        member: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<u64> {
        let mut conn = self.conn.clone();
        let now_ms = now.timestamp_millis();
        let cutoff_ms = now_ms - millis(window);

        let (count,): (u64,) = redis::pipe()
            .atomic()
            .zadd(key, member, now_ms)
            .ignore()
            .zrembyscore(key, "-inf", cutoff_ms)
            .ignore()
            .zcard(key)
            .pexpire(key, millis(window))
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(count)
    }

    async fn increment(&self, key: &str, _now: DateTime<Utc>, ttl: Duration) -> Result<u64> {
        let mut conn = self.conn.clone();

        let (value,): (u64,) = redis::pipe()
            .atomic()
            .incr(key, 1u64)
            .pexpire(key, millis(ttl))
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(value)
    }

    async fn counter(&self, key: &str, _now: DateTime<Utc>) -> Result<u64> {
        let mut conn = self.conn.clone();
        let value: Option<u64> = conn.get(key).await?;
        Ok(value.unwrap_or(0))
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: String,
        _now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }

    async fn put(
        &self,
        key: &str,
        value: String,
        _now: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let mut conn = self.conn.clone();

        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await?;

        Ok(())
    }

    async fn get(&self, key: &str, _now: DateTime<Utc>) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }
}
