//! Per-key request rate limiting.

use async_trait::async_trait;
use redis::AsyncCommands;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LimiterError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Decides whether a key may make another request right now.
#[async_trait]
pub trait RateLimiter: Send + Sync + 'static {
    /// `rpm` is the key's requests-per-minute budget; 0 or negative blocks.
    async fn allow(&self, key: &str, rpm: i32) -> Result<bool, LimiterError>;
}

/// Redis-backed fixed-window counter: INCR per request, 60 s expiry set on
/// the first hit of each window.
#[derive(Clone)]
pub struct RedisRateLimiter {
    conn: redis::aio::ConnectionManager,
}

impl RedisRateLimiter {
    pub async fn connect(redis_url: &str) -> Result<Self, LimiterError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn allow(&self, key: &str, rpm: i32) -> Result<bool, LimiterError> {
        if rpm <= 0 {
            return Ok(false);
        }

        let mut conn = self.conn.clone();
        let bucket = format!("rate_limit:{key}");
        let count: i64 = conn.incr(&bucket, 1).await?;
        if count == 1 {
            let _: () = conn.expire(&bucket, 60).await?;
        }
        Ok(count <= i64::from(rpm))
    }
}
