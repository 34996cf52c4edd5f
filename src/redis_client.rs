use redis::{aio::ConnectionManager, AsyncCommands, RedisError};
use anyhow::{Context, Result};

/// Redis client wrapper for the admission engine's shared state.
/// All windows, counters and restriction markers live behind this type;
/// correctness for concurrent updates is delegated to Redis primitives.
#[derive(Clone)]
pub struct RedisClient {
    manager: ConnectionManager,
}

impl RedisClient {
    /// Create a new Redis client from a connection URL
    ///
    /// Security Requirements:
    /// - For production: Redis URL must include a password (redis://:password@host:port)
    /// - Supports both plain (redis://) and encrypted (rediss://) connections
    pub async fn new(redis_url: &str) -> Result<Self> {
        if !redis_url.contains("://") {
            return Err(anyhow::anyhow!(
                "Invalid Redis URL format. Expected: redis://:password@host:port or rediss://:password@host:port"
            ));
        }

        if !redis_url.contains('@') {
            eprintln!("WARNING: Redis URL does not include a password!");
            eprintln!("For production, always use: redis://:yourpassword@host:port");
        }

        let client = redis::Client::open(redis_url)
            .context("Failed to create Redis client from URL")?;

        let manager = ConnectionManager::new(client)
            .await
            .context("Failed to create Redis connection manager - check REDIS_URL and password")?;

        Ok(Self { manager })
    }

    /// Set a key-value pair with an expiration time (in seconds)
    pub async fn set_ex(&self, key: &str, value: &str, seconds: u64) -> Result<(), RedisError> {
        let mut conn = self.manager.clone();
        conn.set_ex(key, value, seconds).await
    }

    /// Get a value by key
    pub async fn get(&self, key: &str) -> Result<Option<String>, RedisError> {
        let mut conn = self.manager.clone();
        conn.get(key).await
    }

    /// Increment a key and return the new value
    pub async fn incr(&self, key: &str) -> Result<i64, RedisError> {
        let mut conn = self.manager.clone();
        conn.incr(key, 1).await
    }

    /// Delete a key
    pub async fn del(&self, key: &str) -> Result<(), RedisError> {
        let mut conn = self.manager.clone();
        conn.del(key).await
    }

    /// Get the time-to-live (TTL) of a key in seconds
    pub async fn ttl(&self, key: &str) -> Result<i64, RedisError> {
        let mut conn = self.manager.clone();
        conn.ttl(key).await
    }

    /// Add an element to a sorted set with a score (for sliding windows)
    pub async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), RedisError> {
        let mut conn = self.manager.clone();
        conn.zadd(key, member, score).await
    }

    /// Increment a member's score in a sorted set
    pub async fn zincr(&self, key: &str, member: &str, delta: f64) -> Result<f64, RedisError> {
        let mut conn = self.manager.clone();
        conn.zincr(key, member, delta).await
    }

    /// Remove elements from a sorted set by score range
    pub async fn zrembyscore(&self, key: &str, min: f64, max: f64) -> Result<i64, RedisError> {
        let mut conn = self.manager.clone();
        conn.zrembyscore(key, min, max).await
    }

    /// Remove a member from a sorted set
    pub async fn zrem(&self, key: &str, member: &str) -> Result<i64, RedisError> {
        let mut conn = self.manager.clone();
        conn.zrem(key, member).await
    }

    /// Count elements in a sorted set within a score range
    pub async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<i64, RedisError> {
        let mut conn = self.manager.clone();
        conn.zcount(key, min, max).await
    }

    /// Total number of elements in a sorted set
    pub async fn zcard(&self, key: &str) -> Result<i64, RedisError> {
        let mut conn = self.manager.clone();
        conn.zcard(key).await
    }

    /// Get a range from sorted set with scores
    pub async fn zrange_withscores(&self, key: &str, start: isize, stop: isize) -> Result<Vec<(String, f64)>, RedisError> {
        let mut conn = self.manager.clone();
        redis::cmd("ZRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await
    }

    /// Prune, insert and count a sliding-window entry in one round-trip.
    ///
    /// Pipelined (not transactional): under a concurrent burst a few extra
    /// entries can land between the prune and the count. The engine is a
    /// deterrent, not an exact quota system, so that race is accepted.
    /// Returns the number of entries in the window after the insert.
    pub async fn window_admit(
        &self,
        key: &str,
        window_start: f64,
        now: f64,
        member: &str,
        ttl_seconds: i64,
    ) -> Result<i64, RedisError> {
        let mut conn = self.manager.clone();
        let (_, _, count, _): (i64, i64, i64, i64) = redis::pipe()
            .cmd("ZREMRANGEBYSCORE").arg(key).arg(0.0).arg(window_start)
            .cmd("ZADD").arg(key).arg(now).arg(member)
            .cmd("ZCARD").arg(key)
            .cmd("EXPIRE").arg(key).arg(ttl_seconds)
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    /// Set expiration on a key
    pub async fn expire(&self, key: &str, seconds: i64) -> Result<bool, RedisError> {
        let mut conn = self.manager.clone();
        conn.expire(key, seconds).await
    }

    /// Increment a field inside a hash
    pub async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, RedisError> {
        let mut conn = self.manager.clone();
        conn.hincr(key, field, delta).await
    }

    /// Get a single field from a hash
    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, RedisError> {
        let mut conn = self.manager.clone();
        conn.hget(key, field).await
    }

    /// Set a single field inside a hash
    pub async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), RedisError> {
        let mut conn = self.manager.clone();
        conn.hset(key, field, value).await
    }

    /// Get all fields and values from a hash
    pub async fn hgetall(&self, key: &str) -> Result<std::collections::HashMap<String, String>, RedisError> {
        let mut conn = self.manager.clone();
        conn.hgetall(key).await
    }

    /// Add a member to a set
    pub async fn sadd(&self, key: &str, member: &str) -> Result<i64, RedisError> {
        let mut conn = self.manager.clone();
        conn.sadd(key, member).await
    }

    /// Get all members of a set
    pub async fn smembers(&self, key: &str) -> Result<Vec<String>, RedisError> {
        let mut conn = self.manager.clone();
        conn.smembers(key).await
    }

    /// Get all keys matching a pattern
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>, RedisError> {
        let mut conn = self.manager.clone();
        redis::cmd("KEYS")
            .arg(pattern)
            .query_async(&mut conn)
            .await
    }

    /// Ping Redis to check if connection is alive
    pub async fn ping(&self) -> Result<bool, RedisError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|resp| resp == "PONG")
    }
}
