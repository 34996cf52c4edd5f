use crate::redis_client::RedisClient;
use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Account-level signals the engine consults but does not own.
/// The host application keeps these up to date under `user:{identity}`;
/// anything missing falls back to a brand-new anonymous profile.
#[derive(Debug, Clone, Default)]
pub struct UserRecord {
    pub identity_id: String,
    /// Unix seconds the account was created; 0 means unknown/anonymous.
    pub created_at: u64,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub premium: bool,
    pub admin: bool,
    pub banned: bool,
    /// Unix seconds the ban lapses; None means permanent (when banned).
    pub ban_expires_at: Option<u64>,
    pub post_count: u64,
    pub comment_count: u64,
    pub likes_received: u64,
    pub comments_received: u64,
    pub report_count: u64,
}

impl UserRecord {
    pub fn account_age_days(&self, now_secs: u64) -> u64 {
        if self.created_at == 0 || self.created_at > now_secs {
            return 0;
        }
        (now_secs - self.created_at) / 86400
    }

    /// Total authored contributions.
    pub fn contributions(&self) -> u64 {
        self.post_count + self.comment_count
    }
}

fn field_u64(map: &HashMap<String, String>, field: &str) -> u64 {
    map.get(field).and_then(|v| v.parse().ok()).unwrap_or(0)
}

fn field_bool(map: &HashMap<String, String>, field: &str) -> bool {
    matches!(map.get(field).map(|s| s.as_str()), Some("1") | Some("true"))
}

/// Read-mostly client for the account directory. The engine only reads
/// profile fields and writes ban flags; everything else belongs to the
/// host application.
#[derive(Clone)]
pub struct DirectoryClient {
    redis: RedisClient,
}

impl DirectoryClient {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }

    fn user_key(identity: &str) -> String {
        format!("user:{}", identity)
    }

    /// Fetch the account record for an identity. Identities without a
    /// directory entry (e.g. raw IP identities) come back as a default
    /// zero-signal record, which scores as NEW.
    pub async fn fetch(&self, identity: &str) -> Result<UserRecord> {
        let map = self
            .redis
            .hgetall(&Self::user_key(identity))
            .await
            .map_err(|e| anyhow!("Failed to fetch user record: {}", e))?;

        if map.is_empty() {
            return Ok(UserRecord {
                identity_id: identity.to_string(),
                ..UserRecord::default()
            });
        }

        let ban_expires = field_u64(&map, "ban_expires_at");
        Ok(UserRecord {
            identity_id: identity.to_string(),
            created_at: field_u64(&map, "created_at"),
            email_verified: field_bool(&map, "email_verified"),
            phone_verified: field_bool(&map, "phone_verified"),
            premium: field_bool(&map, "premium"),
            admin: field_bool(&map, "admin"),
            banned: field_bool(&map, "banned"),
            ban_expires_at: if ban_expires > 0 { Some(ban_expires) } else { None },
            post_count: field_u64(&map, "post_count"),
            comment_count: field_u64(&map, "comment_count"),
            likes_received: field_u64(&map, "likes_received"),
            comments_received: field_u64(&map, "comments_received"),
            report_count: field_u64(&map, "report_count"),
        })
    }

    /// Check the admin flag without pulling the whole record.
    pub async fn is_admin(&self, identity: &str) -> Result<bool> {
        let flag = self
            .redis
            .hget(&Self::user_key(identity), "admin")
            .await
            .map_err(|e| anyhow!("Failed to check admin flag: {}", e))?;
        Ok(matches!(flag.as_deref(), Some("1") | Some("true")))
    }

    /// Set the ban flag with a reason and optional expiry (None = permanent).
    pub async fn set_ban_flag(
        &self,
        identity: &str,
        reason: &str,
        expires_at: Option<u64>,
    ) -> Result<()> {
        let key = Self::user_key(identity);
        self.redis
            .hset(&key, "banned", "1")
            .await
            .map_err(|e| anyhow!("Failed to set ban flag: {}", e))?;
        self.redis
            .hset(&key, "ban_reason", reason)
            .await
            .map_err(|e| anyhow!("Failed to set ban reason: {}", e))?;
        let expiry = expires_at.map(|e| e.to_string()).unwrap_or_else(|| "0".to_string());
        self.redis
            .hset(&key, "ban_expires_at", &expiry)
            .await
            .map_err(|e| anyhow!("Failed to set ban expiry: {}", e))?;
        Ok(())
    }

    /// Clear the ban flag (used when a block/ban restriction is lifted).
    pub async fn clear_ban_flag(&self, identity: &str) -> Result<()> {
        let key = Self::user_key(identity);
        self.redis
            .hset(&key, "banned", "0")
            .await
            .map_err(|e| anyhow!("Failed to clear ban flag: {}", e))?;
        self.redis
            .hset(&key, "ban_expires_at", "0")
            .await
            .map_err(|e| anyhow!("Failed to clear ban expiry: {}", e))?;
        Ok(())
    }
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_age_days() {
        let now = 1_700_000_000;
        let record = UserRecord {
            created_at: now - 86400 * 400,
            ..UserRecord::default()
        };
        assert_eq!(record.account_age_days(now), 400);

        let unknown = UserRecord::default();
        assert_eq!(unknown.account_age_days(now), 0);
    }

    #[test]
    fn test_future_created_at_is_zero_age() {
        let now = 1_700_000_000;
        let record = UserRecord {
            created_at: now + 1000,
            ..UserRecord::default()
        };
        assert_eq!(record.account_age_days(now), 0);
    }

    #[test]
    fn test_field_parsing_helpers() {
        let mut map = HashMap::new();
        map.insert("post_count".to_string(), "42".to_string());
        map.insert("email_verified".to_string(), "true".to_string());
        map.insert("premium".to_string(), "0".to_string());
        assert_eq!(field_u64(&map, "post_count"), 42);
        assert_eq!(field_u64(&map, "missing"), 0);
        assert!(field_bool(&map, "email_verified"));
        assert!(!field_bool(&map, "premium"));
        assert!(!field_bool(&map, "missing"));
    }
}
