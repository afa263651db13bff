//! Ephemeral refresh-token liveness markers.
//!
//! Entries are advisory: a missing entry is read as "not valid", so losing the cache only ever
//! makes refresh stricter.

use async_trait::async_trait;
use chrono::Duration;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use sha2::{Digest, Sha256};

use crate::auth::AuthResult;

const REFRESH_KEY_PREFIX: &str = "token:refresh:";
const DEVICE_REVOKED_KEY_PREFIX: &str = "token:device-revoked:";

/// Single-key get/set store with per-key expiry.
#[async_trait]
pub trait TokenCache: Send + Sync {
    async fn get(&self, key: &str) -> AuthResult<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> AuthResult<()>;
}

/// Cache key for a refresh token. The raw token never leaves the process.
pub fn refresh_key(refresh_token: &str) -> String {
    let digest = Sha256::digest(refresh_token.as_bytes());
    format!("{REFRESH_KEY_PREFIX}{digest:x}")
}

/// Cache key holding the device's current revocation epoch. Refresh tokens minted under an
/// older epoch are dead.
pub fn device_revocation_key(device_id: &str) -> String {
    format!("{DEVICE_REVOKED_KEY_PREFIX}{device_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMarker {
    Valid,
    Invalid,
}

impl RefreshMarker {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshMarker::Valid => "true",
            RefreshMarker::Invalid => "false",
        }
    }

    /// Anything other than the valid marker, including absence, reads as invalid.
    pub fn from_cached(value: Option<&str>) -> Self {
        match value {
            Some("true") => RefreshMarker::Valid,
            _ => RefreshMarker::Invalid,
        }
    }
}

/// Redis-backed cache. TTL expiry is left entirely to Redis.
#[derive(Clone)]
pub struct RedisTokenCache {
    conn: ConnectionManager,
}

impl RedisTokenCache {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn connect(url: &str) -> AuthResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl TokenCache for RedisTokenCache {
    async fn get(&self, key: &str) -> AuthResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> AuthResult<()> {
        let mut conn = self.conn.clone();
        let seconds = ttl.num_seconds().max(1) as u64;
        conn.set_ex::<_, _, ()>(key, value, seconds).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_keys_are_stable_digests() {
        let token = "header.payload.signature";
        let key = refresh_key(token);
        assert_eq!(key, refresh_key(token));
        assert_ne!(key, refresh_key("header.payload.signaturf"));
        assert!(key.starts_with("token:refresh:"));
        assert!(!key.contains(token));
        assert_eq!(key.len(), "token:refresh:".len() + 64);
    }

    #[test]
    fn device_keys_are_namespaced() {
        assert_eq!(device_revocation_key("dev-1"), "token:device-revoked:dev-1");
    }

    #[test]
    fn only_the_valid_marker_reads_as_valid() {
        assert_eq!(RefreshMarker::from_cached(Some("true")), RefreshMarker::Valid);
        assert_eq!(RefreshMarker::from_cached(Some("false")), RefreshMarker::Invalid);
        assert_eq!(RefreshMarker::from_cached(Some("1")), RefreshMarker::Invalid);
        assert_eq!(RefreshMarker::from_cached(None), RefreshMarker::Invalid);
    }
}
