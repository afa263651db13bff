use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};

use crate::auth::{AuthError, AuthResult};

const UNIQUE_VIOLATION: &str = "23505";

/// Durable identity row. `salt` is the base64 per-user salt mixed into the hash input.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct CredentialRecord {
    pub login: String,
    pub password_hash: String,
    pub salt: String,
}

/// Server-tracked refresh session for one login on one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSession {
    pub login: String,
    pub device_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_login(&self, login: &str) -> AuthResult<Option<CredentialRecord>>;

    async fn exists_by_login(&self, login: &str) -> AuthResult<bool>;

    /// Insert a new record. Implementations must fail with [`AuthError::UserExists`] when the
    /// login is already taken, independently of any prior `exists_by_login` check.
    async fn insert(&self, record: &CredentialRecord) -> AuthResult<()>;

    async fn record_refresh_session(
        &self,
        login: &str,
        device_id: &str,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> AuthResult<()>;

    /// Set `expires_at = now` on every live session of the device. Returns the rows touched.
    async fn expire_refresh_sessions_for_device(
        &self,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<u64>;
}

#[derive(Debug, Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn sessions_for_device(&self, device_id: &str) -> AuthResult<Vec<RefreshSession>> {
        let rows = sqlx::query(
            "SELECT login, device_id, issued_at, expires_at FROM refresh_sessions WHERE device_id = $1 ORDER BY login",
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(RefreshSession {
                    login: row.try_get("login")?,
                    device_id: row.try_get("device_id")?,
                    issued_at: row.try_get("issued_at")?,
                    expires_at: row.try_get("expires_at")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_login(&self, login: &str) -> AuthResult<Option<CredentialRecord>> {
        let record = sqlx::query_as::<_, CredentialRecord>(
            "SELECT login, password_hash, salt FROM users WHERE login = $1",
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn exists_by_login(&self, login: &str) -> AuthResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE login = $1)")
                .bind(login)
                .fetch_one(&self.pool)
                .await?;

        Ok(exists)
    }

    async fn insert(&self, record: &CredentialRecord) -> AuthResult<()> {
        let result = sqlx::query("INSERT INTO users (login, password_hash, salt) VALUES ($1, $2, $3)")
            .bind(&record.login)
            .bind(&record.password_hash)
            .bind(&record.salt)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(AuthError::UserExists),
            Err(err) => Err(AuthError::from(err)),
        }
    }

    async fn record_refresh_session(
        &self,
        login: &str,
        device_id: &str,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> AuthResult<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_sessions (login, device_id, issued_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (login, device_id)
            DO UPDATE SET issued_at = EXCLUDED.issued_at, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(login)
        .bind(device_id)
        .bind(issued_at)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn expire_refresh_sessions_for_device(
        &self,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<u64> {
        let result = sqlx::query(
            "UPDATE refresh_sessions SET expires_at = $1 WHERE device_id = $2 AND expires_at > $1",
        )
        .bind(now)
        .bind(device_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err)
            if db_err
                .code()
                .map(|code| code == UNIQUE_VIOLATION)
                .unwrap_or(false)
    )
}
