//! Token lifecycle orchestration: registration, login, access-token validation and
//! refresh-token rotation.
//!
//! Refresh tokens move through `issued -> cached valid -> (rotated | expired) -> invalidated`.
//! The fast path only touches the cache; the durable store is written when credentials are
//! presented and when a refresh token turns out not to be live.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::auth::cache::{RefreshMarker, TokenCache, device_revocation_key, refresh_key};
use crate::auth::clock::Clock;
use crate::auth::jwt::{TokenClaims, TokenIssuer, TokenStatus};
use crate::auth::passwords::{PasswordService, peppered};
use crate::auth::store::{CredentialRecord, CredentialStore};
use crate::auth::{AuthConfig, AuthError, AuthResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token_expires_at: DateTime<Utc>,
}

pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    cache: Arc<dyn TokenCache>,
    clock: Arc<dyn Clock>,
    passwords: PasswordService,
    access_tokens: TokenIssuer,
    refresh_tokens: TokenIssuer,
    pepper: String,
    rotation_invalidates_previous: bool,
    /// Verified against when the login is unknown, so both failure paths cost one argon2 run.
    decoy_hash: String,
}

impl AuthService {
    pub fn new(
        config: &AuthConfig,
        store: Arc<dyn CredentialStore>,
        cache: Arc<dyn TokenCache>,
        clock: Arc<dyn Clock>,
    ) -> AuthResult<Self> {
        let passwords = PasswordService::new(config.hashing)?;
        let decoy_hash = passwords.hash(&PasswordService::generate_salt())?;

        Ok(Self {
            store,
            cache,
            clock,
            passwords,
            access_tokens: TokenIssuer::new(
                &config.access_secret,
                Duration::seconds(config.access_token_ttl_secs),
            ),
            refresh_tokens: TokenIssuer::new(
                &config.refresh_secret,
                Duration::seconds(config.refresh_token_ttl_secs),
            ),
            pepper: config.pepper.clone(),
            rotation_invalidates_previous: config.rotation_invalidates_previous,
            decoy_hash,
        })
    }

    pub async fn register(
        &self,
        login: &str,
        password: &str,
        device_id: &str,
    ) -> AuthResult<TokenPair> {
        if self.store.exists_by_login(login).await? {
            return Err(AuthError::UserExists);
        }

        let salt = PasswordService::generate_salt();
        let password_hash = self
            .hash_secret(peppered(password, &salt, &self.pepper))
            .await?;

        let record = CredentialRecord {
            login: login.to_string(),
            password_hash,
            salt,
        };
        self.store.insert(&record).await?;
        log::info!("registered login {login} from device {device_id}");

        // The row stays in place if issuance fails; the caller recovers through login.
        self.open_session(login, device_id).await.inspect_err(|err| {
            log::error!("token issuance after registering {login} failed: {err}");
        })
    }

    pub async fn login(
        &self,
        login: &str,
        password: &str,
        device_id: &str,
    ) -> AuthResult<TokenPair> {
        let verified = match self.store.find_by_login(login).await? {
            Some(record) => {
                self.verify_secret(
                    peppered(password, &record.salt, &self.pepper),
                    record.password_hash,
                )
                .await?
            }
            None => {
                self.verify_secret(password.to_string(), self.decoy_hash.clone())
                    .await?;
                false
            }
        };

        if !verified {
            log::info!("rejected login attempt for {login} from device {device_id}");
            return Err(invalid_credentials());
        }

        self.open_session(login, device_id).await
    }

    /// Stateless check of an access token: signature, algorithm and expiry only.
    pub fn validate(&self, access_token: &str) -> TokenStatus {
        match self.access_tokens.parse(access_token, self.clock.now()) {
            Ok(claims) => TokenStatus::Valid(claims),
            Err(rejection) => {
                log::debug!("access token rejected: {rejection}");
                TokenStatus::Rejected(rejection)
            }
        }
    }

    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        let now = self.clock.now();
        let claims = self
            .refresh_tokens
            .parse(refresh_token, now)
            .map_err(|rejection| {
                log::debug!("refresh token rejected: {rejection}");
                AuthError::InvalidRefreshToken
            })?;

        let key = refresh_key(refresh_token);
        if !self.refresh_token_is_live(&key, &claims).await {
            self.revoke_device(&claims, now).await;
            return Err(AuthError::InvalidRefreshToken);
        }

        // Successor first: the presented token must stay live if caching the new pair fails.
        let pair = self
            .issue_pair(
                &claims.login,
                &claims.device_id,
                claims.device_epoch.as_deref(),
                now,
            )
            .await?;

        if self.rotation_invalidates_previous {
            let remaining = Duration::seconds(claims.exp - now.timestamp());
            self.cache
                .set(&key, RefreshMarker::Invalid.as_str(), remaining)
                .await
                .inspect_err(|err| {
                    log::error!(
                        "failed to invalidate rotated refresh token for device {}: {err}",
                        claims.device_id
                    );
                })?;
        }

        Ok(pair)
    }

    async fn refresh_token_is_live(&self, key: &str, claims: &TokenClaims) -> bool {
        let marker = match self.cache.get(key).await {
            Ok(value) => RefreshMarker::from_cached(value.as_deref()),
            Err(err) => {
                log::warn!("refresh marker lookup failed, treating token as invalid: {err}");
                RefreshMarker::Invalid
            }
        };
        if marker != RefreshMarker::Valid {
            return false;
        }

        match self.cache.get(&device_revocation_key(&claims.device_id)).await {
            Ok(None) => true,
            Ok(Some(current)) => claims.device_epoch.as_deref() == Some(current.as_str()),
            Err(err) => {
                log::warn!("device revocation lookup failed, treating token as invalid: {err}");
                false
            }
        }
    }

    /// Fail-closed response to a refresh token that is signed but not live. A fresh device epoch
    /// kills every refresh token minted under the previous one. Write failures are logged; the
    /// caller is rejected either way.
    async fn revoke_device(&self, claims: &TokenClaims, now: DateTime<Utc>) {
        log::warn!(
            "refresh token for {} on device {} is not live; revoking device sessions",
            claims.login,
            claims.device_id
        );

        match self
            .store
            .expire_refresh_sessions_for_device(&claims.device_id, now)
            .await
        {
            Ok(expired) => log::info!(
                "expired {expired} refresh sessions for device {}",
                claims.device_id
            ),
            Err(err) => log::error!(
                "failed to expire refresh sessions for device {}: {err}",
                claims.device_id
            ),
        }

        if let Err(err) = self
            .cache
            .set(
                &device_revocation_key(&claims.device_id),
                &Uuid::new_v4().to_string(),
                self.refresh_tokens.lifetime(),
            )
            .await
        {
            log::error!(
                "failed to record revocation for device {}: {err}",
                claims.device_id
            );
        }
    }

    async fn open_session(&self, login: &str, device_id: &str) -> AuthResult<TokenPair> {
        let now = self.clock.now();
        let device_epoch = self.cache.get(&device_revocation_key(device_id)).await?;
        let pair = self
            .issue_pair(login, device_id, device_epoch.as_deref(), now)
            .await?;
        self.store
            .record_refresh_session(login, device_id, now, pair.refresh_token_expires_at)
            .await?;
        Ok(pair)
    }

    async fn issue_pair(
        &self,
        login: &str,
        device_id: &str,
        device_epoch: Option<&str>,
        now: DateTime<Utc>,
    ) -> AuthResult<TokenPair> {
        let access = self.access_tokens.issue(login, device_id, None, now)?;
        let refresh = self
            .refresh_tokens
            .issue(login, device_id, device_epoch, now)?;

        self.cache
            .set(
                &refresh_key(&refresh.token),
                RefreshMarker::Valid.as_str(),
                self.refresh_tokens.lifetime(),
            )
            .await?;

        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
            access_token_expires_at: access.expires_at,
            refresh_token_expires_at: refresh.expires_at,
        })
    }

    async fn hash_secret(&self, secret: String) -> AuthResult<String> {
        let passwords = self.passwords.clone();
        tokio::task::spawn_blocking(move || passwords.hash(&secret)).await?
    }

    async fn verify_secret(&self, candidate: String, encoded: String) -> AuthResult<bool> {
        let passwords = self.passwords.clone();
        tokio::task::spawn_blocking(move || passwords.verify(&candidate, &encoded)).await?
    }
}

/// Unknown login and wrong password deliberately collapse into the same error.
fn invalid_credentials() -> AuthError {
    AuthError::InvalidCredentials
}
