use std::fmt;

use crate::auth::passwords::HashingParams;
use crate::auth::{AuthError, AuthResult};

/// Authentication configuration loaded from environment variables.
#[derive(Clone)]
pub struct AuthConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub pepper: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    /// Overwrite the presented refresh token's cache entry with an invalid marker on rotation.
    pub rotation_invalidates_previous: bool,
    pub hashing: HashingParams,
    pub redis_url: String,
}

impl AuthConfig {
    pub fn from_env() -> AuthResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> AuthResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let access_secret = required(&lookup, "AUTH_ACCESS_SECRET")?;
        let refresh_secret = required(&lookup, "AUTH_REFRESH_SECRET")?;
        let pepper = required(&lookup, "AUTH_PEPPER")?;

        if access_secret == refresh_secret {
            return Err(AuthError::Config(
                "AUTH_ACCESS_SECRET and AUTH_REFRESH_SECRET must differ".into(),
            ));
        }

        let access_token_ttl_secs = parsed(&lookup, "AUTH_ACCESS_TOKEN_TTL_SECS", 60 * 60)?;
        let refresh_token_ttl_secs =
            parsed(&lookup, "AUTH_REFRESH_TOKEN_TTL_SECS", 720 * 60 * 60)?;
        if access_token_ttl_secs <= 0 || refresh_token_ttl_secs <= 0 {
            return Err(AuthError::Config("token lifetimes must be positive".into()));
        }

        let rotation_invalidates_previous = lookup("AUTH_ROTATION_INVALIDATES_PREVIOUS")
            .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "on"))
            .unwrap_or(true);

        let defaults = HashingParams::default();
        let hashing = HashingParams {
            memory_kib: parsed(&lookup, "AUTH_ARGON2_MEMORY_KIB", defaults.memory_kib)?,
            iterations: parsed(&lookup, "AUTH_ARGON2_ITERATIONS", defaults.iterations)?,
            parallelism: parsed(&lookup, "AUTH_ARGON2_PARALLELISM", defaults.parallelism)?,
        };

        let redis_url = lookup("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379/0".into());

        Ok(Self {
            access_secret,
            refresh_secret,
            pepper,
            access_token_ttl_secs,
            refresh_token_ttl_secs,
            rotation_invalidates_previous,
            hashing,
            redis_url,
        })
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("access_secret", &"<redacted>")
            .field("refresh_secret", &"<redacted>")
            .field("pepper", &"<redacted>")
            .field("access_token_ttl_secs", &self.access_token_ttl_secs)
            .field("refresh_token_ttl_secs", &self.refresh_token_ttl_secs)
            .field(
                "rotation_invalidates_previous",
                &self.rotation_invalidates_previous,
            )
            .field("hashing", &self.hashing)
            .field("redis_url", &self.redis_url)
            .finish()
    }
}

fn required<F>(lookup: &F, key: &str) -> AuthResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(AuthError::Config(format!("{key} is required"))),
    }
}

fn parsed<F, T>(lookup: &F, key: &str, default: T) -> AuthResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(value) => value
            .parse::<T>()
            .map_err(|_| AuthError::Config(format!("{key} has an invalid value"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const SECRETS: [(&str, &str); 3] = [
        ("AUTH_ACCESS_SECRET", "access"),
        ("AUTH_REFRESH_SECRET", "refresh"),
        ("AUTH_PEPPER", "pepper"),
    ];

    #[test]
    fn applies_defaults() {
        let config = AuthConfig::from_lookup(lookup_from(&SECRETS)).expect("config");
        assert_eq!(config.access_token_ttl_secs, 3600);
        assert_eq!(config.refresh_token_ttl_secs, 720 * 3600);
        assert!(config.rotation_invalidates_previous);
        assert_eq!(config.hashing.memory_kib, 19 * 1024);
        assert_eq!(config.redis_url, "redis://127.0.0.1:6379/0");
    }

    #[test]
    fn requires_secrets_and_pepper() {
        let err = AuthConfig::from_lookup(lookup_from(&SECRETS[..2])).unwrap_err();
        assert!(matches!(err, AuthError::Config(msg) if msg.contains("AUTH_PEPPER")));
    }

    #[test]
    fn rejects_shared_signing_secret() {
        let err = AuthConfig::from_lookup(lookup_from(&[
            ("AUTH_ACCESS_SECRET", "same"),
            ("AUTH_REFRESH_SECRET", "same"),
            ("AUTH_PEPPER", "pepper"),
        ]))
        .unwrap_err();
        assert!(matches!(err, AuthError::Config(_)));
    }

    #[test]
    fn parses_overrides() {
        let mut pairs = SECRETS.to_vec();
        pairs.push(("AUTH_ACCESS_TOKEN_TTL_SECS", "120"));
        pairs.push(("AUTH_ROTATION_INVALIDATES_PREVIOUS", "false"));
        pairs.push(("AUTH_ARGON2_ITERATIONS", "3"));
        let config = AuthConfig::from_lookup(lookup_from(&pairs)).expect("config");
        assert_eq!(config.access_token_ttl_secs, 120);
        assert!(!config.rotation_invalidates_previous);
        assert_eq!(config.hashing.iterations, 3);

        pairs.push(("AUTH_REFRESH_TOKEN_TTL_SECS", "soon"));
        assert!(AuthConfig::from_lookup(lookup_from(&pairs)).is_err());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let config = AuthConfig::from_lookup(lookup_from(&SECRETS)).expect("config");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("\"refresh\""));
        assert!(!rendered.contains("\"pepper\""));
        assert!(rendered.contains("<redacted>"));
    }
}
