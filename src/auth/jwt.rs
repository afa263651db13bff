use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;
use uuid::Uuid;

use crate::auth::AuthResult;

/// Claims carried by both access and refresh tokens.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TokenClaims {
    pub login: String,
    pub device_id: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    /// Revocation epoch of the device when a refresh token was minted. Absent on access tokens
    /// and on devices that were never revoked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_epoch: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Why a presented token was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenRejection {
    #[error("token expired")]
    Expired,
    #[error("token signature mismatch")]
    BadSignature,
    #[error("unexpected signing algorithm")]
    AlgorithmMismatch,
    #[error("malformed token")]
    Malformed,
}

/// Outcome of validating an access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenStatus {
    Valid(TokenClaims),
    Rejected(TokenRejection),
}

impl TokenStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, TokenStatus::Valid(_))
    }

    pub fn rejection(&self) -> Option<TokenRejection> {
        match self {
            TokenStatus::Valid(_) => None,
            TokenStatus::Rejected(rejection) => Some(*rejection),
        }
    }
}

/// Signs and parses HMAC tokens under one secret and one lifetime.
///
/// Access and refresh tokens each get their own issuer so the two secrets never mix.
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    lifetime: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, lifetime: Duration) -> Self {
        let secret_bytes = secret.as_bytes();
        let encoding_key = EncodingKey::from_secret(secret_bytes);
        let decoding_key = DecodingKey::from_secret(secret_bytes);

        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        // Expiry is checked against the injected clock in `parse`.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding_key,
            decoding_key,
            validation,
            lifetime,
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn issue(
        &self,
        login: &str,
        device_id: &str,
        device_epoch: Option<&str>,
        now: DateTime<Utc>,
    ) -> AuthResult<SignedToken> {
        let expires_at = now + self.lifetime;
        let claims = TokenClaims {
            login: login.to_string(),
            device_id: device_id.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
            device_epoch: device_epoch.map(str::to_string),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;

        Ok(SignedToken { token, expires_at })
    }

    pub fn parse(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims, TokenRejection> {
        let token_data = decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| classify(err.kind()))?;
        let claims = token_data.claims;
        if claims.exp <= now.timestamp() {
            return Err(TokenRejection::Expired);
        }
        Ok(claims)
    }
}

fn classify(kind: &JwtErrorKind) -> TokenRejection {
    match kind {
        JwtErrorKind::InvalidSignature => TokenRejection::BadSignature,
        JwtErrorKind::InvalidAlgorithm | JwtErrorKind::InvalidAlgorithmName => {
            TokenRejection::AlgorithmMismatch
        }
        JwtErrorKind::ExpiredSignature => TokenRejection::Expired,
        _ => TokenRejection::Malformed,
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use chrono::TimeZone;

    use super::*;

    const TEST_SECRET: &str = "super-secret-test-key";

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(TEST_SECRET, Duration::hours(1))
    }

    fn with_header(token: &str, header_json: &str) -> String {
        let (_, rest) = token.split_once('.').expect("jwt has a header");
        format!("{}.{}", URL_SAFE_NO_PAD.encode(header_json), rest)
    }

    #[test]
    fn issues_and_parses_tokens() {
        let issuer = issuer();
        let signed = issuer.issue("alice", "dev-1", None, epoch()).expect("issue token");

        let claims = issuer.parse(&signed.token, epoch()).expect("parse token");

        assert_eq!(claims.login, "alice");
        assert_eq!(claims.device_id, "dev-1");
        assert_eq!(claims.iat, epoch().timestamp());
        assert_eq!(claims.exp, (epoch() + Duration::hours(1)).timestamp());
        assert_eq!(signed.expires_at, epoch() + Duration::hours(1));
        assert_eq!(claims.device_epoch, None);
    }

    #[test]
    fn device_epoch_survives_signing() {
        let issuer = issuer();
        let signed = issuer
            .issue("alice", "dev-1", Some("epoch-7"), epoch())
            .expect("issue token");

        let claims = issuer.parse(&signed.token, epoch()).expect("parse token");
        assert_eq!(claims.device_epoch.as_deref(), Some("epoch-7"));
    }

    #[test]
    fn tokens_minted_together_are_distinct() {
        let issuer = issuer();
        let first = issuer.issue("alice", "dev-1", None, epoch()).expect("issue");
        let second = issuer.issue("alice", "dev-1", None, epoch()).expect("issue");
        assert_ne!(first.token, second.token);
    }

    #[test]
    fn rejects_other_secret() {
        let signed = issuer().issue("alice", "dev-1", None, epoch()).expect("issue");
        let other = TokenIssuer::new("a-different-secret", Duration::hours(1));
        assert_eq!(
            other.parse(&signed.token, epoch()),
            Err(TokenRejection::BadSignature)
        );
    }

    #[test]
    fn expires_exactly_at_exp() {
        let issuer = issuer();
        let signed = issuer.issue("alice", "dev-1", None, epoch()).expect("issue");

        let just_before = epoch() + Duration::hours(1) - Duration::seconds(1);
        assert!(issuer.parse(&signed.token, just_before).is_ok());
        assert_eq!(
            issuer.parse(&signed.token, epoch() + Duration::hours(1)),
            Err(TokenRejection::Expired)
        );
    }

    #[test]
    fn rejects_non_hmac_algorithms() {
        let issuer = issuer();
        let signed = issuer.issue("alice", "dev-1", None, epoch()).expect("issue");

        let substituted = with_header(&signed.token, r#"{"alg":"RS256","typ":"JWT"}"#);
        assert_eq!(
            issuer.parse(&substituted, epoch()),
            Err(TokenRejection::AlgorithmMismatch)
        );

        let unsigned = with_header(&signed.token, r#"{"alg":"none","typ":"JWT"}"#);
        assert!(issuer.parse(&unsigned, epoch()).is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(
            issuer().parse("not.a.jwt", epoch()),
            Err(TokenRejection::Malformed)
        );
        assert_eq!(issuer().parse("", epoch()), Err(TokenRejection::Malformed));
    }

    #[test]
    fn status_reports_rejection() {
        let status = TokenStatus::Rejected(TokenRejection::Expired);
        assert!(!status.is_valid());
        assert_eq!(status.rejection(), Some(TokenRejection::Expired));
    }
}
