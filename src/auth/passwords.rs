use argon2::{
    Algorithm, Argon2, ParamsBuilder, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::SaltString,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;

use crate::auth::{AuthError, AuthResult};

const PHC_SALT_LEN: usize = 16;

/// Length in bytes of the per-user salt stored next to the hash.
pub const USER_SALT_LEN: usize = 32;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashingParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashingParams {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024, // 19 MiB
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// One-way hasher for `password ∥ salt ∥ pepper` secrets.
///
/// The PHC output embeds the algorithm, version and cost parameters, so hashes written under
/// older parameters keep verifying after the configured cost is raised.
#[derive(Clone)]
pub struct PasswordService {
    argon2: Argon2<'static>,
}

impl PasswordService {
    pub fn new(params: HashingParams) -> AuthResult<Self> {
        let mut builder = ParamsBuilder::new();
        builder.m_cost(params.memory_kib);
        builder.t_cost(params.iterations);
        builder.p_cost(params.parallelism);
        let params = builder.build().map_err(AuthError::from)?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        Ok(Self { argon2 })
    }

    pub fn hash(&self, secret: &str) -> AuthResult<String> {
        let mut salt_bytes = [0u8; PHC_SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt_bytes);
        let salt = SaltString::encode_b64(&salt_bytes).map_err(AuthError::from)?;
        let hash = self
            .argon2
            .hash_password(secret.as_bytes(), &salt)
            .map_err(AuthError::from)?
            .to_string();
        Ok(hash)
    }

    /// Constant-time check of `candidate` against a stored PHC string.
    ///
    /// A stored value that does not parse is corrupt data and surfaces as an error rather than a
    /// mismatch.
    pub fn verify(&self, candidate: &str, encoded: &str) -> AuthResult<bool> {
        let parsed = PasswordHash::new(encoded)?;
        match self.argon2.verify_password(candidate.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(err) => Err(AuthError::from(err)),
        }
    }

    pub fn generate_salt() -> String {
        let mut bytes = [0u8; USER_SALT_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        STANDARD.encode(bytes)
    }
}

/// Hash input for a user: the plaintext candidate, the persisted salt, then the pepper.
pub fn peppered(password: &str, salt: &str, pepper: &str) -> String {
    let mut secret = String::with_capacity(password.len() + salt.len() + pepper.len());
    secret.push_str(password);
    secret.push_str(salt);
    secret.push_str(pepper);
    secret
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_service() -> PasswordService {
        PasswordService::new(HashingParams {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        })
        .expect("password service")
    }

    #[test]
    fn hashes_and_verifies_peppered_secrets() {
        let service = fast_service();
        let salt = PasswordService::generate_salt();
        let hash = service
            .hash(&peppered("super-secret", &salt, "pepper"))
            .expect("hash generation");

        assert!(hash.starts_with("$argon2id$"));
        assert!(!hash.contains("super-secret"));
        assert!(
            service
                .verify(&peppered("super-secret", &salt, "pepper"), &hash)
                .expect("verify succeeds")
        );
        assert!(
            !service
                .verify(&peppered("super-secret", &salt, "other-pepper"), &hash)
                .expect("verify runs")
        );
        assert!(
            !service
                .verify(&peppered("wrong-password", &salt, "pepper"), &hash)
                .expect("verify runs")
        );
    }

    #[test]
    fn malformed_hash_is_an_error_not_a_mismatch() {
        let service = fast_service();
        let err = service.verify("anything", "not-a-phc-string").unwrap_err();
        assert!(matches!(err, AuthError::PasswordHash(_)));
    }

    #[test]
    fn salts_are_random_and_sized() {
        let first = PasswordService::generate_salt();
        let second = PasswordService::generate_salt();
        assert_ne!(first, second);
        assert_eq!(STANDARD.decode(&first).expect("base64").len(), USER_SALT_LEN);
    }

    #[test]
    fn rejects_invalid_parameters() {
        let result = PasswordService::new(HashingParams {
            memory_kib: 1,
            iterations: 0,
            parallelism: 1,
        });
        assert!(matches!(result, Err(AuthError::Argon2(_))));
    }
}
