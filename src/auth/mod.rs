//! Authentication core: configuration, password hashing, token signing, the refresh-token
//! cache, the credential store, the orchestrating service, and its HTTP routes.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod jwt;
pub mod passwords;
pub mod responses;
pub mod routes;
pub mod service;
pub mod store;

pub use cache::{RedisTokenCache, TokenCache};
pub use clock::{Clock, SystemClock};
pub use config::AuthConfig;
pub use error::{AuthError, AuthResult, ErrorKind};
pub use jwt::{TokenClaims, TokenIssuer, TokenRejection, TokenStatus};
pub use passwords::{HashingParams, PasswordService};
pub use service::{AuthService, TokenPair};
pub use store::{CredentialRecord, CredentialStore, PgCredentialStore, RefreshSession};
