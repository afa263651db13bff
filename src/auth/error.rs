use rocket::http::Status;
use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

/// Caller-facing classification of every failure the service can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserExists,
    InvalidCredentials,
    InvalidRefreshToken,
    /// Store or cache I/O failed; safe to retry.
    Transient,
    /// Corrupt data or misconfiguration. Details stay in the logs.
    Internal,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("user already exists")]
    UserExists,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid refresh token")]
    InvalidRefreshToken,
    #[error("configuration error: {0}")]
    Config(String),
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("cache error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("argon2 parameter error: {0}")]
    Argon2(String),
    #[error("password hashing error: {0}")]
    PasswordHash(String),
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::UserExists => ErrorKind::UserExists,
            AuthError::InvalidCredentials => ErrorKind::InvalidCredentials,
            AuthError::InvalidRefreshToken => ErrorKind::InvalidRefreshToken,
            AuthError::Sqlx(err) if is_decode_error(err) => ErrorKind::Internal,
            AuthError::Sqlx(_) | AuthError::Redis(_) | AuthError::Jwt(_) | AuthError::Unavailable(_) => {
                ErrorKind::Transient
            }
            AuthError::Config(_)
            | AuthError::Argon2(_)
            | AuthError::PasswordHash(_)
            | AuthError::Join(_) => ErrorKind::Internal,
        }
    }

    pub fn status(&self) -> Status {
        match self.kind() {
            ErrorKind::UserExists => Status::Conflict,
            ErrorKind::InvalidCredentials | ErrorKind::InvalidRefreshToken => Status::Unauthorized,
            ErrorKind::Transient => Status::ServiceUnavailable,
            ErrorKind::Internal => Status::InternalServerError,
        }
    }

    /// Message safe to hand to a caller. Internal and transient causes are never echoed.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Transient => "service temporarily unavailable, retry later".into(),
            ErrorKind::Internal => "internal error".into(),
            _ => self.to_string(),
        }
    }
}

fn is_decode_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnIndexOutOfBounds { .. }
            | sqlx::Error::TypeNotFound { .. }
    )
}

impl From<argon2::Error> for AuthError {
    fn from(err: argon2::Error) -> Self {
        AuthError::Argon2(err.to_string())
    }
}

impl From<argon2::password_hash::Error> for AuthError {
    fn from(err: argon2::password_hash::Error) -> Self {
        AuthError::PasswordHash(err.to_string())
    }
}
