use thiserror::Error;

/// Failure parsing a refresh or authorization token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token is malformed")]
    Malformed,
}

/// Outcome of a relational store call that did not produce a row.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("row not found")]
    NotFound,
    #[error("row already exists ({0})")]
    AlreadyExists(String),
    #[error("rocksdb: {0}")]
    Rocks(#[from] rocksdb::Error),
    #[error("row codec: {0}")]
    Codec(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

/// Side-cache failure. Never leaves the cache-aside accessor.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("verification code not found")]
    CodeNotFound,
    #[error("user not found")]
    UserNotFound,
    #[error("user already exists")]
    UserAlreadyExists,
    #[error("banned")]
    Banned,
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("permission denied")]
    PermissionDenied,
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("token signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

impl AuthError {
    /// Stable machine-readable code surfaced to clients.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::CodeNotFound => "code_not_found",
            AuthError::UserNotFound => "user_not_found",
            AuthError::UserAlreadyExists => "user_already_exists",
            AuthError::Banned => "banned",
            AuthError::Unauthenticated => "unauthenticated",
            AuthError::PermissionDenied => "permission_denied",
            AuthError::Token(TokenError::Expired) => "token_expired",
            AuthError::Token(TokenError::InvalidSignature) => "token_invalid_signature",
            AuthError::Token(TokenError::Malformed) => "token_malformed",
            AuthError::Store(StoreError::Rocks(_) | StoreError::Codec(_)) => "unavailable",
            AuthError::Store(StoreError::NotFound | StoreError::AlreadyExists(_)) => "internal",
            AuthError::Signing(_) => "internal",
        }
    }

    /// Only transient store failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuthError::Store(StoreError::Rocks(_)) | AuthError::Store(StoreError::Codec(_))
        )
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
