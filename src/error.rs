//! Error types shared by the credential components.
//!
//! `StoreError` is what the durable store, cache and configuration backends
//! return. `AuthError` is the caller-facing taxonomy: session-path failures,
//! AKSK-path failures and a single `Infrastructure` bucket for anything the
//! stores raised.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum AuthError {
    // Session path
    #[error("Token malformed")]
    TokenMalformed,
    #[error("Token expired")]
    TokenExpired,
    #[error("Token not yet valid")]
    TokenNotYetValid,
    #[error("Token rejected: {0}")]
    TokenUnhandled(String),

    // AKSK path
    #[error("Access key not found")]
    NotFound,
    #[error("Access key expired")]
    Expired,
    #[error("Signature invalid")]
    SignatureInvalid,
    #[error("Request timestamp outside the accepted window")]
    ReplayWindow,
    #[error("Access key collision: {0}")]
    AccessKeyCollision(String),

    #[error("Insufficient permission")]
    InsufficientPermission,

    #[error("Infrastructure error: {0}")]
    Infrastructure(String),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::Infrastructure(err.to_string())
    }
}

impl AuthError {
    /// Numeric status code reported to callers on the session path.
    ///
    /// AKSK-path failures carry no code so that a bad timestamp, an unknown
    /// key and a wrong signature are indistinguishable from outside.
    pub fn session_code(&self) -> Option<u16> {
        match self {
            AuthError::TokenUnhandled(_) => Some(STATUS_TOKEN_UNHANDLED),
            AuthError::TokenMalformed => Some(STATUS_TOKEN_MALFORMED),
            AuthError::TokenExpired => Some(STATUS_TOKEN_EXPIRED),
            AuthError::TokenNotYetValid => Some(STATUS_TOKEN_NOT_VALID_YET),
            _ => None,
        }
    }

    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            AuthError::Infrastructure(_) | AuthError::AccessKeyCollision(_)
        )
    }
}

pub const STATUS_TOKEN_UNHANDLED: u16 = 1001;
pub const STATUS_TOKEN_MALFORMED: u16 = 1003;
pub const STATUS_TOKEN_EXPIRED: u16 = 1004;
pub const STATUS_TOKEN_NOT_VALID_YET: u16 = 1005;

pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_errors_carry_codes() {
        assert_eq!(AuthError::TokenMalformed.session_code(), Some(1003));
        assert_eq!(AuthError::TokenExpired.session_code(), Some(1004));
        assert_eq!(AuthError::TokenNotYetValid.session_code(), Some(1005));
        assert_eq!(
            AuthError::TokenUnhandled("bad".into()).session_code(),
            Some(1001)
        );
    }

    #[test]
    fn aksk_errors_are_uncoded() {
        for err in [
            AuthError::NotFound,
            AuthError::Expired,
            AuthError::SignatureInvalid,
            AuthError::ReplayWindow,
        ] {
            assert_eq!(err.session_code(), None, "{err}");
            assert!(!err.is_infrastructure());
        }
    }

    #[test]
    fn store_errors_become_infrastructure() {
        let err: AuthError = StoreError::Storage("disk gone".into()).into();
        assert!(err.is_infrastructure());
        assert!(err.to_string().contains("disk gone"));
    }
}
