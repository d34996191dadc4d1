//! Session token codec.
//!
//! Issues and verifies HS256 JWTs carrying the user's identity. The codec
//! keeps no server-side state: a token is valid as long as its signature
//! checks out against the process signing key and its time claims admit the
//! current instant.
//!
//! Structural and signature checks are delegated to `jsonwebtoken`; the time
//! claims (`exp`, `nbf`) are checked here against the injected [`Clock`] so
//! expiry behaves the same under a simulated clock as under wall time.
//!
//! [`Clock`]: crate::clock::Clock

use crate::clock::SharedClock;
use crate::error::{AuthError, Result};
use crate::model::{PermissionLevel, Principal, User};
use crate::secret::SecretStore;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const TOKEN_ISSUER: &str = "oset";

/// Default token lifetime: 30 days.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    pub uid: u64,
    pub level: PermissionLevel,
    pub uname: String,
    pub email: String,
    pub avatar: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    pub iss: String,
}

impl SessionClaims {
    pub fn principal(&self) -> Principal {
        Principal {
            subject_id: self.uid,
            permission_level: self.level,
            display_name: self.uname.clone(),
            email: self.email.clone(),
            avatar_ref: self.avatar.clone(),
        }
    }
}

pub struct SessionCodec {
    secret: Arc<SecretStore>,
    clock: SharedClock,
    ttl: Duration,
}

impl SessionCodec {
    pub fn new(secret: Arc<SecretStore>, clock: SharedClock) -> Self {
        Self::with_ttl(secret, clock, DEFAULT_TOKEN_TTL)
    }

    pub fn with_ttl(secret: Arc<SecretStore>, clock: SharedClock, ttl: Duration) -> Self {
        Self { secret, clock, ttl }
    }

    /// Sign a token for `user`, valid from now for the configured lifetime.
    pub fn issue(&self, user: &User) -> Result<String> {
        let now = self.clock.now_secs();
        let claims = SessionClaims {
            uid: user.uid,
            level: user.level,
            uname: user.uname.clone(),
            email: user.email.clone(),
            avatar: user.avatar.clone(),
            iat: now,
            exp: now.saturating_add(i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX)),
            nbf: None,
            iss: TOKEN_ISSUER.to_string(),
        };
        self.sign(&claims)
    }

    /// Sign arbitrary claims with the process key.
    pub fn sign(&self, claims: &SessionClaims) -> Result<String> {
        let key = EncodingKey::from_secret(self.secret.key()?);
        encode(&Header::new(Algorithm::HS256), claims, &key)
            .map_err(|e| AuthError::TokenUnhandled(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims> {
        let key = DecodingKey::from_secret(self.secret.key()?);

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.required_spec_claims.clear();

        let claims = decode::<SessionClaims>(token, &key, &validation)
            .map_err(|e| {
                debug!(error = %e, "session token rejected");
                classify(e.kind(), &e)
            })?
            .claims;

        let now = self.clock.now_secs();
        if claims.exp < now {
            return Err(AuthError::TokenExpired);
        }
        if claims.nbf.map(|nbf| nbf > now).unwrap_or(false) {
            return Err(AuthError::TokenNotYetValid);
        }
        Ok(claims)
    }

    pub async fn verify_async(&self, token: &str) -> Result<SessionClaims> {
        self.verify(token)
    }
}

fn classify(kind: &ErrorKind, err: &jsonwebtoken::errors::Error) -> AuthError {
    match kind {
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => AuthError::TokenMalformed,
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
        _ => AuthError::TokenUnhandled(err.to_string()),
    }
}
