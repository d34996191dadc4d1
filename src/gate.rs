/* credgate/src/gate.rs

Framework-agnostic front door for the two inbound credential protocols.

Bearer session:
- Authorization: Bearer <token>
- Header problems are rejected before the codec runs.
- Session failures keep their status code (malformed/expired/not-yet-valid/
  unhandled); an inactive account is a plain unauthorized.

AKSK-signed request:
- x-auth-accesskey, x-auth-signature, x-auth-timestamp, x-auth-content
- All four are required. Timestamp window first, then signature.
- Every failure on this path is the same uncoded unauthorized, so callers
  cannot tell a stale timestamp from an unknown key or a wrong signature.

Store and configuration faults become `Rejection::Internal` and are logged
here; their detail never reaches the caller.
*/

use crate::active::ActiveFlagCache;
use crate::error::{AuthError, STATUS_TOKEN_MALFORMED, STATUS_TOKEN_UNHANDLED};
use crate::model::Principal;
use crate::replay::ReplayWindow;
use crate::session::SessionCodec;
use crate::signature::SignatureValidator;
use http::header::AUTHORIZATION;
use http::{HeaderMap, StatusCode};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};

pub const HEADER_ACCESS_KEY: &str = "x-auth-accesskey";
pub const HEADER_SIGNATURE: &str = "x-auth-signature";
pub const HEADER_TIMESTAMP: &str = "x-auth-timestamp";
pub const HEADER_CONTENT: &str = "x-auth-content";

const UNAUTHORIZED_MSG: &str = "unauthorized";

// ==============================
// Outcomes
// ==============================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Unauthorized { code: Option<u16>, message: String },
    Internal,
}

impl Rejection {
    fn unauthorized() -> Self {
        Rejection::Unauthorized {
            code: None,
            message: UNAUTHORIZED_MSG.to_string(),
        }
    }

    fn session(err: &AuthError) -> Self {
        let code = err.session_code();
        let message = match code {
            Some(STATUS_TOKEN_UNHANDLED) => {
                format!("[{}]{}", STATUS_TOKEN_UNHANDLED, UNAUTHORIZED_MSG)
            }
            _ => UNAUTHORIZED_MSG.to_string(),
        };
        Rejection::Unauthorized { code, message }
    }

    /// AKSK-path outcome: store faults are internal, everything else is the
    /// same uncoded unauthorized.
    fn signed(err: &AuthError) -> Self {
        if err.is_infrastructure() {
            Rejection::Internal
        } else {
            Rejection::unauthorized()
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Rejection::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON body for the caller: `{"code": ..., "msg": ...}`.
    pub fn body(&self) -> serde_json::Value {
        match self {
            Rejection::Unauthorized {
                code: Some(code),
                message,
            } => json!({ "code": code, "msg": message }),
            Rejection::Unauthorized {
                code: None,
                message,
            } => json!({ "msg": message }),
            Rejection::Internal => json!({ "msg": "authentication failed, unhandled error" }),
        }
    }
}

/// A request admitted on the AKSK path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub access_key: String,
    pub timestamp: i64,
    pub content: String,
}

// ==============================
// Gate
// ==============================

pub struct Gate {
    codec: Arc<SessionCodec>,
    active: Arc<ActiveFlagCache>,
    window: Arc<ReplayWindow>,
    validator: Arc<SignatureValidator>,
}

impl Gate {
    pub fn new(
        codec: Arc<SessionCodec>,
        active: Arc<ActiveFlagCache>,
        window: Arc<ReplayWindow>,
        validator: Arc<SignatureValidator>,
    ) -> Self {
        Self {
            codec,
            active,
            window,
            validator,
        }
    }

    pub fn authenticate_bearer(&self, headers: &HeaderMap) -> Result<Principal, Rejection> {
        let raw = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        let Some(token) = bearer_token(raw) else {
            return Err(Rejection::Unauthorized {
                code: Some(STATUS_TOKEN_MALFORMED),
                message: UNAUTHORIZED_MSG.to_string(),
            });
        };

        let claims = match self.codec.verify(token) {
            Ok(claims) => claims,
            Err(err) if err.is_infrastructure() => {
                error!(error = %err, "session verification failed");
                return Err(Rejection::Internal);
            }
            Err(err) => {
                debug!(error = %err, "session token rejected");
                return Err(Rejection::session(&err));
            }
        };

        match self.active.is_active(claims.uid) {
            Ok(true) => Ok(claims.principal()),
            Ok(false) => {
                debug!(subject_id = claims.uid, "inactive account rejected");
                Err(Rejection::unauthorized())
            }
            Err(err) => {
                error!(subject_id = claims.uid, error = %err, "active flag lookup failed");
                Err(Rejection::Internal)
            }
        }
    }

    pub fn authenticate_signed(&self, headers: &HeaderMap) -> Result<SignedRequest, Rejection> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .filter(|s| !s.is_empty())
        };
        let (Some(access_key), Some(signature), Some(timestamp), Some(content)) = (
            header(HEADER_ACCESS_KEY),
            header(HEADER_SIGNATURE),
            header(HEADER_TIMESTAMP),
            header(HEADER_CONTENT),
        ) else {
            return Err(Rejection::unauthorized());
        };

        // A junk timestamp is a client error like any other bad header, so it
        // gets the plain unauthorized rather than a 500.
        let Ok(timestamp) = timestamp.trim().parse::<i64>() else {
            debug!(access_key, "unparseable request timestamp");
            return Err(Rejection::unauthorized());
        };

        let checked = self
            .window
            .check(timestamp)
            .and_then(|_| self.validator.validate(access_key, signature, content));
        match checked {
            Ok(()) => Ok(SignedRequest {
                access_key: access_key.to_string(),
                timestamp,
                content: content.to_string(),
            }),
            Err(err) => {
                if err.is_infrastructure() {
                    error!(access_key, error = %err, "signed request validation failed");
                } else {
                    debug!(access_key, error = %err, "signed request rejected");
                }
                Err(Rejection::signed(&err))
            }
        }
    }
}

/// Extract the token from an `Authorization` header value.
pub fn bearer_token(auth_header: Option<&str>) -> Option<&str> {
    let s = auth_header?.trim();
    if s.len() < 7 || !s.is_char_boundary(6) {
        return None;
    }
    let (scheme, rest) = s.split_at(6);
    if !scheme.eq_ignore_ascii_case("bearer")
        || !rest.starts_with(|c: char| c.is_ascii_whitespace())
    {
        return None;
    }
    let t = rest.trim();
    if t.is_empty() {
        return None;
    }
    Some(t)
}
