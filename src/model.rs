//! Records shared between the credential components and their stores.

use serde::{Deserialize, Serialize};

/// Permission level carried in session claims. Ordered: `Normal < Admin`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(into = "u8", try_from = "u8")]
pub enum PermissionLevel {
    #[default]
    Normal,
    Admin,
}

impl From<PermissionLevel> for u8 {
    fn from(level: PermissionLevel) -> Self {
        match level {
            PermissionLevel::Normal => 0,
            PermissionLevel::Admin => 1,
        }
    }
}

impl TryFrom<u8> for PermissionLevel {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(PermissionLevel::Normal),
            1 => Ok(PermissionLevel::Admin),
            other => Err(format!("unknown permission level {other}")),
        }
    }
}

/// The user fields the credential subsystem reads. Passwords and the rest of
/// the account record live with the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub uid: u64,
    pub level: PermissionLevel,
    pub uname: String,
    pub email: String,
    pub avatar: String,
    #[serde(default)]
    pub activated: bool,
}

/// An access-key/secret-key pair and its bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessCredential {
    /// Durable row id assigned by the store on insert.
    pub id: u64,
    pub access_key: String,
    pub secret_key: String,
    /// Application the key pair authorizes.
    pub owner_id: u64,
    /// Unix seconds; `0` means the pair never expires.
    pub expire_at: i64,
    #[serde(default)]
    pub description: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl AccessCredential {
    pub fn is_expired_at(&self, now: i64) -> bool {
        expired(self.expire_at, now)
    }
}

/// Projection the signature path reads from the durable store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRow {
    pub secret_key: String,
    pub owner_id: u64,
    pub expire_at: i64,
}

impl SecretRow {
    pub fn is_expired_at(&self, now: i64) -> bool {
        expired(self.expire_at, now)
    }
}

impl From<&AccessCredential> for SecretRow {
    fn from(rec: &AccessCredential) -> Self {
        Self {
            secret_key: rec.secret_key.clone(),
            owner_id: rec.owner_id,
            expire_at: rec.expire_at,
        }
    }
}

fn expired(expire_at: i64, now: i64) -> bool {
    expire_at > 0 && now >= expire_at
}

/// Identity handed to business logic once a bearer token is admitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub subject_id: u64,
    pub permission_level: PermissionLevel,
    pub display_name: String,
    pub email: String,
    pub avatar_ref: String,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.permission_level >= PermissionLevel::Admin
    }
}
