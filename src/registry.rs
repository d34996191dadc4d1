/* credgate/src/registry.rs

Access-key/secret-key (AKSK) registry.

Key pair design:
- access_key = hex(SHA-256(be_u64(unix_now)))
- secret_key = hex(SHA-256(be_u64(unix_now) || access_key_hex))
  i.e. the same running hash continued with the access key text.
- Both are 64 lowercase hex chars. The secret is never regenerated on its
  own; rotation is delete + generate.
- Because the access key is a function of the issuing second, two pairs
  issued within the same second collide. The durable store rejects the
  second insert and the caller gets `AccessKeyCollision`.

Cache contract:
- Only the secret is cached, under "aksk:<access_key>".
- Entries expire at the credential's expire_at (or never when it is 0).
  The TTL is set in the same write as the value.
- Written after a successful durable insert and on read-through misses.
  Cache write failures are logged and otherwise ignored.
- update/delete do not touch the cache. A stale entry survives until its
  own expiry; for a never-expiring key that means until the cache drops it.
*/

use crate::cache::CacheStore;
use crate::clock::SharedClock;
use crate::error::{AuthError, Result, StoreError};
use crate::model::{AccessCredential, Principal};
use crate::store::CredentialStore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub struct AkskRegistry {
    store: Arc<dyn CredentialStore>,
    cache: Arc<dyn CacheStore>,
    clock: SharedClock,
}

impl AkskRegistry {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        cache: Arc<dyn CacheStore>,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
        }
    }

    fn log_store_latency(operation: &str, elapsed: Duration) {
        if elapsed >= Duration::from_millis(250) {
            warn!(
                duration_ms = elapsed.as_millis() as u64,
                "credential store {} latency", operation
            );
        } else if elapsed >= Duration::from_millis(50) {
            debug!(
                duration_ms = elapsed.as_millis() as u64,
                "credential store {} latency", operation
            );
        }
    }

    /// Cache `secret` until `expire_at` in a single write, so a cached
    /// secret never outlives its credential.
    fn cache_secret(&self, access_key: &str, secret: &str, expire_at: i64) {
        let ttl = if expire_at > 0 {
            let remaining = expire_at.saturating_sub(self.clock.now_secs());
            if remaining <= 0 {
                return;
            }
            Some(Duration::from_secs(remaining as u64))
        } else {
            None
        };
        if let Err(err) = self.cache.set(&cache_key(access_key), secret.as_bytes(), ttl) {
            warn!(access_key, error = %err, "failed to cache access key secret");
        }
    }

    // --------------------------
    // Key lifecycle
    // --------------------------

    /// Issue a new key pair for `owner_id`. A zero `ttl` never expires.
    pub fn generate(
        &self,
        owner_id: u64,
        ttl: Duration,
        description: &str,
    ) -> Result<AccessCredential> {
        let now = self.clock.now_secs();
        let (access_key, secret_key) = derive_key_pair(now);
        let expire_at = expire_at_for(now, ttl);

        let mut rec = AccessCredential {
            id: 0,
            access_key,
            secret_key,
            owner_id,
            expire_at,
            description: description.to_string(),
            created_at: now,
            updated_at: now,
        };

        let start = Instant::now();
        let inserted = self.store.insert(&rec);
        Self::log_store_latency("insert", start.elapsed());
        rec.id = match inserted {
            Ok(id) => id,
            Err(StoreError::Conflict(msg)) => return Err(AuthError::AccessKeyCollision(msg)),
            Err(err) => return Err(err.into()),
        };

        self.cache_secret(&rec.access_key, &rec.secret_key, rec.expire_at);
        info!(
            owner_id,
            id = rec.id,
            expire_at = rec.expire_at,
            "generated access key pair"
        );
        Ok(rec)
    }

    /// Resolve the secret for `access_key`, cache first.
    pub fn lookup_secret(&self, access_key: &str) -> Result<String> {
        match self.cache.get(&cache_key(access_key)) {
            Ok(Some(bytes)) => match String::from_utf8(bytes) {
                Ok(secret) => return Ok(secret),
                Err(_) => warn!(access_key, "cached secret is not utf-8, reloading"),
            },
            Ok(None) => {}
            Err(err) => warn!(access_key, error = %err, "cache read failed, using store"),
        }

        let start = Instant::now();
        let row = self.store.find_secret(access_key);
        Self::log_store_latency("find_secret", start.elapsed());
        let row = row?.ok_or(AuthError::NotFound)?;

        let now = self.clock.now_secs();
        if row.is_expired_at(now) {
            debug!(
                access_key,
                owner_id = row.owner_id,
                expire_at = row.expire_at,
                now,
                "access key expired"
            );
            return Err(AuthError::Expired);
        }

        self.cache_secret(access_key, &row.secret_key, row.expire_at);
        Ok(row.secret_key)
    }

    /// Replace description and expiry. Returns the new expire_at.
    pub fn update(&self, id: u64, description: &str, ttl: Duration) -> Result<i64> {
        let now = self.clock.now_secs();
        let expire_at = expire_at_for(now, ttl);

        let start = Instant::now();
        let updated = self.store.update(id, description, expire_at, now);
        Self::log_store_latency("update", start.elapsed());
        if !updated? {
            return Err(AuthError::NotFound);
        }
        info!(id, expire_at, "updated access key pair");
        Ok(expire_at)
    }

    /// Remove the durable record. Returns false when `id` was unknown.
    pub fn delete(&self, id: u64) -> Result<bool> {
        let start = Instant::now();
        let removed = self.store.delete(id);
        Self::log_store_latency("delete", start.elapsed());
        let removed = removed?;
        if removed {
            info!(id, "deleted access key pair");
        }
        Ok(removed)
    }

    pub fn get(&self, id: u64) -> Result<Option<AccessCredential>> {
        Ok(self.store.get(id)?)
    }

    pub fn list_for_owner(&self, owner_id: u64) -> Result<Vec<AccessCredential>> {
        Ok(self.store.list_by_owner(owner_id)?)
    }

    // --------------------------
    // Administrative entry points
    // --------------------------

    pub fn generate_as(
        &self,
        actor: &Principal,
        owner_id: u64,
        ttl: Duration,
        description: &str,
    ) -> Result<AccessCredential> {
        require_admin(actor)?;
        self.generate(owner_id, ttl, description)
    }

    pub fn update_as(
        &self,
        actor: &Principal,
        id: u64,
        description: &str,
        ttl: Duration,
    ) -> Result<i64> {
        require_admin(actor)?;
        self.update(id, description, ttl)
    }

    pub fn delete_as(&self, actor: &Principal, id: u64) -> Result<bool> {
        require_admin(actor)?;
        self.delete(id)
    }

    // --------------------------
    // Async wrappers
    // --------------------------

    pub async fn generate_async(
        &self,
        owner_id: u64,
        ttl: Duration,
        description: &str,
    ) -> Result<AccessCredential> {
        self.generate(owner_id, ttl, description)
    }

    pub async fn lookup_secret_async(&self, access_key: &str) -> Result<String> {
        self.lookup_secret(access_key)
    }

    pub async fn update_async(&self, id: u64, description: &str, ttl: Duration) -> Result<i64> {
        self.update(id, description, ttl)
    }

    pub async fn delete_async(&self, id: u64) -> Result<bool> {
        self.delete(id)
    }
}

fn require_admin(actor: &Principal) -> Result<()> {
    if actor.is_admin() {
        Ok(())
    } else {
        warn!(
            subject_id = actor.subject_id,
            "non-admin attempted access key administration"
        );
        Err(AuthError::InsufficientPermission)
    }
}

pub fn cache_key(access_key: &str) -> String {
    format!("aksk:{access_key}")
}

/// Derive the key pair issued at `unix_secs`.
pub fn derive_key_pair(unix_secs: i64) -> (String, String) {
    let mut hasher = Sha256::new();
    hasher.update((unix_secs as u64).to_be_bytes());
    let access_key = hex::encode(hasher.clone().finalize());
    hasher.update(access_key.as_bytes());
    let secret_key = hex::encode(hasher.finalize());
    (access_key, secret_key)
}

/// `now + ttl`, or 0 (never) for a zero ttl.
pub fn expire_at_for(now: i64, ttl: Duration) -> i64 {
    let secs = ttl.as_secs();
    if secs > 0 {
        now.saturating_add(secs as i64)
    } else {
        0
    }
}

// ==============================
// Tests
// ==============================
