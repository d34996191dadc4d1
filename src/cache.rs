//! Cache store seam and its backends.
//!
//! The cache is a read-through optimization in front of the durable store,
//! never a source of truth. Values are opaque bytes; TTLs are either relative
//! (`set` with a duration) or absolute (`expire_at` with a unix second).
//!
//! - [`MemoryCache`]: in-process map with clock-driven expiry.
//! - [`RedisCache`]: Redis through an r2d2 connection pool.

use crate::clock::SharedClock;
use crate::error::{StoreError, StoreResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;
    /// Store `value`; `ttl == None` keeps it until explicitly expired.
    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()>;
    /// Expire `key` at the given unix second. Returns false when the key is
    /// absent. A timestamp in the past removes the entry.
    fn expire_at(&self, key: &str, unix_secs: i64) -> StoreResult<bool>;
    fn delete(&self, key: &str) -> StoreResult<bool>;
}

// ==============================
// In-memory cache
// ==============================

struct Entry {
    value: Vec<u8>,
    expires_at: Option<i64>,
}

impl Entry {
    fn live_at(&self, now: i64) -> bool {
        self.expires_at.map(|e| now < e).unwrap_or(true)
    }
}

pub struct MemoryCache {
    clock: SharedClock,
    entries: RwLock<HashMap<String, Entry>>,
    fail_writes: AtomicBool,
}

impl MemoryCache {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            entries: RwLock::new(HashMap::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Drop every entry, live or not.
    pub fn clear(&self) {
        if let Ok(mut map) = self.entries.write() {
            map.clear();
        }
    }

    /// Number of entries that have not expired yet.
    pub fn live_len(&self) -> usize {
        let now = self.clock.now_secs();
        self.entries
            .read()
            .map(|map| map.values().filter(|e| e.live_at(now)).count())
            .unwrap_or(0)
    }

    /// Absolute expiry of a live entry: `Some(None)` for entries without TTL.
    pub fn expiry_of(&self, key: &str) -> Option<Option<i64>> {
        let now = self.clock.now_secs();
        let map = self.entries.read().ok()?;
        map.get(key).filter(|e| e.live_at(now)).map(|e| e.expires_at)
    }

    /// Make every subsequent write fail, simulating an unreachable cache.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Storage("cache unavailable".into()));
        }
        Ok(())
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let now = self.clock.now_secs();
        let mut map = self
            .entries
            .write()
            .map_err(|e| StoreError::Storage(format!("Lock error: {}", e)))?;
        match map.get(key) {
            Some(entry) if entry.live_at(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                map.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        self.check_writable()?;
        let now = self.clock.now_secs();
        let expires_at = ttl.map(|d| now.saturating_add(d.as_secs() as i64));
        let mut map = self
            .entries
            .write()
            .map_err(|e| StoreError::Storage(format!("Lock error: {}", e)))?;
        // lapsed entries go on every write so the map stays bounded by live keys
        map.retain(|_, e| e.live_at(now));
        map.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    fn expire_at(&self, key: &str, unix_secs: i64) -> StoreResult<bool> {
        self.check_writable()?;
        let now = self.clock.now_secs();
        let mut map = self
            .entries
            .write()
            .map_err(|e| StoreError::Storage(format!("Lock error: {}", e)))?;
        match map.get_mut(key) {
            Some(entry) if entry.live_at(now) => {
                entry.expires_at = Some(unix_secs);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut map = self
            .entries
            .write()
            .map_err(|e| StoreError::Storage(format!("Lock error: {}", e)))?;
        Ok(map.remove(key).is_some())
    }
}

// ==============================
// Redis cache
// ==============================

pub struct RedisConnectionManager {
    client: redis::Client,
}

impl r2d2::ManageConnection for RedisConnectionManager {
    type Connection = redis::Connection;
    type Error = redis::RedisError;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        self.client.get_connection()
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        let _: String = redis::cmd("PING").query(conn)?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

pub struct RedisCache {
    pool: r2d2::Pool<RedisConnectionManager>,
    key_ns: String,
}

impl RedisCache {
    pub fn connect_url(url: &str, pool_max: u32) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let manager = RedisConnectionManager { client };
        let pool = r2d2::Pool::builder().max_size(pool_max).build(manager)?;
        Ok(Self {
            pool,
            key_ns: "credgate:".to_string(),
        })
    }

    fn key_for(&self, key: &str) -> String {
        format!("{}{}", self.key_ns, key)
    }
}

impl CacheStore for RedisCache {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.pool.get()?;
        let val: Option<Vec<u8>> = redis::cmd("GET")
            .arg(self.key_for(key))
            .query(&mut *conn)?;
        Ok(val)
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.pool.get()?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key_for(key)).arg(value);
        if let Some(d) = ttl {
            cmd.arg("EX").arg(d.as_secs().max(1));
        }
        let _: () = cmd.query(&mut *conn)?;
        Ok(())
    }

    fn expire_at(&self, key: &str, unix_secs: i64) -> StoreResult<bool> {
        let mut conn = self.pool.get()?;
        let n: i64 = redis::cmd("EXPIREAT")
            .arg(self.key_for(key))
            .arg(unix_secs)
            .query(&mut *conn)?;
        Ok(n > 0)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.pool.get()?;
        let n: i64 = redis::cmd("DEL").arg(self.key_for(key)).query(&mut *conn)?;
        Ok(n > 0)
    }
}
