//! Cached "account active" flag for the session path.
//!
//! The flag mirrors the durable `activated` column of a user. It is cached
//! under `active:<uid>` as `"1"` or `"0"` for a short TTL so that a
//! deactivated account stops being admitted within that TTL without a store
//! read on every request.

use crate::cache::CacheStore;
use crate::error::Result;
use crate::store::UserStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_ACTIVE_TTL: Duration = Duration::from_secs(60);

pub struct ActiveFlagCache {
    users: Arc<dyn UserStore>,
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl ActiveFlagCache {
    pub fn new(users: Arc<dyn UserStore>, cache: Arc<dyn CacheStore>) -> Self {
        Self::with_ttl(users, cache, DEFAULT_ACTIVE_TTL)
    }

    pub fn with_ttl(users: Arc<dyn UserStore>, cache: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { users, cache, ttl }
    }

    /// Whether `subject_id` may be admitted. Unknown users are inactive.
    pub fn is_active(&self, subject_id: u64) -> Result<bool> {
        let key = cache_key(subject_id);
        match self.cache.get(&key) {
            Ok(Some(bytes)) => match bytes.as_slice() {
                b"1" => return Ok(true),
                b"0" => return Ok(false),
                _ => warn!(subject_id, "unexpected cached active flag, reloading"),
            },
            Ok(None) => {}
            Err(err) => warn!(subject_id, error = %err, "cache read failed, using store"),
        }

        let active = self.users.activated(subject_id)?.unwrap_or(false);
        let value: &[u8] = if active { b"1" } else { b"0" };
        if let Err(err) = self.cache.set(&key, value, Some(self.ttl)) {
            warn!(subject_id, error = %err, "failed to cache active flag");
        }
        Ok(active)
    }

    pub async fn is_active_async(&self, subject_id: u64) -> Result<bool> {
        self.is_active(subject_id)
    }
}

pub fn cache_key(subject_id: u64) -> String {
    format!("active:{subject_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::clock::ManualClock;
    use crate::error::{AuthError, StoreError, StoreResult};
    use crate::model::{PermissionLevel, User};
    use crate::store::MemoryUserStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingUsers {
        inner: MemoryUserStore,
        reads: AtomicUsize,
    }

    impl UserStore for CountingUsers {
        fn activated(&self, uid: u64) -> StoreResult<Option<bool>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.activated(uid)
        }
    }

    struct BrokenUsers;

    impl UserStore for BrokenUsers {
        fn activated(&self, _uid: u64) -> StoreResult<Option<bool>> {
            Err(StoreError::Storage("connection refused".into()))
        }
    }

    fn user(uid: u64, activated: bool) -> User {
        User {
            uid,
            level: PermissionLevel::Normal,
            uname: format!("u{uid}"),
            email: format!("u{uid}@example.com"),
            avatar: String::new(),
            activated,
        }
    }

    #[test]
    fn read_through_then_cached_for_ttl() {
        let clock = ManualClock::new(0);
        let users = Arc::new(CountingUsers::default());
        users.inner.put_user(&user(1, true)).unwrap();
        let cache = Arc::new(MemoryCache::new(Arc::new(clock.clone())));
        let flags = ActiveFlagCache::new(users.clone(), cache.clone());

        assert!(flags.is_active(1).unwrap());
        assert!(flags.is_active(1).unwrap());
        assert_eq!(users.reads.load(Ordering::SeqCst), 1);

        // deactivation is seen once the cached flag lapses
        users.inner.put_user(&user(1, false)).unwrap();
        assert!(flags.is_active(1).unwrap());
        clock.advance(60);
        assert!(!flags.is_active(1).unwrap());
        assert_eq!(users.reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cached_false_is_not_a_miss() {
        let clock = ManualClock::new(0);
        let users = Arc::new(CountingUsers::default());
        users.inner.put_user(&user(2, false)).unwrap();
        let cache = Arc::new(MemoryCache::new(Arc::new(clock)));
        let flags = ActiveFlagCache::new(users.clone(), cache);

        assert!(!flags.is_active(2).unwrap());
        assert!(!flags.is_active(2).unwrap());
        assert_eq!(users.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_user_is_inactive() {
        let clock = ManualClock::new(0);
        let flags = ActiveFlagCache::new(
            Arc::new(MemoryUserStore::new()),
            Arc::new(MemoryCache::new(Arc::new(clock))),
        );
        assert!(!flags.is_active(404).unwrap());
    }

    #[test]
    fn store_fault_is_infrastructure() {
        let clock = ManualClock::new(0);
        let flags = ActiveFlagCache::new(
            Arc::new(BrokenUsers),
            Arc::new(MemoryCache::new(Arc::new(clock))),
        );
        match flags.is_active(1) {
            Err(err @ AuthError::Infrastructure(_)) => assert!(err.is_infrastructure()),
            other => panic!("expected infrastructure error, got {:?}", other),
        }
    }
}
