//! Credential Manager
//!
//! Reads configuration, opens the selected backends and wires the credential
//! components together behind one handle.

use crate::active::{ActiveFlagCache, DEFAULT_ACTIVE_TTL};
use crate::cache::{CacheStore, MemoryCache, RedisCache};
use crate::clock::{system_clock, SharedClock};
use crate::error::{Result, StoreResult};
use crate::gate::Gate;
use crate::registry::AkskRegistry;
use crate::replay::{ReplayWindow, DEFAULT_MAX_FUTURE, DEFAULT_MAX_PAST};
use crate::secret::SecretStore;
use crate::session::{SessionCodec, DEFAULT_TOKEN_TTL};
use crate::signature::SignatureValidator;
use crate::store::{
    ConfigStore, CredentialStore, MemoryConfigStore, MemoryCredentialStore, MemoryUserStore,
    SledStore, UserStore,
};
use crate::util::{env_string, env_u64};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_SLED_PATH: &str = "./data/credgate.db";
pub const DEFAULT_REDIS_POOL_MAX: u32 = 16;

/// Where durable records live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DurableBackend {
    Sled { path: PathBuf },
    Memory,
}

impl DurableBackend {
    /// Parse a backend spec:
    /// - "sled:<path>" → sled database at path
    /// - "memory"      → in-memory tables
    pub fn from_spec(spec: &str) -> Option<Self> {
        let spec = spec.trim();
        if let Some(rest) = spec.strip_prefix("sled:") {
            if rest.is_empty() {
                return None;
            }
            return Some(DurableBackend::Sled {
                path: PathBuf::from(rest),
            });
        }
        if spec.eq_ignore_ascii_case("memory") {
            return Some(DurableBackend::Memory);
        }
        None
    }
}

/// Where cached secrets and active flags live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    Redis { url: String, pool_max: u32 },
    Memory,
}

impl CacheBackend {
    /// Parse a backend spec:
    /// - "redis://..." / "rediss://..." → Redis at URL
    /// - "memory"                        → in-process cache
    pub fn from_spec(spec: &str) -> Option<Self> {
        let spec = spec.trim();
        if spec.starts_with("redis://") || spec.starts_with("rediss://") {
            return Some(CacheBackend::Redis {
                url: spec.to_string(),
                pool_max: DEFAULT_REDIS_POOL_MAX,
            });
        }
        if spec.eq_ignore_ascii_case("memory") {
            return Some(CacheBackend::Memory);
        }
        None
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub durable: DurableBackend,
    pub cache: CacheBackend,
    pub token_ttl: Duration,
    pub replay_max_past: Duration,
    pub replay_max_future: Duration,
    pub active_ttl: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            durable: DurableBackend::Sled {
                path: PathBuf::from(DEFAULT_SLED_PATH),
            },
            cache: CacheBackend::Memory,
            token_ttl: DEFAULT_TOKEN_TTL,
            replay_max_past: DEFAULT_MAX_PAST,
            replay_max_future: DEFAULT_MAX_FUTURE,
            active_ttl: DEFAULT_ACTIVE_TTL,
        }
    }
}

impl AuthConfig {
    /// Load configuration from environment variables.
    ///
    /// - CREDGATE_STORE = sled:<path> | memory
    /// - CREDGATE_SLED_PATH = <path> (used when CREDGATE_STORE is unset)
    /// - CREDGATE_REDIS_URL = redis://host/ (selects the Redis cache)
    /// - CREDGATE_REDIS_POOL_MAX = <u32>
    /// - CREDGATE_TOKEN_TTL_DAYS = <u64>
    /// - CREDGATE_REPLAY_MAX_PAST_SECONDS / CREDGATE_REPLAY_MAX_FUTURE_SECONDS
    /// - CREDGATE_ACTIVE_TTL_SECONDS = <u64>
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let durable = env_string("CREDGATE_STORE")
            .and_then(|s| DurableBackend::from_spec(&s))
            .or_else(|| {
                env_string("CREDGATE_SLED_PATH").map(|p| DurableBackend::Sled {
                    path: PathBuf::from(p),
                })
            })
            .unwrap_or(defaults.durable);

        let pool_max = env_u64("CREDGATE_REDIS_POOL_MAX")
            .map(|n| n.clamp(1, u32::MAX as u64) as u32)
            .unwrap_or(DEFAULT_REDIS_POOL_MAX);
        let cache = match env_string("CREDGATE_REDIS_URL").and_then(|s| CacheBackend::from_spec(&s))
        {
            Some(CacheBackend::Redis { url, .. }) => CacheBackend::Redis { url, pool_max },
            _ => defaults.cache,
        };

        let token_ttl = env_u64("CREDGATE_TOKEN_TTL_DAYS")
            .and_then(ttl_from_days)
            .unwrap_or(defaults.token_ttl);
        let replay_max_past = env_u64("CREDGATE_REPLAY_MAX_PAST_SECONDS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.replay_max_past);
        let replay_max_future = env_u64("CREDGATE_REPLAY_MAX_FUTURE_SECONDS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.replay_max_future);
        let active_ttl = env_u64("CREDGATE_ACTIVE_TTL_SECONDS")
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.active_ttl);

        Self {
            durable,
            cache,
            token_ttl,
            replay_max_past,
            replay_max_future,
            active_ttl,
        }
    }
}

/// Whole days as a TTL; zero or an overflowing count is no TTL.
fn ttl_from_days(days: u64) -> Option<Duration> {
    if days == 0 {
        return None;
    }
    days.checked_mul(24 * 60 * 60).map(Duration::from_secs)
}

/// The four store seams the components depend on.
#[derive(Clone)]
pub struct Stores {
    pub credentials: Arc<dyn CredentialStore>,
    pub users: Arc<dyn UserStore>,
    pub config: Arc<dyn ConfigStore>,
    pub cache: Arc<dyn CacheStore>,
}

impl Stores {
    pub fn open(config: &AuthConfig, clock: SharedClock) -> StoreResult<Self> {
        let cache: Arc<dyn CacheStore> = match &config.cache {
            CacheBackend::Redis { url, pool_max } => {
                Arc::new(RedisCache::connect_url(url, *pool_max)?)
            }
            CacheBackend::Memory => Arc::new(MemoryCache::new(clock)),
        };

        match &config.durable {
            DurableBackend::Sled { path } => {
                let sled = Arc::new(SledStore::open_path(path.clone())?);
                Ok(Self {
                    credentials: sled.clone(),
                    users: sled.clone(),
                    config: sled,
                    cache,
                })
            }
            DurableBackend::Memory => Ok(Self {
                credentials: Arc::new(MemoryCredentialStore::new()),
                users: Arc::new(MemoryUserStore::new()),
                config: Arc::new(MemoryConfigStore::new()),
                cache,
            }),
        }
    }
}

pub struct CredentialManager {
    secret: Arc<SecretStore>,
    codec: Arc<SessionCodec>,
    registry: Arc<AkskRegistry>,
    validator: Arc<SignatureValidator>,
    window: Arc<ReplayWindow>,
    active: Arc<ActiveFlagCache>,
    gate: Gate,
}

impl CredentialManager {
    /// Open backends from `config` against the system clock.
    ///
    /// The session signing key is initialized here so that a broken
    /// configuration store fails startup rather than the first request.
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let clock = system_clock();
        let stores = Stores::open(config, clock.clone())?;
        let manager = Self::from_parts(stores, clock, config);
        manager.secret.key()?;
        let redis_cache = matches!(config.cache, CacheBackend::Redis { .. });
        info!(durable = ?config.durable, redis_cache, "credential manager ready");
        Ok(manager)
    }

    pub fn from_parts(stores: Stores, clock: SharedClock, config: &AuthConfig) -> Self {
        let secret = Arc::new(SecretStore::new(stores.config));
        let codec = Arc::new(SessionCodec::with_ttl(
            secret.clone(),
            clock.clone(),
            config.token_ttl,
        ));
        let registry = Arc::new(AkskRegistry::new(
            stores.credentials,
            stores.cache.clone(),
            clock.clone(),
        ));
        let validator = Arc::new(SignatureValidator::new(registry.clone()));
        let window = Arc::new(ReplayWindow::with_bounds(
            clock,
            config.replay_max_past,
            config.replay_max_future,
        ));
        let active = Arc::new(ActiveFlagCache::with_ttl(
            stores.users,
            stores.cache,
            config.active_ttl,
        ));
        let gate = Gate::new(
            codec.clone(),
            active.clone(),
            window.clone(),
            validator.clone(),
        );
        Self {
            secret,
            codec,
            registry,
            validator,
            window,
            active,
            gate,
        }
    }

    pub fn secret(&self) -> &SecretStore {
        &self.secret
    }

    pub fn codec(&self) -> &SessionCodec {
        &self.codec
    }

    pub fn registry(&self) -> &AkskRegistry {
        &self.registry
    }

    pub fn validator(&self) -> &SignatureValidator {
        &self.validator
    }

    pub fn window(&self) -> &ReplayWindow {
        &self.window
    }

    pub fn active(&self) -> &ActiveFlagCache {
        &self.active
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durable_specs() {
        assert_eq!(
            DurableBackend::from_spec("sled:/var/lib/credgate"),
            Some(DurableBackend::Sled {
                path: PathBuf::from("/var/lib/credgate")
            })
        );
        assert_eq!(DurableBackend::from_spec("MEMORY"), Some(DurableBackend::Memory));
        assert_eq!(DurableBackend::from_spec("sled:"), None);
        assert_eq!(DurableBackend::from_spec("postgres://x"), None);
    }

    #[test]
    fn cache_specs() {
        assert_eq!(
            CacheBackend::from_spec("redis://127.0.0.1/"),
            Some(CacheBackend::Redis {
                url: "redis://127.0.0.1/".into(),
                pool_max: DEFAULT_REDIS_POOL_MAX
            })
        );
        assert_eq!(CacheBackend::from_spec("memory"), Some(CacheBackend::Memory));
        assert_eq!(CacheBackend::from_spec("memcached://x"), None);
    }

    #[test]
    fn defaults_match_protocol_constants() {
        let cfg = AuthConfig::default();
        assert_eq!(cfg.token_ttl, Duration::from_secs(30 * 24 * 3600));
        assert_eq!(cfg.replay_max_past, Duration::from_secs(300));
        assert_eq!(cfg.replay_max_future, Duration::from_secs(60));
        assert_eq!(cfg.active_ttl, Duration::from_secs(60));
        assert_eq!(cfg.cache, CacheBackend::Memory);
    }

    #[test]
    fn token_ttl_days() {
        assert_eq!(ttl_from_days(7), Some(Duration::from_secs(7 * 86_400)));
        assert_eq!(ttl_from_days(0), None);
        assert_eq!(ttl_from_days(u64::MAX), None);
        assert_eq!(ttl_from_days(u64::MAX / 86_400 + 1), None);
        assert!(ttl_from_days(u64::MAX / 86_400).is_some());
    }

    #[test]
    fn sled_manager_persists_signing_key() {
        let dir = tempfile::tempdir().unwrap();
        let sled = Arc::new(SledStore::open_path(dir.path().join("credgate.db")).unwrap());
        let stores = || Stores {
            credentials: sled.clone(),
            users: sled.clone(),
            config: sled.clone(),
            cache: Arc::new(MemoryCache::new(system_clock())),
        };
        let cfg = AuthConfig::default();

        let first = CredentialManager::from_parts(stores(), system_clock(), &cfg);
        let key = first.secret().key().unwrap().to_vec();
        drop(first);

        // a fresh manager has no memoized key and must read it back
        let second = CredentialManager::from_parts(stores(), system_clock(), &cfg);
        assert_eq!(second.secret().key().unwrap(), key.as_slice());
    }
}
