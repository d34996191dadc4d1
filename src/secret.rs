//! Process-wide session signing key.
//!
//! The key is read from the configuration store under [`JWT_KEY_SETTING`].
//! When absent it is generated once (SHA-256 over 256 random bytes, hex
//! encoded), persisted, and memoized. Concurrent first callers block on the
//! same initialization and all observe the single generated key.

use crate::error::{AuthError, Result};
use crate::store::ConfigStore;
use once_cell::sync::OnceCell;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};

pub const JWT_KEY_SETTING: &str = "sys.jwt_key";

const SEED_BYTES: usize = 256;

pub struct SecretStore {
    config: Arc<dyn ConfigStore>,
    key: OnceCell<Vec<u8>>,
}

impl SecretStore {
    pub fn new(config: Arc<dyn ConfigStore>) -> Self {
        Self {
            config,
            key: OnceCell::new(),
        }
    }

    /// Signing key bytes, initializing on first use.
    pub fn key(&self) -> Result<&[u8]> {
        self.key
            .get_or_try_init(|| self.load_or_generate())
            .map(|k| k.as_slice())
    }

    fn load_or_generate(&self) -> Result<Vec<u8>> {
        if let Some(existing) = self.config.get(JWT_KEY_SETTING)? {
            if !existing.is_empty() {
                debug!("session signing key loaded from configuration");
                return Ok(existing.into_bytes());
            }
        }

        let mut seed = vec![0u8; SEED_BYTES];
        OsRng.fill_bytes(&mut seed);
        let key_hex = hex::encode(Sha256::digest(&seed));

        self.config
            .set(JWT_KEY_SETTING, &key_hex)
            .map_err(|e| AuthError::Infrastructure(format!("persist signing key: {e}")))?;
        info!("generated new session signing key");
        Ok(key_hex.into_bytes())
    }
}
