#![forbid(unsafe_code)]
#![doc = r#"
Credgate

Two credential paths for an administrative backend: short-lived session tokens carried as
bearer tokens, and long-lived access-key/secret-key (AKSK) pairs used to HMAC-sign
service-to-service requests.

Crate highlights
- Session path: `SessionCodec` issues and verifies HS256 tokens signed with a lazily
  generated, persisted key (`SecretStore`); `ActiveFlagCache` rejects deactivated accounts.
- AKSK path: `AkskRegistry` derives, stores and caches key pairs; `ReplayWindow` bounds the
  declared request time; `SignatureValidator` recomputes the HMAC in constant time.
- `Gate` applies both protocols to an `http::HeaderMap` and maps failures to `Rejection`s.

Modules
- `store`: durable credential/user/config stores (memory, sled).
- `cache`: cache stores (memory, Redis via r2d2).
- `manager`: configuration from the environment and component wiring.
- `util`: tracing and env helpers.
"#]

pub mod active;
pub mod cache;
pub mod clock;
pub mod error;
pub mod gate;
pub mod manager;
pub mod model;
pub mod registry;
pub mod replay;
pub mod secret;
pub mod session;
pub mod signature;
pub mod store;
pub mod util;

pub use crate::active::ActiveFlagCache;
pub use crate::cache::{CacheStore, MemoryCache, RedisCache};
pub use crate::clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use crate::error::{AuthError, Result, StoreError, StoreResult};
pub use crate::gate::{Gate, Rejection, SignedRequest};
pub use crate::manager::{AuthConfig, CacheBackend, CredentialManager, DurableBackend, Stores};
pub use crate::model::{AccessCredential, PermissionLevel, Principal, User};
pub use crate::registry::AkskRegistry;
pub use crate::replay::ReplayWindow;
pub use crate::secret::SecretStore;
pub use crate::session::{SessionClaims, SessionCodec};
pub use crate::signature::SignatureValidator;
pub use crate::store::{
    ConfigStore, CredentialStore, MemoryConfigStore, MemoryCredentialStore, MemoryUserStore,
    SledStore, UserStore,
};
