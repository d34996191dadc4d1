/* credgate/src/store.rs

Durable storage seams for the credential subsystem.

- CredentialStore: access-key records, keyed by row id, unique on access_key,
  indexed by owner_id.
- UserStore: read-only view of the user "activated" column.
- ConfigStore: string settings that must survive restarts (the session
  signing key lives here).

Backends:
- sled (embedded, default durable backend)
- in-memory (tests and throwaway deployments)
*/

use crate::error::{StoreError, StoreResult};
use crate::model::{AccessCredential, SecretRow, User};
use sled::transaction::{abort, TransactionError, TransactionResult};
use sled::Transactional;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::RwLock;

// ==============================
// Storage traits
// ==============================

pub trait CredentialStore: Send + Sync {
    /// Persist a new record and return its assigned id. The `id` field of
    /// `rec` is ignored. Fails with `StoreError::Conflict` when the access key
    /// is already taken.
    fn insert(&self, rec: &AccessCredential) -> StoreResult<u64>;
    fn get(&self, id: u64) -> StoreResult<Option<AccessCredential>>;
    fn find_secret(&self, access_key: &str) -> StoreResult<Option<SecretRow>>;
    fn list_by_owner(&self, owner_id: u64) -> StoreResult<Vec<AccessCredential>>;
    /// Change description and expiry only. Returns false when `id` is unknown.
    fn update(
        &self,
        id: u64,
        description: &str,
        expire_at: i64,
        updated_at: i64,
    ) -> StoreResult<bool>;
    fn delete(&self, id: u64) -> StoreResult<bool>;
}

pub trait UserStore: Send + Sync {
    /// `None` when the user does not exist.
    fn activated(&self, uid: u64) -> StoreResult<Option<bool>>;
}

pub trait ConfigStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;
}

fn lock_err<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Storage(format!("Lock error: {}", e))
}

// ==============================
// In-memory backend
// ==============================

#[derive(Default)]
struct CredentialTables {
    last_id: u64,
    by_id: BTreeMap<u64, AccessCredential>,
    by_access_key: HashMap<String, u64>,
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: RwLock<CredentialTables>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn insert(&self, rec: &AccessCredential) -> StoreResult<u64> {
        let mut g = self.inner.write().map_err(lock_err)?;
        if g.by_access_key.contains_key(&rec.access_key) {
            return Err(StoreError::Conflict(format!(
                "access key {} already exists",
                rec.access_key
            )));
        }
        g.last_id += 1;
        let id = g.last_id;
        let mut stored = rec.clone();
        stored.id = id;
        g.by_access_key.insert(stored.access_key.clone(), id);
        g.by_id.insert(id, stored);
        Ok(id)
    }

    fn get(&self, id: u64) -> StoreResult<Option<AccessCredential>> {
        Ok(self.inner.read().map_err(lock_err)?.by_id.get(&id).cloned())
    }

    fn find_secret(&self, access_key: &str) -> StoreResult<Option<SecretRow>> {
        let g = self.inner.read().map_err(lock_err)?;
        Ok(g.by_access_key
            .get(access_key)
            .and_then(|id| g.by_id.get(id))
            .map(SecretRow::from))
    }

    fn list_by_owner(&self, owner_id: u64) -> StoreResult<Vec<AccessCredential>> {
        let g = self.inner.read().map_err(lock_err)?;
        Ok(g.by_id
            .values()
            .filter(|rec| rec.owner_id == owner_id)
            .cloned()
            .collect())
    }

    fn update(
        &self,
        id: u64,
        description: &str,
        expire_at: i64,
        updated_at: i64,
    ) -> StoreResult<bool> {
        let mut g = self.inner.write().map_err(lock_err)?;
        match g.by_id.get_mut(&id) {
            Some(rec) => {
                rec.description = description.to_string();
                rec.expire_at = expire_at;
                rec.updated_at = updated_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(&self, id: u64) -> StoreResult<bool> {
        let mut g = self.inner.write().map_err(lock_err)?;
        match g.by_id.remove(&id) {
            Some(rec) => {
                g.by_access_key.remove(&rec.access_key);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct MemoryUserStore {
    inner: RwLock<HashMap<u64, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_user(&self, user: &User) -> StoreResult<()> {
        self.inner
            .write()
            .map_err(lock_err)?
            .insert(user.uid, user.clone());
        Ok(())
    }
}

impl UserStore for MemoryUserStore {
    fn activated(&self, uid: u64) -> StoreResult<Option<bool>> {
        Ok(self
            .inner
            .read()
            .map_err(lock_err)?
            .get(&uid)
            .map(|u| u.activated))
    }
}

#[derive(Default)]
pub struct MemoryConfigStore {
    inner: RwLock<HashMap<String, String>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.inner.read().map_err(lock_err)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.inner
            .write()
            .map_err(lock_err)?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// ==============================
// sled backend
// ==============================

/// One sled database holding credentials, the access-key index, users and
/// configuration in separate trees.
pub struct SledStore {
    db: sled::Db,
    credentials: sled::Tree,
    access_keys: sled::Tree,
    users: sled::Tree,
    config: sled::Tree,
}

impl SledStore {
    pub fn open_path(path: PathBuf) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = sled::open(path)?;
        Ok(Self {
            credentials: db.open_tree("credentials")?,
            access_keys: db.open_tree("access_keys")?,
            users: db.open_tree("users")?,
            config: db.open_tree("config")?,
            db,
        })
    }

    pub fn put_user(&self, user: &User) -> StoreResult<()> {
        self.users
            .insert(user.uid.to_be_bytes(), serde_json::to_vec(user)?)?;
        self.users.flush()?;
        Ok(())
    }

    fn decode(bytes: &[u8]) -> StoreResult<AccessCredential> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl CredentialStore for SledStore {
    fn insert(&self, rec: &AccessCredential) -> StoreResult<u64> {
        // sled ids start at 0; keep 0 free as "no id"
        let id = self.db.generate_id()? + 1;
        let id_bytes = id.to_be_bytes();
        let mut stored = rec.clone();
        stored.id = id;
        let value = serde_json::to_vec(&stored)?;

        // index entry and record commit together or not at all
        let outcome = (&self.access_keys, &self.credentials).transaction(|(keys, creds)| {
            if keys.get(rec.access_key.as_bytes())?.is_some() {
                return abort(StoreError::Conflict(format!(
                    "access key {} already exists",
                    rec.access_key
                )));
            }
            keys.insert(rec.access_key.as_bytes(), &id_bytes[..])?;
            creds.insert(&id_bytes[..], value.as_slice())?;
            Ok(())
        });
        settle(outcome)?;
        self.db.flush()?;
        Ok(id)
    }

    fn get(&self, id: u64) -> StoreResult<Option<AccessCredential>> {
        match self.credentials.get(id.to_be_bytes())? {
            Some(ivec) => Ok(Some(Self::decode(&ivec)?)),
            None => Ok(None),
        }
    }

    fn find_secret(&self, access_key: &str) -> StoreResult<Option<SecretRow>> {
        let Some(id) = self.access_keys.get(access_key.as_bytes())? else {
            return Ok(None);
        };
        match self.credentials.get(&id)? {
            Some(ivec) => Ok(Some(SecretRow::from(&Self::decode(&ivec)?))),
            None => Ok(None),
        }
    }

    fn list_by_owner(&self, owner_id: u64) -> StoreResult<Vec<AccessCredential>> {
        let mut out = Vec::new();
        for item in self.credentials.iter() {
            let (_k, v) = item?;
            let rec = Self::decode(&v)?;
            if rec.owner_id == owner_id {
                out.push(rec);
            }
        }
        Ok(out)
    }

    fn update(
        &self,
        id: u64,
        description: &str,
        expire_at: i64,
        updated_at: i64,
    ) -> StoreResult<bool> {
        let Some(mut rec) = CredentialStore::get(self, id)? else {
            return Ok(false);
        };
        rec.description = description.to_string();
        rec.expire_at = expire_at;
        rec.updated_at = updated_at;
        self.credentials
            .insert(id.to_be_bytes(), serde_json::to_vec(&rec)?)?;
        self.credentials.flush()?;
        Ok(true)
    }

    fn delete(&self, id: u64) -> StoreResult<bool> {
        let id_bytes = id.to_be_bytes();
        let outcome = (&self.credentials, &self.access_keys).transaction(|(creds, keys)| {
            let Some(ivec) = creds.remove(&id_bytes[..])? else {
                return Ok(false);
            };
            let rec = match Self::decode(&ivec) {
                Ok(rec) => rec,
                Err(err) => return abort(err),
            };
            keys.remove(rec.access_key.as_bytes())?;
            Ok(true)
        });
        let removed = settle(outcome)?;
        if removed {
            self.db.flush()?;
        }
        Ok(removed)
    }
}

/// Unwrap a sled transaction outcome; aborts carry their own `StoreError`.
fn settle<T>(outcome: TransactionResult<T, StoreError>) -> StoreResult<T> {
    match outcome {
        Ok(value) => Ok(value),
        Err(TransactionError::Abort(err)) => Err(err),
        Err(TransactionError::Storage(err)) => Err(err.into()),
    }
}

impl UserStore for SledStore {
    fn activated(&self, uid: u64) -> StoreResult<Option<bool>> {
        match self.users.get(uid.to_be_bytes())? {
            Some(ivec) => {
                let user: User = serde_json::from_slice(&ivec)?;
                Ok(Some(user.activated))
            }
            None => Ok(None),
        }
    }
}

impl ConfigStore for SledStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match self.config.get(key.as_bytes())? {
            Some(ivec) => Ok(Some(String::from_utf8_lossy(&ivec).into_owned())),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.config.insert(key.as_bytes(), value.as_bytes())?;
        self.config.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PermissionLevel;

    fn record(access_key: &str, owner_id: u64) -> AccessCredential {
        AccessCredential {
            id: 0,
            access_key: access_key.to_string(),
            secret_key: format!("sk-{access_key}"),
            owner_id,
            expire_at: 0,
            description: String::new(),
            created_at: 10,
            updated_at: 10,
        }
    }

    fn exercise(store: &dyn CredentialStore) {
        let a = store.insert(&record("ak-a", 7)).unwrap();
        let b = store.insert(&record("ak-b", 7)).unwrap();
        store.insert(&record("ak-c", 8)).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, 0);

        match store.insert(&record("ak-a", 9)) {
            Err(StoreError::Conflict(_)) => {}
            other => panic!("expected conflict, got {:?}", other),
        }

        let row = store.find_secret("ak-b").unwrap().expect("row");
        assert_eq!(row.secret_key, "sk-ak-b");
        assert_eq!(row.owner_id, 7);
        assert_eq!(store.list_by_owner(7).unwrap().len(), 2);

        assert!(store.update(a, "rotated", 500, 20).unwrap());
        let rec = store.get(a).unwrap().expect("record");
        assert_eq!(rec.description, "rotated");
        assert_eq!(rec.expire_at, 500);
        assert_eq!(rec.secret_key, "sk-ak-a");
        assert!(!store.update(9999, "x", 0, 0).unwrap());

        assert!(store.delete(a).unwrap());
        assert!(!store.delete(a).unwrap());
        assert!(store.find_secret("ak-a").unwrap().is_none());
        // a deleted key frees its access key
        store.insert(&record("ak-a", 7)).unwrap();
    }

    #[test]
    fn memory_credential_store_contract() {
        exercise(&MemoryCredentialStore::new());
    }

    #[test]
    fn sled_credential_store_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open_path(dir.path().join("creds.db")).unwrap();
        exercise(&store);
    }

    /// Every index entry names a stored record carrying that access key.
    fn assert_index_consistent(store: &SledStore) {
        let mut indexed = 0;
        for item in store.access_keys.iter() {
            let (ak, id) = item.unwrap();
            let rec = SledStore::decode(&store.credentials.get(&id).unwrap().expect("record"))
                .unwrap();
            assert_eq!(rec.access_key.as_bytes(), &ak[..]);
            indexed += 1;
        }
        assert_eq!(indexed, store.credentials.len());
    }

    #[test]
    fn sled_index_tracks_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open_path(dir.path().join("creds.db")).unwrap();

        let a = store.insert(&record("ak-a", 1)).unwrap();
        store.insert(&record("ak-b", 1)).unwrap();
        assert!(matches!(
            store.insert(&record("ak-a", 2)),
            Err(StoreError::Conflict(_))
        ));
        assert_index_consistent(&store);
        assert_eq!(store.credentials.len(), 2);

        assert!(store.delete(a).unwrap());
        assert_index_consistent(&store);
        assert_eq!(store.access_keys.len(), 1);
        assert!(store.access_keys.get("ak-a").unwrap().is_none());
    }

    #[test]
    fn sled_undecodable_record_is_not_half_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open_path(dir.path().join("creds.db")).unwrap();
        let id = store.insert(&record("ak-a", 1)).unwrap();
        store
            .credentials
            .insert(id.to_be_bytes(), &b"not json"[..])
            .unwrap();

        assert!(store.delete(id).is_err());
        // the failed delete rolled back: record and index are both still there
        assert!(store.credentials.get(id.to_be_bytes()).unwrap().is_some());
        assert!(store.access_keys.get("ak-a").unwrap().is_some());
    }

    #[test]
    fn sled_users_and_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open_path(dir.path().join("db")).unwrap();
        store
            .put_user(&User {
                uid: 3,
                level: PermissionLevel::Admin,
                uname: "ops".into(),
                email: "ops@example.com".into(),
                avatar: String::new(),
                activated: true,
            })
            .unwrap();
        assert_eq!(store.activated(3).unwrap(), Some(true));
        assert_eq!(store.activated(4).unwrap(), None);

        assert_eq!(ConfigStore::get(&store, "sys.jwt_key").unwrap(), None);
        ConfigStore::set(&store, "sys.jwt_key", "abc").unwrap();
        assert_eq!(
            ConfigStore::get(&store, "sys.jwt_key").unwrap().as_deref(),
            Some("abc")
        );
    }
}
