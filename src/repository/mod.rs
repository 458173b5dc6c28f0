//! Cache-aside access to the credential tables.
//!
//! The relational store is authoritative. Reads try the side cache first and
//! fall through to the store on a miss or a cache error; every write goes to
//! the store inside the caller's transaction, and the matching cache work is
//! queued on the [`UnitOfWork`] and only dispatched after commit. A rolled
//! back transaction therefore never touches the cache.
//!
//! Invalidation is best effort. If it fails (or races a concurrent read that
//! repopulates a row it saw before the delete committed), the stale entry
//! keeps answering reads until its TTL runs out. The TTL is the upper bound on
//! how long a revoked token can still resolve from the cache.

pub mod ban;
pub mod device;
pub mod token;
pub mod user;
pub mod verification_code;

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{CacheJob, CacheWorker, Fields, SideCache};
use crate::db::{DBLayer, Filter, Record, StoreResult, Tx};
use crate::error::StoreError;
use crate::model::{
    AuthorizationToken, BannedDevice, BannedUser, Device, RefreshToken, User, VerificationCode,
};

pub use ban::{BannedDeviceFilter, BannedUserFilter};
pub use device::DeviceFilter;
pub use token::{AuthorizationTokenFilter, RefreshTokenFilter};
pub use user::UserFilter;
pub use verification_code::VerificationCodeFilter;

/// Mirror TTL for authorization, refresh token, device and user rows.
pub const SESSION_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

/// A row type together with its side-cache policy.
pub trait Entity: Record {
    /// `None` keeps the entity out of the cache entirely.
    const CACHE_TTL: Option<Duration>;

    /// Every key this row is mirrored under.
    fn cache_keys(&self) -> Vec<String> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvalidationMode {
    /// Queue invalidations and return immediately.
    #[default]
    Detached,
    /// Wait for invalidations to be applied before the mutating call returns.
    Awaited,
}

/// One relational transaction plus the cache work it will trigger on commit.
pub struct UnitOfWork<'db> {
    tx: Tx<'db>,
    jobs: Vec<CacheJob>,
}

pub(crate) fn to_fields<R: Serialize>(row: &R) -> Result<Fields, serde_json::Error> {
    let fields = match serde_json::to_value(row)? {
        Value::Object(map) => map.into_iter().map(|(k, v)| (k, v.to_string())).collect(),
        other => Fields::from([("value".to_string(), other.to_string())]),
    };
    Ok(fields)
}

pub(crate) fn from_fields<R: DeserializeOwned>(fields: &Fields) -> Result<R, serde_json::Error> {
    let mut map = serde_json::Map::with_capacity(fields.len());
    for (name, raw) in fields {
        map.insert(name.clone(), serde_json::from_str(raw)?);
    }
    serde_json::from_value(Value::Object(map))
}

fn populate_jobs<R: Entity>(row: &R) -> Vec<CacheJob> {
    let Some(ttl) = R::CACHE_TTL else {
        return Vec::new();
    };
    let fields = match to_fields(row) {
        Ok(fields) => fields,
        Err(error) => {
            warn!(table = R::TABLE, %error, "cannot encode row for cache");
            return Vec::new();
        }
    };
    row.cache_keys()
        .into_iter()
        .map(|key| CacheJob::Populate {
            key,
            fields: fields.clone(),
            ttl,
        })
        .collect()
}

/// Cache-aside accessor for one table.
pub struct Repository<R> {
    cache: Arc<dyn SideCache>,
    _row: PhantomData<fn() -> R>,
}

impl<R: Entity> Repository<R> {
    fn new(cache: Arc<dyn SideCache>) -> Self {
        Self {
            cache,
            _row: PhantomData,
        }
    }

    /// Read one row. A cache hit answers without touching the store.
    pub async fn get<F>(&self, uow: &mut UnitOfWork<'_>, filter: &F) -> StoreResult<R>
    where
        F: Filter<R> + Sync,
    {
        let key = match (R::CACHE_TTL, filter.cache_key()) {
            (Some(_), Some(key)) => key,
            _ => return uow.tx.get(filter),
        };

        match self.cache.get_hash(&key).await {
            Ok(Some(fields)) => match from_fields::<R>(&fields) {
                Ok(row) => {
                    debug!(%key, "cache hit");
                    return Ok(row);
                }
                Err(error) => warn!(%key, %error, "discarding undecodable cache entry"),
            },
            Ok(None) => debug!(%key, "cache miss"),
            Err(error) => warn!(%key, %error, "cache read failed; using store"),
        }

        let row = uow.tx.get(filter)?;
        uow.jobs.extend(populate_jobs(&row));
        Ok(row)
    }

    /// Like [`Repository::get`], with `NotFound` turned into `None`.
    pub async fn find<F>(&self, uow: &mut UnitOfWork<'_>, filter: &F) -> StoreResult<Option<R>>
    where
        F: Filter<R> + Sync,
    {
        match self.get(uow, filter).await {
            Ok(row) => Ok(Some(row)),
            Err(StoreError::NotFound) => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// Every matching row, straight from the store.
    pub fn list(&self, uow: &UnitOfWork<'_>, filter: &impl Filter<R>) -> StoreResult<Vec<R>> {
        uow.tx.list(filter)
    }

    pub fn create(&self, uow: &mut UnitOfWork<'_>, row: R) -> StoreResult<R> {
        uow.tx.insert(&row)?;
        uow.jobs.extend(populate_jobs(&row));
        Ok(row)
    }

    /// Patch one row. The cache entry is replaced with the new state.
    pub fn update(
        &self,
        uow: &mut UnitOfWork<'_>,
        filter: &impl Filter<R>,
        patch: impl FnOnce(&mut R),
    ) -> StoreResult<R> {
        let mut previous_keys = Vec::new();
        let row = uow.tx.update(filter, |row: &mut R| {
            previous_keys = row.cache_keys();
            patch(row);
        })?;

        let current_keys = row.cache_keys();
        previous_keys.retain(|key| !current_keys.contains(key));
        if !previous_keys.is_empty() {
            uow.jobs.push(CacheJob::Invalidate {
                keys: previous_keys,
            });
        }
        uow.jobs.extend(populate_jobs(&row));
        Ok(row)
    }

    /// Delete every matching row and batch-invalidate their cache keys.
    pub fn delete(&self, uow: &mut UnitOfWork<'_>, filter: &impl Filter<R>) -> StoreResult<Vec<R>> {
        let rows = uow.tx.delete(filter)?;
        if R::CACHE_TTL.is_some() {
            let keys: Vec<String> = rows.iter().flat_map(|row| row.cache_keys()).collect();
            if !keys.is_empty() {
                uow.jobs.push(CacheJob::Invalidate { keys });
            }
        }
        Ok(rows)
    }
}

/// Persistence for every credential table, with one shared cache and worker.
pub struct CredentialStore {
    db: DBLayer,
    worker: CacheWorker,
    invalidation: InvalidationMode,
    pub users: Repository<User>,
    pub devices: Repository<Device>,
    pub verification_codes: Repository<VerificationCode>,
    pub banned_users: Repository<BannedUser>,
    pub banned_devices: Repository<BannedDevice>,
    pub refresh_tokens: Repository<RefreshToken>,
    pub authorization_tokens: Repository<AuthorizationToken>,
}

impl CredentialStore {
    /// Must be called inside a tokio runtime; spawns the cache worker.
    pub fn new(db: DBLayer, cache: Arc<dyn SideCache>, invalidation: InvalidationMode) -> Self {
        Self {
            db,
            worker: CacheWorker::spawn(cache.clone()),
            invalidation,
            users: Repository::new(cache.clone()),
            devices: Repository::new(cache.clone()),
            verification_codes: Repository::new(cache.clone()),
            banned_users: Repository::new(cache.clone()),
            banned_devices: Repository::new(cache.clone()),
            refresh_tokens: Repository::new(cache.clone()),
            authorization_tokens: Repository::new(cache),
        }
    }

    pub fn worker(&self) -> &CacheWorker {
        &self.worker
    }

    pub fn begin(&self) -> UnitOfWork<'_> {
        UnitOfWork {
            tx: self.db.begin(),
            jobs: Vec::new(),
        }
    }

    /// Commit the transaction, then hand its cache work to the worker.
    pub async fn commit(&self, uow: UnitOfWork<'_>) -> StoreResult<()> {
        let UnitOfWork { tx, jobs } = uow;
        tx.commit()?;

        for job in jobs {
            let wait = self.invalidation == InvalidationMode::Awaited
                && matches!(job, CacheJob::Invalidate { .. });
            if wait {
                self.worker.submit_and_wait(job).await;
            } else {
                self.worker.submit(job);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn fields_round_trip_keeps_optional_and_typed_values() {
        let device = Device {
            id: Uuid::new_v4(),
            device_identifier: "abc".into(),
            platform: "ios".into(),
            system_version: "17.1".into(),
            firebase_cloud_messaging_id: None,
            model: "iPhone15,2".into(),
            create_time: Utc::now(),
            update_time: Utc::now(),
        };

        let fields = to_fields(&device).unwrap();
        assert_eq!(fields["platform"], "\"ios\"");
        assert_eq!(fields["firebase_cloud_messaging_id"], "null");

        let decoded: Device = from_fields(&fields).unwrap();
        assert_eq!(decoded, device);
    }

    #[test]
    fn corrupt_fields_fail_to_decode() {
        let mut fields = Fields::new();
        fields.insert("id".into(), "not json".into());
        assert!(from_fields::<Device>(&fields).is_err());
    }
}
