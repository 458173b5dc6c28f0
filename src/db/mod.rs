//! Transactional row store on top of rocksdb.
//!
//! Rows are JSON documents under `"<table>:<id>"`. Unique secondary indexes live
//! under `"idx:<table>:<index>:<value>"` and hold the owning row id, so natural
//! key lookups are a point read and uniqueness is enforced by row locks rather
//! than by scanning. Non-unique indexes put one empty entry per row under
//! `"idx:<table>:<index>:<value>:<id>"` and are read with a prefix iterator.
//!
//! Locking reads always take a row's unique index keys before the row key, so
//! two transactions touching the same row lock in the same order.

use std::path::Path;

use rocksdb::{
    Direction, IteratorMode, Options, Transaction, TransactionDB, TransactionDBOptions,
    TransactionOptions, WriteOptions,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

/// Lock waits longer than this fail the transaction with `TimedOut`.
const LOCK_TIMEOUT_MS: i64 = 2_000;

/// A table row.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const TABLE: &'static str;

    fn id(&self) -> Uuid;

    /// Unique secondary keys as `(index name, value)` pairs.
    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }

    /// Non-unique secondary keys as `(index name, value)` pairs.
    fn index_keys(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }
}

/// How a filter resolves against the store.
#[derive(Debug, Clone)]
pub enum Lookup {
    Id(Uuid),
    Unique { index: &'static str, value: String },
    /// Every row carrying `value` in a non-unique index.
    Indexed { index: &'static str, value: String },
    /// Union of several lookups, deduplicated by row id.
    AnyOf(Vec<Lookup>),
}

/// A typed query predicate. Every variant of a filter names exactly the
/// fields it constrains; there is no "empty" filter.
pub trait Filter<R: Record> {
    fn lookup(&self) -> Lookup;

    /// Side-cache key the matching row is mirrored under, if any.
    fn cache_key(&self) -> Option<String> {
        None
    }
}

pub struct DBLayer {
    db: TransactionDB,
}

impl DBLayer {
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let mut txn_db_opts = TransactionDBOptions::default();
        txn_db_opts.set_txn_lock_timeout(LOCK_TIMEOUT_MS);
        let db = TransactionDB::open(&opts, &txn_db_opts, path)?;
        Ok(Self { db })
    }

    /// Open a transaction. Dropping the returned handle without calling
    /// [`Tx::commit`] rolls every write back.
    pub fn begin(&self) -> Tx<'_> {
        let mut txn_opts = TransactionOptions::default();
        txn_opts.set_deadlock_detect(true);
        Tx {
            txn: self.db.transaction_opt(&WriteOptions::default(), &txn_opts),
        }
    }
}

pub struct Tx<'db> {
    txn: Transaction<'db, TransactionDB>,
}

fn row_key(table: &str, id: &Uuid) -> String {
    format!("{table}:{id}")
}

fn index_key(table: &str, index: &str, value: &str) -> String {
    format!("idx:{table}:{index}:{value}")
}

fn index_prefix(table: &str, index: &str, value: &str) -> String {
    format!("idx:{table}:{index}:{value}:")
}

fn entry_key(table: &str, index: &str, value: &str, id: &Uuid) -> String {
    format!("idx:{table}:{index}:{value}:{id}")
}

impl<'db> Tx<'db> {
    pub fn commit(self) -> StoreResult<()> {
        self.txn.commit()?;
        Ok(())
    }

    fn read(&self, key: &str, for_update: bool) -> StoreResult<Option<Vec<u8>>> {
        let raw = if for_update {
            self.txn.get_for_update(key, true)?
        } else {
            self.txn.get(key)?
        };
        Ok(raw)
    }

    fn load_row<R: Record>(&self, id: &Uuid, for_update: bool) -> StoreResult<Option<R>> {
        match self.read(&row_key(R::TABLE, id), for_update)? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Lock the row's unique index keys, then the row, and return its
    /// current state.
    fn lock_row<R: Record>(&self, id: &Uuid) -> StoreResult<Option<R>> {
        let Some(seen) = self.load_row::<R>(id, false)? else {
            return Ok(None);
        };
        for (index, value) in seen.unique_keys() {
            self.read(&index_key(R::TABLE, index, &value), true)?;
        }
        self.load_row(id, true)
    }

    fn indexed_ids(&self, table: &str, index: &str, value: &str) -> StoreResult<Vec<Uuid>> {
        let prefix = index_prefix(table, index, value);
        let mut ids = Vec::new();

        for item in self
            .txn
            .iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward))
        {
            let (key, _) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            // a longer value sharing this prefix leaves more than an id behind
            let parsed = std::str::from_utf8(&key[prefix.len()..])
                .ok()
                .and_then(|rest| Uuid::parse_str(rest).ok());
            if let Some(id) = parsed {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    fn candidate_ids<R: Record>(
        &self,
        lookup: &Lookup,
        for_update: bool,
        ids: &mut Vec<Uuid>,
    ) -> StoreResult<()> {
        let found = match lookup {
            Lookup::Id(id) => vec![*id],
            Lookup::Unique { index, value } => {
                match self.read(&index_key(R::TABLE, index, value), for_update)? {
                    Some(raw) => vec![serde_json::from_slice(&raw)?],
                    None => Vec::new(),
                }
            }
            Lookup::Indexed { index, value } => self.indexed_ids(R::TABLE, index, value)?,
            Lookup::AnyOf(lookups) => {
                for lookup in lookups {
                    self.candidate_ids::<R>(lookup, for_update, ids)?;
                }
                return Ok(());
            }
        };
        for id in found {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(())
    }

    fn resolve<R: Record>(&self, lookup: &Lookup, for_update: bool) -> StoreResult<Vec<R>> {
        let mut ids = Vec::new();
        self.candidate_ids::<R>(lookup, for_update, &mut ids)?;

        let mut rows = Vec::with_capacity(ids.len());
        for id in &ids {
            let row = if for_update {
                self.lock_row::<R>(id)?
            } else {
                self.load_row::<R>(id, false)?
            };
            rows.extend(row);
        }
        Ok(rows)
    }

    /// First row matching `filter`, or `NotFound`.
    pub fn get<R: Record>(&self, filter: &impl Filter<R>) -> StoreResult<R> {
        self.resolve(&filter.lookup(), false)?
            .into_iter()
            .next()
            .ok_or(StoreError::NotFound)
    }

    pub fn list<R: Record>(&self, filter: &impl Filter<R>) -> StoreResult<Vec<R>> {
        self.resolve(&filter.lookup(), false)
    }

    pub fn insert<R: Record>(&self, row: &R) -> StoreResult<()> {
        let id = row.id();

        let mut uniques = Vec::new();
        for (index, value) in row.unique_keys() {
            let idx = index_key(R::TABLE, index, &value);
            if self.read(&idx, true)?.is_some() {
                return Err(StoreError::AlreadyExists(format!("{}.{index}", R::TABLE)));
            }
            uniques.push(idx);
        }

        let key = row_key(R::TABLE, &id);
        if self.read(&key, true)?.is_some() {
            return Err(StoreError::AlreadyExists(format!("{}.id", R::TABLE)));
        }

        let encoded_id = serde_json::to_vec(&id)?;
        for idx in uniques {
            self.txn.put(idx, &encoded_id)?;
        }
        for (index, value) in row.index_keys() {
            self.txn.put(entry_key(R::TABLE, index, &value, &id), b"")?;
        }

        self.txn.put(key, serde_json::to_vec(row)?)?;
        debug!(table = R::TABLE, %id, "row inserted");
        Ok(())
    }

    /// Apply `patch` to the first row matching `filter` and write it back.
    pub fn update<R: Record>(
        &self,
        filter: &impl Filter<R>,
        patch: impl FnOnce(&mut R),
    ) -> StoreResult<R> {
        let before = self
            .resolve::<R>(&filter.lookup(), true)?
            .into_iter()
            .next()
            .ok_or(StoreError::NotFound)?;

        let mut after = before.clone();
        patch(&mut after);
        debug_assert_eq!(before.id(), after.id(), "update must not change the row id");
        let id = after.id();

        let old_keys = before.unique_keys();
        let new_keys = after.unique_keys();
        let encoded_id = serde_json::to_vec(&id)?;

        for (index, value) in &old_keys {
            if !new_keys.contains(&(*index, value.clone())) {
                self.txn.delete(index_key(R::TABLE, index, value))?;
            }
        }
        for (index, value) in &new_keys {
            if old_keys.contains(&(*index, value.clone())) {
                continue;
            }
            let idx = index_key(R::TABLE, index, value);
            if self.read(&idx, true)?.is_some() {
                return Err(StoreError::AlreadyExists(format!("{}.{index}", R::TABLE)));
            }
            self.txn.put(idx, &encoded_id)?;
        }

        let old_entries = before.index_keys();
        let new_entries = after.index_keys();
        for (index, value) in &old_entries {
            if !new_entries.contains(&(*index, value.clone())) {
                self.txn.delete(entry_key(R::TABLE, index, value, &id))?;
            }
        }
        for (index, value) in &new_entries {
            if !old_entries.contains(&(*index, value.clone())) {
                self.txn.put(entry_key(R::TABLE, index, value, &id), b"")?;
            }
        }

        self.txn
            .put(row_key(R::TABLE, &id), serde_json::to_vec(&after)?)?;
        Ok(after)
    }

    /// Delete every row matching `filter`. Returns the deleted rows, or
    /// `NotFound` when nothing matched.
    pub fn delete<R: Record>(&self, filter: &impl Filter<R>) -> StoreResult<Vec<R>> {
        let rows = self.resolve::<R>(&filter.lookup(), true)?;
        if rows.is_empty() {
            return Err(StoreError::NotFound);
        }

        for row in &rows {
            let id = row.id();
            for (index, value) in row.unique_keys() {
                self.txn.delete(index_key(R::TABLE, index, &value))?;
            }
            for (index, value) in row.index_keys() {
                self.txn.delete(entry_key(R::TABLE, index, &value, &id))?;
            }
            self.txn.delete(row_key(R::TABLE, &id))?;
        }

        debug!(table = R::TABLE, count = rows.len(), "rows deleted");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Account {
        id: Uuid,
        handle: String,
        team: String,
    }

    impl Record for Account {
        const TABLE: &'static str = "account";

        fn id(&self) -> Uuid {
            self.id
        }

        fn unique_keys(&self) -> Vec<(&'static str, String)> {
            vec![("handle", self.handle.clone())]
        }

        fn index_keys(&self) -> Vec<(&'static str, String)> {
            vec![("team", self.team.clone())]
        }
    }

    enum AccountFilter {
        Id(Uuid),
        Ids(Vec<Uuid>),
        Handle(String),
        Team(String),
    }

    impl Filter<Account> for AccountFilter {
        fn lookup(&self) -> Lookup {
            match self {
                AccountFilter::Id(id) => Lookup::Id(*id),
                AccountFilter::Ids(ids) => {
                    Lookup::AnyOf(ids.iter().copied().map(Lookup::Id).collect())
                }
                AccountFilter::Handle(handle) => Lookup::Unique {
                    index: "handle",
                    value: handle.clone(),
                },
                AccountFilter::Team(team) => Lookup::Indexed {
                    index: "team",
                    value: team.clone(),
                },
            }
        }
    }

    fn account(handle: &str, team: &str) -> Account {
        Account {
            id: Uuid::new_v4(),
            handle: handle.into(),
            team: team.into(),
        }
    }

    fn open() -> (tempfile::TempDir, DBLayer) {
        let dir = tempfile::tempdir().unwrap();
        let db = DBLayer::new(dir.path()).unwrap();
        (dir, db)
    }

    #[test]
    fn unique_index_rejects_duplicates() {
        let (_dir, db) = open();
        let tx = db.begin();
        tx.insert(&account("ada", "red")).unwrap();
        let err = tx.insert(&account("ada", "blue")).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[test]
    fn lookups_by_id_unique_and_secondary_index() {
        let (_dir, db) = open();
        let a = account("ada", "red");
        let b = account("bob", "red");
        let c = account("cyd", "blue");

        let tx = db.begin();
        for row in [&a, &b, &c] {
            tx.insert(row).unwrap();
        }
        tx.commit().unwrap();

        let tx = db.begin();
        assert_eq!(tx.get(&AccountFilter::Id(b.id)).unwrap(), b);
        assert_eq!(tx.get(&AccountFilter::Handle("cyd".into())).unwrap(), c);
        assert_eq!(tx.list(&AccountFilter::Team("red".into())).unwrap().len(), 2);
        assert!(tx
            .get(&AccountFilter::Handle("zed".into()))
            .unwrap_err()
            .is_not_found());

        let picked = tx
            .list(&AccountFilter::Ids(vec![c.id, a.id, c.id, Uuid::new_v4()]))
            .unwrap();
        assert_eq!(picked, vec![c, a]);
    }

    #[test]
    fn secondary_index_does_not_match_longer_values() {
        let (_dir, db) = open();
        let tx = db.begin();
        tx.insert(&account("ada", "red")).unwrap();
        tx.insert(&account("bob", "red:blue")).unwrap();

        let red = tx.list(&AccountFilter::Team("red".into())).unwrap();
        assert_eq!(red.len(), 1);
        assert_eq!(red[0].handle, "ada");
    }

    #[test]
    fn update_moves_unique_and_secondary_keys() {
        let (_dir, db) = open();
        let a = account("ada", "red");
        let tx = db.begin();
        tx.insert(&a).unwrap();
        tx.update(&AccountFilter::Id(a.id), |row| {
            row.handle = "lovelace".into();
            row.team = "blue".into();
        })
        .unwrap();
        tx.commit().unwrap();

        let tx = db.begin();
        assert!(tx.get(&AccountFilter::Handle("ada".into())).is_err());
        assert_eq!(
            tx.get(&AccountFilter::Handle("lovelace".into())).unwrap().id,
            a.id
        );
        assert!(tx.list(&AccountFilter::Team("red".into())).unwrap().is_empty());
        assert_eq!(tx.list(&AccountFilter::Team("blue".into())).unwrap().len(), 1);
        // the old handle is free again
        tx.insert(&account("ada", "red")).unwrap();
    }

    #[test]
    fn delete_reports_not_found_and_clears_indexes() {
        let (_dir, db) = open();
        let tx = db.begin();
        assert!(tx
            .delete(&AccountFilter::Team("red".into()))
            .unwrap_err()
            .is_not_found());

        tx.insert(&account("ada", "red")).unwrap();
        tx.insert(&account("bob", "red")).unwrap();
        let deleted = tx.delete(&AccountFilter::Team("red".into())).unwrap();
        assert_eq!(deleted.len(), 2);
        assert!(tx.get(&AccountFilter::Handle("ada".into())).is_err());
        assert!(tx.list(&AccountFilter::Team("red".into())).unwrap().is_empty());
        tx.insert(&account("ada", "red")).unwrap();
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let (_dir, db) = open();
        let a = account("ada", "red");
        {
            let tx = db.begin();
            tx.insert(&a).unwrap();
        }
        let tx = db.begin();
        assert!(tx.get(&AccountFilter::Id(a.id)).unwrap_err().is_not_found());
    }

    #[test]
    fn competing_writer_times_out_instead_of_hanging() {
        let (_dir, db) = open();
        let a = account("ada", "red");
        let setup = db.begin();
        setup.insert(&a).unwrap();
        setup.commit().unwrap();

        let first = db.begin();
        first
            .update(&AccountFilter::Id(a.id), |row| row.team = "blue".into())
            .unwrap();

        let second = db.begin();
        let err = second
            .delete(&AccountFilter::Handle("ada".into()))
            .unwrap_err();
        assert!(matches!(err, StoreError::Rocks(_)));
    }
}
