//! Embedded ordered key-value store adapter (C2).
//!
//! A thin facade over `rocksdb::DB`: point get/put/delete, atomic write
//! batches, forward/backward iteration and consistent read snapshots. Opened
//! with durability relaxed (writes do not fsync before returning) — the
//! replication log is the durability authority; see `SPEC_FULL.md` §4.2 and
//! the Design Notes in spec.md §9 ("Relaxed store durability").

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rocksdb::{BlockBasedOptions, IteratorMode, Options, Snapshot as RocksSnapshot, WriteOptions, DB};

use crate::error::Result;

/// Direction of a range scan, re-exported so callers outside this module
/// never need to depend on `rocksdb` directly.
pub use rocksdb::Direction;

/// A batch of puts/deletes committed atomically by [`Store::write`].
#[derive(Default)]
pub struct Batch {
    inner: rocksdb::WriteBatch,
}

impl Batch {
    /// A new, empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a put.
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.inner.put(key, value);
    }

    /// Stage a delete.
    pub fn delete(&mut self, key: &[u8]) {
        self.inner.delete(key);
    }

    /// Whether any operation has been staged.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Approximate size in bytes of the staged operations, used to decide
    /// when a restore loop should flush (`SPEC_FULL.md` §4.4: "flush the
    /// batch whenever accumulated key+value bytes exceed ≈4 MiB").
    pub fn size_in_bytes(&self) -> usize {
        self.inner.size_in_bytes()
    }
}

fn relaxed_write_options() -> WriteOptions {
    let mut wo = WriteOptions::default();
    wo.set_sync(false);
    wo
}

/// Facade over an open `rocksdb::DB` handle plus the directory it lives in.
pub struct Store {
    db: Arc<DB>,
    path: PathBuf,
}

impl Store {
    /// Open (creating if absent) the store directory at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Store> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);

        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);

        let db = DB::open(&opts, &path)?;
        Ok(Store {
            db: Arc::new(db),
            path,
        })
    }

    /// Directory this store is backed by.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Point lookup.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?)
    }

    /// Point existence check.
    pub fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.db.get(key)?.is_some())
    }

    /// Single put, outside of a batch.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.put_opt(key, value, &relaxed_write_options())?;
        Ok(())
    }

    /// Single delete, outside of a batch.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.db.delete_opt(key, &relaxed_write_options())?;
        Ok(())
    }

    /// Commit a batch atomically.
    pub fn write(&self, batch: Batch) -> Result<()> {
        self.db.write_opt(batch.inner, &relaxed_write_options())?;
        Ok(())
    }

    /// Iterate forward from the first key in the store.
    pub fn iter_all(&self) -> impl Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_ {
        self.db
            .iterator(IteratorMode::Start)
            .map(|res| res.map(|(k, v)| (k.to_vec(), v.to_vec())).map_err(Into::into))
    }

    /// Iterate from `from` (inclusive, if present) in the given direction.
    /// Used by the pattern-guided range scans in the state machine (C3/C5) —
    /// callers must copy keys/values out before retaining them across a lock
    /// release, since rocksdb iterator slices are not stable.
    pub fn iter_from<'a>(
        &'a self,
        from: &[u8],
        direction: Direction,
    ) -> impl Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + 'a {
        self.db
            .iterator(IteratorMode::From(from, direction))
            .map(|res| res.map(|(k, v)| (k.to_vec(), v.to_vec())).map_err(Into::into))
    }

    /// Iterate backward starting at the last key in the store. Used by
    /// descending `KEYS` scans when the pattern/pivot combination leaves no
    /// finite upper bound.
    pub fn iter_from_end(&self) -> impl Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_ {
        self.db
            .iterator(IteratorMode::End)
            .map(|res| res.map(|(k, v)| (k.to_vec(), v.to_vec())).map_err(Into::into))
    }

    /// Acquire a point-in-time read snapshot. Iteration against it is
    /// unaffected by concurrent writes, which `Snapshot` (C4) relies on to
    /// produce a consistent dump without needing to hold the node's shared
    /// lock for the whole encode.
    pub fn consistent_snapshot(&self) -> StoreSnapshot<'_> {
        StoreSnapshot {
            snapshot: self.db.snapshot(),
        }
    }
}

/// A consistent, point-in-time view of the store.
pub struct StoreSnapshot<'a> {
    snapshot: RocksSnapshot<'a>,
}

impl<'a> StoreSnapshot<'a> {
    /// Iterate the full keyspace, ascending, as it stood when the snapshot
    /// was taken.
    pub fn iter_all(&self) -> impl Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_ {
        self.snapshot
            .iterator(IteratorMode::Start)
            .map(|res| res.map(|(k, v)| (k.to_vec(), v.to_vec())).map_err(Into::into))
    }
}

/// Delete the contents of `path` (files and subdirectories) without removing
/// `path` itself, creating it first if absent. Used by `FLUSHDB` and restore
/// to reinitialize the store directory (`SPEC_FULL.md`/spec.md §4.7).
pub fn clear_directory(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
        return Ok(());
    }
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let entry_path = entry.path();
        if entry_path.is_dir() {
            std::fs::remove_dir_all(&entry_path)?;
        } else {
            std::fs::remove_file(&entry_path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        store.put(b"kfoo", b"bar").unwrap();
        assert_eq!(store.get(b"kfoo").unwrap(), Some(b"bar".to_vec()));
        assert!(store.has(b"kfoo").unwrap());

        store.delete(b"kfoo").unwrap();
        assert_eq!(store.get(b"kfoo").unwrap(), None);
        assert!(!store.has(b"kfoo").unwrap());
    }

    #[test]
    fn batch_write_is_atomic_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        let mut batch = Batch::new();
        batch.put(b"ka", b"1");
        batch.put(b"ka", b"2");
        batch.delete(b"kb");
        store.write(batch).unwrap();

        assert_eq!(store.get(b"ka").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.get(b"kb").unwrap(), None);
    }

    #[test]
    fn iteration_is_ascending_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        for k in [b"kc".to_vec(), b"ka".to_vec(), b"kb".to_vec()] {
            store.put(&k, b"v").unwrap();
        }
        let keys: Vec<Vec<u8>> = store.iter_all().map(|r| r.unwrap().0).collect();
        assert_eq!(keys, vec![b"ka".to_vec(), b"kb".to_vec(), b"kc".to_vec()]);
    }

    #[test]
    fn clear_directory_removes_files_but_keeps_dir() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Store::open(dir.path()).unwrap();
            store.put(b"kfoo", b"bar").unwrap();
        }
        clear_directory(dir.path()).unwrap();
        assert!(dir.path().exists());
        let store = Store::open(dir.path()).unwrap();
        assert_eq!(store.get(b"kfoo").unwrap(), None);
    }

    #[test]
    fn consistent_snapshot_is_unaffected_by_later_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        store.put(b"ka", b"1").unwrap();

        let snap = store.consistent_snapshot();
        store.put(b"kb", b"2").unwrap();

        let keys: Vec<Vec<u8>> = snap.iter_all().map(|r| r.unwrap().0).collect();
        assert_eq!(keys, vec![b"ka".to_vec()]);
    }
}
