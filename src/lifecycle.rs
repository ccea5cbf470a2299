//! Lifecycle (C7): owns the store handle and the open/close/restore/flushdb
//! sequencing described in spec.md §4.7 and the lock discipline in §5.
//!
//! `Node` is the single point of truth for "is the store open right now".
//! `close()` is terminal — once closed, every subsequent command fails with
//! [`KvNodeError::Closed`]. `restore`/`flushdb` instead replace the handle
//! wholesale under the exclusive lock and leave the node open afterwards.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::{KvNodeError, Result};
use crate::snapshot;
use crate::store::{clear_directory, Store};

/// Owns the store handle behind a single readers-writer lock, matching the
/// scheduling model in spec.md §5: writes take the exclusive lock for the
/// duration of their mutate closure, reads take the shared lock for the
/// duration of their respond closure.
pub struct Node {
    inner: RwLock<Option<Store>>,
    data_dir: PathBuf,
}

impl Node {
    /// Open (creating if absent) the store directory at `data_dir`.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Node> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let store = Store::open(&data_dir)?;
        Ok(Node {
            inner: RwLock::new(Some(store)),
            data_dir,
        })
    }

    /// Directory backing this node's store.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Run `f` against the store under the shared (read) lock. Fails with
    /// [`KvNodeError::Closed`] if the node has been closed.
    pub fn with_read<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Store) -> Result<R>,
    {
        let guard = self.inner.read().expect("store lock poisoned");
        let store = guard.as_ref().ok_or(KvNodeError::Closed)?;
        f(store)
    }

    /// Run `f` against the store under the exclusive (write) lock. Fails
    /// with [`KvNodeError::Closed`] if the node has been closed.
    pub fn with_write<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Store) -> Result<R>,
    {
        let guard = self.inner.write().expect("store lock poisoned");
        let store = guard.as_ref().ok_or(KvNodeError::Closed)?;
        f(store)
    }

    /// Close the node: takes the exclusive lock, drops the store handle,
    /// marks the node closed. Idempotent.
    pub fn close(&self) {
        let mut guard = self.inner.write().expect("store lock poisoned");
        *guard = None;
    }

    /// Close the current handle, delete the store directory's contents,
    /// reopen a fresh empty store at the same path. Called under the
    /// exclusive lock by both `flushdb` and `restore`. A failure to reopen
    /// is unrecoverable: the node is left with no store handle at all and
    /// every subsequent command will see it as closed, but callers should
    /// treat the returned `Fatal` error as a signal to abort the process
    /// (spec.md §7).
    fn reinitialize_locked(&self, guard: &mut Option<Store>) -> Result<()> {
        *guard = None;
        clear_directory(&self.data_dir)?;
        let fresh = Store::open(&self.data_dir)
            .map_err(|e| KvNodeError::Fatal(format!("failed to reopen store: {e}")))?;
        *guard = Some(fresh);
        Ok(())
    }

    /// `FLUSHDB`: close, delete, reopen empty, under the exclusive lock.
    pub fn flushdb(&self) -> Result<()> {
        let mut guard = self.inner.write().expect("store lock poisoned");
        self.reinitialize_locked(&mut guard)
    }

    /// Restore the node to exactly the contents of a snapshot stream:
    /// reinitialize to empty under the exclusive lock, then decode and load
    /// every record. Mutually exclusive with concurrent writes by
    /// construction (both go through the same exclusive lock).
    pub fn restore(&self, reader: impl Read) -> Result<()> {
        let mut guard = self.inner.write().expect("store lock poisoned");
        self.reinitialize_locked(&mut guard)?;
        let store = guard.as_ref().expect("just reinitialized to Some");
        snapshot::load_into(store, reader)
    }

    /// Write a full snapshot of the current store to `writer`. Only the
    /// shared lock is required on the node's side: `Store::consistent_snapshot`
    /// is what actually keeps the dump stable against concurrent writes.
    pub fn snapshot(&self, writer: impl Write) -> Result<()> {
        self.with_read(|store| snapshot::write_snapshot(store, writer))
    }
}
