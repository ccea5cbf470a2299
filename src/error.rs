use thiserror::Error;

/// Error type for the node's store and lifecycle operations.
#[derive(Error, Debug)]
pub enum KvNodeError {
    /// IO error (gzip stream, directory manipulation, socket).
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Error propagated from the embedded store.
    #[error("store error: {0}")]
    Store(#[from] rocksdb::Error),
    /// A malformed RESP frame was received.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// A command was issued against a node that has been closed.
    #[error("node is closed")]
    Closed,
    /// A partial snapshot frame was read (short read other than at a clean
    /// record boundary), or the gzip stream itself is corrupt.
    #[error("restore error: {0}")]
    Restore(String),
    /// The store could not be reopened after `FLUSHDB` or a restore. There is
    /// no consistent local state left, so this is treated as unrecoverable
    /// by callers (the server process aborts).
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, KvNodeError>;

/// Errors the dispatcher surfaces as a RESP error reply, with no state
/// change to the store. Kept distinct from [`KvNodeError`] because these are
/// never propagated as hard failures — they always become an `Outcome::Err`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The verb is not one this node understands.
    #[error("unknown command")]
    UnknownCommand,
    /// The number of arguments does not match the command's arity.
    #[error("wrong number of arguments")]
    WrongArity,
    /// A `KEYS` option was unrecognized, or missing its required value.
    #[error("syntax error: {0}")]
    Syntax(String),
}
