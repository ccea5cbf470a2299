#![deny(missing_docs)]
//! A replicated key-value state machine for a Redis-protocol-speaking
//! cluster node, built around an embedded ordered store.
//!
//! This crate implements the deterministic command dispatcher, the
//! snapshot codec, and the lock discipline a real replication layer would
//! drive; it ships a single-node [`replication::LocalApplier`] as a
//! stand-in for that layer, not a consensus implementation.

mod config;
mod error;
mod keycodec;
mod lifecycle;
mod pattern;
mod replication;
mod resp;
mod server;
mod snapshot;
mod statemachine;
mod store;
pub mod thread_pool;

pub use config::{Consistency, Durability};
pub use error::{DispatchError, KvNodeError, Result};
pub use keycodec::{decode_user, encode, encode_user, PREFIX_USER};
pub use lifecycle::Node;
pub use pattern::{bounds, matches, UpperBound};
pub use replication::{Applier, Conn, LocalApplier};
pub use server::{Server, ServerEvent, ShutdownSignal};
pub use snapshot::{load_into, project_to_commands, write_snapshot};
pub use statemachine::{dispatch, Classified, Control, MutateOutcome, Outcome, ReadCommand, WriteCommand};
pub use store::{clear_directory, Batch, Direction, Store, StoreSnapshot};

use std::path::PathBuf;

/// Default data directory for `kvnode-server`, relative to the current
/// working directory.
pub fn get_default_data_dir() -> PathBuf {
    let mut dir = std::env::current_dir().unwrap();
    dir.push("data/kvnode");
    dir
}
