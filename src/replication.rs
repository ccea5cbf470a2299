//! Replication adapter (C6).
//!
//! The dispatcher never touches the [`Node`] directly for writes: it hands
//! a [`Classified`] descriptor to an [`Applier`], which is the seam where a
//! real consensus/replication layer would sit (raft log append, quorum
//! ack, then local apply in log order). [`LocalApplier`] is the single-node
//! stand-in used by `kvnode-server` today — it applies a write immediately
//! and is *not* a consensus implementation (spec.md §9, Open Question
//! "Replication adapter").

use std::sync::Arc;

use crate::error::Result;
use crate::lifecycle::Node;
use crate::statemachine::{Classified, Outcome};

/// Per-connection state handed to the applier alongside each command. Empty
/// today; the seam exists so a future replication adapter can thread a
/// client id or session token through without changing every call site.
pub struct Conn {
    _private: (),
}

impl Conn {
    /// A connection with no associated session state.
    pub fn local() -> Conn {
        Conn { _private: () }
    }
}

/// Applies classified commands to the node, standing in for whatever
/// consensus/replication protocol a real cluster would run. Implementations
/// decide how (and whether) a write is made durable across replicas before
/// it is applied locally; `LocalApplier` applies immediately.
pub trait Applier: Send + Sync {
    /// Apply one classified command and produce its wire reply.
    fn apply(&self, conn: &mut Conn, classified: Classified) -> Result<Outcome>;
}

/// Applies every write immediately against the local node, with no
/// replication. Suitable for a single-node deployment or for local testing
/// of the dispatcher; not a substitute for a real consensus layer.
pub struct LocalApplier {
    node: Arc<Node>,
}

impl LocalApplier {
    /// Wrap a node that is already open.
    pub fn new(node: Arc<Node>) -> LocalApplier {
        LocalApplier { node }
    }

    /// The node this applier operates on, for callers that need direct
    /// access outside the command path (snapshot/restore endpoints, the
    /// shutdown handler).
    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }
}

impl Applier for LocalApplier {
    fn apply(&self, _conn: &mut Conn, classified: Classified) -> Result<Outcome> {
        match classified {
            Classified::Write(write) => {
                let result = (write.mutate)(&self.node)?;
                Ok((write.respond)(result))
            }
            Classified::Read(read) => (read.respond)(&self.node),
        }
    }
}
