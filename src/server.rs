//! Connection handling / server loop (A2, ambient).
//!
//! Ground: teacher's `KvsServer::run`/`handle_stream`, generalized to hand
//! each connection to a [`ThreadPool`] the way `kvs-server` hands work to
//! `RayonThreadPool`, and to run RESP requests through
//! [`statemachine::dispatch`] instead of a JSON engine call.
//!
//! `SHUTDOWN` does not call `process::exit` directly (spec.md §9, "Global
//! logger / process exit" — route termination through the lifecycle owner
//! so tests can assert it without actually exiting). Instead the accept loop
//! runs on a background thread and a [`ShutdownSignal`] is handed back to the
//! caller, which blocks on it and performs `open → run →
//! wait_for_shutdown_signal → close` itself.

use std::io::{BufReader, BufWriter, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, error, info};

use crate::error::Result;
use crate::replication::{Applier, Conn};
use crate::resp::{read_request, write_outcome};
use crate::statemachine::{dispatch, Control};
use crate::thread_pool::ThreadPool;

/// Why the server stopped accepting connections.
#[derive(Debug)]
pub enum ServerEvent {
    /// A client issued `SHUTDOWN`.
    Shutdown,
    /// A write could not be applied because the store could not be reopened
    /// after `FLUSHDB`/restore; there is no consistent local state left.
    Aborted(String),
}

/// Handed to the caller of [`Server::run`]; blocks until the server has a
/// reason to stop.
pub struct ShutdownSignal {
    rx: mpsc::Receiver<ServerEvent>,
    accept_thread: JoinHandle<()>,
}

impl ShutdownSignal {
    /// Block until `SHUTDOWN` or an unrecoverable store error is observed.
    /// The accept loop itself is left running in the background — an
    /// in-flight `accept()` cannot be cancelled without closing the listener,
    /// so the caller is expected to exit the process shortly after this
    /// returns, matching the teacher's originally-blocking `run` loop.
    pub fn wait(self) -> ServerEvent {
        self.rx.recv().unwrap_or(ServerEvent::Shutdown)
    }

    /// Detach from the accept thread without waiting for it to finish; used
    /// by tests that only want to confirm a `SHUTDOWN` was observed.
    pub fn into_accept_thread(self) -> JoinHandle<()> {
        self.accept_thread
    }
}

/// A running node's RESP listener. Owns the applier every connection
/// dispatches through and the pool every connection is handled on.
pub struct Server<P: ThreadPool> {
    applier: Arc<dyn Applier>,
    pool: P,
}

impl<P: ThreadPool + Send + 'static> Server<P> {
    /// Build a server around an already-open applier and thread pool.
    pub fn new(applier: Arc<dyn Applier>, pool: P) -> Server<P> {
        Server { applier, pool }
    }

    /// Bind `addr` and start accepting connections on a background thread.
    /// Returns immediately with a [`ShutdownSignal`] the caller waits on.
    pub fn run<A: ToSocketAddrs>(self, addr: A) -> Result<ShutdownSignal> {
        let listener = TcpListener::bind(addr)?;
        info!("listening on {:?}", listener.local_addr()?);

        let (tx, rx) = mpsc::channel();
        let pool = self.pool;
        let applier = self.applier;

        let accept_thread = std::thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let applier = Arc::clone(&applier);
                        let tx = tx.clone();
                        pool.spawn(move || {
                            if let Err(e) = handle_stream(applier, tx, stream) {
                                error!("error serving client: {e}");
                            }
                        });
                    }
                    Err(e) => error!("connection failed: {e}"),
                }
            }
        });

        Ok(ShutdownSignal { rx, accept_thread })
    }
}

fn handle_stream(
    applier: Arc<dyn Applier>,
    events: mpsc::Sender<ServerEvent>,
    stream: TcpStream,
) -> Result<()> {
    let peer_addr = stream.peer_addr()?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);
    let mut conn = Conn::local();

    loop {
        let args = match read_request(&mut reader)? {
            Some(args) => args,
            None => {
                debug!("connection closed by {peer_addr}");
                return Ok(());
            }
        };
        if args.is_empty() {
            continue;
        }

        let (outcome, control) = dispatch(applier.as_ref(), &mut conn, &args);
        write_outcome(&mut writer, &outcome)?;
        writer.flush()?;

        match control {
            Control::Continue => {}
            Control::Shutdown => {
                info!("shutdown requested by {peer_addr}");
                let _ = events.send(ServerEvent::Shutdown);
                return Ok(());
            }
            Control::Abort(msg) => {
                error!("unrecoverable store error from {peer_addr}: {msg}");
                let _ = events.send(ServerEvent::Aborted(msg));
                return Ok(());
            }
        }
    }
}
