use std::net::SocketAddr;
use std::process::exit;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, LevelFilter};

use kvnode::thread_pool::{RayonThreadPool, ThreadPool};
use kvnode::{
    get_default_data_dir, Consistency, Durability, KvNodeError, LocalApplier, Node, Result, Server,
    ServerEvent,
};

/// Args for kvnode-server
#[derive(Parser)]
#[clap(author, version, about)]
#[clap(propagate_version = true)]
struct ServerArgs {
    /// Server listening address, default is 127.0.0.1:4000
    #[clap(long, value_parser)]
    addr: Option<SocketAddr>,
    /// Data directory, default is ./data/kvnode
    #[clap(long, value_parser)]
    data_dir: Option<std::path::PathBuf>,
    /// Durability mode a replication log would enforce: relaxed or fsync
    #[clap(long, value_parser, default_value = "relaxed")]
    durability: Durability,
    /// Read consistency level a replication adapter would enforce
    #[clap(long, value_parser, default_value = "linearizable")]
    consistency: Consistency,
    /// Number of worker threads, default is the number of logical CPUs
    #[clap(long, value_parser)]
    threads: Option<usize>,
}

const DEFAULT_ADDR: &str = "127.0.0.1:4000";

fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    if let Err(e) = run() {
        error!("{e}");
        exit(1);
    }
}

fn run() -> Result<()> {
    let cli = ServerArgs::parse();

    let addr = cli.addr.unwrap_or(DEFAULT_ADDR.parse().unwrap());
    let data_dir = cli.data_dir.unwrap_or_else(get_default_data_dir);
    let threads = cli.threads.unwrap_or_else(num_cpus::get);

    info!("kvnode-server {}", env!("CARGO_PKG_VERSION"));
    info!("data directory: {:?}", data_dir);
    info!("durability: {}", cli.durability);
    info!("consistency: {}", cli.consistency);
    info!("threads: {threads}");
    info!("listening on {addr:?}");

    let node = Arc::new(Node::open(&data_dir)?);
    let applier = Arc::new(LocalApplier::new(Arc::clone(&node)));
    let pool = RayonThreadPool::new(threads)?;

    let server = Server::new(applier, pool);
    let signal = server.run(addr)?;

    let event = signal.wait();
    node.close();

    match event {
        ServerEvent::Shutdown => {
            info!("shutdown requested, node closed");
            Ok(())
        }
        ServerEvent::Aborted(msg) => Err(KvNodeError::Fatal(msg)),
    }
}
