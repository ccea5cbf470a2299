use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::exit;

use clap::{Parser, Subcommand};
use log::{error, LevelFilter};

use kvnode::{clear_directory, load_into, project_to_commands, write_snapshot, Result, Store};

/// Offline tool exposing the snapshot codec directly against an on-disk
/// store directory, without a running server.
#[derive(Parser)]
#[clap(author, version, about)]
#[clap(propagate_version = true)]
struct SnapshotArgs {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump a store directory to a gzip snapshot file
    Dump {
        /// Store directory
        data_dir: PathBuf,
        /// Output snapshot file
        out: PathBuf,
    },
    /// Load a gzip snapshot file into a store directory
    Load {
        /// Store directory; cleared before loading so the result contains
        /// exactly the snapshot's records
        data_dir: PathBuf,
        /// Input snapshot file
        input: PathBuf,
    },
    /// Project a gzip snapshot file into replayable RESP SET commands
    Project {
        /// Input snapshot file
        input: PathBuf,
        /// Output RESP command stream
        out: PathBuf,
    },
}

fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    if let Err(e) = run() {
        error!("{e}");
        exit(1);
    }
}

fn run() -> Result<()> {
    let cli = SnapshotArgs::parse();
    match cli.command {
        Commands::Dump { data_dir, out } => {
            let store = Store::open(&data_dir)?;
            let writer = BufWriter::new(File::create(&out)?);
            write_snapshot(&store, writer)?;
        }
        Commands::Load { data_dir, input } => {
            clear_directory(&data_dir)?;
            let store = Store::open(&data_dir)?;
            let reader = File::open(&input)?;
            load_into(&store, reader)?;
        }
        Commands::Project { input, out } => {
            let reader = File::open(&input)?;
            let writer = BufWriter::new(File::create(&out)?);
            project_to_commands(reader, writer)?;
        }
    }
    Ok(())
}
