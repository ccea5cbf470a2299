use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::process::exit;

use clap::{Parser, Subcommand};
use log::{error, LevelFilter};

const DEFAULT_ADDR: &str = "127.0.0.1:4000";

/// Args for kvnode-cli
#[derive(Parser)]
#[clap(author, version, about)]
#[clap(propagate_version = true)]
struct ClientArgs {
    /// Subcommand
    #[clap(subcommand)]
    command: Commands,
    /// Server listening address, default is 127.0.0.1:4000
    #[clap(short, long, value_parser, global = true)]
    addr: Option<SocketAddr>,
}

/// Enum type of subcommand for kvnode-cli
#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the given argument back
    Echo { value: String },
    /// Set the value of a key
    Set { key: String, value: String },
    /// Get the value of a key
    Get { key: String },
    /// Get the values of multiple keys, one reply slot per key
    Mget { keys: Vec<String> },
    /// Delete one or more keys, counting removals
    Del { keys: Vec<String> },
    /// Delete keys matching a glob pattern
    Pdel { pattern: String },
    /// List keys matching a glob pattern
    Keys {
        pattern: String,
        /// Return values alongside keys
        #[clap(long)]
        with_values: bool,
        /// Scan in descending order
        #[clap(long)]
        desc: bool,
        /// Resume after this key
        #[clap(long)]
        pivot: Option<String>,
        /// Maximum number of keys to return
        #[clap(long)]
        limit: Option<u64>,
    },
    /// Clear every key in the store
    Flushdb,
    /// Shut the server down
    Shutdown,
}

fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    if let Err(e) = run() {
        error!("{e}");
        exit(1);
    }
}

fn run() -> std::io::Result<()> {
    let cli = ClientArgs::parse();
    let addr = cli.addr.unwrap_or(DEFAULT_ADDR.parse().unwrap());
    let stream = TcpStream::connect(addr)?;

    let args: Vec<String> = match cli.command {
        Commands::Echo { value } => vec!["ECHO".into(), value],
        Commands::Set { key, value } => vec!["SET".into(), key, value],
        Commands::Get { key } => vec!["GET".into(), key],
        Commands::Mget { keys } => {
            let mut a = vec!["MGET".to_string()];
            a.extend(keys);
            a
        }
        Commands::Del { keys } => {
            let mut a = vec!["DEL".to_string()];
            a.extend(keys);
            a
        }
        Commands::Pdel { pattern } => vec!["PDEL".into(), pattern],
        Commands::Keys {
            pattern,
            with_values,
            desc,
            pivot,
            limit,
        } => {
            let mut a = vec!["KEYS".to_string(), pattern];
            if with_values {
                a.push("WITHVALUES".into());
            }
            if desc {
                a.push("DESC".into());
            }
            if let Some(p) = pivot {
                a.push("PIVOT".into());
                a.push(p);
            }
            if let Some(l) = limit {
                a.push("LIMIT".into());
                a.push(l.to_string());
            }
            a
        }
        Commands::Flushdb => vec!["FLUSHDB".into()],
        Commands::Shutdown => vec!["SHUTDOWN".into()],
    };

    send_request(&stream, &args)?;
    let mut reader = BufReader::new(&stream);
    print_reply(&mut reader)?;
    Ok(())
}

fn send_request(mut stream: impl Write, args: &[String]) -> std::io::Result<()> {
    write!(stream, "*{}\r\n", args.len())?;
    for arg in args {
        write!(stream, "${}\r\n", arg.len())?;
        stream.write_all(arg.as_bytes())?;
        stream.write_all(b"\r\n")?;
    }
    Ok(())
}

fn print_reply(reader: &mut impl BufRead) -> std::io::Result<()> {
    let mut line = String::new();
    reader.read_line(&mut line)?;
    let line = line.trim_end_matches(['\r', '\n']);
    let (tag, rest) = line.split_at(1);

    match tag {
        "+" => println!("{rest}"),
        "-" => println!("(error) {rest}"),
        ":" => println!("{rest}"),
        "$" => {
            let len: i64 = rest.parse().unwrap_or(-1);
            if len < 0 {
                println!("(nil)");
            } else {
                let mut buf = vec![0u8; len as usize + 2];
                reader.read_exact(&mut buf)?;
                println!("{}", String::from_utf8_lossy(&buf[..len as usize]));
            }
        }
        "*" => {
            let len: i64 = rest.parse().unwrap_or(-1);
            for i in 0..len.max(0) {
                print!("{i}) ");
                print_reply(reader)?;
            }
        }
        _ => println!("{line}"),
    }
    Ok(())
}
