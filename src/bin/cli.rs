//! lsmkv CLI
//!
//! Opens a data directory, runs a single command against it, and closes the
//! engine (flushing anything written).

use clap::{Parser, Subcommand};
use lsmkv::{Config, Engine, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// lsmkv CLI
#[derive(Parser, Debug)]
#[command(name = "lsmkv-cli")]
#[command(about = "CLI for the lsmkv embedded key-value store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./lsmkv_data")]
    data_dir: String,

    /// MemTable size in KB before flush
    #[arg(short = 'm', long, default_value = "4096")]
    memtable_kb: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// List live entries in [from, to)
    Scan {
        /// Inclusive lower bound
        #[arg(long)]
        from: Option<String>,

        /// Exclusive upper bound
        #[arg(long)]
        to: Option<String>,

        /// Stop after this many entries
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Flush the memtable to an SSTable
    Flush,

    /// Merge all SSTables into one
    Compact,

    /// Print engine statistics
    Stats,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lsmkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .flush_threshold(args.memtable_kb * 1024)
        .build();

    let engine = match Engine::open(config) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            std::process::exit(1);
        }
    };

    let outcome = run(&engine, args.command).and_then(|()| engine.close());
    if let Err(e) = outcome {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(engine: &Engine, command: Commands) -> Result<()> {
    match command {
        Commands::Get { key } => match engine.get(key.as_bytes())? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(nil)"),
        },
        Commands::Put { key, value } => {
            engine.put(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Del { key } => {
            engine.delete(key.as_bytes())?;
            println!("OK");
        }
        Commands::Scan { from, to, limit } => {
            let range = engine.range(
                from.as_deref().map(str::as_bytes),
                to.as_deref().map(str::as_bytes),
            )?;
            for entry in range.take(limit.unwrap_or(usize::MAX)) {
                let entry = entry?;
                let value = entry.value.as_bytes().map(|v| v.to_vec()).unwrap_or_default();
                println!(
                    "{}\t{}",
                    String::from_utf8_lossy(&entry.key),
                    String::from_utf8_lossy(&value)
                );
            }
        }
        Commands::Flush => {
            engine.flush()?;
            println!("OK");
        }
        Commands::Compact => {
            engine.flush()?;
            engine.compact()?;
            engine.wait_for_compaction()?;
            println!("OK ({} sstables)", engine.sstable_count());
        }
        Commands::Stats => {
            println!("data_dir:        {}", engine.data_dir().display());
            println!("sstables:        {}", engine.sstable_count());
            println!("memtable_bytes:  {}", engine.memtable_size());
            println!("memtable_keys:   {}", engine.memtable_entry_count());
            println!("pending_flushes: {}", engine.pending_flushes());
        }
    }
    Ok(())
}
