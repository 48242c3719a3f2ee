//! Strata CLI
//!
//! Command-line interface for operating on a Strata data directory.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use strata::{Config, Engine, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Strata CLI
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(about = "Embedded LSM key-value storage engine")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./strata_data")]
    data_dir: PathBuf,

    /// Active table size in MB before it is handed to the flush worker
    #[arg(short = 'f', long, default_value = "64")]
    flush_threshold_mb: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Delete a key
    Delete {
        /// The key to delete
        key: String,
    },

    /// List live entries in key order
    Scan {
        /// Inclusive lower bound
        #[arg(long)]
        from: Option<String>,

        /// Exclusive upper bound
        #[arg(long)]
        to: Option<String>,
    },

    /// Merge all segments into one
    Compact,

    /// Print segment statistics
    Stats,

    /// Check every segment's data checksum
    Verify,
}

fn main() -> ExitCode {
    // Logs go to stderr so command output stays clean
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,strata=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    tracing::debug!("Strata CLI v{}", strata::VERSION);

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .flush_threshold_bytes(args.flush_threshold_mb.saturating_mul(1024 * 1024))
        .build();

    let engine = match Engine::open(config) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = run(&engine, args.command);
    let closed = engine.close();

    match outcome.and(closed) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(engine: &Engine, command: Commands) -> Result<()> {
    match command {
        Commands::Put { key, value } => {
            engine.put(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Get { key } => match engine.get_value(key.as_bytes())? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(nil)"),
        },
        Commands::Delete { key } => {
            engine.delete(key.as_bytes())?;
            println!("OK");
        }
        Commands::Scan { from, to } => {
            let entries = engine.get_range(
                from.as_deref().map(str::as_bytes),
                to.as_deref().map(str::as_bytes),
            )?;
            let mut count = 0usize;
            for entry in entries {
                let entry = entry?;
                let value = entry.value().map(|v| String::from_utf8_lossy(v)).unwrap_or_default();
                println!("{}\t{}", String::from_utf8_lossy(entry.key()), value);
                count += 1;
            }
            println!("({} entries)", count);
        }
        Commands::Compact => {
            // Persist the active table first so it takes part in the merge
            engine.flush()?;
            engine.compact()?;
            println!("Compaction scheduled");
        }
        Commands::Stats => {
            let Some(store) = engine.store() else {
                return Ok(());
            };
            println!("data_dir:   {}", store.data_dir().display());
            println!("segments:   {}", store.segment_count());
            println!("disk_size:  {} bytes", store.disk_size()?);
            println!("compacted:  {}", store.is_compacted());
            for segment in store.segments() {
                let meta = segment.meta();
                println!(
                    "  gen {:>6}  entries {:>8}  bytes {:>10}{}",
                    meta.generation,
                    meta.entry_count,
                    segment.file_size(),
                    if meta.compacted { "  (compacted)" } else { "" }
                );
            }
        }
        Commands::Verify => {
            let Some(store) = engine.store() else {
                return Ok(());
            };
            for segment in store.segments() {
                segment.verify()?;
                println!("{}: ok", segment.path().display());
            }
        }
    }
    Ok(())
}
