//! ChunkVault CLI
//!
//! Command-line interface for inspecting and maintaining a store file.

use std::fs;
use std::path::PathBuf;

use chunkvault::{ChunkStore, Config, Result, BLOCK_SIZE};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// ChunkVault CLI
#[derive(Parser, Debug)]
#[command(name = "chunkvault-cli")]
#[command(about = "Inspect and maintain a ChunkVault store file")]
#[command(version)]
struct Args {
    /// Store file
    #[arg(short, long, default_value = "./chunkvault.db")]
    file: PathBuf,

    /// Always append new chunks instead of reusing free space
    #[arg(long)]
    no_reuse: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show store statistics
    Info,

    /// Store the contents of a file as a new chunk
    Put {
        /// File whose bytes become the chunk payload
        input: PathBuf,
    },

    /// Print or export a chunk payload
    Get {
        /// Chunk id
        id: u32,

        /// Write the payload here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Remove a chunk
    Remove {
        /// Chunk id
        id: u32,
    },

    /// Compact the file and truncate reclaimed space
    Compact {
        /// Stop once this percentage of the in-use region is occupied
        #[arg(short, long, default_value = "90")]
        target_fill_rate: u32,

        /// Byte budget per pass in MB
        #[arg(short, long, default_value = "16")]
        move_size_mb: u64,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,chunkvault=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let read_only = matches!(args.command, Commands::Info | Commands::Get { .. });
    let config = Config::builder()
        .path(&args.file)
        .read_only(read_only)
        .reuse_space(!args.no_reuse)
        .build();
    let store = ChunkStore::open(config)?;

    match args.command {
        Commands::Info => {
            println!("file:          {}", args.file.display());
            println!("version:       {}", store.version());
            println!("chunks:        {}", store.chunk_count());
            println!("file size:     {} bytes", store.file_size());
            println!("in use:        {} bytes", store.file_length_in_use());
            println!("fill rate:     {}%", store.fill_rate());
            println!("fragmented:    {}", store.engine().is_fragmented());
        }
        Commands::Put { input } => {
            let payload = fs::read(&input)?;
            let chunk = store.write_chunk(&payload)?;
            store.commit()?;
            println!("{}", chunk.id);
        }
        Commands::Get { id, output } => {
            let payload = store.read_chunk(id)?;
            match output {
                Some(path) => fs::write(path, &payload)?,
                None => {
                    use std::io::Write;
                    std::io::stdout().write_all(&payload)?;
                }
            }
        }
        Commands::Remove { id } => {
            store.remove_chunk(id)?;
            store.commit()?;
        }
        Commands::Compact {
            target_fill_rate,
            move_size_mb,
        } => {
            let before = store.file_size();
            let move_size = move_size_bytes(move_size_mb);
            let moved = store.compact_file(target_fill_rate, move_size)?;
            store.engine().shrink_if_possible(0)?;
            println!(
                "moved: {}, size: {} -> {} bytes, fill rate: {}%",
                moved,
                before,
                store.file_size(),
                store.fill_rate()
            );
        }
    }

    store.close()
}

/// Compaction budget in bytes for a `--move-size-mb` argument
fn move_size_bytes(move_size_mb: u64) -> u64 {
    move_size_mb.saturating_mul(1024 * 1024).max(BLOCK_SIZE)
}
