#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use mtfs_auth::AuthManager;
use mtfs_cache::EvictionPolicy;
use mtfs_concurrent::pool;
use mtfs_core::FileStore;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

// ── CLI definition ──────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "mtfs", about = "MTFS — memory-tiered user-space file store")]
struct Cli {
    /// Store root directory.
    #[arg(long, default_value = "./mtfs-root")]
    root: PathBuf,

    /// Username for the session.
    #[arg(long, default_value = "admin")]
    user: String,

    /// Password for the session.
    #[arg(long, default_value = "admin")]
    password: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    Lru,
    Lfu,
    Fifo,
    Lifo,
}

impl From<PolicyArg> for EvictionPolicy {
    fn from(value: PolicyArg) -> Self {
        match value {
            PolicyArg::Lru => Self::Lru,
            PolicyArg::Lfu => Self::Lfu,
            PolicyArg::Fifo => Self::Fifo,
            PolicyArg::Lifo => Self::Lifo,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Create an empty file.
    Create { path: String },
    /// Write a string to a file.
    Write { path: String, data: String },
    /// Print a file's contents.
    Read { path: String },
    /// Delete a file.
    Delete { path: String },
    /// Create a directory.
    Mkdir { path: String },
    /// List a directory.
    Ls {
        #[arg(default_value = ".")]
        path: String,
    },
    /// Copy a file.
    Copy { source: String, destination: String },
    /// Move a file.
    Move { source: String, destination: String },
    /// Find files by glob or substring pattern.
    Find {
        pattern: String,
        #[arg(default_value = ".")]
        directory: String,
    },
    /// Show file metadata.
    Info { path: String },
    /// Change permission bits (octal).
    Chmod { path: String, mode: String },
    /// Compress a file in place.
    Compress { path: String },
    /// Decompress a file in place.
    Decompress { path: String },
    /// Backup operations.
    #[command(subcommand)]
    Backup(BackupCommand),
    /// Cache controls.
    #[command(subcommand)]
    Cache(CacheCommand),
    /// Performance and cache statistics.
    Stats {
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum BackupCommand {
    /// Create a full backup of the store root.
    Create { name: String },
    /// Create an incremental backup against a parent.
    Incremental { name: String, parent: String },
    /// Restore a backup.
    Restore {
        name: String,
        /// Target directory; defaults to a sibling of the store root.
        #[arg(long)]
        target: Option<PathBuf>,
    },
    /// Delete a backup.
    Delete { name: String },
    /// List backups, newest first.
    List,
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Show or switch the eviction policy.
    Policy {
        #[arg(value_enum)]
        policy: Option<PolicyArg>,
    },
    /// Rebuild the cache with a new capacity.
    Resize { capacity: usize },
    /// Pin a file's content in the cache.
    Pin { path: String },
    /// Unpin a file.
    Unpin { path: String },
    /// Drop every cached entry.
    Clear,
    /// Show hot files and counters.
    Analytics,
}

// ── Serializable outputs ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct StatsOutput {
    cache_hits: u64,
    cache_misses: u64,
    cache_hit_rate: f64,
    cache_evictions: u64,
    cache_resident: usize,
    cache_pinned: usize,
    cache_prefetched: u64,
    total_reads: u64,
    total_writes: u64,
    total_operations: u64,
    journal_entries: usize,
    journal_sequence: u64,
    free_blocks: usize,
    total_blocks: usize,
}

// ── Main ────────────────────────────────────────────────────────────────────

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let auth = Arc::new(AuthManager::new());
    if !auth.login(&cli.user, &cli.password) {
        bail!("login failed for user {}", cli.user);
    }

    let worker_pool = pool::global();
    let store = FileStore::create(&cli.root, Some(auth), worker_pool)
        .with_context(|| format!("failed to open store at {}", cli.root.display()))?;

    let outcome = dispatch(&store, cli.command);
    pool::shutdown_global();
    outcome
}

fn dispatch(store: &Arc<FileStore>, command: Command) -> Result<()> {
    match command {
        Command::Create { path } => {
            store.create_file(&path)?;
            println!("created {path}");
        }
        Command::Write { path, data } => {
            store.write_file(&path, data.as_bytes())?;
            println!("wrote {} bytes to {path}", data.len());
        }
        Command::Read { path } => {
            let data = store.read_file(&path)?;
            print!("{}", String::from_utf8_lossy(&data));
        }
        Command::Delete { path } => {
            store.delete_file(&path)?;
            println!("deleted {path}");
        }
        Command::Mkdir { path } => {
            store.create_dir(&path)?;
            println!("created directory {path}");
        }
        Command::Ls { path } => {
            for name in store.list_dir(&path)? {
                println!("{name}");
            }
        }
        Command::Copy {
            source,
            destination,
        } => {
            store.copy_file(&source, &destination)?;
            println!("copied {source} -> {destination}");
        }
        Command::Move {
            source,
            destination,
        } => {
            store.move_file(&source, &destination)?;
            println!("moved {source} -> {destination}");
        }
        Command::Find { pattern, directory } => {
            for path in store.find(&pattern, &directory)? {
                println!("{path}");
            }
        }
        Command::Info { path } => {
            let info = store.info(&path)?;
            println!("name:        {}", info.name);
            println!("size:        {}", info.size);
            println!("directory:   {}", info.is_directory);
            println!("permissions: {:o}", info.permissions);
            println!("owner:       {}", info.owner);
            println!("modified:    {}", info.modified_at);
        }
        Command::Chmod { path, mode } => {
            let bits = u32::from_str_radix(&mode, 8)
                .with_context(|| format!("invalid octal mode {mode}"))?;
            store.set_permissions(&path, bits)?;
            println!("permissions of {path} set to {bits:o}");
        }
        Command::Compress { path } => {
            store.compress_file(&path)?;
            let stats = store.compression_stats();
            println!(
                "compressed {path} (overall ratio {:.1}%)",
                stats.overall_ratio()
            );
        }
        Command::Decompress { path } => {
            store.decompress_file(&path)?;
            println!("decompressed {path}");
        }
        Command::Backup(backup) => dispatch_backup(store, backup)?,
        Command::Cache(cache) => dispatch_cache(store, cache)?,
        Command::Stats { json } => print_stats(store, json)?,
    }
    Ok(())
}

fn dispatch_backup(store: &Arc<FileStore>, command: BackupCommand) -> Result<()> {
    match command {
        BackupCommand::Create { name } => {
            store.create_backup(&name)?;
            println!("backup {name} created");
        }
        BackupCommand::Incremental { name, parent } => {
            store.create_incremental_backup(&name, &parent)?;
            println!("incremental backup {name} created (parent {parent})");
        }
        BackupCommand::Restore { name, target } => {
            store.restore_backup(&name, target.as_deref())?;
            println!("backup {name} restored");
        }
        BackupCommand::Delete { name } => {
            store.delete_backup(&name)?;
            println!("backup {name} deleted");
        }
        BackupCommand::List => {
            let backups = store.list_backups();
            if backups.is_empty() {
                println!("no backups");
            }
            for name in backups {
                println!("{name}");
            }
        }
    }
    Ok(())
}

fn dispatch_cache(store: &Arc<FileStore>, command: CacheCommand) -> Result<()> {
    match command {
        CacheCommand::Policy { policy } => match policy {
            Some(policy) => {
                store.set_cache_policy(policy.into());
                println!("cache policy set to {}", store.cache_policy());
            }
            None => println!("cache policy: {}", store.cache_policy()),
        },
        CacheCommand::Resize { capacity } => {
            store.resize_cache(capacity);
            println!("cache resized to {capacity}");
        }
        CacheCommand::Pin { path } => {
            store.pin_file(&path)?;
            println!("pinned {path}");
        }
        CacheCommand::Unpin { path } => {
            store.unpin_file(&path);
            println!("unpinned {path}");
        }
        CacheCommand::Clear => {
            store.clear_cache();
            println!("cache cleared");
        }
        CacheCommand::Analytics => {
            print!("{}", store.performance_dashboard());
            let hot = store.hot_files(10);
            if !hot.is_empty() {
                println!("hot files:");
                for path in hot {
                    println!("  {path}");
                }
            }
        }
    }
    Ok(())
}

fn print_stats(store: &Arc<FileStore>, json: bool) -> Result<()> {
    let perf = store.stats();
    let cache = store.cache_statistics();
    let output = StatsOutput {
        cache_hits: cache.hits,
        cache_misses: cache.misses,
        cache_hit_rate: cache.hit_rate(),
        cache_evictions: cache.evictions,
        cache_resident: store.cache_len(),
        cache_pinned: cache.pinned_items,
        cache_prefetched: cache.prefetched_items,
        total_reads: perf.total_reads,
        total_writes: perf.total_writes,
        total_operations: perf.total_operations,
        journal_entries: store.journal().len(),
        journal_sequence: store.journal().last_sequence(),
        free_blocks: store.block_store().free_blocks(),
        total_blocks: store.block_store().total_blocks(),
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("serialize stats")?
        );
    } else {
        print!("{}", store.performance_dashboard());
        println!(
            "journal: {} entries, sequence {}",
            output.journal_entries, output.journal_sequence
        );
        println!(
            "blocks:  {}/{} free",
            output.free_blocks, output.total_blocks
        );
    }
    Ok(())
}
