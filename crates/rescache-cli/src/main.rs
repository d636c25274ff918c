//! `rescache` command line front end.

mod progress;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use console::style;
use rescache::{
    FetchOptions, NativeResolver, ResourceId, ResourceManager, SystemType, TransferMonitor,
};

use crate::progress::ProgressReporter;

#[derive(Parser, Debug)]
#[command(name = "rescache", version, about = "Fetch and cache remote resources")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch a resource into the local cache
    Get(GetArgs),

    /// Upload a cached file back to the remote tree
    Put(PutArgs),

    /// Print the SHA-1 digest of a local file
    Hash(HashArgs),

    /// Check whether a resource exists at its source
    Exists(ExistsArgs),

    /// Resolve (and download if needed) a native library
    Native(NativeArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Local cache directory
    #[arg(short = 'd', long, default_value = ".")]
    cache_dir: PathBuf,

    /// Remote source base resolved against relative identifiers
    #[arg(short = 's', long)]
    source_base: Option<String>,
}

impl CommonArgs {
    fn manager(&self) -> Result<ResourceManager> {
        let base = match &self.source_base {
            Some(s) => Some(ResourceId::parse(s)?),
            None => None,
        };
        Ok(ResourceManager::new(&self.cache_dir, base)?)
    }
}

#[derive(Args, Debug)]
struct GetArgs {
    /// Resource identifier (absolute, or relative to --source-base)
    source: String,

    /// Explicit destination path
    dest: Option<PathBuf>,

    #[command(flatten)]
    common: CommonArgs,

    /// Refetch even when the cached copy looks current
    #[arg(long)]
    force: bool,

    /// Compare the cached copy against the remote .sha1 sidecar
    #[arg(long)]
    check_hash: bool,

    /// Materialize enclosing archives locally before reading entries
    #[arg(long)]
    download_zip: bool,

    /// Progress poll interval in seconds
    #[arg(long, default_value_t = 1)]
    poll: u64,
}

#[derive(Args, Debug)]
struct PutArgs {
    /// Path relative to the cache directory, mirrored remotely
    dest: String,

    /// Upload this file instead of the cached copy
    #[arg(long)]
    file: Option<PathBuf>,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct HashArgs {
    /// Local file to digest
    path: PathBuf,
}

#[derive(Args, Debug)]
struct ExistsArgs {
    /// Resource identifier to probe
    source: String,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct NativeArgs {
    /// Generic library name, e.g. solver.1.3
    name: String,

    /// Managed library root (downloads go here)
    #[arg(long)]
    lib_dir: Option<PathBuf>,

    /// Refresh an already present library via hash comparison
    #[arg(long)]
    update: bool,

    #[command(flatten)]
    common: CommonArgs,
}

async fn run_get(args: GetArgs) -> Result<()> {
    let mut manager = args.common.manager()?;

    let monitor = Arc::new(TransferMonitor::with_poll_seconds(args.poll));
    monitor.add_listener(Arc::new(ProgressReporter::new()));
    monitor.start();
    manager.set_monitor(Arc::clone(&monitor));

    let mut options = FetchOptions::NONE;
    if args.force {
        options |= FetchOptions::FORCE_REMOTE;
    }
    if args.check_hash {
        options |= FetchOptions::CHECK_HASH;
    }
    if args.download_zip {
        options |= FetchOptions::DOWNLOAD_ZIP;
    }

    let result = manager
        .get_with(args.dest.as_deref(), &args.source, options)
        .await;
    monitor.stop();

    let path = result.with_context(|| format!("failed to fetch {}", args.source))?;
    for message in manager.exceptions() {
        eprintln!("{} {message}", style("warning:").yellow().bold());
    }
    let verb = if manager.last_was_remote() {
        "fetched"
    } else {
        "cached"
    };
    println!("{} {}", style(verb).green().bold(), path.display());
    Ok(())
}

async fn run_put(args: PutArgs) -> Result<()> {
    let manager = args.common.manager()?;
    let target = match &args.file {
        Some(file) => manager.put_file(file, &args.dest).await,
        None => manager.put(&args.dest).await,
    }
    .with_context(|| format!("failed to upload {}", args.dest))?;
    println!("{} {target}", style("uploaded").green().bold());
    Ok(())
}

async fn run_hash(args: HashArgs) -> Result<()> {
    let digest = rescache::hash::hash_file(&args.path)
        .await
        .with_context(|| format!("failed to hash {}", args.path.display()))?;
    println!("{digest}  {}", args.path.display());
    Ok(())
}

async fn run_exists(args: ExistsArgs) -> Result<()> {
    let manager = args.common.manager()?;
    let found = manager.exists(&args.source).await?;
    if found {
        println!("{} {}", style("found").green(), args.source);
        Ok(())
    } else {
        println!("{} {}", style("missing").red(), args.source);
        std::process::exit(1);
    }
}

async fn run_native(args: NativeArgs) -> Result<()> {
    let manager = args.common.manager()?;
    let mut resolver = NativeResolver::new(manager);
    if let Some(dir) = &args.lib_dir {
        resolver.set_library_dir(dir);
    }
    match resolver.resolve(&args.name, args.update).await? {
        Some(path) => {
            println!("{} {}", style("resolved").green().bold(), path.display());
            Ok(())
        }
        None => {
            println!(
                "{} {} does not target {}",
                style("skipped").yellow(),
                args.name,
                SystemType::current()
            );
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Get(args) => run_get(args).await,
        Commands::Put(args) => run_put(args).await,
        Commands::Hash(args) => run_hash(args).await,
        Commands::Exists(args) => run_exists(args).await,
        Commands::Native(args) => run_native(args).await,
    }
}
