//! mountvfs command-line front end.
//!
//! Builds a VFS, mounts host directories through automount, runs a single
//! command against it and exits.
//!
//! Usage:
//!   # Show what got mounted where
//!   mountvfs --mount ~/photos --mount /media/usb mounts
//!
//!   # Copy between two host directories through the VFS
//!   mountvfs --mount ./a --mount ./b cp /mnt/3f2/notes.txt /mnt/9ab/notes.txt
//!
//! Logging goes to stderr; set `RUST_LOG=mountvfs_kernel=debug` to trace routing.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use mountvfs_kernel::{
    AutoMount, DiscoveryEvent, FILESYSTEM_TYPE, LocalProvider, MemoryProvider, Provider,
    TokioScheduler, Vfs, VfsConfig,
};

/// Mount-routing virtual filesystem.
#[derive(Parser, Debug)]
#[command(name = "mountvfs")]
#[command(about = "Run a filesystem command across mounted directories")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host directory to mount under the mount root (repeatable)
    #[arg(short, long = "mount", value_name = "DIR")]
    mounts: Vec<PathBuf>,

    /// Mount host directories read-only
    #[arg(long)]
    read_only: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List mount points
    Mounts,
    /// List a directory
    Ls { path: String },
    /// Print a file to stdout
    Cat { path: String },
    /// Copy a file
    Cp { from: String, to: String },
    /// Move or rename an entry
    Mv { from: String, to: String },
    /// Create a directory
    Mkdir { path: String },
    /// Remove a file or directory tree
    Rm { path: String },
    /// Show capacity of the filesystem holding a path
    Df { path: String },
    /// Show metadata of a path
    Stat { path: String },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => VfsConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => VfsConfig::default(),
    };

    let vfs = Arc::new(Vfs::with_config(&config, Arc::new(TokioScheduler::default())));
    vfs.mount(Arc::new(MemoryProvider::new().with_label("tmpfs")), "/tmp")
        .context("mounting tmpfs")?;

    let automount = AutoMount::new(vfs.clone(), config);
    for dir in &args.mounts {
        if !dir.is_dir() {
            bail!("not a directory: {}", dir.display());
        }
        let provider = if args.read_only {
            LocalProvider::read_only(dir)
        } else {
            LocalProvider::new(dir)
        };
        let address = provider.address().to_string();
        let mounted = automount
            .handle(DiscoveryEvent::Added {
                address,
                kind: FILESYSTEM_TYPE.to_string(),
                provider: Arc::new(provider),
            })
            .await
            .with_context(|| format!("mounting {}", dir.display()))?;
        if let Some(point) = mounted {
            tracing::info!(dir = %dir.display(), %point, "host directory mounted");
        }
    }

    run(&vfs, args.command).await
}

async fn run(vfs: &Vfs, command: Command) -> Result<()> {
    match command {
        Command::Mounts => {
            let mut mounts: Vec<_> = vfs.mounts().collect();
            mounts.sort_by(|a, b| a.1.cmp(&b.1));
            for (provider, path) in mounts {
                let label = provider.label().unwrap_or_default();
                let mode = if provider.is_read_only() { "ro" } else { "rw" };
                println!("{path}\t{}\t{mode}\t{label}", provider.address());
            }
        }
        Command::Ls { path } => {
            for name in vfs.list(&path).await? {
                println!("{name}");
            }
        }
        Command::Cat { path } => {
            let data = vfs
                .with_open(&path, "rb", async |s| s.read_to_end().await)
                .await?;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&data).await?;
            stdout.flush().await?;
        }
        Command::Cp { from, to } => vfs.copy(&from, &to).await?,
        Command::Mv { from, to } => {
            vfs.rename(&from, &to).await?;
        }
        Command::Mkdir { path } => {
            if !vfs.make_directory(&path).await? {
                bail!("already exists: {path}");
            }
        }
        Command::Rm { path } => {
            vfs.remove(&path).await?;
        }
        Command::Df { path } => {
            let total = vfs.space_total(&path).await?;
            let used = vfs.space_used(&path).await?;
            let (_, mount) = vfs.get(&path)?;
            println!(
                "{mount}\ttotal={}\tused={}",
                total.map_or_else(|| "-".to_string(), |t| t.to_string()),
                used.map_or_else(|| "-".to_string(), |u| u.to_string()),
            );
        }
        Command::Stat { path } => {
            if !vfs.exists(&path).await {
                bail!("no such file or directory: {path}");
            }
            let kind = if vfs.is_directory(&path).await { "directory" } else { "file" };
            println!("path:     {}", mountvfs_kernel::vfs::canonicalize(&path));
            println!("type:     {kind}");
            println!("size:     {}", vfs.size(&path).await);
            println!("modified: {}", vfs.last_modified(&path).await);
            if let Ok((provider, mount)) = vfs.get(&path) {
                println!("mount:    {mount} ({})", provider.address());
            }
        }
    }
    Ok(())
}
