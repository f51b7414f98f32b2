//! `mftfs`: mount a local directory as a passthrough FUSE filesystem.

// Use mimalloc for reduced allocation latency (enabled by default).
// Disable with `--no-default-features` if debugging allocator issues.
#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use mftfs_fuse::{FuseBackend, MountConfig};
use std::io;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// How often the mount is checked for external unmounts.
const LIVENESS_INTERVAL: Duration = Duration::from_secs(1);

/// Expose a local directory tree as a FUSE filesystem
#[derive(Parser, Debug)]
#[command(name = "mftfs")]
#[command(author, version)]
#[command(after_help = "EXAMPLES:
    # Mirror ~/data at /mnt/data until Ctrl-C
    mftfs ~/data /mnt/data

    # Shorter kernel caching, debug logging
    mftfs --ttl-secs 5 -vv ~/data /mnt/data
")]
struct Cli {
    /// Directory to expose
    backing_root: PathBuf,

    /// Where to mount it (created if missing)
    mountpoint: PathBuf,

    /// Let other users access the mount
    #[arg(long)]
    allow_other: bool,

    /// Keep the mount if the process dies
    #[arg(long)]
    no_auto_unmount: bool,

    /// Entry and attribute cache lifetime in seconds
    #[arg(long, env = "MFTFS_TTL_SECS", default_value_t = 60)]
    ttl_secs: u64,

    /// Handler worker threads (default: logical CPUs)
    #[arg(long)]
    threads: Option<usize>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn mount_config(&self) -> MountConfig {
        let mut config = MountConfig::default()
            .ttl(Duration::from_secs(self.ttl_secs))
            .allow_other(self.allow_other)
            .auto_unmount(!self.no_auto_unmount);
        if let Some(threads) = self.threads {
            config = config.worker_threads(threads);
        }
        config
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing(cli.verbose);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("Failed to set signal handler")?;

    let handle = FuseBackend::new()
        .mount(&cli.backing_root, &cli.mountpoint, &cli.mount_config())
        .with_context(|| {
            format!(
                "Failed to mount {} at {}",
                cli.backing_root.display(),
                cli.mountpoint.display()
            )
        })?;
    eprintln!(
        "Mounted {} at {} (Ctrl-C to unmount)",
        cli.backing_root.display(),
        handle.mountpoint().display()
    );

    loop {
        match rx.recv_timeout(LIVENESS_INTERVAL) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                tracing::info!("Received termination request");
                break;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if !handle.is_active() {
                    tracing::warn!("Mount disappeared, exiting");
                    break;
                }
            }
        }
    }

    handle.unmount().context("Failed to unmount")?;
    Ok(())
}

fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}
