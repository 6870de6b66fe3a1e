//! iolens mount binary.
//!
//! Mounts a workload-tracing mirror of a backing directory. All I/O
//! through the mount point is forwarded to the backing tree while the
//! trace journal records logical read/write transactions; the summary
//! block is appended at unmount.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use iolens_common::canonical_backing_root;
use iolens_vfs::MountOptions;

#[derive(Parser)]
#[command(name = "iolens", version, about = "Workload-tracing passthrough filesystem")]
struct Args {
    /// Directory tree to mirror and observe
    backing_root: PathBuf,

    /// Mount point for the observed view
    mount_point: PathBuf,

    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Trace journal location (overrides the configuration file)
    #[arg(long)]
    journal: Option<PathBuf>,

    /// Allow other users to access the filesystem
    #[arg(long)]
    allow_other: bool,

    /// Keep the mount after process exit instead of auto-unmounting
    #[arg(long)]
    no_auto_unmount: bool,
}

/// Assemble mount options from the config file and flag overrides.
fn load_options(args: &Args) -> Result<MountOptions> {
    let mut options: MountOptions = match &args.config {
        Some(path) => {
            let content: String = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read config file {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("cannot parse config file {}", path.display()))?
        }
        None => MountOptions::default(),
    };

    if let Some(journal) = &args.journal {
        options = options.with_journal_path(journal.clone());
    }
    if args.allow_other {
        options = options.with_allow_other(true);
    }
    if args.no_auto_unmount {
        options = options.with_auto_unmount(false);
    }

    Ok(options)
}

/// Refuse to serve a privileged account.
///
/// The filesystem does no access checking of its own; mounted by root
/// it would hand out root-powered passthrough on the whole backing
/// tree.
fn refuse_privileged_user() -> Result<()> {
    let uid: libc::uid_t = unsafe { libc::getuid() };
    let euid: libc::uid_t = unsafe { libc::geteuid() };
    if uid == 0 || euid == 0 {
        bail!("refusing to run as root: mount as an unprivileged user");
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args: Args = Args::parse();
    refuse_privileged_user()?;

    let backing_root: PathBuf = canonical_backing_root(&args.backing_root)
        .with_context(|| format!("invalid backing root {}", args.backing_root.display()))?;
    let options: MountOptions = load_options(&args)?;

    info!("Backing root: {}", backing_root.display());
    info!("Mount point: {}", args.mount_point.display());
    info!("Trace journal: {}", options.journal_path.display());

    #[cfg(all(feature = "fuse", target_os = "linux"))]
    {
        use std::sync::Arc;

        use iolens_vfs::{TraceJournal, WorkloadFs, WorkloadFuse, WorkloadStats};

        // The journal is the session's only sink; refuse to serve a
        // single operation without it.
        let journal: Arc<TraceJournal> = Arc::new(
            TraceJournal::create(&options.journal_path).context("cannot open trace journal")?,
        );

        let core = WorkloadFs::new(backing_root, Arc::new(WorkloadStats::new()), journal);
        let fs = WorkloadFuse::new(core, &options);

        info!("Mounting filesystem...");
        iolens_vfs::mount_workload(fs, &args.mount_point, &options)
            .context("mount session failed")?;
        info!("Unmounted; summary written to {}", options.journal_path.display());
    }

    #[cfg(not(all(feature = "fuse", target_os = "linux")))]
    {
        let _ = backing_root;
        tracing::warn!("FUSE support not compiled in; nothing was mounted.");
        info!("To enable FUSE support, compile with: cargo build --features fuse");
    }

    Ok(())
}
