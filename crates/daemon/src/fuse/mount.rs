//! Mounting the filesystem and running it until interrupted

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fuser::MountOption;
use parking_lot::Mutex;

use common::adapter::FsAdapter;
use common::session::SessionPool;

use super::gdvfs::{AttrDefaults, FsWorker, Gdvfs};
use super::inode_table::InodeTable;
use crate::dispatch::JobDispatcher;
use crate::state::AppConfig;

/// How long the kernel may cache attributes and entries.
const ATTR_TTL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("no mount directory configured")]
    NoMountDir,

    #[error("mount directory does not exist: {0}")]
    MissingMountDir(PathBuf),

    #[error("failed to mount {path}: {source}")]
    Mount {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed waiting for shutdown signal: {0}")]
    Signal(std::io::Error),
}

/// Options passed to the kernel for `config`.
pub fn mount_options(config: &AppConfig) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::RO,
        MountOption::FSName(config.mount_name.clone()),
    ];
    if config.allow_other {
        options.push(MountOption::AllowOther);
    } else if config.allow_root {
        options.push(MountOption::AllowRoot);
    }
    // fusermount refuses auto_unmount unless other users may access the mount
    if config.allow_other || config.allow_root {
        options.push(MountOption::AutoUnmount);
    }

    #[cfg(target_os = "macos")]
    {
        options.push(MountOption::CUSTOM(format!("volname={}", config.mount_name)));
        options.push(MountOption::CUSTOM("local".to_string()));
        options.push(MountOption::CUSTOM("noappledouble".to_string()));
    }

    options
}

/// Mount directory from the config, which must already exist.
pub fn mount_point(config: &AppConfig) -> Result<&Path, MountError> {
    let dir = config.mount_dir.as_deref().ok_or(MountError::NoMountDir)?;
    if !dir.is_dir() {
        return Err(MountError::MissingMountDir(dir.to_path_buf()));
    }
    Ok(dir)
}

/// Mount `adapter` at the configured directory and serve requests with
/// `config.workers` workers until Ctrl-C, then unmount.
///
/// Must be called from within a tokio runtime.
pub async fn mount(
    config: &AppConfig,
    adapter: Arc<FsAdapter>,
    pool: Arc<SessionPool>,
) -> Result<(), MountError> {
    let dir = mount_point(config)?;

    let inodes = Arc::new(Mutex::new(InodeTable::new()));
    let worker = FsWorker::new(
        adapter,
        inodes.clone(),
        AttrDefaults::for_current_user(ATTR_TTL),
    );
    let (dispatcher, workers) = JobDispatcher::start(config.workers, pool, Arc::new(worker));
    let fs = Gdvfs::new(inodes, dispatcher);

    let session = fuser::spawn_mount2(fs, dir, &mount_options(config)).map_err(|source| {
        MountError::Mount {
            path: dir.to_path_buf(),
            source,
        }
    })?;
    tracing::info!(
        "mounted {} at {} with {} workers",
        config.mount_name,
        dir.display(),
        workers.len()
    );

    let signal = tokio::signal::ctrl_c().await;

    tracing::info!("unmounting {}", dir.display());
    // Unmounting drops the filesystem and with it the last dispatcher,
    // which lets the workers drain and exit.
    session.join();
    workers.join().await;

    signal.map_err(MountError::Signal)
}
