use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use owo_colors::OwoColorize;

use common::adapter::FsAdapter;
use common::session::SessionPool;
use common::tree::VirtualTree;
use gdvfs_daemon::fuse::{self, MountError};
use gdvfs_daemon::logging;
use gdvfs_daemon::state::{AppConfig, AppState, StateError, TOKEN_ENV};
use gdvfs_daemon::TokenSessionProvider;

/// Mount the drive and serve it until interrupted.
#[derive(Args, Debug, Clone, Default)]
pub struct Mount {
    /// Directory to mount on (overrides `mount_dir`)
    #[arg(long)]
    pub mount_dir: Option<PathBuf>,

    /// Filesystem name shown by the OS
    #[arg(long)]
    pub mount_name: Option<String>,

    /// Stay attached and log at debug level
    #[arg(long, short)]
    pub foreground: bool,

    /// Let other users access the mount
    #[arg(long)]
    pub allow_other: bool,

    /// Let root access the mount
    #[arg(long)]
    pub allow_root: bool,

    #[arg(long, short)]
    pub debug: bool,

    /// Number of workers serving filesystem requests
    #[arg(long)]
    pub workers: Option<usize>,

    /// Also write logs to this file
    #[arg(long)]
    pub log_path: Option<PathBuf>,
}

impl Mount {
    /// Overlay the flags that were given onto `config`.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(dir) = &self.mount_dir {
            config.mount_dir = Some(dir.clone());
        }
        if let Some(name) = &self.mount_name {
            config.mount_name = name.clone();
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(path) = &self.log_path {
            config.log_path = Some(path.clone());
        }
        config.foreground |= self.foreground;
        config.allow_other |= self.allow_other;
        config.allow_root |= self.allow_root;
        config.debug |= self.debug;
    }
}

#[derive(Debug)]
pub struct MountOutput {
    pub mount_dir: PathBuf,
}

impl fmt::Display for MountOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            "Unmounted".green().bold(),
            self.mount_dir.display().to_string().bold()
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MountOpError {
    #[error("mount failed: {0}")]
    State(#[from] StateError),

    #[error("mount failed: {0}")]
    Mount(#[from] MountError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Mount {
    type Error = MountOpError;
    type Output = MountOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut state = AppState::load(ctx.config_path.clone())?;
        self.apply(&mut state.config);
        let config = state.config;

        let _guard = logging::init(
            config.debug || config.foreground,
            config.log_path.as_deref(),
        );
        match &state.config_path {
            Some(path) => tracing::info!("using config {}", path.display()),
            None => tracing::info!("no config file found, using defaults"),
        }

        let mount_dir = fuse::mount_point(&config)?.to_path_buf();
        let token = config.access_token(std::env::var(TOKEN_ENV).ok())?;
        let provider = TokenSessionProvider::new(token, config.vfs.request_timeout());
        let pool = Arc::new(SessionPool::new(Arc::new(provider)));
        let tree = Arc::new(VirtualTree::new(config.vfs.clone()));
        let adapter = Arc::new(FsAdapter::new(tree));

        fuse::mount(&config, adapter, pool).await?;

        Ok(MountOutput { mount_dir })
    }
}
