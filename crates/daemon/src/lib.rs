//! Daemon side of gdvfs: configuration, sessions, the worker pool and the
//! FUSE mount (behind the `fuse` feature).

pub mod auth;
pub mod dispatch;
#[cfg(feature = "fuse")]
pub mod fuse;
pub mod logging;
pub mod state;

pub use auth::TokenSessionProvider;
pub use dispatch::{JobDispatcher, JobHandler, WorkerPool};
pub use state::{AppConfig, AppState, StateError};

/// Version string reported by `gdvfs version`.
pub fn version() -> String {
    format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}
