//! Tracing setup for the daemon

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "gdvfs=info,gdvfs_daemon=info,common=info,warn";
const DEBUG_FILTER: &str = "gdvfs=debug,gdvfs_daemon=debug,common=debug,warn";

/// Filter used when `RUST_LOG` is not set.
pub fn default_filter(debug: bool) -> &'static str {
    if debug {
        DEBUG_FILTER
    } else {
        DEFAULT_FILTER
    }
}

/// Install the global subscriber: stderr always, plus `log_path` when set.
///
/// The returned guard flushes the file writer on drop and must be held for
/// as long as the process logs.
pub fn init(debug: bool, log_path: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(debug)));

    let (file_layer, guard) = match log_path {
        Some(path) => {
            let dir = path.parent().filter(|d| !d.as_os_str().is_empty());
            let name = path.file_name().unwrap_or(path.as_os_str());
            let appender = tracing_appender::rolling::never(dir.unwrap_or(Path::new(".")), name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Some(path) = log_path {
        tracing::info!("logging to {}", path.display());
    }
    guard
}
