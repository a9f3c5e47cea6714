//! Application configuration and where it is loaded from
//!
//! The configuration is a single TOML file. Without `--config` the first of
//! `./gdvfs.toml` and `~/.gdvfs.toml` that exists is used; if neither exists
//! every setting takes its default.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use common::config::VfsConfig;

pub const CONFIG_FILE_NAME: &str = "gdvfs.toml";
pub const HOME_CONFIG_FILE_NAME: &str = ".gdvfs.toml";
pub const DEFAULT_MOUNT_NAME: &str = "GDVFS";
/// Environment variable consulted for the access token
pub const TOKEN_ENV: &str = "GDVFS_ACCESS_TOKEN";

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("config file not found: {0}")]
    Missing(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("no access token: set access_token, token_path or {}", TOKEN_ENV)]
    NoToken,
}

/// Settings of the daemon: how and where to mount, how to authenticate,
/// and the tree/resolver tunables under `[vfs]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory to mount on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mount_dir: Option<PathBuf>,
    /// Filesystem name shown by the OS
    pub mount_name: String,
    pub allow_other: bool,
    pub allow_root: bool,
    /// Stay attached to the terminal and log at debug level
    pub foreground: bool,
    pub debug: bool,
    /// Also write logs to this file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
    /// Number of execution contexts serving filesystem requests
    pub workers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// File holding the access token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_path: Option<PathBuf>,
    pub vfs: VfsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mount_dir: None,
            mount_name: DEFAULT_MOUNT_NAME.to_string(),
            allow_other: false,
            allow_root: false,
            foreground: false,
            debug: false,
            log_path: None,
            workers: 8,
            access_token: None,
            token_path: None,
            vfs: VfsConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load_from(path: &Path) -> Result<Self, StateError> {
        let contents = std::fs::read_to_string(path).map_err(|source| StateError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| StateError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_toml(&self) -> Result<String, StateError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Access token from the config, else from `env_token` (the value of
    /// [`TOKEN_ENV`]), else from `token_path`.
    pub fn access_token(&self, env_token: Option<String>) -> Result<String, StateError> {
        let token = match (&self.access_token, env_token, &self.token_path) {
            (Some(token), _, _) => token.clone(),
            (None, Some(token), _) => token,
            (None, None, Some(path)) => {
                std::fs::read_to_string(path).map_err(|source| StateError::Read {
                    path: path.clone(),
                    source,
                })?
            }
            (None, None, None) => return Err(StateError::NoToken),
        };

        let token = token.trim();
        if token.is_empty() {
            return Err(StateError::NoToken);
        }
        Ok(token.to_string())
    }
}

/// Loaded configuration and the file it came from, if any.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub config_path: Option<PathBuf>,
}

impl AppState {
    /// Load the configuration, from `explicit` when given.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, StateError> {
        let cwd = std::env::current_dir().ok();
        let home = dirs::home_dir();
        Self::load_with(explicit, cwd.as_deref(), home.as_deref())
    }

    pub fn load_with(
        explicit: Option<PathBuf>,
        cwd: Option<&Path>,
        home: Option<&Path>,
    ) -> Result<Self, StateError> {
        let config_path = match explicit {
            Some(path) if path.is_file() => Some(path),
            Some(path) => return Err(StateError::Missing(path)),
            None => Self::candidates(cwd, home)
                .into_iter()
                .find(|path| path.is_file()),
        };

        let config = match &config_path {
            Some(path) => {
                tracing::debug!("loading config from {}", path.display());
                AppConfig::load_from(path)?
            }
            None => AppConfig::default(),
        };

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Config file locations searched when none is given, in order.
    pub fn candidates(cwd: Option<&Path>, home: Option<&Path>) -> Vec<PathBuf> {
        cwd.map(|dir| dir.join(CONFIG_FILE_NAME))
            .into_iter()
            .chain(home.map(|dir| dir.join(HOME_CONFIG_FILE_NAME)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_config_file() {
        let cwd = tempfile::tempdir().unwrap();
        let home = tempfile::tempdir().unwrap();

        let state = AppState::load_with(None, Some(cwd.path()), Some(home.path())).unwrap();
        assert!(state.config_path.is_none());
        assert_eq!(state.config, AppConfig::default());
        assert_eq!(state.config.mount_name, "GDVFS");
        assert_eq!(state.config.vfs.cache_duration, 30);
    }

    #[test]
    fn test_working_directory_wins_over_home() {
        let cwd = tempfile::tempdir().unwrap();
        let home = tempfile::tempdir().unwrap();
        std::fs::write(cwd.path().join(CONFIG_FILE_NAME), "workers = 2\n").unwrap();
        std::fs::write(home.path().join(HOME_CONFIG_FILE_NAME), "workers = 3\n").unwrap();

        let state = AppState::load_with(None, Some(cwd.path()), Some(home.path())).unwrap();
        assert_eq!(state.config.workers, 2);

        std::fs::remove_file(cwd.path().join(CONFIG_FILE_NAME)).unwrap();
        let state = AppState::load_with(None, Some(cwd.path()), Some(home.path())).unwrap();
        assert_eq!(state.config.workers, 3);
        assert_eq!(
            state.config_path,
            Some(home.path().join(HOME_CONFIG_FILE_NAME))
        );
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            AppState::load_with(Some(missing), None, None),
            Err(StateError::Missing(_))
        ));
    }

    #[test]
    fn test_parse_nested_vfs_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            r#"
mount_dir = "/mnt/drive"
allow_other = true

[vfs]
cache_duration = 120
include_formats = "mp4"
max_page_retries = 5
"#,
        )
        .unwrap();

        let state = AppState::load_with(Some(path.clone()), None, None).unwrap();
        let config = state.config;
        assert_eq!(config.mount_dir, Some(PathBuf::from("/mnt/drive")));
        assert!(config.allow_other);
        assert_eq!(config.vfs.cache_duration, 120);
        assert_eq!(config.vfs.allowed_formats(), vec!["mp4"]);
        assert_eq!(config.vfs.max_page_retries, Some(5));
        // untouched keys keep their defaults
        assert_eq!(config.vfs.video_extensions, "mkv,avi,mp4");
        assert_eq!(config.workers, 8);
    }

    #[test]
    fn test_invalid_config_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "workers = \"many\"\n").unwrap();

        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, StateError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_rendered_config_loads_back() {
        let config = AppConfig {
            mount_dir: Some(PathBuf::from("/mnt/x")),
            ..Default::default()
        };
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("[vfs]"));
        assert_eq!(toml::from_str::<AppConfig>(&rendered).unwrap(), config);
    }

    #[test]
    fn test_access_token_sources() {
        let dir = tempfile::tempdir().unwrap();
        let token_file = dir.path().join("token");
        std::fs::write(&token_file, "from-file\n").unwrap();

        let mut config = AppConfig {
            token_path: Some(token_file),
            ..Default::default()
        };
        assert_eq!(config.access_token(None).unwrap(), "from-file");
        assert_eq!(config.access_token(Some("from-env".into())).unwrap(), "from-env");

        config.access_token = Some("from-config".into());
        assert_eq!(config.access_token(Some("from-env".into())).unwrap(), "from-config");

        let empty = AppConfig::default();
        assert!(matches!(empty.access_token(None), Err(StateError::NoToken)));
        assert!(matches!(
            empty.access_token(Some("  ".into())),
            Err(StateError::NoToken)
        ));
    }
}
