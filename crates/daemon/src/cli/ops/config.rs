use std::fmt;
use std::path::PathBuf;

use clap::Args;
use owo_colors::OwoColorize;

use gdvfs_daemon::state::{AppState, StateError};

/// Print the effective configuration as TOML.
#[derive(Args, Debug, Clone)]
pub struct Config {
    /// Show the access token instead of masking it
    #[arg(long)]
    pub show_token: bool,
}

#[derive(Debug)]
pub struct ConfigOutput {
    pub source: Option<PathBuf>,
    pub toml: String,
}

impl fmt::Display for ConfigOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            Some(path) => path.display().to_string(),
            None => "defaults (no config file found)".to_string(),
        };
        writeln!(f, "{} {}", "# source:".dimmed(), source.bold())?;
        write!(f, "{}", self.toml.trim_end())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config failed: {0}")]
    State(#[from] StateError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Config {
    type Error = ConfigError;
    type Output = ConfigOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let mut config = state.config;
        if !self.show_token && config.access_token.is_some() {
            config.access_token = Some("***".to_string());
        }

        Ok(ConfigOutput {
            source: state.config_path,
            toml: config.to_toml()?,
        })
    }
}
