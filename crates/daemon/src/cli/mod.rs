pub mod op;
pub mod ops;

use clap::Parser;
use std::path::PathBuf;

use op::Op;

crate::command_enum! {
    #[cfg(feature = "fuse")]
    (Mount, ops::Mount),
    (Config, ops::Config),
    (Version, ops::Version),
}

/// Mount a drive as a read-only filesystem of streamable video variants.
#[derive(Parser, Debug)]
#[command(name = "gdvfs", version, about)]
pub struct Cli {
    /// Config file (default: ./gdvfs.toml, then ~/.gdvfs.toml)
    #[arg(long, short, global = true, env = "GDVFS_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub async fn run(&self) -> Result<OpOutput, OpError> {
        let ctx = op::OpContext {
            config_path: self.config.clone(),
        };
        self.command.execute(&ctx).await
    }
}
