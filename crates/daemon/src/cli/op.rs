use std::path::PathBuf;

/// What every command gets to run with.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    /// Config file given with `--config`, if any
    pub config_path: Option<PathBuf>,
}

#[async_trait::async_trait]
pub trait Op: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;
    type Output;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error>;
}

/// Declare a clap `Command` enum over a set of ops, plus the matching
/// `OpOutput`/`OpError` enums and an `Op` impl that forwards to the
/// selected variant.
#[macro_export]
macro_rules! command_enum {
    ($( $(#[$meta:meta])* ($variant:ident, $op:ty) ),* $(,)?) => {
        #[derive(clap::Subcommand, Debug, Clone)]
        pub enum Command {
            $( $(#[$meta])* $variant($op), )*
        }

        #[derive(Debug)]
        pub enum OpOutput {
            $( $(#[$meta])* $variant(<$op as $crate::cli::op::Op>::Output), )*
        }

        #[derive(Debug, thiserror::Error)]
        pub enum OpError {
            $( $(#[$meta])* #[error(transparent)] $variant(<$op as $crate::cli::op::Op>::Error), )*
        }

        impl std::fmt::Display for OpOutput {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $( $(#[$meta])* OpOutput::$variant(output) => write!(f, "{}", output), )*
                }
            }
        }

        #[async_trait::async_trait]
        impl $crate::cli::op::Op for Command {
            type Error = OpError;
            type Output = OpOutput;

            async fn execute(
                &self,
                ctx: &$crate::cli::op::OpContext,
            ) -> Result<Self::Output, Self::Error> {
                match self {
                    $( $(#[$meta])* Command::$variant(op) => op
                        .execute(ctx)
                        .await
                        .map(OpOutput::$variant)
                        .map_err(OpError::$variant), )*
                }
            }
        }
    };
}
