pub mod config;
#[cfg(feature = "fuse")]
pub mod mount;
pub mod version;

pub use config::Config;
#[cfg(feature = "fuse")]
pub use mount::Mount;
pub use version::Version;
