//! Core of the drive video filesystem
//!
//! - [`tree`] mirrors the remote folder hierarchy, showing videos as
//!   directories of their streamable variants
//! - [`media`] recovers those variants from the video-info endpoint
//! - [`stream`] keeps upstream streams open across sequential reads
//! - [`adapter`] exposes all of it as filesystem operations
//!
//! Every operation takes a [`session::Context`] naming the caller and the
//! remote session it uses.

pub mod adapter;
pub mod config;
pub mod drive;
pub mod http;
pub mod media;
pub mod session;
pub mod stream;
pub mod tree;

pub mod prelude {
    pub use crate::adapter::{FsAdapter, FsError};
    pub use crate::config::VfsConfig;
    pub use crate::session::{Context, ContextId, Session, SessionPool, SessionProvider};
    pub use crate::tree::{NodeAttr, NodeKind, VirtualTree};
}
