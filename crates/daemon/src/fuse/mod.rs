//! FUSE mount of the virtual tree
//!
//! - `Gdvfs`: the `fuser` filesystem, which queues kernel requests
//! - `FsWorker`: serves queued requests through the `FsAdapter`
//! - `InodeTable`: stable inode numbers for tree paths
//! - `mount`: mount options and the mount/unmount lifecycle

mod gdvfs;
mod inode_table;
mod mount;

pub use gdvfs::{encode_xattr_names, AttrDefaults, FsJob, FsWorker, Gdvfs};
pub use inode_table::InodeTable;
pub use mount::{mount, mount_options, mount_point, MountError};
