//!TFS: a tiny sector-addressed disk image format, and the engine that
//!mounts it onto a host directory and dismounts host changes back into it
#![deny(missing_docs)]
#![deny(unsafe_code)]

mod bitmap;
mod block_dev;
pub mod chain;
mod disk;
mod error;
mod layout;
mod sync;
mod tfs;
mod vfs;

/// Use a sector size of 512 bytes
pub const SECTOR_SIZE: usize = 512;

use bitmap::Bitmap;
pub use block_dev::{BlockDevice, RamDisk};
pub use disk::SectorStore;
use error::host;
pub use error::{Result, TfsError};
pub use layout::*;
pub use sync::{dismount, mount, Skipped, SyncReport};
pub use tfs::{format, TinyFileSystem};
pub use vfs::{Node, NodeId, NodeKind, SyncState, Tree};
