use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = core::result::Result<T, TfsError>;

/// Everything that can go wrong while reading, writing or syncing a TFS image
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TfsError {
    /// A sector index past the end of the image
    #[error("sector {sector} is outside the disk (0..{sector_count})")]
    OutOfRange {
        /// Requested sector
        sector: u64,
        /// Sectors in the image
        sector_count: u32,
    },
    /// A name outside [A-Z0-9.-] or longer than 8 characters
    #[error("invalid entry name {name:?}: {reason}")]
    InvalidName {
        /// The offending name
        name: String,
        /// Which rule it breaks
        reason: &'static str,
    },
    /// A file too large for a directory record
    #[error("invalid entry size {size}, a file holds at most 0xFFFFFFFE bytes")]
    InvalidSize {
        /// Size in bytes
        size: u64,
    },
    /// A directory record whose sector lacks the directory marker
    #[error("entry {name:?} at sector {sector} is not a directory")]
    NotADirectory {
        /// Entry name
        name: String,
        /// Sector that was read
        sector: u32,
    },
    /// File contents were asked of a directory
    #[error("entry {name:?} is a directory, not a file")]
    IsADirectory {
        /// Entry name
        name: String,
    },
    /// A data chain with a missing marker or a loop
    #[error("corrupt file chain at sector {sector}: {reason}")]
    CorruptChain {
        /// Failing sector
        sector: u32,
        /// What was found there
        reason: String,
    },
    /// A directory sector reached more than once while loading
    #[error("corrupt directory tree at sector {sector}: {reason}")]
    CorruptTree {
        /// Failing sector
        sector: u32,
        /// What was found there
        reason: &'static str,
    },
    /// No free sector is left
    #[error("no free sector left on disk")]
    DiskFull,
    /// A directory already has 31 entries
    #[error("directory {name:?} at sector {sector} already holds 31 entries")]
    DirectoryFull {
        /// Directory name, empty for the root
        name: String,
        /// Directory sector
        sector: u32,
    },
    /// Sector 0 does not hold a valid header
    #[error("invalid image header: {0}")]
    InvalidHeader(&'static str),
    /// Format version outside 1..=65534
    #[error("invalid version {0}, expected 1..=65534")]
    InvalidVersion(u32),
    /// Sector count outside 2..=4294967294 or past the device
    #[error("invalid sector count {0}")]
    InvalidSectorCount(u64),
    /// Boot code longer than 502 bytes
    #[error("boot code is {0} bytes, at most 502 fit in the boot sector")]
    BootCodeTooLarge(usize),
    /// A host file system operation failed
    #[error("{}: {source}", path.display())]
    Host {
        /// Host path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },
    /// The block device failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TfsError {
    /// Name and size problems on a single host entry only skip that entry
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InvalidName { .. } | Self::InvalidSize { .. })
    }
}

/// Attach the host path to an I/O error
pub(crate) fn host(path: &Path) -> impl FnOnce(io::Error) -> TfsError + '_ {
    move |source| TfsError::Host {
        path: path.to_path_buf(),
        source,
    }
}
