//! Bookkeeping for a single flat volume: contiguous block allocation, a name to
//! extent directory, a shared open-file table with per-process handles, and
//! whole-extent reads and writes against a block medium.

pub mod alloc;
pub mod directory;
mod error;
mod fs;
pub mod io;
pub mod process;
pub mod table;
pub mod vcb;

pub use crate::alloc::{BlockAllocator, Extent, State};
pub use crate::directory::DirEntry;
pub use crate::error::{FsError, Result};
pub use crate::fs::{FileSystem, Geometry};
pub use crate::process::ProcessId;
pub use crate::table::Handle;
pub use crate::vcb::VolumeHeader;

/// Number of blocks on the default volume.
pub const NUM_BLOCKS: usize = 512;

/// 2K blocks, for a 1M default volume.
pub const BLOCK_SIZE: usize = 2048;
