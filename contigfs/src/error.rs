use crate::io::BlockNumber;
use crate::process::ProcessId;
use crate::table::Handle;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("file \"{0}\" already exists")]
    DuplicateName(String),
    #[error("found no file named \"{0}\"")]
    NotFound(String),
    #[error("not enough contiguous space for {requested} blocks ({free} free)")]
    Exhausted { requested: usize, free: usize },
    #[error("no process with id {0}")]
    InvalidProcess(ProcessId),
    #[error("file \"{name}\" is not open by process {pid}")]
    NotOpen { pid: ProcessId, name: String },
    #[error("{len} bytes do not fit in a {capacity} byte extent")]
    TooLarge { len: usize, capacity: usize },
    #[error("extent of {len} blocks at block {start} exceeds the medium")]
    OutOfBounds { start: BlockNumber, len: usize },
    #[error("block {block} is not allocated")]
    DoubleFree { block: BlockNumber },
    #[error("block {0} is reserved for the volume control block")]
    ReservedBlock(BlockNumber),
    #[error("handle {0} no longer refers to an open file")]
    StaleHandle(Handle),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("block 0 does not hold a valid volume control block")]
    InvalidVolume,
    #[error("storage medium error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FsError>;
