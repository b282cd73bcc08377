use crate::alloc::BlockAllocator;
use crate::error::{FsError, Result};
use std::mem::size_of;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

const VCB_MAGIC: u32 = 0x4346_5342; // CFSB

/// Fixed header at the start of block 0, followed by the raw occupancy bitmap.
///
/// Block 0 is rewritten from the allocator every time the allocation state
/// changes, so the header always reflects the in-memory allocator. It describes
/// the volume; nothing ever mounts a volume from it.
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Debug, PartialEq, Clone, Copy)]
pub struct VolumeHeader {
    /// A 32-bit identifying string, in this case CFSB.
    pub magic: u32,
    pub block_size: u32,
    pub num_blocks: u32,
    /// Blocks available to be allocated, block 0 excluded.
    pub free_blocks: u32,
}

impl VolumeHeader {
    pub const LEN: usize = size_of::<VolumeHeader>();

    pub fn new(block_size: usize, alloc: &BlockAllocator) -> Self {
        Self {
            magic: VCB_MAGIC,
            block_size: block_size as u32,
            num_blocks: alloc.num_blocks() as u32,
            free_blocks: alloc.free_blocks() as u32,
        }
    }

    /// Whether block 0 of the given geometry can hold the header and the
    /// occupancy bitmap.
    pub fn fits(num_blocks: usize, block_size: usize) -> bool {
        Self::LEN + (num_blocks + 63) / 64 * 8 <= block_size
    }

    /// Encodes the header followed by the allocator's bitmap.
    pub fn serialize(&self, alloc: &BlockAllocator) -> Vec<u8> {
        let mut encoded = Vec::with_capacity(Self::LEN + alloc.bitmap().serialize().len());
        encoded.extend_from_slice(self.as_bytes());
        encoded.extend_from_slice(alloc.bitmap().serialize());
        encoded
    }

    /// Reads the header back from the start of block 0.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let header = Self::read_from_prefix(buf).ok_or(FsError::InvalidVolume)?;
        if header.magic != VCB_MAGIC {
            return Err(FsError::InvalidVolume);
        }
        Ok(header)
    }
}
