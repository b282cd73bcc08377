use crate::error::{FsError, Result};
use crate::io::BlockNumber;
use log::debug;
use zerocopy::AsBytes;

/// The block permanently held by the volume control block.
pub const RESERVED_BLOCK: BlockNumber = 0;

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum State {
    Free,
    Used,
}

/// A contiguous run of blocks, `len` blocks long starting at `start`.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Extent {
    pub start: BlockNumber,
    pub len: usize,
}

impl Extent {
    pub fn new(start: BlockNumber, len: usize) -> Self {
        Self { start, len }
    }

    /// One past the last block of the extent.
    pub fn end(&self) -> BlockNumber {
        self.start + self.len
    }

    /// Byte range covered by the extent on a medium of `block_size` blocks.
    pub fn byte_range(&self, block_size: usize) -> std::ops::Range<usize> {
        self.start * block_size..self.end() * block_size
    }

    pub fn overlaps(&self, other: &Extent) -> bool {
        self.len > 0 && other.len > 0 && self.start < other.end() && other.start < self.end()
    }
}

/// One bit per logical block, packed into 64 bit words.
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    words: Vec<u64>,
    len: usize,
}

impl Bitmap {
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; (len + 63) / 64],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Raw word image of the map, used to write it into the volume control block.
    pub fn serialize(&self) -> &[u8] {
        self.words.as_slice().as_bytes()
    }

    pub fn get(&self, blocknr: BlockNumber) -> State {
        assert!(blocknr < self.len);
        // Grab of the u64 containing the significant bit.
        let word = self.words[blocknr / 64];
        let mask = 0b01_u64 << (blocknr % 64);
        if word & mask == 0 {
            State::Free
        } else {
            State::Used
        }
    }

    pub fn set_reserved(&mut self, blocknr: BlockNumber) {
        assert!(blocknr < self.len);
        self.words[blocknr / 64] |= 0b01_u64 << (blocknr % 64);
    }

    pub fn set_free(&mut self, blocknr: BlockNumber) {
        assert!(blocknr < self.len);
        self.words[blocknr / 64] &= !(0b01_u64 << (blocknr % 64));
    }

    pub fn count_used(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

/// First-fit contiguous allocator over a fixed number of blocks.
///
/// Block 0 is reserved at construction and can never be allocated or freed.
/// Allocation scans upward from block 1 and takes the lowest-addressed run that
/// is long enough; free space is never compacted, so a request can fail with
/// enough blocks free in total when none of the free runs is long enough.
#[derive(Debug, Clone)]
pub struct BlockAllocator {
    bitmap: Bitmap,
    free_blocks: usize,
}

impl BlockAllocator {
    pub fn new(num_blocks: usize) -> Self {
        let mut bitmap = Bitmap::new(num_blocks);
        let mut free_blocks = num_blocks;
        if num_blocks > RESERVED_BLOCK {
            bitmap.set_reserved(RESERVED_BLOCK);
            free_blocks -= 1;
        }
        Self {
            bitmap,
            free_blocks,
        }
    }

    pub fn num_blocks(&self) -> usize {
        self.bitmap.len()
    }

    pub fn free_blocks(&self) -> usize {
        self.free_blocks
    }

    /// Blocks handed out to extents, not counting the reserved block.
    pub fn used_blocks(&self) -> usize {
        self.bitmap.count_used().saturating_sub(1)
    }

    pub fn state(&self, blocknr: BlockNumber) -> State {
        self.bitmap.get(blocknr)
    }

    pub fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }

    /// Marks the lowest run of `n` free blocks as used and returns its first block.
    pub fn allocate(&mut self, n: usize) -> Result<BlockNumber> {
        let exhausted = FsError::Exhausted {
            requested: n,
            free: self.free_blocks,
        };
        if n > self.free_blocks {
            return Err(exhausted);
        }

        let start = self.find_run(n).ok_or(exhausted)?;
        for blocknr in start..start + n {
            self.bitmap.set_reserved(blocknr);
        }
        self.free_blocks -= n;
        debug!(
            "allocated blocks {}..{} ({} free)",
            start,
            start + n,
            self.free_blocks
        );
        Ok(start)
    }

    /// Returns `[start, start + n)` to the free pool. Blocks past the end of the
    /// medium are ignored. The whole call is rejected, leaving the map untouched,
    /// if any block in range is already free or is the reserved block.
    pub fn free(&mut self, start: BlockNumber, n: usize) -> Result<()> {
        let end = start.saturating_add(n).min(self.num_blocks());
        let range = start.min(end)..end;

        if range.contains(&RESERVED_BLOCK) {
            return Err(FsError::ReservedBlock(RESERVED_BLOCK));
        }
        if let Some(block) = range.clone().find(|&b| self.bitmap.get(b) == State::Free) {
            return Err(FsError::DoubleFree { block });
        }

        for blocknr in range.clone() {
            self.bitmap.set_free(blocknr);
        }
        self.free_blocks += range.len();
        debug!(
            "freed blocks {}..{} ({} free)",
            range.start, range.end, self.free_blocks
        );
        Ok(())
    }

    fn find_run(&self, n: usize) -> Option<BlockNumber> {
        let first = RESERVED_BLOCK + 1;
        if n == 0 {
            return Some(first);
        }

        let mut run_start = first;
        let mut run_len = 0;
        for blocknr in first..self.num_blocks() {
            match self.bitmap.get(blocknr) {
                State::Free => {
                    if run_len == 0 {
                        run_start = blocknr;
                    }
                    run_len += 1;
                    if run_len == n {
                        return Some(run_start);
                    }
                }
                State::Used => run_len = 0,
            }
        }
        None
    }
}
