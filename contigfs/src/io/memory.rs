use super::block::{out_of_range, BlockNumber, BlockStorage};
use std::io::ErrorKind;

/// A zero-filled storage medium held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryDisk {
    bytes: Vec<u8>,
    block_count: usize,
    block_size: usize,
}

impl MemoryDisk {
    pub fn new(block_count: usize, block_size: usize) -> Self {
        Self {
            bytes: vec![0x00; block_count * block_size],
            block_count,
            block_size,
        }
    }

    /// Borrows the raw contents of the whole medium.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn block_range(&self, blocknr: BlockNumber) -> std::ops::Range<usize> {
        let start = blocknr * self.block_size;
        start..start + self.block_size
    }
}

impl BlockStorage for MemoryDisk {
    fn block_count(&self) -> usize {
        self.block_count
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()> {
        if blocknr >= self.block_count {
            return Err(out_of_range(blocknr));
        }
        if buf.len() < self.block_size {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "buffer does not contain enough space to read block",
            ));
        }

        let range = self.block_range(blocknr);
        buf[..self.block_size].copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()> {
        if blocknr >= self.block_count {
            return Err(out_of_range(blocknr));
        }
        if buf.len() > self.block_size {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "buffer exceeds block size",
            ));
        }

        let start = self.block_range(blocknr).start;
        self.bytes[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn sync_disk(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
