use super::block::{out_of_range, BlockNumber, BlockStorage};
use crate::{BLOCK_SIZE, NUM_BLOCKS};
use std::fs::File;
use std::io::prelude::*;
use std::io::{BufWriter, ErrorKind, SeekFrom};

/// Emulates block disk/flash storage in userspace using a file as block storage.
/// This is only meant to be used for file system development and testing.
#[derive(Debug)]
pub struct FileBlockEmulator {
    /// The file must be a fixed-size file some exact multiple of the size of a block.
    fd: File,
    /// The total number of blocks available in the file store.
    block_count: usize,
    block_size: usize,
}

impl FileBlockEmulator {
    /// Returns ownership of the underlying file descriptor to the caller.
    pub fn into_file(self) -> File {
        self.fd
    }

    fn seek_block(&mut self, blocknr: BlockNumber) -> std::io::Result<()> {
        if blocknr >= self.block_count {
            return Err(out_of_range(blocknr));
        }
        self.fd
            .seek(SeekFrom::Start((blocknr * self.block_size) as u64))?;
        Ok(())
    }
}

impl BlockStorage for FileBlockEmulator {
    fn block_count(&self) -> usize {
        self.block_count
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()> {
        if buf.len() < self.block_size {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "buffer does not contain enough space to read block",
            ));
        }
        self.seek_block(blocknr)?;

        let block_size = self.block_size;
        // Limit the read to just the block specified.
        let mut fixed_reader = (&mut self.fd).take(block_size as u64);
        fixed_reader.read_exact(&mut buf[..block_size])?;
        Ok(())
    }

    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()> {
        if buf.len() > self.block_size {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "buffer exceeds block size",
            ));
        }
        self.seek_block(blocknr)?;
        self.fd.write_all(buf)?;
        Ok(())
    }

    fn sync_disk(&mut self) -> std::io::Result<()> {
        self.fd.sync_all()?;
        Ok(())
    }
}

pub struct FileBlockEmulatorBuilder {
    fd: File,
    block_count: usize,
    block_size: usize,
    clear_medium: bool,
}

impl From<File> for FileBlockEmulatorBuilder {
    fn from(fd: File) -> Self {
        FileBlockEmulatorBuilder {
            fd,
            block_count: NUM_BLOCKS,
            block_size: BLOCK_SIZE,
            clear_medium: true,
        }
    }
}

impl FileBlockEmulatorBuilder {
    /// Sets the number of desired blocks in the block store device.
    pub fn with_block_count(mut self, blocks: usize) -> Self {
        self.block_count = blocks;
        self
    }

    /// Sets the size in bytes of every block.
    pub fn with_block_size(mut self, bytes: usize) -> Self {
        self.block_size = bytes;
        self
    }

    /// Whether `build` zero fills the file. Defaults to true.
    pub fn clear_medium(mut self, clear: bool) -> Self {
        self.clear_medium = clear;
        self
    }

    /// This builder assumed ownership of the file descriptor used and does
    /// destructive things to prepare the file for use. Additionally, ownership
    /// of the file is transfered to the emulator meaning this builder can only
    /// be used to create one emulator.
    pub fn build(mut self) -> std::io::Result<FileBlockEmulator> {
        if self.block_count == 0 || self.block_size == 0 {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "block count and block size must be non-zero",
            ));
        }
        if self.clear_medium {
            self.zero_blocks()?;
        }
        Ok(FileBlockEmulator {
            fd: self.fd,
            block_count: self.block_count,
            block_size: self.block_size,
        })
    }

    fn zero_blocks(&mut self) -> std::io::Result<()> {
        self.fd.seek(SeekFrom::Start(0))?;
        let zeroes = vec![0x00; self.block_size];
        let mut bfd = BufWriter::new(&self.fd);
        // Zero out the "disk" block, buffering each write to prevent excessive reads.
        for _ in 0..self.block_count {
            bfd.write_all(&zeroes)?;
        }
        bfd.flush()?;
        Ok(())
    }
}
