/// The block number to access ranging from 0 (the first block) to n - 1 (the last
/// block) where n is number of blocks available.
pub type BlockNumber = usize;

/// A fixed-size, block-granular storage medium.
///
/// Tried to map as closely as possible to the prescribed interface found here:
/// http://web.mit.edu/6.033/1997/handouts/html/04sfs.html. Every block has the
/// same size and the number of blocks never changes once the medium is built.
pub trait BlockStorage: Send {
    /// The total number of blocks on the medium.
    fn block_count(&self) -> usize;
    /// The size of every block in bytes.
    fn block_size(&self) -> usize;
    /// Reads disk block number into provided buffer.
    ///
    /// # Errors
    ///
    /// Attempting to read a block out of range, or into a buffer smaller than
    /// one block, will return an error.
    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()>;
    /// Writes provided buffer into the specified block number. Buffers shorter
    /// than a block only overwrite the leading bytes of the block.
    ///
    /// # Errors
    ///
    /// Attempting to write a block out of range, or a buffer larger than one
    /// block, will return an error.
    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()>;
    /// Flush any buffered disk IO from memory. This is useful if it must guaranteed
    /// the disk writes actually occurred, for instance, if being re-read from
    /// disk.
    fn sync_disk(&mut self) -> std::io::Result<()>;

    /// Total capacity of the medium in bytes.
    fn capacity(&self) -> usize {
        self.block_count() * self.block_size()
    }
}

pub(crate) fn out_of_range(blocknr: BlockNumber) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        format!("block {} out of range", blocknr),
    )
}
