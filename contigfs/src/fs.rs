use crate::alloc::{BlockAllocator, Extent, RESERVED_BLOCK};
use crate::directory::{DirEntry, Directory};
use crate::error::{FsError, Result};
use crate::io::{BlockNumber, BlockStorage, MemoryDisk};
use crate::process::{OpenOutcome, ProcessId, ProcessRegistry};
use crate::table::{Handle, SystemTable};
use crate::vcb::VolumeHeader;
use crate::{BLOCK_SIZE, NUM_BLOCKS};

use log::{debug, info, warn};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Shape of the medium a file system was built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub num_blocks: usize,
    pub block_size: usize,
}

/// A single flat volume of contiguously allocated files.
///
/// # Layout
/// ==========================================================
/// | Volume control block (block 0) | Data blocks 1..n      |
/// ==========================================================
///
/// Files are created with a fixed number of blocks and never grow. Processes
/// open files by name; a file open in several processes shares one entry in the
/// system open-file table, counted once per process.
///
/// All state sits behind one mutex and every public operation holds it for its
/// whole duration, so the file system can be shared between threads through an
/// `Arc`.
pub struct FileSystem<T: BlockStorage> {
    volume: Mutex<Volume<T>>,
}

struct Volume<T: BlockStorage> {
    dev: T,
    geometry: Geometry,
    alloc: BlockAllocator,
    directory: Directory,
    system: SystemTable,
    processes: ProcessRegistry,
}

impl FileSystem<MemoryDisk> {
    /// Builds the default 512 block, 2K per block volume in memory.
    pub fn in_memory() -> Result<Self> {
        FileSystem::new(MemoryDisk::new(NUM_BLOCKS, BLOCK_SIZE))
    }
}

impl<T: BlockStorage> FileSystem<T> {
    /// Initializes the file system onto owned block storage. Process 0 is
    /// registered from the start.
    pub fn new(mut dev: T) -> Result<Self> {
        let geometry = Geometry {
            num_blocks: dev.block_count(),
            block_size: dev.block_size(),
        };
        if geometry.num_blocks <= RESERVED_BLOCK + 1 {
            return Err(FsError::InvalidArgument(format!(
                "medium needs at least 2 blocks, has {}",
                geometry.num_blocks
            )));
        }
        if !VolumeHeader::fits(geometry.num_blocks, geometry.block_size) {
            return Err(FsError::InvalidArgument(format!(
                "block size {} cannot hold the volume control block for {} blocks",
                geometry.block_size, geometry.num_blocks
            )));
        }

        let alloc = BlockAllocator::new(geometry.num_blocks);
        let header = VolumeHeader::new(geometry.block_size, &alloc);
        dev.write_block(RESERVED_BLOCK, &header.serialize(&alloc))?;
        info!(
            "Volume formatted with {} blocks of {} bytes ({} free)",
            geometry.num_blocks,
            geometry.block_size,
            alloc.free_blocks()
        );

        Ok(FileSystem {
            volume: Mutex::new(Volume {
                dev,
                geometry,
                alloc,
                directory: Directory::new(),
                system: SystemTable::new(),
                processes: ProcessRegistry::new(),
            }),
        })
    }

    /// Creates `name` with a fixed extent of `size_in_blocks` contiguous blocks.
    pub fn create(&self, name: &str, size_in_blocks: usize) -> Result<()> {
        logged("create", self.lock().create(name, size_in_blocks))
    }

    /// Registers a new process with no open files and returns its id.
    pub fn register_process(&self) -> ProcessId {
        let pid = self.lock().processes.register();
        info!("Process {} registered", pid);
        pid
    }

    /// Opens `name` for `pid`. Opening a file the process already holds returns
    /// the same handle without taking another reference.
    pub fn open(&self, pid: ProcessId, name: &str) -> Result<Handle> {
        logged("open", self.lock().open(pid, name))
    }

    pub fn close(&self, pid: ProcessId, name: &str) -> Result<()> {
        logged("close", self.lock().close(pid, name))
    }

    /// Returns a copy of the whole extent of `name`.
    pub fn read(&self, pid: ProcessId, name: &str) -> Result<Vec<u8>> {
        logged("read", self.lock().read(pid, name))
    }

    /// Overwrites the start of the extent of `name` with `data`. Bytes past the
    /// end of `data` keep their previous contents.
    pub fn write(&self, pid: ProcessId, name: &str, data: &[u8]) -> Result<()> {
        logged("write", self.lock().write(pid, name, data))
    }

    pub fn stat(&self, name: &str) -> Result<DirEntry> {
        self.lock().directory.lookup(name).map(Clone::clone)
    }

    /// Every file in creation order.
    pub fn list(&self) -> Vec<DirEntry> {
        self.lock().directory.iter().cloned().collect()
    }

    pub fn free_block_count(&self) -> usize {
        self.lock().alloc.free_blocks()
    }

    /// Number of processes holding `name` open.
    pub fn open_count(&self, name: &str) -> usize {
        self.lock().system.open_count(name)
    }

    pub fn process_count(&self) -> usize {
        self.lock().processes.len()
    }

    pub fn geometry(&self) -> Geometry {
        self.lock().geometry
    }

    /// Reads the volume control block back from block 0.
    pub fn volume_header(&self) -> Result<VolumeHeader> {
        let mut volume = self.lock();
        let mut block = vec![0; volume.geometry.block_size];
        volume.dev.read_block(RESERVED_BLOCK, &mut block)?;
        VolumeHeader::parse(&block)
    }

    /// Flushes the medium.
    pub fn sync(&self) -> Result<()> {
        self.lock().dev.sync_disk()?;
        Ok(())
    }

    /// Gives the medium back, dropping all bookkeeping.
    pub fn into_inner(self) -> T {
        self.volume
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .dev
    }

    // Every operation validates before it mutates, so the state is consistent
    // even if a holder of the lock panicked.
    fn lock(&self) -> MutexGuard<'_, Volume<T>> {
        self.volume.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn logged<R>(op: &str, result: Result<R>) -> Result<R> {
    if let Err(e) = &result {
        warn!("{} failed: {}", op, e);
    }
    result
}

impl<T: BlockStorage> Volume<T> {
    fn create(&mut self, name: &str, size_in_blocks: usize) -> Result<()> {
        if self.directory.contains(name) {
            return Err(FsError::DuplicateName(name.to_string()));
        }

        let start = self.alloc.allocate(size_in_blocks)?;
        let extent = Extent::new(start, size_in_blocks);
        // Nothing may keep the blocks if the file does not end up in the directory.
        if let Err(e) = self.write_vcb() {
            self.rollback_allocation(extent);
            return Err(e);
        }
        if let Err(e) = self.directory.insert(name, extent) {
            self.rollback_allocation(extent);
            return Err(e);
        }

        info!(
            "File {} created with {} blocks starting at block {}",
            name, size_in_blocks, start
        );
        Ok(())
    }

    fn open(&mut self, pid: ProcessId, name: &str) -> Result<Handle> {
        let extent = self.directory.lookup(name)?.extent;
        let table = self.processes.get_mut(pid)?;

        if let Ok(existing) = table.handle(name) {
            info!("File {} is already open by process {}", name, pid);
            return Ok(existing);
        }

        let handle = self.system.acquire(name, extent);
        let outcome = table.open_entry(name, handle);
        debug_assert_eq!(outcome, OpenOutcome::Inserted);
        info!("File {} opened by process {} as {}", name, pid, handle);
        Ok(handle)
    }

    fn close(&mut self, pid: ProcessId, name: &str) -> Result<()> {
        let table = self.processes.get_mut(pid)?;
        let handle = table.handle(name)?;

        let remaining = self.system.release(handle)?;
        table.close_entry(name)?;
        debug_assert_eq!(self.processes.holders(handle), remaining);
        debug!("{} still open in {} processes", name, remaining);
        info!("File {} closed by process {}", name, pid);
        Ok(())
    }

    fn read(&mut self, pid: ProcessId, name: &str) -> Result<Vec<u8>> {
        let extent = self.open_extent(pid, name)?;
        let block_size = self.geometry.block_size;

        let mut data = vec![0; extent.len * block_size];
        for (i, chunk) in data.chunks_mut(block_size).enumerate() {
            self.dev.read_block(extent.start + i, chunk)?;
        }

        info!("Read {} bytes from file {}", data.len(), name);
        Ok(data)
    }

    fn write(&mut self, pid: ProcessId, name: &str, data: &[u8]) -> Result<()> {
        let extent = self.open_extent(pid, name)?;
        let block_size = self.geometry.block_size;

        let capacity = extent.len * block_size;
        if data.len() > capacity {
            return Err(FsError::TooLarge {
                len: data.len(),
                capacity,
            });
        }

        // Keep the blocks about to be overwritten so a failed write can be undone.
        let touched = (data.len() + block_size - 1) / block_size;
        let mut saved = vec![0; touched * block_size];
        for (i, chunk) in saved.chunks_mut(block_size).enumerate() {
            self.dev.read_block(extent.start + i, chunk)?;
        }

        for (i, chunk) in data.chunks(block_size).enumerate() {
            if let Err(e) = self.dev.write_block(extent.start + i, chunk) {
                self.restore_blocks(extent.start, &saved[..(i + 1) * block_size]);
                return Err(e.into());
            }
        }

        info!("Wrote {} bytes to file {}", data.len(), name);
        Ok(())
    }

    /// Extent of a file `pid` has open, checked against the medium bounds.
    fn open_extent(&self, pid: ProcessId, name: &str) -> Result<Extent> {
        let handle = self.processes.get(pid)?.handle(name)?;
        let extent = self.system.get(handle)?.extent;
        if extent.end() > self.geometry.num_blocks {
            return Err(FsError::OutOfBounds {
                start: extent.start,
                len: extent.len,
            });
        }
        Ok(extent)
    }

    fn write_vcb(&mut self) -> Result<()> {
        let header = VolumeHeader::new(self.geometry.block_size, &self.alloc);
        self.dev
            .write_block(RESERVED_BLOCK, &header.serialize(&self.alloc))?;
        Ok(())
    }

    fn restore_blocks(&mut self, start: BlockNumber, saved: &[u8]) {
        for (i, chunk) in saved.chunks(self.geometry.block_size).enumerate() {
            if let Err(e) = self.dev.write_block(start + i, chunk) {
                warn!("could not restore block {}: {}", start + i, e);
            }
        }
    }

    fn rollback_allocation(&mut self, extent: Extent) {
        if let Err(e) = self.alloc.free(extent.start, extent.len) {
            warn!("could not release blocks of {:?}: {}", extent, e);
        }
        if let Err(e) = self.write_vcb() {
            warn!("could not rewrite volume control block: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{FileBlockEmulator, FileBlockEmulatorBuilder};

    fn create_test_fs() -> FileSystem<MemoryDisk> {
        FileSystem::in_memory().expect("Could not initialize file system.")
    }

    /// Memory medium whose writes to one block start failing once `allowed`
    /// writes to it have gone through.
    struct FlakyDisk {
        inner: MemoryDisk,
        fail_block: BlockNumber,
        allowed: usize,
    }

    impl FlakyDisk {
        fn new(fail_block: BlockNumber, allowed: usize) -> Self {
            Self {
                inner: MemoryDisk::new(16, 256),
                fail_block,
                allowed,
            }
        }
    }

    impl BlockStorage for FlakyDisk {
        fn block_count(&self) -> usize {
            self.inner.block_count()
        }

        fn block_size(&self) -> usize {
            self.inner.block_size()
        }

        fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()> {
            self.inner.read_block(blocknr, buf)
        }

        fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()> {
            if blocknr == self.fail_block {
                if self.allowed == 0 {
                    return Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
                }
                self.allowed -= 1;
            }
            self.inner.write_block(blocknr, buf)
        }

        fn sync_disk(&mut self) -> std::io::Result<()> {
            self.inner.sync_disk()
        }
    }

    #[test]
    fn process_zero_exists_from_the_start() {
        let fs = create_test_fs();
        assert_eq!(fs.process_count(), 1);
        assert_eq!(fs.register_process(), 1);
        assert_eq!(fs.process_count(), 2);
    }

    #[test]
    fn create_allocates_first_fit_extents() {
        let fs = create_test_fs();
        fs.create("file1", 2).unwrap();
        fs.create("file2", 3).unwrap();

        assert_eq!(fs.stat("file1").unwrap().extent, Extent::new(1, 2));
        assert_eq!(fs.stat("file2").unwrap().extent, Extent::new(3, 3));
        assert_eq!(fs.free_block_count(), 511 - 5);
    }

    #[test]
    fn duplicate_create_does_not_allocate() {
        let fs = create_test_fs();
        fs.create("file1", 2).unwrap();

        assert!(matches!(
            fs.create("file1", 4),
            Err(FsError::DuplicateName(_))
        ));
        assert_eq!(fs.free_block_count(), 509);
        assert_eq!(fs.list().len(), 1);
    }

    #[test]
    fn oversized_create_is_exhausted() {
        let fs = create_test_fs();
        assert!(matches!(
            fs.create("f", 600),
            Err(FsError::Exhausted { requested: 600, .. })
        ));
        assert!(fs.list().is_empty());
        assert_eq!(fs.free_block_count(), 511);
    }

    #[test]
    fn zero_length_file_reads_empty() {
        let fs = create_test_fs();
        fs.create("empty", 0).unwrap();
        fs.open(0, "empty").unwrap();

        assert!(fs.read(0, "empty").unwrap().is_empty());
        fs.write(0, "empty", &[]).unwrap();
        assert!(matches!(
            fs.write(0, "empty", b"x"),
            Err(FsError::TooLarge {
                len: 1,
                capacity: 0
            })
        ));
        assert_eq!(fs.free_block_count(), 511);
    }

    #[test]
    fn read_before_write_is_zero_filled() {
        let fs = create_test_fs();
        fs.create("file1", 2).unwrap();
        fs.open(0, "file1").unwrap();

        let data = fs.read(0, "file1").unwrap();
        assert_eq!(data.len(), 2 * BLOCK_SIZE);
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn written_data_is_read_back_as_prefix() {
        let fs = create_test_fs();
        fs.create("file1", 2).unwrap();
        fs.open(0, "file1").unwrap();

        let content = b"This is content for file1";
        fs.write(0, "file1", content).unwrap();

        let data = fs.read(0, "file1").unwrap();
        assert_eq!(&data[..content.len()], &content[..]);
        assert!(data[content.len()..].iter().all(|&b| b == 0));
    }

    #[test]
    fn shorter_write_keeps_tail_of_previous_write() {
        let fs = create_test_fs();
        fs.create("file1", 2).unwrap();
        fs.open(0, "file1").unwrap();

        fs.write(0, "file1", &vec![0xAA; BLOCK_SIZE + 10]).unwrap();
        fs.write(0, "file1", &[0x11; 4]).unwrap();

        let data = fs.read(0, "file1").unwrap();
        assert_eq!(&data[..4], &[0x11; 4]);
        assert!(data[4..BLOCK_SIZE + 10].iter().all(|&b| b == 0xAA));
        assert!(data[BLOCK_SIZE + 10..].iter().all(|&b| b == 0));
    }

    #[test]
    fn writes_stay_inside_their_extent() {
        let fs = create_test_fs();
        fs.create("file1", 1).unwrap();
        fs.create("file2", 1).unwrap();
        fs.open(0, "file1").unwrap();
        fs.open(0, "file2").unwrap();

        fs.write(0, "file1", &[0x77; BLOCK_SIZE]).unwrap();
        assert!(fs.read(0, "file2").unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn too_large_write_leaves_contents_unchanged() {
        let fs = create_test_fs();
        fs.create("file1", 1).unwrap();
        fs.open(0, "file1").unwrap();
        fs.write(0, "file1", b"keep me").unwrap();

        match fs.write(0, "file1", &vec![0xFF; BLOCK_SIZE + 1]) {
            Err(FsError::TooLarge { len, capacity }) => {
                assert_eq!(len, BLOCK_SIZE + 1);
                assert_eq!(capacity, BLOCK_SIZE);
            }
            other => panic!("expected TooLarge, got {:?}", other),
        }
        let data = fs.read(0, "file1").unwrap();
        assert_eq!(&data[..7], b"keep me");
        assert!(data[7..].iter().all(|&b| b == 0));
    }

    #[test]
    fn open_of_missing_file_is_not_found() {
        let fs = create_test_fs();
        assert!(matches!(fs.open(0, "nope"), Err(FsError::NotFound(_))));
    }

    #[test]
    fn open_by_unknown_process_is_rejected() {
        let fs = create_test_fs();
        fs.create("file1", 1).unwrap();
        assert!(matches!(
            fs.open(7, "file1"),
            Err(FsError::InvalidProcess(7))
        ));
        assert_eq!(fs.open_count("file1"), 0);
        assert!(matches!(
            fs.read(7, "file1"),
            Err(FsError::InvalidProcess(7))
        ));
        assert!(matches!(
            fs.close(7, "file1"),
            Err(FsError::InvalidProcess(7))
        ));
    }

    #[test]
    fn operations_on_unopened_file_are_not_open() {
        let fs = create_test_fs();
        fs.create("file1", 1).unwrap();

        assert!(matches!(fs.read(0, "file1"), Err(FsError::NotOpen { .. })));
        assert!(matches!(
            fs.write(0, "file1", b"x"),
            Err(FsError::NotOpen { .. })
        ));
        assert!(matches!(fs.close(0, "file1"), Err(FsError::NotOpen { .. })));
    }

    #[test]
    fn reopen_by_same_process_is_idempotent() {
        let fs = create_test_fs();
        fs.create("file1", 1).unwrap();

        let first = fs.open(0, "file1").unwrap();
        let second = fs.open(0, "file1").unwrap();
        assert_eq!(first, second);
        assert_eq!(fs.open_count("file1"), 1);

        // One close is enough to drop it.
        fs.close(0, "file1").unwrap();
        assert_eq!(fs.open_count("file1"), 0);
        assert!(matches!(fs.close(0, "file1"), Err(FsError::NotOpen { .. })));
    }

    #[test]
    fn open_count_follows_processes() {
        let fs = create_test_fs();
        fs.create("shared", 1).unwrap();
        let p1 = fs.register_process();

        let h0 = fs.open(0, "shared").unwrap();
        let h1 = fs.open(p1, "shared").unwrap();
        assert_eq!(h0, h1);
        assert_eq!(fs.open_count("shared"), 2);

        fs.close(0, "shared").unwrap();
        assert_eq!(fs.open_count("shared"), 1);
        // The remaining holder still reads through its handle.
        assert_eq!(fs.read(p1, "shared").unwrap().len(), BLOCK_SIZE);

        fs.close(p1, "shared").unwrap();
        assert_eq!(fs.open_count("shared"), 0);
    }

    #[test]
    fn closing_one_file_keeps_other_processes_on_their_files() {
        let fs = create_test_fs();
        fs.create("a", 1).unwrap();
        fs.create("b", 1).unwrap();
        fs.create("c", 1).unwrap();
        let p1 = fs.register_process();

        fs.open(0, "a").unwrap();
        fs.open(0, "b").unwrap();
        fs.open(p1, "b").unwrap();
        fs.write(p1, "b", b"bee").unwrap();

        // Removing "a" from the system table must leave p1 pointing at "b".
        fs.close(0, "a").unwrap();
        assert_eq!(&fs.read(p1, "b").unwrap()[..3], b"bee");

        // A new entry may take the vacated slot without being confused with "b".
        fs.open(p1, "c").unwrap();
        fs.write(p1, "c", b"sea").unwrap();
        assert_eq!(&fs.read(p1, "b").unwrap()[..3], b"bee");
        assert_eq!(&fs.read(p1, "c").unwrap()[..3], b"sea");
    }

    #[test]
    fn handle_changes_after_last_close() {
        let fs = create_test_fs();
        fs.create("file1", 1).unwrap();
        let before = fs.open(0, "file1").unwrap();
        fs.close(0, "file1").unwrap();
        let after = fs.open(0, "file1").unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn block_zero_tracks_allocations() {
        let fs = create_test_fs();
        let header = fs.volume_header().unwrap();
        assert_eq!(header.num_blocks as usize, NUM_BLOCKS);
        assert_eq!(header.block_size as usize, BLOCK_SIZE);
        assert_eq!(header.free_blocks, 511);

        fs.create("file1", 10).unwrap();
        assert_eq!(fs.volume_header().unwrap().free_blocks, 501);
    }

    #[test]
    fn tiny_geometries_are_rejected() {
        assert!(matches!(
            FileSystem::new(MemoryDisk::new(1, 2048)),
            Err(FsError::InvalidArgument(_))
        ));
        assert!(matches!(
            FileSystem::new(MemoryDisk::new(512, 32)),
            Err(FsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn failed_write_leaves_previous_contents() {
        // Block 2 is the second block of the first file.
        let fs = FileSystem::new(FlakyDisk::new(2, 0)).unwrap();
        fs.create("a", 3).unwrap();
        fs.open(0, "a").unwrap();
        fs.write(0, "a", b"old").unwrap();

        match fs.write(0, "a", &[0xAB; 768]) {
            Err(FsError::Io(e)) => assert!(e.to_string().contains("boom")),
            other => panic!("expected Io, got {:?}", other),
        }

        let data = fs.read(0, "a").unwrap();
        assert_eq!(&data[..3], b"old");
        assert!(data[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn failed_create_releases_its_blocks() {
        // The first write to block 0 is the format, every later one fails.
        let fs = FileSystem::new(FlakyDisk::new(0, 1)).unwrap();
        let free = fs.free_block_count();

        match fs.create("a", 3) {
            Err(e @ FsError::Io(_)) => assert!(e.to_string().contains("boom")),
            other => panic!("expected Io, got {:?}", other),
        }
        assert_eq!(fs.free_block_count(), free);
        assert_eq!(free, 15);
        assert!(fs.list().is_empty());
        assert!(matches!(fs.stat("a"), Err(FsError::NotFound(_))));
    }

    #[test]
    fn extent_past_end_of_medium_is_out_of_bounds() {
        let fs = FileSystem::new(MemoryDisk::new(8, 128)).unwrap();
        {
            // Plant an entry whose extent runs off the medium.
            let mut volume = fs.lock();
            let handle = volume.system.acquire("ghost", Extent::new(6, 4));
            volume
                .processes
                .get_mut(0)
                .unwrap()
                .open_entry("ghost", handle);
        }

        assert!(matches!(
            fs.read(0, "ghost"),
            Err(FsError::OutOfBounds { start: 6, len: 4 })
        ));
        assert!(matches!(
            fs.write(0, "ghost", b"x"),
            Err(FsError::OutOfBounds { start: 6, len: 4 })
        ));
    }

    #[test]
    fn custom_geometry_is_honoured() {
        let fs = FileSystem::new(MemoryDisk::new(8, 128)).unwrap();
        assert_eq!(
            fs.geometry(),
            Geometry {
                num_blocks: 8,
                block_size: 128
            }
        );
        fs.create("all", 7).unwrap();
        assert!(matches!(fs.create("more", 1), Err(FsError::Exhausted { .. })));
    }

    #[test]
    fn works_on_file_backed_medium() {
        let dev: FileBlockEmulator = FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
            .with_block_count(16)
            .with_block_size(512)
            .build()
            .expect("Could not initialize disk emulator.");
        let fs = FileSystem::new(dev).unwrap();
        fs.create("file1", 3).unwrap();
        fs.open(0, "file1").unwrap();
        fs.write(0, "file1", &[0x5A; 700]).unwrap();
        fs.sync().unwrap();

        let data = fs.read(0, "file1").unwrap();
        assert_eq!(data.len(), 3 * 512);
        assert!(data[..700].iter().all(|&b| b == 0x5A));
        assert!(data[700..].iter().all(|&b| b == 0));
        assert_eq!(fs.volume_header().unwrap().free_blocks, 12);
    }
}
