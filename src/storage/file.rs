//! # Memory-Mapped File Channel
//!
//! `FileChannel` backs a store with a single memory-mapped file. The file is
//! a flat array of 4KB pages:
//!
//! ```text
//! Offset 0:       Page 0 (store header)
//! Offset 4096:    Page 1
//! Offset 8192:    Page 2
//! ...
//! ```
//!
//! The file size is always a multiple of `PAGE_SIZE`; the page count is
//! derived from the file length on open.
//!
//! ## Remapping Safety
//!
//! Memory-mapped regions become invalid when the file grows and is remapped.
//! The channel never hands out references into the mapping; `read_page`
//! copies into a caller-owned buffer and `allocate_page` takes `&mut self`,
//! so the borrow checker guarantees no page data outlives a remap.
//!
//! ## Durability
//!
//! Writes land in the mapping immediately and reach the file through the OS
//! page cache. `flush()` issues an `msync` so all pending writes are durable
//! before it returns.

use std::cell::{Cell, RefCell};
use std::fs::{File, OpenOptions};
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use hashbrown::HashSet;
use memmap2::MmapMut;

use super::channel::{ChannelStats, PageChannel};
use super::PAGE_SIZE;

#[derive(Debug)]
pub struct FileChannel {
    file: File,
    /// `None` while the file is still empty; mapping a zero-length file fails.
    mmap: Option<MmapMut>,
    page_count: u32,
    reads: Cell<u64>,
    writes: u64,
    seen: RefCell<HashSet<u32>>,
}

impl FileChannel {
    /// Creates a new, empty store file. Fails if the file already exists.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create store file '{}'", path.display()))?;

        Ok(Self {
            file,
            mmap: None,
            page_count: 0,
            reads: Cell::new(0),
            writes: 0,
            seen: RefCell::new(HashSet::new()),
        })
    }

    /// Opens an existing store file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open store file '{}'", path.display()))?;

        let metadata = file
            .metadata()
            .wrap_err_with(|| format!("failed to get metadata for '{}'", path.display()))?;

        let file_size = metadata.len();

        ensure!(
            file_size > 0,
            "cannot open empty store file '{}'",
            path.display()
        );

        ensure!(
            file_size % PAGE_SIZE as u64 == 0,
            "store file '{}' size {} is not a multiple of page size {}",
            path.display(),
            file_size,
            PAGE_SIZE
        );

        let page_count = (file_size / PAGE_SIZE as u64) as u32;
        let mmap = Some(Self::map(&file)?);

        Ok(Self {
            file,
            mmap,
            page_count,
            reads: Cell::new(0),
            writes: 0,
            seen: RefCell::new(HashSet::new()),
        })
    }

    fn map(file: &File) -> Result<MmapMut> {
        // SAFETY: MmapMut::map_mut is unsafe because memory-mapped files can be
        // modified externally, leading to undefined behavior. This is safe because:
        // 1. The file is opened with exclusive write access (read+write mode)
        // 2. Store files are not meant to be modified by external processes
        // 3. The mmap lifetime is tied to FileChannel, preventing use-after-unmap
        // 4. All access goes through read_page/write_page which bounds-check page_no
        unsafe { MmapMut::map_mut(file).wrap_err("failed to memory-map store file") }
    }

    fn page_range(&self, page_no: u32) -> Result<std::ops::Range<usize>> {
        ensure!(
            page_no < self.page_count,
            "page {} out of bounds ({} pages)",
            page_no,
            self.page_count
        );

        let start = page_no as usize * PAGE_SIZE;
        Ok(start..start + PAGE_SIZE)
    }
}

impl PageChannel for FileChannel {
    fn read_page(&self, page_no: u32, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let range = self.page_range(page_no)?;
        let mmap = self
            .mmap
            .as_ref()
            .ok_or_else(|| eyre::eyre!("store file has no pages"))?;

        buf.copy_from_slice(&mmap[range]);
        self.reads.set(self.reads.get() + 1);
        self.seen.borrow_mut().insert(page_no);
        Ok(())
    }

    fn write_page(&mut self, page_no: u32, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let range = self.page_range(page_no)?;
        let mmap = self
            .mmap
            .as_mut()
            .ok_or_else(|| eyre::eyre!("store file has no pages"))?;

        mmap[range].copy_from_slice(data);
        self.writes += 1;
        Ok(())
    }

    fn allocate_page(&mut self) -> Result<u32> {
        let page_no = self.page_count;
        let new_size = (page_no as u64 + 1) * PAGE_SIZE as u64;

        // Drop the old mapping before resizing so platforms that refuse to
        // truncate a mapped file (Windows) behave the same as Linux.
        self.mmap = None;

        self.file
            .set_len(new_size)
            .wrap_err_with(|| format!("failed to grow store file to {} bytes", new_size))?;

        self.mmap = Some(Self::map(&self.file)?);
        self.page_count = page_no + 1;
        Ok(page_no)
    }

    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn flush(&self) -> Result<()> {
        if let Some(mmap) = self.mmap.as_ref() {
            mmap.flush().wrap_err("failed to flush store file")?;
        }
        Ok(())
    }

    fn stats(&self) -> ChannelStats {
        ChannelStats {
            reads: self.reads.get(),
            unique_reads: self.seen.borrow().len() as u64,
            writes: self.writes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_starts_with_zero_pages() {
        let dir = tempdir().unwrap();
        let channel = FileChannel::create(dir.path().join("test.store")).unwrap();

        assert_eq!(channel.page_count(), 0);
    }

    #[test]
    fn create_fails_if_file_exists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.store");

        FileChannel::create(&path).unwrap();
        assert!(FileChannel::create(&path).is_err());
    }

    #[test]
    fn allocate_write_read_roundtrip() {
        let dir = tempdir().unwrap();
        let mut channel = FileChannel::create(dir.path().join("test.store")).unwrap();

        let p0 = channel.allocate_page().unwrap();
        let p1 = channel.allocate_page().unwrap();
        assert_eq!((p0, p1), (0, 1));

        let mut data = [0u8; PAGE_SIZE];
        data[17] = 0x5A;
        channel.write_page(1, &data).unwrap();

        let mut buf = [0u8; PAGE_SIZE];
        channel.read_page(1, &mut buf).unwrap();
        assert_eq!(buf[17], 0x5A);
    }

    #[test]
    fn open_rejects_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.store");
        std::fs::File::create(&path).unwrap();

        let result = FileChannel::open(&path);

        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("cannot open empty store file"));
    }

    #[test]
    fn open_rejects_truncated_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.store");
        std::fs::write(&path, vec![0u8; PAGE_SIZE + 100]).unwrap();

        let result = FileChannel::open(&path);

        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("not a multiple of page size"));
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.store");

        {
            let mut channel = FileChannel::create(&path).unwrap();
            channel.allocate_page().unwrap();

            let mut data = [0u8; PAGE_SIZE];
            data[0] = 0x42;
            channel.write_page(0, &data).unwrap();
            channel.flush().unwrap();
        }

        let channel = FileChannel::open(&path).unwrap();
        assert_eq!(channel.page_count(), 1);

        let mut buf = [0u8; PAGE_SIZE];
        channel.read_page(0, &mut buf).unwrap();
        assert_eq!(buf[0], 0x42);
    }
}
