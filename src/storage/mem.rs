//! In-memory page channel.
//!
//! Backs a store with a plain `Vec` of pages. Nothing is ever persisted;
//! `flush()` is a no-op. This is the backend used by unit tests and by
//! callers that want a scratch store with no file behind it.

use std::cell::{Cell, RefCell};

use eyre::{ensure, Result};
use hashbrown::HashSet;

use super::channel::{ChannelStats, PageChannel};
use super::PAGE_SIZE;

#[derive(Debug, Default)]
pub struct MemChannel {
    pages: Vec<Box<[u8; PAGE_SIZE]>>,
    reads: Cell<u64>,
    writes: u64,
    seen: RefCell<HashSet<u32>>,
}

impl MemChannel {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PageChannel for MemChannel {
    fn read_page(&self, page_no: u32, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let page = self
            .pages
            .get(page_no as usize)
            .ok_or_else(|| eyre::eyre!("page {} out of bounds ({} pages)", page_no, self.pages.len()))?;

        buf.copy_from_slice(&page[..]);
        self.reads.set(self.reads.get() + 1);
        self.seen.borrow_mut().insert(page_no);
        Ok(())
    }

    fn write_page(&mut self, page_no: u32, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let count = self.pages.len();
        let page = self
            .pages
            .get_mut(page_no as usize)
            .ok_or_else(|| eyre::eyre!("page {} out of bounds ({} pages)", page_no, count))?;

        page.copy_from_slice(data);
        self.writes += 1;
        Ok(())
    }

    fn allocate_page(&mut self) -> Result<u32> {
        ensure!(
            self.pages.len() < u32::MAX as usize,
            "page number space exhausted"
        );

        let page_no = self.pages.len() as u32;
        self.pages.push(Box::new([0u8; PAGE_SIZE]));
        Ok(page_no)
    }

    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn flush(&self) -> Result<()> {
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

    #[test]
    fn mem_channel_starts_empty() {
        let channel = MemChannel::new();

        assert_eq!(channel.page_count(), 0);
        assert_eq!(channel.stats(), ChannelStats::default());
    }

    #[test]
    fn allocate_page_returns_sequential_numbers() {
        let mut channel = MemChannel::new();

        assert_eq!(channel.allocate_page().unwrap(), 0);
        assert_eq!(channel.allocate_page().unwrap(), 1);
        assert_eq!(channel.allocate_page().unwrap(), 2);
        assert_eq!(channel.page_count(), 3);
    }

    #[test]
    fn write_then_read_roundtrips() {
        let mut channel = MemChannel::new();
        channel.allocate_page().unwrap();

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xAB;
        data[PAGE_SIZE - 1] = 0xCD;
        channel.write_page(0, &data).unwrap();

        let mut buf = [0u8; PAGE_SIZE];
        channel.read_page(0, &mut buf).unwrap();
        assert_eq!(buf[0], 0xAB);
        assert_eq!(buf[PAGE_SIZE - 1], 0xCD);
    }

    #[test]
    fn read_out_of_bounds_fails() {
        let channel = MemChannel::new();

        let mut buf = [0u8; PAGE_SIZE];
        let result = channel.read_page(5, &mut buf);

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("out of bounds"));
    }

    #[test]
    fn write_out_of_bounds_fails() {
        let mut channel = MemChannel::new();

        let data = [0u8; PAGE_SIZE];
        assert!(channel.write_page(0, &data).is_err());
    }

    #[test]
    fn stats_track_unique_reads() {
        let mut channel = MemChannel::new();
        channel.allocate_page().unwrap();
        channel.allocate_page().unwrap();

        let mut buf = [0u8; PAGE_SIZE];
        channel.read_page(0, &mut buf).unwrap();
        channel.read_page(0, &mut buf).unwrap();
        channel.read_page(1, &mut buf).unwrap();

        let stats = channel.stats();
        assert_eq!(stats.reads, 3);
        assert_eq!(stats.unique_reads, 2);
    }
}
