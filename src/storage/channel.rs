//! # Page Channel Abstraction
//!
//! This module provides the `PageChannel` trait, a copy-based abstraction over
//! the backing storage of a store file. The index engine, free-space manager
//! and store header all perform page-granular I/O through this trait, so the
//! same code runs against a memory-mapped file or a plain in-memory buffer.
//!
//! ## Copy-Based Interface
//!
//! The interface uses copy semantics for portability and simple lifetimes:
//!
//! ```text
//! fn read_page(&self, page_no: u32, buf: &mut [u8; PAGE_SIZE]) -> Result<()>;
//! fn write_page(&mut self, page_no: u32, data: &[u8; PAGE_SIZE]) -> Result<()>;
//! ```
//!
//! Callers own their page buffers; the channel never hands out references into
//! its backing storage. This keeps tree code free of mapping lifetimes and
//! lets `allocate_page` grow (and remap) the backing file at any time.
//!
//! ## Allocation
//!
//! `allocate_page` extends the backing storage by exactly one page and returns
//! its number. Reuse of previously freed pages is a policy decision that lives
//! in the free-space manager, not here; a channel only ever appends.
//!
//! ## Statistics
//!
//! Channels count page reads (total and unique) and writes. The counters are
//! diagnostic only and reset when the channel is dropped; tests use them to
//! bound the write amplification of index operations.

use eyre::Result;

use super::PAGE_SIZE;

/// Snapshot of a channel's I/O counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Total page reads since the channel was created.
    pub reads: u64,
    /// Number of distinct pages read at least once.
    pub unique_reads: u64,
    /// Total page writes since the channel was created.
    pub writes: u64,
}

/// Page-granular storage backend for a store file.
pub trait PageChannel: Send {
    /// Reads a page into the provided buffer.
    fn read_page(&self, page_no: u32, buf: &mut [u8; PAGE_SIZE]) -> Result<()>;

    /// Writes a page from the provided buffer.
    ///
    /// Changes may be buffered until `flush()` is called.
    fn write_page(&mut self, page_no: u32, data: &[u8; PAGE_SIZE]) -> Result<()>;

    /// Extends the storage by one zeroed page and returns its page number.
    fn allocate_page(&mut self) -> Result<u32>;

    /// Returns the current number of pages in the storage.
    fn page_count(&self) -> u32;

    /// Flushes all pending writes to durable storage.
    fn flush(&self) -> Result<()>;

    /// Returns a snapshot of the I/O counters.
    fn stats(&self) -> ChannelStats;
}
