//! # Storage Layer
//!
//! Page-granular storage for store files. A store file is a flat array of
//! 4KB pages; page 0 carries the file header, every other page is typed by
//! the 16-byte page header at its start.
//!
//! The layer has three parts:
//!
//! - [`PageChannel`]: copy-based backend abstraction. [`MemChannel`] keeps
//!   pages in a `Vec` for tests and scratch stores; [`FileChannel`] maps a
//!   file with `memmap2`.
//! - [`PageHeader`] / [`PageType`]: the common page header and kind tags.
//! - [`StoreHeader`]: the 128-byte file header on page 0.
//!
//! Page capacities are fixed by the layout and shared with the index engine:
//! a leaf holds up to [`LEAF_MAX_ENTRIES`] 16-byte entries, an inner node up
//! to [`INNER_MAX_KEYS`] separator entries plus one more child pointer.

mod channel;
mod file;
mod header;
mod mem;
mod page;

pub use channel::{ChannelStats, PageChannel};
pub use file::FileChannel;
pub use header::{StoreHeader, FLAG_FAIL_ON_CLOSED, STORE_MAGIC, STORE_VERSION};
pub use mem::MemChannel;
pub use page::{validate_page, PageHeader, PageKinds, PageType};

/// Size of every page in a store file.
pub const PAGE_SIZE: usize = 4096;

/// Size of the common header at the start of every page.
pub const PAGE_HEADER_SIZE: usize = 16;

/// Size of the store file header at the start of page 0.
pub const FILE_HEADER_SIZE: usize = 128;

/// Size of one key/value entry on disk.
pub const ENTRY_SIZE: usize = 16;

/// Maximum entries in a leaf page: (4096 - 16) / 16.
pub const LEAF_MAX_ENTRIES: usize = (PAGE_SIZE - PAGE_HEADER_SIZE) / ENTRY_SIZE;

/// A leaf with fewer entries than this is underfull (root excepted).
pub const LEAF_MIN_ENTRIES: usize = LEAF_MAX_ENTRIES / 2;

/// Maximum separator keys in an inner page. Each key is a full 16-byte
/// entry and each of the `keys + 1` children is a 4-byte page number:
/// 16k + 4(k + 1) <= 4080 gives k = 203.
pub const INNER_MAX_KEYS: usize = (PAGE_SIZE - PAGE_HEADER_SIZE - 4) / (ENTRY_SIZE + 4);

/// An inner node with fewer keys than this is underfull (root excepted).
pub const INNER_MIN_KEYS: usize = INNER_MAX_KEYS / 2;

/// Byte offset of the separator key array in an inner page.
pub const INNER_KEYS_START: usize = PAGE_HEADER_SIZE;

/// Byte offset of the child pointer array in an inner page.
pub const INNER_CHILDREN_START: usize = INNER_KEYS_START + ENTRY_SIZE * INNER_MAX_KEYS;

const _: () = assert!(LEAF_MAX_ENTRIES == 255);
const _: () = assert!(INNER_MAX_KEYS == 203);
const _: () = assert!(INNER_CHILDREN_START + 4 * (INNER_MAX_KEYS + 1) <= PAGE_SIZE);

/// An owned page-sized buffer.
pub type PageBuf = [u8; PAGE_SIZE];
