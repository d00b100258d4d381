//! # Store File Header
//!
//! Page 0 of every store file begins with a 128-byte header that anchors all
//! persistent state: the roots of the free-space manager and OID index trees,
//! their entry counts, and the highest OID ever issued. Attribute index roots
//! are the caller's to persist (they live wherever the caller keeps its
//! schema); everything the store itself owns is rooted here.
//!
//! ## Header Layout (128 bytes)
//!
//! ```text
//! Offset  Size  Field            Description
//! ------  ----  ---------------  -----------------------------------
//! 0       8     magic            "ObjStor1"
//! 8       4     version          Format version (currently 1)
//! 12      4     page_size        Page size in bytes (4096)
//! 16      4     fsm_root         Root page of the free-space index
//! 20      8     fsm_entry_count  Entries in the free-space index
//! 28      4     oid_root         Root page of the OID index
//! 32      8     oid_entry_count  Entries in the OID index
//! 40      8     max_oid          Highest OID ever stored (never decreases)
//! 48      4     flags            Bit 0: fail on closed-cursor access
//! 52      76    reserved         Zero padding to 128 bytes
//! ```
//!
//! The remainder of page 0 is unused. The header is rewritten on every
//! `Store::flush`, after the free-space manager has settled, so the roots it
//! records always describe a consistent tree.

use eyre::{ensure, Result};
use zerocopy::little_endian::{I64, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::{FILE_HEADER_SIZE, PAGE_SIZE};

pub const STORE_MAGIC: [u8; 8] = *b"ObjStor1";
pub const STORE_VERSION: u32 = 1;

/// Bit 0 of `flags`: accessing a closed cursor fails instead of
/// returning no entries.
pub const FLAG_FAIL_ON_CLOSED: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct StoreHeader {
    magic: [u8; 8],
    version: U32,
    page_size: U32,
    fsm_root: U32,
    fsm_entry_count: U64,
    oid_root: U32,
    oid_entry_count: U64,
    max_oid: I64,
    flags: U32,
    reserved: [u8; 76],
}

const _: () = assert!(size_of::<StoreHeader>() == FILE_HEADER_SIZE);

impl StoreHeader {
    pub fn new() -> Self {
        Self {
            magic: STORE_MAGIC,
            version: U32::new(STORE_VERSION),
            page_size: U32::new(PAGE_SIZE as u32),
            fsm_root: U32::new(0),
            fsm_entry_count: U64::new(0),
            oid_root: U32::new(0),
            oid_entry_count: U64::new(0),
            max_oid: I64::new(0),
            flags: U32::new(0),
            reserved: [0; 76],
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        ensure!(
            data.len() >= FILE_HEADER_SIZE,
            "buffer too small for StoreHeader: {} < {}",
            data.len(),
            FILE_HEADER_SIZE
        );

        Self::ref_from_bytes(&data[..FILE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read StoreHeader: {:?}", e))
    }

    pub fn write_to(&self, data: &mut [u8]) -> Result<()> {
        ensure!(
            data.len() >= FILE_HEADER_SIZE,
            "buffer too small for StoreHeader: {} < {}",
            data.len(),
            FILE_HEADER_SIZE
        );

        data[..FILE_HEADER_SIZE].copy_from_slice(self.as_bytes());
        Ok(())
    }

    /// Checks magic, version and page size against what this build expects.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.magic == STORE_MAGIC,
            "bad magic: not a store file (got {:02x?})",
            self.magic
        );
        ensure!(
            self.version.get() == STORE_VERSION,
            "unsupported store version {} (expected {})",
            self.version.get(),
            STORE_VERSION
        );
        ensure!(
            self.page_size.get() == PAGE_SIZE as u32,
            "store page size {} does not match build page size {}",
            self.page_size.get(),
            PAGE_SIZE
        );
        Ok(())
    }

    pub fn fsm_root(&self) -> u32 {
        self.fsm_root.get()
    }

    pub fn set_fsm_root(&mut self, page_no: u32) {
        self.fsm_root = U32::new(page_no);
    }

    pub fn fsm_entry_count(&self) -> u64 {
        self.fsm_entry_count.get()
    }

    pub fn set_fsm_entry_count(&mut self, count: u64) {
        self.fsm_entry_count = U64::new(count);
    }

    pub fn oid_root(&self) -> u32 {
        self.oid_root.get()
    }

    pub fn set_oid_root(&mut self, page_no: u32) {
        self.oid_root = U32::new(page_no);
    }

    pub fn oid_entry_count(&self) -> u64 {
        self.oid_entry_count.get()
    }

    pub fn set_oid_entry_count(&mut self, count: u64) {
        self.oid_entry_count = U64::new(count);
    }

    pub fn max_oid(&self) -> i64 {
        self.max_oid.get()
    }

    pub fn set_max_oid(&mut self, oid: i64) {
        self.max_oid = I64::new(oid);
    }

    pub fn fail_on_closed(&self) -> bool {
        self.flags.get() & FLAG_FAIL_ON_CLOSED != 0
    }

    pub fn set_fail_on_closed(&mut self, fail: bool) {
        let mut flags = self.flags.get();
        if fail {
            flags |= FLAG_FAIL_ON_CLOSED;
        } else {
            flags &= !FLAG_FAIL_ON_CLOSED;
        }
        self.flags = U32::new(flags);
    }
}

impl Default for StoreHeader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_exactly_128_bytes() {
        assert_eq!(size_of::<StoreHeader>(), FILE_HEADER_SIZE);
    }

    #[test]
    fn new_header_validates() {
        assert!(StoreHeader::new().validate().is_ok());
    }

    #[test]
    fn header_roundtrip_through_page() {
        let mut page = [0u8; PAGE_SIZE];

        let mut header = StoreHeader::new();
        header.set_fsm_root(3);
        header.set_fsm_entry_count(17);
        header.set_oid_root(9);
        header.set_oid_entry_count(1000);
        header.set_max_oid(123_456);
        header.set_fail_on_closed(true);
        header.write_to(&mut page).unwrap();

        let read = StoreHeader::from_bytes(&page).unwrap();
        assert_eq!(read.fsm_root(), 3);
        assert_eq!(read.fsm_entry_count(), 17);
        assert_eq!(read.oid_root(), 9);
        assert_eq!(read.oid_entry_count(), 1000);
        assert_eq!(read.max_oid(), 123_456);
        assert!(read.fail_on_closed());
    }

    #[test]
    fn validate_rejects_bad_magic() {
        let mut page = [0u8; PAGE_SIZE];
        StoreHeader::new().write_to(&mut page).unwrap();
        page[0] = b'X';

        let header = StoreHeader::from_bytes(&page).unwrap();
        let result = header.validate();

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("bad magic"));
    }

    #[test]
    fn validate_rejects_wrong_version() {
        let mut header = StoreHeader::new();
        header.version = U32::new(99);

        let result = header.validate();

        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("unsupported store version"));
    }

    #[test]
    fn flag_toggle_is_reversible() {
        let mut header = StoreHeader::new();
        assert!(!header.fail_on_closed());

        header.set_fail_on_closed(true);
        assert!(header.fail_on_closed());

        header.set_fail_on_closed(false);
        assert!(!header.fail_on_closed());
    }
}
