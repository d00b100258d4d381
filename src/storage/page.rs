//! # Page Kinds and Header Layout
//!
//! Every 4KB page in a store file begins with a 16-byte header identifying
//! what the page holds. All page kinds share a single page-number space, so
//! the kind tag at byte 0 is the only way to tell an index page from a
//! free-space-manager page or raw object data.
//!
//! ## Page Header Layout (16 bytes)
//!
//! ```text
//! Offset  Size  Field        Description
//! ------  ----  -----------  ----------------------------------------
//! 0       1     page_type    Kind of page (IndexLeaf, FsmInner, ...)
//! 1       1     flags        Reserved flag bits
//! 2       2     entry_count  Number of entries / separator keys
//! 4       12    reserved     Reserved for future use
//! ```
//!
//! ## Page Kinds
//!
//! - **IndexInner** (0x01): routing node of a user-visible index
//! - **IndexLeaf** (0x02): data node of a user-visible index
//! - **FsmInner** (0x03): routing node of the free-space manager's index
//! - **FsmLeaf** (0x04): data node of the free-space manager's index
//! - **Data** (0x20): serialized object data (opaque to this crate)
//! - **Header** (0x40): page 0, carrying the store file header
//!
//! Index and FSM trees run on the same engine; the distinct kind tags exist
//! so a page reached through a corrupt pointer is rejected instead of being
//! misinterpreted as the wrong structure.
//!
//! ## Zero-Copy Access
//!
//! `PageHeader` uses `zerocopy` for safe transmutation from raw page bytes,
//! so headers are read in place without copying:
//!
//! ```text
//! let header = PageHeader::from_bytes(&page[..16])?;
//! ```

use eyre::{ensure, Result};
use zerocopy::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::{INNER_MAX_KEYS, LEAF_MAX_ENTRIES, PAGE_SIZE};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Unknown = 0x00,
    IndexInner = 0x01,
    IndexLeaf = 0x02,
    FsmInner = 0x03,
    FsmLeaf = 0x04,
    Data = 0x20,
    Header = 0x40,
}

impl PageType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => PageType::IndexInner,
            0x02 => PageType::IndexLeaf,
            0x03 => PageType::FsmInner,
            0x04 => PageType::FsmLeaf,
            0x20 => PageType::Data,
            0x40 => PageType::Header,
            _ => PageType::Unknown,
        }
    }

    pub fn is_inner(self) -> bool {
        matches!(self, PageType::IndexInner | PageType::FsmInner)
    }

    pub fn is_leaf(self) -> bool {
        matches!(self, PageType::IndexLeaf | PageType::FsmLeaf)
    }
}

/// The (inner, leaf) kind pair a tree stamps onto its pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageKinds {
    pub inner: PageType,
    pub leaf: PageType,
}

impl PageKinds {
    pub fn index() -> Self {
        Self {
            inner: PageType::IndexInner,
            leaf: PageType::IndexLeaf,
        }
    }

    pub fn fsm() -> Self {
        Self {
            inner: PageType::FsmInner,
            leaf: PageType::FsmLeaf,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PageHeader {
    page_type: u8,
    flags: u8,
    entry_count: U16,
    reserved: [u8; 12],
}

impl PageHeader {
    pub fn new(page_type: PageType) -> Self {
        Self {
            page_type: page_type as u8,
            flags: 0,
            entry_count: U16::new(0),
            reserved: [0; 12],
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        ensure!(
            data.len() >= size_of::<Self>(),
            "buffer too small for PageHeader: {} < {}",
            data.len(),
            size_of::<Self>()
        );

        Self::ref_from_bytes(&data[..size_of::<Self>()])
            .map_err(|e| eyre::eyre!("failed to read PageHeader: {:?}", e))
    }

    pub fn from_bytes_mut(data: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            data.len() >= size_of::<Self>(),
            "buffer too small for PageHeader: {} < {}",
            data.len(),
            size_of::<Self>()
        );

        Self::mut_from_bytes(&mut data[..size_of::<Self>()])
            .map_err(|e| eyre::eyre!("failed to read PageHeader: {:?}", e))
    }

    /// Copies the header into the 16-byte prefix of a page buffer.
    pub fn write_to(&self, data: &mut [u8]) -> Result<()> {
        ensure!(
            data.len() >= size_of::<Self>(),
            "buffer too small for PageHeader: {} < {}",
            data.len(),
            size_of::<Self>()
        );

        data[..size_of::<Self>()].copy_from_slice(self.as_bytes());
        Ok(())
    }

    pub fn page_type(&self) -> PageType {
        PageType::from_byte(self.page_type)
    }

    pub fn set_page_type(&mut self, page_type: PageType) {
        self.page_type = page_type as u8;
    }

    pub fn entry_count(&self) -> u16 {
        self.entry_count.get()
    }

    pub fn set_entry_count(&mut self, count: u16) {
        self.entry_count = U16::new(count);
    }

    fn is_zeroed(&self) -> bool {
        self.page_type == 0
            && self.flags == 0
            && self.entry_count() == 0
            && self.reserved == [0; 12]
    }
}

pub fn validate_page(data: &[u8]) -> Result<()> {
    ensure!(
        data.len() == PAGE_SIZE,
        "invalid page size: {} != {}",
        data.len(),
        PAGE_SIZE
    );

    let header = PageHeader::from_bytes(data)?;

    // A zeroed header marks a freshly allocated, uninitialized page.
    if header.is_zeroed() {
        return Ok(());
    }

    let kind = header.page_type();
    ensure!(
        kind != PageType::Unknown,
        "invalid page type: {:#04x}",
        data[0]
    );

    if kind.is_leaf() {
        ensure!(
            header.entry_count() as usize <= LEAF_MAX_ENTRIES,
            "leaf entry count {} exceeds capacity {}",
            header.entry_count(),
            LEAF_MAX_ENTRIES
        );
    }

    if kind.is_inner() {
        ensure!(
            header.entry_count() as usize <= INNER_MAX_KEYS,
            "inner key count {} exceeds capacity {}",
            header.entry_count(),
            INNER_MAX_KEYS
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_type_from_byte() {
        assert_eq!(PageType::from_byte(0x00), PageType::Unknown);
        assert_eq!(PageType::from_byte(0x01), PageType::IndexInner);
        assert_eq!(PageType::from_byte(0x02), PageType::IndexLeaf);
        assert_eq!(PageType::from_byte(0x03), PageType::FsmInner);
        assert_eq!(PageType::from_byte(0x04), PageType::FsmLeaf);
        assert_eq!(PageType::from_byte(0x20), PageType::Data);
        assert_eq!(PageType::from_byte(0x40), PageType::Header);
        assert_eq!(PageType::from_byte(0xFF), PageType::Unknown);
    }

    #[test]
    fn page_header_size_is_16_bytes() {
        assert_eq!(size_of::<PageHeader>(), 16);
    }

    #[test]
    fn page_kind_predicates() {
        assert!(PageType::IndexInner.is_inner());
        assert!(PageType::FsmInner.is_inner());
        assert!(PageType::IndexLeaf.is_leaf());
        assert!(PageType::FsmLeaf.is_leaf());
        assert!(!PageType::Data.is_leaf());
        assert!(!PageType::Header.is_inner());
    }

    #[test]
    fn page_header_roundtrip_through_bytes() {
        let mut data = [0u8; PAGE_SIZE];

        {
            let header = PageHeader::from_bytes_mut(&mut data).unwrap();
            header.set_page_type(PageType::IndexLeaf);
            header.set_entry_count(42);
        }

        let header = PageHeader::from_bytes(&data).unwrap();
        assert_eq!(header.page_type(), PageType::IndexLeaf);
        assert_eq!(header.entry_count(), 42);
    }

    #[test]
    fn write_to_stamps_the_page_prefix() {
        let mut page = [0xFFu8; PAGE_SIZE];

        let mut header = PageHeader::new(PageType::FsmLeaf);
        header.set_entry_count(7);
        header.write_to(&mut page).unwrap();

        let read = PageHeader::from_bytes(&page).unwrap();
        assert_eq!(read.page_type(), PageType::FsmLeaf);
        assert_eq!(read.entry_count(), 7);
        // Only the header prefix is touched.
        assert_eq!(page[16], 0xFF);

        let mut small = [0u8; 8];
        assert!(header.write_to(&mut small).is_err());
    }

    #[test]
    fn page_header_from_bytes_too_small() {
        let data = [0u8; 8];
        let result = PageHeader::from_bytes(&data);

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("buffer too small"));
    }

    #[test]
    fn validate_page_wrong_size() {
        let data = [0u8; 100];
        let result = validate_page(&data);

        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("invalid page size"));
    }

    #[test]
    fn validate_page_zeroed_is_valid() {
        let data = [0u8; PAGE_SIZE];
        assert!(validate_page(&data).is_ok());
    }

    #[test]
    fn validate_page_rejects_overfull_leaf() {
        let mut data = [0u8; PAGE_SIZE];
        let header = PageHeader::from_bytes_mut(&mut data).unwrap();
        header.set_page_type(PageType::IndexLeaf);
        header.set_entry_count(LEAF_MAX_ENTRIES as u16 + 1);

        let result = validate_page(&data);

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("exceeds capacity"));
    }
}
