//! # OID Index
//!
//! Maps object identifiers to the physical location of their serialized
//! data. An OID is a positive `i64` issued once and never reused; a
//! location is a (page, offset) pair packed into the value slot of a
//! unique index entry, page number in the high 32 bits.
//!
//! The store owns exactly one OID index and persists its root, entry count
//! and high-water OID in the file header. The high-water mark survives
//! removals: an OID that has ever been issued is never issued again, even
//! after the object is gone.

use eyre::{ensure, Result};

use crate::index::entry::UniqueByKey;
use crate::index::tree::{PageRead, PagedIndex, TreeIo};
use crate::storage::PageKinds;

/// Physical position of an object's data within the store file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectLocation {
    pub page: u32,
    pub offset: u32,
}

impl ObjectLocation {
    pub fn new(page: u32, offset: u32) -> Self {
        Self { page, offset }
    }

    /// Packs into an index value, page number in the high 32 bits.
    pub fn to_raw(self) -> i64 {
        (((self.page as u64) << 32) | self.offset as u64) as i64
    }

    pub fn from_raw(raw: i64) -> Self {
        Self {
            page: ((raw as u64) >> 32) as u32,
            offset: raw as u32,
        }
    }
}

pub struct OidIndex {
    tree: PagedIndex<UniqueByKey>,
    max_oid: i64,
}

impl OidIndex {
    pub(crate) fn create_in(io: &mut impl TreeIo) -> Result<Self> {
        Ok(Self {
            tree: PagedIndex::create_in(io, PageKinds::index())?,
            max_oid: 0,
        })
    }

    pub(crate) fn open(root_page: u32, entry_count: u64, max_oid: i64) -> Self {
        Self {
            tree: PagedIndex::open(root_page, entry_count, PageKinds::index()),
            max_oid,
        }
    }

    pub(crate) fn add_in(
        &mut self,
        io: &mut impl TreeIo,
        oid: i64,
        location: ObjectLocation,
    ) -> Result<Option<ObjectLocation>> {
        ensure!(oid > 0, "OID must be positive, got {}", oid);
        let previous = self.tree.insert_in(io, oid, location.to_raw())?;
        self.max_oid = self.max_oid.max(oid);
        Ok(previous.map(ObjectLocation::from_raw))
    }

    pub(crate) fn find_in<R: PageRead>(&self, io: &R, oid: i64) -> Result<Option<ObjectLocation>> {
        if oid <= 0 {
            return Ok(None);
        }
        Ok(self
            .tree
            .lookup_in(io, &crate::index::entry::LLEntry::new(oid, 0))?
            .map(ObjectLocation::from_raw))
    }

    pub(crate) fn remove_in(
        &mut self,
        io: &mut impl TreeIo,
        oid: i64,
    ) -> Result<Option<ObjectLocation>> {
        if oid <= 0 {
            return Ok(None);
        }
        Ok(self
            .tree
            .remove_in(io, crate::index::entry::LLEntry::new(oid, 0))?
            .map(ObjectLocation::from_raw))
    }

    /// Highest OID ever stored. Never decreases, even after removals.
    pub fn max_oid(&self) -> i64 {
        self.max_oid
    }

    pub(crate) fn tree(&self) -> &PagedIndex<UniqueByKey> {
        &self.tree
    }

    pub(crate) fn root_page(&self) -> u32 {
        self.tree.root_page()
    }

    pub(crate) fn entry_count(&self) -> u64 {
        self.tree.entry_count()
    }
}
