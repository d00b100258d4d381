//! # Index Entries and Key Ordering
//!
//! Every index in a store maps a signed 64-bit key to a signed 64-bit value.
//! An entry is the (key, value) pair; on disk it is 16 bytes, key then value,
//! both little-endian.
//!
//! The engine is generic over a [`KeyOrder`], which fixes two things at
//! compile time:
//!
//! - **`UniqueByKey`**: entries are ordered and deduplicated by key alone.
//!   Inserting an existing key replaces its value. This is the ordering of
//!   the OID index and the free-space manager's backing index.
//! - **`ByKeyValue`**: entries are ordered by (key, value) and the full pair
//!   is the identity. A key may appear many times with distinct values;
//!   inserting an existing pair is a no-op. This is the ordering of
//!   attribute indexes, where many objects share one attribute value.
//!
//! Inner-node separators are full entries in both orderings, so the same
//! page layout serves both; a unique tree simply never consults the value
//! half of a separator.

use std::cmp::Ordering;

use crate::storage::ENTRY_SIZE;

/// A key/value pair stored in an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LLEntry {
    pub key: i64,
    pub value: i64,
}

impl LLEntry {
    pub fn new(key: i64, value: i64) -> Self {
        Self { key, value }
    }

    pub fn read_from(buf: &[u8]) -> Self {
        debug_assert!(buf.len() >= ENTRY_SIZE);
        let key = i64::from_le_bytes(buf[0..8].try_into().unwrap_or([0; 8]));
        let value = i64::from_le_bytes(buf[8..16].try_into().unwrap_or([0; 8]));
        Self { key, value }
    }

    pub fn write_to(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= ENTRY_SIZE);
        buf[0..8].copy_from_slice(&self.key.to_le_bytes());
        buf[8..16].copy_from_slice(&self.value.to_le_bytes());
    }
}

/// Compile-time ordering policy of an index.
pub trait KeyOrder: Copy + Default + Send + Sync + 'static {
    /// Whether the key alone identifies an entry.
    const UNIQUE: bool;

    fn cmp_entries(a: &LLEntry, b: &LLEntry) -> Ordering;

    /// Smallest probe entry that any stored entry with `key` can compare
    /// equal to or greater than. Used as the lower bound of key scans.
    fn min_probe(key: i64) -> LLEntry;

    /// Largest probe entry for `key`; upper bound of key scans.
    fn max_probe(key: i64) -> LLEntry;
}

/// Orders and deduplicates entries by key; the value is payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UniqueByKey;

impl KeyOrder for UniqueByKey {
    const UNIQUE: bool = true;

    fn cmp_entries(a: &LLEntry, b: &LLEntry) -> Ordering {
        a.key.cmp(&b.key)
    }

    fn min_probe(key: i64) -> LLEntry {
        LLEntry::new(key, 0)
    }

    fn max_probe(key: i64) -> LLEntry {
        LLEntry::new(key, 0)
    }
}

/// Orders entries by (key, value); the full pair is the identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByKeyValue;

impl KeyOrder for ByKeyValue {
    const UNIQUE: bool = false;

    fn cmp_entries(a: &LLEntry, b: &LLEntry) -> Ordering {
        a.key.cmp(&b.key).then(a.value.cmp(&b.value))
    }

    fn min_probe(key: i64) -> LLEntry {
        LLEntry::new(key, i64::MIN)
    }

    fn max_probe(key: i64) -> LLEntry {
        LLEntry::new(key, i64::MAX)
    }
}

/// Result of a position search within a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    /// An entry equal to the probe sits at this slot.
    Found(usize),
    /// No equal entry; the probe would be inserted at this slot.
    NotFound(usize),
}

impl SearchResult {
    /// The slot where the probe is or would be.
    pub fn slot(self) -> usize {
        match self {
            SearchResult::Found(slot) | SearchResult::NotFound(slot) => slot,
        }
    }
}
