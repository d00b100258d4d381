//! # Leaf Pages
//!
//! A leaf page stores sorted entries back to back after the 16-byte page
//! header:
//!
//! ```text
//! Offset  Size   Description
//! ------  -----  ----------------------------------
//! 0       16     PageHeader (kind, entry_count)
//! 16      16*N   Entries, sorted by the tree's KeyOrder
//! ```
//!
//! With 4KB pages a leaf holds up to 255 entries. Leaves carry no sibling
//! links; cursors keep their position as a stack of (page, slot) pairs, so
//! page clones never have to patch neighbor pointers.
//!
//! `LeafView` wraps a read-only page buffer, `LeafViewMut` a mutable one.
//! Both validate the page kind on construction so a corrupt child pointer
//! surfaces as an error instead of misread entries.

use eyre::{bail, ensure, Result};

use crate::storage::{PageHeader, PageType, ENTRY_SIZE, LEAF_MAX_ENTRIES, PAGE_HEADER_SIZE, PAGE_SIZE};

use super::entry::{KeyOrder, LLEntry, SearchResult};

fn entry_offset(slot: usize) -> usize {
    PAGE_HEADER_SIZE + slot * ENTRY_SIZE
}

fn check_kind(data: &[u8], expected: PageType) -> Result<u16> {
    ensure!(
        data.len() == PAGE_SIZE,
        "invalid page size: {} != {}",
        data.len(),
        PAGE_SIZE
    );

    let header = PageHeader::from_bytes(data)?;
    let kind = header.page_type();
    if kind != expected {
        bail!("expected {:?} page, found {:?}", expected, kind);
    }

    let count = header.entry_count();
    ensure!(
        count as usize <= LEAF_MAX_ENTRIES,
        "leaf entry count {} exceeds capacity {}",
        count,
        LEAF_MAX_ENTRIES
    );
    Ok(count)
}

#[derive(Debug)]
pub struct LeafView<'a> {
    data: &'a [u8],
    count: usize,
}

impl<'a> LeafView<'a> {
    pub fn from_page(data: &'a [u8], kind: PageType) -> Result<Self> {
        let count = check_kind(data, kind)?;
        Ok(Self {
            data,
            count: count as usize,
        })
    }

    pub fn entry_count(&self) -> usize {
        self.count
    }

    pub fn entry_at(&self, slot: usize) -> Result<LLEntry> {
        ensure!(
            slot < self.count,
            "leaf slot {} out of bounds ({} entries)",
            slot,
            self.count
        );
        Ok(LLEntry::read_from(&self.data[entry_offset(slot)..]))
    }

    /// Binary search for the probe under ordering `O`.
    pub fn search<O: KeyOrder>(&self, probe: &LLEntry) -> Result<SearchResult> {
        let mut lo = 0usize;
        let mut hi = self.count;

        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let entry = self.entry_at(mid)?;
            match O::cmp_entries(&entry, probe) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(SearchResult::Found(mid)),
            }
        }
        Ok(SearchResult::NotFound(lo))
    }

    /// Collects all entries into a vector, in slot order.
    pub fn entries(&self) -> Result<Vec<LLEntry>> {
        (0..self.count).map(|slot| self.entry_at(slot)).collect()
    }
}

#[derive(Debug)]
pub struct LeafViewMut<'a> {
    data: &'a mut [u8],
    count: usize,
}

impl<'a> LeafViewMut<'a> {
    pub fn from_page(data: &'a mut [u8], kind: PageType) -> Result<Self> {
        let count = check_kind(data, kind)?;
        Ok(Self {
            data,
            count: count as usize,
        })
    }

    /// Stamps a fresh, empty leaf of the given kind onto the buffer.
    pub fn init(data: &'a mut [u8], kind: PageType) -> Result<Self> {
        ensure!(
            data.len() == PAGE_SIZE,
            "invalid page size: {} != {}",
            data.len(),
            PAGE_SIZE
        );

        data.fill(0);
        PageHeader::new(kind).write_to(data)?;
        Ok(Self { data, count: 0 })
    }

    pub fn entry_count(&self) -> usize {
        self.count
    }

    pub fn entry_at(&self, slot: usize) -> Result<LLEntry> {
        ensure!(
            slot < self.count,
            "leaf slot {} out of bounds ({} entries)",
            slot,
            self.count
        );
        Ok(LLEntry::read_from(&self.data[entry_offset(slot)..]))
    }

    fn set_count(&mut self, count: usize) -> Result<()> {
        let header = PageHeader::from_bytes_mut(self.data)?;
        header.set_entry_count(count as u16);
        self.count = count;
        Ok(())
    }

    /// Inserts an entry at the slot, shifting later entries right.
    pub fn insert_at(&mut self, slot: usize, entry: LLEntry) -> Result<()> {
        ensure!(
            self.count < LEAF_MAX_ENTRIES,
            "insert into full leaf ({} entries)",
            self.count
        );
        ensure!(
            slot <= self.count,
            "leaf slot {} out of bounds ({} entries)",
            slot,
            self.count
        );

        let src = entry_offset(slot);
        let end = entry_offset(self.count);
        self.data.copy_within(src..end, src + ENTRY_SIZE);
        entry.write_to(&mut self.data[src..]);
        self.set_count(self.count + 1)
    }

    /// Removes the entry at the slot, shifting later entries left.
    pub fn remove_at(&mut self, slot: usize) -> Result<LLEntry> {
        ensure!(
            slot < self.count,
            "leaf slot {} out of bounds ({} entries)",
            slot,
            self.count
        );

        let removed = LLEntry::read_from(&self.data[entry_offset(slot)..]);
        let src = entry_offset(slot + 1);
        let end = entry_offset(self.count);
        self.data.copy_within(src..end, entry_offset(slot));
        self.set_count(self.count - 1)?;
        Ok(removed)
    }

    /// Overwrites the entry at the slot in place.
    pub fn set_entry_at(&mut self, slot: usize, entry: LLEntry) -> Result<()> {
        ensure!(
            slot < self.count,
            "leaf slot {} out of bounds ({} entries)",
            slot,
            self.count
        );
        entry.write_to(&mut self.data[entry_offset(slot)..]);
        Ok(())
    }

    /// Replaces the whole entry array.
    pub fn set_entries(&mut self, entries: &[LLEntry]) -> Result<()> {
        ensure!(
            entries.len() <= LEAF_MAX_ENTRIES,
            "{} entries exceed leaf capacity {}",
            entries.len(),
            LEAF_MAX_ENTRIES
        );

        for (slot, entry) in entries.iter().enumerate() {
            entry.write_to(&mut self.data[entry_offset(slot)..]);
        }
        self.set_count(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::entry::{ByKeyValue, UniqueByKey};

    fn fresh_leaf(data: &mut [u8; PAGE_SIZE]) -> LeafViewMut<'_> {
        LeafViewMut::init(data, PageType::IndexLeaf).unwrap()
    }

    #[test]
    fn init_produces_empty_leaf() {
        let mut data = [0u8; PAGE_SIZE];
        let leaf = fresh_leaf(&mut data);

        assert_eq!(leaf.entry_count(), 0);
    }

    #[test]
    fn from_page_rejects_wrong_kind() {
        let mut data = [0u8; PAGE_SIZE];
        LeafViewMut::init(&mut data, PageType::FsmLeaf).unwrap();

        let result = LeafView::from_page(&data, PageType::IndexLeaf);

        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("expected IndexLeaf page"));
    }

    #[test]
    fn insert_keeps_sorted_order() {
        let mut data = [0u8; PAGE_SIZE];
        fresh_leaf(&mut data);

        for key in [30i64, 10, 20] {
            let entry = LLEntry::new(key, key * 2);
            let slot = LeafView::from_page(&data, PageType::IndexLeaf)
                .unwrap()
                .search::<UniqueByKey>(&entry)
                .unwrap()
                .slot();
            let mut leaf = LeafViewMut::from_page(&mut data, PageType::IndexLeaf).unwrap();
            leaf.insert_at(slot, entry).unwrap();
        }

        let leaf = LeafView::from_page(&data, PageType::IndexLeaf).unwrap();
        assert_eq!(leaf.entry_at(0).unwrap().key, 10);
        assert_eq!(leaf.entry_at(1).unwrap().key, 20);
        assert_eq!(leaf.entry_at(2).unwrap().key, 30);
    }

    #[test]
    fn search_reports_found_and_insertion_slot() {
        let mut data = [0u8; PAGE_SIZE];
        fresh_leaf(&mut data)
            .set_entries(&[LLEntry::new(10, 0), LLEntry::new(20, 0), LLEntry::new(30, 0)])
            .unwrap();

        let leaf = LeafView::from_page(&data, PageType::IndexLeaf).unwrap();
        assert_eq!(
            leaf.search::<UniqueByKey>(&LLEntry::new(20, 0)).unwrap(),
            SearchResult::Found(1)
        );
        assert_eq!(
            leaf.search::<UniqueByKey>(&LLEntry::new(25, 0)).unwrap(),
            SearchResult::NotFound(2)
        );
        assert_eq!(
            leaf.search::<UniqueByKey>(&LLEntry::new(5, 0)).unwrap(),
            SearchResult::NotFound(0)
        );
        assert_eq!(
            leaf.search::<UniqueByKey>(&LLEntry::new(35, 0)).unwrap(),
            SearchResult::NotFound(3)
        );
    }

    #[test]
    fn pair_order_distinguishes_duplicate_keys() {
        let mut data = [0u8; PAGE_SIZE];
        fresh_leaf(&mut data)
            .set_entries(&[LLEntry::new(10, 1), LLEntry::new(10, 5), LLEntry::new(10, 9)])
            .unwrap();

        let leaf = LeafView::from_page(&data, PageType::IndexLeaf).unwrap();
        assert_eq!(
            leaf.search::<ByKeyValue>(&LLEntry::new(10, 5)).unwrap(),
            SearchResult::Found(1)
        );
        assert_eq!(
            leaf.search::<ByKeyValue>(&LLEntry::new(10, 6)).unwrap(),
            SearchResult::NotFound(2)
        );
    }

    #[test]
    fn remove_shifts_entries_left() {
        let mut data = [0u8; PAGE_SIZE];
        let mut leaf = fresh_leaf(&mut data);
        leaf.set_entries(&[LLEntry::new(1, 1), LLEntry::new(2, 2), LLEntry::new(3, 3)])
            .unwrap();

        let removed = leaf.remove_at(1).unwrap();

        assert_eq!(removed, LLEntry::new(2, 2));
        assert_eq!(leaf.entry_count(), 2);
        assert_eq!(leaf.entry_at(0).unwrap().key, 1);
        assert_eq!(leaf.entry_at(1).unwrap().key, 3);
    }

    #[test]
    fn insert_into_full_leaf_fails() {
        let mut data = [0u8; PAGE_SIZE];
        let mut leaf = fresh_leaf(&mut data);

        let full: Vec<LLEntry> = (0..LEAF_MAX_ENTRIES as i64)
            .map(|k| LLEntry::new(k, k))
            .collect();
        leaf.set_entries(&full).unwrap();

        let result = leaf.insert_at(0, LLEntry::new(-1, 0));

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("full leaf"));
    }

    #[test]
    fn count_persists_through_reread() {
        let mut data = [0u8; PAGE_SIZE];
        {
            let mut leaf = fresh_leaf(&mut data);
            leaf.set_entries(&[LLEntry::new(7, 70)]).unwrap();
        }

        let leaf = LeafView::from_page(&data, PageType::IndexLeaf).unwrap();
        assert_eq!(leaf.entry_count(), 1);
        assert_eq!(leaf.entry_at(0).unwrap(), LLEntry::new(7, 70));
    }
}
