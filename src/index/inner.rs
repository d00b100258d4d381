//! # Inner (Routing) Pages
//!
//! An inner page routes a search to one of its children. It stores `k`
//! separator entries and `k + 1` child page numbers in two fixed arrays:
//!
//! ```text
//! Offset  Size    Description
//! ------  ------  ---------------------------------------
//! 0       16      PageHeader (kind, key count k)
//! 16      16*203  Separator entries (first k slots used)
//! 3264    4*204   Child page numbers (first k+1 slots used)
//! ```
//!
//! A separator is a full 16-byte entry. Child `i` holds entries strictly
//! below separator `i`; child `i + 1` holds separator `i` and above. Probes
//! equal to a separator therefore descend right, which makes the separator
//! itself the first entry of its right subtree.
//!
//! Separators carry the value half of the entry so that non-unique trees,
//! whose identity is the (key, value) pair, can route duplicates spanning
//! several leaves. Unique trees store it too but never compare it.

use eyre::{bail, ensure, Result};

use crate::storage::{
    PageHeader, PageType, ENTRY_SIZE, INNER_CHILDREN_START, INNER_KEYS_START, INNER_MAX_KEYS,
    PAGE_SIZE,
};

use super::entry::{KeyOrder, LLEntry};

fn key_offset(idx: usize) -> usize {
    INNER_KEYS_START + idx * ENTRY_SIZE
}

fn child_offset(idx: usize) -> usize {
    INNER_CHILDREN_START + idx * 4
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
        count as usize <= INNER_MAX_KEYS,
        "inner key count {} exceeds capacity {}",
        count,
        INNER_MAX_KEYS
    );
    Ok(count)
}

pub struct InnerView<'a> {
    data: &'a [u8],
    keys: usize,
}

impl<'a> InnerView<'a> {
    pub fn from_page(data: &'a [u8], kind: PageType) -> Result<Self> {
        let keys = check_kind(data, kind)?;
        Ok(Self {
            data,
            keys: keys as usize,
        })
    }

    pub fn key_count(&self) -> usize {
        self.keys
    }

    pub fn child_count(&self) -> usize {
        self.keys + 1
    }

    pub fn key_at(&self, idx: usize) -> Result<LLEntry> {
        ensure!(
            idx < self.keys,
            "inner key {} out of bounds ({} keys)",
            idx,
            self.keys
        );
        Ok(LLEntry::read_from(&self.data[key_offset(idx)..]))
    }

    pub fn child_at(&self, idx: usize) -> Result<u32> {
        ensure!(
            idx <= self.keys,
            "inner child {} out of bounds ({} children)",
            idx,
            self.keys + 1
        );
        let off = child_offset(idx);
        Ok(u32::from_le_bytes(
            self.data[off..off + 4].try_into().unwrap_or([0; 4]),
        ))
    }

    /// First key index whose separator compares greater than the probe.
    /// This is also the child index to descend into for the probe.
    pub fn upper_bound<O: KeyOrder>(&self, probe: &LLEntry) -> Result<usize> {
        let mut lo = 0usize;
        let mut hi = self.keys;

        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let key = self.key_at(mid)?;
            if O::cmp_entries(&key, probe) == std::cmp::Ordering::Greater {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        Ok(lo)
    }

    /// Child index and page number for the probe.
    pub fn find_child<O: KeyOrder>(&self, probe: &LLEntry) -> Result<(usize, u32)> {
        let idx = self.upper_bound::<O>(probe)?;
        Ok((idx, self.child_at(idx)?))
    }
}

pub struct InnerViewMut<'a> {
    data: &'a mut [u8],
    keys: usize,
}

impl<'a> InnerViewMut<'a> {
    pub fn from_page(data: &'a mut [u8], kind: PageType) -> Result<Self> {
        let keys = check_kind(data, kind)?;
        Ok(Self {
            data,
            keys: keys as usize,
        })
    }

    /// Stamps a fresh inner page holding one separator and two children.
    pub fn init_root(
        data: &'a mut [u8],
        kind: PageType,
        separator: LLEntry,
        left: u32,
        right: u32,
    ) -> Result<Self> {
        ensure!(
            data.len() == PAGE_SIZE,
            "invalid page size: {} != {}",
            data.len(),
            PAGE_SIZE
        );

        data.fill(0);
        let mut header = PageHeader::new(kind);
        header.set_entry_count(1);
        header.write_to(data)?;

        separator.write_to(&mut data[key_offset(0)..]);
        data[child_offset(0)..child_offset(0) + 4].copy_from_slice(&left.to_le_bytes());
        data[child_offset(1)..child_offset(1) + 4].copy_from_slice(&right.to_le_bytes());
        Ok(Self { data, keys: 1 })
    }

    pub fn key_count(&self) -> usize {
        self.keys
    }

    fn view(&self) -> InnerView<'_> {
        InnerView {
            data: self.data,
            keys: self.keys,
        }
    }

    pub fn key_at(&self, idx: usize) -> Result<LLEntry> {
        self.view().key_at(idx)
    }

    pub fn child_at(&self, idx: usize) -> Result<u32> {
        self.view().child_at(idx)
    }

    pub fn upper_bound<O: KeyOrder>(&self, probe: &LLEntry) -> Result<usize> {
        self.view().upper_bound::<O>(probe)
    }

    fn set_key_count(&mut self, keys: usize) -> Result<()> {
        let header = PageHeader::from_bytes_mut(self.data)?;
        header.set_entry_count(keys as u16);
        self.keys = keys;
        Ok(())
    }

    pub fn set_key_at(&mut self, idx: usize, key: LLEntry) -> Result<()> {
        ensure!(
            idx < self.keys,
            "inner key {} out of bounds ({} keys)",
            idx,
            self.keys
        );
        key.write_to(&mut self.data[key_offset(idx)..]);
        Ok(())
    }

    pub fn set_child_at(&mut self, idx: usize, page_no: u32) -> Result<()> {
        ensure!(
            idx <= self.keys,
            "inner child {} out of bounds ({} children)",
            idx,
            self.keys + 1
        );
        let off = child_offset(idx);
        self.data[off..off + 4].copy_from_slice(&page_no.to_le_bytes());
        Ok(())
    }

    /// Inserts separator `key` at key index `idx` with `right` as the child
    /// to its right. Existing keys and children shift one slot right.
    pub fn insert_at(&mut self, idx: usize, key: LLEntry, right: u32) -> Result<()> {
        ensure!(
            self.keys < INNER_MAX_KEYS,
            "insert into full inner node ({} keys)",
            self.keys
        );
        ensure!(
            idx <= self.keys,
            "inner key {} out of bounds ({} keys)",
            idx,
            self.keys
        );

        self.data
            .copy_within(key_offset(idx)..key_offset(self.keys), key_offset(idx + 1));
        key.write_to(&mut self.data[key_offset(idx)..]);

        self.data.copy_within(
            child_offset(idx + 1)..child_offset(self.keys + 1),
            child_offset(idx + 2),
        );
        let off = child_offset(idx + 1);
        self.data[off..off + 4].copy_from_slice(&right.to_le_bytes());

        self.set_key_count(self.keys + 1)
    }

    /// Removes separator `idx` and the child to its right.
    pub fn remove_at(&mut self, idx: usize) -> Result<()> {
        ensure!(
            idx < self.keys,
            "inner key {} out of bounds ({} keys)",
            idx,
            self.keys
        );

        self.data
            .copy_within(key_offset(idx + 1)..key_offset(self.keys), key_offset(idx));
        self.data.copy_within(
            child_offset(idx + 2)..child_offset(self.keys + 1),
            child_offset(idx + 1),
        );
        self.set_key_count(self.keys - 1)
    }

    /// Stamps a whole inner node onto the buffer. `children` must be one
    /// longer than `keys`.
    pub fn build(data: &mut [u8], kind: PageType, keys: &[LLEntry], children: &[u32]) -> Result<()> {
        ensure!(
            data.len() == PAGE_SIZE,
            "invalid page size: {} != {}",
            data.len(),
            PAGE_SIZE
        );
        ensure!(
            keys.len() <= INNER_MAX_KEYS,
            "{} keys exceed inner capacity {}",
            keys.len(),
            INNER_MAX_KEYS
        );
        ensure!(
            children.len() == keys.len() + 1,
            "inner node with {} keys needs {} children, got {}",
            keys.len(),
            keys.len() + 1,
            children.len()
        );

        data.fill(0);
        let mut header = PageHeader::new(kind);
        header.set_entry_count(keys.len() as u16);
        header.write_to(data)?;

        for (idx, key) in keys.iter().enumerate() {
            key.write_to(&mut data[key_offset(idx)..]);
        }
        for (idx, child) in children.iter().enumerate() {
            let off = child_offset(idx);
            data[off..off + 4].copy_from_slice(&child.to_le_bytes());
        }
        Ok(())
    }

    /// Collects keys and children into vectors, in slot order.
    pub fn contents(&self) -> Result<(Vec<LLEntry>, Vec<u32>)> {
        let keys = (0..self.keys)
            .map(|idx| self.key_at(idx))
            .collect::<Result<Vec<_>>>()?;
        let children = (0..=self.keys)
            .map(|idx| self.child_at(idx))
            .collect::<Result<Vec<_>>>()?;
        Ok((keys, children))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::entry::UniqueByKey;

    fn sep(key: i64) -> LLEntry {
        LLEntry::new(key, 0)
    }

    #[test]
    fn init_root_has_one_key_two_children() {
        let mut data = [0u8; PAGE_SIZE];
        let node =
            InnerViewMut::init_root(&mut data, PageType::IndexInner, sep(50), 3, 7).unwrap();

        assert_eq!(node.key_count(), 1);
        assert_eq!(node.key_at(0).unwrap().key, 50);
        assert_eq!(node.child_at(0).unwrap(), 3);
        assert_eq!(node.child_at(1).unwrap(), 7);
    }

    #[test]
    fn find_child_routes_equal_probe_right() {
        let mut data = [0u8; PAGE_SIZE];
        InnerViewMut::init_root(&mut data, PageType::IndexInner, sep(50), 3, 7).unwrap();
        let node = InnerView::from_page(&data, PageType::IndexInner).unwrap();

        assert_eq!(node.find_child::<UniqueByKey>(&sep(10)).unwrap(), (0, 3));
        assert_eq!(node.find_child::<UniqueByKey>(&sep(50)).unwrap(), (1, 7));
        assert_eq!(node.find_child::<UniqueByKey>(&sep(90)).unwrap(), (1, 7));
    }

    #[test]
    fn insert_shifts_keys_and_children() {
        let mut data = [0u8; PAGE_SIZE];
        let mut node =
            InnerViewMut::init_root(&mut data, PageType::IndexInner, sep(50), 3, 7).unwrap();

        // Split of child 1 produced separator 80 with new right page 9.
        node.insert_at(1, sep(80), 9).unwrap();

        assert_eq!(node.key_count(), 2);
        assert_eq!(node.key_at(0).unwrap().key, 50);
        assert_eq!(node.key_at(1).unwrap().key, 80);
        assert_eq!(node.child_at(0).unwrap(), 3);
        assert_eq!(node.child_at(1).unwrap(), 7);
        assert_eq!(node.child_at(2).unwrap(), 9);
    }

    #[test]
    fn insert_at_front_keeps_leftmost_child() {
        let mut data = [0u8; PAGE_SIZE];
        let mut node =
            InnerViewMut::init_root(&mut data, PageType::IndexInner, sep(50), 3, 7).unwrap();

        node.insert_at(0, sep(20), 5).unwrap();

        assert_eq!(node.key_at(0).unwrap().key, 20);
        assert_eq!(node.key_at(1).unwrap().key, 50);
        assert_eq!(node.child_at(0).unwrap(), 3);
        assert_eq!(node.child_at(1).unwrap(), 5);
        assert_eq!(node.child_at(2).unwrap(), 7);
    }

    #[test]
    fn remove_drops_key_and_right_child() {
        let mut data = [0u8; PAGE_SIZE];
        let mut node =
            InnerViewMut::init_root(&mut data, PageType::IndexInner, sep(50), 3, 7).unwrap();
        node.insert_at(1, sep(80), 9).unwrap();

        node.remove_at(0).unwrap();

        assert_eq!(node.key_count(), 1);
        assert_eq!(node.key_at(0).unwrap().key, 80);
        assert_eq!(node.child_at(0).unwrap(), 3);
        assert_eq!(node.child_at(1).unwrap(), 9);
    }

    #[test]
    fn build_validates_child_count() {
        let mut data = [0u8; PAGE_SIZE];

        let result =
            InnerViewMut::build(&mut data, PageType::IndexInner, &[sep(1), sep(2)], &[10, 11]);

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("needs 3 children"));
    }

    #[test]
    fn contents_roundtrip_through_build() {
        let mut data = [0u8; PAGE_SIZE];

        let keys = vec![sep(10), sep(20), sep(30)];
        let children = vec![100, 101, 102, 103];
        InnerViewMut::build(&mut data, PageType::IndexInner, &keys, &children).unwrap();

        let node = InnerViewMut::from_page(&mut data, PageType::IndexInner).unwrap();
        let (got_keys, got_children) = node.contents().unwrap();
        assert_eq!(got_keys, keys);
        assert_eq!(got_children, children);
    }
}
