//! # Paged B+Tree Index
//!
//! `PagedIndex` is the one tree engine behind every ordered structure in a
//! store: attribute indexes, the OID index and the free-space manager's own
//! bookkeeping. It maps `i64` keys to `i64` values across 4KB pages, ordered
//! by a compile-time [`KeyOrder`]: unique by key, or by (key, value) with
//! duplicate keys.
//!
//! ## Descent
//!
//! Operations descend iteratively, keeping the path as a `SmallVec` of
//! (page, child index) frames. No node references are held across levels;
//! each step reads a page into a stack buffer, decides, and moves on. Splits
//! and rebalances walk the recorded path back up. When a split propagates,
//! the separator's slot in the parent is found by a fresh binary search
//! rather than the remembered descent slot, since copy-on-write may have
//! rewritten the parent since the way down.
//!
//! ## Copy-on-Write Snapshots
//!
//! Open cursors must keep seeing the tree as it was when they started. The
//! engine stamps every page write with a counter shared with the cursor
//! registry; before mutating a page some open cursor could see (stamp older
//! than the newest open generation), the whole path from the root down is
//! cloned onto fresh pages, the parent pointers are rewired, and the
//! superseded pages go to the free-space manager. Cursors hold page numbers,
//! never references, so the superseded pages stay readable until every
//! cursor that could reach them has closed.
//!
//! With no cursors open, all mutation is in place and a non-splitting
//! insert or remove writes exactly one page; a leaf split writes three.
//!
//! ## Structure Maintenance
//!
//! Leaves split at the median. A non-root leaf below half fill borrows from
//! or merges with a neighbor under the same parent; inner nodes do the same
//! with their separator rotating through the parent. When the root ends up
//! as an inner node with a single child, the tree loses a level.

use std::marker::PhantomData;

use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;
use eyre::{bail, ensure, Result};
use hashbrown::{HashMap, HashSet};
use log::{debug, trace};
use smallvec::SmallVec;

use crate::storage::{
    PageBuf, PageHeader, PageKinds, INNER_MAX_KEYS, INNER_MIN_KEYS, LEAF_MAX_ENTRIES,
    LEAF_MIN_ENTRIES, PAGE_SIZE,
};
use crate::store::Store;

use super::cursor::EntryCursor;
use super::entry::{ByKeyValue, KeyOrder, LLEntry, SearchResult, UniqueByKey};
use super::inner::{InnerView, InnerViewMut};
use super::leaf::{LeafView, LeafViewMut};
use super::registry::CursorRegistry;

/// Deepest tree the engine will follow before declaring corruption.
pub const MAX_TREE_DEPTH: usize = 8;

/// Read-only page access.
pub(crate) trait PageRead {
    fn read(&self, page_no: u32, buf: &mut PageBuf) -> Result<()>;
}

/// Full page access for tree mutation. `allocate` and `free` go through the
/// free-space manager for user trees; the free-space manager's own backing
/// tree plugs in an implementation that only ever extends the file, which
/// breaks the allocation cycle.
pub(crate) trait TreeIo: PageRead {
    fn write(&mut self, page_no: u32, buf: &PageBuf) -> Result<()>;
    fn allocate(&mut self) -> Result<u32>;
    fn free(&mut self, page_no: u32) -> Result<()>;
    fn registry(&self) -> &CursorRegistry;
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    page: u32,
    child_idx: u16,
}

type PathStack = SmallVec<[Frame; MAX_TREE_DEPTH]>;

/// Page counts of one index tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexPageStats {
    pub inner_pages: u64,
    pub leaf_pages: u64,
}

pub struct PagedIndex<O: KeyOrder> {
    root_page: u32,
    entry_count: u64,
    kinds: PageKinds,
    /// Write stamp per page touched this session; absent means "older than
    /// any open cursor".
    page_gen: HashMap<u32, u64>,
    /// Pages written since the last `mark_clean`.
    dirty: HashSet<u32>,
    _order: PhantomData<O>,
}

impl<O: KeyOrder> PagedIndex<O> {
    pub(crate) fn create_in(io: &mut impl TreeIo, kinds: PageKinds) -> Result<Self> {
        let root = io.allocate()?;
        let mut buf = [0u8; PAGE_SIZE];
        LeafViewMut::init(&mut buf, kinds.leaf)?;

        let mut index = Self::open(root, 0, kinds);
        index.write_node(io, root, &buf)?;
        debug!("created {:?} index with root page {}", kinds.leaf, root);
        Ok(index)
    }

    pub(crate) fn open(root_page: u32, entry_count: u64, kinds: PageKinds) -> Self {
        Self {
            root_page,
            entry_count,
            kinds,
            page_gen: HashMap::new(),
            dirty: HashSet::new(),
            _order: PhantomData,
        }
    }

    pub fn root_page(&self) -> u32 {
        self.root_page
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    pub(crate) fn kinds(&self) -> PageKinds {
        self.kinds
    }

    /// Number of pages written since the last `mark_clean`.
    pub fn dirty_page_count(&self) -> usize {
        self.dirty.len()
    }

    pub fn mark_clean(&mut self) {
        self.dirty.clear();
    }

    fn write_node(&mut self, io: &mut impl TreeIo, page_no: u32, buf: &PageBuf) -> Result<()> {
        io.write(page_no, buf)?;
        self.page_gen.insert(page_no, io.registry().write_stamp());
        self.dirty.insert(page_no);
        Ok(())
    }

    /// Whether some open cursor's snapshot includes this page.
    fn needs_cow(&self, io: &impl TreeIo, page_no: u32) -> bool {
        match io.registry().newest_open() {
            None => false,
            Some(newest) => self.page_gen.get(&page_no).copied().unwrap_or(0) < newest,
        }
    }

    /// Copies a page onto a fresh one and frees the original. The caller
    /// rewires whatever pointed at the old page.
    fn clone_page(&mut self, io: &mut impl TreeIo, old: u32) -> Result<u32> {
        let new = io.allocate()?;
        let mut buf = [0u8; PAGE_SIZE];
        io.read(old, &mut buf)?;
        self.write_node(io, new, &buf)?;
        io.free(old)?;
        self.page_gen.remove(&old);
        self.dirty.remove(&old);
        trace!("cloned pinned page {} to {}", old, new);
        Ok(new)
    }

    fn descend<R: PageRead>(
        &self,
        io: &R,
        probe: &LLEntry,
    ) -> Result<(PathStack, u32, Box<PageBuf>)> {
        let mut stack = PathStack::new();
        let mut page_no = self.root_page;
        let mut buf = Box::new([0u8; PAGE_SIZE]);

        loop {
            ensure!(
                stack.len() <= MAX_TREE_DEPTH,
                "index tree deeper than {} levels at page {}; file is corrupt",
                MAX_TREE_DEPTH,
                page_no
            );

            io.read(page_no, &mut buf)?;
            let kind = PageHeader::from_bytes(&buf[..])?.page_type();

            if kind == self.kinds.leaf {
                return Ok((stack, page_no, buf));
            }
            if kind != self.kinds.inner {
                bail!(
                    "page {} has kind {:?}, expected {:?} or {:?}",
                    page_no,
                    kind,
                    self.kinds.inner,
                    self.kinds.leaf
                );
            }

            let node = InnerView::from_page(&buf[..], self.kinds.inner)?;
            let (child_idx, child) = node.find_child::<O>(probe)?;
            stack.push(Frame {
                page: page_no,
                child_idx: child_idx as u16,
            });
            page_no = child;
        }
    }

    /// Clones every pinned page on the descent path, root first, rewiring
    /// parent pointers as it goes. Updates the stack and leaf page number
    /// in place.
    fn make_path_writable(
        &mut self,
        io: &mut impl TreeIo,
        stack: &mut PathStack,
        leaf_pn: &mut u32,
    ) -> Result<()> {
        let mut parent: Option<(u32, u16)> = None;

        for level in 0..=stack.len() {
            let at_leaf = level == stack.len();
            let page_no = if at_leaf { *leaf_pn } else { stack[level].page };

            let current = if self.needs_cow(io, page_no) {
                let new_pn = self.clone_page(io, page_no)?;
                match parent {
                    None => self.root_page = new_pn,
                    Some((parent_pn, child_idx)) => {
                        let mut buf = [0u8; PAGE_SIZE];
                        io.read(parent_pn, &mut buf)?;
                        let mut node = InnerViewMut::from_page(&mut buf, self.kinds.inner)?;
                        node.set_child_at(child_idx as usize, new_pn)?;
                        self.write_node(io, parent_pn, &buf)?;
                    }
                }
                if at_leaf {
                    *leaf_pn = new_pn;
                } else {
                    stack[level].page = new_pn;
                }
                new_pn
            } else {
                page_no
            };

            if !at_leaf {
                parent = Some((current, stack[level].child_idx));
            }
        }
        Ok(())
    }

    /// Clones a page not on the descent path (a sibling) if pinned, and
    /// repoints the already-writable parent at the clone.
    fn make_sibling_writable(
        &mut self,
        io: &mut impl TreeIo,
        parent: &mut InnerViewMut<'_>,
        child_idx: usize,
    ) -> Result<u32> {
        let page_no = parent.child_at(child_idx)?;
        if !self.needs_cow(io, page_no) {
            return Ok(page_no);
        }
        let new_pn = self.clone_page(io, page_no)?;
        parent.set_child_at(child_idx, new_pn)?;
        Ok(new_pn)
    }

    /// Inserts an entry. Returns `Some(previous_value)` when the entry was
    /// already present under ordering `O` (unique: same key; non-unique:
    /// same pair) and nothing was added.
    pub(crate) fn insert_in(
        &mut self,
        io: &mut impl TreeIo,
        key: i64,
        value: i64,
    ) -> Result<Option<i64>> {
        let entry = LLEntry::new(key, value);
        let (mut stack, mut leaf_pn, buf) = self.descend(io, &entry)?;
        let leaf = LeafView::from_page(&buf[..], self.kinds.leaf)?;

        match leaf.search::<O>(&entry)? {
            SearchResult::Found(slot) => {
                let old = leaf.entry_at(slot)?.value;
                if !O::UNIQUE || old == value {
                    return Ok(Some(old));
                }
                self.make_path_writable(io, &mut stack, &mut leaf_pn)?;
                let mut buf = [0u8; PAGE_SIZE];
                io.read(leaf_pn, &mut buf)?;
                let mut leaf = LeafViewMut::from_page(&mut buf, self.kinds.leaf)?;
                leaf.set_entry_at(slot, entry)?;
                self.write_node(io, leaf_pn, &buf)?;
                Ok(Some(old))
            }
            SearchResult::NotFound(slot) => {
                self.make_path_writable(io, &mut stack, &mut leaf_pn)?;
                let mut buf = [0u8; PAGE_SIZE];
                io.read(leaf_pn, &mut buf)?;
                let count = LeafView::from_page(&buf, self.kinds.leaf)?.entry_count();

                if count < LEAF_MAX_ENTRIES {
                    let mut leaf = LeafViewMut::from_page(&mut buf, self.kinds.leaf)?;
                    leaf.insert_at(slot, entry)?;
                    self.write_node(io, leaf_pn, &buf)?;
                } else {
                    self.split_leaf(io, stack, leaf_pn, &buf, slot, entry)?;
                }
                self.entry_count += 1;
                Ok(None)
            }
        }
    }

    fn split_leaf(
        &mut self,
        io: &mut impl TreeIo,
        stack: PathStack,
        leaf_pn: u32,
        leaf_buf: &PageBuf,
        slot: usize,
        entry: LLEntry,
    ) -> Result<()> {
        let arena = Bump::new();
        let mut staged = BumpVec::with_capacity_in(LEAF_MAX_ENTRIES + 1, &arena);

        let leaf = LeafView::from_page(&leaf_buf[..], self.kinds.leaf)?;
        for i in 0..leaf.entry_count() {
            staged.push(leaf.entry_at(i)?);
        }
        staged.insert(slot, entry);

        let mid = staged.len() / 2;
        let separator = staged[mid];

        let mut left_buf = [0u8; PAGE_SIZE];
        LeafViewMut::init(&mut left_buf, self.kinds.leaf)?.set_entries(&staged[..mid])?;
        self.write_node(io, leaf_pn, &left_buf)?;

        let right_pn = io.allocate()?;
        let mut right_buf = [0u8; PAGE_SIZE];
        LeafViewMut::init(&mut right_buf, self.kinds.leaf)?.set_entries(&staged[mid..])?;
        self.write_node(io, right_pn, &right_buf)?;

        debug!(
            "split leaf {}: {} entries kept, {} moved to {}",
            leaf_pn,
            mid,
            staged.len() - mid,
            right_pn
        );

        self.propagate_split(io, stack, leaf_pn, separator, right_pn)
    }

    fn propagate_split(
        &mut self,
        io: &mut impl TreeIo,
        mut stack: PathStack,
        mut left_pn: u32,
        mut separator: LLEntry,
        mut right_pn: u32,
    ) -> Result<()> {
        loop {
            let Some(frame) = stack.pop() else {
                let root = io.allocate()?;
                let mut buf = [0u8; PAGE_SIZE];
                InnerViewMut::init_root(&mut buf, self.kinds.inner, separator, left_pn, right_pn)?;
                self.write_node(io, root, &buf)?;
                self.root_page = root;
                debug!("tree grew: new root {} over {} and {}", root, left_pn, right_pn);
                return Ok(());
            };

            let parent_pn = frame.page;
            let mut buf = [0u8; PAGE_SIZE];
            io.read(parent_pn, &mut buf)?;
            let mut node = InnerViewMut::from_page(&mut buf, self.kinds.inner)?;

            if node.key_count() < INNER_MAX_KEYS {
                let pos = node.upper_bound::<O>(&separator)?;
                node.insert_at(pos, separator, right_pn)?;
                self.write_node(io, parent_pn, &buf)?;
                return Ok(());
            }

            // Parent is full; split it and push the middle key up.
            let (mut keys, mut children) = node.contents()?;
            let pos = node.upper_bound::<O>(&separator)?;
            keys.insert(pos, separator);
            children.insert(pos + 1, right_pn);

            let mid = keys.len() / 2;
            let promoted = keys[mid];

            let mut left_buf = [0u8; PAGE_SIZE];
            InnerViewMut::build(
                &mut left_buf,
                self.kinds.inner,
                &keys[..mid],
                &children[..=mid],
            )?;
            self.write_node(io, parent_pn, &left_buf)?;

            let new_right = io.allocate()?;
            let mut right_buf = [0u8; PAGE_SIZE];
            InnerViewMut::build(
                &mut right_buf,
                self.kinds.inner,
                &keys[mid + 1..],
                &children[mid + 1..],
            )?;
            self.write_node(io, new_right, &right_buf)?;

            debug!(
                "split inner {}: promoted key {}, new right {}",
                parent_pn, promoted.key, new_right
            );

            left_pn = parent_pn;
            separator = promoted;
            right_pn = new_right;
        }
    }

    /// Removes the entry matching the probe under ordering `O`. Returns the
    /// removed value, or `None` if absent.
    pub(crate) fn remove_in(
        &mut self,
        io: &mut impl TreeIo,
        probe: LLEntry,
    ) -> Result<Option<i64>> {
        let (mut stack, mut leaf_pn, buf) = self.descend(io, &probe)?;
        let leaf = LeafView::from_page(&buf[..], self.kinds.leaf)?;

        let SearchResult::Found(slot) = leaf.search::<O>(&probe)? else {
            return Ok(None);
        };

        self.make_path_writable(io, &mut stack, &mut leaf_pn)?;
        let mut buf = [0u8; PAGE_SIZE];
        io.read(leaf_pn, &mut buf)?;
        let mut leaf = LeafViewMut::from_page(&mut buf, self.kinds.leaf)?;
        let removed = leaf.remove_at(slot)?;
        let underfull = leaf.entry_count() < LEAF_MIN_ENTRIES;
        self.write_node(io, leaf_pn, &buf)?;
        self.entry_count -= 1;

        if underfull && !stack.is_empty() {
            self.rebalance(io, stack)?;
        }
        Ok(Some(removed.value))
    }

    /// Walks the path back up, fixing one underfull child per level until a
    /// parent stays at least half full, then collapses trivial roots.
    fn rebalance(&mut self, io: &mut impl TreeIo, mut stack: PathStack) -> Result<()> {
        let mut child_is_leaf = true;

        while let Some(frame) = stack.pop() {
            let parent_keys =
                self.fix_child(io, frame.page, frame.child_idx as usize, child_is_leaf)?;
            child_is_leaf = false;

            if parent_keys >= INNER_MIN_KEYS {
                break;
            }
        }

        // A root inner node may end with a single child; drop the level.
        loop {
            let mut buf = [0u8; PAGE_SIZE];
            io.read(self.root_page, &mut buf)?;
            if PageHeader::from_bytes(&buf)?.page_type() != self.kinds.inner {
                break;
            }
            let node = InnerView::from_page(&buf, self.kinds.inner)?;
            if node.key_count() > 0 {
                break;
            }
            let old_root = self.root_page;
            self.root_page = node.child_at(0)?;
            io.free(old_root)?;
            self.page_gen.remove(&old_root);
            self.dirty.remove(&old_root);
            debug!("tree shrank: root {} collapsed into {}", old_root, self.root_page);
        }
        Ok(())
    }

    /// Rebalances the child at `child_idx` under the given parent if it is
    /// underfull. Returns the parent's key count afterwards.
    fn fix_child(
        &mut self,
        io: &mut impl TreeIo,
        parent_pn: u32,
        child_idx: usize,
        child_is_leaf: bool,
    ) -> Result<usize> {
        let mut parent_buf = [0u8; PAGE_SIZE];
        io.read(parent_pn, &mut parent_buf)?;
        let mut parent = InnerViewMut::from_page(&mut parent_buf, self.kinds.inner)?;

        if parent.key_count() == 0 {
            return Ok(0);
        }

        let child_pn = parent.child_at(child_idx)?;
        let mut child_buf = [0u8; PAGE_SIZE];
        io.read(child_pn, &mut child_buf)?;

        let (fill, min_fill) = if child_is_leaf {
            let leaf = LeafView::from_page(&child_buf, self.kinds.leaf)?;
            (leaf.entry_count(), LEAF_MIN_ENTRIES)
        } else {
            let node = InnerView::from_page(&child_buf, self.kinds.inner)?;
            (node.key_count(), INNER_MIN_KEYS)
        };
        if fill >= min_fill {
            return Ok(parent.key_count());
        }

        // Pair the underfull child with its left neighbor, or the right one
        // when it is leftmost. The separator between the pair sits at the
        // left child's index.
        let sep_idx = if child_idx > 0 { child_idx - 1 } else { 0 };
        let left_pn = self.make_sibling_writable(io, &mut parent, sep_idx)?;
        let right_pn = self.make_sibling_writable(io, &mut parent, sep_idx + 1)?;

        if child_is_leaf {
            self.balance_leaves(io, &mut parent, sep_idx, left_pn, right_pn)?;
        } else {
            self.balance_inners(io, &mut parent, sep_idx, left_pn, right_pn)?;
        }

        let keys = parent.key_count();
        self.write_node(io, parent_pn, &parent_buf)?;
        Ok(keys)
    }

    fn balance_leaves(
        &mut self,
        io: &mut impl TreeIo,
        parent: &mut InnerViewMut<'_>,
        sep_idx: usize,
        left_pn: u32,
        right_pn: u32,
    ) -> Result<()> {
        let mut left_buf = [0u8; PAGE_SIZE];
        let mut right_buf = [0u8; PAGE_SIZE];
        io.read(left_pn, &mut left_buf)?;
        io.read(right_pn, &mut right_buf)?;

        let left_entries = LeafView::from_page(&left_buf, self.kinds.leaf)?.entries()?;
        let right_entries = LeafView::from_page(&right_buf, self.kinds.leaf)?.entries()?;

        if left_entries.len() + right_entries.len() <= LEAF_MAX_ENTRIES {
            let mut merged = left_entries;
            merged.extend(right_entries);
            LeafViewMut::init(&mut left_buf, self.kinds.leaf)?.set_entries(&merged)?;
            self.write_node(io, left_pn, &left_buf)?;

            io.free(right_pn)?;
            self.page_gen.remove(&right_pn);
            self.dirty.remove(&right_pn);
            parent.remove_at(sep_idx)?;
            trace!("merged leaf {} into {}", right_pn, left_pn);
            return Ok(());
        }

        // Borrow one entry from the fuller side.
        let mut left = LeafViewMut::from_page(&mut left_buf, self.kinds.leaf)?;
        let mut right = LeafViewMut::from_page(&mut right_buf, self.kinds.leaf)?;

        if left.entry_count() < right.entry_count() {
            let moved = right.remove_at(0)?;
            let count = left.entry_count();
            left.insert_at(count, moved)?;
            parent.set_key_at(sep_idx, right.entry_at(0)?)?;
        } else {
            let moved = left.remove_at(left.entry_count() - 1)?;
            right.insert_at(0, moved)?;
            parent.set_key_at(sep_idx, moved)?;
        }

        self.write_node(io, left_pn, &left_buf)?;
        self.write_node(io, right_pn, &right_buf)?;
        Ok(())
    }

    fn balance_inners(
        &mut self,
        io: &mut impl TreeIo,
        parent: &mut InnerViewMut<'_>,
        sep_idx: usize,
        left_pn: u32,
        right_pn: u32,
    ) -> Result<()> {
        let mut left_buf = [0u8; PAGE_SIZE];
        let mut right_buf = [0u8; PAGE_SIZE];
        io.read(left_pn, &mut left_buf)?;
        io.read(right_pn, &mut right_buf)?;

        let (mut left_keys, mut left_children) =
            InnerViewMut::from_page(&mut left_buf, self.kinds.inner)?.contents()?;
        let (right_keys, right_children) =
            InnerViewMut::from_page(&mut right_buf, self.kinds.inner)?.contents()?;
        let separator = parent.key_at(sep_idx)?;

        if left_keys.len() + 1 + right_keys.len() <= INNER_MAX_KEYS {
            left_keys.push(separator);
            left_keys.extend(right_keys);
            left_children.extend(right_children);

            InnerViewMut::build(&mut left_buf, self.kinds.inner, &left_keys, &left_children)?;
            self.write_node(io, left_pn, &left_buf)?;

            io.free(right_pn)?;
            self.page_gen.remove(&right_pn);
            self.dirty.remove(&right_pn);
            parent.remove_at(sep_idx)?;
            trace!("merged inner {} into {}", right_pn, left_pn);
            return Ok(());
        }

        // Rotate one key through the parent toward the underfull side.
        if left_keys.len() < right_keys.len() {
            left_keys.push(separator);
            left_children.push(right_children[0]);
            parent.set_key_at(sep_idx, right_keys[0])?;

            InnerViewMut::build(&mut left_buf, self.kinds.inner, &left_keys, &left_children)?;
            let mut rebuilt = [0u8; PAGE_SIZE];
            InnerViewMut::build(
                &mut rebuilt,
                self.kinds.inner,
                &right_keys[1..],
                &right_children[1..],
            )?;
            self.write_node(io, left_pn, &left_buf)?;
            self.write_node(io, right_pn, &rebuilt)?;
        } else {
            let moved_key = left_keys[left_keys.len() - 1];
            let moved_child = left_children[left_children.len() - 1];

            let mut new_right_keys = Vec::with_capacity(right_keys.len() + 1);
            new_right_keys.push(separator);
            new_right_keys.extend(right_keys);
            let mut new_right_children = Vec::with_capacity(right_children.len() + 1);
            new_right_children.push(moved_child);
            new_right_children.extend(right_children);

            parent.set_key_at(sep_idx, moved_key)?;

            InnerViewMut::build(
                &mut left_buf,
                self.kinds.inner,
                &left_keys[..left_keys.len() - 1],
                &left_children[..left_children.len() - 1],
            )?;
            let mut rebuilt = [0u8; PAGE_SIZE];
            InnerViewMut::build(
                &mut rebuilt,
                self.kinds.inner,
                &new_right_keys,
                &new_right_children,
            )?;
            self.write_node(io, left_pn, &left_buf)?;
            self.write_node(io, right_pn, &rebuilt)?;
        }
        Ok(())
    }

    /// Point lookup for the probe; returns its value slot.
    pub(crate) fn lookup_in<R: PageRead>(
        &self,
        io: &R,
        probe: &LLEntry,
    ) -> Result<Option<i64>> {
        let (_, _, buf) = self.descend(io, probe)?;
        let leaf = LeafView::from_page(&buf[..], self.kinds.leaf)?;
        match leaf.search::<O>(probe)? {
            SearchResult::Found(slot) => Ok(Some(leaf.entry_at(slot)?.value)),
            SearchResult::NotFound(_) => Ok(None),
        }
    }

    /// The greatest entry in the tree, by rightmost descent.
    pub(crate) fn last_entry_in<R: PageRead>(&self, io: &R) -> Result<Option<LLEntry>> {
        let mut page_no = self.root_page;
        let mut buf = Box::new([0u8; PAGE_SIZE]);
        let mut depth = 0;

        loop {
            ensure!(
                depth <= MAX_TREE_DEPTH,
                "index tree deeper than {} levels at page {}; file is corrupt",
                MAX_TREE_DEPTH,
                page_no
            );
            io.read(page_no, &mut buf)?;
            let kind = PageHeader::from_bytes(&buf[..])?.page_type();

            if kind == self.kinds.leaf {
                let leaf = LeafView::from_page(&buf[..], self.kinds.leaf)?;
                if leaf.entry_count() == 0 {
                    return Ok(None);
                }
                return leaf.entry_at(leaf.entry_count() - 1).map(Some);
            }

            let node = InnerView::from_page(&buf[..], self.kinds.inner)?;
            page_no = node.child_at(node.key_count())?;
            depth += 1;
        }
    }

    /// Visits every entry in key order.
    pub(crate) fn for_each_entry_in<R: PageRead>(
        &self,
        io: &R,
        f: &mut dyn FnMut(LLEntry) -> Result<()>,
    ) -> Result<()> {
        let mut pending = vec![self.root_page];
        let mut buf = Box::new([0u8; PAGE_SIZE]);

        while let Some(page_no) = pending.pop() {
            io.read(page_no, &mut buf)?;
            let kind = PageHeader::from_bytes(&buf[..])?.page_type();

            if kind == self.kinds.leaf {
                let leaf = LeafView::from_page(&buf[..], self.kinds.leaf)?;
                for slot in 0..leaf.entry_count() {
                    f(leaf.entry_at(slot)?)?;
                }
                continue;
            }

            let node = InnerView::from_page(&buf[..], self.kinds.inner)?;
            for idx in (0..node.child_count()).rev() {
                pending.push(node.child_at(idx)?);
            }
        }
        Ok(())
    }

    /// Every page number this tree occupies.
    pub(crate) fn collect_pages_in<R: PageRead>(&self, io: &R) -> Result<Vec<u32>> {
        let mut pages = Vec::new();
        let mut pending = vec![self.root_page];
        let mut buf = Box::new([0u8; PAGE_SIZE]);

        while let Some(page_no) = pending.pop() {
            pages.push(page_no);
            io.read(page_no, &mut buf)?;
            if PageHeader::from_bytes(&buf[..])?.page_type() != self.kinds.inner {
                continue;
            }
            let node = InnerView::from_page(&buf[..], self.kinds.inner)?;
            for idx in 0..node.child_count() {
                pending.push(node.child_at(idx)?);
            }
        }
        Ok(pages)
    }

    pub(crate) fn page_stats_in<R: PageRead>(&self, io: &R) -> Result<IndexPageStats> {
        let mut stats = IndexPageStats::default();
        let mut pending = vec![self.root_page];
        let mut buf = Box::new([0u8; PAGE_SIZE]);

        while let Some(page_no) = pending.pop() {
            io.read(page_no, &mut buf)?;
            let kind = PageHeader::from_bytes(&buf[..])?.page_type();

            if kind == self.kinds.leaf {
                stats.leaf_pages += 1;
                continue;
            }
            stats.inner_pages += 1;
            let node = InnerView::from_page(&buf[..], self.kinds.inner)?;
            for idx in 0..node.child_count() {
                pending.push(node.child_at(idx)?);
            }
        }
        Ok(stats)
    }
}

/// Store-facing API. Mutation borrows the store mutably; lookups and
/// cursors borrow it shared.
impl<O: KeyOrder> PagedIndex<O> {
    /// Current greatest key, or `None` when empty.
    pub fn max_key(&self, store: &Store) -> Result<Option<i64>> {
        Ok(self.last_entry_in(store)?.map(|e| e.key))
    }

    pub fn page_stats(&self, store: &Store) -> Result<IndexPageStats> {
        self.page_stats_in(store)
    }

    /// Ascending cursor over the whole index.
    pub fn cursor(&self, store: &Store) -> Result<EntryCursor<O>> {
        self.cursor_range(store, i64::MIN, i64::MAX)
    }

    /// Descending cursor over the whole index.
    pub fn cursor_descending(&self, store: &Store) -> Result<EntryCursor<O>> {
        self.cursor_range_descending(store, i64::MIN, i64::MAX)
    }

    /// Ascending cursor over keys in `[min_key, max_key]`, both inclusive.
    pub fn cursor_range(
        &self,
        store: &Store,
        min_key: i64,
        max_key: i64,
    ) -> Result<EntryCursor<O>> {
        EntryCursor::open(self, store, O::min_probe(min_key), O::max_probe(max_key), false)
    }

    /// Descending cursor over keys in `[min_key, max_key]`, both inclusive.
    pub fn cursor_range_descending(
        &self,
        store: &Store,
        min_key: i64,
        max_key: i64,
    ) -> Result<EntryCursor<O>> {
        EntryCursor::open(self, store, O::min_probe(min_key), O::max_probe(max_key), true)
    }

    /// Removes one exact entry; used by cursors for element-wise removal.
    pub fn remove_entry(&mut self, store: &mut Store, entry: LLEntry) -> Result<bool> {
        let mut io = store.tree_io();
        Ok(self.remove_in(&mut io, entry)?.is_some())
    }
}

impl PagedIndex<UniqueByKey> {
    /// Inserts or replaces the value for a key. Returns the previous value
    /// if the key was present.
    pub fn insert(&mut self, store: &mut Store, key: i64, value: i64) -> Result<Option<i64>> {
        let mut io = store.tree_io();
        self.insert_in(&mut io, key, value)
    }

    pub fn find(&self, store: &Store, key: i64) -> Result<Option<i64>> {
        self.lookup_in(store, &UniqueByKey::min_probe(key))
    }

    /// Removes a key. Returns its value if it was present.
    pub fn remove(&mut self, store: &mut Store, key: i64) -> Result<Option<i64>> {
        let mut io = store.tree_io();
        self.remove_in(&mut io, UniqueByKey::min_probe(key))
    }
}

impl PagedIndex<ByKeyValue> {
    /// Adds a (key, value) pair. Returns false if the exact pair already
    /// existed.
    pub fn insert(&mut self, store: &mut Store, key: i64, value: i64) -> Result<bool> {
        let mut io = store.tree_io();
        Ok(self.insert_in(&mut io, key, value)?.is_none())
    }

    pub fn contains(&self, store: &Store, key: i64, value: i64) -> Result<bool> {
        Ok(self.lookup_in(store, &LLEntry::new(key, value))?.is_some())
    }

    /// Removes one exact (key, value) pair. Returns false if absent.
    pub fn remove(&mut self, store: &mut Store, key: i64, value: i64) -> Result<bool> {
        let mut io = store.tree_io();
        Ok(self.remove_in(&mut io, LLEntry::new(key, value))?.is_some())
    }

    /// Ascending cursor over every value stored under one key.
    pub fn find_values(&self, store: &Store, key: i64) -> Result<EntryCursor<ByKeyValue>> {
        self.cursor_range(store, key, key)
    }
}
