//! # Snapshot Cursors
//!
//! An `EntryCursor` walks an index in key order, ascending or descending,
//! over the snapshot of the tree that existed when it was opened. The
//! cursor registers itself with the store's [`CursorRegistry`] on open;
//! from then on, any mutation of a page the cursor could reach goes through
//! copy-on-write, so the pages the cursor holds by number stay intact until
//! it closes.
//!
//! ## Position
//!
//! A cursor's position is a stack of (inner page, child index) frames plus
//! a private copy of the current leaf and a slot into it. No references
//! into storage are held, which is why `next` takes the store as an
//! argument instead of borrowing it for the cursor's lifetime: the caller
//! can interleave reads with mutation freely, and each call simply reads
//! whatever pages the snapshot pins.
//!
//! ## Lifecycle
//!
//! A cursor deregisters as soon as it is exhausted, so pages it pinned can
//! be reclaimed without waiting for the handle to drop. `close` deregisters
//! early; what a closed handle does afterwards is the store's
//! [`ClosedHandlePolicy`]: report no entries, or fail.

use eyre::{bail, ensure, Result};
use log::trace;
use smallvec::SmallVec;

use crate::storage::{PageBuf, PageHeader, PageKinds, PAGE_SIZE};
use crate::store::{ClosedHandlePolicy, Store};

use super::entry::{KeyOrder, LLEntry, SearchResult};
use super::inner::InnerView;
use super::leaf::LeafView;
use super::registry::CursorRegistry;
use super::tree::{PageRead, PagedIndex, MAX_TREE_DEPTH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    Active,
    Exhausted,
    Closed,
}

#[derive(Debug, Clone, Copy)]
struct CursorFrame {
    page: u32,
    child_idx: u16,
}

pub struct EntryCursor<O: KeyOrder> {
    gen: u64,
    registry: CursorRegistry,
    policy: ClosedHandlePolicy,
    descending: bool,
    min: LLEntry,
    max: LLEntry,
    kinds: PageKinds,
    stack: SmallVec<[CursorFrame; MAX_TREE_DEPTH]>,
    leaf: Box<PageBuf>,
    /// Slot of the next entry to yield; one past either end means the
    /// current leaf is spent.
    slot: isize,
    state: CursorState,
    last: Option<LLEntry>,
    _order: std::marker::PhantomData<O>,
}

impl<O: KeyOrder> EntryCursor<O> {
    pub(crate) fn open(
        index: &PagedIndex<O>,
        store: &Store,
        min: LLEntry,
        max: LLEntry,
        descending: bool,
    ) -> Result<Self> {
        let registry = store.registry().clone();
        let gen = registry.register();
        trace!("cursor {} opened on root {}", gen, index.root_page());

        let mut cursor = Self {
            gen,
            registry,
            policy: store.closed_handle_policy(),
            descending,
            min,
            max,
            kinds: index.kinds(),
            stack: SmallVec::new(),
            leaf: Box::new([0u8; PAGE_SIZE]),
            slot: 0,
            state: CursorState::Active,
            last: None,
            _order: std::marker::PhantomData,
        };

        if let Err(e) = cursor.seek(store, index.root_page()) {
            cursor.close();
            return Err(e);
        }
        Ok(cursor)
    }

    /// Descends from the root to the boundary leaf for the scan direction
    /// and positions the slot on the first in-range entry.
    fn seek(&mut self, store: &Store, root: u32) -> Result<()> {
        let probe = if self.descending { self.max } else { self.min };
        let mut page_no = root;

        loop {
            ensure!(
                self.stack.len() <= MAX_TREE_DEPTH,
                "index tree deeper than {} levels at page {}; file is corrupt",
                MAX_TREE_DEPTH,
                page_no
            );

            store.read(page_no, &mut self.leaf)?;
            let kind = PageHeader::from_bytes(&self.leaf[..])?.page_type();

            if kind == self.kinds.leaf {
                break;
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

            let node = InnerView::from_page(&self.leaf[..], self.kinds.inner)?;
            let (child_idx, child) = node.find_child::<O>(&probe)?;
            self.stack.push(CursorFrame {
                page: page_no,
                child_idx: child_idx as u16,
            });
            page_no = child;
        }

        let leaf = LeafView::from_page(&self.leaf[..], self.kinds.leaf)?;
        self.slot = match leaf.search::<O>(&probe)? {
            SearchResult::Found(slot) => slot as isize,
            SearchResult::NotFound(slot) => {
                if self.descending {
                    slot as isize - 1
                } else {
                    slot as isize
                }
            }
        };
        Ok(())
    }

    /// Yields the next entry, or `None` once the range is exhausted.
    pub fn next(&mut self, store: &Store) -> Result<Option<LLEntry>> {
        match self.state {
            CursorState::Closed => {
                return match self.policy {
                    ClosedHandlePolicy::ReturnEmpty => Ok(None),
                    ClosedHandlePolicy::Fail => bail!("cursor is closed"),
                }
            }
            CursorState::Exhausted => return Ok(None),
            CursorState::Active => {}
        }

        loop {
            let leaf = LeafView::from_page(&self.leaf[..], self.kinds.leaf)?;
            let count = leaf.entry_count() as isize;

            if self.slot >= 0 && self.slot < count {
                let entry = leaf.entry_at(self.slot as usize)?;
                let past_end = if self.descending {
                    O::cmp_entries(&entry, &self.min) == std::cmp::Ordering::Less
                } else {
                    O::cmp_entries(&entry, &self.max) == std::cmp::Ordering::Greater
                };
                if past_end {
                    self.finish();
                    return Ok(None);
                }
                self.slot += if self.descending { -1 } else { 1 };
                self.last = Some(entry);
                return Ok(Some(entry));
            }

            if !self.advance_leaf(store)? {
                self.finish();
                return Ok(None);
            }
        }
    }

    /// Moves to the neighboring leaf in scan direction. Returns false when
    /// the tree is out of leaves.
    fn advance_leaf(&mut self, store: &Store) -> Result<bool> {
        loop {
            let Some(mut frame) = self.stack.pop() else {
                return Ok(false);
            };

            let mut buf = [0u8; PAGE_SIZE];
            store.read(frame.page, &mut buf)?;
            let node = InnerView::from_page(&buf, self.kinds.inner)?;

            let next_child = if self.descending {
                frame.child_idx.checked_sub(1)
            } else if (frame.child_idx as usize) < node.key_count() {
                Some(frame.child_idx + 1)
            } else {
                None
            };

            let Some(child_idx) = next_child else {
                continue;
            };

            frame.child_idx = child_idx;
            let mut page_no = node.child_at(child_idx as usize)?;
            self.stack.push(frame);

            // Follow the scan-direction edge down to a leaf.
            loop {
                ensure!(
                    self.stack.len() <= MAX_TREE_DEPTH,
                    "index tree deeper than {} levels at page {}; file is corrupt",
                    MAX_TREE_DEPTH,
                    page_no
                );

                store.read(page_no, &mut self.leaf)?;
                let kind = PageHeader::from_bytes(&self.leaf[..])?.page_type();
                if kind == self.kinds.leaf {
                    break;
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

                let node = InnerView::from_page(&self.leaf[..], self.kinds.inner)?;
                let edge = if self.descending { node.key_count() } else { 0 };
                self.stack.push(CursorFrame {
                    page: page_no,
                    child_idx: edge as u16,
                });
                page_no = node.child_at(edge)?;
            }

            let leaf = LeafView::from_page(&self.leaf[..], self.kinds.leaf)?;
            self.slot = if self.descending {
                leaf.entry_count() as isize - 1
            } else {
                0
            };
            return Ok(true);
        }
    }

    /// Removes the most recently yielded entry from its index. The cursor
    /// keeps iterating over its snapshot and will not observe the removal.
    pub fn remove_current(
        &mut self,
        index: &mut PagedIndex<O>,
        store: &mut Store,
    ) -> Result<bool> {
        if self.state == CursorState::Closed {
            match self.policy {
                ClosedHandlePolicy::ReturnEmpty => return Ok(false),
                ClosedHandlePolicy::Fail => bail!("cursor is closed"),
            }
        }
        let Some(entry) = self.last.take() else {
            bail!("cursor has no current entry to remove");
        };
        index.remove_entry(store, entry)
    }

    pub fn is_closed(&self) -> bool {
        self.state == CursorState::Closed
    }

    /// Deregisters and releases pinned pages; exhaustion does this on its
    /// own, close only makes it explicit and early.
    pub fn close(&mut self) {
        if self.state == CursorState::Active {
            self.registry.deregister(self.gen);
            trace!("cursor {} closed", self.gen);
        }
        self.state = CursorState::Closed;
    }

    fn finish(&mut self) {
        self.registry.deregister(self.gen);
        self.state = CursorState::Exhausted;
        trace!("cursor {} exhausted", self.gen);
    }
}

impl<O: KeyOrder> Drop for EntryCursor<O> {
    fn drop(&mut self) {
        if self.state == CursorState::Active {
            self.registry.deregister(self.gen);
        }
    }
}
