//! # Free-Space Manager
//!
//! Tracks which pages of the store file can be reused. The bookkeeping is
//! self-hosted: freed page numbers live in a unique [`PagedIndex`] mapping
//! page number to a marker, so free-space state persists and scales like
//! everything else in the file.
//!
//! ## Markers
//!
//! - `0`: the page is free and may be handed out.
//! - `-1`: the page was freed while cursors were open. Some cursor snapshot
//!   may still reach it, so it is tombstoned rather than reusable. The
//!   tombstone is a logical state, not damage; once every cursor registered
//!   at or before the free has closed, it settles to reusable.
//!
//! Tombstones found when opening a store settle immediately, since no
//! cursor from a previous process can still be open.
//!
//! ## Breaking the Allocation Cycle
//!
//! The backing index needs pages itself. Routing its page allocation back
//! through the free list would recurse, so the backing tree runs on a
//! private [`TreeIo`] that only ever extends the file. Pages the backing
//! tree releases (merges, root collapse) are parked in a deferred list and
//! folded back into the index at the next settle. The backing tree also
//! gets a private, permanently empty cursor registry: no user cursor ever
//! reads free-space pages, so they never need copy-on-write.

use eyre::{bail, ensure, Result};
use log::{debug, trace};

use crate::index::entry::{KeyOrder, UniqueByKey};
use crate::index::tree::{PageRead, PagedIndex, TreeIo};
use crate::index::CursorRegistry;
use crate::storage::{PageBuf, PageChannel, PageKinds};

/// Marker for a reusable page.
pub const FREE_MARKER: i64 = 0;

/// Marker for a page freed while cursors were open.
pub const INVALIDATED_MARKER: i64 = -1;

/// Read adapter over a bare channel.
pub(crate) struct ChannelReader<'a>(pub &'a dyn PageChannel);

impl PageRead for ChannelReader<'_> {
    fn read(&self, page_no: u32, buf: &mut PageBuf) -> Result<()> {
        self.0.read_page(page_no, buf)
    }
}

/// Tree I/O for the free-space manager's own backing index: allocation
/// always extends the file, frees are deferred.
struct FsmIo<'a> {
    channel: &'a mut dyn PageChannel,
    deferred: &'a mut Vec<u32>,
    registry: &'a CursorRegistry,
}

impl PageRead for FsmIo<'_> {
    fn read(&self, page_no: u32, buf: &mut PageBuf) -> Result<()> {
        self.channel.read_page(page_no, buf)
    }
}

impl TreeIo for FsmIo<'_> {
    fn write(&mut self, page_no: u32, buf: &PageBuf) -> Result<()> {
        self.channel.write_page(page_no, buf)
    }

    fn allocate(&mut self) -> Result<u32> {
        self.channel.allocate_page()
    }

    fn free(&mut self, page_no: u32) -> Result<()> {
        self.deferred.push(page_no);
        Ok(())
    }

    fn registry(&self) -> &CursorRegistry {
        self.registry
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingFree {
    page: u32,
    freed_at: u64,
}

pub struct FreeSpaceManager {
    index: PagedIndex<UniqueByKey>,
    /// Pages that may be handed out right now.
    ready: Vec<u32>,
    /// Tombstoned pages waiting for their pinning cursors to close.
    pending: Vec<PendingFree>,
    /// Pages released by the backing tree itself, not yet recorded.
    deferred: Vec<u32>,
    own_registry: CursorRegistry,
}

impl FreeSpaceManager {
    pub fn create(channel: &mut dyn PageChannel) -> Result<Self> {
        let mut deferred = Vec::new();
        let own_registry = CursorRegistry::new();
        let index = {
            let mut io = FsmIo {
                channel,
                deferred: &mut deferred,
                registry: &own_registry,
            };
            PagedIndex::create_in(&mut io, PageKinds::fsm())?
        };

        Ok(Self {
            index,
            ready: Vec::new(),
            pending: Vec::new(),
            deferred,
            own_registry,
        })
    }

    pub fn open(channel: &dyn PageChannel, root_page: u32, entry_count: u64) -> Result<Self> {
        let index = PagedIndex::open(root_page, entry_count, PageKinds::fsm());

        let mut ready = Vec::new();
        let reader = ChannelReader(channel);
        index.for_each_entry_in(&reader, &mut |entry| {
            ensure!(
                entry.key > 0 && entry.key <= u32::MAX as i64,
                "free-space record names invalid page {}",
                entry.key
            );
            match entry.value {
                // Tombstones from a previous process have no cursors left
                // to wait for.
                FREE_MARKER | INVALIDATED_MARKER => ready.push(entry.key as u32),
                other => bail!(
                    "unknown free-space marker {} for page {}",
                    other,
                    entry.key
                ),
            }
            Ok(())
        })?;

        debug!(
            "opened free-space index: root {}, {} reusable pages",
            root_page,
            ready.len()
        );

        Ok(Self {
            index,
            ready,
            pending: Vec::new(),
            deferred: Vec::new(),
            own_registry: CursorRegistry::new(),
        })
    }

    /// Hands out a page: a reusable one if any has settled, otherwise a
    /// fresh page appended to the file.
    pub fn allocate(
        &mut self,
        channel: &mut dyn PageChannel,
        registry: &CursorRegistry,
    ) -> Result<u32> {
        self.settle(channel, registry)?;

        if let Some(page_no) = self.ready.pop() {
            let Self {
                index,
                deferred,
                own_registry,
                ..
            } = self;
            let mut io = FsmIo {
                channel,
                deferred,
                registry: own_registry,
            };
            let removed = index.remove_in(&mut io, UniqueByKey::min_probe(page_no as i64))?;
            ensure!(
                removed.is_some(),
                "free-space record for page {} vanished",
                page_no
            );
            trace!("reusing freed page {}", page_no);
            return Ok(page_no);
        }

        channel.allocate_page()
    }

    /// Returns a page to the free list. With cursors open the page is
    /// tombstoned until every cursor that could reference it has closed.
    pub fn free(
        &mut self,
        channel: &mut dyn PageChannel,
        registry: &CursorRegistry,
        page_no: u32,
    ) -> Result<()> {
        ensure!(page_no != 0, "cannot free the header page");

        let pinned = registry.has_open();
        let freed_at = registry.current();
        let marker = if pinned { INVALIDATED_MARKER } else { FREE_MARKER };

        let Self {
            index,
            deferred,
            own_registry,
            ..
        } = self;
        let mut io = FsmIo {
            channel,
            deferred,
            registry: own_registry,
        };
        if let Some(old) = index.insert_in(&mut io, page_no as i64, marker)? {
            bail!("page {} freed twice (marker {})", page_no, old);
        }

        if pinned {
            self.pending.push(PendingFree { page: page_no, freed_at });
            trace!("page {} tombstoned at gen {}", page_no, freed_at);
        } else {
            self.ready.push(page_no);
            trace!("page {} freed", page_no);
        }
        Ok(())
    }

    /// Settles tombstones whose pinning cursors are gone and records pages
    /// the backing tree released.
    pub fn settle(
        &mut self,
        channel: &mut dyn PageChannel,
        registry: &CursorRegistry,
    ) -> Result<()> {
        let Self {
            index,
            ready,
            pending,
            deferred,
            own_registry,
        } = self;

        let mut i = 0;
        while i < pending.len() {
            if registry.quiescent_since(pending[i].freed_at) {
                let settled = pending.swap_remove(i);
                let mut io = FsmIo {
                    channel: &mut *channel,
                    deferred: &mut *deferred,
                    registry: own_registry,
                };
                index.insert_in(&mut io, settled.page as i64, FREE_MARKER)?;
                ready.push(settled.page);
                trace!("tombstone on page {} settled", settled.page);
            } else {
                i += 1;
            }
        }

        while let Some(page_no) = deferred.pop() {
            let mut io = FsmIo {
                channel: &mut *channel,
                deferred: &mut *deferred,
                registry: own_registry,
            };
            if index.insert_in(&mut io, page_no as i64, FREE_MARKER)?.is_some() {
                bail!("page {} freed twice by the free-space index", page_no);
            }
            ready.push(page_no);
        }
        Ok(())
    }

    pub fn root_page(&self) -> u32 {
        self.index.root_page()
    }

    /// Recorded free-space entries, tombstones included.
    pub fn entry_count(&self) -> u64 {
        self.index.entry_count()
    }

    /// Pages that could be handed out if allocation happened now.
    pub fn reusable_count(&self) -> usize {
        self.ready.len()
    }

    /// Pages still held back by open cursors.
    pub fn tombstone_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemChannel;

    fn setup() -> (MemChannel, FreeSpaceManager, CursorRegistry) {
        let mut channel = MemChannel::new();
        channel.allocate_page().unwrap(); // header page
        let fsm = FreeSpaceManager::create(&mut channel).unwrap();
        (channel, fsm, CursorRegistry::new())
    }

    #[test]
    fn allocate_extends_when_nothing_is_free() {
        let (mut channel, mut fsm, registry) = setup();

        let a = fsm.allocate(&mut channel, &registry).unwrap();
        let b = fsm.allocate(&mut channel, &registry).unwrap();

        assert_ne!(a, b);
        assert_eq!(channel.page_count(), 4); // header, fsm root, a, b
    }

    #[test]
    fn freed_page_is_reused() {
        let (mut channel, mut fsm, registry) = setup();

        let page = fsm.allocate(&mut channel, &registry).unwrap();
        fsm.free(&mut channel, &registry, page).unwrap();

        assert_eq!(fsm.reusable_count(), 1);
        assert_eq!(fsm.allocate(&mut channel, &registry).unwrap(), page);
        assert_eq!(fsm.entry_count(), 0);
    }

    #[test]
    fn double_free_is_rejected() {
        let (mut channel, mut fsm, registry) = setup();

        let page = fsm.allocate(&mut channel, &registry).unwrap();
        fsm.free(&mut channel, &registry, page).unwrap();

        let result = fsm.free(&mut channel, &registry, page);

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("freed twice"));
    }

    #[test]
    fn header_page_cannot_be_freed() {
        let (mut channel, mut fsm, registry) = setup();

        assert!(fsm.free(&mut channel, &registry, 0).is_err());
    }

    #[test]
    fn free_with_open_cursor_is_tombstoned() {
        let (mut channel, mut fsm, registry) = setup();

        let page = fsm.allocate(&mut channel, &registry).unwrap();
        let gen = registry.register();
        fsm.free(&mut channel, &registry, page).unwrap();

        assert_eq!(fsm.tombstone_count(), 1);
        assert_eq!(fsm.reusable_count(), 0);

        // The pinned page must not be handed out.
        let fresh = fsm.allocate(&mut channel, &registry).unwrap();
        assert_ne!(fresh, page);

        registry.deregister(gen);
        assert_eq!(fsm.allocate(&mut channel, &registry).unwrap(), page);
    }

    #[test]
    fn cursor_opened_after_free_does_not_pin() {
        let (mut channel, mut fsm, registry) = setup();

        let page = fsm.allocate(&mut channel, &registry).unwrap();
        let older = registry.register();
        fsm.free(&mut channel, &registry, page).unwrap();
        registry.deregister(older);

        // This cursor was registered after the free; the page was already
        // unreachable from the tree it sees.
        let _newer = registry.register();

        assert_eq!(fsm.allocate(&mut channel, &registry).unwrap(), page);
    }

    #[test]
    fn state_survives_reopen() {
        let mut channel = MemChannel::new();
        channel.allocate_page().unwrap();
        let registry = CursorRegistry::new();

        let (root, count, freed) = {
            let mut fsm = FreeSpaceManager::create(&mut channel).unwrap();
            let a = fsm.allocate(&mut channel, &registry).unwrap();
            let _b = fsm.allocate(&mut channel, &registry).unwrap();
            fsm.free(&mut channel, &registry, a).unwrap();
            (fsm.root_page(), fsm.entry_count(), a)
        };

        let mut fsm = FreeSpaceManager::open(&channel, root, count).unwrap();
        assert_eq!(fsm.reusable_count(), 1);
        assert_eq!(fsm.allocate(&mut channel, &registry).unwrap(), freed);
    }

    #[test]
    fn tombstone_survives_reopen_as_reusable() {
        let mut channel = MemChannel::new();
        channel.allocate_page().unwrap();
        let registry = CursorRegistry::new();

        let (root, count, freed) = {
            let mut fsm = FreeSpaceManager::create(&mut channel).unwrap();
            let a = fsm.allocate(&mut channel, &registry).unwrap();
            let gen = registry.register();
            fsm.free(&mut channel, &registry, a).unwrap();
            registry.deregister(gen);
            // Closed without settling: the marker on disk is still -1.
            (fsm.root_page(), fsm.entry_count(), a)
        };

        let mut fsm = FreeSpaceManager::open(&channel, root, count).unwrap();
        let fresh_registry = CursorRegistry::new();
        assert_eq!(fsm.allocate(&mut channel, &fresh_registry).unwrap(), freed);
    }
}
