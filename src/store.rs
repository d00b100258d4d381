//! # Store
//!
//! A `Store` is one open store file: a page channel, the free-space
//! manager, the OID index and the cursor registry, glued together so index
//! trees can allocate, free and stamp pages without knowing about each
//! other.
//!
//! ## Ownership
//!
//! The store owns what the file header roots: the free-space index and the
//! OID index. Attribute indexes are created through the store but owned by
//! the caller, who is also responsible for persisting their root page and
//! entry count wherever its schema lives; roots move as trees grow, shrink
//! and copy-on-write, so re-read `root_page()` after mutations before
//! persisting.
//!
//! ## Mutation and Borrowing
//!
//! Index mutation needs the channel, the free-space manager and the
//! registry at once. [`StoreIo`] borrows those three fields and implements
//! the tree engine's I/O trait; `Store` hands one out internally for every
//! mutating call. Lookups and cursors need only page reads and take the
//! store by shared reference.
//!
//! ## Durability
//!
//! `flush` settles the free-space manager, rewrites the header on page 0
//! and syncs the channel. Nothing else writes the header, so a crash
//! between flushes loses at most free-space settlement, never index
//! structure already synced.

use eyre::{ensure, Result};
use log::{debug, info};

use crate::fsm::FreeSpaceManager;
use crate::index::cursor::EntryCursor;
use crate::index::entry::{KeyOrder, UniqueByKey};
use crate::index::tree::{PageRead, PagedIndex, TreeIo};
use crate::index::{CursorRegistry, ObjectLocation, OidIndex};
use crate::storage::{
    ChannelStats, PageBuf, PageChannel, PageHeader, PageKinds, PageType, StoreHeader, PAGE_SIZE,
};

/// What a cursor handle does after `close`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClosedHandlePolicy {
    /// A closed cursor reports no entries.
    #[default]
    ReturnEmpty,
    /// Accessing a closed cursor is an error.
    Fail,
}

/// Borrow of the store fields a tree mutation needs.
pub(crate) struct StoreIo<'a> {
    channel: &'a mut dyn PageChannel,
    fsm: &'a mut FreeSpaceManager,
    registry: &'a CursorRegistry,
}

impl PageRead for StoreIo<'_> {
    fn read(&self, page_no: u32, buf: &mut PageBuf) -> Result<()> {
        self.channel.read_page(page_no, buf)
    }
}

impl TreeIo for StoreIo<'_> {
    fn write(&mut self, page_no: u32, buf: &PageBuf) -> Result<()> {
        self.channel.write_page(page_no, buf)
    }

    fn allocate(&mut self) -> Result<u32> {
        self.fsm.allocate(&mut *self.channel, self.registry)
    }

    fn free(&mut self, page_no: u32) -> Result<()> {
        self.fsm.free(&mut *self.channel, self.registry, page_no)
    }

    fn registry(&self) -> &CursorRegistry {
        self.registry
    }
}

pub struct Store {
    channel: Box<dyn PageChannel>,
    fsm: FreeSpaceManager,
    registry: CursorRegistry,
    policy: ClosedHandlePolicy,
    oid: OidIndex,
}

impl PageRead for Store {
    fn read(&self, page_no: u32, buf: &mut PageBuf) -> Result<()> {
        self.channel.read_page(page_no, buf)
    }
}

impl Store {
    /// Initializes a store on an empty channel.
    pub fn create(channel: Box<dyn PageChannel>) -> Result<Self> {
        Self::create_with_policy(channel, ClosedHandlePolicy::default())
    }

    pub fn create_with_policy(
        mut channel: Box<dyn PageChannel>,
        policy: ClosedHandlePolicy,
    ) -> Result<Self> {
        ensure!(
            channel.page_count() == 0,
            "cannot create a store over a channel that already has {} pages",
            channel.page_count()
        );

        let header_page = channel.allocate_page()?;
        ensure!(header_page == 0, "header page must be page 0");

        let registry = CursorRegistry::new();
        let mut fsm = FreeSpaceManager::create(channel.as_mut())?;
        let oid = {
            let mut io = StoreIo {
                channel: channel.as_mut(),
                fsm: &mut fsm,
                registry: &registry,
            };
            OidIndex::create_in(&mut io)?
        };

        let mut store = Self {
            channel,
            fsm,
            registry,
            policy,
            oid,
        };
        store.flush()?;
        info!(
            "created store: fsm root {}, oid root {}",
            store.fsm.root_page(),
            store.oid.root_page()
        );
        Ok(store)
    }

    /// Opens a store from an existing channel, validating the header.
    pub fn open(channel: Box<dyn PageChannel>) -> Result<Self> {
        ensure!(channel.page_count() > 0, "store has no header page");

        let mut page = [0u8; PAGE_SIZE];
        channel.read_page(0, &mut page)?;
        let header = StoreHeader::from_bytes(&page)?;
        header.validate()?;

        let fsm =
            FreeSpaceManager::open(channel.as_ref(), header.fsm_root(), header.fsm_entry_count())?;
        let oid = OidIndex::open(header.oid_root(), header.oid_entry_count(), header.max_oid());
        let policy = if header.fail_on_closed() {
            ClosedHandlePolicy::Fail
        } else {
            ClosedHandlePolicy::ReturnEmpty
        };

        info!(
            "opened store: {} pages, {} objects, max oid {}",
            channel.page_count(),
            oid.entry_count(),
            oid.max_oid()
        );

        Ok(Self {
            channel,
            fsm,
            registry: CursorRegistry::new(),
            policy,
            oid,
        })
    }

    /// Settles free space, rewrites the header and syncs the channel.
    pub fn flush(&mut self) -> Result<()> {
        let Self {
            channel,
            fsm,
            registry,
            policy,
            oid,
        } = self;
        fsm.settle(channel.as_mut(), registry)?;

        let mut page = [0u8; PAGE_SIZE];
        let mut header = StoreHeader::new();
        header.set_fsm_root(fsm.root_page());
        header.set_fsm_entry_count(fsm.entry_count());
        header.set_oid_root(oid.root_page());
        header.set_oid_entry_count(oid.entry_count());
        header.set_max_oid(oid.max_oid());
        header.set_fail_on_closed(*policy == ClosedHandlePolicy::Fail);
        header.write_to(&mut page)?;

        channel.write_page(0, &page)?;
        channel.flush()?;
        debug!("flushed store header");
        Ok(())
    }

    /// Flushes and hands the channel back, closing the store.
    pub fn close(mut self) -> Result<Box<dyn PageChannel>> {
        self.flush()?;
        Ok(self.channel)
    }

    pub(crate) fn tree_io(&mut self) -> StoreIo<'_> {
        StoreIo {
            channel: self.channel.as_mut(),
            fsm: &mut self.fsm,
            registry: &self.registry,
        }
    }

    pub(crate) fn registry(&self) -> &CursorRegistry {
        &self.registry
    }

    pub fn closed_handle_policy(&self) -> ClosedHandlePolicy {
        self.policy
    }

    /// Applies to cursors opened from now on; persisted at the next flush.
    pub fn set_closed_handle_policy(&mut self, policy: ClosedHandlePolicy) {
        self.policy = policy;
    }

    pub fn open_cursors(&self) -> usize {
        self.registry.open_cursors()
    }

    pub fn page_count(&self) -> u32 {
        self.channel.page_count()
    }

    pub fn channel_stats(&self) -> ChannelStats {
        self.channel.stats()
    }

    /// Pages the free-space manager could hand out right now.
    pub fn reusable_pages(&self) -> usize {
        self.fsm.reusable_count()
    }

    // ---- attribute indexes ----

    /// Creates an empty index. The caller owns it and must persist its
    /// root page and entry count itself.
    pub fn create_index<O: KeyOrder>(&mut self) -> Result<PagedIndex<O>> {
        let mut io = self.tree_io();
        PagedIndex::create_in(&mut io, PageKinds::index())
    }

    /// Reattaches an index from a persisted root and entry count.
    pub fn open_index<O: KeyOrder>(&self, root_page: u32, entry_count: u64) -> Result<PagedIndex<O>> {
        let mut buf = [0u8; PAGE_SIZE];
        self.read(root_page, &mut buf)?;
        let kind = PageHeader::from_bytes(&buf)?.page_type();
        ensure!(
            kind == PageType::IndexLeaf || kind == PageType::IndexInner,
            "page {} has kind {:?}, not an index root",
            root_page,
            kind
        );
        Ok(PagedIndex::open(root_page, entry_count, PageKinds::index()))
    }

    /// Frees every page of an index, consuming it.
    pub fn drop_index<O: KeyOrder>(&mut self, index: PagedIndex<O>) -> Result<()> {
        let pages = index.collect_pages_in(&*self)?;
        let mut io = self.tree_io();
        for page_no in pages {
            io.free(page_no)?;
        }
        debug!("dropped index rooted at {}", index.root_page());
        Ok(())
    }

    // ---- OID index ----

    /// Records where an object lives. Returns the previous location when
    /// the OID was already mapped.
    pub fn add_oid(&mut self, oid: i64, location: ObjectLocation) -> Result<Option<ObjectLocation>> {
        let Self {
            channel,
            fsm,
            registry,
            oid: oid_index,
            ..
        } = self;
        let mut io = StoreIo {
            channel: channel.as_mut(),
            fsm,
            registry,
        };
        oid_index.add_in(&mut io, oid, location)
    }

    pub fn find_oid(&self, oid: i64) -> Result<Option<ObjectLocation>> {
        self.oid.find_in(self, oid)
    }

    pub fn remove_oid(&mut self, oid: i64) -> Result<Option<ObjectLocation>> {
        let Self {
            channel,
            fsm,
            registry,
            oid: oid_index,
            ..
        } = self;
        let mut io = StoreIo {
            channel: channel.as_mut(),
            fsm,
            registry,
        };
        oid_index.remove_in(&mut io, oid)
    }

    /// Highest OID ever stored; never reissued.
    pub fn max_oid(&self) -> i64 {
        self.oid.max_oid()
    }

    pub fn oid_count(&self) -> u64 {
        self.oid.entry_count()
    }

    /// Ascending cursor over all (oid, packed location) entries.
    pub fn oid_cursor(&self) -> Result<EntryCursor<UniqueByKey>> {
        self.oid.tree().cursor(self)
    }

    // ---- data pages ----

    /// Allocates a page for object data and stamps its header.
    pub fn allocate_data_page(&mut self) -> Result<u32> {
        let Self {
            channel,
            fsm,
            registry,
            ..
        } = self;
        let page_no = fsm.allocate(channel.as_mut(), registry)?;

        let mut buf = [0u8; PAGE_SIZE];
        PageHeader::new(PageType::Data).write_to(&mut buf)?;
        channel.write_page(page_no, &buf)?;
        Ok(page_no)
    }

    /// Returns a page to the free list.
    pub fn free_page(&mut self, page_no: u32) -> Result<()> {
        let Self {
            channel,
            fsm,
            registry,
            ..
        } = self;
        fsm.free(channel.as_mut(), registry, page_no)
    }

    pub fn read_page(&self, page_no: u32, buf: &mut PageBuf) -> Result<()> {
        self.channel.read_page(page_no, buf)
    }

    pub fn write_page(&mut self, page_no: u32, buf: &PageBuf) -> Result<()> {
        ensure!(page_no != 0, "page 0 belongs to the store header");
        self.channel.write_page(page_no, buf)
    }
}
