//! # ObjStore - Embedded Object-Database Storage Core
//!
//! ObjStore is the paged storage core of an embedded object database: B+tree
//! indexes with copy-on-write snapshot cursors, an object-location index, a
//! self-hosting free-space manager and a query advisory optimizer, all over
//! a pluggable 4KB page channel. This implementation prioritizes:
//!
//! - **Snapshot-stable iteration**: cursors see the tree as of their open,
//!   mutations clone pinned pages instead of blocking
//! - **Bounded write amplification**: a stable insert dirties one page, a
//!   split dirties three
//! - **Single-writer simplicity**: one mutator, any number of cursors, no
//!   lock manager
//!
//! ## Quick Start
//!
//! ```ignore
//! use objstore::{FileChannel, Store};
//!
//! let channel = FileChannel::create("./objects.db")?;
//! let mut store = Store::create(Box::new(channel))?;
//!
//! let mut index = store.create_index::<objstore::UniqueByKey>()?;
//! index.insert(&mut store, 42, 1042)?;
//!
//! let mut cursor = index.cursor(&store)?;
//! while let Some(entry) = cursor.next(&store)? {
//!     println!("{} -> {}", entry.key, entry.value);
//! }
//! store.flush()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │        Store (header, OIDs)          │
//! ├──────────────────┬──────────────────┤
//! │  PagedIndex /    │  Query Advisory  │
//! │  EntryCursor     │  Optimizer       │
//! ├──────────────────┴──────────────────┤
//! │   Free-Space Manager (self-hosted)   │
//! ├─────────────────────────────────────┤
//! │  Page Channel (mmap file / memory)   │
//! └─────────────────────────────────────┘
//! ```
//!
//! All page kinds share one page-number space; every page is tagged so a
//! traversal can detect a pointer into the wrong structure instead of
//! misreading it.

pub mod fsm;
pub mod index;
pub mod query;
pub mod storage;
pub mod store;

pub use fsm::FreeSpaceManager;
pub use index::{
    ByKeyValue, EntryCursor, KeyOrder, LLEntry, ObjectLocation, OidIndex, PagedIndex, UniqueByKey,
};
pub use query::{
    determine_index_to_use, CompOp, FieldIndexes, IndexHandle, QueryAdvice, QueryNode, QueryValue,
};
pub use storage::{ChannelStats, FileChannel, MemChannel, PageChannel, PAGE_SIZE};
pub use store::{ClosedHandlePolicy, Store};
