//! # Index Engine
//!
//! One B+tree engine, three users: attribute indexes created by callers,
//! the store's OID index, and the free-space manager's page bookkeeping.
//! See [`tree`] for the engine itself, [`cursor`] for snapshot iteration.

pub mod cursor;
pub mod entry;
mod inner;
mod leaf;
pub mod oid;
mod registry;
pub mod tree;

pub use cursor::EntryCursor;
pub use entry::{ByKeyValue, KeyOrder, LLEntry, UniqueByKey};
pub use oid::{ObjectLocation, OidIndex};
pub use registry::CursorRegistry;
pub use tree::{IndexPageStats, PagedIndex, MAX_TREE_DEPTH};
