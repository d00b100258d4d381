//! # Cursor Registry
//!
//! Every open cursor on a store registers here and receives a generation
//! stamp from a store-wide counter. The same counter stamps page writes, so
//! "who can see what" reduces to integer comparisons:
//!
//! - A page stamped `s` is part of the snapshot of every cursor whose
//!   generation `g` satisfies `s < g`. Mutating such a page in place would
//!   change what the cursor sees, so the tree clones it first.
//! - A page freed while the counter stood at `f` may be referenced by any
//!   cursor with `g <= f`. The free-space manager holds the page back until
//!   no such cursor remains registered.
//!
//! The registry is shared: cursors clone the handle so they can deregister
//! on close or drop without borrowing the store. All state sits behind a
//! `parking_lot` mutex; the sections are a few set operations each.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct RegistryState {
    counter: u64,
    open: BTreeSet<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct CursorRegistry {
    inner: Arc<Mutex<RegistryState>>,
}

impl CursorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new cursor and returns its generation.
    pub fn register(&self) -> u64 {
        let mut state = self.inner.lock();
        state.counter += 1;
        let gen = state.counter;
        state.open.insert(gen);
        gen
    }

    /// Deregisters a cursor. Unknown generations are ignored, which makes
    /// close followed by drop harmless.
    pub fn deregister(&self, gen: u64) {
        self.inner.lock().open.remove(&gen);
    }

    /// Draws a fresh stamp for a page write. Strictly greater than every
    /// generation issued so far.
    pub fn write_stamp(&self) -> u64 {
        let mut state = self.inner.lock();
        state.counter += 1;
        state.counter
    }

    /// Current counter value, without advancing it. Used to tag frees.
    pub fn current(&self) -> u64 {
        self.inner.lock().counter
    }

    pub fn open_cursors(&self) -> usize {
        self.inner.lock().open.len()
    }

    pub fn has_open(&self) -> bool {
        !self.inner.lock().open.is_empty()
    }

    /// Generation of the most recently registered cursor still open.
    pub fn newest_open(&self) -> Option<u64> {
        self.inner.lock().open.iter().next_back().copied()
    }

    /// True when no cursor registered at or before `gen` remains open.
    pub fn quiescent_since(&self, gen: u64) -> bool {
        match self.inner.lock().open.iter().next() {
            None => true,
            Some(&oldest) => oldest > gen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generations_are_unique_and_increasing() {
        let registry = CursorRegistry::new();

        let a = registry.register();
        let b = registry.register();
        let stamp = registry.write_stamp();
        let c = registry.register();

        assert!(a < b);
        assert!(b < stamp);
        assert!(stamp < c);
    }

    #[test]
    fn open_count_tracks_register_and_deregister() {
        let registry = CursorRegistry::new();
        assert!(!registry.has_open());

        let a = registry.register();
        let b = registry.register();
        assert_eq!(registry.open_cursors(), 2);

        registry.deregister(a);
        assert_eq!(registry.open_cursors(), 1);

        registry.deregister(b);
        assert!(!registry.has_open());
    }

    #[test]
    fn deregister_is_idempotent() {
        let registry = CursorRegistry::new();
        let gen = registry.register();

        registry.deregister(gen);
        registry.deregister(gen);

        assert!(!registry.has_open());
    }

    #[test]
    fn newest_open_sees_latest_survivor() {
        let registry = CursorRegistry::new();
        let a = registry.register();
        let b = registry.register();

        assert_eq!(registry.newest_open(), Some(b));

        registry.deregister(b);
        assert_eq!(registry.newest_open(), Some(a));
    }

    #[test]
    fn quiescence_follows_oldest_open_cursor() {
        let registry = CursorRegistry::new();
        let a = registry.register();
        let freed_at = registry.current();
        let b = registry.register();

        assert!(!registry.quiescent_since(freed_at));

        registry.deregister(a);
        // b was registered after the free, so it cannot reference the page.
        assert!(registry.quiescent_since(freed_at));

        registry.deregister(b);
        assert!(registry.quiescent_since(freed_at));
    }

    #[test]
    fn clones_share_state() {
        let registry = CursorRegistry::new();
        let handle = registry.clone();

        let gen = registry.register();
        assert!(handle.has_open());

        handle.deregister(gen);
        assert!(!registry.has_open());
    }
}
