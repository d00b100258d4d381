//! # On-Disk Persistence Test Suite
//!
//! Create/populate/flush/reopen cycles through `FileChannel`:
//!
//! 1. **Header**: store state survives a reopen from disk
//! 2. **Indexes**: attribute index contents round-trip through the file
//! 3. **OIDs**: object locations and the OID high-water mark persist
//! 4. **Free space**: reclaimed pages stay reclaimable across reopens
//!
//! ## Usage
//!
//! ```sh
//! cargo test --test store_persistence -- --nocapture
//! ```

use std::path::Path;

use tempfile::tempdir;

use objstore::{FileChannel, ObjectLocation, PagedIndex, Store, UniqueByKey};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn create_store(path: &Path) -> Store {
    let channel = FileChannel::create(path).expect("Failed to create store file");
    Store::create(Box::new(channel)).expect("Failed to create store")
}

fn open_store(path: &Path) -> Store {
    let channel = FileChannel::open(path).expect("Failed to open store file");
    Store::open(Box::new(channel)).expect("Failed to open store")
}

// ============================================================================
// HEADER AND OID PERSISTENCE
// ============================================================================

#[test]
fn empty_store_reopens_cleanly() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("objects.db");

    {
        let mut store = create_store(&path);
        store.flush().unwrap();
    }

    let store = open_store(&path);
    assert_eq!(store.oid_count(), 0);
    assert_eq!(store.max_oid(), 0);
}

#[test]
fn oid_locations_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("objects.db");

    {
        let mut store = create_store(&path);
        for oid in 1..=500 {
            let location = ObjectLocation::new(oid as u32 + 10, (oid as u32) * 16);
            store.add_oid(oid, location).unwrap();
        }
        store.remove_oid(250).unwrap();
        store.flush().unwrap();
    }

    let store = open_store(&path);
    assert_eq!(store.oid_count(), 499);
    assert_eq!(store.max_oid(), 500);
    assert_eq!(store.find_oid(250).unwrap(), None);
    assert_eq!(
        store.find_oid(123).unwrap(),
        Some(ObjectLocation::new(133, 1968))
    );

    let mut cursor = store.oid_cursor().unwrap();
    let mut count = 0;
    let mut last_oid = 0;
    while let Some(entry) = cursor.next(&store).unwrap() {
        assert!(entry.key > last_oid);
        last_oid = entry.key;
        count += 1;
    }
    assert_eq!(count, 499);
}

#[test]
fn max_oid_high_water_mark_survives_full_removal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("objects.db");

    {
        let mut store = create_store(&path);
        store.add_oid(9000, ObjectLocation::new(5, 0)).unwrap();
        store.remove_oid(9000).unwrap();
        store.flush().unwrap();
    }

    let store = open_store(&path);
    assert_eq!(store.oid_count(), 0);
    assert_eq!(store.max_oid(), 9000);
}

// ============================================================================
// INDEX PERSISTENCE
// ============================================================================

#[test]
fn attribute_index_round_trips_through_the_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("objects.db");

    let (root, count) = {
        let mut store = create_store(&path);
        let mut index: PagedIndex<UniqueByKey> = store.create_index().unwrap();
        for key in 0..3000 {
            index.insert(&mut store, key, key * 7).unwrap();
        }
        store.flush().unwrap();
        (index.root_page(), index.entry_count())
    };

    let store = open_store(&path);
    let index: PagedIndex<UniqueByKey> = store.open_index(root, count).unwrap();

    assert_eq!(index.entry_count(), 3000);
    for key in [0, 1, 1499, 2998, 2999] {
        assert_eq!(index.find(&store, key).unwrap(), Some(key * 7));
    }
    assert_eq!(index.find(&store, 3000).unwrap(), None);

    let mut cursor = index.cursor(&store).unwrap();
    let mut expected = 0;
    while let Some(entry) = cursor.next(&store).unwrap() {
        assert_eq!(entry.key, expected);
        expected += 1;
    }
    assert_eq!(expected, 3000);
}

#[test]
fn open_index_rejects_a_non_index_page() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("objects.db");

    let mut store = create_store(&path);
    let data_page = store.allocate_data_page().unwrap();

    let result = store.open_index::<UniqueByKey>(data_page, 0);

    assert!(result.is_err());
}

// ============================================================================
// FREE SPACE PERSISTENCE
// ============================================================================

#[test]
fn reclaimed_pages_stay_reclaimable_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("objects.db");

    let (freed_pages, file_pages) = {
        let mut store = create_store(&path);
        let pages: Vec<u32> = (0..8)
            .map(|_| store.allocate_data_page().unwrap())
            .collect();
        for &page in &pages {
            store.free_page(page).unwrap();
        }
        store.flush().unwrap();
        (pages.len(), store.page_count())
    };

    let mut store = open_store(&path);
    assert_eq!(store.reusable_pages(), freed_pages);

    // Every allocation is served from the free list, the file stays put.
    for _ in 0..freed_pages {
        store.allocate_data_page().unwrap();
    }
    assert_eq!(store.page_count(), file_pages);
    assert_eq!(store.reusable_pages(), 0);
}

#[test]
fn pages_tombstoned_at_close_settle_on_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("objects.db");

    {
        let mut store = create_store(&path);
        let index = {
            let mut index: PagedIndex<UniqueByKey> = store.create_index().unwrap();
            for key in 0..100 {
                index.insert(&mut store, key, key).unwrap();
            }
            index
        };

        // Free tree pages while a cursor still pins them, then close the
        // store without settling the tombstones.
        let _pinned = index.cursor(&store).unwrap();
        store.drop_index(index).unwrap();
        store.flush().unwrap();
    }

    // No cursor from the dead process can pin anything anymore.
    let store = open_store(&path);
    assert!(store.reusable_pages() > 0);
}
