use std::sync::Arc;
use std::thread;

use cellbridge_cache::{CacheConfig, ObjectCache, WorkbookScoped};
use cellbridge_common::CallerAddress;

#[test]
fn concurrent_inserts_into_distinct_cells() {
    let cache: Arc<ObjectCache<String>> = Arc::new(ObjectCache::new(CacheConfig {
        uniquifier: 'X',
        reverse_lookup: true,
    }));

    let handles: Vec<_> = (1..=8u32)
        .map(|row| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                let caller = CallerAddress::new("Book1", "Sheet1", &format!("A{row}"));
                (0..50)
                    .map(|i| {
                        let (handle, id) = cache.insert_with_id(format!("{row}:{i}"), &caller);
                        assert_eq!(cache.find_key(id).as_deref(), Some(handle.as_str()));
                        handle
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for (row, worker) in (1..=8u32).zip(handles) {
        let minted = worker.join().expect("worker thread");
        assert_eq!(minted.len(), 50);
        assert_eq!(minted[0], format!("X[Book1]Sheet1!A{row}"));
        assert_eq!(minted[49], format!("X[Book1]Sheet1!A{row},49"));
        assert_eq!(cache.fetch(&minted[7]), Some(format!("{row}:7")));
    }
    assert_eq!(cache.len(), 400);
    assert_eq!(cache.keys().len(), 400);
    assert_eq!(cache.close_workbook("Book1"), 400);
    assert!(cache.is_empty());
}

#[test]
fn readers_race_with_recalculation() {
    let cache: Arc<ObjectCache<u64>> = Arc::new(ObjectCache::new(CacheConfig::with_uniquifier('X')));
    let caller = CallerAddress::new("Book1", "Sheet1", "B2");
    let handle = cache.insert(0, &caller);

    let writer = {
        let cache = Arc::clone(&cache);
        let caller = caller.clone();
        thread::spawn(move || {
            for i in 1..=200u64 {
                cache.expire();
                cache.insert(i, &caller);
            }
        })
    };
    let reader = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
            let mut last = 0;
            for _ in 0..2000 {
                if let Some(v) = cache.fetch(&handle) {
                    // The slot only ever moves forward
                    assert!(v >= last);
                    last = v;
                }
            }
        })
    };
    writer.join().expect("writer");
    reader.join().expect("reader");
    assert_eq!(cache.fetch("X[Book1]Sheet1!B2"), Some(200));
    assert_eq!(cache.len(), 1);
}
