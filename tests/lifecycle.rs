//! The life of a result store as seen by a search: rows stream in while
//! pages are read, then the store is sealed and finally closed.

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use resultstore::config::ResultStoreConfig;
use resultstore::query::{
    Column, DataStoreSettings, FieldIndex, QueryKey, Sort, SortDirection,
    TableSettings, Val,
};
use resultstore::registry::ResultStoreRegistry;
use resultstore::store::{Page, PageRequest, StoreError, StoreState};

const WAIT: Duration = Duration::from_secs(30);

fn table() -> TableSettings {
    TableSettings::new(vec![
        Column::new("host", "${host}").with_group(0),
        Column::new("user", "${user}").with_group(1),
        Column::new("events", "count()")
            .with_sort(Sort::new(0, SortDirection::Descending)),
        Column::new("bytes", "sum(${bytes})"),
    ])
}

fn lifecycle(config: ResultStoreConfig) {
    let registry = ResultStoreRegistry::new(config).unwrap();
    let field_index = Arc::new(
        FieldIndex::with_fields(["host", "user", "bytes"])
    );
    let store = registry.get_or_create(
        &QueryKey::random(), "table-1", &table(), field_index,
        &DataStoreSettings::basic(), registry.error_consumer(),
    ).unwrap();

    let hosts = ["alpha", "beta", "gamma"];
    let users = ["ann", "bob"];
    let writer = {
        let store = store.clone();
        thread::spawn(move || {
            for i in 0..600usize {
                store.add(vec![
                    Val::from(hosts[i % 3]),
                    Val::from(users[i % 2]),
                    Val::from((i % 7) as i64),
                ]).unwrap();
            }
            store.complete();
        })
    };

    // While rows arrive, the number of rows merged never goes down.
    let mut last = 0;
    while !store.is_complete() {
        let page = store.fetch(&PageRequest::new(0, 10)).unwrap();
        let merged = match page.totals[2] {
            Val::Long(n) => n,
            Val::Null => 0,
            ref other => panic!("unexpected total {other:?}"),
        };
        assert!(merged >= last);
        last = merged;
        thread::sleep(Duration::from_millis(1));
    }
    writer.join().unwrap();
    assert!(store.await_completion(WAIT));
    assert_eq!(store.state(), StoreState::Sealed);

    let page = store.fetch(&PageRequest::new(0, 10)).unwrap();
    assert!(page.complete);
    assert!(!page.truncated);
    assert_eq!(page.total, 3);
    assert_eq!(page.totals[2], Val::Long(600));
    assert!(page.rows.iter().all(|row| row.depth == 1 && row.has_children));
    assert_eq!(
        page.rows.iter().map(|row| row.values[2].clone()).collect::<Vec<_>>(),
        vec![Val::Long(200); 3]
    );

    // Opening one host shows its users right below it.
    let beta = page.rows.iter().find(|row| {
        row.values[0] == Val::from("beta")
    }).unwrap().group_key.clone();
    let opened = store.fetch(
        &PageRequest::new(0, 10).open(beta.clone())
    ).unwrap();
    assert_eq!(opened.total, 5);
    let pos = opened.rows.iter().position(|row| {
        row.group_key == beta
    }).unwrap();
    assert_eq!(opened.rows[pos + 1].depth, 2);
    assert_eq!(opened.rows[pos + 2].depth, 2);
    assert!(beta.item_key().contains(&opened.rows[pos + 1].group_key.item_key()));

    // Pages survive a trip through JSON.
    let json = serde_json::to_string(&opened).unwrap();
    let back: Page = serde_json::from_str(&json).unwrap();
    assert_eq!(back, opened);

    // Paging through everything visits each row exactly once.
    let all = store.fetch(&PageRequest::new(0, 100).open_all()).unwrap();
    assert_eq!(all.total, 9);
    let mut paged = Vec::new();
    for offset in (0..all.total).step_by(4) {
        let page = store.fetch(&PageRequest::new(offset, 4).open_all()).unwrap();
        assert_eq!(page.total, 9);
        paged.extend(page.rows);
    }
    assert_eq!(paged, all.rows);

    assert!(matches!(
        store.add(vec![Val::from("late")]),
        Err(StoreError::StreamClosed)
    ));

    let snapshot = store.snapshot().unwrap();
    registry.close_all().unwrap();
    assert_eq!(store.state(), StoreState::Closed);
    assert!(matches!(snapshot.stats(), Err(StoreError::StoreClosed)));
    assert!(matches!(
        store.fetch(&PageRequest::new(0, 1)),
        Err(StoreError::StoreClosed)
    ));
}

#[test]
fn lifecycle_in_memory() {
    let mut config = ResultStoreConfig::memory();
    config.flush_interval_ms = 5;
    lifecycle(config);
}

#[test]
fn lifecycle_in_lmdb() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ResultStoreConfig::local(dir.path()).unwrap();
    config.lmdb_map_size = 32 * 1024 * 1024;
    config.flush_interval_ms = 5;
    lifecycle(config);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
