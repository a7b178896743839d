//! Store registry behaviour across threads and restarts.

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use resultstore::config::ResultStoreConfig;
use resultstore::query::{
    Column, DataStoreSettings, FieldIndex, QueryKey, TableSettings, Val,
};
use resultstore::registry::ResultStoreRegistry;
use resultstore::store::{DataStore, StoreError, StoreState};

fn table() -> TableSettings {
    TableSettings::new(vec![
        Column::new("feed", "${feed}").with_group(0),
        Column::new("count", "count()"),
    ])
}

fn lmdb_config(dir: &std::path::Path) -> ResultStoreConfig {
    let mut config = ResultStoreConfig::local(dir).unwrap();
    config.lmdb_map_size = 16 * 1024 * 1024;
    config.flush_interval_ms = 10;
    config
}

fn create(
    registry: &ResultStoreRegistry, query: &str, component: &str
) -> Arc<DataStore> {
    registry.get_or_create(
        &QueryKey::new(query), component, &table(),
        Arc::new(FieldIndex::new()), &DataStoreSettings::basic(),
        registry.error_consumer(),
    ).unwrap()
}

fn fill(store: &DataStore) {
    for feed in ["A", "B", "A"] {
        store.add_named([("feed", Val::from(feed))]).unwrap();
    }
    store.complete();
    assert!(store.await_completion(Duration::from_secs(30)));
}

#[test]
fn concurrent_creation_yields_one_store() {
    let registry = ResultStoreRegistry::new(
        ResultStoreConfig::memory()
    ).unwrap();
    let stores: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8).map(|_| {
            scope.spawn(|| create(&registry, "query", "table"))
        }).collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });
    assert!(stores.iter().all(|store| Arc::ptr_eq(store, &stores[0])));
    assert_eq!(registry.len(), 1);
}

#[test]
fn colliding_names_get_a_suffix() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ResultStoreRegistry::new(lmdb_config(dir.path())).unwrap();
    let first = create(&registry, "a-b", "c");
    let second = create(&registry, "a_b", "c");
    assert_eq!(first.name(), "a_b_c");
    assert_ne!(first.name(), second.name());
    assert!(second.name().starts_with("a_b_c_"));
    assert_eq!(second.name().len(), "a_b_c_".len() + 8);
    assert!(dir.path().join(first.name()).is_dir());
    assert!(dir.path().join(second.name()).is_dir());
    registry.close_all().unwrap();
}

#[test]
fn remove_closes_and_deletes() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ResultStoreRegistry::new(lmdb_config(dir.path())).unwrap();
    let one = create(&registry, "q1", "one");
    let two = create(&registry, "q1", "two");
    let other = create(&registry, "q2", "one");
    fill(&one);
    assert_eq!(registry.len(), 3);

    assert!(registry.remove(&QueryKey::new("q1"), "one").unwrap());
    assert!(!registry.remove(&QueryKey::new("q1"), "one").unwrap());
    assert_eq!(one.state(), StoreState::Closed);
    assert!(matches!(one.snapshot(), Err(StoreError::StoreClosed)));
    assert!(registry.get(&QueryKey::new("q1"), "one").is_none());

    drop(one);
    assert!(!dir.path().join("q1_one").exists());

    assert_eq!(registry.remove_query(&QueryKey::new("q1")).unwrap(), 1);
    assert_eq!(two.state(), StoreState::Closed);
    assert_eq!(other.state(), StoreState::Open);
    assert_eq!(registry.len(), 1);

    // A new store for a removed key starts empty.
    let again = create(&registry, "q1", "one");
    assert_eq!(again.stats().unwrap().rows, 0);
    registry.close_all().unwrap();
    assert!(registry.is_empty());
}

#[test]
fn retained_stores_are_cleaned_on_startup() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = lmdb_config(dir.path());
    config.retain_on_close = true;
    config.clean_on_startup = false;

    let registry = ResultStoreRegistry::new(config.clone()).unwrap();
    let store = create(&registry, "query", "table");
    fill(&store);
    drop(store);
    registry.close_all().unwrap();
    assert!(dir.path().join("query_table").is_dir());

    // Without cleaning, the leftover directory forces a new name.
    let registry = ResultStoreRegistry::new(config.clone()).unwrap();
    let store = create(&registry, "query", "table");
    assert_ne!(store.name(), "query_table");
    drop(store);
    registry.close_all().unwrap();

    config.clean_on_startup = true;
    let registry = ResultStoreRegistry::new(config).unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    let store = create(&registry, "query", "table");
    assert_eq!(store.name(), "query_table");
    registry.close_all().unwrap();
}
