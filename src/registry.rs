//! The registry of all result stores of a process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use log::{debug, info};
use url::Url;
use crate::config::ResultStoreConfig;
use crate::query::{
    CollectingErrorConsumer, DataStoreSettings, ErrorConsumer, FieldIndex,
    QueryKey, StoreMode, TableSettings,
};
use crate::store::backends::BackendSystem;
use crate::store::{DataStore, StoreError};


//------------ StoreKey ------------------------------------------------------

/// The identity of a store in the registry.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StoreKey {
    pub query_key: QueryKey,
    pub component_id: String,
}

impl StoreKey {
    pub fn new(query_key: QueryKey, component_id: impl Into<String>) -> Self {
        StoreKey { query_key, component_id: component_id.into() }
    }

    /// Returns the directory name for the store.
    ///
    /// All characters other than ASCII letters and digits are replaced by
    /// an underscore.
    pub fn dir_name(&self) -> String {
        format!("{}_{}", self.query_key, self.component_id).chars().map(|ch| {
            if ch.is_ascii_alphanumeric() { ch } else { '_' }
        }).collect()
    }
}


//------------ ResultStoreRegistry -------------------------------------------

/// Creates, hands out and disposes of result stores.
///
/// There is at most one store for each pair of query key and component id.
/// Stores stay in the registry until they are removed explicitly.
#[derive(Debug)]
pub struct ResultStoreRegistry {
    config: ResultStoreConfig,
    storage_uri: Url,
    system: BackendSystem,
    stores: Mutex<HashMap<StoreKey, Arc<DataStore>>>,
}

impl ResultStoreRegistry {
    /// Creates a new registry.
    ///
    /// Unless disabled in the config, all leftover stores below the
    /// storage URI are deleted.
    pub fn new(config: ResultStoreConfig) -> Result<Self, StoreError> {
        config.verify()?;
        let storage_uri = config.storage_uri()?;
        let system = BackendSystem::new(config.lmdb_settings());
        system.check_uri(&storage_uri)?;
        if config.clean_on_startup {
            let removed = system.clean(&storage_uri)?;
            if !removed.is_empty() {
                info!(
                    "Removed {} leftover result stores from {}",
                    removed.len(), storage_uri
                );
            }
        }
        info!("Result stores are kept in {storage_uri}");
        Ok(ResultStoreRegistry {
            config,
            storage_uri,
            system,
            stores: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &ResultStoreConfig {
        &self.config
    }

    pub fn storage_uri(&self) -> &Url {
        &self.storage_uri
    }

    fn stores(&self) -> MutexGuard<'_, HashMap<StoreKey, Arc<DataStore>>> {
        self.stores.lock().expect("poisoned lock")
    }

    /// Returns a new error consumer with the configured capacity.
    pub fn error_consumer(&self) -> Arc<CollectingErrorConsumer> {
        Arc::new(CollectingErrorConsumer::new(self.config.max_error_messages))
    }

    /// Returns the store for a query component, creating it if necessary.
    ///
    /// If the store exists already, it is returned and all the other
    /// arguments are ignored.
    pub fn get_or_create(
        &self,
        query_key: &QueryKey,
        component_id: &str,
        table: &TableSettings,
        field_index: Arc<FieldIndex>,
        settings: &DataStoreSettings,
        errors: Arc<dyn ErrorConsumer>,
    ) -> Result<Arc<DataStore>, StoreError> {
        let key = StoreKey::new(query_key.clone(), component_id);
        let mut stores = self.stores();
        if let Some(store) = stores.get(&key) {
            return Ok(store.clone())
        }

        let name = self.unique_name(&key, &stores)?;
        let settings = self.effective_settings(settings)?;
        let backend = self.system.open(&self.storage_uri, &name)?;
        let store = Arc::new(DataStore::new(
            key.query_key.clone(),
            key.component_id.clone(),
            name,
            backend,
            table.clone(),
            field_index,
            settings,
            &self.config,
            errors,
        )?);
        stores.insert(key, store.clone());
        Ok(store)
    }

    /// Picks a directory name not used by any other store.
    fn unique_name(
        &self,
        key: &StoreKey,
        stores: &HashMap<StoreKey, Arc<DataStore>>,
    ) -> Result<String, StoreError> {
        let mut name = key.dir_name();
        while stores.values().any(|store| store.name() == name)
            || self.system.exists(&self.storage_uri, &name)?
        {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            name = format!("{}_{}", key.dir_name(), &suffix[..8]);
            debug!(
                "Store name for {} {} collides, using {}",
                key.query_key, key.component_id, name
            );
        }
        Ok(name)
    }

    /// Applies the configured defaults to store settings.
    fn effective_settings(
        &self, settings: &DataStoreSettings
    ) -> Result<DataStoreSettings, StoreError> {
        let mut res = settings.clone();
        if res.mode == StoreMode::Interactive {
            res.max_results = res.max_results.min(
                &self.config.default_max_results()?
            );
        }
        if res.store_size.is_unlimited() {
            res.store_size = self.config.default_store_size()?;
        }
        Ok(res)
    }

    /// Returns the store for a query component if it exists.
    pub fn get(
        &self, query_key: &QueryKey, component_id: &str
    ) -> Option<Arc<DataStore>> {
        self.stores().get(
            &StoreKey::new(query_key.clone(), component_id)
        ).cloned()
    }

    /// Removes and closes the store of a query component.
    ///
    /// Returns whether there was such a store.
    pub fn remove(
        &self, query_key: &QueryKey, component_id: &str
    ) -> Result<bool, StoreError> {
        let store = self.stores().remove(
            &StoreKey::new(query_key.clone(), component_id)
        );
        match store {
            Some(store) => {
                store.close()?;
                Ok(true)
            }
            None => Ok(false)
        }
    }

    /// Removes and closes all stores of a query.
    ///
    /// Returns the number of stores removed.
    pub fn remove_query(
        &self, query_key: &QueryKey
    ) -> Result<usize, StoreError> {
        let removed: Vec<_> = {
            let mut stores = self.stores();
            let keys: Vec<_> = stores.keys().filter(|key| {
                key.query_key == *query_key
            }).cloned().collect();
            keys.into_iter().filter_map(|key| stores.remove(&key)).collect()
        };
        close_stores(&removed)?;
        Ok(removed.len())
    }

    /// Removes and closes all stores.
    pub fn close_all(&self) -> Result<(), StoreError> {
        let removed: Vec<_> = self.stores().drain().map(|(_, store)| {
            store
        }).collect();
        close_stores(&removed)
    }

    /// Returns the keys of all stores.
    pub fn keys(&self) -> Vec<StoreKey> {
        let mut res: Vec<_> = self.stores().keys().cloned().collect();
        res.sort();
        res
    }

    pub fn len(&self) -> usize {
        self.stores().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores().is_empty()
    }
}

/// Closes all the stores, returning the first error.
fn close_stores(stores: &[Arc<DataStore>]) -> Result<(), StoreError> {
    let mut res = Ok(());
    for store in stores {
        if let Err(err) = store.close() {
            if res.is_ok() {
                res = Err(err)
            }
        }
    }
    res
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_names() {
        assert_eq!(
            StoreKey::new(QueryKey::new("q-1"), "table.one").dir_name(),
            "q_1_table_one"
        );
        assert_eq!(
            StoreKey::new(QueryKey::new("abc"), "XYZ9").dir_name(),
            "abc_XYZ9"
        );
    }

    #[test]
    fn settings_defaults() {
        let mut config = ResultStoreConfig::memory();
        config.default_store_size = "50".into();
        let registry = ResultStoreRegistry::new(config).unwrap();

        let basic = registry.effective_settings(
            &DataStoreSettings::basic()
        ).unwrap();
        assert_eq!(basic.max_results.size(0), 1_000_000);
        assert_eq!(basic.max_results.size(3), 1);
        assert_eq!(basic.store_size.size(0), 50);

        let analytic = registry.effective_settings(
            &DataStoreSettings::analytic()
        ).unwrap();
        assert!(analytic.max_results.is_unlimited());
    }
}
