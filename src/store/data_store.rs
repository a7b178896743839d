//! A single result store.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use log::{error, info, warn};
use crate::config::ResultStoreConfig;
use crate::query::{
    DataStoreSettings, ErrorConsumer, FieldIndex, QueryKey, StoreMode,
    TableSettings, Val,
};
use crate::query::field_index::DEFAULT_EVENT_ID_FIELD;
use crate::query::field_index::DEFAULT_STREAM_ID_FIELD;
use super::backends::Backend;
use super::error::StoreError;
use super::ingest::RowSource;
use super::item::StoreStats;
use super::key::KeyBuilder;
use super::pager::{Layout, Page, PageRequest, Snapshot};
use super::state::{Shared, StoreState};
use super::writer::{FlushPolicy, Limits, Writer};


//------------ DataStore -----------------------------------------------------

/// A store aggregating the rows of one search component.
///
/// Rows are added by any number of producer threads and merged by a
/// single writer thread. Any number of readers can take snapshots and
/// fetch pages concurrently with the writer.
///
/// The store starts out open. It becomes sealed once the row stream has
/// been completed and everything has been merged, or when it is sealed
/// explicitly. Closing it releases and, unless configured otherwise,
/// deletes its data. A store that is dropped is closed.
pub struct DataStore {
    query_key: QueryKey,
    component_id: String,
    name: String,

    table: TableSettings,
    settings: DataStoreSettings,
    layout: Arc<Layout>,

    shared: Arc<Shared>,
    source: RowSource,
    backend: Mutex<Option<Arc<Backend>>>,
    writer: Mutex<Option<JoinHandle<()>>>,

    retain_on_close: bool,
}

impl DataStore {
    /// Creates a store and starts its writer.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        query_key: QueryKey,
        component_id: String,
        name: String,
        backend: Backend,
        table: TableSettings,
        field_index: Arc<FieldIndex>,
        settings: DataStoreSettings,
        config: &ResultStoreConfig,
        errors: Arc<dyn ErrorConsumer>,
    ) -> Result<Self, StoreError> {
        let latest_event = settings.store_latest_event_reference;
        if latest_event {
            if field_index.stream_id_field_pos().is_none() {
                field_index.create(DEFAULT_STREAM_ID_FIELD);
            }
            if field_index.event_id_field_pos().is_none() {
                field_index.create(DEFAULT_EVENT_ID_FIELD);
            }
        }
        let builder = match KeyBuilder::new(&table, &field_index, latest_event) {
            Ok(builder) => builder,
            Err(err) => {
                if let Err(err) = backend.destroy() {
                    warn!("Cannot remove result store {name}: {err}");
                }
                return Err(err.into())
            }
        };
        let layout = Arc::new(
            Layout::new(&table, &settings, builder.aggregates())
        );
        let shared = Arc::new(Shared::new(name.clone(), errors));
        let backend = Arc::new(backend);

        let writer = Writer::new(
            backend.clone(),
            builder,
            Limits {
                max_keys: settings.max_keys,
                store_size: settings.store_size.clone(),
                policy: settings.truncation_policy,
            },
            FlushPolicy {
                rows: config.write_buffer_rows,
                bytes: config.write_buffer_bytes,
                interval: settings.flush_interval.unwrap_or_else(|| {
                    match settings.mode {
                        StoreMode::Interactive => config.flush_interval(),
                        StoreMode::Analytic => config.analytic_flush_interval(),
                    }
                }),
                when_idle: settings.mode == StoreMode::Interactive,
            },
            shared.clone(),
        )?;
        let (tx, rx) = crossbeam_channel::bounded(config.queue_capacity);
        let handle = thread::Builder::new()
            .name(format!("resultstore-{name}"))
            .spawn(move || writer.run(rx))
            .map_err(|err| {
                StoreError::io("cannot start writer thread", err)
            })?;

        info!(
            "Created result store {} for query {} component {}",
            name, query_key, component_id
        );
        Ok(DataStore {
            query_key,
            component_id,
            name,
            table,
            settings,
            layout,
            source: RowSource::new(tx, field_index, shared.clone()),
            shared,
            backend: Mutex::new(Some(backend)),
            writer: Mutex::new(Some(handle)),
            retain_on_close: config.retain_on_close,
        })
    }

    pub fn query_key(&self) -> &QueryKey {
        &self.query_key
    }

    pub fn component_id(&self) -> &str {
        &self.component_id
    }

    /// Returns the name of the store's directory.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &TableSettings {
        &self.table
    }

    pub fn settings(&self) -> &DataStoreSettings {
        &self.settings
    }

    pub fn field_index(&self) -> &Arc<FieldIndex> {
        self.source.field_index()
    }

    pub fn errors(&self) -> &Arc<dyn ErrorConsumer> {
        self.shared.errors()
    }

    pub fn state(&self) -> StoreState {
        self.shared.state()
    }
}

/// # Adding Rows
///
impl DataStore {
    /// Adds a row with values positioned by the store's field index.
    ///
    /// Blocks while the store's queue is full. Rows added after the stream
    /// was completed or the store was sealed or closed are rejected and
    /// reported to the error consumer.
    pub fn add(&self, row: Vec<Val>) -> Result<(), StoreError> {
        self.source.add(row)
    }

    /// Adds a row with values positioned by a different field index.
    pub fn accept(
        &self, values: &[Val], field_index: &FieldIndex
    ) -> Result<(), StoreError> {
        self.source.accept(values, field_index)
    }

    /// Adds a row given as pairs of field names and values.
    pub fn add_named<'a>(
        &self, values: impl IntoIterator<Item = (&'a str, Val)>
    ) -> Result<(), StoreError> {
        self.source.add_named(values)
    }

    /// Adds a row given as a JSON object of field names and values.
    pub fn add_json(
        &self, object: &serde_json::Map<String, serde_json::Value>
    ) -> Result<(), StoreError> {
        self.source.add_json(object)
    }

    /// Signals that no more rows will be added.
    ///
    /// The store becomes sealed once the rows already added are merged.
    pub fn complete(&self) {
        self.source.complete()
    }
}

/// # Lifecycle
///
impl DataStore {
    /// Stops merging rows.
    ///
    /// What has been merged so far is committed. Rows still queued are
    /// dropped. The store can still be read.
    pub fn seal(&self) {
        self.shared.seal(true);
    }

    /// Returns whether the writer has finished.
    pub fn is_complete(&self) -> bool {
        self.shared.completion().is_complete()
    }

    /// Waits at most `timeout` for the writer to finish.
    ///
    /// Returns whether it has.
    pub fn await_completion(&self, timeout: Duration) -> bool {
        self.shared.completion().await_completion(timeout)
    }

    /// Closes the store and releases its data.
    ///
    /// Snapshots taken earlier fail from now on. Closing a closed store
    /// does nothing.
    pub fn close(&self) -> Result<(), StoreError> {
        if self.shared.close() {
            return Ok(())
        }
        self.source.disconnect();
        let handle = self.writer.lock().expect("poisoned lock").take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Writer of result store {} panicked", self.name);
            }
        }
        self.shared.completion().signal_complete();

        let backend = self.backend.lock().expect("poisoned lock").take();
        if let Some(backend) = backend {
            match Arc::try_unwrap(backend) {
                Ok(backend) => {
                    if self.retain_on_close {
                        backend.close()?
                    }
                    else {
                        backend.destroy()?
                    }
                }
                Err(_) => {
                    warn!(
                        "Result store {} still in use when closing",
                        self.name
                    );
                }
            }
        }
        info!("Closed result store {}", self.name);
        Ok(())
    }
}

/// # Reading
///
impl DataStore {
    /// Takes a snapshot of the last committed state.
    pub fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let backend = self.backend.lock().expect("poisoned lock").clone();
        let backend = backend.ok_or(StoreError::StoreClosed)?;
        Snapshot::new(self.shared.clone(), self.layout.clone(), || {
            Ok(backend.read()?)
        })
    }

    /// Fetches a page of results from a fresh snapshot.
    pub fn fetch(&self, request: &PageRequest) -> Result<Page, StoreError> {
        self.snapshot()?.fetch(request)
    }

    /// Returns the statistics of the last committed state.
    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        self.snapshot()?.stats()
    }
}

impl Drop for DataStore {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            error!("Failed to close result store {}: {}", self.name, err);
        }
    }
}

impl fmt::Debug for DataStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DataStore")
            .field("query_key", &self.query_key)
            .field("component_id", &self.component_id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}


//============ Tests =========================================================
