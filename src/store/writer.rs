//! The single writer of a store.
//!
//! All rows of a store pass through a bounded queue to one writer thread.
//! The writer merges rows into an in-memory write buffer layered over the
//! last committed state and commits the buffer in one transaction when it
//! grows too large, when the flush interval has passed, or when the row
//! stream ends.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, trace};
use crate::query::{Sizes, TruncationPolicy, Val};
use super::backends::{Backend, ReadTransaction};
use super::error::StoreError;
use super::item::{EventRef, Item, StoreStats};
use super::key::{ItemKey, KeyBuilder, RowKeys, STATS_KEY};
use super::state::Shared;


//------------ Message -------------------------------------------------------

/// What producers send to the writer.
#[derive(Debug)]
pub(crate) enum Message {
    Row(Vec<Val>),

    /// The row stream has ended.
    Complete,
}


//------------ FlushPolicy ---------------------------------------------------

/// When the writer commits.
#[derive(Clone, Copy, Debug)]
pub(crate) struct FlushPolicy {
    /// The number of buffered rows forcing a commit.
    pub rows: usize,

    /// The approximate buffer size in bytes forcing a commit.
    pub bytes: usize,

    /// The maximum time between commits while rows keep arriving.
    pub interval: Duration,

    /// Whether to commit whenever the queue runs empty.
    pub when_idle: bool,
}


//------------ Limits --------------------------------------------------------

/// Limits on the number of keys stored.
#[derive(Clone, Debug)]
pub(crate) struct Limits {
    pub max_keys: Option<u64>,
    pub store_size: Sizes,
    pub policy: TruncationPolicy,
}


//------------ Writer --------------------------------------------------------

pub(crate) struct Writer {
    backend: Arc<Backend>,

    /// The committed state the write buffer is layered over.
    snapshot: Option<ReadTransaction>,

    builder: KeyBuilder,
    limits: Limits,
    flush: FlushPolicy,
    shared: Arc<Shared>,
    buffer: WriteBuffer,
    stats: StoreStats,
}

impl Writer {
    pub fn new(
        backend: Arc<Backend>,
        builder: KeyBuilder,
        limits: Limits,
        flush: FlushPolicy,
        shared: Arc<Shared>,
    ) -> Result<Self, StoreError> {
        let snapshot = backend.read()?;
        let stats = match snapshot.get(STATS_KEY)? {
            Some(data) => StoreStats::decode(data).map_err(|err| {
                StoreError::encoding("cannot decode store statistics", err)
            })?,
            None => StoreStats::default(),
        };
        Ok(Writer {
            backend,
            snapshot: Some(snapshot),
            builder,
            limits,
            flush,
            shared,
            buffer: WriteBuffer::default(),
            stats,
        })
    }

    /// Runs the writer until the stream ends or the store is terminated.
    ///
    /// Signals completion of the store when done.
    pub fn run(mut self, rx: Receiver<Message>) {
        debug!("Writer of result store {} started", self.shared.name());
        match self.process(&rx) {
            Ok(()) => {
                self.shared.seal(false);
            }
            Err(err) => self.shared.fail(err),
        }
        drop(rx);
        debug!(
            "Writer of result store {} finished after {} rows",
            self.shared.name(), self.stats.rows
        );
        self.shared.completion().signal_complete();
    }

    fn process(&mut self, rx: &Receiver<Message>) -> Result<(), StoreError> {
        let mut last_commit = Instant::now();
        loop {
            if self.shared.is_terminated() {
                return self.commit()
            }
            let wait = self.flush.interval.saturating_sub(
                last_commit.elapsed()
            );
            match rx.recv_timeout(wait) {
                Ok(Message::Row(row)) => {
                    self.add_row(row)?;
                    if self.buffer.rows >= self.flush.rows
                        || self.buffer.bytes >= self.flush.bytes
                        || (self.flush.when_idle && rx.is_empty())
                    {
                        self.commit()?;
                        last_commit = Instant::now();
                    }
                }
                Ok(Message::Complete)
                | Err(RecvTimeoutError::Disconnected) => {
                    return self.commit()
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.commit()?;
                    last_commit = Instant::now();
                }
            }
            if last_commit.elapsed() >= self.flush.interval {
                self.commit()?;
                last_commit = Instant::now();
            }
        }
    }

    /// Merges a row into the write buffer.
    ///
    /// Row-level problems are reported and the row is skipped. Only errors
    /// of the underlying storage are returned.
    pub fn add_row(&mut self, row: Vec<Val>) -> Result<(), StoreError> {
        let keys = match self.builder.build(&row) {
            Ok(keys) => keys,
            Err(err) => {
                self.shared.row_error(format!("Skipping row: {err}"));
                self.stats.rejected += 1;
                self.buffer.stats_changed = true;
                return Ok(())
            }
        };

        let root = ItemKey::root();
        let mut plan = Vec::new();
        let mut parent = root.clone();
        let mut parent_children = self.children_of(&root)?;
        let mut new_keys = 0;
        let mut cut = None;

        let levels = keys.groups.iter().map(Some).chain(
            keys.detail.then_some(None)
        );
        for group in levels {
            let existing = match group {
                Some(group) => self.lookup_group(&parent, group)?,
                None => None,
            };
            let key = match existing {
                Some(ordinal) => {
                    let key = parent.child(ordinal);
                    parent_children = self.children_of(&key)?;
                    plan.push(Planned { key: key.clone(), new: None });
                    key
                }
                None => {
                    if let Some(reason) = self.exceeds_limits(
                        &parent, parent_children, new_keys
                    ) {
                        cut = Some(reason);
                        break;
                    }
                    new_keys += 1;
                    let key = parent.child(parent_children);
                    plan.push(Planned {
                        key: key.clone(),
                        new: Some(NewKey {
                            ordinal: parent_children,
                            group_index: group.map(|group| {
                                parent.group_index_key(group)
                            }),
                        }),
                    });
                    parent_children = 0;
                    key
                }
            };
            parent = key;
        }

        if let Some(reason) = cut {
            self.stats.truncated = true;
            self.buffer.stats_changed = true;
            self.shared.truncate(|| reason);

            // The root stays the sum of the first level rows.
            if plan.is_empty()
                || self.limits.policy == TruncationPolicy::RejectRow
            {
                self.stats.rejected += 1;
                return Ok(())
            }
        }

        let size = keys.approx_size();
        let RowKeys { cells, event, .. } = keys;
        self.merge_into(&root, cells.clone(), event)?;
        let levels = plan.len() + 1;
        for planned in plan {
            match planned.new {
                None => self.merge_into(&planned.key, cells.clone(), event)?,
                Some(new) => {
                    if let Some(parent) = planned.key.parent() {
                        if let Some(parent) = self.load_item(&parent)? {
                            parent.children = new.ordinal + 1;
                        }
                    }
                    if let Some(group_index) = new.group_index {
                        self.buffer.groups.insert(group_index, new.ordinal);
                    }
                    self.buffer.items.insert(
                        planned.key, Item::new(cells.clone(), event)
                    );
                    self.stats.keys += 1;
                }
            }
        }
        self.stats.rows += 1;
        self.buffer.rows += 1;
        self.buffer.bytes += size * levels;
        Ok(())
    }

    /// Returns the reason if adding another key under `parent` is too much.
    fn exceeds_limits(
        &self, parent: &ItemKey, parent_children: u64, new_keys: u64
    ) -> Option<String> {
        if let Some(max_keys) = self.limits.max_keys {
            if self.stats.keys + new_keys >= max_keys {
                return Some(format!(
                    "Results truncated: store limited to {max_keys} keys"
                ))
            }
        }
        let size = self.limits.store_size.size(parent.depth());
        if usize::try_from(parent_children).unwrap_or(usize::MAX) >= size {
            return Some(format!(
                "Results truncated: store limited to {} rows per group \
                 at depth {}",
                size, parent.depth() + 1
            ))
        }
        None
    }

    fn merge_into(
        &mut self,
        key: &ItemKey,
        cells: Vec<crate::query::Generator>,
        event: Option<EventRef>,
    ) -> Result<(), StoreError> {
        match self.load_item(key)? {
            Some(item) => item.merge(cells, event),
            None => {
                self.buffer.items.insert(key.clone(), Item::new(cells, event));
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> Result<&ReadTransaction, StoreError> {
        self.snapshot.as_ref().ok_or_else(|| {
            StoreError::Failed("writer lost its snapshot".into())
        })
    }

    /// Makes sure an existing item is in the buffer and returns it.
    fn load_item(
        &mut self, key: &ItemKey
    ) -> Result<Option<&mut Item>, StoreError> {
        if !self.buffer.items.contains_key(key) {
            let Some(data) = self.snapshot()?.get(key.as_bytes())? else {
                return Ok(None)
            };
            let item = Item::decode(data).map_err(|err| {
                StoreError::encoding("cannot decode stored row", err)
            })?;
            self.buffer.items.insert(key.clone(), item);
        }
        Ok(self.buffer.items.get_mut(key))
    }

    fn children_of(&mut self, key: &ItemKey) -> Result<u64, StoreError> {
        Ok(self.load_item(key)?.map(|item| item.children).unwrap_or(0))
    }

    /// Returns the ordinal of a child group if it exists.
    fn lookup_group(
        &self, parent: &ItemKey, group: &[u8]
    ) -> Result<Option<u64>, StoreError> {
        let index_key = parent.group_index_key(group);
        if let Some(ordinal) = self.buffer.groups.get(&index_key) {
            return Ok(Some(*ordinal))
        }
        match self.snapshot()?.get(&index_key)? {
            Some(data) => {
                let data: [u8; 8] = data.try_into().map_err(|_| {
                    StoreError::Encoding("invalid group ordinal".into())
                })?;
                Ok(Some(u64::from_be_bytes(data)))
            }
            None => Ok(None)
        }
    }

    /// Commits the write buffer.
    pub fn commit(&mut self) -> Result<(), StoreError> {
        if self.buffer.is_empty() {
            return Ok(())
        }
        let start = Instant::now();
        let rows = self.buffer.rows;
        let mut entries = Vec::with_capacity(
            self.buffer.items.len() + self.buffer.groups.len() + 1
        );
        for (key, item) in self.buffer.items.drain() {
            let value = item.encode().map_err(|err| {
                StoreError::encoding("cannot encode row", err)
            })?;
            entries.push((key.as_bytes().to_vec(), value));
        }
        for (key, ordinal) in self.buffer.groups.drain() {
            entries.push((key, ordinal.to_be_bytes().to_vec()));
        }
        self.stats.commits += 1;
        entries.push((
            STATS_KEY.to_vec(),
            self.stats.encode().map_err(|err| {
                StoreError::encoding("cannot encode statistics", err)
            })?
        ));
        entries.sort_unstable_by(|left, right| left.0.cmp(&right.0));

        // Release the old snapshot so the engine need not keep it around.
        self.snapshot = None;
        self.backend.write(|txn| {
            for (key, value) in &entries {
                txn.put(key, value)?;
            }
            Ok(())
        })?;
        self.snapshot = Some(self.backend.read()?);
        self.buffer.rows = 0;
        self.buffer.bytes = 0;
        self.buffer.stats_changed = false;

        trace!(
            "Result store {}: committed {} rows ({} entries) in {:?}",
            self.shared.name(), rows, entries.len(), start.elapsed()
        );
        Ok(())
    }
}


//------------ Planned -------------------------------------------------------

/// A key a row is going to be merged into.
struct Planned {
    key: ItemKey,
    new: Option<NewKey>,
}

struct NewKey {
    ordinal: u64,
    group_index: Option<Vec<u8>>,
}


//------------ WriteBuffer ---------------------------------------------------

/// Everything changed since the last commit.
#[derive(Debug, Default)]
struct WriteBuffer {
    items: HashMap<ItemKey, Item>,
    groups: HashMap<Vec<u8>, u64>,
    rows: usize,
    bytes: usize,

    /// Whether statistics changed without any item changing.
    stats_changed: bool,
}

impl WriteBuffer {
    fn is_empty(&self) -> bool {
        self.items.is_empty() && self.groups.is_empty() && !self.stats_changed
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use url::Url;
    use super::*;
    use crate::query::{
        CollectingErrorConsumer, Column, ErrorConsumer, FieldIndex,
        TableSettings,
    };
    use crate::store::backends::BackendSystem;

    struct Setup {
        writer: Writer,
        backend: Arc<Backend>,
        index: FieldIndex,
        errors: Arc<CollectingErrorConsumer>,
    }

    fn setup(table: TableSettings, limits: Limits) -> Setup {
        setup_with_flush(table, limits, FlushPolicy {
            rows: 1000, bytes: 1 << 20,
            interval: Duration::from_secs(1), when_idle: true,
        })
    }

    fn setup_with_flush(
        table: TableSettings, limits: Limits, flush: FlushPolicy
    ) -> Setup {
        let system = BackendSystem::default();
        let backend = Arc::new(
            system.open(&Url::parse("memory:").unwrap(), "test").unwrap()
        );
        let index = FieldIndex::new();
        let builder = KeyBuilder::new(&table, &index, false).unwrap();
        let errors = Arc::new(CollectingErrorConsumer::default());
        let shared = Arc::new(Shared::new("test".into(), errors.clone()));
        let writer = Writer::new(
            backend.clone(), builder, limits, flush, shared,
        ).unwrap();
        Setup { writer, backend, index, errors }
    }

    fn unlimited() -> Limits {
        Limits {
            max_keys: None,
            store_size: Sizes::unlimited(),
            policy: TruncationPolicy::DropNewKeys,
        }
    }

    fn feed_table() -> TableSettings {
        TableSettings::new(vec![
            Column::new("feed", "${feed}").with_group(0),
            Column::new("count", "sum(${count})"),
        ])
    }

    fn row(index: &FieldIndex, values: &[(&str, Val)]) -> Vec<Val> {
        let mut row = vec![Val::Null; index.len()];
        for (name, val) in values {
            row[index.pos(name).unwrap()] = val.clone();
        }
        row
    }

    fn read_item(backend: &Backend, key: &ItemKey) -> Option<Item> {
        backend.read().unwrap().get(key.as_bytes()).unwrap().map(|data| {
            Item::decode(data).unwrap()
        })
    }

    #[test]
    fn nothing_visible_before_commit() {
        let mut setup = setup(feed_table(), unlimited());
        let row = row(&setup.index, &[("feed", "A".into()), ("count", 1.into())]);
        setup.writer.add_row(row).unwrap();
        assert!(read_item(&setup.backend, &ItemKey::root()).is_none());
        setup.writer.commit().unwrap();
        assert!(read_item(&setup.backend, &ItemKey::root()).is_some());
    }

    #[test]
    fn merges_into_groups() {
        let mut setup = setup(feed_table(), unlimited());
        for (feed, count) in [("A", 1), ("B", 5), ("A", 2)] {
            let row = row(
                &setup.index, &[("feed", feed.into()), ("count", count.into())]
            );
            setup.writer.add_row(row).unwrap();
        }
        setup.writer.commit().unwrap();

        let root = read_item(&setup.backend, &ItemKey::root()).unwrap();
        assert_eq!(root.children, 2);
        assert_eq!(root.values()[1], Val::Long(8));
        let a = read_item(&setup.backend, &ItemKey::root().child(0)).unwrap();
        assert_eq!(a.values(), vec![Val::string("A"), Val::Long(3)]);
        let b = read_item(&setup.backend, &ItemKey::root().child(1)).unwrap();
        assert_eq!(b.values(), vec![Val::string("B"), Val::Long(5)]);

        let stats = StoreStats::decode(
            setup.backend.read().unwrap().get(STATS_KEY).unwrap().unwrap()
        ).unwrap();
        assert_eq!(stats.keys, 2);
        assert_eq!(stats.rows, 3);
        assert!(!stats.truncated);
    }

    #[test]
    fn merges_across_commits() {
        let mut setup = setup(feed_table(), unlimited());
        for count in [1, 2] {
            let row = row(
                &setup.index, &[("feed", "A".into()), ("count", count.into())]
            );
            setup.writer.add_row(row).unwrap();
            setup.writer.commit().unwrap();
        }
        let a = read_item(&setup.backend, &ItemKey::root().child(0)).unwrap();
        assert_eq!(a.values()[1], Val::Long(3));
        assert!(read_item(&setup.backend, &ItemKey::root().child(1)).is_none());
    }

    #[test]
    fn bad_row_is_skipped() {
        let mut setup = setup(feed_table(), unlimited());
        let bad = row(
            &setup.index, &[("feed", "A".into()), ("count", "lots".into())]
        );
        setup.writer.add_row(bad).unwrap();
        let good = row(
            &setup.index, &[("feed", "A".into()), ("count", 4.into())]
        );
        setup.writer.add_row(good).unwrap();
        setup.writer.commit().unwrap();

        let root = read_item(&setup.backend, &ItemKey::root()).unwrap();
        assert_eq!(root.values()[1], Val::Long(4));
        assert_eq!(setup.errors.errors().len(), 1);
    }

    #[test]
    fn max_keys_drops_new_keys() {
        let mut setup = setup(feed_table(), Limits {
            max_keys: Some(2),
            .. unlimited()
        });
        for feed in ["A", "B", "C", "A"] {
            let row = row(
                &setup.index, &[("feed", feed.into()), ("count", 1.into())]
            );
            setup.writer.add_row(row).unwrap();
        }
        setup.writer.commit().unwrap();

        let root = read_item(&setup.backend, &ItemKey::root()).unwrap();
        assert_eq!(root.children, 2);
        // The row for C is merged into nothing, not even the root.
        assert_eq!(root.values()[1], Val::Long(3));
        let a = read_item(&setup.backend, &ItemKey::root().child(0)).unwrap();
        assert_eq!(a.values()[1], Val::Long(2));
        let b = read_item(&setup.backend, &ItemKey::root().child(1)).unwrap();
        assert_eq!(b.values()[1], Val::Long(1));
        assert_eq!(setup.writer.stats.rows, 3);
        assert_eq!(setup.writer.stats.rejected, 1);
        assert_eq!(setup.errors.errors().len(), 1);
    }

    #[test]
    fn cut_below_first_level_still_counts() {
        let table = TableSettings::new(vec![
            Column::new("feed", "${feed}").with_group(0),
            Column::new("node", "${node}").with_group(1),
            Column::new("count", "count()"),
        ]);
        let mut setup = setup(table, Limits {
            max_keys: Some(2),
            .. unlimited()
        });
        for node in ["x", "y"] {
            let row = row(
                &setup.index, &[("feed", "A".into()), ("node", node.into())]
            );
            setup.writer.add_row(row).unwrap();
        }
        setup.writer.commit().unwrap();

        // The group A keeps the row whose node was cut, as does the root.
        let root = read_item(&setup.backend, &ItemKey::root()).unwrap();
        let a = read_item(&setup.backend, &ItemKey::root().child(0)).unwrap();
        assert_eq!(root.values()[2], Val::Long(2));
        assert_eq!(a.values()[2], Val::Long(2));
        assert_eq!(a.children, 1);
        assert_eq!(setup.writer.stats.rejected, 0);
    }

    #[test]
    fn reject_row_policy() {
        let mut setup = setup(feed_table(), Limits {
            max_keys: Some(1),
            policy: TruncationPolicy::RejectRow,
            .. unlimited()
        });
        for feed in ["A", "B"] {
            let row = row(
                &setup.index, &[("feed", feed.into()), ("count", 1.into())]
            );
            setup.writer.add_row(row).unwrap();
        }
        setup.writer.commit().unwrap();
        let root = read_item(&setup.backend, &ItemKey::root()).unwrap();
        assert_eq!(root.values()[1], Val::Long(1));
    }

    #[test]
    fn store_size_limits_per_parent() {
        let table = TableSettings::new(vec![
            Column::new("feed", "${feed}").with_group(0),
            Column::new("node", "${node}").with_group(1),
            Column::new("count", "count()"),
        ]);
        let mut setup = setup(table, Limits {
            store_size: Sizes::from_str("10,1").unwrap(),
            .. unlimited()
        });
        for (feed, node) in [("A", "x"), ("A", "y"), ("B", "z")] {
            let row = row(
                &setup.index, &[("feed", feed.into()), ("node", node.into())]
            );
            setup.writer.add_row(row).unwrap();
        }
        setup.writer.commit().unwrap();

        let a = read_item(&setup.backend, &ItemKey::root().child(0)).unwrap();
        assert_eq!(a.children, 1);
        assert_eq!(a.values()[2], Val::Long(2));
        let b = read_item(&setup.backend, &ItemKey::root().child(1)).unwrap();
        assert_eq!(b.children, 1);
    }

    /// Runs the writer with a long flush interval.
    ///
    /// Returns the sender, the backend and the writer's thread.
    fn spawn_writer(
        rows: usize, bytes: usize
    ) -> (
        crossbeam_channel::Sender<Message>, Arc<Backend>, FieldIndex,
        std::thread::JoinHandle<()>,
    ) {
        let setup = setup_with_flush(feed_table(), unlimited(), FlushPolicy {
            rows, bytes,
            interval: Duration::from_secs(3600), when_idle: false,
        });
        let Setup { writer, backend, index, .. } = setup;
        let (tx, rx) = crossbeam_channel::bounded(16);
        let handle = std::thread::spawn(move || writer.run(rx));
        (tx, backend, index, handle)
    }

    fn wait_for_root(backend: &Backend) -> Item {
        let deadline = Instant::now() + Duration::from_secs(30);
        loop {
            if let Some(item) = read_item(backend, &ItemKey::root()) {
                return item
            }
            assert!(Instant::now() < deadline, "nothing committed");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn buffered_rows_force_commit() {
        let (tx, backend, index, handle) = spawn_writer(2, 1 << 30);
        tx.send(Message::Row(
            row(&index, &[("feed", "A".into()), ("count", 1.into())])
        )).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(read_item(&backend, &ItemKey::root()).is_none());

        tx.send(Message::Row(
            row(&index, &[("feed", "B".into()), ("count", 2.into())])
        )).unwrap();
        let root = wait_for_root(&backend);
        assert_eq!(root.values()[1], Val::Long(3));
        assert_eq!(root.children, 2);

        tx.send(Message::Complete).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn buffered_bytes_force_commit() {
        let (tx, backend, index, handle) = spawn_writer(1000, 1);
        tx.send(Message::Row(
            row(&index, &[("feed", "A".into()), ("count", 4.into())])
        )).unwrap();
        let root = wait_for_root(&backend);
        assert_eq!(root.values()[1], Val::Long(4));

        tx.send(Message::Complete).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn detail_rows_without_groups() {
        let table = TableSettings::new(vec![Column::new("v", "${v}")]);
        let mut setup = setup(table, unlimited());
        for v in [3, 1, 2] {
            let row = row(&setup.index, &[("v", v.into())]);
            setup.writer.add_row(row).unwrap();
        }
        setup.writer.commit().unwrap();
        let root = read_item(&setup.backend, &ItemKey::root()).unwrap();
        assert_eq!(root.children, 3);
        let second = read_item(
            &setup.backend, &ItemKey::root().child(1)
        ).unwrap();
        assert_eq!(second.values(), vec![Val::Long(1)]);
    }
}
