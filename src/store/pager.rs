//! Reading pages of results from a snapshot.
//!
//! A [`Snapshot`] shows the state of a store as of the last commit before it
//! was taken. Rows are produced by walking the hierarchy depth first: every
//! row is followed by its children if, and only if, the caller lists the
//! row's group key as open. Children are sorted per parent and capped by the
//! store's `max_results` for their depth before any paging happens.
//!
//! Children of unsorted parents are visited in first-seen order straight
//! from their ordinals. Rows before or after the requested window are then
//! only counted and only decoded if they are open.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use crate::query::{
    DataStoreSettings, ErrorMessage, SortDirection, Sizes, TableSettings, Val,
};
use super::backends::ReadTransaction;
use super::error::StoreError;
use super::item::{EventRef, Item, StoreStats};
use super::key::{GroupKey, ItemKey, STATS_KEY};
use super::state::Shared;


//------------ Layout --------------------------------------------------------

/// How the rows of a store are presented.
#[derive(Clone, Debug)]
pub(crate) struct Layout {
    columns: Vec<String>,

    /// Whether each column aggregates. Others are blank in the totals.
    aggregates: Vec<bool>,

    sort: Vec<(usize, SortDirection)>,
    max_results: Sizes,
}

impl Layout {
    pub fn new(
        table: &TableSettings,
        settings: &DataStoreSettings,
        aggregates: Vec<bool>,
    ) -> Self {
        let max_results = match table.max_results.as_ref() {
            Some(sizes) => settings.max_results.min(sizes),
            None => settings.max_results.clone(),
        };
        Layout {
            columns: table.columns.iter().map(|c| c.id.clone()).collect(),
            aggregates,
            sort: table.sort_columns().into_iter().map(|(idx, sort)| {
                (idx, sort.direction)
            }).collect(),
            max_results,
        }
    }

    /// Resolves the sort order of a request.
    fn resolve_sort(
        &self, sort: Option<&[ColumnSort]>
    ) -> Result<Vec<(usize, SortDirection)>, StoreError> {
        let Some(sort) = sort else {
            return Ok(self.sort.clone())
        };
        sort.iter().map(|item| {
            self.columns.iter().position(|id| *id == item.column).map(|idx| {
                (idx, item.direction)
            }).ok_or_else(|| {
                StoreError::invalid_request(format!(
                    "unknown sort column '{}'", item.column
                ))
            })
        }).collect()
    }
}


//------------ ColumnSort ----------------------------------------------------

/// Sorting by a column requested for a single page.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ColumnSort {
    /// The id of the column.
    pub column: String,

    #[serde(default)]
    pub direction: SortDirection,
}

impl ColumnSort {
    pub fn new(column: impl Into<String>, direction: SortDirection) -> Self {
        ColumnSort { column: column.into(), direction }
    }
}


//------------ PageRequest ---------------------------------------------------

/// A request for a window of result rows.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct PageRequest {
    /// The number of visible rows to skip.
    #[serde(default)]
    pub offset: usize,

    /// The maximum number of rows to return.
    pub length: usize,

    /// The groups whose children should be shown.
    #[serde(default)]
    pub open: HashSet<GroupKey>,

    /// Show the children of all groups.
    #[serde(default)]
    pub open_all: bool,

    /// Only show the rows beneath this group.
    #[serde(default)]
    pub parent: Option<GroupKey>,

    /// Sorting overriding the sorting of the table.
    #[serde(default)]
    pub sort: Option<Vec<ColumnSort>>,
}

impl PageRequest {
    pub fn new(offset: usize, length: usize) -> Self {
        PageRequest { offset, length, .. Default::default() }
    }

    pub fn open(mut self, key: GroupKey) -> Self {
        self.open.insert(key);
        self
    }

    pub fn open_all(mut self) -> Self {
        self.open_all = true;
        self
    }

    /// Returns whether the children of a group are to be shown.
    pub fn is_open(&self, key: &GroupKey) -> bool {
        self.open_all || self.open.contains(key)
    }

    pub fn with_parent(mut self, key: GroupKey) -> Self {
        self.parent = Some(key);
        self
    }

    pub fn with_sort(mut self, sort: Vec<ColumnSort>) -> Self {
        self.sort = Some(sort);
        self
    }
}


//------------ Row -----------------------------------------------------------

/// A single result row.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Row {
    /// The key identifying the row, used to open it.
    pub group_key: GroupKey,

    /// The depth of the row; rows of the first grouping level are at one.
    pub depth: usize,

    pub values: Vec<Val>,

    /// Whether the row has rows beneath it.
    pub has_children: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_event: Option<EventRef>,
}

impl Row {
    fn new(key: &ItemKey, item: &Item) -> Self {
        Row {
            group_key: GroupKey::from(key),
            depth: key.depth(),
            values: item.values(),
            has_children: item.children > 0,
            latest_event: item.latest_event,
        }
    }
}


//------------ Page ----------------------------------------------------------

/// A window of result rows.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Page {
    pub rows: Vec<Row>,

    /// The number of visible rows in the snapshot.
    ///
    /// This may grow between requests while the store is still running.
    pub total: usize,

    pub offset: usize,

    /// Whether the snapshot contains everything the store will ever hold.
    pub complete: bool,

    /// Whether rows were dropped because of storage limits.
    pub truncated: bool,

    /// The aggregate over all rows.
    ///
    /// Columns passing values through unaggregated are null.
    pub totals: Vec<Val>,

    /// Problems reported while processing rows.
    pub errors: Vec<ErrorMessage>,
}


//------------ Snapshot ------------------------------------------------------

/// A consistent read-only view of a store.
///
/// All access fails with [`StoreError::StoreClosed`] once the store has
/// been closed, even though the snapshot itself is still around.
pub struct Snapshot {
    shared: Arc<Shared>,
    layout: Arc<Layout>,
    txn: ReadTransaction,
    complete: bool,
}

impl Snapshot {
    pub(crate) fn new(
        shared: Arc<Shared>,
        layout: Arc<Layout>,
        open: impl FnOnce() -> Result<ReadTransaction, StoreError>,
    ) -> Result<Self, StoreError> {
        shared.check_readable()?;
        // Completion has to be checked before the transaction is opened.
        let complete = shared.completion().is_complete();
        let txn = open()?;
        Ok(Snapshot { shared, layout, txn, complete })
    }

    /// Returns whether the store had finished writing when this was taken.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    fn item(&self, key: &ItemKey) -> Result<Option<Item>, StoreError> {
        self.shared.check_readable()?;
        match self.txn.get(key.as_bytes())? {
            Some(data) => Item::decode(data).map(Some).map_err(|err| {
                StoreError::encoding("cannot decode stored row", err)
            }),
            None => Ok(None)
        }
    }

    /// Returns the statistics as of this snapshot.
    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        self.shared.check_readable()?;
        match self.txn.get(STATS_KEY)? {
            Some(data) => StoreStats::decode(data).map_err(|err| {
                StoreError::encoding("cannot decode store statistics", err)
            }),
            None => Ok(StoreStats::default())
        }
    }

    /// Returns the aggregate over all rows.
    pub fn totals(&self) -> Result<Vec<Val>, StoreError> {
        let Some(item) = self.item(&ItemKey::root())? else {
            return Ok(vec![Val::Null; self.layout.columns.len()])
        };
        Ok(item.values().into_iter().enumerate().map(|(idx, val)| {
            if self.layout.aggregates.get(idx).copied().unwrap_or(true) {
                val
            }
            else {
                Val::Null
            }
        }).collect())
    }

    /// Returns a single row.
    pub fn row(&self, key: &GroupKey) -> Result<Option<Row>, StoreError> {
        let key = key.item_key();
        Ok(self.item(&key)?.map(|item| Row::new(&key, &item)))
    }

    /// Returns the visible children of a row in order.
    fn children(
        &self, parent: &ItemKey, count: u64, sort: &[(usize, SortDirection)],
    ) -> Result<Siblings, StoreError> {
        let max = self.layout.max_results.size(parent.depth());
        let end = count.min(u64::try_from(max).unwrap_or(u64::MAX));
        if sort.is_empty() {
            return Ok(Siblings::Ordered {
                parent: parent.clone(), next: 0, end
            })
        }
        let mut res = Vec::new();
        for ordinal in 0..count {
            let key = parent.child(ordinal);
            if let Some(item) = self.item(&key)? {
                let values = item.values();
                res.push((key, item, values))
            }
        }
        res.sort_by(|left, right| compare(&left.2, &right.2, sort));
        res.truncate(max);
        Ok(Siblings::Sorted(
            res.into_iter().map(|(key, item, _)| (key, item)).collect::<Vec<_>>()
                .into_iter()
        ))
    }

    /// Returns an iterator over the visible rows.
    pub fn rows<'a>(
        &'a self, request: &'a PageRequest
    ) -> Result<RowIter<'a>, StoreError> {
        let sort = self.layout.resolve_sort(request.sort.as_deref())?;
        let mut res = RowIter {
            snapshot: self,
            request,
            sort,
            stack: Vec::new(),
        };
        let parent = match request.parent.as_ref() {
            Some(parent) => parent.item_key(),
            None => ItemKey::root(),
        };
        let Some(item) = self.item(&parent)? else {
            return Ok(res)
        };
        if !parent.is_root() && !request.is_open(&GroupKey::from(&parent)) {
            res.stack.push(Siblings::Sorted(vec![(parent, item)].into_iter()));
        }
        else {
            res.stack.push(
                self.children(&parent, item.children, &res.sort)?
            );
        }
        Ok(res)
    }

    /// Returns a page of rows.
    pub fn fetch(&self, request: &PageRequest) -> Result<Page, StoreError> {
        let mut rows = Vec::new();
        let mut total = 0;
        let mut iter = self.rows(request)?;
        loop {
            if total >= request.offset && rows.len() < request.length {
                match iter.next() {
                    Some(row) => rows.push(row?),
                    None => break,
                }
            }
            else {
                match iter.skip_row() {
                    Some(res) => res?,
                    None => break,
                }
            }
            total += 1;
        }
        let stats = self.stats()?;
        Ok(Page {
            rows,
            total,
            offset: request.offset,
            complete: self.complete,
            truncated: stats.truncated,
            totals: self.totals()?,
            errors: self.shared.errors().errors(),
        })
    }
}

fn compare(
    left: &[Val], right: &[Val], sort: &[(usize, SortDirection)]
) -> Ordering {
    for (idx, direction) in sort {
        let ord = left.get(*idx).cmp(&right.get(*idx));
        let ord = match direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord
        }
    }
    Ordering::Equal
}


//------------ Siblings ------------------------------------------------------

/// The children of a row still to be visited.
enum Siblings {
    /// Sorted children, decoded up front.
    Sorted(std::vec::IntoIter<(ItemKey, Item)>),

    /// Children in first-seen order, decoded when needed.
    Ordered {
        parent: ItemKey,
        next: u64,
        end: u64,
    },
}


//------------ RowIter -------------------------------------------------------

/// A lazy depth-first walk over the visible rows of a snapshot.
pub struct RowIter<'a> {
    snapshot: &'a Snapshot,
    request: &'a PageRequest,
    sort: Vec<(usize, SortDirection)>,
    stack: Vec<Siblings>,
}

impl RowIter<'_> {
    /// Moves past the next row without producing it.
    pub fn skip_row(&mut self) -> Option<Result<(), StoreError>> {
        match self.step(false) {
            Ok(Some(_)) => Some(Ok(())),
            Ok(None) => None,
            Err(err) => {
                self.stack.clear();
                Some(Err(err))
            }
        }
    }

    /// Moves to the next row and descends into it if it is open.
    ///
    /// The row's item is returned if `decode` is set or the row is open.
    fn step(
        &mut self, decode: bool
    ) -> Result<Option<(ItemKey, Option<Item>)>, StoreError> {
        loop {
            let Some(top) = self.stack.last_mut() else {
                return Ok(None)
            };
            let (key, item) = match top {
                Siblings::Sorted(iter) => match iter.next() {
                    Some((key, item)) => (key, Some(item)),
                    None => {
                        self.stack.pop();
                        continue
                    }
                },
                Siblings::Ordered { parent, next, end } => {
                    if *next >= *end {
                        self.stack.pop();
                        continue
                    }
                    let key = parent.child(*next);
                    *next += 1;
                    (key, None)
                }
            };
            let open = self.request.is_open(&GroupKey::from(&key));
            let item = match item {
                Some(item) => Some(item),
                None if decode || open => {
                    match self.snapshot.item(&key)? {
                        Some(item) => Some(item),
                        None => continue,
                    }
                }
                None => None,
            };
            if let Some(item) = item.as_ref().filter(|item| {
                open && item.children > 0
            }) {
                self.stack.push(
                    self.snapshot.children(&key, item.children, &self.sort)?
                );
            }
            return Ok(Some((key, item)))
        }
    }
}

impl Iterator for RowIter<'_> {
    type Item = Result<Row, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step(true) {
            Ok(Some((key, Some(item)))) => Some(Ok(Row::new(&key, &item))),
            Ok(Some((_, None))) | Ok(None) => None,
            Err(err) => {
                self.stack.clear();
                Some(Err(err))
            }
        }
    }
}
