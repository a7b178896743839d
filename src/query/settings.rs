//! Settings describing the table a store produces and how it stores it.

use std::{error, fmt};
use std::collections::{BTreeSet, HashSet};
use std::str::FromStr;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::constants;


//------------ QueryKey ------------------------------------------------------

/// The identity of a running search.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct QueryKey(String);

impl QueryKey {
    pub fn new(key: impl Into<String>) -> Self {
        QueryKey(key.into())
    }

    /// Creates a new, random query key.
    pub fn random() -> Self {
        QueryKey(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for QueryKey {
    fn from(key: &str) -> Self {
        QueryKey::new(key)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}


//------------ SortDirection -------------------------------------------------

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}


//------------ Sort ----------------------------------------------------------

/// How a column takes part in sorting rows.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Sort {
    /// The priority of the column; lower orders are compared first.
    #[serde(default)]
    pub order: usize,

    #[serde(default)]
    pub direction: SortDirection,
}

impl Sort {
    pub fn new(order: usize, direction: SortDirection) -> Self {
        Sort { order, direction }
    }
}


//------------ Column --------------------------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Column {
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// The expression producing the column's value.
    ///
    /// A column without an expression is always null.
    #[serde(default)]
    pub expression: Option<String>,

    /// The grouping level this column is part of, if any.
    #[serde(default)]
    pub group: Option<usize>,

    #[serde(default)]
    pub sort: Option<Sort>,
}

impl Column {
    pub fn new(id: impl Into<String>, expression: impl Into<String>) -> Self {
        let id = id.into();
        Column {
            name: id.clone(),
            id,
            expression: Some(expression.into()),
            group: None,
            sort: None,
        }
    }

    pub fn with_group(mut self, group: usize) -> Self {
        self.group = Some(group);
        self
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }
}


//------------ TableSettings -------------------------------------------------

/// The immutable description of the table a store aggregates into.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TableSettings {
    pub columns: Vec<Column>,

    /// Whether to keep the individual rows beneath the deepest group.
    #[serde(default)]
    pub show_detail: bool,

    /// Limits on the number of child rows returned per parent.
    #[serde(default)]
    pub max_results: Option<Sizes>,
}

impl TableSettings {
    pub fn new(columns: Vec<Column>) -> Self {
        TableSettings { columns, show_detail: false, max_results: None }
    }

    pub fn with_show_detail(mut self, show_detail: bool) -> Self {
        self.show_detail = show_detail;
        self
    }

    pub fn with_max_results(mut self, max_results: Sizes) -> Self {
        self.max_results = Some(max_results);
        self
    }

    /// Returns the column indexes of each grouping level in order.
    pub fn group_levels(&self) -> Vec<Vec<usize>> {
        let groups: BTreeSet<_> = self.columns.iter().filter_map(|column| {
            column.group
        }).collect();
        groups.into_iter().map(|group| {
            self.columns.iter().enumerate().filter_map(|(idx, column)| {
                (column.group == Some(group)).then_some(idx)
            }).collect()
        }).collect()
    }

    /// Returns whether individual rows are kept beneath the last group.
    pub fn keeps_detail(&self) -> bool {
        self.show_detail || self.columns.iter().all(|c| c.group.is_none())
    }

    /// Returns the sorting columns in order of priority.
    pub fn sort_columns(&self) -> Vec<(usize, Sort)> {
        let mut res: Vec<_> = self.columns.iter().enumerate().filter_map(
            |(idx, column)| column.sort.map(|sort| (idx, sort))
        ).collect();
        res.sort_by_key(|(idx, sort)| (sort.order, *idx));
        res
    }

    /// Checks the settings for consistency.
    pub fn verify(&self) -> Result<(), SettingsError> {
        if self.columns.is_empty() {
            return Err(SettingsError::NoColumns)
        }
        let mut ids = HashSet::new();
        for column in &self.columns {
            if !ids.insert(column.id.as_str()) {
                return Err(SettingsError::DuplicateColumn(column.id.clone()))
            }
        }
        Ok(())
    }
}


//------------ Sizes ---------------------------------------------------------

/// Per-depth limits.
///
/// The first entry applies to the rows at depth one, the second to their
/// children and so on. The last entry applies to all deeper levels. An
/// empty list means no limits at all.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sizes(Vec<usize>);

impl Sizes {
    pub fn new(sizes: Vec<usize>) -> Self {
        Sizes(sizes)
    }

    pub fn unlimited() -> Self {
        Sizes(Vec::new())
    }

    pub fn is_unlimited(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the limit for the children of a parent at `depth`.
    ///
    /// The root is at depth zero.
    pub fn size(&self, depth: usize) -> usize {
        match self.0.get(depth) {
            Some(size) => *size,
            None => self.0.last().copied().unwrap_or(usize::MAX),
        }
    }

    /// Combines two lists taking the smaller limit at each depth.
    pub fn min(&self, other: &Sizes) -> Sizes {
        if self.is_unlimited() {
            return other.clone()
        }
        if other.is_unlimited() {
            return self.clone()
        }
        let len = self.0.len().max(other.0.len());
        Sizes(
            (0..len).map(|depth| {
                self.size(depth).min(other.size(depth))
            }).collect()
        )
    }
}

impl FromStr for Sizes {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Sizes::unlimited())
        }
        s.split(',').map(|item| {
            usize::from_str(item.trim()).map_err(|_| {
                SettingsError::InvalidSizes(s.into())
            })
        }).collect::<Result<_, _>>().map(Sizes)
    }
}

impl TryFrom<String> for Sizes {
    type Error = SettingsError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Sizes::from_str(&s)
    }
}

impl From<Sizes> for String {
    fn from(sizes: Sizes) -> Self {
        sizes.to_string()
    }
}

impl fmt::Display for Sizes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for size in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{size}")?;
            first = false;
        }
        Ok(())
    }
}


//------------ TruncationPolicy ----------------------------------------------

/// What happens to a row that would create a key beyond a storage limit.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TruncationPolicy {
    /// The new key and everything beneath it is dropped.
    ///
    /// If the dropped key has a parent other than the root, the row is
    /// still merged into its ancestors. A row whose first level key is
    /// dropped is merged into nothing.
    #[default]
    DropNewKeys,

    /// The entire row is dropped.
    RejectRow,
}


//------------ StoreMode -----------------------------------------------------

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    /// A store polled interactively by dashboards.
    #[default]
    Interactive,

    /// A store feeding analytic rules.
    Analytic,
}


//------------ DataStoreSettings ---------------------------------------------

/// How a single store keeps its data.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DataStoreSettings {
    /// Limits on child rows returned per parent, narrowed by the table.
    pub max_results: Sizes,

    /// Limits on child rows stored per parent.
    pub store_size: Sizes,

    /// The maximum number of distinct keys stored, not counting the root.
    pub max_keys: Option<u64>,

    pub truncation_policy: TruncationPolicy,

    pub mode: StoreMode,

    /// Whether aggregate rows remember the latest event they contain.
    pub store_latest_event_reference: bool,

    /// How often the writer commits when rows keep arriving.
    ///
    /// If `None`, the interval is taken from the configuration based on
    /// the mode.
    pub flush_interval: Option<Duration>,
}

impl DataStoreSettings {
    /// The settings for an interactive dashboard store.
    pub fn basic() -> Self {
        DataStoreSettings {
            max_results: Sizes::new(constants::DEFAULT_MAX_RESULTS.to_vec()),
            store_size: Sizes::unlimited(),
            max_keys: None,
            truncation_policy: TruncationPolicy::default(),
            mode: StoreMode::Interactive,
            store_latest_event_reference: false,
            flush_interval: None,
        }
    }

    /// The settings for a store feeding analytic rules.
    pub fn analytic() -> Self {
        DataStoreSettings {
            max_results: Sizes::unlimited(),
            mode: StoreMode::Analytic,
            store_latest_event_reference: true,
            .. Self::basic()
        }
    }

    pub fn builder() -> DataStoreSettingsBuilder {
        DataStoreSettingsBuilder(Self::basic())
    }
}

impl Default for DataStoreSettings {
    fn default() -> Self {
        Self::basic()
    }
}


//------------ DataStoreSettingsBuilder --------------------------------------

#[derive(Clone, Debug)]
pub struct DataStoreSettingsBuilder(DataStoreSettings);

impl DataStoreSettingsBuilder {
    pub fn max_results(mut self, max_results: Sizes) -> Self {
        self.0.max_results = max_results;
        self
    }

    pub fn store_size(mut self, store_size: Sizes) -> Self {
        self.0.store_size = store_size;
        self
    }

    pub fn max_keys(mut self, max_keys: u64) -> Self {
        self.0.max_keys = Some(max_keys);
        self
    }

    pub fn truncation_policy(mut self, policy: TruncationPolicy) -> Self {
        self.0.truncation_policy = policy;
        self
    }

    pub fn mode(mut self, mode: StoreMode) -> Self {
        self.0.mode = mode;
        self
    }

    pub fn store_latest_event_reference(mut self, store: bool) -> Self {
        self.0.store_latest_event_reference = store;
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.0.flush_interval = Some(interval);
        self
    }

    pub fn build(self) -> DataStoreSettings {
        self.0
    }
}


//------------ SettingsError -------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SettingsError {
    NoColumns,
    DuplicateColumn(String),
    InvalidSizes(String),
    Expression {
        column: String,
        message: String,
    },
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SettingsError::NoColumns => f.write_str("table has no columns"),
            SettingsError::DuplicateColumn(id) => {
                write!(f, "duplicate column id '{id}'")
            }
            SettingsError::InvalidSizes(s) => {
                write!(f, "invalid size list '{s}'")
            }
            SettingsError::Expression { column, message } => {
                write!(f, "invalid expression in column '{column}': {message}")
            }
        }
    }
}

impl error::Error for SettingsError { }


//============ Tests =========================================================
