//! Composite keys.
//!
//! A row of a table with N grouping levels contributes to N + 1 aggregate
//! rows: the root and one group at each depth. Which groups these are is
//! decided by the [`KeyBuilder`] alone. Where in the store they live is
//! decided when the writer gives each new group a first-seen ordinal.
//!
//! In the store, an aggregate row is kept under an [`ItemKey`]: a tag byte
//! followed by the big-endian ordinals of the path from the root. Parents
//! thus sort immediately before their descendants and all rows of one
//! subtree are contiguous. A second key space maps the encoded group value
//! of a child to its ordinal within the parent.

use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use crate::query::{
    EvalError, Expression, FieldIndex, Generator, SettingsError,
    TableSettings, Val,
};
use super::item::EventRef;


//------------ Key spaces ----------------------------------------------------

/// The first byte of every item key.
pub const ITEM_TAG: u8 = 0x01;

/// The first byte of every group index key.
pub const GROUP_TAG: u8 = 0x02;

/// The key of the store statistics.
pub const STATS_KEY: &[u8] = b"\x03stats";

/// The longest encoded group value kept verbatim in a group index key.
pub const MAX_INLINE_GROUP: usize = 256;


//------------ ItemKey -------------------------------------------------------

/// The storage key of an aggregate or detail row.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ItemKey(Vec<u8>);

impl ItemKey {
    pub fn root() -> Self {
        ItemKey(vec![ITEM_TAG])
    }

    /// Returns the key of the child with the given ordinal.
    pub fn child(&self, ordinal: u64) -> Self {
        let mut res = Vec::with_capacity(self.0.len() + 8);
        res.extend_from_slice(&self.0);
        res.extend_from_slice(&ordinal.to_be_bytes());
        ItemKey(res)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        }
        else {
            Some(ItemKey(self.0[..self.0.len() - 8].into()))
        }
    }

    /// Returns the depth of the key, zero being the root.
    pub fn depth(&self) -> usize {
        (self.0.len() - 1) / 8
    }

    pub fn is_root(&self) -> bool {
        self.0.len() == 1
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns whether `self` is `other` or one of its ancestors.
    pub fn contains(&self, other: &ItemKey) -> bool {
        other.0.starts_with(&self.0)
    }

    /// Returns the group index key for a child group of this key.
    ///
    /// Group values longer than [`MAX_INLINE_GROUP`] are cut short and
    /// followed by a hash of the full value to stay within the key size
    /// limits of LMDB.
    pub fn group_index_key(&self, group: &[u8]) -> Vec<u8> {
        let inline = group.len().min(MAX_INLINE_GROUP);
        let mut res = Vec::with_capacity(self.0.len() + inline + 9);
        res.push(GROUP_TAG);
        res.push(u8::try_from(self.depth() + 1).unwrap_or(u8::MAX));
        res.extend_from_slice(&self.0[1..]);
        res.extend_from_slice(&group[..inline]);
        if inline < group.len() {
            let mut hasher = DefaultHasher::new();
            group.hash(&mut hasher);
            res.extend_from_slice(&hasher.finish().to_be_bytes());
        }
        res
    }
}


//------------ GroupKey ------------------------------------------------------

/// The public identity of a row.
///
/// This is what callers hand back to open a group. It is the hex encoded
/// ordinal path of the row, the root being the empty string.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupKey(String);

impl GroupKey {
    pub fn root() -> Self {
        GroupKey(String::new())
    }

    pub fn item_key(&self) -> ItemKey {
        let mut res = vec![ITEM_TAG];
        // The string was checked on creation.
        res.extend(hex::decode(&self.0).unwrap_or_default());
        ItemKey(res)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&ItemKey> for GroupKey {
    fn from(key: &ItemKey) -> Self {
        GroupKey(hex::encode(&key.0[1..]))
    }
}

impl FromStr for GroupKey {
    type Err = InvalidGroupKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| InvalidGroupKey(s.into()))?;
        if bytes.len() % 8 != 0 {
            return Err(InvalidGroupKey(s.into()))
        }
        Ok(GroupKey(hex::encode(bytes)))
    }
}

impl TryFrom<String> for GroupKey {
    type Error = InvalidGroupKey;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        GroupKey::from_str(&s)
    }
}

impl From<GroupKey> for String {
    fn from(key: GroupKey) -> Self {
        key.0
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}


//------------ InvalidGroupKey -----------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InvalidGroupKey(String);

impl fmt::Display for InvalidGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid group key '{}'", self.0)
    }
}

impl std::error::Error for InvalidGroupKey { }


//------------ KeyBuilder ----------------------------------------------------

/// Compiles table settings and turns rows into their keys and cells.
#[derive(Clone, Debug)]
pub struct KeyBuilder {
    expressions: Vec<Expression>,
    levels: Vec<Vec<usize>>,
    detail: bool,
    event_fields: Option<(usize, usize)>,
}

impl KeyBuilder {
    pub fn new(
        table: &TableSettings,
        field_index: &FieldIndex,
        latest_event: bool,
    ) -> Result<Self, SettingsError> {
        table.verify()?;
        let expressions = table.columns.iter().map(|column| {
            match column.expression.as_deref() {
                Some(text) => Expression::compile(text, field_index).map_err(
                    |err| SettingsError::Expression {
                        column: column.id.clone(),
                        message: err.to_string(),
                    }
                ),
                None => Ok(Expression::Null)
            }
        }).collect::<Result<_, _>>()?;
        let event_fields = if latest_event {
            field_index.stream_id_field_pos().zip(
                field_index.event_id_field_pos()
            )
        }
        else {
            None
        };
        Ok(KeyBuilder {
            expressions,
            levels: table.group_levels(),
            detail: table.keeps_detail(),
            event_fields,
        })
    }

    /// Returns whether each column aggregates over rows.
    pub fn aggregates(&self) -> Vec<bool> {
        self.expressions.iter().map(Expression::is_aggregate).collect()
    }

    /// Evaluates a row.
    ///
    /// Fails if any of the column expressions fails.
    pub fn build(&self, row: &[Val]) -> Result<RowKeys, EvalError> {
        let cells = self.expressions.iter().map(|expr| {
            expr.evaluate(row)
        }).collect::<Result<Vec<_>, _>>()?;
        let groups = self.levels.iter().map(|level| {
            let values: Vec<_> = level.iter().map(|idx| {
                cells[*idx].value()
            }).collect();
            Val::encode_all(values.iter())
        }).collect();
        let event = self.event_fields.and_then(|(stream, event)| {
            Some(EventRef {
                stream_id: row.get(stream)?.as_i64()?,
                event_id: row.get(event)?.as_i64()?,
            })
        });
        Ok(RowKeys { cells, groups, detail: self.detail, event })
    }
}


//------------ RowKeys -------------------------------------------------------

/// The evaluated cells and group identities of a row.
#[derive(Clone, Debug)]
pub struct RowKeys {
    /// The single-row aggregate state of each column.
    pub cells: Vec<Generator>,

    /// The encoded group value at each depth below the root.
    pub groups: Vec<Vec<u8>>,

    /// Whether the row is also kept as a detail row.
    pub detail: bool,

    /// The latest event reference of the row, if one is kept.
    pub event: Option<EventRef>,
}

impl RowKeys {
    /// A rough estimate of the size of the row's cells.
    pub fn approx_size(&self) -> usize {
        self.cells.iter().map(Generator::approx_size).sum::<usize>()
            + self.groups.iter().map(Vec::len).sum::<usize>()
    }
}


//============ Tests =========================================================
