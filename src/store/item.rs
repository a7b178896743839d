//! The values kept under the keys of a store.

use serde::{Deserialize, Serialize};
use crate::query::{Generator, Val};


//------------ EventRef ------------------------------------------------------

/// A reference to an event by stream and event id.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct EventRef {
    pub stream_id: i64,
    pub event_id: i64,
}


//------------ Item ----------------------------------------------------------

/// An aggregate or detail row.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Item {
    /// The aggregate state of each column.
    pub cells: Vec<Generator>,

    /// The number of children, which is also the next child ordinal.
    #[serde(default)]
    pub children: u64,

    /// The greatest event reference merged into this row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_event: Option<EventRef>,
}

impl Item {
    pub fn new(cells: Vec<Generator>, latest_event: Option<EventRef>) -> Self {
        Item { cells, children: 0, latest_event }
    }

    /// Merges the cells of another row into this one.
    pub fn merge(
        &mut self, cells: Vec<Generator>, latest_event: Option<EventRef>
    ) {
        for (cell, other) in self.cells.iter_mut().zip(cells) {
            cell.merge(other)
        }
        if latest_event > self.latest_event {
            self.latest_event = latest_event
        }
    }

    /// Returns the current value of each column.
    pub fn values(&self) -> Vec<Val> {
        self.cells.iter().map(Generator::value).collect()
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}


//------------ StoreStats ----------------------------------------------------

/// Statistics kept alongside the rows of a store.
///
/// These are committed in the same transaction as the rows they describe.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct StoreStats {
    /// The number of keys stored, not counting the root.
    pub keys: u64,

    /// The number of rows merged into the store.
    pub rows: u64,

    /// The number of rows dropped entirely.
    pub rejected: u64,

    /// Whether any key was dropped because of a storage limit.
    pub truncated: bool,

    /// The number of commits so far.
    pub commits: u64,
}

impl StoreStats {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_latest_event() {
        let mut item = Item::new(
            vec![Generator::Count(1)],
            Some(EventRef { stream_id: 2, event_id: 1 })
        );
        item.merge(
            vec![Generator::Count(2)],
            Some(EventRef { stream_id: 1, event_id: 9 })
        );
        item.merge(vec![Generator::Count(1)], None);
        assert_eq!(item.values(), vec![Val::Long(4)]);
        assert_eq!(
            item.latest_event, Some(EventRef { stream_id: 2, event_id: 1 })
        );
    }

    #[test]
    fn encoding_is_compact() {
        let item = Item::new(vec![Generator::Count(3)], None);
        let data = item.encode().unwrap();
        assert!(!String::from_utf8(data.clone()).unwrap().contains("latest"));
        assert_eq!(Item::decode(&data).unwrap(), item);
    }
}
