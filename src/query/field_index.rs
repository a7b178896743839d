//! Mapping of field names to column positions.

use std::collections::HashMap;
use std::sync::RwLock;


//------------ Special field names -------------------------------------------

pub const FALLBACK_TIME_FIELD: &str = "EventTime";
pub const DEFAULT_TIME_FIELD: &str = "__time__";
pub const FALLBACK_STREAM_ID_FIELD: &str = "StreamId";
pub const DEFAULT_STREAM_ID_FIELD: &str = "__stream_id__";
pub const FALLBACK_EVENT_ID_FIELD: &str = "EventId";
pub const DEFAULT_EVENT_ID_FIELD: &str = "__event_id__";


//------------ FieldIndex ----------------------------------------------------

/// A stable mapping from field names to row positions.
///
/// Positions are handed out densely starting at zero in the order fields
/// are first asked for and never change afterwards. The index is shared
/// between the threads producing rows and the store itself.
#[derive(Debug, Default)]
pub struct FieldIndex {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    positions: HashMap<String, usize>,
    fields: Vec<String>,
}

impl FieldIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an index with the given fields at positions in order.
    pub fn with_fields<I, S>(fields: I) -> Self
    where I: IntoIterator<Item = S>, S: Into<String> {
        let res = Self::new();
        for field in fields {
            res.create(field);
        }
        res
    }

    /// Returns the position of a field, adding it if necessary.
    pub fn create(&self, field: impl Into<String>) -> usize {
        let field = field.into();
        if let Some(pos) = self.pos(&field) {
            return pos
        }
        let mut inner = self.inner.write().expect("poisoned lock");
        if let Some(pos) = inner.positions.get(&field) {
            return *pos
        }
        let pos = inner.fields.len();
        inner.fields.push(field.clone());
        inner.positions.insert(field, pos);
        pos
    }

    /// Returns the position of a field if it is known.
    pub fn pos(&self, field: &str) -> Option<usize> {
        self.inner.read().expect("poisoned lock").positions.get(field).copied()
    }

    /// Returns the name of the field at the given position.
    pub fn field(&self, pos: usize) -> Option<String> {
        self.inner.read().expect("poisoned lock").fields.get(pos).cloned()
    }

    /// Returns all field names in position order.
    pub fn fields(&self) -> Vec<String> {
        self.inner.read().expect("poisoned lock").fields.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("poisoned lock").fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the position of the event time field if present.
    pub fn time_field_pos(&self) -> Option<usize> {
        self.special_pos(DEFAULT_TIME_FIELD, FALLBACK_TIME_FIELD)
    }

    /// Returns the position of the stream id field if present.
    pub fn stream_id_field_pos(&self) -> Option<usize> {
        self.special_pos(DEFAULT_STREAM_ID_FIELD, FALLBACK_STREAM_ID_FIELD)
    }

    /// Returns the position of the event id field if present.
    pub fn event_id_field_pos(&self) -> Option<usize> {
        self.special_pos(DEFAULT_EVENT_ID_FIELD, FALLBACK_EVENT_ID_FIELD)
    }

    fn special_pos(&self, default: &str, fallback: &str) -> Option<usize> {
        self.pos(default).or_else(|| self.pos(fallback))
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use super::*;

    #[test]
    fn positions_are_dense_and_stable() {
        let index = FieldIndex::new();
        assert!(index.is_empty());
        assert_eq!(index.create("Feed"), 0);
        assert_eq!(index.create("Count"), 1);
        assert_eq!(index.create("Feed"), 0);
        assert_eq!(index.pos("Count"), Some(1));
        assert_eq!(index.pos("Other"), None);
        assert_eq!(index.field(1).as_deref(), Some("Count"));
        assert_eq!(index.fields(), vec!["Feed", "Count"]);
    }

    #[test]
    fn special_fields_fall_back() {
        let index = FieldIndex::with_fields(["EventTime", "StreamId"]);
        assert_eq!(index.time_field_pos(), Some(0));
        assert_eq!(index.stream_id_field_pos(), Some(1));
        assert_eq!(index.event_id_field_pos(), None);

        index.create(DEFAULT_TIME_FIELD);
        assert_eq!(index.time_field_pos(), Some(2));
    }

    #[test]
    fn concurrent_create() {
        let index = Arc::new(FieldIndex::new());
        let handles: Vec<_> = (0..8).map(|_| {
            let index = index.clone();
            thread::spawn(move || {
                (0..50).map(|i| index.create(format!("f{i}"))).collect::<Vec<_>>()
            })
        }).collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(index.len(), 50);
        for res in &results[1..] {
            assert_eq!(res, &results[0]);
        }
    }
}
