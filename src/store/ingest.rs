//! Accepting rows from producers.

use std::ptr;
use std::sync::{Arc, Mutex, RwLock};
use crossbeam_channel::Sender;
use log::debug;
use crate::query::{FieldIndex, Severity, Val};
use super::error::StoreError;
use super::state::Shared;
use super::writer::Message;


//------------ RowSource -----------------------------------------------------

/// The producer side of a store's queue.
///
/// Adding a row blocks while the queue is full, so producers are slowed
/// down to the pace of the writer.
#[derive(Debug)]
pub(crate) struct RowSource {
    sender: Mutex<Option<Sender<Message>>>,

    /// Orders rows against the end of the stream.
    ///
    /// Producers hold it shared while checking and queueing a row, the
    /// completing thread holds it exclusively while queueing the end
    /// marker. No row can be queued behind the marker.
    gate: RwLock<()>,

    field_index: Arc<FieldIndex>,
    shared: Arc<Shared>,
}

impl RowSource {
    pub fn new(
        sender: Sender<Message>,
        field_index: Arc<FieldIndex>,
        shared: Arc<Shared>,
    ) -> Self {
        RowSource {
            sender: Mutex::new(Some(sender)),
            gate: RwLock::new(()),
            field_index,
            shared,
        }
    }

    pub fn field_index(&self) -> &Arc<FieldIndex> {
        &self.field_index
    }

    fn sender(&self) -> Option<Sender<Message>> {
        self.sender.lock().expect("poisoned lock").clone()
    }

    /// Adds a row with values in the positions of the store's field index.
    pub fn add(&self, row: Vec<Val>) -> Result<(), StoreError> {
        let _gate = self.gate.read().expect("poisoned lock");
        if let Err(err) = self.shared.check_writable() {
            return Err(self.reject(err))
        }
        let Some(sender) = self.sender() else {
            return Err(self.reject(StoreError::StoreClosed))
        };
        if sender.send(Message::Row(row)).is_err() {
            // The writer has gone away, so the state tells us why.
            let err = match self.shared.check_writable() {
                Err(err) => err,
                Ok(()) => StoreError::StreamClosed,
            };
            return Err(self.reject(err))
        }
        Ok(())
    }

    /// Adds a row with values in the positions of another field index.
    pub fn accept(
        &self, values: &[Val], field_index: &FieldIndex
    ) -> Result<(), StoreError> {
        if ptr::eq(field_index, self.field_index.as_ref()) {
            return self.add(values.to_vec())
        }
        let mut row = vec![Val::Null; self.field_index.len()];
        for (pos, val) in values.iter().enumerate() {
            let Some(name) = field_index.field(pos) else {
                continue
            };
            if let Some(target) = self.field_index.pos(&name) {
                if let Some(slot) = row.get_mut(target) {
                    *slot = val.clone();
                }
            }
        }
        self.add(row)
    }

    /// Adds a row given as field names and values.
    ///
    /// Fields the store does not use are ignored.
    pub fn add_named<'a>(
        &self, values: impl IntoIterator<Item = (&'a str, Val)>
    ) -> Result<(), StoreError> {
        let mut row = vec![Val::Null; self.field_index.len()];
        for (name, val) in values {
            if let Some(slot) = self.field_index.pos(name).and_then(|pos| {
                row.get_mut(pos)
            }) {
                *slot = val;
            }
        }
        self.add(row)
    }

    /// Adds a row given as a JSON object.
    pub fn add_json(
        &self, object: &serde_json::Map<String, serde_json::Value>
    ) -> Result<(), StoreError> {
        self.add_named(object.iter().map(|(name, value)| {
            (name.as_str(), Val::from_json(value))
        }))
    }

    /// Signals the end of the row stream.
    ///
    /// Rows already queued are still merged.
    pub fn complete(&self) {
        let _gate = self.gate.write().expect("poisoned lock");
        if !self.shared.close_stream() {
            return
        }
        debug!("Row stream of result store {} complete", self.shared.name());
        if let Some(sender) = self.sender() {
            // An error means the writer has stopped already.
            let _ = sender.send(Message::Complete);
        }
    }

    /// Drops the producer side of the queue.
    pub fn disconnect(&self) {
        self.sender.lock().expect("poisoned lock").take();
    }

    fn reject(&self, err: StoreError) -> StoreError {
        if !matches!(err, StoreError::Failed(_)) {
            self.shared.errors().add(
                Severity::Warning, format!("Row rejected: {err}")
            );
        }
        err
    }
}


//============ Tests =========================================================
