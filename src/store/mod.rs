//! Result stores: ingest, aggregation, storage and paging.

pub use self::completion::CompletionState;
pub use self::data_store::DataStore;
pub use self::error::StoreError;
pub use self::item::{EventRef, StoreStats};
pub use self::key::{GroupKey, InvalidGroupKey};
pub use self::pager::{ColumnSort, Page, PageRequest, Row, RowIter, Snapshot};
pub use self::state::StoreState;

pub mod backends;
pub mod completion;
pub mod data_store;
pub mod error;
pub mod item;
pub mod key;
pub mod pager;
pub mod state;

mod ingest;
mod writer;
