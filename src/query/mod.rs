//! The query side of result stores: values, fields, settings, expressions.

pub use self::error_consumer::{
    CollectingErrorConsumer, ErrorConsumer, ErrorMessage, Severity
};
pub use self::expression::{EvalError, Expression, Generator, ParseError};
pub use self::field_index::FieldIndex;
pub use self::settings::{
    Column, DataStoreSettings, DataStoreSettingsBuilder, QueryKey,
    SettingsError, Sizes, Sort, SortDirection, StoreMode, TableSettings,
    TruncationPolicy,
};
pub use self::val::Val;

pub mod error_consumer;
pub mod expression;
pub mod field_index;
pub mod settings;
pub mod val;
