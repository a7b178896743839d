//! The error type of data stores.

use std::{error, fmt, io};
use std::borrow::Cow;
use crate::config::ConfigError;
use crate::query::SettingsError;
use super::backends;


//------------ StoreError ----------------------------------------------------

#[derive(Debug)]
pub enum StoreError {
    /// The store has been closed.
    StoreClosed,

    /// The store has been sealed and takes no more rows.
    StoreSealed,

    /// The row stream has been completed and takes no more rows.
    StreamClosed,

    /// The store has failed fatally.
    Failed(String),

    /// The settings of a new store are invalid.
    Settings(SettingsError),

    /// The configuration is invalid.
    Config(ConfigError),

    /// A read request is invalid.
    InvalidRequest(String),

    /// Stored data could not be encoded or decoded.
    Encoding(String),

    Backend(backends::Error),

    Io {
        context: Cow<'static, str>,
        err: io::Error,
    },
}

impl StoreError {
    pub fn io(context: impl Into<Cow<'static, str>>, err: io::Error) -> Self {
        StoreError::Io { context: context.into(), err }
    }

    pub fn encoding(context: &str, err: impl fmt::Display) -> Self {
        StoreError::Encoding(format!("{context}: {err}"))
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        StoreError::InvalidRequest(msg.into())
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StoreError::StoreClosed => f.write_str("store has been closed"),
            StoreError::StoreSealed => f.write_str("store has been sealed"),
            StoreError::StreamClosed => {
                f.write_str("row stream has already been completed")
            }
            StoreError::Failed(msg) => write!(f, "store has failed: {msg}"),
            StoreError::Settings(err) => write!(f, "invalid settings: {err}"),
            StoreError::Config(err) => {
                write!(f, "invalid configuration: {err}")
            }
            StoreError::InvalidRequest(msg) => {
                write!(f, "invalid request: {msg}")
            }
            StoreError::Encoding(msg) => write!(f, "encoding error: {msg}"),
            StoreError::Backend(err) => write!(f, "storage error: {err}"),
            StoreError::Io { context, err } => write!(f, "{context}: {err}"),
        }
    }
}

impl error::Error for StoreError { }

impl From<backends::Error> for StoreError {
    fn from(err: backends::Error) -> Self {
        StoreError::Backend(err)
    }
}

impl From<SettingsError> for StoreError {
    fn from(err: SettingsError) -> Self {
        StoreError::Settings(err)
    }
}

impl From<ConfigError> for StoreError {
    fn from(err: ConfigError) -> Self {
        StoreError::Config(err)
    }
}
