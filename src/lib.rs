//! A store for the aggregated results of running searches.
//!
//! Rows produced by a search are fed into a [`DataStore`], which groups
//! and aggregates them in a single writer thread and commits them in
//! batches to an LMDB environment or an in-memory map. Pages of results
//! can be read from consistent snapshots at any time while the search is
//! still running.
//!
//! [`DataStore`]: store::DataStore

pub mod cli;
pub mod config;
pub mod constants;
pub mod query;
pub mod registry;
pub mod store;
