//! The command line options of the `resultstore` binary.

use std::path::PathBuf;
use clap::Parser;
use crate::store::GroupKey;
use super::report::ReportFormat;


//------------ Options -------------------------------------------------------

/// The command line options for the result store tool.
#[derive(clap::Parser)]
#[command(
    version,
    about = "Aggregates search result rows and shows pages of results.",
)]
pub struct Options {
    #[command(flatten)]
    pub general: GeneralOptions,

    #[command(subcommand)]
    pub command: Command,
}

impl Options {
    /// Creates the options from the process arguments.
    ///
    /// If the arguments won’t result in usable options, exits the process.
    pub fn from_args() -> Self {
        Self::parse()
    }
}


//------------ GeneralOptions ------------------------------------------------

#[derive(clap::Args)]
pub struct GeneralOptions {
    /// The config file to use.
    ///
    /// If missing, the default config file is used if it exists.
    #[arg(short, long, env = "RESULTSTORE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Report format
    #[arg(
        short, long,
        env = "RESULTSTORE_FORMAT",
        default_value = "text",
    )]
    pub format: ReportFormat,
}


//------------ Command -------------------------------------------------------

#[derive(clap::Subcommand)]
pub enum Command {
    /// Aggregate rows from a file and print a page of results.
    Query(Query),
}


//------------ Query ---------------------------------------------------------

#[derive(clap::Args)]
pub struct Query {
    /// TOML file with the table settings
    #[arg(short, long)]
    pub table: PathBuf,

    /// File with one JSON object per row, '-' for stdin
    #[arg(short, long)]
    pub input: PathBuf,

    /// Number of rows to skip
    #[arg(long, default_value = "0")]
    pub offset: usize,

    /// Maximum number of rows to print
    #[arg(long, default_value = "100")]
    pub length: usize,

    /// Group key of a row to show the children of
    #[arg(long)]
    pub open: Vec<GroupKey>,

    /// Show all rows, whether opened or not
    #[arg(long)]
    pub open_all: bool,

    /// Use the settings of a store feeding analytic rules
    #[arg(long)]
    pub analytic: bool,

    /// Maximum number of distinct keys to store
    #[arg(long)]
    pub max_keys: Option<u64>,
}
