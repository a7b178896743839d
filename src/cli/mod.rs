//! The `resultstore` command line tool.

pub mod options;
pub mod report;

use std::{error, fmt, io};
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use log::info;
use crate::config::{Config, ConfigError};
use crate::constants::RESULTSTORE_DEFAULT_CONFIG_FILE;
use crate::query::{
    DataStoreSettings, FieldIndex, QueryKey, TableSettings,
};
use crate::registry::ResultStoreRegistry;
use crate::store::{PageRequest, StoreError};
use self::options::{Command, Options, Query};
use self::report::{Report, ReportError, ReportFormat};


//------------ Client --------------------------------------------------------

/// Runs the command line tool.
pub struct Client;

impl Client {
    pub fn run(options: Options) -> Result<(), Error> {
        let config = Self::config(options.general.config.as_deref())?;
        config.init_logging()?;
        match options.command {
            Command::Query(query) => {
                let res = Self::query(config, query, options.general.format)?;
                print!("{res}");
                Ok(())
            }
        }
    }

    fn config(path: Option<&Path>) -> Result<Config, Error> {
        match path {
            Some(path) => Ok(Config::read_config(path)?),
            None => {
                let path = Path::new(RESULTSTORE_DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Ok(Config::read_config(path)?)
                }
                else {
                    Ok(Config::default())
                }
            }
        }
    }

    fn query(
        config: Config, query: Query, format: ReportFormat
    ) -> Result<String, Error> {
        let table = read_table(&query.table)?;
        let registry = ResultStoreRegistry::new(config.result_store)?;
        let mut settings = if query.analytic {
            DataStoreSettings::analytic()
        }
        else {
            DataStoreSettings::basic()
        };
        settings.max_keys = query.max_keys;

        let store = registry.get_or_create(
            &QueryKey::random(), "cli", &table, Arc::new(FieldIndex::new()),
            &settings, registry.error_consumer(),
        )?;

        let rows = Self::load_rows(&query.input, |row| store.add_json(&row))?;
        store.complete();
        while !store.await_completion(Duration::from_secs(1)) {
            info!("Waiting for the store to merge {rows} rows");
        }

        let mut request = PageRequest::new(query.offset, query.length);
        request.open.extend(query.open);
        request.open_all = query.open_all;
        let page = store.fetch(&request)?;
        let res = Report { table: &table, page: &page }.format(format)?;
        registry.close_all()?;
        Ok(res)
    }

    /// Reads JSON rows from a file and hands them to `add`.
    ///
    /// Returns the number of rows read.
    fn load_rows(
        path: &Path,
        mut add: impl FnMut(
            serde_json::Map<String, serde_json::Value>
        ) -> Result<(), StoreError>,
    ) -> Result<usize, Error> {
        let reader: Box<dyn BufRead> = if path == Path::new("-") {
            Box::new(BufReader::new(io::stdin()))
        }
        else {
            Box::new(BufReader::new(File::open(path).map_err(|err| {
                Error::io(format!("cannot open {}", path.display()), err)
            })?))
        };
        let mut count = 0;
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|err| {
                Error::io(format!("cannot read {}", path.display()), err)
            })?;
            let line = line.trim();
            if line.is_empty() {
                continue
            }
            let row = serde_json::from_str(line).map_err(|err| {
                Error::Input { line: idx + 1, err }
            })?;
            add(row)?;
            count += 1;
        }
        Ok(count)
    }
}

fn read_table(path: &Path) -> Result<TableSettings, Error> {
    let content = std::fs::read_to_string(path).map_err(|err| {
        Error::io(format!("cannot read {}", path.display()), err)
    })?;
    let table: TableSettings = toml::from_str(&content).map_err(|err| {
        Error::Table(format!("{}: {}", path.display(), err))
    })?;
    table.verify().map_err(|err| {
        Error::Table(format!("{}: {}", path.display(), err))
    })?;
    Ok(table)
}


//------------ Error ---------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    Config(ConfigError),
    Store(StoreError),
    Report(ReportError),
    Table(String),
    Input {
        line: usize,
        err: serde_json::Error,
    },
    Io {
        context: Cow<'static, str>,
        err: io::Error,
    },
}

impl Error {
    fn io(context: impl Into<Cow<'static, str>>, err: io::Error) -> Self {
        Error::Io { context: context.into(), err }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Config(err) => write!(f, "Configuration error: {err}"),
            Error::Store(err) => write!(f, "Result store error: {err}"),
            Error::Report(err) => err.fmt(f),
            Error::Table(msg) => write!(f, "Invalid table settings: {msg}"),
            Error::Input { line, err } => {
                write!(f, "Invalid row in line {line}: {err}")
            }
            Error::Io { context, err } => write!(f, "{context}: {err}"),
        }
    }
}

impl error::Error for Error { }

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::Store(err)
    }
}

impl From<ReportError> for Error {
    fn from(err: ReportError) -> Self {
        Error::Report(err)
    }
}


//============ Tests =========================================================
