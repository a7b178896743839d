//! Configuration of result stores and logging.

use std::{env, fmt, io};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use log::{LevelFilter, error};
use serde::de;
use serde::{Deserialize, Deserializer};
use url::Url;
use crate::constants::{
    DEFAULT_STORAGE_URI, RESULTSTORE_ENV_LOG_LEVEL,
    RESULTSTORE_ENV_STORAGE_URI,
};
use crate::query::Sizes;
use crate::store::backends::LmdbSettings;


//------------ ConfigDefaults ------------------------------------------------

pub struct ConfigDefaults;

impl ConfigDefaults {
    fn log_level() -> LevelFilter {
        match env::var(RESULTSTORE_ENV_LOG_LEVEL) {
            Ok(level) => match LevelFilter::from_str(&level) {
                Ok(level) => level,
                Err(_) => {
                    eprintln!(
                        "Unrecognized value for log level in env var {}",
                        RESULTSTORE_ENV_LOG_LEVEL
                    );
                    LevelFilter::Info
                }
            },
            _ => LevelFilter::Info,
        }
    }
    fn log_type() -> LogType {
        LogType::Stderr
    }
    fn log_file() -> PathBuf {
        PathBuf::from("./resultstore.log")
    }

    fn lmdb_map_size() -> usize {
        crate::constants::DEFAULT_LMDB_MAP_SIZE
    }
    fn lmdb_max_readers() -> u32 {
        crate::constants::DEFAULT_LMDB_MAX_READERS
    }
    fn queue_capacity() -> usize {
        crate::constants::DEFAULT_QUEUE_CAPACITY
    }
    fn write_buffer_rows() -> usize {
        crate::constants::DEFAULT_WRITE_BUFFER_ROWS
    }
    fn write_buffer_bytes() -> usize {
        crate::constants::DEFAULT_WRITE_BUFFER_BYTES
    }
    fn flush_interval_ms() -> u64 {
        crate::constants::DEFAULT_FLUSH_INTERVAL.as_millis() as u64
    }
    fn analytic_flush_interval_ms() -> u64 {
        crate::constants::DEFAULT_ANALYTIC_FLUSH_INTERVAL.as_millis() as u64
    }
    fn max_error_messages() -> usize {
        crate::constants::DEFAULT_MAX_ERROR_MESSAGES
    }
    fn default_max_results() -> String {
        Sizes::new(crate::constants::DEFAULT_MAX_RESULTS.to_vec()).to_string()
    }
    fn default_store_size() -> String {
        String::new()
    }
    fn retain_on_close() -> bool {
        false
    }
    fn clean_on_startup() -> bool {
        true
    }
}


//------------ Config --------------------------------------------------------

/// The complete configuration of the `resultstore` binary.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(
        default = "ConfigDefaults::log_level",
        deserialize_with = "de_level_filter"
    )]
    pub log_level: LevelFilter,

    #[serde(default = "ConfigDefaults::log_type")]
    pub log_type: LogType,

    #[serde(default = "ConfigDefaults::log_file")]
    pub log_file: PathBuf,

    #[serde(default)]
    pub result_store: ResultStoreConfig,
}

impl Config {
    /// Reads the config file and verifies its content.
    pub fn read_config(file: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(file)?;
        let config: Config = toml::from_str(&content)?;
        config.verify().map_err(|err| {
            ConfigError::Other(format!(
                "Error parsing config file: {}, error: {}",
                file.display(), err
            ))
        })?;
        Ok(config)
    }

    pub fn verify(&self) -> Result<(), ConfigError> {
        self.result_store.verify()
    }

    pub fn init_logging(&self) -> Result<(), ConfigError> {
        match self.log_type {
            LogType::File => self.file_logger(&self.log_file),
            LogType::Stderr => self.stderr_logger(),
        }
    }

    /// Creates a stderr logger.
    fn stderr_logger(&self) -> Result<(), ConfigError> {
        self.fern_logger()
            .chain(io::stderr())
            .apply()
            .map_err(|e| {
                ConfigError::Other(
                    format!("Failed to init stderr logging: {}", e)
                )
            })
    }

    /// Creates a file logger using the file provided by `path`.
    fn file_logger(&self, path: &Path) -> Result<(), ConfigError> {
        let file = match fern::log_file(path) {
            Ok(file) => file,
            Err(err) => {
                let error_string = format!(
                    "Failed to open log file '{}': {}", path.display(), err
                );
                error!("{}", error_string.as_str());
                return Err(ConfigError::Other(error_string));
            }
        };
        self.fern_logger()
            .chain(file)
            .apply()
            .map_err(|e| {
                ConfigError::Other(
                    format!("Failed to init file logging: {}", e)
                )
            })
    }

    /// Creates and returns a fern logger.
    fn fern_logger(&self) -> fern::Dispatch {
        let show_target = self.log_level == LevelFilter::Trace
            || self.log_level == LevelFilter::Debug;
        fern::Dispatch::new()
            .format(move |out, message, record| {
                if show_target {
                    out.finish(format_args!(
                        "{} [{}] [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        record.target(),
                        message
                    ))
                } else {
                    out.finish(format_args!(
                        "{} [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        message
                    ))
                }
            })
            .level(self.log_level)
            .level_for("heed", self.log_level.min(LevelFilter::Warn))
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: ConfigDefaults::log_level(),
            log_type: ConfigDefaults::log_type(),
            log_file: ConfigDefaults::log_file(),
            result_store: ResultStoreConfig::default(),
        }
    }
}


//------------ ResultStoreConfig ---------------------------------------------

/// The configuration shared by all stores of a registry.
#[derive(Clone, Debug, Deserialize)]
pub struct ResultStoreConfig {
    /// Where stores keep their data.
    ///
    /// If missing, the URI is taken from the environment or a default.
    #[serde(default)]
    pub storage_uri: Option<Url>,

    #[serde(default = "ConfigDefaults::lmdb_map_size")]
    pub lmdb_map_size: usize,

    #[serde(default = "ConfigDefaults::lmdb_max_readers")]
    pub lmdb_max_readers: u32,

    #[serde(default = "ConfigDefaults::queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "ConfigDefaults::write_buffer_rows")]
    pub write_buffer_rows: usize,

    #[serde(default = "ConfigDefaults::write_buffer_bytes")]
    pub write_buffer_bytes: usize,

    #[serde(default = "ConfigDefaults::flush_interval_ms")]
    pub flush_interval_ms: u64,

    #[serde(default = "ConfigDefaults::analytic_flush_interval_ms")]
    pub analytic_flush_interval_ms: u64,

    #[serde(default = "ConfigDefaults::max_error_messages")]
    pub max_error_messages: usize,

    #[serde(default = "ConfigDefaults::default_max_results")]
    pub default_max_results: String,

    #[serde(default = "ConfigDefaults::default_store_size")]
    pub default_store_size: String,

    #[serde(default = "ConfigDefaults::retain_on_close")]
    pub retain_on_close: bool,

    #[serde(default = "ConfigDefaults::clean_on_startup")]
    pub clean_on_startup: bool,
}

impl ResultStoreConfig {
    /// Returns a config keeping everything in memory.
    pub fn memory() -> Self {
        ResultStoreConfig {
            storage_uri: Url::parse("memory:").ok(),
            .. Default::default()
        }
    }

    /// Returns a config keeping stores in LMDB below `dir`.
    pub fn local(dir: &Path) -> Result<Self, ConfigError> {
        let uri = Url::parse(&format!("local://{}", dir.display())).map_err(
            |err| {
                ConfigError::Other(format!(
                    "invalid storage directory {}: {}", dir.display(), err
                ))
            }
        )?;
        Ok(ResultStoreConfig {
            storage_uri: Some(uri),
            .. Default::default()
        })
    }

    /// Returns the storage URI to use.
    pub fn storage_uri(&self) -> Result<Url, ConfigError> {
        if let Some(uri) = self.storage_uri.as_ref() {
            return Ok(uri.clone())
        }
        let uri = env::var(RESULTSTORE_ENV_STORAGE_URI).unwrap_or_else(|_| {
            DEFAULT_STORAGE_URI.into()
        });
        Url::parse(&uri).map_err(|err| {
            ConfigError::Other(format!("invalid storage URI '{uri}': {err}"))
        })
    }

    pub fn lmdb_settings(&self) -> LmdbSettings {
        LmdbSettings {
            map_size: self.lmdb_map_size,
            max_readers: self.lmdb_max_readers,
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn analytic_flush_interval(&self) -> Duration {
        Duration::from_millis(self.analytic_flush_interval_ms)
    }

    pub fn default_max_results(&self) -> Result<Sizes, ConfigError> {
        Sizes::from_str(&self.default_max_results).map_err(|err| {
            ConfigError::Other(format!("default_max_results: {err}"))
        })
    }

    pub fn default_store_size(&self) -> Result<Sizes, ConfigError> {
        Sizes::from_str(&self.default_store_size).map_err(|err| {
            ConfigError::Other(format!("default_store_size: {err}"))
        })
    }

    pub fn verify(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::other("queue_capacity must be positive"))
        }
        if self.write_buffer_rows == 0 || self.write_buffer_bytes == 0 {
            return Err(ConfigError::other(
                "write buffer limits must be positive"
            ))
        }
        if self.flush_interval_ms == 0 || self.analytic_flush_interval_ms == 0
        {
            return Err(ConfigError::other("flush intervals must be positive"))
        }
        let uri = self.storage_uri()?;
        match uri.scheme() {
            "local" | "file" => {
                if !Path::new(uri.path()).is_absolute() {
                    return Err(ConfigError::Other(format!(
                        "storage URI '{uri}' must use an absolute path"
                    )))
                }
            }
            "memory" => { }
            other => {
                return Err(ConfigError::Other(format!(
                    "unsupported storage scheme '{other}'"
                )))
            }
        }
        self.default_max_results()?;
        self.default_store_size()?;
        Ok(())
    }
}

impl Default for ResultStoreConfig {
    fn default() -> Self {
        ResultStoreConfig {
            storage_uri: None,
            lmdb_map_size: ConfigDefaults::lmdb_map_size(),
            lmdb_max_readers: ConfigDefaults::lmdb_max_readers(),
            queue_capacity: ConfigDefaults::queue_capacity(),
            write_buffer_rows: ConfigDefaults::write_buffer_rows(),
            write_buffer_bytes: ConfigDefaults::write_buffer_bytes(),
            flush_interval_ms: ConfigDefaults::flush_interval_ms(),
            analytic_flush_interval_ms:
                ConfigDefaults::analytic_flush_interval_ms(),
            max_error_messages: ConfigDefaults::max_error_messages(),
            default_max_results: ConfigDefaults::default_max_results(),
            default_store_size: ConfigDefaults::default_store_size(),
            retain_on_close: ConfigDefaults::retain_on_close(),
            clean_on_startup: ConfigDefaults::clean_on_startup(),
        }
    }
}


//------------ LogType -------------------------------------------------------

/// The target to log to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LogType {
    Stderr,
    File,
}

impl<'de> Deserialize<'de> for LogType {
    fn deserialize<D>(d: D) -> Result<LogType, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(d)?;
        match string.as_str() {
            "stderr" => Ok(LogType::Stderr),
            "file" => Ok(LogType::File),
            _ => Err(de::Error::custom(format!(
                "expected \"stderr\" or \"file\", found : \"{}\"",
                string
            ))),
        }
    }
}

fn de_level_filter<'de, D>(d: D) -> Result<LevelFilter, D::Error>
where D: Deserializer<'de>
{
    let string = String::deserialize(d)?;
    LevelFilter::from_str(&string).map_err(de::Error::custom)
}


//------------ ConfigError ---------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    IoError(io::Error),
    TomlError(toml::de::Error),
    Other(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => e.fmt(f),
            ConfigError::TomlError(e) => e.fmt(f),
            ConfigError::Other(s) => s.fmt(f),
        }
    }
}

impl ConfigError {
    pub fn other(s: &str) -> ConfigError {
        ConfigError::Other(s.to_string())
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::IoError(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::TomlError(e)
    }
}

impl std::error::Error for ConfigError { }


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let config: Config = toml::from_str(r#"
            log_level = "debug"
            log_type = "file"
            log_file = "/var/log/resultstore.log"

            [result_store]
            storage_uri = "local:///var/lib/resultstore"
            lmdb_map_size = 1048576
            queue_capacity = 5
            default_max_results = "10,5"
            retain_on_close = true
        "#).unwrap();
        config.verify().unwrap();

        assert_eq!(config.log_level, LevelFilter::Debug);
        assert_eq!(config.log_type, LogType::File);
        let store = &config.result_store;
        assert_eq!(
            store.storage_uri().unwrap().as_str(),
            "local:///var/lib/resultstore"
        );
        assert_eq!(store.lmdb_map_size, 1_048_576);
        assert_eq!(store.queue_capacity, 5);
        assert_eq!(
            store.default_max_results().unwrap(), Sizes::new(vec![10, 5])
        );
        assert!(store.default_store_size().unwrap().is_unlimited());
        assert!(store.retain_on_close);
        assert!(store.clean_on_startup);
        assert_eq!(store.write_buffer_rows, 10_000);
        assert_eq!(store.flush_interval(), Duration::from_millis(200));
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.log_type, LogType::Stderr);
        assert_eq!(
            config.result_store.default_max_results,
            "1000000,100,10,1"
        );
        assert_eq!(
            config.result_store.analytic_flush_interval(),
            Duration::from_millis(2000)
        );
    }

    #[test]
    fn verify_rejects_bad_values() {
        let mut config = ResultStoreConfig::memory();
        config.verify().unwrap();

        config.queue_capacity = 0;
        assert!(config.verify().is_err());

        let mut config = ResultStoreConfig::memory();
        config.default_store_size = "1,a".into();
        assert!(config.verify().is_err());

        let mut config = ResultStoreConfig::memory();
        config.storage_uri = Url::parse("https://example.com/").ok();
        assert!(config.verify().is_err());
    }

    #[test]
    fn default_config_file() {
        let config = Config::read_config(
            Path::new("./defaults/resultstore.conf")
        ).unwrap();
        assert_eq!(config.log_type, LogType::Stderr);
        assert!(config.result_store.storage_uri.is_none());
        assert_eq!(config.result_store.queue_capacity, 10_000);
    }

    #[test]
    fn bad_log_type() {
        assert!(toml::from_str::<Config>("log_type = \"syslog\"").is_err());
        assert!(toml::from_str::<Config>("log_level = \"loud\"").is_err());
    }
}
