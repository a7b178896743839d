//! Various result store wide constants.

use std::time::Duration;


//------------ Config Files Paths -------------------------------------------

/// The default path to the config file.
pub const RESULTSTORE_DEFAULT_CONFIG_FILE: &str = "/etc/resultstore.conf";


//------------ Environment Variables ----------------------------------------

/// The environment variable with the log level.
///
/// The variable should contain the name of a [`log::LevelFilter`]. It will
/// be overwritten by the config file. The default is “info.”
pub const RESULTSTORE_ENV_LOG_LEVEL: &str = "RESULTSTORE_LOG_LEVEL";

/// The environment variable indicating the default storage URI.
///
/// It will be overwritten by the config file.
pub const RESULTSTORE_ENV_STORAGE_URI: &str = "RESULTSTORE_STORAGE_URI";


//------------ Storage -------------------------------------------------------

/// The storage URI used when neither config nor environment give one.
pub const DEFAULT_STORAGE_URI: &str = "local:///tmp/resultstore";

/// The default size of the memory map of each LMDB environment.
pub const DEFAULT_LMDB_MAP_SIZE: usize = 10 * 1024 * 1024 * 1024;

/// The default maximum number of concurrent readers per environment.
pub const DEFAULT_LMDB_MAX_READERS: u32 = 126;


//------------ Writer --------------------------------------------------------

/// The number of rows that can wait for the writer before producers block.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// The number of buffered rows that forces a commit.
pub const DEFAULT_WRITE_BUFFER_ROWS: usize = 10_000;

/// The approximate number of buffered bytes that forces a commit.
pub const DEFAULT_WRITE_BUFFER_BYTES: usize = 64 * 1024 * 1024;

/// The commit interval of interactive stores.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(200);

/// The commit interval of analytic stores.
pub const DEFAULT_ANALYTIC_FLUSH_INTERVAL: Duration = Duration::from_millis(2000);


//------------ Results -------------------------------------------------------

/// The default number of children returned per parent at each depth.
pub const DEFAULT_MAX_RESULTS: &[usize] = &[1_000_000, 100, 10, 1];

/// The default number of error messages retained per store.
pub const DEFAULT_MAX_ERROR_MESSAGES: usize = 100;
