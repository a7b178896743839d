//! Disk-backed storage in LMDB environments.
//!
//! Each store lives in its own LMDB environment in a directory below the
//! base directory given by the storage URI.

use std::{error, fmt, fs, io};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use heed::types::Bytes;
use log::{debug, info};
use url::Url;
use super::{
    Error as SuperError,
    WriteTransaction as SuperWriteTransaction,
};


//------------ LmdbSettings --------------------------------------------------

/// Options for opening LMDB environments.
#[derive(Clone, Copy, Debug)]
pub struct LmdbSettings {
    /// The maximum size of the memory map of each environment in bytes.
    pub map_size: usize,

    /// The maximum number of concurrent read transactions per environment.
    pub max_readers: u32,
}

impl Default for LmdbSettings {
    fn default() -> Self {
        LmdbSettings {
            map_size: crate::constants::DEFAULT_LMDB_MAP_SIZE,
            max_readers: crate::constants::DEFAULT_LMDB_MAX_READERS,
        }
    }
}


//------------ System --------------------------------------------------------

#[derive(Debug, Default)]
pub struct System {
    settings: LmdbSettings,
}

impl System {
    pub fn new(settings: LmdbSettings) -> Self {
        System { settings }
    }

    pub fn location(&self, uri: &Url) -> Result<Option<Location>, Error> {
        Ok(Uri::parse_uri(uri)?.map(|uri| {
            Location { base: uri.path, settings: self.settings }
        }))
    }
}


//------------ Location ------------------------------------------------------

#[derive(Debug)]
pub struct Location {
    /// The base directory.
    ///
    /// Every store has its own directory directly under this one.
    base: PathBuf,

    settings: LmdbSettings,
}

impl Location {
    pub fn open(&self, name: &str) -> Result<Store, Error> {
        Store::open(self.base.join(name), self.settings)
    }

    pub fn exists(&self, name: &str) -> Result<bool, Error> {
        Ok(self.base.join(name).is_dir())
    }

    pub fn clean(&self) -> Result<Vec<String>, Error> {
        let dir = match fs::read_dir(&self.base) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(Vec::new())
            }
            Err(err) => {
                return Err(Error::io(
                    format!(
                        "cannot read directory {}", self.base.display()
                    ),
                    err
                ))
            }
        };
        let mut res = Vec::new();
        for entry in dir {
            let entry = entry.map_err(|err| {
                Error::io(
                    format!("cannot read directory {}", self.base.display()),
                    err
                )
            })?;
            let path = entry.path();
            info!("Deleting leftover result store {}", path.display());
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            }
            else {
                fs::remove_file(&path)
            };
            removed.map_err(|err| {
                Error::io(format!("cannot delete {}", path.display()), err)
            })?;
            res.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(res)
    }
}


//------------ Store ---------------------------------------------------------

pub struct Store {
    env: Env,
    db: Database<Bytes, Bytes>,
    path: PathBuf,
}

impl Store {
    fn open(path: PathBuf, settings: LmdbSettings) -> Result<Self, Error> {
        fs::create_dir_all(&path).map_err(|err| {
            Error::io(
                format!("cannot create directory {}", path.display()), err
            )
        })?;

        // Safety: every store gets its own directory and the environment
        // is only ever opened once per directory.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(settings.map_size)
                .max_readers(settings.max_readers)
                .max_dbs(1)
                .open(&path)
                .map_err(|err| Error::lmdb(&path, err))?
        };

        let mut wtxn = env.write_txn().map_err(|err| Error::lmdb(&path, err))?;
        let db = env.create_database(&mut wtxn, Some("results")).map_err(|err| {
            Error::lmdb(&path, err)
        })?;
        wtxn.commit().map_err(|err| Error::lmdb(&path, err))?;

        debug!("Opened LMDB environment in {}", path.display());
        Ok(Store { env, db, path })
    }

    pub fn read(&self) -> Result<ReadTransaction, Error> {
        Ok(ReadTransaction {
            txn: self.env.clone().static_read_txn().map_err(|err| {
                Error::lmdb(&self.path, err)
            })?,
            db: self.db,
        })
    }

    pub fn write<F, T>(&self, op: F) -> Result<T, SuperError>
    where
        F: for<'a> FnOnce(&mut SuperWriteTransaction<'a>) -> Result<T, SuperError>
    {
        let txn = self.env.write_txn().map_err(|err| {
            Error::lmdb(&self.path, err)
        })?;
        let mut txn = SuperWriteTransaction::from(
            WriteTransaction { txn, db: self.db, path: &self.path }
        );
        let res = op(&mut txn)?;
        let txn = WriteTransaction::try_from(txn).map_err(|_| {
            Error::Other("write transaction of wrong engine".into())
        })?;
        txn.txn.commit().map_err(|err| Error::lmdb(&self.path, err))?;
        Ok(res)
    }

    /// Closes the environment.
    ///
    /// The environment is only really closed once the last outstanding
    /// read transaction has been dropped.
    pub fn close(self) -> Result<(), Error> {
        drop(self.env.prepare_for_closing());
        debug!("Closed LMDB environment in {}", self.path.display());
        Ok(())
    }

    pub fn destroy(self) -> Result<(), Error> {
        let path = self.path.clone();
        self.close()?;
        fs::remove_dir_all(&path).map_err(|err| {
            Error::io(format!("cannot delete {}", path.display()), err)
        })?;
        debug!("Deleted LMDB environment in {}", path.display());
        Ok(())
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Store").field("path", &self.path).finish()
    }
}


//------------ ReadTransaction -----------------------------------------------

pub struct ReadTransaction {
    txn: RoTxn<'static>,
    db: Database<Bytes, Bytes>,
}

impl ReadTransaction {
    pub fn get(&self, key: &[u8]) -> Result<Option<&[u8]>, Error> {
        self.db.get(&self.txn, key).map_err(Error::Lmdb)
    }
}


//------------ WriteTransaction ----------------------------------------------

pub struct WriteTransaction<'a> {
    txn: RwTxn<'a>,
    db: Database<Bytes, Bytes>,
    path: &'a Path,
}

impl WriteTransaction<'_> {
    pub fn get(&self, key: &[u8]) -> Result<Option<&[u8]>, Error> {
        self.db.get(&self.txn, key).map_err(|err| Error::lmdb(self.path, err))
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.db.put(&mut self.txn, key, value).map_err(|err| {
            Error::lmdb(self.path, err)
        })
    }
}


//------------ Uri -----------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct Uri {
    path: PathBuf,
}

impl Uri {
    pub fn parse_uri(uri: &Url) -> Result<Option<Uri>, Error> {
        if uri.scheme() != "file" && uri.scheme() != "local" {
            return Ok(None)
        }

        if !uri.authority().is_empty() {
            return Err(Error::BadUri(format!(
                "unexpected authority '{}' in '{}'", uri.authority(), uri
            )))
        }

        let path = PathBuf::from(uri.path());
        if !path.is_absolute() {
            return Err(Error::BadUri(format!(
                "relative path '{}' in '{}'", path.display(), uri
            )))
        }
        Ok(Some(Uri { path }))
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "local://{}", self.path.display())
    }
}


//------------ Error ---------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    Io {
        context: Cow<'static, str>,
        err: io::Error,
    },
    Lmdb(heed::Error),
    LmdbAt {
        path: PathBuf,
        err: heed::Error,
    },
    BadUri(String),
    Other(String),
}

impl Error {
    fn io(context: impl Into<Cow<'static, str>>, err: io::Error) -> Self {
        Error::Io { context: context.into(), err }
    }

    fn lmdb(path: &Path, err: heed::Error) -> Self {
        Error::LmdbAt { path: path.into(), err }
    }

    /// Returns whether the error is caused by a full memory map.
    pub fn is_map_full(&self) -> bool {
        matches!(
            self,
            Error::Lmdb(heed::Error::Mdb(heed::MdbError::MapFull))
            | Error::LmdbAt {
                err: heed::Error::Mdb(heed::MdbError::MapFull), ..
            }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io { context, err } => write!(f, "{context}: {err}"),
            Error::Lmdb(err) => write!(f, "LMDB error: {err}"),
            Error::LmdbAt { path, err } if self.is_map_full() => {
                write!(f,
                    "LMDB map full in {}, increase lmdb_map_size: {err}",
                    path.display()
                )
            }
            Error::LmdbAt { path, err } => {
                write!(f, "LMDB error in {}: {err}", path.display())
            }
            Error::BadUri(msg) => write!(f, "invalid storage URI: {msg}"),
            Error::Other(msg) => f.write_str(msg),
        }
    }
}

impl error::Error for Error { }


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_uri() {
        assert_eq!(
            Uri::parse_uri(&Url::parse("local:///tmp/store").unwrap())
                .unwrap(),
            Some(Uri { path: "/tmp/store".into() })
        );
        assert_eq!(
            Uri::parse_uri(&Url::parse("memory:").unwrap()).unwrap(),
            None
        );
        assert!(
            Uri::parse_uri(&Url::parse("local://host/tmp").unwrap()).is_err()
        );
    }

    #[test]
    fn clean_missing_base() {
        let dir = tempfile::tempdir().unwrap();
        let location = Location {
            base: dir.path().join("missing"),
            settings: LmdbSettings::default(),
        };
        assert!(location.clean().unwrap().is_empty());
    }
}
