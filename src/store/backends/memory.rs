//! In-memory storage.
//!
//! The committed state of a store is an ordered map behind an `Arc`. A read
//! snapshot simply clones the `Arc`, a commit replaces the map, copying it
//! first if snapshots of the previous state are still around.

use std::{error, fmt};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use url::Url;
use super::{
    Error as SuperError,
    WriteTransaction as SuperWriteTransaction,
};


//------------ System --------------------------------------------------------

#[derive(Debug, Default)]
pub struct System {
    locations: Mutex<HashMap<Option<u64>, Location>>,
}

impl System {
    pub fn location(&self, uri: &Url) -> Result<Option<Location>, Error> {
        let Some(uri) = Uri::parse_uri(uri)? else {
            return Ok(None)
        };
        let mut locations = self.locations.lock().expect("poisoned lock");
        Ok(Some(locations.entry(uri.path).or_default().clone()))
    }
}


//------------ Location ------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct Location {
    stores: Arc<Mutex<HashMap<String, Arc<MemoryStore>>>>,
}

impl Location {
    fn stores(&self) -> MutexGuard<'_, HashMap<String, Arc<MemoryStore>>> {
        self.stores.lock().expect("poisoned lock")
    }

    pub fn open(&self, name: &str) -> Result<Store, Error> {
        let store = self.stores().entry(name.into()).or_default().clone();
        Ok(Store { name: name.into(), location: self.clone(), store })
    }

    pub fn exists(&self, name: &str) -> Result<bool, Error> {
        Ok(self.stores().contains_key(name))
    }

    pub fn clean(&self) -> Result<Vec<String>, Error> {
        Ok(self.stores().drain().map(|(name, _)| name).collect())
    }
}


//------------ Store ---------------------------------------------------------

#[derive(Debug)]
pub struct Store {
    name: String,
    location: Location,
    store: Arc<MemoryStore>,
}

impl Store {
    pub fn read(&self) -> Result<ReadTransaction, Error> {
        Ok(ReadTransaction { values: self.store.committed() })
    }

    pub fn write<F, T>(&self, op: F) -> Result<T, SuperError>
    where
        F: for<'a> FnOnce(&mut SuperWriteTransaction<'a>) -> Result<T, SuperError>
    {
        let _lock = self.store.write_lock.lock().expect("poisoned lock");
        let mut txn = SuperWriteTransaction::from(WriteTransaction {
            base: self.store.committed(),
            pending: BTreeMap::new(),
            _store: self,
        });
        let res = op(&mut txn)?;
        let WriteTransaction { base, pending, .. } = {
            WriteTransaction::try_from(txn).map_err(|_| {
                Error::WrongTransaction
            })?
        };
        drop(base);
        let mut values = self.store.values.lock().expect("poisoned lock");
        Arc::make_mut(&mut *values).extend(pending);
        Ok(res)
    }

    pub fn close(self) -> Result<(), Error> {
        Ok(())
    }

    pub fn destroy(self) -> Result<(), Error> {
        self.location.stores().remove(&self.name);
        Ok(())
    }
}


//------------ ReadTransaction -----------------------------------------------

pub struct ReadTransaction {
    values: Arc<MemoryValues>,
}

impl ReadTransaction {
    pub fn get(&self, key: &[u8]) -> Result<Option<&[u8]>, Error> {
        Ok(self.values.get(key).map(Vec::as_slice))
    }
}


//------------ WriteTransaction ----------------------------------------------

pub struct WriteTransaction<'a> {
    base: Arc<MemoryValues>,
    pending: MemoryValues,
    _store: &'a Store,
}

impl WriteTransaction<'_> {
    pub fn get(&self, key: &[u8]) -> Result<Option<&[u8]>, Error> {
        Ok(
            self.pending.get(key).or_else(|| self.base.get(key))
                .map(Vec::as_slice)
        )
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.pending.insert(key.into(), value.into());
        Ok(())
    }
}


//------------ MemoryValues --------------------------------------------------

type MemoryValues = BTreeMap<Vec<u8>, Vec<u8>>;


//------------ MemoryStore ---------------------------------------------------

#[derive(Debug, Default)]
struct MemoryStore {
    values: Mutex<Arc<MemoryValues>>,
    write_lock: Mutex<()>,
}

impl MemoryStore {
    fn committed(&self) -> Arc<MemoryValues> {
        self.values.lock().expect("poisoned lock").clone()
    }
}


//------------ Uri -----------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct Uri {
    path: Option<u64>,
}

impl Uri {
    pub fn parse_uri(uri: &Url) -> Result<Option<Uri>, Error> {
        if uri.scheme() != "memory" {
            return Ok(None)
        }
        if uri.path().is_empty() {
            return Ok(Some(Uri { path: None }))
        }
        if let Ok(path) = u64::from_str(uri.path()) {
            return Ok(Some(Uri { path: Some(path) }))
        }
        Err(Error::BadPath(uri.path().into()))
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("memory:")?;
        if let Some(path) = self.path {
            write!(f, "{path}")?
        }
        Ok(())
    }
}


//------------ Error ---------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    BadPath(String),
    WrongTransaction,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::BadPath(path) => {
                write!(f, "invalid memory storage path '{path}'")
            }
            Error::WrongTransaction => {
                f.write_str("write transaction of wrong engine")
            }
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
            Uri::parse_uri(&Url::parse("memory:").unwrap()).unwrap(),
            Some(Uri { path: None })
        );
        assert_eq!(
            Uri::parse_uri(&Url::parse("memory:12").unwrap()).unwrap(),
            Some(Uri { path: Some(12) })
        );
        assert!(Uri::parse_uri(&Url::parse("memory:abc").unwrap()).is_err());
        assert_eq!(
            Uri::parse_uri(&Url::parse("local:///tmp").unwrap()).unwrap(),
            None
        );
        assert_eq!(Uri { path: Some(3) }.to_string(), "memory:3");
    }

    #[test]
    fn locations_are_separate() {
        let system = System::default();
        let one = system.location(&Url::parse("memory:1").unwrap())
            .unwrap().unwrap();
        let two = system.location(&Url::parse("memory:2").unwrap())
            .unwrap().unwrap();
        one.open("store").unwrap();
        assert!(one.exists("store").unwrap());
        assert!(!two.exists("store").unwrap());
    }
}
