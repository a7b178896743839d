//! Ordered key-value engines holding the committed state of a store.
//!
//! Every engine offers the same small interface: a store is opened by name
//! below a storage URI, writes happen in exactly one transaction at a time
//! and reads happen through snapshots that never observe a partially
//! committed write.


//============ Modules =======================================================
//
// These need to be added to the macro invocation at the very bottom of this
// file.

mod lmdb;
mod memory;

pub use self::lmdb::LmdbSettings;


//============ Backend Enum ==================================================

use std::{error, fmt};
use url::Url;

macro_rules! store {
    ( $( ( $variant:ident, $module:ident ) )* ) => {

        //------------ BackendSystem -----------------------------------------

        /// Access to all engines.
        ///
        /// Which engine is used for a store is determined by the scheme of
        /// its storage URI.
        #[derive(Debug, Default)]
        pub struct BackendSystem {
            $(
                $module: self::$module::System,
            )*
        }

        impl BackendSystem {
            pub fn new(lmdb: LmdbSettings) -> Self {
                BackendSystem {
                    lmdb: self::lmdb::System::new(lmdb),
                    .. Default::default()
                }
            }

            fn location(
                &self, uri: &Url
            )  -> Result<Location, Error> {
                $(
                    if let Some(location) = self.$module.location(uri)? {
                        return Ok(Location::$variant(location))
                    }
                )*
                Err(Error::UnknownScheme(uri.scheme().into()))
            }

            /// Checks that a storage URI refers to an available engine.
            pub fn check_uri(&self, storage_uri: &Url) -> Result<(), Error> {
                self.location(storage_uri).map(|_| ())
            }

            /// Opens the store with the given name, creating it if needed.
            pub fn open(
                &self, storage_uri: &Url, name: &str,
            ) -> Result<Backend, Error> {
                self.location(storage_uri)?.open(name)
            }

            /// Returns whether a store with the given name exists.
            pub fn exists(
                &self, storage_uri: &Url, name: &str,
            ) -> Result<bool, Error> {
                self.location(storage_uri)?.exists(name)
            }

            /// Removes all stores below the storage URI.
            ///
            /// Returns the names of the removed stores.
            pub fn clean(
                &self, storage_uri: &Url
            ) -> Result<Vec<String>, Error> {
                self.location(storage_uri)?.clean()
            }
        }


        //------------ Location ----------------------------------------------

        #[derive(Debug)]
        enum Location {
            $(
                $variant( self::$module::Location ),
            )*
        }

        impl Location {
            fn open(&self, name: &str) -> Result<Backend, Error> {
                match self {
                    $(
                        Self::$variant(inner) => {
                            Ok(Backend(StoreInner::$variant(
                                inner.open(name)?
                            )))
                        }
                    )*
                }
            }

            fn exists(&self, name: &str) -> Result<bool, Error> {
                match self {
                    $(
                        Self::$variant(inner) => Ok(inner.exists(name)?),
                    )*
                }
            }

            fn clean(&self) -> Result<Vec<String>, Error> {
                match self {
                    $(
                        Self::$variant(inner) => Ok(inner.clean()?),
                    )*
                }
            }
        }


        //------------ Backend -----------------------------------------------

        /// An open store of one engine.
        #[derive(Debug)]
        pub struct Backend(StoreInner);

        #[derive(Debug)]
        enum StoreInner {
            $(
                $variant( self::$module::Store),
            )*
        }

        impl Backend {
            /// Opens a read snapshot of the last committed state.
            pub fn read(&self) -> Result<ReadTransaction, Error> {
                match &self.0 {
                    $(
                        StoreInner::$variant(inner) => {
                            Ok(ReadTransaction(
                                ReadInner::$variant(inner.read()?)
                            ))
                        }
                    )*
                }
            }

            /// Runs `op` in a write transaction.
            ///
            /// The transaction is committed if `op` succeeds and discarded
            /// otherwise.
            pub fn write<F, T>(&self, op: F) -> Result<T, Error>
            where
                F: for<'a> FnOnce(&mut WriteTransaction<'a>) -> Result<T, Error>
            {
                match &self.0 {
                    $(
                        StoreInner::$variant(inner) => inner.write(op),
                    )*
                }
            }

            /// Closes the store and deletes all its data.
            pub fn destroy(self) -> Result<(), Error> {
                match self.0 {
                    $(
                        StoreInner::$variant(inner) => Ok(inner.destroy()?),
                    )*
                }
            }

            /// Closes the store and keeps its data.
            pub fn close(self) -> Result<(), Error> {
                match self.0 {
                    $(
                        StoreInner::$variant(inner) => Ok(inner.close()?),
                    )*
                }
            }
        }


        //------------ ReadTransaction ---------------------------------------

        /// A snapshot of the committed state of a store.
        ///
        /// The snapshot does not borrow the store. It stays valid, showing
        /// the same state, until it is dropped.
        pub struct ReadTransaction(ReadInner);

        enum ReadInner {
            $(
                $variant(self::$module::ReadTransaction),
            )*
        }

        impl ReadTransaction {
            pub fn get(&self, key: &[u8]) -> Result<Option<&[u8]>, Error> {
                match &self.0 {
                    $(
                        ReadInner::$variant(inner) => Ok(inner.get(key)?),
                    )*
                }
            }
        }


        //------------ WriteTransaction --------------------------------------

        /// The single active write transaction of a store.
        pub struct WriteTransaction<'a>(WriteInner<'a>);

        enum WriteInner<'a> {
            $(
                $variant(self::$module::WriteTransaction<'a>),
            )*
        }

        $(
            impl<'a> From<self::$module::WriteTransaction<'a>>
            for WriteTransaction<'a> {
                fn from(
                    src: self::$module::WriteTransaction<'a>
                ) -> Self {
                    Self(WriteInner::$variant(src))
                }
            }

            impl<'a> TryFrom<WriteTransaction<'a>>
            for self::$module::WriteTransaction<'a> {
                type Error = ();

                fn try_from(
                    src: WriteTransaction<'a>
                ) -> Result<Self, Self::Error> {
                    match src.0 {
                        WriteInner::$variant(inner) => Ok(inner),
                        #[allow(unreachable_patterns)]
                        _ => Err(())
                    }
                }
            }
        )*

        impl WriteTransaction<'_> {
            pub fn get(&self, key: &[u8]) -> Result<Option<&[u8]>, Error> {
                match &self.0 {
                    $(
                        WriteInner::$variant(inner) => Ok(inner.get(key)?),
                    )*
                }
            }

            pub fn put(
                &mut self, key: &[u8], value: &[u8]
            ) -> Result<(), Error> {
                match &mut self.0 {
                    $(
                        WriteInner::$variant(inner) => {
                            Ok(inner.put(key, value)?)
                        }
                    )*
                }
            }
        }


        //------------ Error -------------------------------------------------

        #[derive(Debug)]
        pub enum Error {
            UnknownScheme(String),
            $(
                $variant(self::$module::Error),
            )*
        }

        $(
            impl From<self::$module::Error> for Error {
                fn from(src: self::$module::Error) -> Self {
                    Error::$variant(src)
                }
            }
        )*

        impl fmt::Display for Error {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                match self {
                    Error::UnknownScheme(scheme) => {
                        write!(f, "unknown storage scheme '{scheme}'")
                    }
                    $(
                        Error::$variant(inner) => inner.fmt(f),
                    )*
                }
            }
        }

        impl error::Error for Error { }
    }
}

store! {
    (Lmdb, lmdb)
    (Memory, memory)
}


//============ Tests =========================================================
