//! The key-value store.

use std::{error, fmt};
use std::collections::BTreeMap;
use log::trace;
use serde::de::DeserializeOwned;
use serde::ser::Serialize;
use url::Url;
use super::backends::{LockMode, Write};
use super::types::{Key, Namespace, Scope};


//------------ Value ---------------------------------------------------------

pub type Value = serde_json::Value;


macro_rules! store {
    ( $( ( $variant:ident, $module:ident ) )* ) => {


        //------------ KeyValueStore -----------------------------------------

        /// A durable, transactional store of JSON values.
        ///
        /// All access goes through transactions. A read-write transaction,
        /// started via [`execute`][Self::execute], holds an exclusive lock
        /// on the namespace and commits its writes atomically when its
        /// closure returns `Ok`. A read-only transaction, started via
        /// [`read`][Self::read], holds a shared lock.
        #[derive(Debug)]
        pub struct KeyValueStore(StoreInner);

        #[derive(Debug)]
        enum StoreInner {
            $(
                $variant(super::backends::$module::Store),
            )*
        }

        impl KeyValueStore {
            /// Opens the store for `namespace` at the given location.
            ///
            /// The scheme of `storage_uri` selects the backend.
            pub fn create(
                storage_uri: &Url, namespace: &Namespace
            ) -> Result<Self, StoreNewError> {
                $(
                    if let Some(inner) =
                        super::backends::$module::Store::from_uri(
                            storage_uri, namespace
                        )?
                    {
                        return Ok(KeyValueStore(StoreInner::$variant(inner)))
                    }
                )*

                Err(StoreNewError::UnknownStorageScheme(
                    storage_uri.scheme().into()
                ))
            }

            /// Runs `op` inside a read-write transaction.
            ///
            /// The writes made by `op` are applied atomically if it
            /// returns `Ok` and discarded if it returns `Err`.
            pub fn execute<F, T, E>(&self, op: F) -> Result<T, E>
            where
                F: FnOnce(&mut Transaction<'_>) -> Result<T, E>,
                E: From<Error>,
            {
                match &self.0 {
                    $(
                        StoreInner::$variant(inner) => {
                            inner.locked(LockMode::Exclusive, || {
                                let mut txn = Transaction::new(
                                    TransactionInner::$variant(inner), true
                                );
                                let res = op(&mut txn)?;
                                txn.commit()?;
                                Ok(res)
                            })
                        }
                    )*
                }
            }

            /// Runs `op` inside a read-only transaction.
            pub fn read<F, T, E>(&self, op: F) -> Result<T, E>
            where
                F: FnOnce(&mut Transaction<'_>) -> Result<T, E>,
                E: From<Error>,
            {
                match &self.0 {
                    $(
                        StoreInner::$variant(inner) => {
                            inner.locked(LockMode::Shared, || {
                                op(&mut Transaction::new(
                                    TransactionInner::$variant(inner), false
                                ))
                            })
                        }
                    )*
                }
            }
        }


        //------------ TransactionInner --------------------------------------

        #[derive(Debug)]
        enum TransactionInner<'a> {
            $(
                $variant(&'a super::backends::$module::Store),
            )*
        }

        impl TransactionInner<'_> {
            fn get(&self, key: &Key) -> Result<Option<Value>, Error> {
                match self {
                    $(
                        Self::$variant(inner) => Ok(inner.get(key)?),
                    )*
                }
            }

            fn list_keys(&self, scope: &Scope) -> Result<Vec<Key>, Error> {
                match self {
                    $(
                        Self::$variant(inner) => Ok(inner.list_keys(scope)?),
                    )*
                }
            }

            fn commit(&self, writes: &[Write]) -> Result<(), Error> {
                match self {
                    $(
                        Self::$variant(inner) => Ok(inner.commit(writes)?),
                    )*
                }
            }
        }


        //------------ Error -------------------------------------------------

        /// An error happened while accessing the store.
        #[derive(Debug)]
        pub struct Error(ErrorInner);

        #[derive(Debug)]
        enum ErrorInner {
            $(
                $variant(super::backends::$module::Error),
            )*
            Serialize { key: Key, err: String },
            Deserialize { key: Key, err: String },
            ReadOnly(Key),
        }

        impl Error {
            fn serialize(key: &Key, err: impl fmt::Display) -> Self {
                Error(ErrorInner::Serialize {
                    key: key.clone(), err: err.to_string()
                })
            }

            fn deserialize(key: &Key, err: impl fmt::Display) -> Self {
                Error(ErrorInner::Deserialize {
                    key: key.clone(), err: err.to_string()
                })
            }

            /// Returns whether the error is about undecodable stored data.
            ///
            /// Such errors concern a single key and point to a schema
            /// mismatch rather than a broken store.
            pub fn is_decode(&self) -> bool {
                match &self.0 {
                    $(
                        ErrorInner::$variant(inner) => inner.is_decode(),
                    )*
                    ErrorInner::Deserialize { .. } => true,
                    _ => false,
                }
            }
        }

        $(
            impl From<super::backends::$module::Error> for Error {
                fn from(src: super::backends::$module::Error) -> Self {
                    Self(ErrorInner::$variant(src))
                }
            }
        )*

        impl fmt::Display for Error {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                match &self.0 {
                    $(
                        ErrorInner::$variant(inner) => inner.fmt(f),
                    )*
                    ErrorInner::Serialize { key, err } => {
                        write!(f,
                            "failed to serialize value for key '{key}': {err}"
                        )
                    }
                    ErrorInner::Deserialize { key, err } => {
                        write!(f,
                            "failed to deserialize value for key '{key}': \
                             {err}"
                        )
                    }
                    ErrorInner::ReadOnly(key) => {
                        write!(f,
                            "attempt to write key '{key}' in a read-only \
                             transaction"
                        )
                    }
                }
            }
        }

        impl error::Error for Error { }


        //------------ StoreNewError -----------------------------------------

        /// An error happened while opening a store.
        #[derive(Debug)]
        pub enum StoreNewError {
            UnknownStorageScheme(String),
            Store(Error)
        }

        impl From<Error> for StoreNewError {
            fn from(src: Error) -> Self {
                Self::Store(src)
            }
        }

        $(
            impl From<super::backends::$module::Error> for StoreNewError {
                fn from(src: super::backends::$module::Error) -> Self {
                    Self::Store(src.into())
                }
            }
        )*

        impl fmt::Display for StoreNewError {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                match self {
                    Self::UnknownStorageScheme(scheme) => {
                        write!(f, "unknown storage scheme: {scheme}")
                    }
                    Self::Store(inner) => inner.fmt(f)
                }
            }
        }

        impl error::Error for StoreNewError { }
    }
}

store! {
    (Disk, disk)
    (Memory, memory)
}


//------------ Transaction ---------------------------------------------------

/// A view of the store inside [`KeyValueStore::execute`] or
/// [`KeyValueStore::read`].
///
/// Writes are buffered until the transaction commits. Reads see the
/// transaction's own buffered writes.
#[derive(Debug)]
pub struct Transaction<'a> {
    backend: TransactionInner<'a>,
    writable: bool,
    pending: BTreeMap<Key, Option<Value>>,
}

impl<'a> Transaction<'a> {
    fn new(backend: TransactionInner<'a>, writable: bool) -> Self {
        Transaction { backend, writable, pending: BTreeMap::new() }
    }

    fn commit(self) -> Result<(), Error> {
        if self.pending.is_empty() {
            return Ok(())
        }
        let writes: Vec<_> = self.pending.into_iter().map(|(key, value)| {
            Write { key, value }
        }).collect();
        trace!("committing {} writes", writes.len());
        self.backend.commit(&writes)
    }

    fn check_writable(&self, key: &Key) -> Result<(), Error> {
        if self.writable {
            Ok(())
        }
        else {
            Err(Error(ErrorInner::ReadOnly(key.clone())))
        }
    }
}


/// # Reading
impl Transaction<'_> {
    /// Returns whether a value is stored under the given key.
    pub fn has(&mut self, key: &Key) -> Result<bool, Error> {
        Ok(self.get_value(key)?.is_some())
    }

    /// Returns the raw value stored under the given key.
    pub fn get_value(&mut self, key: &Key) -> Result<Option<Value>, Error> {
        if let Some(pending) = self.pending.get(key) {
            return Ok(pending.clone())
        }
        let res = self.backend.get(key)?;
        trace!(
            "read key {key}: {}", if res.is_some() { "found" } else { "absent" }
        );
        Ok(res)
    }

    /// Returns the value stored under the given key.
    ///
    /// Returns `Ok(None)` if there is no such value and an error that
    /// reports [`Error::is_decode`] if the value is not a `T`.
    pub fn get<T: DeserializeOwned>(
        &mut self, key: &Key
    ) -> Result<Option<T>, Error> {
        match self.get_value(key)? {
            Some(value) => {
                serde_json::from_value(value).map(Some).map_err(|err| {
                    Error::deserialize(key, err)
                })
            }
            None => Ok(None)
        }
    }

    /// Returns all keys at or below the given scope in key order.
    pub fn list_keys(&mut self, scope: &Scope) -> Result<Vec<Key>, Error> {
        let mut keys = self.backend.list_keys(scope)?;
        if !self.pending.is_empty() {
            keys.retain(|key| !self.pending.contains_key(key));
            keys.extend(
                self.pending.iter().filter(|(key, value)| {
                    value.is_some() && key.is_within(scope)
                }).map(|(key, _)| key.clone())
            );
            keys.sort();
        }
        Ok(keys)
    }
}


/// # Writing
impl Transaction<'_> {
    /// Stores a value under the given key, replacing any previous value.
    pub fn store<T: Serialize + ?Sized>(
        &mut self, key: &Key, value: &T
    ) -> Result<(), Error> {
        let value = serde_json::to_value(value).map_err(|err| {
            Error::serialize(key, err)
        })?;
        self.store_value(key, value)
    }

    /// Stores a raw value under the given key.
    pub fn store_value(
        &mut self, key: &Key, value: Value
    ) -> Result<(), Error> {
        self.check_writable(key)?;
        self.pending.insert(key.clone(), Some(value));
        Ok(())
    }

    /// Removes the value stored under the given key.
    ///
    /// Removing a key that does not exist is not an error.
    pub fn delete(&mut self, key: &Key) -> Result<(), Error> {
        self.check_writable(key)?;
        self.pending.insert(key.clone(), None);
        Ok(())
    }
}


//------------ Single Operations ---------------------------------------------

/// Operations that run as their own transaction.
impl KeyValueStore {
    /// Returns the value stored under `key`, if any.
    pub fn get<T: DeserializeOwned>(
        &self, key: &Key
    ) -> Result<Option<T>, Error> {
        self.read(|txn| txn.get(key))
    }

    /// Returns whether a value is stored under `key`.
    pub fn has(&self, key: &Key) -> Result<bool, Error> {
        self.read(|txn| txn.has(key))
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn store<T: Serialize + ?Sized>(
        &self, key: &Key, value: &T
    ) -> Result<(), Error> {
        self.execute(|txn| txn.store(key, value))
    }

    /// Removes the value under `key`.
    ///
    /// Returns whether there was a value.
    pub fn drop_key(&self, key: &Key) -> Result<bool, Error> {
        self.execute(|txn| {
            let existed = txn.has(key)?;
            if existed {
                txn.delete(key)?;
            }
            Ok(existed)
        })
    }

    /// Returns all keys at or below `scope`.
    pub fn list_keys(&self, scope: &Scope) -> Result<Vec<Key>, Error> {
        self.read(|txn| txn.list_keys(scope))
    }

    /// Returns whether the store holds no values at all.
    pub fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.list_keys(&Scope::global())?.is_empty())
    }

    /// Removes every value in the store.
    pub fn wipe(&self) -> Result<(), Error> {
        self.execute(|txn| {
            for key in txn.list_keys(&Scope::global())? {
                txn.delete(&key)?;
            }
            Ok(())
        })
    }
}
