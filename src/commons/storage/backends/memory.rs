//! In-memory storage.
//!
//! Every store opened through a `memory:` URI is private to its
//! [`KeyValueStore`][crate::commons::storage::KeyValueStore]. Nothing
//! survives the process.

use std::{error, fmt};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, RwLock};
use serde_json::Value;
use url::Url;
use crate::commons::storage::{Key, Namespace, Scope};
use super::{LockMode, Write};
use super::super::store::Error as SuperError;


//------------ Store ---------------------------------------------------------

#[derive(Debug, Default)]
pub struct Store {
    /// The stored values in key order.
    values: Mutex<BTreeMap<Key, Value>>,

    /// The namespace lock held for the duration of a transaction.
    lock: RwLock<()>,
}

impl Store {
    pub fn from_uri(
        uri: &Url, _namespace: &Namespace
    ) -> Result<Option<Self>, Error> {
        if uri.scheme() != "memory" {
            return Ok(None)
        }
        Ok(Some(Store::default()))
    }

    pub fn locked<T, E: From<SuperError>>(
        &self, mode: LockMode, op: impl FnOnce() -> Result<T, E>
    ) -> Result<T, E> {
        match mode {
            LockMode::Shared => {
                let _lock = self.lock.read().map_err(|_| {
                    E::from(SuperError::from(Error::PoisonedLock))
                })?;
                op()
            }
            LockMode::Exclusive => {
                let _lock = self.lock.write().map_err(|_| {
                    E::from(SuperError::from(Error::PoisonedLock))
                })?;
                op()
            }
        }
    }

    fn values(&self) -> Result<MutexGuard<'_, BTreeMap<Key, Value>>, Error> {
        self.values.lock().map_err(|_| Error::PoisonedLock)
    }
}


/// # Reading
impl Store {
    pub fn get(&self, key: &Key) -> Result<Option<Value>, Error> {
        Ok(self.values()?.get(key).cloned())
    }

    pub fn list_keys(&self, scope: &Scope) -> Result<Vec<Key>, Error> {
        Ok(
            self.values()?.keys().filter(|key| {
                key.is_within(scope)
            }).cloned().collect()
        )
    }
}


/// # Writing
impl Store {
    /// Applies all writes while holding the value lock.
    pub fn commit(&self, writes: &[Write]) -> Result<(), Error> {
        let mut values = self.values()?;
        for write in writes {
            match &write.value {
                Some(value) => {
                    values.insert(write.key.clone(), value.clone());
                }
                None => {
                    values.remove(&write.key);
                }
            }
        }
        Ok(())
    }
}


//------------ Error ---------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    PoisonedLock,
}

impl Error {
    pub fn is_decode(&self) -> bool {
        false
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::PoisonedLock => f.write_str("memory store lock poisoned"),
        }
    }
}

impl error::Error for Error { }
