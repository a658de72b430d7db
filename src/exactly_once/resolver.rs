//! Swapping snapshots in a single transaction.

use std::sync::Arc;
use log::trace;
use serde::de::DeserializeOwned;
use crate::commons::storage::{self, Key, KeyValueStore, Value};


//------------ Resolution ----------------------------------------------------

/// The outcome of replacing a snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolution<P = Value> {
    prior: Option<P>,
    unchanged: bool,
}

impl<P> Resolution<P> {
    /// Returns whether there was a snapshot before.
    pub fn existed(&self) -> bool {
        self.prior.is_some()
    }

    /// Returns whether the new value equals the stored one.
    pub fn is_unchanged(&self) -> bool {
        self.unchanged
    }

    pub fn prior(&self) -> Option<&P> {
        self.prior.as_ref()
    }

    pub fn into_prior(self) -> Option<P> {
        self.prior
    }
}


//------------ Resolver ------------------------------------------------------

/// Reads the previous snapshot of a key and replaces it atomically.
///
/// Every operation runs as one read-write transaction so that concurrent
/// resolvers working on the same key see each other's results in a
/// definite order.
///
/// The `_as` variants convert the previous snapshot with the given
/// function while the transaction is still open. If the conversion fails
/// the transaction is discarded and the store is left untouched.
#[derive(Clone, Debug)]
pub struct Resolver {
    store: Arc<KeyValueStore>,
}

impl Resolver {
    pub fn new(store: Arc<KeyValueStore>) -> Self {
        Resolver { store }
    }

    pub fn store(&self) -> &Arc<KeyValueStore> {
        &self.store
    }

    /// Stores `value` under `key` and returns what was there before.
    pub fn resolve(
        &self, key: &Key, value: &Value
    ) -> Result<Resolution, storage::Error> {
        self.resolve_as(key, value, Ok)
    }

    pub fn resolve_as<P, E>(
        &self,
        key: &Key,
        value: &Value,
        convert: impl FnOnce(Value) -> Result<P, E>,
    ) -> Result<Resolution<P>, E>
    where E: From<storage::Error> {
        self.store.execute(|txn| {
            let prior = txn.get_value(key)?;
            let unchanged = prior.as_ref() == Some(value);
            if !unchanged {
                txn.store_value(key, value.clone())?;
            }
            trace!(
                "resolved {key}: {}",
                match (&prior, unchanged) {
                    (None, _) => "new",
                    (Some(_), true) => "unchanged",
                    (Some(_), false) => "updated",
                }
            );
            Ok(Resolution {
                prior: prior.map(convert).transpose()?,
                unchanged,
            })
        })
    }

    /// Stores `value` under `key` only if there is no snapshot yet.
    ///
    /// Returns the existing snapshot, in which case nothing was written.
    pub fn resolve_new(
        &self, key: &Key, value: &Value
    ) -> Result<Option<Value>, storage::Error> {
        self.resolve_new_as(key, value, Ok)
    }

    pub fn resolve_new_as<P, E>(
        &self,
        key: &Key,
        value: &Value,
        convert: impl FnOnce(Value) -> Result<P, E>,
    ) -> Result<Option<P>, E>
    where E: From<storage::Error> {
        self.store.execute(|txn| {
            match txn.get_value(key)? {
                Some(prior) => convert(prior).map(Some),
                None => {
                    txn.store_value(key, value.clone())?;
                    Ok(None)
                }
            }
        })
    }

    /// Removes the snapshot under `key` and returns it.
    pub fn resolve_delete(
        &self, key: &Key
    ) -> Result<Option<Value>, storage::Error> {
        self.resolve_delete_as(key, Ok)
    }

    pub fn resolve_delete_as<P, E>(
        &self,
        key: &Key,
        convert: impl FnOnce(Value) -> Result<P, E>,
    ) -> Result<Option<P>, E>
    where E: From<storage::Error> {
        self.store.execute(|txn| {
            match txn.get_value(key)? {
                Some(prior) => {
                    let prior = convert(prior)?;
                    txn.delete(key)?;
                    Ok(Some(prior))
                }
                None => Ok(None)
            }
        })
    }

    /// Puts back the snapshot an earlier resolution replaced.
    ///
    /// This only happens if the key still holds `expected`, which is
    /// `None` for a key that is expected to be absent. The snapshot is
    /// then set to `prior` or removed if that is `None`. Returns whether
    /// the snapshot was restored.
    pub fn restore(
        &self, key: &Key, expected: Option<&Value>, prior: Option<&Value>
    ) -> Result<bool, storage::Error> {
        self.store.execute(|txn| {
            if txn.get_value(key)?.as_ref() != expected {
                trace!("not restoring {key}: changed since");
                return Ok(false)
            }
            match prior {
                Some(prior) => txn.store_value(key, prior.clone())?,
                None => txn.delete(key)?,
            }
            trace!("restored {key}");
            Ok(true)
        })
    }

    /// Returns whether there is a snapshot under `key`.
    pub fn exists(&self, key: &Key) -> Result<bool, storage::Error> {
        self.store.read(|txn| txn.has(key))
    }

    /// Returns the snapshot under `key` as a `T`.
    pub fn lookup<T: DeserializeOwned>(
        &self, key: &Key
    ) -> Result<Option<T>, storage::Error> {
        self.store.get(key)
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use url::Url;
    use crate::constants::MATERIALIZE_NS;

    fn resolver() -> Resolver {
        Resolver::new(Arc::new(
            KeyValueStore::create(
                &Url::parse("memory:").unwrap(), MATERIALIZE_NS
            ).unwrap()
        ))
    }

    fn key() -> Key {
        "public/orders/1".parse().unwrap()
    }

    #[test]
    fn resolve_reports_prior() {
        let resolver = resolver();
        let first = resolver.resolve(&key(), &json!({"v": 1})).unwrap();
        assert!(!first.existed());

        let second = resolver.resolve(&key(), &json!({"v": 2})).unwrap();
        assert_eq!(second.prior(), Some(&json!({"v": 1})));
        assert!(!second.is_unchanged());

        let third = resolver.resolve(&key(), &json!({"v": 2})).unwrap();
        assert!(third.is_unchanged());
        assert_eq!(resolver.lookup(&key()).unwrap(), Some(json!({"v": 2})));
    }

    #[test]
    fn resolve_new_keeps_existing() {
        let resolver = resolver();
        assert_eq!(resolver.resolve_new(&key(), &json!(1)).unwrap(), None);
        assert_eq!(
            resolver.resolve_new(&key(), &json!(2)).unwrap(), Some(json!(1))
        );
        assert_eq!(resolver.lookup(&key()).unwrap(), Some(json!(1)));
    }

    #[test]
    fn resolve_delete() {
        let resolver = resolver();
        assert_eq!(resolver.resolve_delete(&key()).unwrap(), None);
        resolver.resolve(&key(), &json!(1)).unwrap();
        assert!(resolver.exists(&key()).unwrap());
        assert_eq!(resolver.resolve_delete(&key()).unwrap(), Some(json!(1)));
        assert!(!resolver.exists(&key()).unwrap());
    }

    #[test]
    fn restore_only_unchanged() {
        let resolver = resolver();
        resolver.resolve(&key(), &json!(1)).unwrap();
        resolver.resolve(&key(), &json!(2)).unwrap();
        assert!(resolver.restore(
            &key(), Some(&json!(2)), Some(&json!(1))
        ).unwrap());
        assert_eq!(resolver.lookup(&key()).unwrap(), Some(json!(1)));

        // Someone else has moved on in the meantime.
        assert!(!resolver.restore(&key(), Some(&json!(2)), None).unwrap());
        assert!(resolver.exists(&key()).unwrap());

        assert!(resolver.restore(&key(), Some(&json!(1)), None).unwrap());
        assert!(!resolver.exists(&key()).unwrap());
        assert!(resolver.restore(&key(), None, Some(&json!(3))).unwrap());
        assert_eq!(resolver.lookup(&key()).unwrap(), Some(json!(3)));
    }

    #[test]
    fn failed_conversion_writes_nothing() {
        let resolver = resolver();
        resolver.resolve(&key(), &json!("old")).unwrap();

        let res = resolver.resolve_as(&key(), &json!("new"), |_| {
            Err::<(), _>(crate::commons::error::Error::invalid_key("nope"))
        });
        assert!(res.is_err());
        assert_eq!(resolver.lookup(&key()).unwrap(), Some(json!("old")));

        let res = resolver.resolve_delete_as(&key(), |_| {
            Err::<(), _>(crate::commons::error::Error::invalid_key("nope"))
        });
        assert!(res.is_err());
        assert!(resolver.exists(&key()).unwrap());
    }
}
