//! Consumers of flushed totals.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Mutex, PoisonError};
use log::error;
use serde::Serialize;
use crate::commons::storage::Key;
use super::Aggregate;


//------------ FlushListener -------------------------------------------------

/// A consumer of the totals produced by an aggregation engine.
///
/// Listeners are registered with an
/// [`AggregateEngine`][super::AggregateEngine] and receive the full
/// current total of every key updated by a flush. The total has already
/// been stored when it is passed on, so listeners have no way to refuse
/// it. A listener that fails to handle a total has to deal with that
/// itself.
pub trait FlushListener<A: Aggregate>: Send + Sync + 'static {
    fn listen(&self, key: &Key, total: &A);
}


//------------ JsonLinesSink -------------------------------------------------

/// A listener writing every total as a line of JSON.
///
/// Each line is an object with the aggregation key under `"key"` and the
/// total under `"value"`.
#[derive(Debug)]
pub struct JsonLinesSink<W> {
    target: Mutex<W>,
}

#[derive(Serialize)]
struct Line<'a, A> {
    key: &'a Key,
    value: &'a A,
}

impl<W: Write + Send + 'static> JsonLinesSink<W> {
    pub fn new(target: W) -> Self {
        JsonLinesSink { target: Mutex::new(target) }
    }

    pub fn into_inner(self) -> W {
        self.target.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_line<A: Aggregate>(
        &self, key: &Key, total: &A
    ) -> Result<(), String> {
        let mut line = serde_json::to_vec(&Line { key, value: total })
            .map_err(|err| err.to_string())?;
        line.push(b'\n');
        let mut target = self.target.lock().unwrap_or_else(
            PoisonError::into_inner
        );
        target.write_all(&line).map_err(|err| err.to_string())?;
        target.flush().map_err(|err| err.to_string())
    }
}

impl<A: Aggregate, W: Write + Send + 'static> FlushListener<A>
for JsonLinesSink<W> {
    fn listen(&self, key: &Key, total: &A) {
        if let Err(err) = self.write_line(key, total) {
            error!("failed to write total '{key}': {err}");
        }
    }
}


//------------ TotalsCollector -----------------------------------------------

/// A listener that keeps the latest total of every key in memory.
#[derive(Debug)]
pub struct TotalsCollector<A> {
    inner: Mutex<Collected<A>>,
}

#[derive(Debug)]
struct Collected<A> {
    totals: BTreeMap<Key, A>,
    emitted: usize,
}

impl<A> Default for TotalsCollector<A> {
    fn default() -> Self {
        TotalsCollector {
            inner: Mutex::new(Collected {
                totals: BTreeMap::new(),
                emitted: 0,
            })
        }
    }
}

impl<A: Aggregate> TotalsCollector<A> {
    /// Returns the last total received for `key`.
    pub fn latest(&self, key: &Key) -> Option<A> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
            .totals.get(key).cloned()
    }

    /// Returns the last total of every key in key order.
    pub fn totals(&self) -> Vec<(Key, A)> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
            .totals.iter().map(|(key, total)| {
                (key.clone(), total.clone())
            }).collect()
    }

    /// Returns how many totals have been received altogether.
    pub fn emitted(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).emitted
    }
}

impl<A: Aggregate> FlushListener<A> for TotalsCollector<A> {
    fn listen(&self, key: &Key, total: &A) {
        let mut inner = self.inner.lock().unwrap_or_else(
            PoisonError::into_inner
        );
        inner.totals.insert(key.clone(), total.clone());
        inner.emitted += 1;
    }
}


//============ Tests =========================================================
