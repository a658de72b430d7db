//! The aggregation engine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use std::{fmt, mem};
use log::{debug, error, info};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use crate::commons::error::Error;
use crate::commons::storage::{Key, KeyValueStore};
use super::{Aggregate, FlushListener};


//------------ OutputTransform -----------------------------------------------

/// Enriches a total before it is passed on.
///
/// The enriched value is only emitted, never stored.
pub type OutputTransform<A> = Box<dyn Fn(A) -> Result<A, Error> + Send + Sync>;


//------------ FlushReport ---------------------------------------------------

/// What happened during a flush.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FlushReport {
    /// The number of keys whose total was updated.
    pub flushed: usize,

    /// The number of keys that could not be updated.
    ///
    /// Their deltas have been put back and will be retried with the next
    /// flush.
    pub failed: usize,

    /// The number of updated totals that were passed on to listeners.
    pub emitted: usize,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.flushed == 0 && self.failed == 0
    }
}

impl fmt::Display for FlushReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f,
            "{} flushed, {} failed, {} emitted",
            self.flushed, self.failed, self.emitted
        )
    }
}


//------------ AggregateEngine -----------------------------------------------

/// Maintains the totals of one aggregate family.
///
/// Deltas are merged into an in-memory table of unflushed aggregates by
/// [`merge`][Self::merge]. This does not touch the store. A
/// [`flush`][Self::flush] takes the whole table and, key by key, folds each
/// unflushed aggregate into the total kept in the store, stores the new
/// total and passes it on to the listeners.
///
/// A failure to update one key does not affect the others. The delta of
/// a failed key goes back into the table.
pub struct AggregateEngine<A: Aggregate> {
    /// The name of the family for logging.
    name: &'static str,

    /// Merged deltas not yet flushed.
    pending: Mutex<HashMap<Key, A>>,

    store: Arc<KeyValueStore>,

    /// The period of [`run`][Self::run].
    interval: Duration,

    transform: Option<OutputTransform<A>>,

    listeners: Vec<Arc<dyn FlushListener<A>>>,
}

impl<A: Aggregate> AggregateEngine<A> {
    pub fn new(
        name: &'static str, store: Arc<KeyValueStore>, interval: Duration
    ) -> Self {
        AggregateEngine {
            name,
            pending: Mutex::new(HashMap::new()),
            store,
            interval,
            transform: None,
            listeners: Vec::new(),
        }
    }

    /// Sets the transform applied to totals before they are emitted.
    pub fn with_transform(
        mut self,
        transform: impl Fn(A) -> Result<A, Error> + Send + Sync + 'static,
    ) -> Self {
        self.transform = Some(Box::new(transform));
        self
    }

    pub fn add_listener(&mut self, listener: Arc<dyn FlushListener<A>>) {
        self.listeners.push(listener);
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<Key, A>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}


/// # Merging
impl<A: Aggregate> AggregateEngine<A> {
    /// Replaces the unflushed aggregate of `key` with what `build` makes
    /// of it.
    ///
    /// The builder receives `None` if there is nothing unflushed for the
    /// key.
    pub fn merge(&self, key: Key, build: impl FnOnce(Option<A>) -> A) {
        let mut pending = self.pending();
        let current = pending.remove(&key);
        pending.insert(key, build(current));
    }

    /// Merges a delta under its own key.
    pub fn merge_delta(&self, delta: A) {
        self.merge(delta.key(), |current| match current {
            Some(current) => delta.merge(current),
            None => delta,
        })
    }

    /// Merges all deltas.
    ///
    /// The lock is held for the whole batch, so a flush sees either all
    /// or none of them.
    pub fn merge_all(&self, deltas: impl IntoIterator<Item = A>) {
        let mut pending = self.pending();
        for delta in deltas {
            let key = delta.key();
            let merged = match pending.remove(&key) {
                Some(current) => delta.merge(current),
                None => delta,
            };
            pending.insert(key, merged);
        }
    }

    /// Returns the number of keys with unflushed deltas.
    pub fn pending_len(&self) -> usize {
        self.pending().len()
    }

    /// Returns the unflushed aggregate of a key.
    pub fn pending_delta(&self, key: &Key) -> Option<A> {
        self.pending().get(key).cloned()
    }
}


/// # Flushing
impl<A: Aggregate> AggregateEngine<A> {
    /// Folds all unflushed aggregates into the stored totals.
    pub fn flush(&self) -> FlushReport {
        let batch = mem::take(&mut *self.pending());
        let mut report = FlushReport::default();
        if batch.is_empty() {
            return report
        }

        let mut batch: Vec<_> = batch.into_iter().collect();
        batch.sort_by(|left, right| left.0.cmp(&right.0));

        for (key, delta) in batch {
            let total = match self.flush_key(&key, delta.clone()) {
                Ok(total) => total,
                Err(err) => {
                    error!(
                        "failed to flush {} total '{key}': {err}", self.name
                    );
                    report.failed += 1;
                    self.merge(key, |current| match current {
                        Some(current) => current.merge(delta),
                        None => delta,
                    });
                    continue
                }
            };
            report.flushed += 1;

            let total = match &self.transform {
                Some(transform) => match transform(total) {
                    Ok(total) => total,
                    Err(err) => {
                        error!(
                            "failed to prepare {} total '{key}' for output: \
                             {err}", self.name
                        );
                        continue
                    }
                },
                None => total,
            };
            for listener in &self.listeners {
                listener.listen(&key, &total);
            }
            report.emitted += 1;
        }

        if report.failed > 0 {
            info!("flushed {} totals: {report}", self.name);
        }
        else {
            debug!("flushed {} totals: {report}", self.name);
        }
        report
    }

    /// Folds one delta into its stored total and stores the result.
    fn flush_key(&self, key: &Key, delta: A) -> Result<A, Error> {
        self.store.execute(|txn| {
            let total = match txn.get::<A>(key)? {
                Some(stored) => delta.merge(stored),
                None => delta,
            };
            txn.store(key, &total)?;
            Ok(total)
        })
    }

    /// Returns the stored total of a key.
    pub fn total(&self, key: &Key) -> Result<Option<A>, Error> {
        Ok(self.store.get(key)?)
    }

    async fn flush_in_background(self: &Arc<Self>) -> FlushReport {
        let engine = self.clone();
        match tokio::task::spawn_blocking(move || engine.flush()).await {
            Ok(report) => report,
            Err(err) => {
                error!("flush of {} totals aborted: {err}", self.name);
                FlushReport::default()
            }
        }
    }

    /// Flushes periodically until `stop` turns true or is dropped.
    ///
    /// Performs a final flush before returning.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The first tick completes right away.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.flush_in_background().await;
                }
                res = stop.changed() => {
                    if res.is_err() || *stop.borrow() {
                        break
                    }
                }
            }
        }

        let report = self.flush_in_background().await;
        info!("final flush of {} totals: {report}", self.name);
    }
}

impl<A: Aggregate> fmt::Debug for AggregateEngine<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AggregateEngine")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}


//============ Tests =========================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use url::Url;
    use crate::commons::storage::{Scope, SegmentBuf};
    use crate::constants::MATERIALIZE_NS;
    use crate::metric::TotalsCollector;

    /// An amount per day.
    #[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
    pub(crate) struct DayAmount {
        pub day: String,
        pub amount: f64,
        pub label: Option<String>,
    }

    impl DayAmount {
        pub fn new(day: &str, amount: f64) -> Self {
            DayAmount { day: day.into(), amount, label: None }
        }

        pub fn key_for(day: &str) -> Key {
            Key::new_scoped(
                "metric/day_amount".parse::<Scope>().unwrap(),
                day.parse::<SegmentBuf>().unwrap(),
            )
        }
    }

    impl Aggregate for DayAmount {
        fn key(&self) -> Key {
            Self::key_for(&self.day)
        }

        fn merge(self, older: Self) -> Self {
            DayAmount {
                amount: self.amount + older.amount,
                label: self.label.or(older.label),
                day: self.day,
            }
        }

        fn negate(&self) -> Self {
            DayAmount { amount: -self.amount, ..self.clone() }
        }
    }

    fn store() -> Arc<KeyValueStore> {
        Arc::new(KeyValueStore::create(
            &Url::parse("memory:").unwrap(), MATERIALIZE_NS
        ).unwrap())
    }

    fn engine(
        store: Arc<KeyValueStore>
    ) -> (AggregateEngine<DayAmount>, Arc<TotalsCollector<DayAmount>>) {
        let collector = Arc::new(TotalsCollector::default());
        let mut engine = AggregateEngine::new(
            "day_amount", store, Duration::from_millis(10)
        );
        engine.add_listener(collector.clone());
        (engine, collector)
    }

    #[test]
    fn merges_coalesce_in_memory() {
        let store = store();
        let (engine, _) = engine(store.clone());
        engine.merge_delta(DayAmount::new("2025-08-01", 10.0));
        engine.merge_delta(DayAmount::new("2025-08-01", 5.0));
        engine.merge(DayAmount::key_for("2025-08-02"), |current| {
            assert!(current.is_none());
            DayAmount::new("2025-08-02", 1.0)
        });

        assert_eq!(engine.pending_len(), 2);
        assert_eq!(
            engine.pending_delta(&DayAmount::key_for("2025-08-01")),
            Some(DayAmount::new("2025-08-01", 15.0))
        );
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn flush_emits_full_totals() {
        let (engine, collector) = engine(store());
        engine.merge_delta(DayAmount::new("2025-08-01", 10.0));
        assert_eq!(engine.flush().flushed, 1);

        engine.merge_delta(DayAmount::new("2025-08-01", 5.0));
        let report = engine.flush();
        assert_eq!(report, FlushReport { flushed: 1, failed: 0, emitted: 1 });

        let key = DayAmount::key_for("2025-08-01");
        assert_eq!(collector.latest(&key).unwrap().amount, 15.0);
        assert_eq!(engine.total(&key).unwrap().unwrap().amount, 15.0);
        assert_eq!(collector.emitted(), 2);
    }

    #[test]
    fn second_flush_changes_nothing() {
        let store = store();
        let (engine, collector) = engine(store.clone());
        engine.merge_delta(DayAmount::new("2025-08-01", 10.0));
        engine.flush();
        let before = store.get::<DayAmount>(&DayAmount::key_for("2025-08-01"));

        assert!(engine.flush().is_empty());
        assert_eq!(
            store.get::<DayAmount>(&DayAmount::key_for("2025-08-01")).unwrap(),
            before.unwrap()
        );
        assert_eq!(collector.emitted(), 1);
    }

    #[test]
    fn failed_key_does_not_block_others() {
        let store = store();
        let (engine, collector) = engine(store.clone());
        let broken = DayAmount::key_for("2025-08-01");
        store.store(&broken, "not an aggregate").unwrap();

        engine.merge_delta(DayAmount::new("2025-08-01", 10.0));
        engine.merge_delta(DayAmount::new("2025-08-02", 20.0));
        let report = engine.flush();
        assert_eq!(report.flushed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(
            collector.latest(&DayAmount::key_for("2025-08-02")).unwrap().amount,
            20.0
        );

        // The failed delta is kept and merged with newer deltas.
        engine.merge_delta(DayAmount::new("2025-08-01", 1.0));
        assert_eq!(engine.pending_delta(&broken).unwrap().amount, 11.0);

        store.drop_key(&broken).unwrap();
        assert_eq!(engine.flush().flushed, 1);
        assert_eq!(engine.total(&broken).unwrap().unwrap().amount, 11.0);
    }

    #[test]
    fn transform_only_affects_output() {
        let store = store();
        let (engine, collector) = engine(store.clone());
        let engine = engine.with_transform(|mut total: DayAmount| {
            total.label = Some(format!("{} total", total.day));
            Ok(total)
        });
        engine.merge_delta(DayAmount::new("2025-08-01", 10.0));
        engine.flush();

        let key = DayAmount::key_for("2025-08-01");
        assert_eq!(
            collector.latest(&key).unwrap().label.as_deref(),
            Some("2025-08-01 total")
        );
        assert_eq!(engine.total(&key).unwrap().unwrap().label, None);
    }

    #[tokio::test]
    async fn run_flushes_and_stops() {
        let (engine, collector) = engine(store());
        let engine = Arc::new(engine);
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(engine.clone().run(stop_rx));

        engine.merge_delta(DayAmount::new("2025-08-01", 10.0));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.pending_len(), 0);

        engine.merge_delta(DayAmount::new("2025-08-01", 5.0));
        stop_tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(engine.pending_len(), 0);
        assert_eq!(
            collector.latest(&DayAmount::key_for("2025-08-01")).unwrap().amount,
            15.0
        );
    }
}
