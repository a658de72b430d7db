//! Composition of the components into a running pipeline.
//!
//! Every source delivers its change events through a bounded channel.
//! Each source is drained by its own worker. All workers share one
//! [`Classifier`] and one set of aggregate engines, so the branches of a
//! metric family are fanned in before their deltas are merged.

use std::fmt;
use std::sync::Arc;
use futures_util::future::join_all;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use crate::change::{ChangeEvent, DecoderRegistry, ModKind, Record};
use crate::commons::error::Error;
use crate::commons::storage::{KeyValueStore, StoreNewError};
use crate::config::{Config, ConfigError};
use crate::constants::MATERIALIZE_NS;
use crate::exactly_once::{Admission, Classifier, Resolver};
use crate::ledger::StockLedger;
use crate::models::{InvOrderRef, Model, Order};
use crate::selling::{SellingContext, SellingMetrics, SellingSinks};


//------------ PipelineContext -----------------------------------------------

/// Everything a pipeline is built from.
///
/// The context is created once per pipeline and handed to it explicitly.
/// Two pipelines with separate contexts share nothing.
#[derive(Clone, Debug)]
pub struct PipelineContext {
    registry: Arc<DecoderRegistry>,
    store: Arc<KeyValueStore>,
    config: Arc<Config>,
}

impl PipelineContext {
    pub fn new(
        config: Arc<Config>,
        store: Arc<KeyValueStore>,
        registry: Arc<DecoderRegistry>,
    ) -> Self {
        PipelineContext { registry, store, config }
    }

    /// Opens the configured store and uses the default decoders.
    pub fn create(config: Arc<Config>) -> Result<Self, StoreNewError> {
        let store = KeyValueStore::create(
            &config.storage_uri, MATERIALIZE_NS
        )?;
        Ok(Self::new(
            config,
            Arc::new(store),
            Arc::new(DecoderRegistry::with_defaults()),
        ))
    }

    pub fn registry(&self) -> &Arc<DecoderRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<KeyValueStore> {
        &self.store
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }
}


//------------ PipelineStats -------------------------------------------------

/// What happened to the events a pipeline received.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PipelineStats {
    /// Events that took effect.
    pub processed: usize,

    /// Events dropped by the classifier.
    pub dropped: usize,

    /// Events whose processing failed.
    pub failed: usize,
}

impl PipelineStats {
    pub fn total(&self) -> usize {
        self.processed + self.dropped + self.failed
    }

    fn add(&mut self, other: PipelineStats) {
        self.processed += other.processed;
        self.dropped += other.dropped;
        self.failed += other.failed;
    }
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f, "{} processed, {} dropped, {} failed",
            self.processed, self.dropped, self.failed
        )
    }
}


//------------ Pipeline ------------------------------------------------------

/// Takes classified change events through all consumers.
#[derive(Debug)]
pub struct Pipeline {
    classifier: Classifier,
    selling: SellingMetrics,
    stock: StockLedger,
    store: Arc<KeyValueStore>,
}

impl Pipeline {
    /// Builds the pipeline of a context.
    ///
    /// The emitted totals of the metric families are handed to `sinks`.
    pub fn new(
        context: &PipelineContext, sinks: SellingSinks
    ) -> Result<Self, ConfigError> {
        let store = context.store().clone();
        let config = context.config();

        let mut classifier = Classifier::new(
            Resolver::new(store.clone()), context.registry().clone()
        );
        for (source, policy) in config.policies()? {
            classifier.set_policy(source, policy);
        }

        let selling = SellingMetrics::new(
            store.clone(),
            SellingContext::new(Resolver::new(store.clone()), config.utc_offset),
            config.flush_interval(),
            sinks,
        );

        Ok(Pipeline {
            classifier,
            selling,
            stock: StockLedger::new(store.clone()),
            store,
        })
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn selling(&self) -> &SellingMetrics {
        &self.selling
    }

    pub fn store(&self) -> &Arc<KeyValueStore> {
        &self.store
    }

    /// Processes a single event.
    ///
    /// Returns whether the event passed the classifier. If a consumer
    /// fails, the snapshot of the row is put back, so the same event can
    /// be delivered again and will then take full effect.
    pub fn process(&self, mut event: ChangeEvent) -> Result<bool, Error> {
        let Some(admission) = self.classifier.admit(&mut event)? else {
            return Ok(false)
        };
        match self.apply(&event) {
            Ok(()) => Ok(true),
            Err(err) => {
                self.revert(admission);
                Err(err)
            }
        }
    }

    /// Runs the consumers of an admitted event.
    ///
    /// Everything before the final merge either only reads or can be
    /// repeated without effect.
    fn apply(&self, event: &ChangeEvent) -> Result<(), Error> {
        let mut deltas = self.selling.deltas(event)?;
        let journals = self.stock.consume(event)?;
        self.update_order_refs(event)?;
        self.selling.add_balance_diffs(event, &mut deltas)?;
        let merged = self.selling.merge(deltas);
        debug!(
            "{} {}: {} deltas, {} journals",
            event.kind, event.identity_display(), merged, journals
        );
        Ok(())
    }

    fn revert(&self, admission: Admission) {
        let key = admission.key().clone();
        if let Err(err) = self.classifier.revert(admission) {
            warn!("failed to restore the snapshot of {key}: {err}");
        }
    }

    /// Processes an event and logs a failure.
    pub fn handle(&self, event: ChangeEvent) -> PipelineStats {
        let source = event.source.clone();
        let identity = event.identity_display();
        let mut stats = PipelineStats::default();
        match self.process(event) {
            Ok(true) => stats.processed += 1,
            Ok(false) => stats.dropped += 1,
            Err(err) => {
                error!("failed to process {identity} of {source}: {err}");
                stats.failed += 1;
            }
        }
        stats
    }

    /// Flushes all engines right away.
    pub fn flush(&self) {
        self.selling.flush()
    }

    /// Keeps the order reference cache in line with the order stream.
    fn update_order_refs(&self, event: &ChangeEvent) -> Result<(), Error> {
        if event.source != Order::source() {
            return Ok(())
        }
        let prior = match &event.prior {
            Some(Record::Order(order)) => InvOrderRef::from_order(order),
            _ => Vec::new(),
        };
        let current = match (&event.data, event.kind) {
            (_, ModKind::Delete) => Vec::new(),
            (Record::Order(order), _) => InvOrderRef::from_order(order),
            _ => Vec::new(),
        };
        if prior.is_empty() && current.is_empty() {
            return Ok(())
        }
        self.store.execute(|txn| {
            for entry in &prior {
                txn.delete(&InvOrderRef::key(entry.inv_id))?;
            }
            for entry in &current {
                txn.store(&InvOrderRef::key(entry.inv_id), entry)?;
            }
            Ok(())
        })
    }
}

/// # Running
impl Pipeline {
    /// Drains all sources until they close or `stop` turns true.
    ///
    /// The engines flush periodically while the sources are drained. Once
    /// all workers have finished, a final flush is performed before the
    /// function returns.
    pub async fn run(
        self: Arc<Self>,
        sources: Vec<mpsc::Receiver<ChangeEvent>>,
        stop: watch::Receiver<bool>,
    ) -> PipelineStats {
        info!("pipeline starting with {} sources", sources.len());

        let (engines_stop, engines_rx) = watch::channel(false);
        let engines = vec![
            tokio::spawn(self.selling.shop().clone().run(engines_rx.clone())),
            tokio::spawn(self.selling.team().clone().run(engines_rx.clone())),
            tokio::spawn(self.selling.bank().clone().run(engines_rx.clone())),
            tokio::spawn(self.selling.shopeepay().clone().run(engines_rx)),
        ];

        let workers = sources.into_iter().map(|source| {
            tokio::spawn(self.clone().drain(source, stop.clone()))
        });

        let mut stats = PipelineStats::default();
        for res in join_all(workers).await {
            match res {
                Ok(worker) => stats.add(worker),
                Err(err) => error!("pipeline worker aborted: {err}"),
            }
        }

        // The receivers may all be gone already, which is fine.
        let _ = engines_stop.send(true);
        for res in join_all(engines).await {
            if let Err(err) = res {
                error!("flush task aborted: {err}");
            }
        }

        info!("pipeline stopped: {stats}");
        stats
    }

    async fn drain(
        self: Arc<Self>,
        mut source: mpsc::Receiver<ChangeEvent>,
        mut stop: watch::Receiver<bool>,
    ) -> PipelineStats {
        let mut stats = PipelineStats::default();
        loop {
            if *stop.borrow() {
                break
            }
            tokio::select! {
                biased;

                res = stop.changed() => {
                    if res.is_err() {
                        // Nobody can stop us anymore. Run until the
                        // source closes.
                        while let Some(event) = source.recv().await {
                            let this = self.clone();
                            stats.add(this.handle_blocking(event).await);
                        }
                        break
                    }
                }
                event = source.recv() => {
                    match event {
                        Some(event) => {
                            let this = self.clone();
                            stats.add(this.handle_blocking(event).await)
                        }
                        None => break,
                    }
                }
            }
        }
        stats
    }

    /// Handles an event on the blocking thread pool.
    ///
    /// Processing blocks on storage I/O.
    async fn handle_blocking(
        self: Arc<Self>, event: ChangeEvent
    ) -> PipelineStats {
        match tokio::task::spawn_blocking(move || self.handle(event)).await {
            Ok(stats) => stats,
            Err(err) => {
                error!("event processing aborted: {err}");
                PipelineStats { failed: 1, ..Default::default() }
            }
        }
    }
}


//============ Tests =========================================================
