//! Postings for goods bought into the warehouse.

use std::sync::Arc;
use log::debug;
use crate::change::{ChangeEvent, ModKind, Record};
use crate::commons::error::Error;
use crate::commons::storage::KeyValueStore;
use crate::models::{InvTransaction, InvTxType};
use super::{AccountKey, JournalBatch};


//------------ StockLedger ---------------------------------------------------

/// Books restocks from classified inventory transactions.
///
/// A restock is paid when it is first seen, moving its total from cash
/// to pending stock. Once the goods have arrived the total moves on to
/// ready stock.
#[derive(Clone, Debug)]
pub struct StockLedger {
    store: Arc<KeyValueStore>,
}

impl StockLedger {
    pub fn new(store: Arc<KeyValueStore>) -> Self {
        StockLedger { store }
    }

    /// Posts the journals implied by an event.
    ///
    /// Returns the number of journals committed. Events other than
    /// restocks are ignored. Journals are identified by the transaction
    /// they belong to, so consuming the same event twice posts nothing
    /// the second time.
    pub fn consume(&self, event: &ChangeEvent) -> Result<usize, Error> {
        if event.kind == ModKind::Delete {
            return Ok(0)
        }
        let tx = match &event.data {
            Record::InvTransaction(tx) if tx.kind == InvTxType::Restock => tx,
            _ => return Ok(0)
        };
        let prior = match &event.prior {
            Some(Record::InvTransaction(prior)) => Some(prior),
            _ => None,
        };
        if !(tx.total > 0.) {
            debug!("no postings for restock {} without total", tx.id);
            return Ok(0)
        }

        let mut posted = 0;
        if prior.is_none() && self.restock(tx)? {
            posted += 1;
        }
        let arrived_before = prior.is_some_and(|prior| prior.arrived.is_some());
        if tx.arrived.is_some() && !arrived_before && self.accept(tx)? {
            posted += 1;
        }
        Ok(posted)
    }

    fn restock(&self, tx: &InvTransaction) -> Result<bool, Error> {
        JournalBatch::new(tx.team_id, format!("restock-{}", tx.id))
            .desc(format!("restock {}", tx.receipt))
            .transfer(AccountKey::Cash, AccountKey::StockPending, tx.total)
            .commit(&self.store)
    }

    fn accept(&self, tx: &InvTransaction) -> Result<bool, Error> {
        JournalBatch::new(tx.team_id, format!("accept-{}", tx.id))
            .desc(format!("accept {}", tx.receipt))
            .transfer(AccountKey::StockPending, AccountKey::StockReady, tx.total)
            .commit(&self.store)
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use url::Url;
    use crate::constants::MATERIALIZE_NS;
    use crate::ledger::balance;
    use crate::models::Model;

    fn ledger() -> StockLedger {
        StockLedger::new(Arc::new(KeyValueStore::create(
            &Url::parse("memory:").unwrap(), MATERIALIZE_NS
        ).unwrap()))
    }

    fn restock(arrived: bool) -> InvTransaction {
        InvTransaction {
            id: 5,
            team_id: 3,
            kind: InvTxType::Restock,
            receipt: "R-5".into(),
            total: 250.0,
            arrived: arrived.then(|| {
                Utc.with_ymd_and_hms(2025, 8, 3, 9, 0, 0).unwrap()
            }),
            ..Default::default()
        }
    }

    fn event(
        kind: ModKind, tx: InvTransaction, prior: Option<InvTransaction>
    ) -> ChangeEvent {
        let mut event = ChangeEvent::new(
            InvTransaction::source(), kind, tx.into_record()
        );
        event.prior = prior.map(Model::into_record);
        event
    }

    fn pending(ledger: &StockLedger) -> f64 {
        balance(&ledger.store, 3, &AccountKey::StockPending).unwrap().balance()
    }

    #[test]
    fn restock_then_arrival() {
        let ledger = ledger();
        assert_eq!(
            ledger.consume(&event(ModKind::Insert, restock(false), None)).unwrap(),
            1
        );
        assert_eq!(pending(&ledger), 250.0);
        assert_eq!(
            balance(&ledger.store, 3, &AccountKey::Cash).unwrap().balance(),
            -250.0
        );

        // An unrelated update posts nothing.
        assert_eq!(
            ledger.consume(&event(
                ModKind::Update, restock(false), Some(restock(false))
            )).unwrap(),
            0
        );

        assert_eq!(
            ledger.consume(&event(
                ModKind::Update, restock(true), Some(restock(false))
            )).unwrap(),
            1
        );
        assert_eq!(pending(&ledger), 0.0);
        assert_eq!(
            balance(&ledger.store, 3, &AccountKey::StockReady).unwrap().balance(),
            250.0
        );

        // Arrival is only booked once.
        assert_eq!(
            ledger.consume(&event(
                ModKind::Update, restock(true), Some(restock(true))
            )).unwrap(),
            0
        );
    }

    #[test]
    fn consuming_twice_posts_once() {
        let ledger = ledger();
        let arrival = || event(
            ModKind::Update, restock(true), Some(restock(false))
        );
        ledger.consume(&event(ModKind::Insert, restock(false), None)).unwrap();
        assert_eq!(ledger.consume(&arrival()).unwrap(), 1);
        assert_eq!(ledger.consume(&arrival()).unwrap(), 0);
        assert_eq!(
            balance(&ledger.store, 3, &AccountKey::StockReady).unwrap().balance(),
            250.0
        );
    }

    #[test]
    fn arrived_restock_books_both() {
        let ledger = ledger();
        assert_eq!(
            ledger.consume(&event(ModKind::Backfill, restock(true), None)).unwrap(),
            2
        );
        assert_eq!(pending(&ledger), 0.0);
    }

    #[test]
    fn other_transactions_are_ignored() {
        let ledger = ledger();
        let mut tx = restock(false);
        tx.kind = InvTxType::Order;
        assert_eq!(ledger.consume(&event(ModKind::Insert, tx, None)).unwrap(), 0);
        assert_eq!(
            ledger.consume(&event(ModKind::Delete, restock(false), None)).unwrap(),
            0
        );
        assert!(ledger.store.is_empty().unwrap());
    }
}
