//! Double-entry bookkeeping of classified changes.
//!
//! A [`JournalBatch`] collects the entries of one business transaction of
//! a team. Committing the batch checks that debit and credit balance and
//! then stores the entries together with the new running balance of every
//! account they touch, all in a single store transaction.

pub use self::stock::StockLedger;

mod stock;

use std::collections::{btree_map, BTreeMap};
use std::str::FromStr;
use std::{error, fmt};
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use crate::commons::error::Error;
use crate::commons::storage::{
    Key, KeyValueStore, Scope, Segment, SegmentBuf, Transaction
};
use crate::constants::{AMOUNT_EPSILON, LEDGER_SCOPE};
use crate::models::string_enum;


//------------ AccountKey ----------------------------------------------------

string_enum! {
    /// The accounts of a team's books.
    pub enum AccountKey {
        Cash => "cash",
        StockPending => "stock_pending",
        StockReady => "stock_ready",
        Payable => "payable",
        Receivable => "receivable",
        SellingReceivable => "selling_receivable",
        AdsExpense => "ads_expense",
    }
}

impl AccountKey {
    fn segment(&self) -> Result<SegmentBuf, Error> {
        SegmentBuf::from_str(self.as_str()).map_err(|err| {
            Error::invalid_key(format!("account '{self}': {err}"))
        })
    }
}


//------------ JournalEntry --------------------------------------------------

/// A single posting to an account.
///
/// Exactly one of `debit` and `credit` is non-zero.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct JournalEntry {
    pub account: AccountKey,
    pub debit: f64,
    pub credit: f64,
}


//------------ JournalRecord -------------------------------------------------

/// The stored form of a committed batch.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct JournalRecord {
    pub team_id: u64,
    pub tx_id: String,
    pub desc: String,
    pub entries: Vec<JournalEntry>,
    pub entry_time: DateTime<Utc>,
}


//------------ Balance -------------------------------------------------------

/// The running totals of an account.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Balance {
    pub debit: f64,
    pub credit: f64,
}

impl Balance {
    /// Returns debit minus credit.
    pub fn balance(&self) -> f64 {
        self.debit - self.credit
    }

    fn add(&mut self, entry: &JournalEntry) {
        self.debit += entry.debit;
        self.credit += entry.credit;
    }
}


//------------ JournalBatch --------------------------------------------------

/// The entries of one business transaction of a team.
#[derive(Clone, Debug)]
pub struct JournalBatch {
    team_id: u64,
    tx_id: String,
    desc: String,
    entries: Vec<JournalEntry>,
}

impl JournalBatch {
    /// Creates an empty batch.
    ///
    /// The `tx_id` identifies the batch among all batches of the team.
    /// Once a batch is committed, later batches with the same id are
    /// ignored.
    pub fn new(team_id: u64, tx_id: impl Into<String>) -> Self {
        JournalBatch {
            team_id,
            tx_id: tx_id.into(),
            desc: String::new(),
            entries: Vec::new(),
        }
    }

    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    pub fn debit(mut self, account: AccountKey, amount: f64) -> Self {
        self.entries.push(JournalEntry { account, debit: amount, credit: 0. });
        self
    }

    pub fn credit(mut self, account: AccountKey, amount: f64) -> Self {
        self.entries.push(JournalEntry { account, debit: 0., credit: amount });
        self
    }

    /// Moves `amount` from one account to another.
    ///
    /// Credits the source and debits the target.
    pub fn transfer(
        self, from: AccountKey, to: AccountKey, amount: f64
    ) -> Self {
        self.credit(from, amount).debit(to, amount)
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    /// Checks the batch without storing anything.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.entries.is_empty() {
            return Err(LedgerError::EmptyBatch)
        }
        for entry in &self.entries {
            let amount = entry.debit + entry.credit;
            if !(amount > 0.) || entry.debit < 0. || entry.credit < 0. {
                return Err(LedgerError::NonPositiveAmount {
                    account: entry.account.clone(),
                    amount: if entry.debit != 0. {
                        entry.debit
                    }
                    else {
                        entry.credit
                    },
                })
            }
        }
        let debit: f64 = self.entries.iter().map(|entry| entry.debit).sum();
        let credit: f64 = self.entries.iter().map(|entry| entry.credit).sum();
        if (debit - credit).abs() > AMOUNT_EPSILON {
            return Err(LedgerError::Unbalanced {
                debit, credit, entries: self.entries.len()
            })
        }
        Ok(())
    }

    /// Validates and stores the batch.
    ///
    /// Nothing is stored if the batch is invalid. Returns `false` if a
    /// batch with the same id had already been committed, in which case
    /// nothing is stored either.
    pub fn commit(self, store: &KeyValueStore) -> Result<bool, Error> {
        self.validate()?;
        if !store.execute(|txn| self.write(txn))? {
            debug!(
                "journal {} of team {} already committed",
                self.tx_id, self.team_id
            );
            return Ok(false)
        }
        debug!(
            "committed journal {} of team {} with {} entries",
            self.tx_id, self.team_id, self.entries.len()
        );
        Ok(true)
    }

    fn write(&self, txn: &mut Transaction) -> Result<bool, Error> {
        let team = SegmentBuf::from(self.team_id);
        let tx_id = SegmentBuf::from_str(&self.tx_id).map_err(|err| {
            Error::invalid_key(format!("journal '{}': {err}", self.tx_id))
        })?;
        let record_key = Key::new_scoped(scope(ENTRIES, &team), tx_id);
        if txn.has(&record_key)? {
            return Ok(false)
        }

        let mut balances: BTreeMap<Key, Balance> = BTreeMap::new();
        for entry in &self.entries {
            let key = balance_key(&team, entry.account.segment()?);
            let balance = match balances.entry(key) {
                btree_map::Entry::Occupied(slot) => slot.into_mut(),
                btree_map::Entry::Vacant(slot) => {
                    let stored = txn.get::<Balance>(slot.key())?;
                    slot.insert(stored.unwrap_or_default())
                }
            };
            balance.add(entry);
        }
        for (key, balance) in &balances {
            txn.store(key, balance)?;
        }

        txn.store(
            &record_key,
            &JournalRecord {
                team_id: self.team_id,
                tx_id: self.tx_id.clone(),
                desc: self.desc.clone(),
                entries: self.entries.clone(),
                entry_time: Utc::now(),
            }
        )?;
        Ok(true)
    }
}


//------------ Reading the Books ---------------------------------------------

const ENTRIES: &Segment = &Segment::make("entries");
const BALANCES: &Segment = &Segment::make("balances");

fn scope(kind: &Segment, team: &SegmentBuf) -> Scope {
    Scope::new(vec![LEDGER_SCOPE.into(), kind.into(), team.clone()])
}

fn balance_key(team: &SegmentBuf, account: SegmentBuf) -> Key {
    Key::new_scoped(scope(BALANCES, team), account)
}

/// Returns the balance of an account of a team.
pub fn balance(
    store: &KeyValueStore, team_id: u64, account: &AccountKey
) -> Result<Balance, Error> {
    let key = balance_key(&team_id.into(), account.segment()?);
    Ok(store.get(&key)?.unwrap_or_default())
}

/// Returns all committed journals of a team.
pub fn journals(
    store: &KeyValueStore, team_id: u64
) -> Result<Vec<JournalRecord>, Error> {
    store.read(|txn| {
        let mut res = Vec::new();
        for key in txn.list_keys(&scope(ENTRIES, &team_id.into()))? {
            if let Some(record) = txn.get(&key)? {
                res.push(record)
            }
        }
        Ok(res)
    })
}


//------------ LedgerError ---------------------------------------------------

/// A journal batch violates the rules of double-entry bookkeeping.
#[derive(Clone, Debug, PartialEq)]
pub enum LedgerError {
    /// The sums of debit and credit differ.
    Unbalanced { debit: f64, credit: f64, entries: usize },

    /// The batch has no entries.
    EmptyBatch,

    /// An entry has an amount of zero or less.
    NonPositiveAmount { account: AccountKey, amount: f64 },
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LedgerError::Unbalanced { debit, credit, entries } => {
                write!(f,
                    "unbalanced journal of {entries} entries: \
                     debit {debit} against credit {credit}"
                )
            }
            LedgerError::EmptyBatch => f.write_str("empty journal"),
            LedgerError::NonPositiveAmount { account, amount } => {
                write!(f, "non-positive amount {amount} for account {account}")
            }
        }
    }
}

impl error::Error for LedgerError { }


//============ Tests =========================================================
