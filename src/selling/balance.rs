//! Day-over-day changes of account balances.
//!
//! A balance history row is a reading of an account balance, not a
//! change. The change of a day is the latest reading of that day minus the
//! latest reading of the nearest earlier day that has one, looking back at
//! most [`LOOKBACK_DAYS`] days. The first day of an account has no change.
//!
//! Readings arrive in any order. Every reading that lands on a day
//! re-computes the change of that day and of the nearest later day, so a
//! late reading corrects what was emitted before. The readings of each
//! account and day are kept under `cache/balance_diff/<account>/<day>`.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use chrono::{DateTime, Days, NaiveDate, Utc};
use log::trace;
use serde::{Deserialize, Serialize};
use crate::change::{ChangeEvent, ModKind, Record};
use crate::commons::error::Error;
use crate::commons::storage::{
    Key, KeyValueStore, Scope, Segment, SegmentBuf, Transaction,
};
use crate::constants::CACHE_SCOPE;
use crate::models::{BalanceAccountHistory, ExpenseAccount};
use super::SellingContext;


/// How many days to look back for the previous reading of an account.
pub const LOOKBACK_DAYS: u64 = 14;

const STATE: &Segment = &Segment::make("balance_diff");


//------------ BalanceDiff ---------------------------------------------------

/// A change of the daily balance difference of an account.
#[derive(Clone, Debug, PartialEq)]
pub struct BalanceDiff {
    pub day: SegmentBuf,
    pub team_id: u64,
    pub account_id: u64,
    pub account_type_id: u64,
    pub amount: f64,
}

impl BalanceDiff {
    pub fn is_shopeepay(&self) -> bool {
        self.account_type_id == ExpenseAccount::SHOPEEPAY_TYPE
    }
}


//------------ BalanceDiffs --------------------------------------------------

/// Turns balance readings into changes of daily differences.
#[derive(Clone, Debug)]
pub struct BalanceDiffs {
    store: Arc<KeyValueStore>,
}

impl BalanceDiffs {
    pub fn new(store: Arc<KeyValueStore>) -> Self {
        BalanceDiffs { store }
    }

    /// Applies a classified event and returns the resulting changes.
    ///
    /// Events of other tables produce nothing. All state is updated in a
    /// single transaction, so a failed event leaves no trace. Applying the
    /// same version of a row twice produces no changes the second time.
    pub fn apply(
        &self, context: &SellingContext, event: &ChangeEvent
    ) -> Result<Vec<BalanceDiff>, Error> {
        let current = match (&event.data, event.kind) {
            (_, ModKind::Delete) => None,
            (Record::BalanceAccountHistory(history), _) => {
                Reading::from_history(context, history)
            }
            _ => None,
        };
        let prior = match &event.prior {
            Some(Record::BalanceAccountHistory(history)) => {
                Reading::from_history(context, history)
            }
            _ => None,
        };
        if current.is_none() && prior.is_none() {
            return Ok(Vec::new())
        }

        let identity = event.identity_key()?;
        let mut accounts = HashMap::new();
        for reading in current.iter().chain(prior.iter()) {
            if !accounts.contains_key(&reading.account_id) {
                let account = context.expense_account(
                    &event.source, &identity, reading.account_id
                )?;
                accounts.insert(reading.account_id, account);
            }
        }

        self.store.execute(|txn| {
            let mut book = DiffBook {
                txn, accounts: &accounts, changes: Vec::new()
            };
            // A reading that stays on its day is replaced by the insert.
            if let Some(prior) = &prior {
                let moved = current.as_ref().is_none_or(|current| {
                    current.account_id != prior.account_id
                        || current.date != prior.date
                });
                if moved {
                    book.remove(prior)?;
                }
            }
            if let Some(current) = &current {
                book.insert(current)?;
            }
            Ok(book.changes)
        })
    }
}


//------------ Reading -------------------------------------------------------

/// A balance reading of an account.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
struct Reading {
    history_id: u64,
    account_id: u64,
    date: NaiveDate,
    at: DateTime<Utc>,
    amount: f64,
}

impl Reading {
    fn from_history(
        context: &SellingContext, history: &BalanceAccountHistory
    ) -> Option<Self> {
        let at = history.at?;
        if history.account_id == 0 {
            return None
        }
        Some(Reading {
            history_id: history.id,
            account_id: history.account_id,
            date: at.with_timezone(context.offset()).date_naive(),
            at,
            amount: history.amount,
        })
    }
}


//------------ DayBalance ----------------------------------------------------

/// The readings of an account on one day.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
struct DayBalance {
    team_id: u64,
    readings: Vec<Reading>,

    /// The change against the previous day as emitted so far.
    diff_amount: f64,
}

impl DayBalance {
    /// Returns the balance at the end of the day.
    ///
    /// This is the reading taken last. Readings taken at the same time are
    /// ordered by their id.
    fn amount(&self) -> f64 {
        self.readings.iter().max_by_key(|reading| {
            (reading.at, reading.history_id)
        }).map(|reading| reading.amount).unwrap_or_default()
    }
}


//------------ DiffBook ------------------------------------------------------

struct DiffBook<'t, 'a> {
    txn: &'t mut Transaction<'a>,
    accounts: &'t HashMap<u64, ExpenseAccount>,
    changes: Vec<BalanceDiff>,
}

impl DiffBook<'_, '_> {
    fn key(account_id: u64, date: NaiveDate) -> Result<Key, Error> {
        let day = date.format("%Y-%m-%d").to_string();
        let day = SegmentBuf::from_str(&day).map_err(|err| {
            Error::invalid_key(format!("day '{day}': {err}"))
        })?;
        Ok(Key::new_scoped(
            Scope::new(vec![
                CACHE_SCOPE.into(), STATE.into(), account_id.into()
            ]),
            day
        ))
    }

    fn get(
        &mut self, account_id: u64, date: NaiveDate
    ) -> Result<Option<DayBalance>, Error> {
        Ok(self.txn.get(&Self::key(account_id, date)?)?)
    }

    fn account_type(&self, account_id: u64) -> u64 {
        self.accounts.get(&account_id).map(|account| {
            account.account_type_id
        }).unwrap_or_default()
    }

    fn emit(
        &mut self, account_id: u64, date: NaiveDate, team_id: u64, amount: f64
    ) -> Result<(), Error> {
        if amount == 0. {
            return Ok(())
        }
        let key = Self::key(account_id, date)?;
        trace!("balance difference of {key} changes by {amount}");
        self.changes.push(BalanceDiff {
            day: key.name().clone(),
            team_id,
            account_id,
            account_type_id: self.account_type(account_id),
            amount,
        });
        Ok(())
    }

    /// Adds a reading or replaces an earlier version of it.
    fn insert(&mut self, reading: &Reading) -> Result<(), Error> {
        let team_id = self.accounts.get(&reading.account_id).map(|account| {
            account.team_id
        }).unwrap_or_default();
        let mut day = match self.get(reading.account_id, reading.date)? {
            Some(day) if day.team_id != team_id => {
                // The account moved to another team.
                self.emit(
                    reading.account_id, reading.date,
                    day.team_id, -day.diff_amount
                )?;
                DayBalance { team_id, diff_amount: 0., ..day }
            }
            Some(day) => day,
            None => DayBalance { team_id, ..Default::default() }
        };
        day.readings.retain(|item| item.history_id != reading.history_id);
        day.readings.push(*reading);
        self.update(reading.account_id, reading.date, day)
    }

    /// Removes a reading if it is still known.
    fn remove(&mut self, reading: &Reading) -> Result<(), Error> {
        let Some(mut day) = self.get(reading.account_id, reading.date)? else {
            return Ok(())
        };
        let len = day.readings.len();
        day.readings.retain(|item| item.history_id != reading.history_id);
        if day.readings.len() == len {
            return Ok(())
        }
        self.update(reading.account_id, reading.date, day)
    }

    /// Stores the readings of a day and re-computes the affected changes.
    fn update(
        &mut self, account_id: u64, date: NaiveDate, day: DayBalance
    ) -> Result<(), Error> {
        let key = Self::key(account_id, date)?;
        if day.readings.is_empty() {
            self.txn.delete(&key)?;
            self.emit(account_id, date, day.team_id, -day.diff_amount)?;
        }
        else {
            self.txn.store(&key, &day)?;
            self.rediff(account_id, date)?;
        }
        if let Some(next) = self.next_date(account_id, date)? {
            self.rediff(account_id, next)?;
        }
        Ok(())
    }

    /// Re-computes the change of a day and emits how it moved.
    fn rediff(
        &mut self, account_id: u64, date: NaiveDate
    ) -> Result<(), Error> {
        let Some(mut day) = self.get(account_id, date)? else {
            return Ok(())
        };
        let diff = match self.previous(account_id, date)? {
            Some(previous) => day.amount() - previous.amount(),
            None => 0.,
        };
        if diff == day.diff_amount {
            return Ok(())
        }
        self.emit(account_id, date, day.team_id, diff - day.diff_amount)?;
        day.diff_amount = diff;
        self.txn.store(&Self::key(account_id, date)?, &day)?;
        Ok(())
    }

    fn previous(
        &mut self, account_id: u64, date: NaiveDate
    ) -> Result<Option<DayBalance>, Error> {
        for n in 1..=LOOKBACK_DAYS {
            let Some(earlier) = date.checked_sub_days(Days::new(n)) else {
                break
            };
            if let Some(day) = self.get(account_id, earlier)? {
                return Ok(Some(day))
            }
        }
        Ok(None)
    }

    fn next_date(
        &mut self, account_id: u64, date: NaiveDate
    ) -> Result<Option<NaiveDate>, Error> {
        for n in 1..=LOOKBACK_DAYS {
            let Some(later) = date.checked_add_days(Days::new(n)) else {
                break
            };
            if self.get(account_id, later)?.is_some() {
                return Ok(Some(later))
            }
        }
        Ok(None)
    }
}


//============ Tests =========================================================
