//! Incremental aggregation.
//!
//! Metric pipelines turn change events into deltas of an [`Aggregate`]
//! and hand them to an [`AggregateEngine`]. The engine coalesces deltas in
//! memory and periodically folds them into the totals kept in the store,
//! passing every new total on to its [`FlushListener`]s.
//!
//! Deltas are trusted. The engine does not try to detect duplicates; that
//! is the job of the [`Classifier`][crate::exactly_once::Classifier]
//! upstream.

pub use self::engine::{AggregateEngine, FlushReport, OutputTransform};
pub use self::listener::{FlushListener, JsonLinesSink, TotalsCollector};
pub use self::retract::retraction;

mod engine;
mod listener;
mod retract;

use std::fmt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use crate::commons::storage::Key;


//------------ Aggregate -----------------------------------------------------

/// A partial or total sum stored under an aggregation key.
///
/// Amount fields are summed when merging. Fields that hold derived display
/// values, such as a name, are last-write-wins.
pub trait Aggregate:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned
    + Send + Sync + 'static
{
    /// Returns the key the aggregate is stored under.
    fn key(&self) -> Key;

    /// Merges an older aggregate of the same key into this one.
    ///
    /// Amounts are added up. Last-write-wins fields keep the value of
    /// `self` unless it is unset.
    fn merge(self, older: Self) -> Self;

    /// Returns the aggregate with all amounts negated.
    ///
    /// Merging the result undoes a previous merge of `self`.
    fn negate(&self) -> Self;
}
