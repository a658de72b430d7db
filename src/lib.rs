//! The _materialize_ library crate.
//!
//! Turns a stream of row changes of an operational database into daily
//! business metrics and ledger postings, taking every row into account
//! exactly once.

pub mod change;
pub mod commons;
pub mod config;
pub mod constants;
pub mod exactly_once;
pub mod ledger;
pub mod metric;
pub mod models;
pub mod pipeline;
pub mod selling;
