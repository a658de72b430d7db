//! Storage backends.
//!
//! A backend only has to know how to read single values, list keys, apply
//! a complete write set at once, and lock the namespace. Buffering writes
//! until commit is done by [`Transaction`][super::Transaction] for all
//! backends alike.

//============ Modules =======================================================
//
// These need to be added to the macro invocation at the very bottom of
// store.rs.

pub mod disk;
pub mod memory;


//============ Shared Types ==================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;
use super::types::Key;


//------------ LockMode ------------------------------------------------------

/// How a transaction locks the namespace.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LockMode {
    /// Other shared transactions may run at the same time.
    Shared,

    /// No other transaction may run at the same time.
    Exclusive,
}


//------------ Write ---------------------------------------------------------

/// A single buffered change to be applied on commit.
///
/// A value of `None` removes the key.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Write {
    pub key: Key,
    pub value: Option<Value>,
}
