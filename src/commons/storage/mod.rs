//! Durable storage of snapshots and aggregate totals.

pub use self::store::{Error, KeyValueStore, StoreNewError, Transaction, Value};
pub use self::types::{
    Key, Namespace, ParseSegmentError, Scope, Segment, SegmentBuf
};

mod backends;
mod store;
mod types;
