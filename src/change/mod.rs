//! Change events of the operational database.
//!
//! A [`ChangeEvent`] describes one row-level modification of a source
//! table. Its record is decoded once, when the event enters the process,
//! through the [`DecoderRegistry`]. Tables without a registered decoder
//! keep their rows as a [`RawRecord`].

pub use self::registry::{Decoder, DecoderRegistry};
pub use self::wire::{ColumnType, WireEvent, backfill_event};

mod registry;
mod wire;

use std::fmt;
use std::str::FromStr;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use crate::commons::error::Error;
use crate::commons::storage::{Key, Scope, Segment, SegmentBuf};
use crate::constants::PUBLIC_SCHEMA;
use crate::models::{
    AdsExpenseHistory, BalanceAccountHistory, ExpenseAccount, ExpenseHistory,
    InvResolution, InvTransaction, Model, Order, OrderAdjustment,
    OrderTimestamp, RestockCost, Team,
};


//------------ Source --------------------------------------------------------

/// The table a change event originates from.
#[derive(
    Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize
)]
pub struct Source {
    pub schema: SegmentBuf,
    pub table: SegmentBuf,
}

impl Source {
    pub fn new(
        schema: impl Into<SegmentBuf>, table: impl Into<SegmentBuf>
    ) -> Self {
        Source { schema: schema.into(), table: table.into() }
    }

    /// Creates the source for a table of the public schema.
    ///
    /// Panics if `table` is not a valid key segment.
    pub fn public(table: &'static str) -> Self {
        Source::new(PUBLIC_SCHEMA, Segment::make(table))
    }

    /// Returns the scope holding the snapshots of this source.
    pub fn scope(&self) -> Scope {
        Scope::new(vec![self.schema.clone(), self.table.clone()])
    }

    /// Returns the identity key of a row of this source.
    pub fn identity_key(&self, id: impl Into<SegmentBuf>) -> Key {
        Key::new_scoped(self.scope(), id)
    }
}


//--- FromStr and Display

impl FromStr for Source {
    type Err = Error;

    /// Parses the `schema.table` form used in the configuration.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (schema, table) = s.split_once('.').ok_or_else(|| {
            Error::invalid_key(format!("expected 'schema.table', got '{s}'"))
        })?;
        Ok(Source::new(
            SegmentBuf::from_str(schema).map_err(Error::invalid_key)?,
            SegmentBuf::from_str(table).map_err(Error::invalid_key)?,
        ))
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}


//------------ ModKind -------------------------------------------------------

/// The kind of modification described by a change event.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize
)]
#[serde(rename_all = "lowercase")]
pub enum ModKind {
    Insert,
    Update,
    Delete,

    /// A row found by a historical scan rather than live replication.
    Backfill,
}

impl fmt::Display for ModKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            ModKind::Insert => "insert",
            ModKind::Update => "update",
            ModKind::Delete => "delete",
            ModKind::Backfill => "backfill",
        })
    }
}


//------------ RawRecord -----------------------------------------------------

/// A row of a table without a registered decoder.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RawRecord(Map<String, Value>);

impl RawRecord {
    /// The field a raw row's identity is taken from.
    pub const IDENTITY_FIELD: &'static str = "id";

    pub fn new(fields: Map<String, Value>) -> Self {
        RawRecord(fields)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Returns the identity segment of the row.
    ///
    /// This is the `id` field, which must be a non-negative integer or a
    /// string that is a valid key segment.
    pub fn identity(&self, source: &Source) -> Result<SegmentBuf, Error> {
        let missing = || Error::MissingIdentity {
            source: source.clone(), field: Self::IDENTITY_FIELD
        };
        match self.0.get(Self::IDENTITY_FIELD).ok_or_else(missing)? {
            Value::Number(num) => {
                num.as_u64().map(SegmentBuf::from).ok_or_else(|| {
                    Error::invalid_key(format!(
                        "identity {num} of {source} is not a row id"
                    ))
                })
            }
            Value::String(s) => {
                SegmentBuf::from_str(s).map_err(Error::invalid_key)
            }
            _ => Err(missing()),
        }
    }
}


//------------ Record --------------------------------------------------------

/// The row carried by a change event.
///
/// Rows of tables with a registered decoder are typed. All others stay
/// raw. Serializes as the bare row.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Record {
    Raw(RawRecord),
    Order(Order),
    OrderAdjustment(OrderAdjustment),
    OrderTimestamp(OrderTimestamp),
    InvTransaction(InvTransaction),
    AdsExpenseHistory(AdsExpenseHistory),
    BalanceAccountHistory(BalanceAccountHistory),
    ExpenseAccount(ExpenseAccount),
    ExpenseHistory(ExpenseHistory),
    InvResolution(InvResolution),
    RestockCost(RestockCost),
    Team(Team),
}

impl Record {
    /// Returns whether the record was decoded into a concrete type.
    pub fn is_typed(&self) -> bool {
        !matches!(self, Record::Raw(_))
    }

    /// Returns the identity key of the record as a row of `source`.
    pub fn identity_key(&self, source: &Source) -> Result<Key, Error> {
        let id = match self {
            Record::Raw(raw) => return Ok(source.identity_key(
                raw.identity(source)?
            )),
            Record::Order(inner) => inner.id(),
            Record::OrderAdjustment(inner) => inner.id(),
            Record::OrderTimestamp(inner) => inner.id(),
            Record::InvTransaction(inner) => inner.id(),
            Record::AdsExpenseHistory(inner) => inner.id(),
            Record::BalanceAccountHistory(inner) => inner.id(),
            Record::ExpenseAccount(inner) => inner.id(),
            Record::ExpenseHistory(inner) => inner.id(),
            Record::InvResolution(inner) => inner.id(),
            Record::RestockCost(inner) => inner.id(),
            Record::Team(inner) => inner.id(),
        };
        if id == 0 {
            return Err(Error::MissingIdentity {
                source: source.clone(), field: RawRecord::IDENTITY_FIELD
            })
        }
        Ok(source.identity_key(id))
    }
}


//------------ ChangeEvent ---------------------------------------------------

/// A single row-level change of a source table.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    /// The table the row belongs to.
    pub source: Source,

    /// What happened to the row.
    pub kind: ModKind,

    /// The current row.
    ///
    /// For a delete this is whatever the source supplied, usually just the
    /// identity columns.
    pub data: Record,

    /// The previously known version of the row.
    ///
    /// Attached by the classifier when the row had been seen before.
    pub prior: Option<Record>,

    /// When the change was captured by the producer.
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(source: Source, kind: ModKind, data: Record) -> Self {
        ChangeEvent {
            source, kind, data,
            prior: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Returns the identity key of the event's row.
    pub fn identity_key(&self) -> Result<Key, Error> {
        self.data.identity_key(&self.source)
    }

    /// Returns the identity key or a placeholder for logging.
    pub fn identity_display(&self) -> String {
        match self.identity_key() {
            Ok(key) => key.to_string(),
            Err(_) => format!("{}/<unknown>", self.source.scope()),
        }
    }
}


//============ Tests =========================================================
