//! Turning adapter output into change events.
//!
//! Replication events arrive as JSON lines. Backfill rows arrive as a
//! field map plus the column types of the scanned table.

use std::collections::HashMap;
use std::str::FromStr;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use crate::commons::error::Error;
use crate::commons::ext_serde::parse_source_time;
use super::{ChangeEvent, DecoderRegistry, ModKind, Source};


//------------ WireEvent -----------------------------------------------------

/// A change event as written on a JSON line.
///
/// An `old_data` member supplied by replication sources is accepted and
/// ignored. The prior version of a row always comes from its snapshot.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct WireEvent {
    pub source: Source,
    pub kind: ModKind,
    pub data: Value,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl WireEvent {
    /// Parses a single line.
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// Decodes the rows and produces the change event.
    pub fn into_event(
        self, registry: &DecoderRegistry
    ) -> Result<ChangeEvent, Error> {
        let data = registry.decode(&self.source, self.data)?;
        Ok(ChangeEvent::new(self.source, self.kind, data)
            .with_timestamp(self.timestamp))
    }
}


//------------ ColumnType ----------------------------------------------------

/// The type of a column as reported by a historical scan.
///
/// Scans hand over values in their textual form for some types. The
/// column type tells how to turn them into JSON values again.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ColumnType {
    Integer,
    Numeric,
    Boolean,
    Timestamp,
    Text,
    Other,
}

impl FromStr for ColumnType {
    type Err = std::convert::Infallible;

    /// Maps a Postgres type name. Unknown names become `Other`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "int2" | "int4" | "int8" | "smallint" | "integer" | "bigint"
            | "serial" | "bigserial" => ColumnType::Integer,
            "numeric" | "decimal" | "float4" | "float8" | "real"
            | "double precision" | "money" => ColumnType::Numeric,
            "bool" | "boolean" => ColumnType::Boolean,
            "timestamp" | "timestamptz" | "date"
            | "timestamp without time zone"
            | "timestamp with time zone" => ColumnType::Timestamp,
            "text" | "varchar" | "character varying" | "char" | "bpchar"
            | "uuid" => ColumnType::Text,
            _ => ColumnType::Other,
        })
    }
}

impl ColumnType {
    /// Converts a scanned value into the form decoders expect.
    fn convert(self, column: &str, value: Value) -> Result<Value, String> {
        let text = match value {
            Value::String(text) => text,
            other => return Ok(other),
        };
        let bad = |err: &dyn std::fmt::Display| {
            format!("column '{column}': cannot convert '{text}': {err}")
        };
        match self {
            ColumnType::Integer => {
                let int = i64::from_str(text.trim()).map_err(|e| bad(&e))?;
                Ok(Value::from(int))
            }
            ColumnType::Numeric => {
                let num = f64::from_str(text.trim()).map_err(|e| bad(&e))?;
                Number::from_f64(num).map(Value::Number).ok_or_else(|| {
                    bad(&"not a finite number")
                })
            }
            ColumnType::Boolean => match text.as_str() {
                "t" | "true" | "TRUE" => Ok(Value::Bool(true)),
                "f" | "false" | "FALSE" => Ok(Value::Bool(false)),
                _ => Err(bad(&"not a boolean")),
            },
            ColumnType::Timestamp => {
                match parse_source_time(&text).map_err(|e| bad(&e))? {
                    Some(time) => Ok(Value::String(time.to_rfc3339())),
                    None => Ok(Value::Null),
                }
            }
            ColumnType::Text | ColumnType::Other => Ok(Value::String(text)),
        }
    }
}


//------------ backfill_event ------------------------------------------------

/// Wraps a row of a historical scan into a backfill event.
///
/// Columns missing from `columns` are passed on unchanged.
pub fn backfill_event(
    source: Source,
    row: Map<String, Value>,
    columns: &HashMap<String, ColumnType>,
    registry: &DecoderRegistry,
) -> Result<ChangeEvent, Error> {
    let mut fields = Map::with_capacity(row.len());
    for (column, value) in row {
        let value = match columns.get(&column) {
            Some(kind) => kind.convert(&column, value).map_err(|err| {
                Error::decode(&source, err)
            })?,
            None => value,
        };
        fields.insert(column, value);
    }
    let data = registry.decode(&source, Value::Object(fields))?;
    Ok(ChangeEvent::new(source, ModKind::Backfill, data))
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::change::Record;

    #[test]
    fn parse_line() {
        let registry = DecoderRegistry::with_defaults();
        let event = WireEvent::parse(
            r#"{"source": {"schema": "public", "table": "teams"},
                "kind": "update",
                "data": {"id": 3, "name": "New"},
                "old_data": {"id": 3, "name": "Old"},
                "timestamp": "2025-08-01T10:00:00Z"}"#
        ).unwrap().into_event(&registry).unwrap();

        assert_eq!(event.kind, ModKind::Update);
        assert_eq!(event.identity_key().unwrap().to_string(), "public/teams/3");
        assert!(matches!(event.data, Record::Team(ref team) if team.name == "New"));
        assert!(event.prior.is_none());
    }

    #[test]
    fn reject_bad_source() {
        assert!(WireEvent::parse(
            r#"{"source": {"schema": "public", "table": "a/b"},
                "kind": "insert", "data": {}}"#
        ).is_err());
        assert!(WireEvent::parse(
            r#"{"source": {"schema": "public", "table": "t"},
                "kind": "upsert", "data": {}}"#
        ).is_err());
    }

    #[test]
    fn backfill_converts_columns() {
        let registry = DecoderRegistry::with_defaults();
        let columns: HashMap<_, _> = [
            ("id", "int8"), ("amount", "numeric"), ("at", "timestamptz"),
            ("note", "text"),
        ].into_iter().map(|(name, kind)| {
            (name.to_string(), ColumnType::from_str(kind).unwrap())
        }).collect();
        let row = json!({
            "id": "7", "amount": "1500.50", "at": "2025-08-01 03:00:00",
            "note": "boost", "marketplace_id": 2
        });
        let Value::Object(row) = row else { unreachable!() };

        let event = backfill_event(
            Source::public("ads_expense_histories"), row, &columns, &registry
        ).unwrap();
        assert_eq!(event.kind, ModKind::Backfill);
        match event.data {
            Record::AdsExpenseHistory(ads) => {
                assert_eq!(ads.id, 7);
                assert_eq!(ads.amount, 1500.5);
                assert_eq!(ads.marketplace_id, 2);
                assert!(ads.at.is_some());
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn backfill_rejects_garbage() {
        let registry = DecoderRegistry::new();
        let columns = HashMap::from([
            ("id".to_string(), ColumnType::Integer)
        ]);
        let row = Map::from_iter([("id".to_string(), json!("seven"))]);
        let err = backfill_event(
            Source::public("payments"), row, &columns, &registry
        ).unwrap_err();
        assert!(err.is_decode());
    }
}
