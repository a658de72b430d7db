#![allow(dead_code)] // Different tests use different parts.

use std::sync::Arc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tempfile::TempDir;
use url::Url;
use materialize::change::{ChangeEvent, DecoderRegistry, Record, WireEvent};
use materialize::commons::error::Error;
use materialize::commons::storage::{Key, KeyValueStore, Scope, SegmentBuf};
use materialize::config::Config;
use materialize::constants::MATERIALIZE_NS;
use materialize::metric::Aggregate;
use materialize::pipeline::PipelineContext;


//------------ Stores --------------------------------------------------------

pub fn mem_store() -> Arc<KeyValueStore> {
    Arc::new(
        KeyValueStore::create(&Url::parse("memory:").unwrap(), MATERIALIZE_NS)
            .unwrap()
    )
}

pub fn disk_store(dir: &TempDir) -> Arc<KeyValueStore> {
    let uri = Url::parse(
        &format!("local://{}", dir.path().display())
    ).unwrap();
    Arc::new(KeyValueStore::create(&uri, MATERIALIZE_NS).unwrap())
}

/// Returns a pipeline context on the given store.
///
/// Days are bucketed at UTC+7.
pub fn context(store: Arc<KeyValueStore>) -> PipelineContext {
    let config = Config {
        utc_offset: "+07:00".parse().unwrap(),
        ..Default::default()
    };
    PipelineContext::new(
        Arc::new(config), store, Arc::new(DecoderRegistry::with_defaults())
    )
}


//------------ Events --------------------------------------------------------

/// Decodes an event the way it arrives on the wire.
pub fn event(
    registry: &DecoderRegistry, table: &str, kind: &str, data: Value
) -> ChangeEvent {
    let line = json!({
        "source": {"schema": "public", "table": table},
        "kind": kind,
        "data": data,
    });
    WireEvent::parse(&line.to_string()).unwrap()
        .into_event(registry).unwrap()
}


//------------ DayAmount -----------------------------------------------------

/// The daily sum of the rows of `public.payments`.
///
/// The table has no decoder, so its rows stay raw.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DayAmount {
    pub day: String,
    pub amount: f64,
}

impl DayAmount {
    pub fn key_for(day: &str) -> Key {
        Key::new_scoped(
            Scope::new(vec![
                "metric".parse().unwrap(), "payments".parse().unwrap()
            ]),
            day.parse::<SegmentBuf>().unwrap(),
        )
    }

    /// Returns what a payment row adds to the daily sums.
    pub fn contribution(record: &Record) -> Result<Vec<Self>, Error> {
        let raw = match record {
            Record::Raw(raw) => raw,
            _ => return Ok(Vec::new()),
        };
        let day = raw.get("day").and_then(Value::as_str);
        let amount = raw.get("amount").and_then(Value::as_f64);
        match (day, amount) {
            (Some(day), Some(amount)) => {
                Ok(vec![DayAmount { day: day.into(), amount }])
            }
            _ => Ok(Vec::new()),
        }
    }
}

impl Aggregate for DayAmount {
    fn key(&self) -> Key {
        Self::key_for(&self.day)
    }

    fn merge(self, older: Self) -> Self {
        DayAmount { amount: self.amount + older.amount, ..self }
    }

    fn negate(&self) -> Self {
        DayAmount { day: self.day.clone(), amount: -self.amount }
    }
}
