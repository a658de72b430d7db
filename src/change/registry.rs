//! Mapping source tables to row decoders.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use log::warn;
use serde_json::Value;
use crate::commons::error::Error;
use crate::models::{
    AdsExpenseHistory, BalanceAccountHistory, ExpenseAccount, ExpenseHistory,
    InvResolution, InvTransaction, Model, Order, OrderAdjustment,
    OrderTimestamp, RestockCost, Team,
};
use super::{RawRecord, Record, Source};


//------------ Decoder -------------------------------------------------------

/// A function turning a row into a typed record.
pub type Decoder = fn(Value) -> Result<Record, serde_json::Error>;

fn decode_model<M: Model>(value: Value) -> Result<Record, serde_json::Error> {
    serde_json::from_value::<M>(value).map(M::into_record)
}


//------------ DecoderRegistry -----------------------------------------------

/// The decoders to use for the rows of each source.
///
/// A registry belongs to one pipeline. It is built before the pipeline
/// starts and handed to it through its context, so separate pipelines,
/// such as those of different tests, never share registrations.
#[derive(Debug, Default)]
pub struct DecoderRegistry {
    decoders: HashMap<Source, Decoder>,

    /// Sources we already warned about lacking a decoder.
    warned: Mutex<HashSet<Source>>,
}

impl DecoderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with decoders for all tables metrics use.
    pub fn with_defaults() -> Self {
        let mut res = Self::new();
        res.decoders.insert(Order::source(), decode_model::<Order>);
        res.decoders.insert(
            OrderAdjustment::source(), decode_model::<OrderAdjustment>
        );
        res.decoders.insert(
            OrderTimestamp::source(), decode_model::<OrderTimestamp>
        );
        res.decoders.insert(
            InvTransaction::source(), decode_model::<InvTransaction>
        );
        res.decoders.insert(
            AdsExpenseHistory::source(), decode_model::<AdsExpenseHistory>
        );
        res.decoders.insert(
            BalanceAccountHistory::source(),
            decode_model::<BalanceAccountHistory>
        );
        res.decoders.insert(
            ExpenseAccount::source(), decode_model::<ExpenseAccount>
        );
        res.decoders.insert(
            ExpenseHistory::source(), decode_model::<ExpenseHistory>
        );
        res.decoders.insert(
            InvResolution::source(), decode_model::<InvResolution>
        );
        res.decoders.insert(RestockCost::source(), decode_model::<RestockCost>);
        res.decoders.insert(Team::source(), decode_model::<Team>);
        res
    }

    /// Registers a decoder for a source.
    ///
    /// Fails if the source already has a decoder.
    pub fn register(
        &mut self, source: Source, decoder: Decoder
    ) -> Result<(), Error> {
        if self.decoders.contains_key(&source) {
            return Err(Error::DuplicateDecoder(source))
        }
        self.decoders.insert(source, decoder);
        Ok(())
    }

    /// Registers the decoder for a model type under its own table.
    pub fn register_model<M: Model>(&mut self) -> Result<(), Error> {
        self.register(M::source(), decode_model::<M>)
    }

    pub fn is_registered(&self, source: &Source) -> bool {
        self.decoders.contains_key(source)
    }

    /// Decodes a row of the given source.
    ///
    /// Without a registered decoder the row stays raw. It must be a JSON
    /// object in either case.
    pub fn decode(&self, source: &Source, value: Value) -> Result<Record, Error> {
        match self.decoders.get(source) {
            Some(decoder) => {
                decoder(value).map_err(|err| Error::decode(source, err))
            }
            None => {
                self.warn_missing(source);
                match value {
                    Value::Object(fields) => {
                        Ok(Record::Raw(RawRecord::new(fields)))
                    }
                    _ => Err(Error::decode(source, "row is not an object")),
                }
            }
        }
    }

    fn warn_missing(&self, source: &Source) {
        let first = match self.warned.lock() {
            Ok(mut warned) => warned.insert(source.clone()),
            Err(_) => true,
        };
        if first {
            warn!("no decoder registered for {source}, keeping rows raw");
        }
    }
}


//============ Tests =========================================================
