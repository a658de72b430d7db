//! The errors of processing change events.

use std::{error, fmt};
use crate::change::Source;
use crate::commons::storage::{self, Key};
use crate::ledger::LedgerError;


//------------ Error ---------------------------------------------------------

/// An error happened while processing a change event or flushing totals.
///
/// An absent snapshot is never an error. It shows up as `None` from the
/// store and drives classification instead.
#[derive(Debug)]
pub enum Error {
    /// Accessing the store failed.
    Storage(storage::Error),

    /// A record of the given source could not be decoded.
    Decode { source: Source, err: String },

    /// A second decoder was registered for a source.
    DuplicateDecoder(Source),

    /// A record lacks the field its identity key is derived from.
    MissingIdentity { source: Source, field: &'static str },

    /// A record refers to another record that is not known.
    ReferenceNotFound { source: Source, identity: Key, reference: Key },

    /// A journal batch was rejected.
    Ledger(LedgerError),

    /// A value cannot be turned into a key segment.
    InvalidKey(String),
}

impl Error {
    pub fn decode(source: &Source, err: impl fmt::Display) -> Self {
        Error::Decode { source: source.clone(), err: err.to_string() }
    }

    pub fn invalid_key(err: impl fmt::Display) -> Self {
        Error::InvalidKey(err.to_string())
    }

    /// Returns whether the error is caused by data that cannot be decoded.
    ///
    /// These errors concern a single key and point at a schema mismatch
    /// between the database and this program.
    pub fn is_decode(&self) -> bool {
        match self {
            Error::Storage(err) => err.is_decode(),
            Error::Decode { .. } => true,
            _ => false,
        }
    }
}


//--- From

impl From<storage::Error> for Error {
    fn from(err: storage::Error) -> Self {
        Error::Storage(err)
    }
}

impl From<LedgerError> for Error {
    fn from(err: LedgerError) -> Self {
        Error::Ledger(err)
    }
}


//--- Display and Error

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Storage(err) => write!(f, "storage error: {err}"),
            Error::Decode { source, err } => {
                write!(f, "cannot decode record of {source}: {err}")
            }
            Error::DuplicateDecoder(source) => {
                write!(f, "a decoder for {source} is already registered")
            }
            Error::MissingIdentity { source, field } => {
                write!(f,
                    "record of {source} has no identity field '{field}'"
                )
            }
            Error::ReferenceNotFound { source, identity, reference } => {
                write!(f,
                    "record '{identity}' of {source} refers to unknown \
                     '{reference}'"
                )
            }
            Error::Ledger(err) => write!(f, "ledger error: {err}"),
            Error::InvalidKey(err) => write!(f, "invalid key: {err}"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Storage(err) => Some(err),
            Error::Ledger(err) => Some(err),
            _ => None,
        }
    }
}


//============ Tests =========================================================
