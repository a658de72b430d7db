//! Various process-wide constants.

use crate::commons::storage::{Namespace, Segment};


//------------ Binary Names -------------------------------------------------

/// The friendly name of the `materialize` binary.
pub const MATERIALIZE_APP: &str = "Materialize";


//------------ Config Files Paths -------------------------------------------

/// The default path to the config file.
pub const MATERIALIZE_DEFAULT_CONFIG_FILE: &str = "./materialize.conf";


//------------ Environment Variables ----------------------------------------

/// The environment variable with the log level.
///
/// The variable should contain the name of a [`log::LevelFilter`]. It will
/// be overwritten by the config file. The default is “info.”
pub const MATERIALIZE_ENV_LOG_LEVEL: &str = "MATERIALIZE_LOG_LEVEL";

/// The environment variable indicating the default storage URI.
///
/// The value will be overwritten with that in the config file. Defaults to
/// `local://./data` if not set or not a valid URI.
pub const MATERIALIZE_ENV_STORAGE_URI: &str = "MATERIALIZE_STORAGE_URI";


//------------ Storage Namespaces -------------------------------------------

/// The namespace holding snapshots, totals and ledger postings.
pub const MATERIALIZE_NS: &Namespace = &Namespace::make("materialize");


//------------ Key Scopes ---------------------------------------------------

/// The schema of the operational database tables.
pub const PUBLIC_SCHEMA: &Segment = &Segment::make("public");

/// The first segment of all aggregate keys.
pub const METRIC_SCOPE: &Segment = &Segment::make("metric");

/// The first segment of derived lookup entries.
pub const CACHE_SCOPE: &Segment = &Segment::make("cache");

/// The first segment of ledger postings.
pub const LEDGER_SCOPE: &Segment = &Segment::make("ledger");


//------------ Aggregation Defaults -----------------------------------------

/// The default flush period of an aggregation engine in seconds.
pub const DFLT_FLUSH_INTERVAL_SECS: u64 = 5;

/// The default capacity of the channels between sources and the pipeline.
pub const DFLT_CHANNEL_CAPACITY: usize = 1024;

/// The tolerance when comparing monetary sums.
pub const AMOUNT_EPSILON: f64 = 1e-6;
