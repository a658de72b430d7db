//! Exactly-once processing of the change stream.
//!
//! The [`Resolver`] swaps the stored snapshot of a row for a new one and
//! reports the old one. The [`Classifier`] builds on it to decide, per
//! change event, whether the event takes effect.

pub use self::classifier::{Admission, Classifier, SourcePolicy};
pub use self::resolver::{Resolution, Resolver};

mod classifier;
mod resolver;
