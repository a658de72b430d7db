//! The scope portion of a key.

use std::{fmt, str};
use super::segment::{ParseSegmentError, Segment, SegmentBuf};


//------------ Scope ---------------------------------------------------------

/// The path of segments a key lives under.
///
/// Snapshots live in a `schema/table` scope, aggregates in a
/// `metric/<family>/<day>` scope and ledger postings under `ledger`. The
/// empty scope is the global scope.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Scope {
    segments: Vec<SegmentBuf>,
}

impl Scope {
    pub fn new(segments: Vec<SegmentBuf>) -> Self {
        Scope { segments }
    }

    /// Returns the global scope that contains every key.
    pub fn global() -> Self {
        Scope::default()
    }

    pub fn is_global(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SegmentBuf> {
        self.segments.iter()
    }

    /// Returns whether this scope equals `prefix` or lies below it.
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Returns the scope one level below this one.
    pub fn with_sub_scope(&self, segment: impl Into<SegmentBuf>) -> Self {
        let mut res = self.clone();
        res.add_sub_scope(segment);
        res
    }

    pub fn add_sub_scope(&mut self, segment: impl Into<SegmentBuf>) {
        self.segments.push(segment.into());
    }
}

impl str::FromStr for Scope {
    type Err = ParseSegmentError;

    /// Parses the textual form. A trailing separator is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_suffix(Segment::SEPARATOR).unwrap_or(s);
        if s.is_empty() {
            return Ok(Scope::global())
        }
        s.split(Segment::SEPARATOR).map(str::FromStr::from_str).collect()
    }
}

impl FromIterator<SegmentBuf> for Scope {
    fn from_iter<T: IntoIterator<Item = SegmentBuf>>(iter: T) -> Self {
        Scope::new(iter.into_iter().collect())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut segments = self.segments.iter();
        if let Some(first) = segments.next() {
            f.write_str(first.as_str())?;
            for segment in segments {
                write!(f, "{}{}", Segment::SEPARATOR, segment)?;
            }
        }
        Ok(())
    }
}


//============ Tests =========================================================
