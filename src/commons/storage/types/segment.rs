//! The parts of a key.

use std::{error, fmt, str};
use serde::{Deserialize, Deserializer, Serialize, Serializer};


//------------ Checking ------------------------------------------------------

/// Checks that `s` can be used as a key segment.
///
/// Segments end up as file and directory names of the disk backend. They
/// must not be empty, contain the separator, start or end with white
/// space, or be `.` or `..`.
const fn check(s: &str) -> Result<(), ParseSegmentError> {
    let bytes = s.as_bytes();
    if bytes.is_empty() {
        return Err(ParseSegmentError::Empty)
    }
    if bytes[0].is_ascii_whitespace()
        || bytes[bytes.len() - 1].is_ascii_whitespace()
    {
        return Err(ParseSegmentError::Whitespace)
    }
    if matches!(bytes, b"." | b"..") {
        return Err(ParseSegmentError::DotName)
    }
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == Segment::SEPARATOR as u8 {
            return Err(ParseSegmentError::Separator)
        }
        i += 1;
    }
    Ok(())
}


//------------ Segment -------------------------------------------------------

/// A key segment known when the program is built.
///
/// Used for the fixed parts of keys such as `metric` or `daily_shop`.
/// Segments computed at run time are [`SegmentBuf`]s.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Segment(&'static str);

impl Segment {
    /// The character joining the segments of a key.
    pub const SEPARATOR: char = '/';

    /// Creates a segment or panics if `s` is not a valid segment.
    ///
    /// Used in constants, where the panic fails the build.
    pub const fn make(s: &'static str) -> Self {
        if check(s).is_err() {
            panic!("invalid key segment")
        }
        Segment(s)
    }

    pub const fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.0)
    }
}


//------------ SegmentBuf ----------------------------------------------------

/// A key segment, such as a row id or a day.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SegmentBuf(String);

impl SegmentBuf {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl str::FromStr for SegmentBuf {
    type Err = ParseSegmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        check(s)?;
        Ok(SegmentBuf(s.into()))
    }
}

impl TryFrom<String> for SegmentBuf {
    type Error = ParseSegmentError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        check(&s)?;
        Ok(SegmentBuf(s))
    }
}

impl From<Segment> for SegmentBuf {
    fn from(segment: Segment) -> Self {
        SegmentBuf(segment.0.into())
    }
}

impl From<&Segment> for SegmentBuf {
    fn from(segment: &Segment) -> Self {
        SegmentBuf(segment.0.into())
    }
}

/// Row ids are always valid segments.
impl From<u64> for SegmentBuf {
    fn from(id: u64) -> Self {
        SegmentBuf(id.to_string())
    }
}

impl Serialize for SegmentBuf {
    fn serialize<S: Serializer>(
        &self, serializer: S
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SegmentBuf {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D
    ) -> Result<Self, D::Error> {
        SegmentBuf::try_from(String::deserialize(deserializer)?)
            .map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for SegmentBuf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}


//------------ ParseSegmentError ---------------------------------------------

/// A string cannot be used as a key segment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParseSegmentError {
    Empty,
    Whitespace,
    Separator,
    DotName,
}

impl fmt::Display for ParseSegmentError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            ParseSegmentError::Empty => "empty segment",
            ParseSegmentError::Whitespace => {
                "segment starts or ends with white space"
            }
            ParseSegmentError::Separator => "segment contains '/'",
            ParseSegmentError::DotName => "segment is '.' or '..'",
        })
    }
}

impl error::Error for ParseSegmentError { }


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn parse(s: &str) -> Result<SegmentBuf, ParseSegmentError> {
        SegmentBuf::from_str(s)
    }

    #[test]
    fn invalid_segments() {
        assert_eq!(parse(""), Err(ParseSegmentError::Empty));
        assert_eq!(parse("orders/1"), Err(ParseSegmentError::Separator));
        assert_eq!(parse(" orders"), Err(ParseSegmentError::Whitespace));
        assert_eq!(parse("orders\n"), Err(ParseSegmentError::Whitespace));
        assert_eq!(parse("."), Err(ParseSegmentError::DotName));
        assert_eq!(parse(".."), Err(ParseSegmentError::DotName));
    }

    #[test]
    fn valid_segments() {
        for s in ["order items", "...", ".hidden", "2025-08-01", "a-1"] {
            assert_eq!(parse(s).unwrap().as_str(), s);
        }
        assert_eq!(SegmentBuf::from(42u64).as_str(), "42");
        assert_eq!(
            SegmentBuf::from(Segment::make("daily_shop")).as_str(),
            "daily_shop"
        );
    }

    #[test]
    fn serde_rejects_invalid() {
        let ok: SegmentBuf = serde_json::from_str("\"orders\"").unwrap();
        assert_eq!(ok.as_str(), "orders");
        assert!(serde_json::from_str::<SegmentBuf>("\"a/b\"").is_err());
    }
}
