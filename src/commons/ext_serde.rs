//! Helpers for serializing and deserializing external types.

use std::str::FromStr;
use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use log::LevelFilter;
use serde::{de, Deserialize, Deserializer, Serializer};


//------------ LevelFilter ---------------------------------------------------

pub fn de_level_filter<'de, D>(d: D) -> Result<LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    let string = String::deserialize(d)?;
    LevelFilter::from_str(&string).map_err(de::Error::custom)
}


//------------ FixedOffset ---------------------------------------------------

/// Deserializes a UTC offset written as `+HH:MM` or `-HH:MM`.
pub fn de_utc_offset<'de, D>(d: D) -> Result<FixedOffset, D::Error>
where
    D: Deserializer<'de>,
{
    let string = String::deserialize(d)?;
    FixedOffset::from_str(&string).map_err(|_| {
        de::Error::custom(format!(
            "expected an offset like \"+07:00\", found: \"{string}\""
        ))
    })
}


//------------ Source Timestamps ---------------------------------------------

/// Parses a timestamp as the source database writes it.
///
/// Accepts RFC 3339 as well as the `YYYY-MM-DD HH:MM:SS` form without an
/// offset, which is taken as UTC. The zero time of the source,
/// `0001-01-01T00:00:00Z`, means the timestamp is not set.
pub fn parse_source_time(s: &str) -> Result<Option<DateTime<Utc>>, String> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(None)
    }
    let time = match DateTime::parse_from_rfc3339(s) {
        Ok(time) => time.with_timezone(&Utc),
        Err(_) => {
            let naive = NaiveDateTime::parse_from_str(
                s, "%Y-%m-%d %H:%M:%S%.f"
            ).or_else(|_| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            }).map_err(|err| format!("invalid timestamp '{s}': {err}"))?;
            naive.and_utc()
        }
    };
    if is_zero_time(&time) {
        Ok(None)
    }
    else {
        Ok(Some(time))
    }
}

/// Seconds since the epoch of `0001-01-01T00:00:00Z`.
const ZERO_TIME: i64 = -62_135_596_800;

fn is_zero_time(time: &DateTime<Utc>) -> bool {
    time.timestamp() <= ZERO_TIME
}

/// Deserializes an optional source timestamp.
///
/// Use together with `#[serde(default)]` so that a missing field is
/// accepted, too.
pub fn de_opt_time<'de, D>(d: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(d)? {
        Some(string) => parse_source_time(&string).map_err(de::Error::custom),
        None => Ok(None),
    }
}

pub fn ser_opt_time<S>(
    time: &Option<DateTime<Utc>>, s: S
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match time {
        Some(time) => s.serialize_str(&time.to_rfc3339()),
        None => s.serialize_none(),
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde::Serialize;

    #[derive(Debug, Deserialize, Serialize)]
    struct Stamped {
        #[serde(
            default,
            deserialize_with = "de_opt_time",
            serialize_with = "ser_opt_time"
        )]
        at: Option<DateTime<Utc>>,
    }

    fn at(json: &str) -> Option<DateTime<Utc>> {
        serde_json::from_str::<Stamped>(json).unwrap().at
    }

    #[test]
    fn zero_time_is_unset() {
        assert_eq!(at(r#"{"at": "0001-01-01T00:00:00Z"}"#), None);
        assert_eq!(at(r#"{"at": null}"#), None);
        assert_eq!(at(r#"{}"#), None);
    }

    #[test]
    fn accepts_source_forms() {
        let expected = Utc.with_ymd_and_hms(2025, 8, 1, 10, 0, 0).unwrap();
        assert_eq!(at(r#"{"at": "2025-08-01T10:00:00Z"}"#), Some(expected));
        assert_eq!(
            at(r#"{"at": "2025-08-01T17:00:00+07:00"}"#), Some(expected)
        );
        assert_eq!(at(r#"{"at": "2025-08-01 10:00:00"}"#), Some(expected));
        assert!(serde_json::from_str::<Stamped>(r#"{"at": "soon"}"#).is_err());
    }

    #[test]
    fn unset_serializes_as_null() {
        let json = serde_json::to_string(&Stamped { at: None }).unwrap();
        assert_eq!(json, r#"{"at":null}"#);
    }

    #[test]
    fn utc_offset() {
        #[derive(Deserialize)]
        struct Offset {
            #[serde(deserialize_with = "de_utc_offset")]
            offset: FixedOffset,
        }
        let offset: Offset = toml::from_str(r#"offset = "+07:00""#).unwrap();
        assert_eq!(offset.offset.local_minus_utc(), 7 * 3600);
        assert!(toml::from_str::<Offset>(r#"offset = "WIB""#).is_err());
    }
}
