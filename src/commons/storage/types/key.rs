//! The key of a stored value.

use std::{fmt, str};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use super::scope::Scope;
use super::segment::{ParseSegmentError, Segment, SegmentBuf};


//------------ Key -----------------------------------------------------------

/// The key of a stored value.
///
/// A key consists of a [`Scope`] and a *name* represented by a
/// [`SegmentBuf`]. Its textual form joins all segments with
/// [`Segment::SEPARATOR`], e.g. `public/orders/1`.
///
/// Keys are ordered segment by segment, so all keys of a scope sort
/// together.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Key {
    scope: Scope,
    name: SegmentBuf,
}

impl Key {
    /// Create a key from both a scope and a name.
    pub fn new_scoped(scope: Scope, name: impl Into<SegmentBuf>) -> Key {
        Key {
            name: name.into(),
            scope,
        }
    }

    /// Create a key in the global scope.
    pub fn new_global(name: impl Into<SegmentBuf>) -> Key {
        Key::new_scoped(Scope::default(), name)
    }

    /// Returns a reference to the name of the key.
    pub fn name(&self) -> &SegmentBuf {
        &self.name
    }

    /// Returns a reference to the scope of the key.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Returns whether the key lives in the given scope or below it.
    pub fn is_within(&self, scope: &Scope) -> bool {
        self.scope.starts_with(scope)
    }
}


//--- FromStr

impl str::FromStr for Key {
    type Err = ParseSegmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once(Segment::SEPARATOR) {
            Some((scope, name)) => {
                let scope = scope
                    .split(Segment::SEPARATOR)
                    .map(SegmentBuf::from_str)
                    .collect::<Result<Scope, _>>()?;
                Ok(Key { scope, name: SegmentBuf::from_str(name)? })
            }
            None => Ok(Key::new_global(SegmentBuf::from_str(s)?))
        }
    }
}


//--- Serialize and Deserialize

impl Serialize for Key {
    fn serialize<S: Serializer>(
        &self, serializer: S
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D
    ) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}


//--- Display

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.scope.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}{}{}", self.scope, Segment::SEPARATOR, self.name)
        }
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_identity_key() {
        let key: Key = "public/orders/1".parse().unwrap();
        assert_eq!(key.name().as_str(), "1");
        assert_eq!(key.scope().to_string(), "public/orders");
        assert_eq!(key.to_string(), "public/orders/1");
    }

    #[test]
    fn parse_global_key() {
        let key: Key = "status".parse().unwrap();
        assert!(key.scope().is_global());
        assert_eq!(key.to_string(), "status");
    }

    #[test]
    fn reject_empty_segments() {
        assert!("".parse::<Key>().is_err());
        assert!("public//1".parse::<Key>().is_err());
        assert!("public/orders/".parse::<Key>().is_err());
    }

    #[test]
    fn within_scope() {
        let key: Key = "metric/daily_shop/2025-08-01/1/2".parse().unwrap();
        assert!(key.is_within(&"metric/daily_shop".parse().unwrap()));
        assert!(!key.is_within(&"metric/daily_team".parse().unwrap()));
    }

    #[test]
    fn key_ordering_groups_scopes() {
        let a: Key = "public/orders/2".parse().unwrap();
        let b: Key = "public/orders/10".parse().unwrap();
        let c: Key = "public/teams/1".parse().unwrap();
        let mut keys = vec![c.clone(), b.clone(), a.clone()];
        keys.sort();
        assert_eq!(keys, [b, a, c]);
    }
}
