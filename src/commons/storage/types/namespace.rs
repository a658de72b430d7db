//! The namespace a store is opened for.

use std::fmt;


//------------ Namespace -----------------------------------------------------

/// Separates stores sharing one storage location.
///
/// A namespace consists of ASCII letters, digits, dash and underscore and
/// is at most 255 characters long. Namespaces are fixed when the program
/// is built, so they are only ever created from string literals.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Namespace(&'static str);

impl Namespace {
    /// Creates a namespace or panics if `s` isn’t a valid identifier.
    ///
    /// Used in constants, where the panic fails the build.
    pub const fn make(s: &'static str) -> Self {
        if !Self::is_valid(s) {
            panic!("invalid namespace identifier")
        }
        Namespace(s)
    }

    /// Returns whether `s` may be used as a namespace.
    pub const fn is_valid(s: &str) -> bool {
        if s.is_empty() || s.len() > 255 {
            return false
        }
        let bytes = s.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            let ch = bytes[i];
            if !ch.is_ascii_alphanumeric() && ch != b'-' && ch != b'_' {
                return false
            }
            i += 1;
        }
        true
    }

    pub const fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.0)
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_rules() {
        assert!(!Namespace::is_valid(""));
        assert!(!Namespace::is_valid("materialize/test"));
        assert!(!Namespace::is_valid(".hidden"));
        assert!(!Namespace::is_valid(&"a".repeat(256)));
        assert!(Namespace::is_valid("materialize_test-1"));
        assert_eq!(Namespace::make("materialize").to_string(), "materialize");
    }
}
