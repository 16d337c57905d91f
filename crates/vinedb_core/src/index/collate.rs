//! Collations for indexed string values.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Comparison rule attached to an indexed field.
///
/// A collation is applied when a key is built, so stored keys are already
/// in canonical form and the natural key order is the collation order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collation {
    /// Natural ordering.
    #[default]
    Default,
    /// Strings are folded to lower case before comparing and hashing.
    CaseInsensitive,
}

impl Collation {
    /// Returns the collation name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Collation::Default => "default",
            Collation::CaseInsensitive => "ci",
        }
    }

    /// Maps a value to its canonical form under this collation.
    #[must_use]
    pub fn apply(self, value: Value) -> Value {
        match (self, value) {
            (Collation::CaseInsensitive, Value::String(s)) => Value::String(s.to_lowercase()),
            (_, value) => value,
        }
    }
}

impl fmt::Display for Collation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Collation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(Collation::Default),
            "ci" | "case_insensitive" => Ok(Collation::CaseInsensitive),
            other => Err(format!("unknown collation '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_folds_strings_only() {
        let ci = Collation::CaseInsensitive;
        assert_eq!(ci.apply(Value::from("AbC")), Value::from("abc"));
        assert_eq!(ci.apply(Value::Integer(3)), Value::Integer(3));
        assert_eq!(Collation::Default.apply(Value::from("AbC")), Value::from("AbC"));
    }

    #[test]
    fn parses_names() {
        assert_eq!("CI".parse::<Collation>(), Ok(Collation::CaseInsensitive));
        assert_eq!("default".parse::<Collation>(), Ok(Collation::Default));
        assert!("nope".parse::<Collation>().is_err());
    }
}
