use std::fmt;
use std::ops::Sub;

use serde::Serialize;

/// A raw count that may be missing from the data source.
///
/// Unknown values never take part in arithmetic as numbers: subtracting
/// from or by an unknown count yields an unknown count, and callers that
/// want to fold unknowns into a total have to ask for it with [`Count::or_zero`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Count(Option<i64>);

impl Count {
    pub const fn known(value: i64) -> Self {
        Self(Some(value))
    }

    pub const fn unknown() -> Self {
        Self(None)
    }

    pub fn value(self) -> Option<i64> {
        self.0
    }

    pub fn or_zero(self) -> i64 {
        self.0.unwrap_or(0)
    }
}

/// Normalise an optional column value into a [`Count`].
pub fn resolve(value: Option<i64>) -> Count {
    value.map_or(Count::unknown(), Count::known)
}

impl From<Option<i64>> for Count {
    fn from(value: Option<i64>) -> Self {
        resolve(value)
    }
}

impl Sub for Count {
    type Output = Count;

    fn sub(self, rhs: Count) -> Count {
        match (self.0, rhs.0) {
            (Some(lhs), Some(rhs)) => Count::known(lhs - rhs),
            _ => Count::unknown(),
        }
    }
}

impl fmt::Display for Count {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(value) => write!(f, "{value}"),
            None => f.write_str("-"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_values_resolve_to_unknown() {
        assert_eq!(resolve(None), Count::unknown());
        assert_eq!(resolve(None).value(), None);
        assert_eq!(resolve(Some(0)), Count::known(0));
        assert_eq!(resolve(Some(42)).value(), Some(42));
    }

    #[test]
    fn unknown_propagates_through_subtraction() {
        assert_eq!(Count::known(10) - Count::known(7), Count::known(3));
        assert_eq!(Count::known(10) - Count::unknown(), Count::unknown());
        assert_eq!(Count::unknown() - Count::known(7), Count::unknown());
        assert_eq!(Count::unknown() - Count::unknown(), Count::unknown());
    }

    #[test]
    fn or_zero_folds_unknown() {
        assert_eq!(Count::unknown().or_zero(), 0);
        assert_eq!(Count::known(5).or_zero(), 5);
    }

    #[test]
    fn displays_dash_for_unknown() {
        assert_eq!(Count::unknown().to_string(), "-");
        assert_eq!(Count::known(12).to_string(), "12");
    }

    #[test]
    fn serializes_as_nullable_number() {
        assert_eq!(serde_json::to_string(&Count::known(3)).unwrap(), "3");
        assert_eq!(serde_json::to_string(&Count::unknown()).unwrap(), "null");
    }
}
