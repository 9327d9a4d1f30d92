//! Comparable property values.
//!
//! Records are sets of named properties; every property value must be totally
//! ordered so it can key a B+Tree. Values of different kinds compare by kind
//! rank first (`Bool < Int < Float < Text < Id`), then by content. Floats use
//! IEEE total ordering so NaN has a stable position.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use super::identifier::Identifier;

/// A single comparable property value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// Boolean value.
    Bool(bool),
    /// Signed integer value.
    Int(i64),
    /// Floating point value, totally ordered.
    Float(f64),
    /// Text value.
    Text(String),
    /// Reference to another object.
    Id(Identifier),
}

impl Value {
    /// Rank of the value kind, used to order values of different kinds.
    #[must_use]
    pub const fn kind_rank(&self) -> u8 {
        match self {
            Self::Bool(_) => 0,
            Self::Int(_) => 1,
            Self::Float(_) => 2,
            Self::Text(_) => 3,
            Self::Id(_) => 4,
        }
    }

    /// Human-readable name of the value kind.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Id(_) => "id",
        }
    }

    /// Creates a text value.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Id(a), Self::Id(b)) => a.cmp(b),
            _ => self.kind_rank().cmp(&other.kind_rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind_rank().hash(state);
        match self {
            Self::Bool(v) => v.hash(state),
            Self::Int(v) => v.hash(state),
            Self::Float(v) => v.to_bits().hash(state),
            Self::Text(v) => v.hash(state),
            Self::Id(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v:?}"),
            Self::Id(v) => write!(f, "<{v}>"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<Identifier> for Value {
    fn from(v: Identifier) -> Self {
        Self::Id(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cross_kind_order() {
        let mut values = vec![
            Value::text("a"),
            Value::Int(3),
            Value::Bool(true),
            Value::Float(0.5),
            Value::Id(Identifier::parse("x")),
        ];
        values.sort();
        let kinds: Vec<_> = values.iter().map(Value::kind_name).collect();
        assert_eq!(kinds, vec!["bool", "int", "float", "text", "id"]);
    }

    #[test]
    fn test_float_total_order() {
        assert!(Value::Float(-1.0) < Value::Float(2.5));
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert!(Value::Float(f64::INFINITY) < Value::Float(f64::NAN));
    }

    #[test]
    fn test_same_kind_order() {
        assert!(Value::Int(-5) < Value::Int(4));
        assert!(Value::text("apple") < Value::text("banana"));
        assert!(Value::Bool(false) < Value::Bool(true));
    }
}
