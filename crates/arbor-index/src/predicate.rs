//! Predicate trees and records.

use std::collections::BTreeMap;
use std::fmt;

use arbor_common::types::{Identifier, Value};
use serde::{Deserialize, Serialize};

/// Comparison operator of a leaf predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    /// Equal.
    Eq,
    /// Not equal.
    NotEq,
    /// Less than.
    Lt,
    /// Less than or equal.
    LtEq,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    GtEq,
    /// Pattern match. Not evaluable from an ordered index.
    Like,
}

impl CompareOp {
    /// Returns true for `<`, `<=`, `>` and `>=`.
    #[must_use]
    pub fn is_range(self) -> bool {
        matches!(self, Self::Lt | Self::LtEq | Self::Gt | Self::GtEq)
    }

    /// Returns true if a range scan excludes the boundary.
    #[must_use]
    pub fn is_strict(self) -> bool {
        matches!(self, Self::Lt | Self::Gt)
    }

    /// Returns true if a range scan walks towards smaller values.
    #[must_use]
    pub fn is_descending(self) -> bool {
        matches!(self, Self::Lt | Self::LtEq)
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::Like => "LIKE",
        };
        f.write_str(s)
    }
}

/// How a comparison against several values combines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quantifier {
    /// The comparison must hold for every listed value.
    All,
    /// The comparison must hold for at least one listed value.
    Some,
}

/// A boolean predicate over record properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// `property op value`, combined over `values` by `quantifier`.
    ///
    /// A record matches `property op v` if one of its values for the
    /// property compares to `v` as `op` says. Values of a different kind than
    /// `v` never match.
    Compare {
        /// Property name.
        property: String,
        /// Operator.
        op: CompareOp,
        /// Right-hand values.
        values: Vec<Value>,
        /// Combination over `values`.
        quantifier: Quantifier,
    },
    /// All sub-predicates hold.
    And(Vec<Predicate>),
    /// At least one sub-predicate holds.
    Or(Vec<Predicate>),
}

impl Predicate {
    /// Comparison against a single value.
    pub fn compare(property: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            property: property.into(),
            op,
            values: vec![value.into()],
            quantifier: Quantifier::All,
        }
    }

    /// Comparison holding for every value in `values`.
    pub fn all_of<I, V>(property: impl Into<String>, op: CompareOp, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Compare {
            property: property.into(),
            op,
            values: values.into_iter().map(Into::into).collect(),
            quantifier: Quantifier::All,
        }
    }

    /// Comparison holding for some value in `values`.
    pub fn some_of<I, V>(property: impl Into<String>, op: CompareOp, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Compare {
            property: property.into(),
            op,
            values: values.into_iter().map(Into::into).collect(),
            quantifier: Quantifier::Some,
        }
    }

    /// `property = value`.
    pub fn eq(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::Eq, value)
    }

    /// `property != value`.
    pub fn ne(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::NotEq, value)
    }

    /// `property < value`.
    pub fn lt(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::Lt, value)
    }

    /// `property <= value`.
    pub fn le(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::LtEq, value)
    }

    /// `property > value`.
    pub fn gt(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::Gt, value)
    }

    /// `property >= value`.
    pub fn ge(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::GtEq, value)
    }

    /// Conjunction.
    #[must_use]
    pub fn and(predicates: Vec<Predicate>) -> Self {
        Self::And(predicates)
    }

    /// Disjunction.
    #[must_use]
    pub fn or(predicates: Vec<Predicate>) -> Self {
        Self::Or(predicates)
    }

    /// Evaluates the predicate directly against `record`.
    ///
    /// Agrees with index evaluation for every supported operator; `Like` never
    /// matches.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::And(parts) => !parts.is_empty() && parts.iter().all(|p| p.matches(record)),
            Self::Or(parts) => parts.iter().any(|p| p.matches(record)),
            Self::Compare {
                property,
                op,
                values,
                quantifier,
            } => {
                let held = record.values(property);
                let holds = |v: &Value| {
                    held.iter().any(|h| {
                        h.kind_rank() == v.kind_rank()
                            && match op {
                                CompareOp::Eq => h == v,
                                CompareOp::NotEq => h != v,
                                CompareOp::Lt => h < v,
                                CompareOp::LtEq => h <= v,
                                CompareOp::Gt => h > v,
                                CompareOp::GtEq => h >= v,
                                CompareOp::Like => false,
                            }
                    })
                };
                !values.is_empty()
                    && match quantifier {
                        Quantifier::All => values.iter().all(holds),
                        Quantifier::Some => values.iter().any(holds),
                    }
            }
        }
    }
}

/// An object's identifier with its named, comparable properties.
///
/// A property may carry several values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// The object.
    pub id: Identifier,
    /// Property values by name.
    pub properties: BTreeMap<String, Vec<Value>>,
}

impl Record {
    /// A record without properties.
    #[must_use]
    pub fn new(id: Identifier) -> Self {
        Self {
            id,
            properties: BTreeMap::new(),
        }
    }

    /// Adds a value to `property`.
    #[must_use]
    pub fn with(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties
            .entry(property.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Returns the values of `property`.
    #[must_use]
    pub fn values(&self, property: &str) -> &[Value] {
        self.properties.get(property).map_or(&[], Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(name: &str, ages: &[i64]) -> Record {
        ages.iter()
            .fold(Record::new(Identifier::parse(name)), |r, a| r.with("age", *a))
    }

    #[test]
    fn test_direct_evaluation() {
        let bob = person("bob", &[30]);
        assert!(Predicate::eq("age", 30).matches(&bob));
        assert!(Predicate::le("age", 30).matches(&bob));
        assert!(!Predicate::lt("age", 30).matches(&bob));
        assert!(!Predicate::ne("age", 30).matches(&bob));
        assert!(!Predicate::eq("age", "30").matches(&bob));
        assert!(!Predicate::eq("height", 30).matches(&bob));
        assert!(!Predicate::and(Vec::new()).matches(&bob));
    }

    #[test]
    fn test_multi_valued_quantifiers() {
        let many = person("m", &[1, 2]);
        assert!(Predicate::all_of("age", CompareOp::Eq, [1i64, 2]).matches(&many));
        assert!(!Predicate::all_of("age", CompareOp::Eq, [1i64, 3]).matches(&many));
        assert!(Predicate::some_of("age", CompareOp::Eq, [1i64, 3]).matches(&many));
        // Some value differs from 1 (namely 2).
        assert!(Predicate::ne("age", 1).matches(&many));
    }

    #[test]
    fn test_predicate_from_json() {
        let json = r#"{"Or":[
            {"Compare":{"property":"age","op":"GtEq","values":[{"Int":18}],"quantifier":"All"}},
            {"Compare":{"property":"name","op":"Eq","values":[{"Text":"ann"}],"quantifier":"Some"}}
        ]}"#;
        let parsed: Predicate = serde_json::from_str(json).unwrap();
        assert_eq!(
            parsed,
            Predicate::or(vec![
                Predicate::ge("age", 18),
                Predicate::some_of("name", CompareOp::Eq, [Value::text("ann")]),
            ])
        );
    }
}
