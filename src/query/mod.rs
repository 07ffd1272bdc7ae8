//! Query descriptors: predicates and sort descriptors.
//!
//! The embedded engine is a key-value store, so query translation happens
//! here: a predicate is a closed expression tree evaluated against attribute
//! records after the context layer has assembled its effective row set.

pub mod request;

pub use request::{FetchRequest, Requestable};

use std::cmp::Ordering;

use crate::value::{Record, Value};

/// Comparison operators usable in a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A filter over attribute records.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        key: String,
        op: CompareOp,
        value: Value,
    },
    In {
        key: String,
        values: Vec<Value>,
    },
    NotIn {
        key: String,
        values: Vec<Value>,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            key: key.into(),
            op: CompareOp::Eq,
            value: value.into(),
        }
    }

    pub fn compare(key: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            key: key.into(),
            op,
            value: value.into(),
        }
    }

    pub fn key_in<V: Into<Value>>(key: impl Into<String>, values: Vec<V>) -> Self {
        Predicate::In {
            key: key.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn key_not_in<V: Into<Value>>(key: impl Into<String>, values: Vec<V>) -> Self {
        Predicate::NotIn {
            key: key.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut parts) => {
                parts.push(other);
                Predicate::And(parts)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut parts) => {
                parts.push(other);
                Predicate::Or(parts)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Evaluate against one record. A comparison on an absent attribute is
    /// false.
    pub fn evaluate(&self, record: &Record) -> bool {
        match self {
            Predicate::Compare { key, op, value } => match record.get(key) {
                Some(stored) => {
                    let ordering = stored.compare(value);
                    match op {
                        CompareOp::Eq => stored.semantically_equals(value),
                        CompareOp::Ne => !stored.semantically_equals(value),
                        CompareOp::Lt => ordering == Ordering::Less,
                        CompareOp::Le => ordering != Ordering::Greater,
                        CompareOp::Gt => ordering == Ordering::Greater,
                        CompareOp::Ge => ordering != Ordering::Less,
                    }
                }
                None => false,
            },
            Predicate::In { key, values } => record
                .get(key)
                .map(|stored| values.iter().any(|v| stored.semantically_equals(v)))
                .unwrap_or(false),
            Predicate::NotIn { key, values } => record
                .get(key)
                .map(|stored| !values.iter().any(|v| stored.semantically_equals(v)))
                .unwrap_or(false),
            Predicate::And(parts) => parts.iter().all(|p| p.evaluate(record)),
            Predicate::Or(parts) => parts.iter().any(|p| p.evaluate(record)),
            Predicate::Not(inner) => !inner.evaluate(record),
        }
    }
}

/// A single-key sort order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortDescriptor {
    pub key: String,
    pub ascending: bool,
}

impl SortDescriptor {
    pub fn ascending(key: impl Into<String>) -> Self {
        SortDescriptor {
            key: key.into(),
            ascending: true,
        }
    }

    pub fn descending(key: impl Into<String>) -> Self {
        SortDescriptor {
            key: key.into(),
            ascending: false,
        }
    }

    /// Compare two records under this descriptor. Records missing the sort
    /// key order as null.
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        let left = a.get(&self.key).unwrap_or(&Value::Null);
        let right = b.get(&self.key).unwrap_or(&Value::Null);
        let ordering = left.compare(right);
        if self.ascending {
            ordering
        } else {
            ordering.reverse()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, age: i64) -> Record {
        let mut r = Record::new();
        r.insert("name".into(), Value::String(name.into()));
        r.insert("age".into(), Value::Integer(age));
        r
    }

    #[test]
    fn test_eq_predicate() {
        let p = Predicate::eq("name", "John");
        assert!(p.evaluate(&record("John", 25)));
        assert!(!p.evaluate(&record("Jane", 25)));
    }

    #[test]
    fn test_comparison_predicates() {
        let adults = Predicate::compare("age", CompareOp::Ge, 18i64);
        assert!(adults.evaluate(&record("John", 25)));
        assert!(adults.evaluate(&record("Ada", 18)));
        assert!(!adults.evaluate(&record("Kid", 9)));
    }

    #[test]
    fn test_in_and_not_in() {
        let wanted = Predicate::key_in("name", vec!["John", "Jane"]);
        assert!(wanted.evaluate(&record("Jane", 1)));
        assert!(!wanted.evaluate(&record("Joe", 1)));

        let excluded = Predicate::key_not_in("name", vec!["John"]);
        assert!(!excluded.evaluate(&record("John", 1)));
        assert!(excluded.evaluate(&record("Jane", 1)));
    }

    #[test]
    fn test_missing_attribute_is_false() {
        let p = Predicate::eq("email", "x@y.z");
        assert!(!p.evaluate(&record("John", 25)));
        // NotIn on a missing attribute is also false, not vacuously true.
        let p = Predicate::key_not_in("email", vec!["x@y.z"]);
        assert!(!p.evaluate(&record("John", 25)));
    }

    #[test]
    fn test_boolean_composition() {
        let p = Predicate::eq("name", "John").and(Predicate::compare(
            "age",
            CompareOp::Lt,
            30i64,
        ));
        assert!(p.evaluate(&record("John", 25)));
        assert!(!p.evaluate(&record("John", 35)));

        let q = Predicate::eq("name", "A").or(Predicate::eq("name", "B"));
        assert!(q.evaluate(&record("B", 1)));
        assert!(!q.evaluate(&record("C", 1)));

        assert!(!q.clone().negate().evaluate(&record("B", 1)));
    }

    #[test]
    fn test_sort_descriptor_orders_records() {
        let by_age = SortDescriptor::ascending("age");
        assert_eq!(
            by_age.compare(&record("a", 1), &record("b", 2)),
            Ordering::Less
        );
        let by_age_desc = SortDescriptor::descending("age");
        assert_eq!(
            by_age_desc.compare(&record("a", 1), &record("b", 2)),
            Ordering::Greater
        );
    }
}
