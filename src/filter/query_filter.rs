// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Query Filter - AST for payload predicates
//!
//! Subscriptions and node queries can carry a [`QueryFilter`] that refines a
//! path match by looking at the node's payload.
//!
//! # Example
//!
//! ```rust
//! use reflect_engine::{Payload, QueryFilter};
//! use serde_json::json;
//!
//! let ready = QueryFilter::field_eq("status", "ready");
//! let busy = QueryFilter::numeric("load", reflect_engine::FieldOperator::Greater, 0.8);
//!
//! let filter = ready.or(busy);
//! let mut payload = Payload::new(json!({"status": "ready", "load": 0.1}));
//! assert!(filter.matches(&mut payload, 0));
//! ```
//!
//! # Retargeting
//!
//! [`FilterNode::Within`] descends into a nested object. When it matches, the
//! payload handle passed to [`QueryFilter::matches`] is replaced with the
//! nested object, so whoever consumes the match sees the narrowed payload.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::payload::Payload;

/// Payload predicate AST
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    /// Root filter node
    pub root: FilterNode,
}

impl QueryFilter {
    /// Create a new filter from a root node
    pub fn new(root: FilterNode) -> Self {
        Self { root }
    }

    /// Field equals value
    pub fn field_eq(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::field(field, FieldOperator::Equals, value)
    }

    /// Field compared against value with `operator`
    pub fn field(
        field: impl Into<String>,
        operator: FieldOperator,
        value: impl Into<FilterValue>,
    ) -> Self {
        Self::new(FilterNode::Field(FieldFilter {
            field: field.into(),
            operator,
            value: value.into(),
        }))
    }

    /// Numeric comparison
    pub fn numeric(field: impl Into<String>, operator: FieldOperator, value: f64) -> Self {
        Self::field(field, operator, FilterValue::Numeric(value))
    }

    /// Numeric range, inclusive on both ends
    pub fn numeric_range(field: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        Self::field(field, FieldOperator::Range, FilterValue::NumericRange { min, max })
    }

    /// Field is present (any value)
    pub fn exists(field: impl Into<String>) -> Self {
        Self::new(FilterNode::Exists(field.into()))
    }

    /// Compare the node's child count
    pub fn child_count(operator: FieldOperator, count: u64) -> Self {
        Self::new(FilterNode::ChildCount { operator, count })
    }

    /// Narrow to the nested object under `field`, optionally requiring it to
    /// match `inner`
    pub fn within(field: impl Into<String>, inner: Option<QueryFilter>) -> Self {
        Self::new(FilterNode::Within {
            field: field.into(),
            filter: inner.map(|f| Box::new(f.root)),
        })
    }

    /// Combine with AND
    pub fn and(self, other: QueryFilter) -> Self {
        Self::new(FilterNode::And(vec![self.root, other.root]))
    }

    /// Combine with OR
    pub fn or(self, other: QueryFilter) -> Self {
        Self::new(FilterNode::Or(vec![self.root, other.root]))
    }

    /// Combine with XOR
    pub fn xor(self, other: QueryFilter) -> Self {
        Self::new(FilterNode::Xor(vec![self.root, other.root]))
    }

    /// Negate filter
    pub fn negate(self) -> Self {
        Self::new(FilterNode::Not(Box::new(self.root)))
    }

    /// Evaluate against `payload` for a node with `child_count` children.
    ///
    /// May replace `payload` with a nested object (see module docs).
    pub fn matches(&self, payload: &mut Payload, child_count: usize) -> bool {
        self.root.matches(payload, child_count)
    }

    /// Evaluate without letting the caller observe any retargeting.
    pub fn test(&self, payload: &Payload, child_count: usize) -> bool {
        let mut scratch = payload.clone();
        self.matches(&mut scratch, child_count)
    }
}

/// Filter AST node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterNode {
    /// Field comparison
    Field(FieldFilter),
    /// Field presence
    Exists(String),
    /// Number of children of the node being tested
    ChildCount { operator: FieldOperator, count: u64 },
    /// All must match (empty matches)
    And(Vec<FilterNode>),
    /// Any must match (empty doesn't match)
    Or(Vec<FilterNode>),
    /// An odd number must match
    Xor(Vec<FilterNode>),
    /// Inverts its child; never retargets
    Not(Box<FilterNode>),
    /// Nested object under `field`, retargets on match
    Within {
        field: String,
        filter: Option<Box<FilterNode>>,
    },
}

impl FilterNode {
    fn matches(&self, payload: &mut Payload, child_count: usize) -> bool {
        match self {
            Self::Field(f) => payload.get(&f.field).is_some_and(|v| f.test(v)),
            Self::Exists(field) => payload.get(field).is_some(),
            Self::ChildCount { operator, count } => {
                compare(operator, (child_count as f64).partial_cmp(&(*count as f64)))
            }
            Self::And(nodes) => nodes.iter().all(|n| n.matches(payload, child_count)),
            Self::Or(nodes) => nodes.iter().any(|n| n.matches(payload, child_count)),
            Self::Xor(nodes) => {
                nodes.iter().filter(|n| n.matches(payload, child_count)).count() % 2 == 1
            }
            Self::Not(inner) => {
                let mut scratch = payload.clone();
                !inner.matches(&mut scratch, child_count)
            }
            Self::Within { field, filter } => {
                let Some(mut sub) = payload.sub_payload(field) else {
                    return false;
                };
                let sub_children = sub.field_count();
                if filter.as_ref().is_some_and(|f| !f.matches(&mut sub, sub_children)) {
                    return false;
                }
                *payload = sub;
                true
            }
        }
    }
}

/// Field filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    /// Top-level payload field
    pub field: String,
    /// Comparison operator
    pub operator: FieldOperator,
    /// Value to compare against
    pub value: FilterValue,
}

impl FieldFilter {
    fn test(&self, actual: &Value) -> bool {
        use FieldOperator::*;
        match (&self.operator, &self.value) {
            (Range, FilterValue::NumericRange { min, max }) => actual.as_f64().is_some_and(|n| {
                min.map_or(true, |m| n >= m) && max.map_or(true, |m| n <= m)
            }),
            (StartsWith, FilterValue::Text(t)) => actual.as_str().is_some_and(|s| s.starts_with(t.as_str())),
            (EndsWith, FilterValue::Text(t)) => actual.as_str().is_some_and(|s| s.ends_with(t.as_str())),
            (Contains, FilterValue::Text(t)) => match actual {
                Value::String(s) => s.contains(t.as_str()),
                Value::Array(items) => items.iter().any(|i| i.as_str() == Some(t.as_str())),
                _ => false,
            },
            (op @ (Equals | NotEquals | Less | LessOrEqual | Greater | GreaterOrEqual), value) => {
                match value.compare(actual) {
                    Some(ord) => compare(op, Some(ord)),
                    // Incomparable types are simply unequal
                    None => matches!(op, NotEquals),
                }
            }
            _ => false,
        }
    }
}

/// Field comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldOperator {
    Equals,
    NotEquals,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    /// Inclusive numeric range
    Range,
    /// String prefix
    StartsWith,
    /// String suffix
    EndsWith,
    /// Substring, or array membership
    Contains,
}

fn compare(op: &FieldOperator, ord: Option<Ordering>) -> bool {
    let Some(ord) = ord else { return false };
    match op {
        FieldOperator::Equals => ord == Ordering::Equal,
        FieldOperator::NotEquals => ord != Ordering::Equal,
        FieldOperator::Less => ord == Ordering::Less,
        FieldOperator::LessOrEqual => ord != Ordering::Greater,
        FieldOperator::Greater => ord == Ordering::Greater,
        FieldOperator::GreaterOrEqual => ord != Ordering::Less,
        _ => false,
    }
}

/// Filter value type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterValue {
    /// Text value
    Text(String),
    /// Numeric value
    Numeric(f64),
    /// Numeric range [min, max]
    NumericRange { min: Option<f64>, max: Option<f64> },
    /// Boolean value
    Boolean(bool),
}

impl FilterValue {
    /// Ordering of `actual` relative to this value, if the types agree.
    fn compare(&self, actual: &Value) -> Option<Ordering> {
        match (self, actual) {
            (Self::Text(t), Value::String(s)) => Some(s.as_str().cmp(t.as_str())),
            (Self::Numeric(n), Value::Number(a)) => a.as_f64()?.partial_cmp(n),
            (Self::Boolean(b), Value::Bool(a)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<f64> for FilterValue {
    fn from(v: f64) -> Self {
        Self::Numeric(v)
    }
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        Self::Numeric(v as f64)
    }
}

impl From<bool> for FilterValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}
