//! # Predicate Tree
//!
//! `Predicate` is the composable WHERE/HAVING expression tree every
//! `QueryBuilder` accumulates. Building a predicate is pure; only the
//! `Assembler` interprets it, walking it in a fixed order and emitting
//! parallel parameters.

use crate::model::ColumnValue;

/// A binary comparison operator usable in a `Predicate::Comparison`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    ILike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    Between,
}

/// A node in the WHERE/HAVING expression tree.
///
/// Construction is pure and side-effect-free: combinators like `and`/`or`
/// return a new tree, never mutate in place, mirroring the builder's own
/// immutable-chaining contract.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// A single column comparison. `values` holds one element for most ops,
    /// zero for `IsNull`/`IsNotNull`, a variable count for `In`/`NotIn`, and
    /// exactly two for `Between`.
    Comparison { column: String, op: ComparisonOp, values: Vec<ColumnValue> },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    /// Escape hatch for SQL the tree cannot express; `template` uses `?` as
    /// a driver-agnostic placeholder, rewritten by the assembler.
    Raw { template: String, params: Vec<ColumnValue> },
    Exists(Box<SubqueryRef>),
    NotExists(Box<SubqueryRef>),
}

/// Opaque reference to a correlated subquery, rendered verbatim by the
/// assembler. Kept minimal: the core only needs `Exists`/`NotExists` to
/// compose, not a general subquery builder.
#[derive(Debug, Clone)]
pub struct SubqueryRef {
    pub sql: String,
    pub params: Vec<ColumnValue>,
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: ColumnValue) -> Self {
        Predicate::Comparison { column: column.into(), op: ComparisonOp::Eq, values: vec![value] }
    }

    pub fn not_eq(column: impl Into<String>, value: ColumnValue) -> Self {
        Predicate::Comparison { column: column.into(), op: ComparisonOp::NotEq, values: vec![value] }
    }

    pub fn lt(column: impl Into<String>, value: ColumnValue) -> Self {
        Predicate::Comparison { column: column.into(), op: ComparisonOp::Lt, values: vec![value] }
    }

    pub fn lte(column: impl Into<String>, value: ColumnValue) -> Self {
        Predicate::Comparison { column: column.into(), op: ComparisonOp::Lte, values: vec![value] }
    }

    pub fn gt(column: impl Into<String>, value: ColumnValue) -> Self {
        Predicate::Comparison { column: column.into(), op: ComparisonOp::Gt, values: vec![value] }
    }

    pub fn gte(column: impl Into<String>, value: ColumnValue) -> Self {
        Predicate::Comparison { column: column.into(), op: ComparisonOp::Gte, values: vec![value] }
    }

    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Predicate::Comparison {
            column: column.into(),
            op: ComparisonOp::Like,
            values: vec![ColumnValue::Text(pattern.into())],
        }
    }

    pub fn ilike(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Predicate::Comparison {
            column: column.into(),
            op: ComparisonOp::ILike,
            values: vec![ColumnValue::Text(pattern.into())],
        }
    }

    pub fn in_list(column: impl Into<String>, values: Vec<ColumnValue>) -> Self {
        Predicate::Comparison { column: column.into(), op: ComparisonOp::In, values }
    }

    pub fn not_in_list(column: impl Into<String>, values: Vec<ColumnValue>) -> Self {
        Predicate::Comparison { column: column.into(), op: ComparisonOp::NotIn, values }
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Predicate::Comparison { column: column.into(), op: ComparisonOp::IsNull, values: vec![] }
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Predicate::Comparison { column: column.into(), op: ComparisonOp::IsNotNull, values: vec![] }
    }

    pub fn between(column: impl Into<String>, low: ColumnValue, high: ColumnValue) -> Self {
        Predicate::Comparison { column: column.into(), op: ComparisonOp::Between, values: vec![low, high] }
    }

    pub fn raw(template: impl Into<String>, params: Vec<ColumnValue>) -> Self {
        Predicate::Raw { template: template.into(), params }
    }

    /// Combines with another predicate via `AND`.
    pub fn and(self, other: Predicate) -> Self {
        Predicate::And(Box::new(self), Box::new(other))
    }

    /// Combines with another predicate via `OR`.
    pub fn or(self, other: Predicate) -> Self {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    /// Negates the predicate.
    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combinators_build_expected_shape() {
        let p = Predicate::eq("age", ColumnValue::I32(18)).and(Predicate::is_not_null("email"));
        match p {
            Predicate::And(a, b) => {
                assert!(matches!(*a, Predicate::Comparison { op: ComparisonOp::Eq, .. }));
                assert!(matches!(*b, Predicate::Comparison { op: ComparisonOp::IsNotNull, .. }));
            }
            _ => panic!("expected And"),
        }
    }

    #[test]
    fn negate_wraps_in_not() {
        let p = Predicate::eq("active", ColumnValue::Bool(true)).negate();
        assert!(matches!(p, Predicate::Not(_)));
    }
}
