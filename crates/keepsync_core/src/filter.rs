//! Document filter predicates.

use crate::id::EntityId;
use keepsync_codec::Value;
use std::cmp::Ordering;
use std::mem::discriminant;

static NULL: Value = Value::Null;

/// Right-hand side of a field comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// A literal value.
    Value(Value),
    /// Placeholder for the currently authenticated identity.
    ///
    /// Unresolved placeholders compare as `null`.
    Identity,
}

impl Operand {
    fn value(&self) -> &Value {
        match self {
            Operand::Value(v) => v,
            Operand::Identity => &NULL,
        }
    }
}

macro_rules! operand_from {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Operand {
            fn from(value: $ty) -> Self {
                Operand::Value(Value::from(value))
            }
        })*
    };
}

operand_from!(Value, bool, i64, i32, String, &str);

/// A predicate over documents.
///
/// Fields are dotted paths. A missing field compares equal to `null`. When a
/// field holds an array and the operand does not, the comparison succeeds if
/// any element satisfies it. Ordering comparisons only match values of the
/// same kind.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Filter {
    /// Matches every document.
    #[default]
    All,
    /// `field == operand`.
    Eq(String, Operand),
    /// `field != operand`.
    Ne(String, Operand),
    /// `field > operand`.
    Gt(String, Operand),
    /// `field >= operand`.
    Gte(String, Operand),
    /// `field < operand`.
    Lt(String, Operand),
    /// `field <= operand`.
    Lte(String, Operand),
    /// `field` equals one of the operands.
    In(String, Vec<Operand>),
    /// `field` is present (or absent).
    Exists(String, bool),
    /// Every sub-filter matches.
    And(Vec<Filter>),
    /// At least one sub-filter matches.
    Or(Vec<Filter>),
    /// No sub-filter matches.
    Nor(Vec<Filter>),
    /// The sub-filter does not match.
    Not(Box<Filter>),
}

impl Filter {
    /// `field == value`.
    pub fn eq(field: impl Into<String>, value: impl Into<Operand>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    /// `field == <current identity>`.
    pub fn eq_identity(field: impl Into<String>) -> Self {
        Filter::Eq(field.into(), Operand::Identity)
    }

    /// `field != value`.
    pub fn ne(field: impl Into<String>, value: impl Into<Operand>) -> Self {
        Filter::Ne(field.into(), value.into())
    }

    /// `field > value`.
    pub fn gt(field: impl Into<String>, value: impl Into<Operand>) -> Self {
        Filter::Gt(field.into(), value.into())
    }

    /// `field >= value`.
    pub fn gte(field: impl Into<String>, value: impl Into<Operand>) -> Self {
        Filter::Gte(field.into(), value.into())
    }

    /// `field < value`.
    pub fn lt(field: impl Into<String>, value: impl Into<Operand>) -> Self {
        Filter::Lt(field.into(), value.into())
    }

    /// `field <= value`.
    pub fn lte(field: impl Into<String>, value: impl Into<Operand>) -> Self {
        Filter::Lte(field.into(), value.into())
    }

    /// Returns `true` if this filter keeps every document.
    ///
    /// Only non-trivial filters take part in reconciliation.
    #[must_use]
    pub fn is_trivial(&self) -> bool {
        match self {
            Filter::All => true,
            Filter::And(parts) => parts.iter().all(Filter::is_trivial),
            _ => false,
        }
    }

    /// Returns `true` if the filter references the identity placeholder.
    #[must_use]
    pub fn needs_identity(&self) -> bool {
        match self {
            Filter::All | Filter::Exists(..) => false,
            Filter::Eq(_, op)
            | Filter::Ne(_, op)
            | Filter::Gt(_, op)
            | Filter::Gte(_, op)
            | Filter::Lt(_, op)
            | Filter::Lte(_, op) => *op == Operand::Identity,
            Filter::In(_, ops) => ops.contains(&Operand::Identity),
            Filter::And(parts) | Filter::Or(parts) | Filter::Nor(parts) => {
                parts.iter().any(Filter::needs_identity)
            }
            Filter::Not(inner) => inner.needs_identity(),
        }
    }

    /// Returns a copy with every identity placeholder replaced by `identity`.
    #[must_use]
    pub fn resolve(&self, identity: &EntityId) -> Filter {
        let op = |op: &Operand| match op {
            Operand::Identity => Operand::Value(identity.to_value()),
            other => other.clone(),
        };
        let all = |parts: &[Filter]| parts.iter().map(|p| p.resolve(identity)).collect();
        match self {
            Filter::All => Filter::All,
            Filter::Eq(f, o) => Filter::Eq(f.clone(), op(o)),
            Filter::Ne(f, o) => Filter::Ne(f.clone(), op(o)),
            Filter::Gt(f, o) => Filter::Gt(f.clone(), op(o)),
            Filter::Gte(f, o) => Filter::Gte(f.clone(), op(o)),
            Filter::Lt(f, o) => Filter::Lt(f.clone(), op(o)),
            Filter::Lte(f, o) => Filter::Lte(f.clone(), op(o)),
            Filter::In(f, ops) => Filter::In(f.clone(), ops.iter().map(op).collect()),
            Filter::Exists(f, b) => Filter::Exists(f.clone(), *b),
            Filter::And(parts) => Filter::And(all(parts)),
            Filter::Or(parts) => Filter::Or(all(parts)),
            Filter::Nor(parts) => Filter::Nor(all(parts)),
            Filter::Not(inner) => Filter::Not(Box::new(inner.resolve(identity))),
        }
    }

    /// Evaluates the filter against a document body.
    #[must_use]
    pub fn matches(&self, doc: &Value) -> bool {
        let field = |path: &str| doc.get_path(path).unwrap_or(&NULL);
        match self {
            Filter::All => true,
            Filter::Eq(f, op) => equals(field(f), op.value()),
            Filter::Ne(f, op) => !equals(field(f), op.value()),
            Filter::Gt(f, op) => compare(field(f), op.value(), Ordering::is_gt),
            Filter::Gte(f, op) => compare(field(f), op.value(), Ordering::is_ge),
            Filter::Lt(f, op) => compare(field(f), op.value(), Ordering::is_lt),
            Filter::Lte(f, op) => compare(field(f), op.value(), Ordering::is_le),
            Filter::In(f, ops) => {
                let actual = field(f);
                ops.iter().any(|op| equals(actual, op.value()))
            }
            Filter::Exists(f, present) => doc.get_path(f).is_some() == *present,
            Filter::And(parts) => parts.iter().all(|p| p.matches(doc)),
            Filter::Or(parts) => parts.iter().any(|p| p.matches(doc)),
            Filter::Nor(parts) => !parts.iter().any(|p| p.matches(doc)),
            Filter::Not(inner) => !inner.matches(doc),
        }
    }
}

fn equals(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (actual, expected) {
        (Value::Array(items), e) if !matches!(e, Value::Array(_)) => items.contains(e),
        _ => false,
    }
}

fn compare(actual: &Value, expected: &Value, pred: fn(Ordering) -> bool) -> bool {
    match (actual, expected) {
        (Value::Array(items), e) if !matches!(e, Value::Array(_)) => {
            items.iter().any(|item| compare(item, e, pred))
        }
        (a, e) if discriminant(a) == discriminant(e) => pred(a.cmp_sort(e)),
        _ => false,
    }
}
