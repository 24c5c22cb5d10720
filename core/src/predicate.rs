//! Predicate implementations built from expressions.
//!
//! Comparisons are type-coerced: the right-hand value is converted to the
//! left-hand kind before comparing. Values that cannot be compared make the
//! predicate evaluate to `false` instead of failing.

use crate::context::Context;
use crate::error::ExpressionError;
use crate::exchange::Exchange;
use crate::expression::{Expression, ExpressionRef, Predicate, PredicateRef, constant};
use crate::value::{Value, ValueKind};
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Right-hand side of a comparison: a literal value or an expression.
#[derive(Clone)]
pub enum Operand {
    Value(Value),
    Expression(ExpressionRef),
}

impl Operand {
    pub fn into_expression(self) -> ExpressionRef {
        match self {
            Operand::Value(value) => constant(value),
            Operand::Expression(expression) => expression,
        }
    }
}

impl From<ExpressionRef> for Operand {
    fn from(expression: ExpressionRef) -> Self {
        Operand::Expression(expression)
    }
}

macro_rules! operand_from_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Operand {
                fn from(value: $ty) -> Self {
                    Operand::Value(Value::from(value))
                }
            }
        )*
    };
}

operand_from_value!(
    Value,
    bool,
    i32,
    i64,
    u32,
    usize,
    f32,
    f64,
    &str,
    String,
    &String,
    bytes::Bytes,
    chrono::DateTime<chrono::Utc>,
    crate::value::StreamCache,
);

/// Binary comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    EqIgnoreCase,
    Lt,
    Le,
    Gt,
    Ge,
    StartsWith,
    EndsWith,
    Contains,
    /// Full match of the left-hand text against a regular expression.
    Regex,
}

impl BinaryOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::EqIgnoreCase => "=~",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::StartsWith => "starts with",
            BinaryOp::EndsWith => "ends with",
            BinaryOp::Contains => "contains",
            BinaryOp::Regex => "matches regex",
        }
    }

    fn apply(&self, left: &Value, right: &Value) -> Result<bool, ExpressionError> {
        let ordering = || left.coerce_cmp(right);
        let result = match self {
            BinaryOp::Eq => left.coerce_eq(right),
            BinaryOp::NotEq => !left.coerce_eq(right),
            BinaryOp::EqIgnoreCase => match (left, right) {
                (Value::Null, Value::Null) => true,
                (Value::Null, _) | (_, Value::Null) => false,
                _ => left.to_text().to_lowercase() == right.to_text().to_lowercase(),
            },
            BinaryOp::Lt => ordering() == Some(Ordering::Less),
            BinaryOp::Le => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
            BinaryOp::Gt => ordering() == Some(Ordering::Greater),
            BinaryOp::Ge => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
            BinaryOp::StartsWith => {
                !left.is_null() && !right.is_null() && left.to_text().starts_with(&right.to_text())
            }
            BinaryOp::EndsWith => {
                !left.is_null() && !right.is_null() && left.to_text().ends_with(&right.to_text())
            }
            BinaryOp::Contains => match left {
                Value::Null => false,
                Value::List(items) => items.iter().any(|item| item.coerce_eq(right)),
                Value::Map(entries) => entries.contains_key(&right.to_text()),
                other => !right.is_null() && other.to_text().contains(&right.to_text()),
            },
            BinaryOp::Regex => {
                if left.is_null() {
                    return Ok(false);
                }
                let pattern = right.to_text();
                let regex = Regex::new(&format!("^(?:{pattern})$"))
                    .map_err(|e| ExpressionError::invalid_regex(&pattern, e))?;
                regex.is_match(&left.to_text())
            }
        };
        Ok(result)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// `left <op> right`.
pub struct BinaryPredicate {
    op: BinaryOp,
    left: ExpressionRef,
    right: ExpressionRef,
}

impl BinaryPredicate {
    fn operands(&self, exchange: &Exchange) -> Result<(Value, Value), ExpressionError> {
        exchange.body().reset_stream();
        let left = self.left.evaluate(exchange)?;
        exchange.body().reset_stream();
        let right = self.right.evaluate(exchange)?;
        Ok((left, right))
    }
}

impl Predicate for BinaryPredicate {
    fn init(&self, context: &Context) -> Result<(), ExpressionError> {
        self.left.init(context)?;
        self.right.init(context)
    }

    fn matches(&self, exchange: &Exchange) -> Result<bool, ExpressionError> {
        let (left, right) = self.operands(exchange)?;
        self.op.apply(&left, &right)
    }

    fn explain(&self, exchange: &Exchange) -> String {
        match self.operands(exchange) {
            Ok((left, right)) => format!("{self} ({left} {} {right})", self.op),
            Err(_) => self.to_string(),
        }
    }
}

impl fmt::Display for BinaryPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.op, self.right)
    }
}

/// `expression in [candidates]`.
pub struct InPredicate {
    expression: ExpressionRef,
    candidates: Vec<ExpressionRef>,
}

impl Predicate for InPredicate {
    fn init(&self, context: &Context) -> Result<(), ExpressionError> {
        self.expression.init(context)?;
        self.candidates.iter().try_for_each(|c| c.init(context))
    }

    fn matches(&self, exchange: &Exchange) -> Result<bool, ExpressionError> {
        let value = self.expression.evaluate(exchange)?;
        for candidate in &self.candidates {
            if value.coerce_eq(&candidate.evaluate(exchange)?) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl fmt::Display for InPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in [", self.expression)?;
        for (i, candidate) in self.candidates.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{candidate}")?;
        }
        f.write_str("]")
    }
}

/// `expression is null` / `expression is not null`.
pub struct NullPredicate {
    expression: ExpressionRef,
    expect_null: bool,
}

impl Predicate for NullPredicate {
    fn init(&self, context: &Context) -> Result<(), ExpressionError> {
        self.expression.init(context)
    }

    fn matches(&self, exchange: &Exchange) -> Result<bool, ExpressionError> {
        Ok(self.expression.evaluate(exchange)?.is_null() == self.expect_null)
    }
}

impl fmt::Display for NullPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.expect_null {
            write!(f, "{} is null", self.expression)
        } else {
            write!(f, "{} is not null", self.expression)
        }
    }
}

/// `expression instanceof kind`.
pub struct KindPredicate {
    expression: ExpressionRef,
    kind: ValueKind,
}

impl Predicate for KindPredicate {
    fn init(&self, context: &Context) -> Result<(), ExpressionError> {
        self.expression.init(context)
    }

    fn matches(&self, exchange: &Exchange) -> Result<bool, ExpressionError> {
        Ok(self.expression.evaluate(exchange)?.kind() == self.kind)
    }
}

impl fmt::Display for KindPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} instanceof {}", self.expression, self.kind)
    }
}

/// Logical negation.
pub struct NotPredicate(PredicateRef);

impl Predicate for NotPredicate {
    fn init(&self, context: &Context) -> Result<(), ExpressionError> {
        self.0.init(context)
    }

    fn matches(&self, exchange: &Exchange) -> Result<bool, ExpressionError> {
        Ok(!self.0.matches(exchange)?)
    }

    fn explain(&self, exchange: &Exchange) -> String {
        format!("not({})", self.0.explain(exchange))
    }
}

impl fmt::Display for NotPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not({})", self.0)
    }
}

/// An expression interpreted as a boolean, see [`Value::is_truthy`].
pub struct TruthyPredicate(ExpressionRef);

impl Predicate for TruthyPredicate {
    fn init(&self, context: &Context) -> Result<(), ExpressionError> {
        self.0.init(context)
    }

    fn matches(&self, exchange: &Exchange) -> Result<bool, ExpressionError> {
        Ok(self.0.evaluate(exchange)?.is_truthy())
    }
}

impl fmt::Display for TruthyPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Closure-backed predicate.
pub struct FnPredicate<F> {
    label: String,
    f: F,
}

impl<F> Predicate for FnPredicate<F>
where
    F: Fn(&Exchange) -> bool + Send + Sync,
{
    fn matches(&self, exchange: &Exchange) -> Result<bool, ExpressionError> {
        Ok((self.f)(exchange))
    }
}

impl<F> fmt::Display for FnPredicate<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

pub fn binary(op: BinaryOp, left: ExpressionRef, right: impl Into<Operand>) -> PredicateRef {
    Arc::new(BinaryPredicate {
        op,
        left,
        right: right.into().into_expression(),
    })
}

pub fn is_in<I>(expression: ExpressionRef, candidates: I) -> PredicateRef
where
    I: IntoIterator,
    I::Item: Into<Operand>,
{
    Arc::new(InPredicate {
        expression,
        candidates: candidates
            .into_iter()
            .map(|c| c.into().into_expression())
            .collect(),
    })
}

pub fn is_null(expression: ExpressionRef) -> PredicateRef {
    Arc::new(NullPredicate {
        expression,
        expect_null: true,
    })
}

pub fn is_not_null(expression: ExpressionRef) -> PredicateRef {
    Arc::new(NullPredicate {
        expression,
        expect_null: false,
    })
}

pub fn is_instance_of(expression: ExpressionRef, kind: ValueKind) -> PredicateRef {
    Arc::new(KindPredicate { expression, kind })
}

pub fn not(predicate: PredicateRef) -> PredicateRef {
    Arc::new(NotPredicate(predicate))
}

pub fn truthy(expression: ExpressionRef) -> PredicateRef {
    Arc::new(TruthyPredicate(expression))
}

pub fn from_fn<F>(label: impl Into<String>, f: F) -> PredicateRef
where
    F: Fn(&Exchange) -> bool + Send + Sync + 'static,
{
    Arc::new(FnPredicate {
        label: label.into(),
        f,
    })
}
