//! # Value Builder
//!
//! A fluent algebra over a single expression. Comparison operators produce
//! predicates; transformations produce a new builder over a derived expression.
//!
//! Every predicate a builder produces is passed through its [`BuilderHooks`],
//! which is how an assertion clause collects the predicates built from it
//! without an explicit registration call.

use once_cell::sync::OnceCell;
use relay_core::context::Context;
use relay_core::error::ExpressionError;
use relay_core::exchange::Exchange;
use relay_core::expression::{self, Comparator, Expression, ExpressionRef, PredicateRef, Tokenize};
use relay_core::predicate::{self, BinaryOp, Operand};
use relay_core::value::{Value, ValueKind};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Strategy injected into builders.
pub trait BuilderHooks: Send + Sync {
    /// Called with every predicate a builder produces; the return value is
    /// what the caller receives.
    fn on_new_predicate(&self, predicate: PredicateRef) -> PredicateRef;

    /// Called with the expression of every derived builder.
    fn on_new_value_builder(&self, expression: ExpressionRef) -> ExpressionRef {
        expression
    }
}

/// Hooks of a builder that belongs to no clause.
pub struct Detached;

impl BuilderHooks for Detached {
    fn on_new_predicate(&self, predicate: PredicateRef) -> PredicateRef {
        predicate
    }
}

// ============== Expression Slot ==============

/// A write-once expression filled after the predicate using it was built.
///
/// The first value written wins.
#[derive(Clone, Default)]
pub struct ExpressionSlot(Arc<OnceCell<ExpressionRef>>);

impl ExpressionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fills the slot; `false` when it was already filled.
    pub fn set(&self, expression: ExpressionRef) -> bool {
        self.0.set(expression).is_ok()
    }

    pub fn get(&self) -> Option<&ExpressionRef> {
        self.0.get()
    }

    /// An expression that resolves the slot on every use.
    pub fn deferred(&self) -> ExpressionRef {
        Arc::new(Deferred(self.clone()))
    }
}

struct Deferred(ExpressionSlot);

impl Deferred {
    fn resolved(&self) -> Result<&ExpressionRef, ExpressionError> {
        self.0.get().ok_or(ExpressionError::Unconfigured)
    }
}

impl Expression for Deferred {
    fn init(&self, context: &Context) -> Result<(), ExpressionError> {
        self.resolved()?.init(context)
    }

    fn evaluate(&self, exchange: &Exchange) -> Result<Value, ExpressionError> {
        self.resolved()?.evaluate(exchange)
    }
}

impl fmt::Display for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.get() {
            Some(expression) => write!(f, "{expression}"),
            None => f.write_str("<unresolved>"),
        }
    }
}

// ============== Expression Clause ==============

/// Picks the expression for a slot and hands back `R`.
#[must_use]
pub struct ExpressionClause<R> {
    slot: ExpressionSlot,
    result: R,
}

impl<R> ExpressionClause<R> {
    pub(crate) fn new(slot: ExpressionSlot, result: R) -> Self {
        Self { slot, result }
    }

    pub fn expression(self, expression: ExpressionRef) -> R {
        self.slot.set(expression);
        self.result
    }

    pub fn constant(self, value: impl Into<Value>) -> R {
        self.expression(expression::constant(value))
    }

    pub fn body(self) -> R {
        self.expression(expression::body())
    }

    pub fn body_as(self, kind: ValueKind) -> R {
        self.expression(expression::body_as(kind))
    }

    pub fn header(self, name: &str) -> R {
        self.expression(expression::header(name))
    }

    pub fn headers(self) -> R {
        self.expression(expression::headers())
    }

    pub fn property(self, name: &str) -> R {
        self.expression(expression::property(name))
    }

    pub fn properties(self) -> R {
        self.expression(expression::properties())
    }

    pub fn exchange(self) -> R {
        self.expression(expression::exchange())
    }

    pub fn message(self) -> R {
        self.expression(expression::message())
    }

    pub fn exchange_pattern(self) -> R {
        self.expression(expression::exchange_pattern())
    }

    /// An expression in the named language, resolved when first initialized.
    pub fn language(self, language: &str, source: &str) -> R {
        self.expression(expression::language(language, source))
    }
}

// ============== Value Builder ==============

#[derive(Clone)]
pub struct ValueBuilder {
    expression: ExpressionRef,
    hooks: Arc<dyn BuilderHooks>,
    negate: bool,
}

impl ValueBuilder {
    /// A builder whose predicates are not registered anywhere.
    pub fn new(expression: ExpressionRef) -> Self {
        Self::with_hooks(expression, Arc::new(Detached))
    }

    pub fn with_hooks(expression: ExpressionRef, hooks: Arc<dyn BuilderHooks>) -> Self {
        Self {
            expression,
            hooks,
            negate: false,
        }
    }

    pub fn expression(&self) -> ExpressionRef {
        self.expression.clone()
    }

    /// Inverts the next predicate this builder produces.
    pub fn not(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    fn on_new_predicate(&self, predicate: PredicateRef) -> PredicateRef {
        let predicate = if self.negate {
            predicate::not(predicate)
        } else {
            predicate
        };
        self.hooks.on_new_predicate(predicate)
    }

    fn derive(&self, expression: ExpressionRef) -> ValueBuilder {
        ValueBuilder {
            expression: self.hooks.on_new_value_builder(expression),
            hooks: self.hooks.clone(),
            negate: false,
        }
    }

    fn compare(&self, op: BinaryOp, operand: impl Into<Operand>) -> PredicateRef {
        self.on_new_predicate(predicate::binary(op, self.expression.clone(), operand))
    }

    // ---- predicates ----

    pub fn is_equal_to(&self, value: impl Into<Operand>) -> PredicateRef {
        self.compare(BinaryOp::Eq, value)
    }

    pub fn is_not_equal_to(&self, value: impl Into<Operand>) -> PredicateRef {
        self.compare(BinaryOp::NotEq, value)
    }

    pub fn is_equal_to_ignore_case(&self, value: impl Into<Operand>) -> PredicateRef {
        self.compare(BinaryOp::EqIgnoreCase, value)
    }

    pub fn is_less_than(&self, value: impl Into<Operand>) -> PredicateRef {
        self.compare(BinaryOp::Lt, value)
    }

    pub fn is_less_than_or_equal_to(&self, value: impl Into<Operand>) -> PredicateRef {
        self.compare(BinaryOp::Le, value)
    }

    pub fn is_greater_than(&self, value: impl Into<Operand>) -> PredicateRef {
        self.compare(BinaryOp::Gt, value)
    }

    pub fn is_greater_than_or_equal_to(&self, value: impl Into<Operand>) -> PredicateRef {
        self.compare(BinaryOp::Ge, value)
    }

    pub fn starts_with(&self, value: impl Into<Operand>) -> PredicateRef {
        self.compare(BinaryOp::StartsWith, value)
    }

    pub fn ends_with(&self, value: impl Into<Operand>) -> PredicateRef {
        self.compare(BinaryOp::EndsWith, value)
    }

    pub fn contains(&self, value: impl Into<Operand>) -> PredicateRef {
        self.compare(BinaryOp::Contains, value)
    }

    /// Full match against a regular expression.
    pub fn regex(&self, pattern: impl Into<Operand>) -> PredicateRef {
        self.compare(BinaryOp::Regex, pattern)
    }

    pub fn is_in<I>(&self, candidates: I) -> PredicateRef
    where
        I: IntoIterator,
        I::Item: Into<Operand>,
    {
        self.on_new_predicate(predicate::is_in(self.expression.clone(), candidates))
    }

    pub fn is_null(&self) -> PredicateRef {
        self.on_new_predicate(predicate::is_null(self.expression.clone()))
    }

    pub fn is_not_null(&self) -> PredicateRef {
        self.on_new_predicate(predicate::is_not_null(self.expression.clone()))
    }

    pub fn is_instance_of(&self, kind: ValueKind) -> PredicateRef {
        self.on_new_predicate(predicate::is_instance_of(self.expression.clone(), kind))
    }

    /// Equality against an expression chosen afterwards:
    /// `builder.matches().header("expected")`.
    ///
    /// The predicate is produced immediately; its right-hand side is resolved
    /// at evaluation time.
    pub fn matches(&self) -> ExpressionClause<PredicateRef> {
        let slot = ExpressionSlot::new();
        let predicate = self.compare(BinaryOp::Eq, slot.deferred());
        ExpressionClause::new(slot, predicate)
    }

    // ---- transformations ----

    pub fn tokenize(&self, token: &str) -> ValueBuilder {
        self.tokenize_with(Tokenize::by(token))
    }

    pub fn tokenize_with(&self, options: Tokenize) -> ValueBuilder {
        self.derive(expression::tokenize(self.expression.clone(), options))
    }

    pub fn regex_replace_all(&self, pattern: &str, replacement: impl Into<Operand>) -> ValueBuilder {
        self.derive(expression::regex_replace_all(
            self.expression.clone(),
            pattern,
            replacement.into().into_expression(),
        ))
    }

    pub fn convert_to(&self, kind: ValueKind) -> ValueBuilder {
        self.derive(expression::convert_to(self.expression.clone(), kind))
    }

    pub fn convert_to_text(&self) -> ValueBuilder {
        self.convert_to(ValueKind::Text)
    }

    pub fn append(&self, value: impl Into<Operand>) -> ValueBuilder {
        self.derive(expression::append(
            self.expression.clone(),
            value.into().into_expression(),
        ))
    }

    pub fn prepend(&self, value: impl Into<Operand>) -> ValueBuilder {
        self.derive(expression::prepend(
            self.expression.clone(),
            value.into().into_expression(),
        ))
    }

    pub fn sort_by<F>(&self, comparator: F) -> ValueBuilder
    where
        F: Fn(&Value, &Value) -> Ordering + Send + Sync + 'static,
    {
        let comparator: Comparator = Arc::new(comparator);
        self.derive(expression::sort_by(self.expression.clone(), comparator))
    }
}

impl fmt::Display for ValueBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expression)
    }
}

pub fn body() -> ValueBuilder {
    ValueBuilder::new(expression::body())
}

pub fn header(name: &str) -> ValueBuilder {
    ValueBuilder::new(expression::header(name))
}

pub fn property(name: &str) -> ValueBuilder {
    ValueBuilder::new(expression::property(name))
}

pub fn constant(value: impl Into<Value>) -> ValueBuilder {
    ValueBuilder::new(expression::constant(value))
}

pub fn expression(expression: ExpressionRef) -> ValueBuilder {
    ValueBuilder::new(expression)
}
