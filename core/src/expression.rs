//! # Expressions and Predicates
//!
//! An [`Expression`] computes a [`Value`] from an [`Exchange`]; a [`Predicate`]
//! computes a boolean. Both are lazily evaluated: nothing is computed until an
//! exchange is available.
//!
//! Expressions that need collaborators from the [`Context`] (for example a
//! named language) resolve them in [`Expression::init`], which is called once
//! per context before the first evaluation and must be idempotent.

use crate::context::Context;
use crate::error::ExpressionError;
use crate::exchange::Exchange;
use crate::value::{Value, ValueKind};
use once_cell::sync::OnceCell;
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// A lazily evaluated value over an exchange.
pub trait Expression: Send + Sync + fmt::Display {
    /// One-time per-context initialization.
    fn init(&self, _context: &Context) -> Result<(), ExpressionError> {
        Ok(())
    }

    fn evaluate(&self, exchange: &Exchange) -> Result<Value, ExpressionError>;
}

/// A lazily evaluated boolean over an exchange.
pub trait Predicate: Send + Sync + fmt::Display {
    /// One-time per-context initialization.
    fn init(&self, _context: &Context) -> Result<(), ExpressionError> {
        Ok(())
    }

    fn matches(&self, exchange: &Exchange) -> Result<bool, ExpressionError>;

    /// Describes the predicate as evaluated against `exchange`, for failure reports.
    fn explain(&self, _exchange: &Exchange) -> String {
        self.to_string()
    }
}

pub type ExpressionRef = Arc<dyn Expression>;
pub type PredicateRef = Arc<dyn Predicate>;

// ============== Primitives ==============

/// A fixed value.
pub struct Constant(Value);

impl Expression for Constant {
    fn evaluate(&self, _exchange: &Exchange) -> Result<Value, ExpressionError> {
        Ok(self.0.clone())
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which part of the exchange an [`ExchangePart`] expression reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Exchange,
    Message,
    Body(Option<ValueKind>),
    Header(String),
    Headers,
    Property(String),
    Properties,
    Pattern,
}

/// Reads one part of the exchange. Absent headers and properties evaluate to `Null`.
pub struct ExchangePart(Part);

impl Expression for ExchangePart {
    fn evaluate(&self, exchange: &Exchange) -> Result<Value, ExpressionError> {
        let value = match &self.0 {
            Part::Exchange => exchange.to_value(),
            Part::Message => exchange.message_value(),
            Part::Body(None) => exchange.body().clone(),
            Part::Body(Some(kind)) => exchange.body().convert_to(*kind)?,
            Part::Header(name) => exchange.header(name).cloned().unwrap_or_default(),
            Part::Headers => Value::Map(exchange.message().headers().clone()),
            Part::Property(name) => exchange.property(name).cloned().unwrap_or_default(),
            Part::Properties => Value::Map(exchange.properties().clone()),
            Part::Pattern => Value::from(exchange.pattern().to_string()),
        };
        Ok(value)
    }
}

impl fmt::Display for ExchangePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Part::Exchange => f.write_str("exchange"),
            Part::Message => f.write_str("message"),
            Part::Body(None) => f.write_str("body"),
            Part::Body(Some(kind)) => write!(f, "bodyAs({kind})"),
            Part::Header(name) => write!(f, "header({name})"),
            Part::Headers => f.write_str("headers"),
            Part::Property(name) => write!(f, "property({name})"),
            Part::Properties => f.write_str("properties"),
            Part::Pattern => f.write_str("exchangePattern"),
        }
    }
}

/// An expression written in a named language, resolved through the context's
/// language registry on first init.
pub struct LanguageExpression {
    language: String,
    source: String,
    resolved: OnceCell<ExpressionRef>,
}

impl Expression for LanguageExpression {
    fn init(&self, context: &Context) -> Result<(), ExpressionError> {
        self.resolved
            .get_or_try_init(|| {
                let language = context.languages().resolve(&self.language)?;
                let expression = language.create_expression(&self.source)?;
                expression.init(context)?;
                Ok::<_, ExpressionError>(expression)
            })
            .map(|_| ())
    }

    fn evaluate(&self, exchange: &Exchange) -> Result<Value, ExpressionError> {
        self.resolved
            .get()
            .ok_or_else(|| ExpressionError::NotInitialized(self.to_string()))?
            .evaluate(exchange)
    }
}

impl fmt::Display for LanguageExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.language, self.source)
    }
}

/// Closure-backed expression.
pub struct FnExpression<F> {
    label: String,
    f: F,
}

impl<F> Expression for FnExpression<F>
where
    F: Fn(&Exchange) -> Result<Value, ExpressionError> + Send + Sync,
{
    fn evaluate(&self, exchange: &Exchange) -> Result<Value, ExpressionError> {
        (self.f)(exchange)
    }
}

impl<F> fmt::Display for FnExpression<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

pub fn constant(value: impl Into<Value>) -> ExpressionRef {
    Arc::new(Constant(value.into()))
}

pub fn exchange() -> ExpressionRef {
    Arc::new(ExchangePart(Part::Exchange))
}

pub fn message() -> ExpressionRef {
    Arc::new(ExchangePart(Part::Message))
}

pub fn body() -> ExpressionRef {
    Arc::new(ExchangePart(Part::Body(None)))
}

pub fn body_as(kind: ValueKind) -> ExpressionRef {
    Arc::new(ExchangePart(Part::Body(Some(kind))))
}

pub fn header(name: impl Into<String>) -> ExpressionRef {
    Arc::new(ExchangePart(Part::Header(name.into())))
}

pub fn headers() -> ExpressionRef {
    Arc::new(ExchangePart(Part::Headers))
}

pub fn property(name: impl Into<String>) -> ExpressionRef {
    Arc::new(ExchangePart(Part::Property(name.into())))
}

pub fn properties() -> ExpressionRef {
    Arc::new(ExchangePart(Part::Properties))
}

pub fn exchange_pattern() -> ExpressionRef {
    Arc::new(ExchangePart(Part::Pattern))
}

pub fn language(language: impl Into<String>, source: impl Into<String>) -> ExpressionRef {
    Arc::new(LanguageExpression {
        language: language.into(),
        source: source.into(),
        resolved: OnceCell::new(),
    })
}

pub fn from_fn<F>(label: impl Into<String>, f: F) -> ExpressionRef
where
    F: Fn(&Exchange) -> Result<Value, ExpressionError> + Send + Sync + 'static,
{
    Arc::new(FnExpression {
        label: label.into(),
        f,
    })
}

// ============== Transformations ==============

/// Tokenizer options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tokenize {
    pub token: String,
    pub regex: bool,
    /// Join every `n` tokens into one.
    pub group: Option<usize>,
    pub skip_first: bool,
}

impl Tokenize {
    pub fn by(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            regex: false,
            group: None,
            skip_first: false,
        }
    }

    pub fn by_regex(pattern: impl Into<String>) -> Self {
        Self {
            regex: true,
            ..Self::by(pattern)
        }
    }

    pub fn group(mut self, n: usize) -> Self {
        self.group = Some(n);
        self
    }

    pub fn skip_first(mut self, skip: bool) -> Self {
        self.skip_first = skip;
        self
    }
}

struct Tokenizer {
    inner: ExpressionRef,
    options: Tokenize,
    compiled: OnceCell<Regex>,
}

impl Tokenizer {
    fn regex(&self) -> Result<&Regex, ExpressionError> {
        self.compiled.get_or_try_init(|| {
            Regex::new(&self.options.token)
                .map_err(|e| ExpressionError::invalid_regex(&self.options.token, e))
        })
    }
}

impl Expression for Tokenizer {
    fn init(&self, context: &Context) -> Result<(), ExpressionError> {
        self.inner.init(context)?;
        if self.options.regex {
            self.regex()?;
        }
        Ok(())
    }

    fn evaluate(&self, exchange: &Exchange) -> Result<Value, ExpressionError> {
        let value = self.inner.evaluate(exchange)?;
        if value.is_null() {
            return Ok(Value::Null);
        }
        let text = value.to_text();
        let mut tokens: Vec<String> = if self.options.regex {
            self.regex()?.split(&text).map(str::to_string).collect()
        } else {
            text.split(self.options.token.as_str())
                .map(str::to_string)
                .collect()
        };
        if self.options.skip_first && !tokens.is_empty() {
            tokens.remove(0);
        }
        if let Some(n) = self.options.group.filter(|n| *n > 1) {
            let separator = if self.options.regex {
                ","
            } else {
                self.options.token.as_str()
            };
            tokens = tokens.chunks(n).map(|chunk| chunk.join(separator)).collect();
        }
        Ok(Value::List(tokens.into_iter().map(Value::Text).collect()))
    }
}

impl fmt::Display for Tokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tokenize({}, {})", self.inner, self.options.token)
    }
}

struct RegexReplace {
    inner: ExpressionRef,
    pattern: String,
    replacement: ExpressionRef,
    compiled: OnceCell<Regex>,
}

impl RegexReplace {
    fn regex(&self) -> Result<&Regex, ExpressionError> {
        self.compiled.get_or_try_init(|| {
            Regex::new(&self.pattern).map_err(|e| ExpressionError::invalid_regex(&self.pattern, e))
        })
    }
}

impl Expression for RegexReplace {
    fn init(&self, context: &Context) -> Result<(), ExpressionError> {
        self.inner.init(context)?;
        self.replacement.init(context)?;
        self.regex().map(|_| ())
    }

    fn evaluate(&self, exchange: &Exchange) -> Result<Value, ExpressionError> {
        let value = self.inner.evaluate(exchange)?;
        if value.is_null() {
            return Ok(Value::Null);
        }
        let replacement = self.replacement.evaluate(exchange)?.to_text();
        let text = value.to_text();
        Ok(Value::Text(
            self.regex()?
                .replace_all(&text, replacement.as_str())
                .into_owned(),
        ))
    }
}

impl fmt::Display for RegexReplace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "regexReplaceAll({}, {}, {})",
            self.inner, self.pattern, self.replacement
        )
    }
}

struct Convert {
    inner: ExpressionRef,
    kind: ValueKind,
}

impl Expression for Convert {
    fn init(&self, context: &Context) -> Result<(), ExpressionError> {
        self.inner.init(context)
    }

    fn evaluate(&self, exchange: &Exchange) -> Result<Value, ExpressionError> {
        Ok(self.inner.evaluate(exchange)?.convert_to(self.kind)?)
    }
}

impl fmt::Display for Convert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "convertTo({}, {})", self.inner, self.kind)
    }
}

struct Concat {
    inner: ExpressionRef,
    operand: ExpressionRef,
    prepend: bool,
}

impl Expression for Concat {
    fn init(&self, context: &Context) -> Result<(), ExpressionError> {
        self.inner.init(context)?;
        self.operand.init(context)
    }

    fn evaluate(&self, exchange: &Exchange) -> Result<Value, ExpressionError> {
        let value = self.inner.evaluate(exchange)?;
        let operand = self.operand.evaluate(exchange)?;
        let (value, operand) = (
            if value.is_null() { String::new() } else { value.to_text() },
            operand.to_text(),
        );
        Ok(Value::Text(if self.prepend {
            operand + &value
        } else {
            value + &operand
        }))
    }
}

impl fmt::Display for Concat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = if self.prepend { "prepend" } else { "append" };
        write!(f, "{op}({}, {})", self.inner, self.operand)
    }
}

/// Comparator used by [`sort_by`].
pub type Comparator = Arc<dyn Fn(&Value, &Value) -> Ordering + Send + Sync>;

struct Sort {
    inner: ExpressionRef,
    comparator: Comparator,
}

impl Expression for Sort {
    fn init(&self, context: &Context) -> Result<(), ExpressionError> {
        self.inner.init(context)
    }

    fn evaluate(&self, exchange: &Exchange) -> Result<Value, ExpressionError> {
        match self.inner.evaluate(exchange)? {
            Value::List(mut items) => {
                items.sort_by(|a, b| (self.comparator)(a, b));
                Ok(Value::List(items))
            }
            Value::Null => Ok(Value::Null),
            other => Err(ExpressionError::Evaluation(format!(
                "cannot sort a {} value",
                other.kind()
            ))),
        }
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sort({})", self.inner)
    }
}

pub fn tokenize(inner: ExpressionRef, options: Tokenize) -> ExpressionRef {
    Arc::new(Tokenizer {
        inner,
        options,
        compiled: OnceCell::new(),
    })
}

pub fn regex_replace_all(
    inner: ExpressionRef,
    pattern: impl Into<String>,
    replacement: ExpressionRef,
) -> ExpressionRef {
    Arc::new(RegexReplace {
        inner,
        pattern: pattern.into(),
        replacement,
        compiled: OnceCell::new(),
    })
}

pub fn convert_to(inner: ExpressionRef, kind: ValueKind) -> ExpressionRef {
    Arc::new(Convert { inner, kind })
}

pub fn append(inner: ExpressionRef, operand: ExpressionRef) -> ExpressionRef {
    Arc::new(Concat {
        inner,
        operand,
        prepend: false,
    })
}

pub fn prepend(inner: ExpressionRef, operand: ExpressionRef) -> ExpressionRef {
    Arc::new(Concat {
        inner,
        operand,
        prepend: true,
    })
}

pub fn sort_by(inner: ExpressionRef, comparator: Comparator) -> ExpressionRef {
    Arc::new(Sort { inner, comparator })
}
