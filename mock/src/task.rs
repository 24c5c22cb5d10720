//! # Expectation Tasks
//!
//! Every expectation declared on a mock endpoint becomes a [`Task`]:
//!
//! - **Plain** tasks ([`Check`]) run once per verification over everything
//!   received so far.
//! - **Indexed** tasks ([`IndexedCheck`]) assert one message at a time, so they
//!   can also run at arrival when fail-fast is enabled. Their per-message
//!   verdicts are recorded: a message that passed is not evaluated again.

use crate::builder::ExpressionSlot;
use crate::clause::AssertionClause;
use crate::error::{AssertionError, FailureKind, unexpected};
use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::context::Context;
use relay_core::error::{ConversionError, ExpressionError};
use relay_core::exchange::Exchange;
use relay_core::expression::ExpressionRef;
use relay_core::value::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::ops::Range;
use std::path::PathBuf;
use std::time::Duration;

/// What a task sees when it runs.
pub struct Scope<'a> {
    pub uri: &'a str,
    pub received: &'a [Exchange],
    /// Every arrival, including those evicted by retention.
    pub received_counter: usize,
    pub ledger: &'a Ledger,
}

impl Scope<'_> {
    fn fail(&self, kind: FailureKind, message: impl fmt::Display) -> AssertionError {
        AssertionError::on(self.uri, kind, message)
    }

    fn exchange(&self, index: usize) -> Result<&Exchange, AssertionError> {
        self.received.get(index).ok_or_else(|| {
            self.fail(
                FailureKind::Missing,
                format!("No exchange received for counter: {index}"),
            )
        })
    }
}

// ============== Ledger ==============

/// Expected and actual values captured at arrival.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    pub expected_bodies: Option<Vec<Value>>,
    pub actual_bodies: Vec<Value>,
    pub expected_headers: Option<BTreeMap<String, Value>>,
    pub actual_headers: BTreeMap<String, Value>,
    pub expected_properties: Option<BTreeMap<String, Value>>,
    pub actual_properties: BTreeMap<String, Value>,
}

impl Ledger {
    /// Records the values of an arriving exchange. The body is converted to the
    /// kind of the expected body at the same position; when that fails the raw
    /// body is kept and the mismatch is reported at verification. Bodies past
    /// the expected ones are not recorded.
    pub fn capture(&mut self, exchange: &Exchange) {
        if self.expected_headers.is_some() {
            self.actual_headers.extend(
                exchange
                    .message()
                    .headers()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_copy())),
            );
        }
        if self.expected_properties.is_some() {
            self.actual_properties.extend(
                exchange
                    .properties()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_copy())),
            );
        }
        let index = self.actual_bodies.len();
        if let Some(expected) = self.expected_bodies.as_ref().and_then(|bodies| bodies.get(index)) {
            let body = exchange.body();
            let actual = if expected.is_null() {
                body.deep_copy()
            } else {
                body.reset_stream();
                let converted = body.convert_to(expected.kind());
                body.reset_stream();
                converted.unwrap_or_else(|_| body.deep_copy())
            };
            self.actual_bodies.push(actual);
        }
    }
}

/// Brings `actual` to the kind of `expected` so the two can be compared.
pub fn extract_actual(actual: &Value, expected: &Value) -> Result<Value, ConversionError> {
    if actual.is_null() || expected.is_null() || actual.kind() == expected.kind() {
        return Ok(actual.clone());
    }
    actual.convert_to(expected.kind())
}

fn expect_equal(
    scope: &Scope<'_>,
    label: impl fmt::Display,
    expected: &Value,
    actual: &Value,
) -> Result<(), AssertionError> {
    let actual = extract_actual(actual, expected)
        .map_err(|e| scope.fail(FailureKind::Conversion, format!("{label}. {e}")))?;
    if expected.coerce_eq(&actual) {
        Ok(())
    } else {
        Err(scope.fail(
            FailureKind::Mismatch,
            format!("{label}. Expected: <{expected}> but was: <{actual}>"),
        ))
    }
}

fn list(values: &[Value]) -> String {
    Value::List(values.to_vec()).to_string()
}

// ============== Task Contracts ==============

/// A plain expectation, run once per verification.
#[async_trait]
pub trait Check: Send + Sync {
    fn init(&self, _context: &Context) -> Result<(), ExpressionError> {
        Ok(())
    }

    async fn run(&self, scope: &Scope<'_>) -> Result<(), AssertionError>;
}

/// Outcome of asserting one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The message satisfies the check for good.
    Passed,
    /// Nothing failed yet, but the check depends on a message still to come.
    Pending,
}

/// An expectation asserted message by message.
pub trait IndexedCheck: Send + Sync {
    fn init(&self, _context: &Context) -> Result<(), ExpressionError> {
        Ok(())
    }

    fn assert_on_index(&self, scope: &Scope<'_>, index: usize) -> Result<Verdict, AssertionError>;

    /// Indices this check covers.
    fn indices(&self, scope: &Scope<'_>) -> Range<usize> {
        0..scope.received.len()
    }

    /// Indices count arrivals rather than positions in the retained list.
    fn by_arrival(&self) -> bool {
        false
    }
}

pub struct IndexedTask {
    check: Box<dyn IndexedCheck>,
    /// `(index, exchange id)` of every message that passed. Checks addressed
    /// by arrival record an empty id.
    passed: Mutex<HashSet<(usize, String)>>,
}

impl IndexedTask {
    pub fn new(check: impl IndexedCheck + 'static) -> Self {
        Self {
            check: Box::new(check),
            passed: Mutex::new(HashSet::new()),
        }
    }

    pub fn init(&self, context: &Context) -> Result<(), ExpressionError> {
        self.check.init(context)
    }

    pub fn by_arrival(&self) -> bool {
        self.check.by_arrival()
    }

    pub fn verify_index(&self, scope: &Scope<'_>, index: usize) -> Result<(), AssertionError> {
        if !self.check.indices(scope).contains(&index) {
            return Ok(());
        }
        let key = if self.check.by_arrival() {
            Some((index, String::new()))
        } else {
            scope
                .received
                .get(index)
                .map(|exchange| (index, exchange.id().to_string()))
        };
        if let Some(key) = &key {
            if self.passed.lock().contains(key) {
                return Ok(());
            }
        }
        if self.check.assert_on_index(scope, index)? == Verdict::Passed {
            if let Some(key) = key {
                self.passed.lock().insert(key);
            }
        }
        Ok(())
    }

    pub fn verify_all(&self, scope: &Scope<'_>) -> Result<(), AssertionError> {
        self.check
            .indices(scope)
            .try_for_each(|index| self.verify_index(scope, index))
    }
}

pub enum Task {
    Plain(Box<dyn Check>),
    Indexed(IndexedTask),
}

impl Task {
    pub fn plain(check: impl Check + 'static) -> Self {
        Task::Plain(Box::new(check))
    }

    pub fn indexed(check: impl IndexedCheck + 'static) -> Self {
        Task::Indexed(IndexedTask::new(check))
    }

    pub fn init(&self, context: &Context) -> Result<(), ExpressionError> {
        match self {
            Task::Plain(check) => check.init(context),
            Task::Indexed(task) => task.init(context),
        }
    }

    pub async fn verify(&self, scope: &Scope<'_>) -> Result<(), AssertionError> {
        match self {
            Task::Plain(check) => check.run(scope).await,
            Task::Indexed(task) => task.verify_all(scope),
        }
    }
}

// ============== Header / Property Values ==============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scoped {
    Header,
    Property,
}

impl Scoped {
    fn name(&self) -> &'static str {
        match self {
            Scoped::Header => "header",
            Scoped::Property => "property",
        }
    }

    fn plural(&self) -> &'static str {
        match self {
            Scoped::Header => "headers",
            Scoped::Property => "properties",
        }
    }

    fn entries<'e>(&self, exchange: &'e Exchange) -> &'e BTreeMap<String, Value> {
        match self {
            Scoped::Header => exchange.message().headers(),
            Scoped::Property => exchange.properties(),
        }
    }
}

/// Every message carries the expected header (or property) values. An
/// expected `Null` accepts an absent entry.
pub struct ScopedValues(pub Scoped);

impl IndexedCheck for ScopedValues {
    fn assert_on_index(&self, scope: &Scope<'_>, index: usize) -> Result<Verdict, AssertionError> {
        let expected = match self.0 {
            Scoped::Header => &scope.ledger.expected_headers,
            Scoped::Property => &scope.ledger.expected_properties,
        };
        let Some(expected) = expected else {
            return Ok(Verdict::Passed);
        };
        let exchange = scope.exchange(index)?;
        let entries = self.0.entries(exchange);
        for (key, expected_value) in expected {
            if !expected_value.is_null() {
                if entries.is_empty() {
                    return Err(scope.fail(
                        FailureKind::Missing,
                        format!("Exchange {index} has no {}", self.0.plural()),
                    ));
                }
                if !entries.contains_key(key) {
                    return Err(scope.fail(
                        FailureKind::Missing,
                        format!(
                            "No {} with name {key} found for message: {index}",
                            self.0.name()
                        ),
                    ));
                }
            }
            let actual = entries.get(key).cloned().unwrap_or_default();
            let label = format!(
                "{} with name {key} for message: {index}",
                capitalized(self.0.name())
            );
            expect_equal(scope, label, expected_value, &actual)?;
        }
        Ok(Verdict::Passed)
    }
}

fn capitalized(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// The values of one header (or property) across all messages form the
/// expected multiset.
pub struct ScopedValuesAnyOrder {
    pub scoped: Scoped,
    pub name: String,
    pub values: Vec<Value>,
}

#[async_trait]
impl Check for ScopedValuesAnyOrder {
    async fn run(&self, scope: &Scope<'_>) -> Result<(), AssertionError> {
        let mut remaining = self.values.clone();
        for exchange in scope.received {
            let Some(actual) = self.scoped.entries(exchange).get(&self.name) else {
                continue;
            };
            if let Some(position) = remaining.iter().position(|v| v.coerce_eq(actual)) {
                remaining.remove(position);
            }
        }
        if remaining.is_empty() {
            return Ok(());
        }
        Err(scope.fail(
            FailureKind::Mismatch,
            format!(
                "Expected {} {} with key[{}], received {} {}. Expected {} values: {}",
                self.values.len(),
                self.scoped.plural(),
                self.name,
                self.values.len() - remaining.len(),
                self.scoped.plural(),
                self.scoped.name(),
                list(&remaining)
            ),
        ))
    }
}

// ============== Bodies ==============

/// Body `i` equals expected body `i`.
pub struct BodiesInOrder;

impl IndexedCheck for BodiesInOrder {
    fn assert_on_index(&self, scope: &Scope<'_>, index: usize) -> Result<Verdict, AssertionError> {
        let Some(expected) = scope
            .ledger
            .expected_bodies
            .as_ref()
            .and_then(|bodies| bodies.get(index))
        else {
            return Ok(Verdict::Passed);
        };
        let actual = scope.ledger.actual_bodies.get(index).ok_or_else(|| {
            scope.fail(
                FailureKind::Missing,
                format!("No exchange received for counter: {index}"),
            )
        })?;
        expect_equal(scope, format!("Body of message: {index}"), expected, actual)?;
        Ok(Verdict::Passed)
    }

    fn indices(&self, scope: &Scope<'_>) -> Range<usize> {
        0..scope.ledger.expected_bodies.as_ref().map_or(0, Vec::len)
    }

    fn by_arrival(&self) -> bool {
        true
    }
}

/// Every expected body arrived, in any order.
pub struct BodiesAnyOrder;

#[async_trait]
impl Check for BodiesAnyOrder {
    async fn run(&self, scope: &Scope<'_>) -> Result<(), AssertionError> {
        let Some(expected) = &scope.ledger.expected_bodies else {
            return Ok(());
        };
        let mut actual = scope.ledger.actual_bodies.clone();
        for body in expected {
            match actual.iter().position(|a| body.coerce_eq(a)) {
                Some(position) => {
                    actual.remove(position);
                }
                None => {
                    return Err(scope.fail(
                        FailureKind::Mismatch,
                        format!(
                            "Message with body {body} was expected but not found in {}",
                            list(&actual)
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// The first body equals an expression evaluated against the first message.
pub struct BodyExpression(pub ExpressionSlot);

impl IndexedCheck for BodyExpression {
    fn init(&self, context: &Context) -> Result<(), ExpressionError> {
        match self.0.get() {
            Some(expression) => expression.init(context),
            None => Ok(()),
        }
    }

    fn assert_on_index(&self, scope: &Scope<'_>, index: usize) -> Result<Verdict, AssertionError> {
        let exchange = scope.exchange(index)?;
        let expression = self.0.deferred();
        exchange.body().reset_stream();
        let expected = expression
            .evaluate(exchange)
            .map_err(|e| unexpected(scope.uri, format!("Body of message: {index}"), e))?;
        exchange.body().reset_stream();
        expect_equal(scope, format!("Body of message: {index}"), &expected, exchange.body())?;
        Ok(Verdict::Passed)
    }

    fn indices(&self, _scope: &Scope<'_>) -> Range<usize> {
        0..1
    }
}

// ============== Clauses ==============

/// A clause applied to one message.
pub struct ClauseAt {
    pub index: usize,
    pub clause: AssertionClause,
    /// Fail when fewer messages arrived; otherwise the clause waits for one.
    pub required: bool,
}

impl IndexedCheck for ClauseAt {
    fn init(&self, context: &Context) -> Result<(), ExpressionError> {
        self.clause.init(context)
    }

    fn assert_on_index(&self, scope: &Scope<'_>, index: usize) -> Result<Verdict, AssertionError> {
        if index >= scope.received.len() {
            if !self.required {
                return Ok(Verdict::Pending);
            }
            return Err(scope.fail(
                FailureKind::Missing,
                format!("Not enough messages received. Was: {}", scope.received_counter),
            ));
        }
        self.clause.apply_on(scope.received, index)
    }

    fn indices(&self, _scope: &Scope<'_>) -> Range<usize> {
        self.index..self.index + 1
    }
}

/// A clause applied to every message.
pub struct ClauseAll(pub AssertionClause);

impl IndexedCheck for ClauseAll {
    fn init(&self, context: &Context) -> Result<(), ExpressionError> {
        self.0.init(context)
    }

    fn assert_on_index(&self, scope: &Scope<'_>, index: usize) -> Result<Verdict, AssertionError> {
        self.0.apply_on(scope.received, index)
    }
}

// ============== Keys ==============

/// The expression ordering and duplicate checks are keyed on.
pub enum KeySource {
    Fixed(ExpressionRef),
    Clause(AssertionClause),
}

impl KeySource {
    fn expression(&self, uri: &str) -> Result<ExpressionRef, AssertionError> {
        match self {
            KeySource::Fixed(expression) => Ok(expression.clone()),
            KeySource::Clause(clause) => clause.value_expression().ok_or_else(|| {
                AssertionError::on(
                    uri,
                    FailureKind::Unexpected,
                    "No expression was chosen for the key of this expectation",
                )
            }),
        }
    }

    fn init(&self, context: &Context) -> Result<(), ExpressionError> {
        match self {
            KeySource::Fixed(expression) => expression.init(context),
            KeySource::Clause(clause) => clause.init(context),
        }
    }

    fn key(&self, scope: &Scope<'_>, exchange: &Exchange) -> Result<(Value, ExpressionRef), AssertionError> {
        let expression = self.expression(scope.uri)?;
        exchange.body().reset_stream();
        let key = expression
            .evaluate(exchange)
            .map_err(|e| unexpected(scope.uri, format!("Evaluating {expression} on {exchange}"), e))?;
        Ok((key, expression))
    }
}

// ============== Ordering ==============

/// Each message is strictly after (or before) the one preceding it.
pub struct Sorted {
    pub key: KeySource,
    pub ascending: bool,
}

impl Sorted {
    fn direction(&self) -> &'static str {
        if self.ascending { "ascending" } else { "descending" }
    }
}

impl IndexedCheck for Sorted {
    fn init(&self, context: &Context) -> Result<(), ExpressionError> {
        self.key.init(context)
    }

    fn assert_on_index(&self, scope: &Scope<'_>, index: usize) -> Result<Verdict, AssertionError> {
        let previous_index = index - 1;
        let previous = scope.exchange(previous_index)?;
        let current = scope.exchange(index)?;
        let (previous_key, expression) = self.key.key(scope, previous)?;
        let (key, _) = self.key.key(scope, current)?;

        let Some(ordering) = previous_key.coerce_cmp(&key) else {
            return Err(scope.fail(
                FailureKind::Ordering,
                format!(
                    "Messages {previous_index} and {index} cannot be compared: {previous_key} and {key} for expression: {expression}"
                ),
            ));
        };
        let ordering = if self.ascending { ordering } else { ordering.reverse() };
        match ordering {
            Ordering::Less => Ok(Verdict::Passed),
            Ordering::Equal => Err(scope.fail(
                FailureKind::Ordering,
                format!(
                    "Messages not {}. Messages {previous_index} and {index} are equal with value: {key} for expression: {expression}. Exchanges: {previous} and {current}",
                    self.direction()
                ),
            )),
            Ordering::Greater => Err(scope.fail(
                FailureKind::Ordering,
                format!(
                    "Messages not {}. Message {previous_index} has value: {previous_key} and message {index} has value: {key} for expression: {expression}. Exchanges: {previous} and {current}",
                    self.direction()
                ),
            )),
        }
    }

    fn indices(&self, scope: &Scope<'_>) -> Range<usize> {
        1..scope.received.len().max(1)
    }
}

// ============== Duplicates ==============

/// No two messages share a key.
pub struct NoDuplicates {
    pub key: KeySource,
    /// Keys seen so far with the id of the exchange they came from.
    seen: Mutex<Vec<(Value, String)>>,
}

impl NoDuplicates {
    pub fn new(key: KeySource) -> Self {
        Self {
            key,
            seen: Mutex::new(Vec::new()),
        }
    }
}

impl IndexedCheck for NoDuplicates {
    fn init(&self, context: &Context) -> Result<(), ExpressionError> {
        self.key.init(context)
    }

    fn assert_on_index(&self, scope: &Scope<'_>, index: usize) -> Result<Verdict, AssertionError> {
        let exchange = scope.exchange(index)?;
        let (key, expression) = self.key.key(scope, exchange)?;
        let mut seen = self.seen.lock();
        if let Some((_, existing)) = seen
            .iter()
            .find(|(value, id)| id != exchange.id() && *value == key)
        {
            return Err(scope.fail(
                FailureKind::Duplicate,
                format!(
                    "Duplicate message found on message {index} has value: {key} for expression: {expression}. Exchanges: Exchange[{existing}] and {exchange}"
                ),
            ));
        }
        if !seen.iter().any(|(_, id)| id == exchange.id()) {
            seen.push((key, exchange.id().to_string()));
        }
        Ok(Verdict::Passed)
    }
}

// ============== Files ==============

/// A file appears within five seconds, optionally with the given content.
pub struct FileExists {
    pub path: PathBuf,
    pub content: Option<String>,
}

const FILE_WAIT: Duration = Duration::from_secs(5);
const FILE_POLL: Duration = Duration::from_millis(50);

#[async_trait]
impl Check for FileExists {
    async fn run(&self, scope: &Scope<'_>) -> Result<(), AssertionError> {
        let name = self.path.display();
        let deadline = tokio::time::Instant::now() + FILE_WAIT;
        loop {
            if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(scope.fail(
                    FailureKind::Missing,
                    format!("The file should exists: {name}"),
                ));
            }
            tokio::time::sleep(FILE_POLL).await;
        }
        let Some(expected) = &self.content else {
            return Ok(());
        };
        let actual = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            scope
                .fail(FailureKind::Unexpected, format!("Reading file: {name}"))
                .with_cause(e)
        })?;
        if *expected == actual {
            Ok(())
        } else {
            Err(scope.fail(
                FailureKind::Mismatch,
                format!("Content of file: {name}. Expected: <{expected}> but was: <{actual}>"),
            ))
        }
    }
}

// ============== Custom ==============

/// A user-supplied check over the retained messages.
pub struct FnCheck<F>(pub F);

#[async_trait]
impl<F> Check for FnCheck<F>
where
    F: Fn(&[Exchange]) -> anyhow::Result<()> + Send + Sync,
{
    async fn run(&self, scope: &Scope<'_>) -> Result<(), AssertionError> {
        (self.0)(scope.received).map_err(|e| {
            scope
                .fail(FailureKind::Mismatch, format!("{e:#}"))
                .with_cause(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::expression;

    fn scope<'a>(received: &'a [Exchange], ledger: &'a Ledger) -> Scope<'a> {
        Scope {
            uri: "mock:test",
            received,
            received_counter: received.len(),
            ledger,
        }
    }

    fn bodies<T: Into<Value> + Clone>(values: &[T]) -> Vec<Exchange> {
        values.iter().cloned().map(Exchange::new).collect()
    }

    #[test]
    fn extract_actual_converts_to_expected_kind() {
        assert_eq!(
            extract_actual(&Value::from("42"), &Value::from(1)).unwrap(),
            Value::Int(42)
        );
        assert_eq!(extract_actual(&Value::Null, &Value::from(1)).unwrap(), Value::Null);
        assert_eq!(
            extract_actual(&Value::from(7), &Value::Null).unwrap(),
            Value::Int(7)
        );
        assert!(extract_actual(&Value::from("x"), &Value::from(1)).is_err());
    }

    #[test]
    fn ledger_converts_body_eagerly() {
        let mut ledger = Ledger {
            expected_bodies: Some(vec![Value::from(1), Value::from("b")]),
            ..Ledger::default()
        };
        ledger.capture(&Exchange::new("1"));
        ledger.capture(&Exchange::new("b"));
        ledger.capture(&Exchange::new("extra"));
        assert_eq!(ledger.actual_bodies, vec![Value::Int(1), Value::from("b")]);
    }

    #[test]
    fn bodies_in_order_is_addressed_by_arrival() {
        let mut ledger = Ledger {
            expected_bodies: Some(vec![Value::from("a"), Value::from("b")]),
            ..Ledger::default()
        };
        let arrivals = bodies(&["a", "x"]);
        arrivals.iter().for_each(|e| ledger.capture(e));
        let task = IndexedTask::new(BodiesInOrder);
        assert!(task.by_arrival());

        // nothing retained, the ledger still holds both arrivals
        let empty = scope(&[], &ledger);
        assert!(task.verify_index(&empty, 0).is_ok());
        let err = task.verify_index(&empty, 1).unwrap_err();
        assert_eq!(
            err.to_string(),
            "mock:test Body of message: 1. Expected: <b> but was: <x>"
        );
    }

    #[test]
    fn pending_message_is_checked_again() {
        use chrono::{TimeDelta, Utc};
        use relay_core::exchange::RECEIVED_TIMESTAMP;

        let start = Utc::now();
        let stamped: Vec<Exchange> = [0, 300]
            .iter()
            .map(|ms| {
                Exchange::new(*ms)
                    .with_property(RECEIVED_TIMESTAMP, start + TimeDelta::milliseconds(*ms))
            })
            .collect();
        let clause = AssertionClause::new("mock:test")
            .arrives()
            .no_later_than(Duration::from_millis(50))
            .before_next();
        let task = IndexedTask::new(ClauseAll(clause));
        let ledger = Ledger::default();

        assert!(task.verify_index(&scope(&stamped[..1], &ledger), 0).is_ok());
        assert!(task.passed.lock().is_empty());

        let err = task.verify_all(&scope(&stamped, &ledger)).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Timing);
        assert!(
            err.to_string()
                .ends_with("arrives no later than 50 millis before next (was 300 millis)")
        );
    }

    #[test]
    fn bodies_in_order_reports_first_mismatch() {
        let mut ledger = Ledger {
            expected_bodies: Some(vec![Value::from("a"), Value::from("b")]),
            ..Ledger::default()
        };
        let received = bodies(&["a", "c"]);
        received.iter().for_each(|e| ledger.capture(e));
        let task = IndexedTask::new(BodiesInOrder);
        let err = task.verify_all(&scope(&received, &ledger)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "mock:test Body of message: 1. Expected: <b> but was: <c>"
        );
    }

    #[tokio::test]
    async fn bodies_any_order() {
        let mut ledger = Ledger {
            expected_bodies: Some(vec![Value::from("a"), Value::from("b")]),
            ..Ledger::default()
        };
        let received = bodies(&["b", "a"]);
        received.iter().for_each(|e| ledger.capture(e));
        assert!(BodiesAnyOrder.run(&scope(&received, &ledger)).await.is_ok());

        let mut ledger = Ledger {
            expected_bodies: Some(vec![Value::from("a"), Value::from("b")]),
            ..Ledger::default()
        };
        let received = bodies(&["b", "c"]);
        received.iter().for_each(|e| ledger.capture(e));
        let err = BodiesAnyOrder.run(&scope(&received, &ledger)).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "mock:test Message with body a was expected but not found in [b, c]"
        );
    }

    #[test]
    fn header_null_accepts_absence() {
        let mut expected = BTreeMap::new();
        expected.insert("foo".to_string(), Value::Null);
        let ledger = Ledger {
            expected_headers: Some(expected),
            ..Ledger::default()
        };
        let check = ScopedValues(Scoped::Header);

        let absent = vec![Exchange::new(1)];
        assert!(check.assert_on_index(&scope(&absent, &ledger), 0).is_ok());

        let null = vec![Exchange::new(1).with_header("foo", Value::Null)];
        assert!(check.assert_on_index(&scope(&null, &ledger), 0).is_ok());

        let present = vec![Exchange::new(1).with_header("foo", "x")];
        let err = check
            .assert_on_index(&scope(&present, &ledger), 0)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "mock:test Header with name foo for message: 0. Expected: <null> but was: <x>"
        );
    }

    #[test]
    fn header_value_must_be_present() {
        let mut expected = BTreeMap::new();
        expected.insert("foo".to_string(), Value::from(1));
        let ledger = Ledger {
            expected_headers: Some(expected),
            ..Ledger::default()
        };
        let check = ScopedValues(Scoped::Header);

        let none = vec![Exchange::new(1)];
        let err = check.assert_on_index(&scope(&none, &ledger), 0).unwrap_err();
        assert_eq!(err.to_string(), "mock:test Exchange 0 has no headers");

        let other = vec![Exchange::new(1).with_header("bar", 1)];
        let err = check.assert_on_index(&scope(&other, &ledger), 0).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Missing);
        assert_eq!(
            err.to_string(),
            "mock:test No header with name foo found for message: 0"
        );

        let coerced = vec![Exchange::new(1).with_header("foo", "1")];
        assert!(check.assert_on_index(&scope(&coerced, &ledger), 0).is_ok());
    }

    #[tokio::test]
    async fn header_values_any_order() {
        let check = ScopedValuesAnyOrder {
            scoped: Scoped::Header,
            name: "seq".to_string(),
            values: vec![Value::from(1), Value::from(2), Value::from(3)],
        };
        let ledger = Ledger::default();
        let received = vec![
            Exchange::new("x").with_header("seq", 3),
            Exchange::new("x").with_header("seq", 1),
        ];
        let err = check.run(&scope(&received, &ledger)).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "mock:test Expected 3 headers with key[seq], received 2 headers. Expected header values: [2]"
        );
    }

    #[test]
    fn sorted_is_strict() {
        let ledger = Ledger::default();
        let task = IndexedTask::new(Sorted {
            key: KeySource::Fixed(expression::body()),
            ascending: true,
        });
        assert!(task.verify_all(&scope(&bodies(&[1, 2, 3]), &ledger)).is_ok());

        let equal = bodies(&[1, 2, 2]);
        let err = task.verify_all(&scope(&equal, &ledger)).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Ordering);
        assert!(err.to_string().contains("Messages 1 and 2 are equal with value: 2"));

        let reversed = bodies(&[3, 2, 1]);
        let err = task
            .verify_all(&scope(&reversed, &ledger))
            .unwrap_err();
        assert!(err.to_string().contains("Message 0 has value: 3 and message 1 has value: 2"));
    }

    #[test]
    fn sorted_single_message_passes() {
        let ledger = Ledger::default();
        let task = IndexedTask::new(Sorted {
            key: KeySource::Fixed(expression::body()),
            ascending: false,
        });
        assert!(task.verify_all(&scope(&bodies(&[1]), &ledger)).is_ok());
        assert!(task.verify_all(&scope(&[], &ledger)).is_ok());
    }

    #[test]
    fn duplicates_are_not_double_counted() {
        let ledger = Ledger::default();
        let task = IndexedTask::new(NoDuplicates::new(KeySource::Fixed(expression::header(
            "id",
        ))));
        let received: Vec<Exchange> = (1..=3)
            .map(|i| Exchange::new("x").with_header("id", i))
            .collect();
        // arrival-time evaluation followed by a full verification
        for i in 0..received.len() {
            task.verify_index(&scope(&received[..=i], &ledger), i).unwrap();
        }
        assert!(task.verify_all(&scope(&received, &ledger)).is_ok());

        let mut with_dup = received.clone();
        with_dup.push(Exchange::new("x").with_header("id", 2));
        let err = task.verify_all(&scope(&with_dup, &ledger)).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Duplicate);
        assert!(err.to_string().contains("Duplicate message found on message 3 has value: 2"));
    }

    #[test]
    fn clause_at_missing_message() {
        let clause = AssertionClause::new("mock:test");
        clause.body().is_equal_to(1);
        let ledger = Ledger::default();
        let received = bodies(&[1]);

        let required = ClauseAt {
            index: 2,
            clause: clause.clone(),
            required: true,
        };
        let err = required.assert_on_index(&scope(&received, &ledger), 2).unwrap_err();
        assert_eq!(err.to_string(), "mock:test Not enough messages received. Was: 1");

        let optional = ClauseAt {
            index: 2,
            clause,
            required: false,
        };
        assert!(optional.assert_on_index(&scope(&received, &ledger), 2).is_ok());
    }

    #[tokio::test]
    async fn file_exists_with_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, "hello").unwrap();
        let ledger = Ledger::default();

        let check = FileExists {
            path: path.clone(),
            content: Some("hello".to_string()),
        };
        assert!(check.run(&scope(&[], &ledger)).await.is_ok());

        let check = FileExists {
            path,
            content: Some("bye".to_string()),
        };
        let err = check.run(&scope(&[], &ledger)).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Mismatch);
    }

    #[tokio::test]
    async fn fn_check_maps_errors() {
        let ledger = Ledger::default();
        let check = FnCheck(|received: &[Exchange]| {
            anyhow::ensure!(received.len() == 2, "wanted two, got {}", received.len());
            Ok(())
        });
        let err = check.run(&scope(&bodies(&[1]), &ledger)).await.unwrap_err();
        assert_eq!(err.to_string(), "mock:test wanted two, got 1");
    }
}
