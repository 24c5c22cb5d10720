//! # Assertion Clause
//!
//! A bundle of predicates applied to one received exchange (or to every one).
//!
//! Value builders obtained from a clause register every predicate they build
//! into it, so `endpoint.message(0).header("foo").is_equal_to("bar")` needs no
//! further call. The first expression picked through the clause is also kept
//! as the clause's value expression, which ordering and duplicate checks read.

use crate::builder::{BuilderHooks, ExpressionClause, ExpressionSlot, ValueBuilder};
use crate::error::{AssertionError, FailureKind};
use crate::task::Verdict;
use parking_lot::Mutex;
use relay_core::context::Context;
use relay_core::error::ExpressionError;
use relay_core::exchange::Exchange;
use relay_core::expression::{self, ExpressionRef, PredicateRef};
use relay_core::predicate;
use relay_core::value::ValueKind;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
enum Check {
    Predicate(PredicateRef),
    Arrival(Arc<ArrivalCheck>),
}

struct ClauseState {
    uri: String,
    checks: Mutex<Vec<Check>>,
    slot: ExpressionSlot,
}

impl ClauseState {
    fn add(&self, check: Check) {
        let mut checks = self.checks.lock();
        let present = checks.iter().any(|existing| match (existing, &check) {
            (Check::Predicate(a), Check::Predicate(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            (Check::Arrival(a), Check::Arrival(b)) => Arc::ptr_eq(a, b),
            _ => false,
        });
        if !present {
            checks.push(check);
        }
    }
}

impl BuilderHooks for ClauseState {
    fn on_new_predicate(&self, predicate: PredicateRef) -> PredicateRef {
        self.add(Check::Predicate(predicate.clone()));
        predicate
    }
}

/// Predicates applied to the exchange at an index of a mock endpoint.
#[derive(Clone)]
pub struct AssertionClause {
    inner: Arc<ClauseState>,
}

impl AssertionClause {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ClauseState {
                uri: uri.into(),
                checks: Mutex::new(Vec::new()),
                slot: ExpressionSlot::new(),
            }),
        }
    }

    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    /// Adds a predicate; adding the same predicate twice keeps one.
    pub fn predicate(&self, predicate: PredicateRef) -> Self {
        self.inner.add(Check::Predicate(predicate));
        self.clone()
    }

    /// Adds a predicate that holds when the chosen expression is truthy.
    pub fn predicate_value(&self) -> ExpressionClause<AssertionClause> {
        let slot = ExpressionSlot::new();
        self.inner
            .add(Check::Predicate(predicate::truthy(slot.deferred())));
        ExpressionClause::new(slot, self.clone())
    }

    /// Builds assertions over `expression`; the first expression chosen becomes
    /// the clause's value expression.
    pub fn expression(&self, expression: ExpressionRef) -> ValueBuilder {
        self.inner.slot.set(expression.clone());
        ValueBuilder::with_hooks(expression, self.inner.clone())
    }

    pub fn body(&self) -> ValueBuilder {
        self.expression(expression::body())
    }

    pub fn body_as(&self, kind: ValueKind) -> ValueBuilder {
        self.expression(expression::body_as(kind))
    }

    pub fn header(&self, name: &str) -> ValueBuilder {
        self.expression(expression::header(name))
    }

    pub fn headers(&self) -> ValueBuilder {
        self.expression(expression::headers())
    }

    pub fn property(&self, name: &str) -> ValueBuilder {
        self.expression(expression::property(name))
    }

    pub fn properties(&self) -> ValueBuilder {
        self.expression(expression::properties())
    }

    pub fn exchange_pattern(&self) -> ValueBuilder {
        self.expression(expression::exchange_pattern())
    }

    pub fn language(&self, language: &str, source: &str) -> ValueBuilder {
        self.expression(expression::language(language, source))
    }

    /// Constrains the arrival time of the message relative to its neighbours.
    pub fn arrives(&self) -> ArrivalClause {
        ArrivalClause {
            clause: self.clone(),
        }
    }

    /// The clause's value expression, if one was chosen.
    pub fn value_expression(&self) -> Option<ExpressionRef> {
        self.inner.slot.get().cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.checks.lock().is_empty()
    }

    pub fn init(&self, context: &Context) -> Result<(), ExpressionError> {
        if let Some(expression) = self.inner.slot.get() {
            expression.init(context)?;
        }
        for check in self.checks() {
            if let Check::Predicate(predicate) = check {
                predicate.init(context)?;
            }
        }
        Ok(())
    }

    fn checks(&self) -> Vec<Check> {
        self.inner.checks.lock().clone()
    }

    /// Evaluates every check against `received[index]`, in registration order.
    ///
    /// `Pending` when every check held so far but an arrival window waits on a
    /// message that has not been received yet.
    pub fn apply_on(&self, received: &[Exchange], index: usize) -> Result<Verdict, AssertionError> {
        let uri = self.uri();
        let exchange = received.get(index).ok_or_else(|| {
            AssertionError::on(
                uri,
                FailureKind::Missing,
                format!("No exchange received for counter: {index}"),
            )
        })?;
        let prefix = format!("Assertion error at index {index} on mock {uri} with predicate:");

        let mut verdict = Verdict::Passed;
        for check in self.checks() {
            match check {
                Check::Predicate(predicate) => {
                    exchange.body().reset_stream();
                    match predicate.matches(exchange) {
                        Ok(true) => {}
                        Ok(false) => {
                            return Err(AssertionError::new(
                                FailureKind::Mismatch,
                                format!("{prefix} {}", predicate.explain(exchange)),
                            ));
                        }
                        Err(error) => {
                            let kind = match error {
                                ExpressionError::Conversion(_) => FailureKind::Conversion,
                                _ => FailureKind::Unexpected,
                            };
                            return Err(AssertionError::new(kind, format!("{prefix} {predicate}"))
                                .with_cause(error));
                        }
                    }
                }
                Check::Arrival(arrival) => match arrival.window(received, index) {
                    Window::Held => {}
                    Window::Open => verdict = Verdict::Pending,
                    Window::Violated(delta) => {
                        return Err(AssertionError::new(
                            FailureKind::Timing,
                            format!("{prefix} {arrival} (was {delta} millis)"),
                        ));
                    }
                },
            }
        }
        Ok(verdict)
    }
}

impl fmt::Debug for AssertionClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssertionClause")
            .field("uri", &self.inner.uri)
            .field("checks", &self.inner.checks.lock().len())
            .finish()
    }
}

// ============== Arrival Windows ==============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Neighbour {
    Previous,
    Next,
}

/// `arrives no later than 1000 millis after previous`.
#[derive(Debug)]
pub struct ArrivalCheck {
    min: Option<Duration>,
    max: Duration,
    neighbour: Neighbour,
}

/// Outcome of an arrival window for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Window {
    Held,
    /// The next message has not arrived yet.
    Open,
    /// The offending delta in millis.
    Violated(i64),
}

impl ArrivalCheck {
    /// The first message has no previous one and messages without a receipt
    /// timestamp are unconstrained.
    fn window(&self, received: &[Exchange], index: usize) -> Window {
        let Some(current) = received.get(index) else {
            return Window::Held;
        };
        let (earlier, later) = match self.neighbour {
            Neighbour::Previous => match index.checked_sub(1).and_then(|i| received.get(i)) {
                Some(previous) => (previous, current),
                None => return Window::Held,
            },
            Neighbour::Next => match received.get(index + 1) {
                Some(next) => (current, next),
                None => return Window::Open,
            },
        };
        let (Some(earlier), Some(later)) = (earlier.received_timestamp(), later.received_timestamp()) else {
            return Window::Held;
        };
        let delta = (later - earlier).num_milliseconds();
        let min = self.min.map_or(0, |d| d.as_millis() as i64);
        let max = self.max.as_millis() as i64;
        if delta < min || delta > max {
            Window::Violated(delta)
        } else {
            Window::Held
        }
    }
}

impl fmt::Display for ArrivalCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.min {
            Some(min) => write!(
                f,
                "arrives between {} and {} millis",
                min.as_millis(),
                self.max.as_millis()
            )?,
            None => write!(f, "arrives no later than {} millis", self.max.as_millis())?,
        }
        match self.neighbour {
            Neighbour::Previous => f.write_str(" after previous"),
            Neighbour::Next => f.write_str(" before next"),
        }
    }
}

#[must_use]
pub struct ArrivalClause {
    clause: AssertionClause,
}

impl ArrivalClause {
    pub fn no_later_than(self, max: Duration) -> ArrivalBound {
        ArrivalBound {
            clause: self.clause,
            min: None,
            max,
        }
    }

    pub fn between(self, min: Duration, max: Duration) -> ArrivalBound {
        ArrivalBound {
            clause: self.clause,
            min: Some(min),
            max,
        }
    }
}

#[must_use]
pub struct ArrivalBound {
    clause: AssertionClause,
    min: Option<Duration>,
    max: Duration,
}

impl ArrivalBound {
    pub fn after_previous(self) -> AssertionClause {
        self.register(Neighbour::Previous)
    }

    pub fn before_next(self) -> AssertionClause {
        self.register(Neighbour::Next)
    }

    fn register(self, neighbour: Neighbour) -> AssertionClause {
        self.clause.inner.add(Check::Arrival(Arc::new(ArrivalCheck {
            min: self.min,
            max: self.max,
            neighbour,
        })));
        self.clause
    }
}
