//! # Mock Endpoint
//!
//! A consumer endpoint that records what it receives and verifies declared
//! expectations against it.
//!
//! ## Lifecycle
//!
//! 1. Declare expectations (`expected_message_count`, `expected_bodies_received`,
//!    `message(0).header("foo").is_equal_to("bar")`, ...).
//! 2. Run the code under test; producers deliver through [`Endpoint::process`].
//! 3. Verify with [`MockEndpoint::assert_is_satisfied`].
//! 4. [`MockEndpoint::reset`] to start over.
//!
//! Ingestion is synchronous and serialized: every arrival is fully recorded
//! and counted before the next one starts. Verification is async and waits on
//! a countdown latch sized to the outstanding expected count.

use crate::builder::{ExpressionClause, ExpressionSlot};
use crate::clause::AssertionClause;
use crate::config::MockConfig;
use crate::error::{AssertionError, FailureKind, ResolveError, unexpected};
use crate::latch::CountDownLatch;
use crate::task::{
    BodiesAnyOrder, BodiesInOrder, BodyExpression, ClauseAll, ClauseAt, FileExists, FnCheck,
    IndexedCheck, IndexedTask, KeySource, Ledger, NoDuplicates, Scope, Scoped, ScopedValues,
    ScopedValuesAnyOrder, Sorted, Task,
};
use chrono::Utc;
use parking_lot::Mutex;
use relay_core::context::Context;
use relay_core::endpoint::{Endpoint, EndpointRef, downcast};
use relay_core::exchange::{Exchange, ExchangePattern, RECEIVED_TIMESTAMP};
use relay_core::expression::{ExpressionRef, PredicateRef};
use relay_core::processor::ProcessorRef;
use relay_core::telemetry::ThroughputLogger;
use relay_core::uri::EndpointUri;
use relay_core::value::Value;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

pub const SCHEME: &str = "mock";

const DEFAULT_RESULT_WAIT: Duration = Duration::from_secs(10);

// ============== Reactions ==============

/// What the endpoint does to the live exchange on arrival.
#[derive(Clone, Default)]
enum Reaction {
    #[default]
    None,
    ReplyBody(ExpressionRef),
    ReplyHeader(String, ExpressionRef),
    Handler(ProcessorRef),
}

impl Reaction {
    fn apply(&self, context: Option<&Context>, exchange: &mut Exchange) -> anyhow::Result<()> {
        match self {
            Reaction::None => Ok(()),
            Reaction::ReplyBody(expression) => {
                if let Some(context) = context {
                    expression.init(context)?;
                }
                let body = expression.evaluate(exchange)?;
                exchange.set_body(body);
                Ok(())
            }
            Reaction::ReplyHeader(name, expression) => {
                if let Some(context) = context {
                    expression.init(context)?;
                }
                let value = expression.evaluate(exchange)?;
                exchange.set_header(name.clone(), value);
                Ok(())
            }
            Reaction::Handler(processor) => processor.process(exchange),
        }
    }
}

/// Per-arrival reactions, keyed by 1-based arrival number, with a default.
#[derive(Clone, Default)]
struct Reactions {
    by_arrival: HashMap<usize, Reaction>,
    default: Reaction,
}

impl Reactions {
    fn for_arrival(&self, nth: usize) -> &Reaction {
        self.by_arrival.get(&nth).unwrap_or(&self.default)
    }
}

// ============== Engine State ==============

struct EngineState {
    config: MockConfig,
    expected_minimum_count: i64,
    counter: usize,
    received: Arc<Vec<Exchange>>,
    failures: Arc<Vec<Arc<anyhow::Error>>>,
    tasks: Arc<Vec<Arc<Task>>>,
    ledger: Arc<Ledger>,
    latch: Option<Arc<CountDownLatch>>,
    fail_fast_error: Option<AssertionError>,
    header_task: bool,
    property_task: bool,
    reactions: Reactions,
    reporter: Option<ProcessorRef>,
}

impl EngineState {
    fn new(uri: &str, config: MockConfig) -> Self {
        let reporter = reporter_for(uri, config.report_group);
        let mut state = Self {
            config,
            expected_minimum_count: -1,
            counter: 0,
            received: Arc::default(),
            failures: Arc::default(),
            tasks: Arc::default(),
            ledger: Arc::default(),
            latch: None,
            fail_fast_error: None,
            header_task: false,
            property_task: false,
            reactions: Reactions::default(),
            reporter,
        };
        state.rebuild_latch();
        state
    }

    /// Sizes the latch to `max(exact, minimum)` minus what already arrived.
    fn rebuild_latch(&mut self) {
        let size = self.config.expected_count.max(self.expected_minimum_count).max(0) as usize;
        self.latch = (size > 0).then(|| Arc::new(CountDownLatch::new(size.saturating_sub(self.counter))));
    }

    fn set_expected_count(&mut self, count: i64) {
        self.config.expected_count = count;
        self.rebuild_latch();
    }

    fn add_task(&mut self, task: Task) {
        Arc::make_mut(&mut self.tasks).push(Arc::new(task));
    }
}

fn reporter_for(uri: &str, group: u64) -> Option<ProcessorRef> {
    (group > 0).then(|| Arc::new(ThroughputLogger::new(uri, group)) as ProcessorRef)
}

/// What verification reads, taken under the lock and used without it.
struct Snapshot {
    received: Arc<Vec<Exchange>>,
    counter: usize,
    ledger: Arc<Ledger>,
    tasks: Arc<Vec<Arc<Task>>>,
    failures: Arc<Vec<Arc<anyhow::Error>>>,
}

// ============== Mock Endpoint ==============

pub struct MockEndpoint {
    uri: String,
    context: Weak<Context>,
    /// Set when the endpoint was created without a context.
    owned_context: Option<Arc<Context>>,
    initial: MockConfig,
    state: Mutex<EngineState>,
}

impl MockEndpoint {
    /// A standalone mock endpoint with a private context.
    pub fn new(uri: &str) -> Result<Arc<Self>, ResolveError> {
        let parsed = parse(uri)?;
        let context = Arc::new(Context::new(parsed.base()));
        let config = MockConfig::from_uri(&parsed)?;
        Ok(Arc::new(Self::build(parsed.base(), &context, Some(context.clone()), config)))
    }

    /// A mock endpoint in `context`, not registered with it. Options in the
    /// URI query are applied on top of `config`.
    pub fn with_config(
        context: &Arc<Context>,
        uri: &str,
        mut config: MockConfig,
    ) -> Result<Arc<Self>, ResolveError> {
        let parsed = parse(uri)?;
        for (key, value) in &parsed.params {
            config.apply(key, value)?;
        }
        Ok(Arc::new(Self::build(parsed.base(), context, None, config)))
    }

    fn build(
        uri: String,
        context: &Arc<Context>,
        owned_context: Option<Arc<Context>>,
        config: MockConfig,
    ) -> Self {
        Self {
            state: Mutex::new(EngineState::new(&uri, config.clone())),
            uri,
            context: Arc::downgrade(context),
            owned_context,
            initial: config,
        }
    }

    /// Looks up the mock endpoint for `uri` in `context`, creating and
    /// registering it on first use.
    pub fn resolve(context: &Arc<Context>, uri: &str) -> Result<Arc<Self>, ResolveError> {
        let parsed = parse(uri)?;
        let endpoint = context.get_or_add_endpoint(uri, || {
            let endpoint: EndpointRef = Self::with_config(context, uri, MockConfig::default())?;
            Ok::<_, ResolveError>(endpoint)
        })?;
        downcast::<MockEndpoint>(endpoint).ok_or_else(|| ResolveError::NotMock(parsed.base()))
    }

    /// Every mock endpoint registered in `context`.
    pub fn mocks_in(context: &Context) -> Vec<Arc<MockEndpoint>> {
        context
            .endpoints()
            .into_iter()
            .filter_map(downcast::<MockEndpoint>)
            .collect()
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn name(&self) -> String {
        self.state
            .lock()
            .config
            .name
            .clone()
            .unwrap_or_else(|| self.uri.clone())
    }

    fn context(&self) -> Option<Arc<Context>> {
        self.owned_context
            .clone()
            .or_else(|| self.context.upgrade())
    }

    // ============== Ingestion ==============

    /// Records an arriving exchange and runs reactions on it.
    ///
    /// Runs under the engine lock: reactions and reporters must not call back
    /// into this endpoint.
    fn on_exchange(&self, exchange: &mut Exchange) {
        let context = self.context();
        let mut state = self.state.lock();
        let mut errors: Vec<anyhow::Error> = Vec::new();

        if let Some(reporter) = state.reporter.clone() {
            if let Err(e) = reporter.process(exchange) {
                errors.push(e);
            }
        }

        let mut copy = state.config.copy_on_exchange.then(|| exchange.deep_copy());
        let index = state.counter;
        {
            let observed = copy.as_ref().unwrap_or(&*exchange);
            Arc::make_mut(&mut state.ledger).capture(observed);
            if state.config.log {
                info!(
                    endpoint = %self.uri,
                    index,
                    "{} >>>> {} : {} with body: {}",
                    self.uri,
                    index,
                    observed,
                    observed.body()
                );
            } else {
                debug!(endpoint = %self.uri, index, exchange = %observed, "Received exchange");
            }
        }

        let received_at = Value::from(Utc::now());
        match copy.as_mut() {
            Some(copy) => copy.set_property(RECEIVED_TIMESTAMP, received_at),
            None => exchange.set_property(RECEIVED_TIMESTAMP, received_at),
        }
        state.counter += 1;

        let reaction = state.reactions.for_arrival(state.counter).clone();
        if let Err(e) = reaction.apply(context.as_deref(), exchange) {
            debug!(endpoint = %self.uri, index, error = %e, "Reaction failed, setting exception on exchange");
            exchange.set_exception(e);
        }

        let snapshot = copy.unwrap_or_else(|| exchange.clone());
        let snapshot_id = snapshot.id().to_string();
        let policy = state.config.retention();
        let retained = std::mem::take(Arc::make_mut(&mut state.received));
        *Arc::make_mut(&mut state.received) = policy.retain(retained, index, snapshot);

        if state.config.fail_fast && state.fail_fast_error.is_none() {
            let position = state
                .received
                .last()
                .filter(|last| last.id() == snapshot_id)
                .map(|_| state.received.len() - 1);
            if let Err(failure) = self.fail_fast(&state, context.as_deref(), index, position) {
                debug!(endpoint = %self.uri, index, error = %failure, "Fail fast");
                if let Some(latch) = &state.latch {
                    latch.drain();
                }
                state.fail_fast_error = Some(failure);
            }
        }

        if !errors.is_empty() {
            let failures = Arc::make_mut(&mut state.failures);
            failures.extend(errors.into_iter().map(Arc::new));
        }

        if let Some(latch) = &state.latch {
            latch.count_down();
        }
    }

    /// Runs the indexed tasks against the newest arrival: at `arrival` for checks
    /// addressed by arrival, at its retained `position` for the rest.
    fn fail_fast(
        &self,
        state: &EngineState,
        context: Option<&Context>,
        arrival: usize,
        position: Option<usize>,
    ) -> Result<(), AssertionError> {
        let scope = Scope {
            uri: &self.uri,
            received: &state.received,
            received_counter: state.counter,
            ledger: &state.ledger,
        };
        for task in state.tasks.iter() {
            let Task::Indexed(indexed) = task.as_ref() else {
                continue;
            };
            if let Some(context) = context {
                task.init(context)
                    .map_err(|e| unexpected(&self.uri, "Initializing expectation", e))?;
            }
            if indexed.by_arrival() {
                indexed.verify_index(&scope, arrival)?;
                continue;
            }
            let Some(position) = position else {
                continue;
            };
            // A message left pending by the window of its successor is settled now.
            if let Some(previous) = position.checked_sub(1) {
                indexed.verify_index(&scope, previous)?;
            }
            indexed.verify_index(&scope, position)?;
        }
        Ok(())
    }

    // ============== Verification ==============

    /// Waits for the expected messages and verifies every expectation.
    pub async fn assert_is_satisfied(&self) -> Result<(), AssertionError> {
        let empty_wait = self.state.lock().config.sleep_for_empty_test;
        self.assert_is_satisfied_with(empty_wait).await
    }

    /// As [`assert_is_satisfied`](Self::assert_is_satisfied), sleeping
    /// `empty_wait` before accepting that no message arrived.
    pub async fn assert_is_satisfied_with(&self, empty_wait: Duration) -> Result<(), AssertionError> {
        info!(endpoint = %self.uri, "Asserting: {} is satisfied", self.uri);
        self.verify(empty_wait).await?;

        let period = self.state.lock().config.assert_period;
        if !period.is_zero() {
            tokio::time::sleep(period).await;
            info!(
                endpoint = %self.uri,
                "Re-asserting: {} is satisfied after {} millis",
                self.uri,
                period.as_millis()
            );
            self.verify(Duration::ZERO).await?;
        }
        Ok(())
    }

    /// Succeeds only when verification fails.
    pub async fn assert_is_not_satisfied(&self) -> Result<(), AssertionError> {
        let empty_wait = self.state.lock().config.sleep_for_empty_test;
        self.assert_is_not_satisfied_with(empty_wait).await
    }

    pub async fn assert_is_not_satisfied_with(&self, empty_wait: Duration) -> Result<(), AssertionError> {
        match self.assert_is_satisfied_with(empty_wait).await {
            Ok(()) => Err(AssertionError::on(
                &self.uri,
                FailureKind::Mismatch,
                "Expected assertion failure but test succeeded!",
            )),
            Err(e) => {
                info!(endpoint = %self.uri, "Caught expected failure: {e}");
                Ok(())
            }
        }
    }

    async fn verify(&self, empty_wait: Duration) -> Result<(), AssertionError> {
        let (expected, minimum, counter) = {
            let state = self.state.lock();
            (
                state.config.expected_count,
                state.expected_minimum_count,
                state.counter,
            )
        };

        if expected == 0 {
            if !empty_wait.is_zero() {
                debug!(
                    endpoint = %self.uri,
                    "Sleeping for: {} millis to check there really are no messages received",
                    empty_wait.as_millis()
                );
                tokio::time::sleep(empty_wait).await;
            }
            self.check_count(0)?;
        } else if expected > 0 {
            if expected as usize != counter {
                self.wait_for_complete_latch().await?;
            }
            let failed_fast = self.state.lock().fail_fast_error.is_some();
            if !failed_fast {
                self.check_count(expected as usize)?;
            }
        } else if minimum > 0 && (counter as i64) < minimum {
            self.wait_for_complete_latch().await?;
        }

        let fail_fast_error = self.state.lock().fail_fast_error.clone();
        if let Some(failure) = fail_fast_error {
            return Err(failure);
        }

        if minimum >= 0 {
            let received = self.received_counter();
            if (received as i64) < minimum {
                return Err(AssertionError::on(
                    &self.uri,
                    FailureKind::Mismatch,
                    format!("Received message count {received}, expected at least {minimum}"),
                ));
            }
        }

        let snapshot = self.snapshot();
        let scope = Scope {
            uri: &self.uri,
            received: &snapshot.received,
            received_counter: snapshot.counter,
            ledger: &snapshot.ledger,
        };
        let context = self.context();
        for task in snapshot.tasks.iter() {
            if let Some(context) = &context {
                task.init(context)
                    .map_err(|e| unexpected(&self.uri, "Initializing expectation", e))?;
            }
            task.verify(&scope).await?;
        }

        if let Some(failure) = snapshot.failures.first() {
            error!(endpoint = %self.uri, "Caught exception on {} due to: {}", self.uri, failure);
            return Err(AssertionError::caught(&self.uri, failure.clone()));
        }
        Ok(())
    }

    fn snapshot(&self) -> Snapshot {
        let state = self.state.lock();
        Snapshot {
            received: state.received.clone(),
            counter: state.counter,
            ledger: state.ledger.clone(),
            tasks: state.tasks.clone(),
            failures: state.failures.clone(),
        }
    }

    fn check_count(&self, expected: usize) -> Result<(), AssertionError> {
        let actual = self.received_counter();
        if actual == expected {
            return Ok(());
        }
        Err(AssertionError::on(
            &self.uri,
            FailureKind::Mismatch,
            format!("Received message count. Expected: <{expected}> but was: <{actual}>"),
        ))
    }

    async fn wait_for_complete_latch(&self) -> Result<(), AssertionError> {
        let (latch, wait, minimum_wait) = {
            let state = self.state.lock();
            (
                state.latch.clone(),
                state.config.result_wait_time,
                state.config.result_minimum_wait_time,
            )
        };
        let Some(latch) = latch else {
            return Err(AssertionError::on(&self.uri, FailureKind::Unexpected, "Should have a latch!"));
        };

        let started = Instant::now();
        let wait = if wait.is_zero() { DEFAULT_RESULT_WAIT } else { wait };
        let released = latch.wait(wait).await;
        let took = started.elapsed();
        debug!(
            endpoint = %self.uri,
            released,
            "Took {} millis to complete latch",
            took.as_millis()
        );

        if !minimum_wait.is_zero() && took < minimum_wait {
            return Err(AssertionError::on(
                &self.uri,
                FailureKind::Timing,
                format!(
                    "Expected minimum {} millis waiting on the result, but was faster with {} millis.",
                    minimum_wait.as_millis(),
                    took.as_millis()
                ),
            ));
        }
        Ok(())
    }

    /// Waits for the latch up to the configured result wait time.
    pub async fn wait_for_latch(&self) -> bool {
        let wait = self.state.lock().config.result_wait_time;
        let wait = if wait.is_zero() { DEFAULT_RESULT_WAIT } else { wait };
        self.wait_for_latch_within(wait).await
    }

    /// `true` when the expected messages arrived within `timeout`, or when no
    /// count is expected.
    pub async fn wait_for_latch_within(&self, timeout: Duration) -> bool {
        let latch = self.state.lock().latch.clone();
        match latch {
            Some(latch) => latch.wait(timeout).await,
            None => true,
        }
    }

    /// Whether the expected messages already arrived, without waiting.
    pub fn notify_matches(&self) -> bool {
        self.state
            .lock()
            .latch
            .as_ref()
            .is_none_or(|latch| latch.is_released())
    }

    /// Clears every expectation and everything received, and restores the
    /// configuration the endpoint was created with.
    pub fn reset(&self) {
        debug!(endpoint = %self.uri, "Resetting mock endpoint");
        *self.state.lock() = EngineState::new(&self.uri, self.initial.clone());
    }

    // ============== Count Expectations ==============

    pub fn expected_message_count(&self, count: usize) {
        self.set_expected_count(count as i64);
    }

    /// `-1` removes the exact count expectation.
    pub fn set_expected_count(&self, count: i64) {
        self.state.lock().set_expected_count(count);
    }

    pub fn expected_count(&self) -> i64 {
        self.state.lock().config.expected_count
    }

    pub fn expected_minimum_message_count(&self, count: usize) {
        let mut state = self.state.lock();
        state.expected_minimum_count = count as i64;
        state.rebuild_latch();
    }

    pub fn expected_minimum_count(&self) -> i64 {
        self.state.lock().expected_minimum_count
    }

    // ============== Header / Property Expectations ==============

    /// Every message carries header `name` with `value`. A `Null` value
    /// accepts messages without the header.
    pub fn expected_header_received(&self, name: &str, value: impl Into<Value>) {
        let mut state = self.state.lock();
        if !state.header_task {
            state.header_task = true;
            Arc::make_mut(&mut state.ledger).expected_headers = Some(BTreeMap::new());
            state.add_task(Task::indexed(ScopedValues(Scoped::Header)));
            if state.config.expected_count < 0 && state.expected_minimum_count < 0 {
                state.expected_minimum_count = 1;
                state.rebuild_latch();
            }
        }
        if let Some(headers) = Arc::make_mut(&mut state.ledger).expected_headers.as_mut() {
            headers.insert(name.to_string(), value.into());
        }
    }

    /// Every message carries property `name` with `value`. A `Null` value
    /// accepts messages without the property.
    pub fn expected_property_received(&self, name: &str, value: impl Into<Value>) {
        let mut state = self.state.lock();
        if !state.property_task {
            state.property_task = true;
            Arc::make_mut(&mut state.ledger).expected_properties = Some(BTreeMap::new());
            state.add_task(Task::indexed(ScopedValues(Scoped::Property)));
        }
        if let Some(properties) = Arc::make_mut(&mut state.ledger).expected_properties.as_mut() {
            properties.insert(name.to_string(), value.into());
        }
    }

    /// Exactly `values.len()` messages arrive, whose `name` headers are `values`
    /// in any order.
    pub fn expected_header_values_received_in_any_order<I>(&self, name: &str, values: I)
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        self.scoped_any_order(Scoped::Header, name, values);
    }

    pub fn expected_property_values_received_in_any_order<I>(&self, name: &str, values: I)
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        self.scoped_any_order(Scoped::Property, name, values);
    }

    fn scoped_any_order<I>(&self, scoped: Scoped, name: &str, values: I)
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        let mut state = self.state.lock();
        state.set_expected_count(values.len() as i64);
        state.add_task(Task::plain(ScopedValuesAnyOrder {
            scoped,
            name: name.to_string(),
            values,
        }));
    }

    // ============== Body Expectations ==============

    /// Exactly these bodies arrive, in this order. Arriving bodies are converted
    /// to the kind of the expected body at the same position.
    pub fn expected_bodies_received<I>(&self, bodies: I)
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let bodies: Vec<Value> = bodies.into_iter().map(Into::into).collect();
        let mut state = self.state.lock();
        state.set_expected_count(bodies.len() as i64);
        Arc::make_mut(&mut state.ledger).expected_bodies = Some(bodies);
        state.add_task(Task::indexed(BodiesInOrder));
    }

    /// Exactly these bodies arrive, in any order.
    pub fn expected_bodies_received_in_any_order<I>(&self, bodies: I)
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let bodies: Vec<Value> = bodies.into_iter().map(Into::into).collect();
        let mut state = self.state.lock();
        state.set_expected_count(bodies.len() as i64);
        Arc::make_mut(&mut state.ledger).expected_bodies = Some(bodies);
        state.add_task(Task::plain(BodiesAnyOrder));
    }

    /// One message arrives whose body equals the expression chosen next,
    /// evaluated against that message.
    pub fn expected_body_received(&self) -> ExpressionClause<()> {
        let slot = ExpressionSlot::new();
        let mut state = self.state.lock();
        state.set_expected_count(1);
        state.add_task(Task::indexed(BodyExpression(slot.clone())));
        ExpressionClause::new(slot, ())
    }

    /// Exactly one message per predicate arrives; predicate `i` holds for message `i`.
    pub fn expected_messages_matches<I>(&self, predicates: I)
    where
        I: IntoIterator<Item = PredicateRef>,
    {
        let mut state = self.state.lock();
        let mut count = 0;
        for (index, predicate) in predicates.into_iter().enumerate() {
            let clause = AssertionClause::new(self.uri.clone()).predicate(predicate);
            state.add_task(Task::indexed(ClauseAt {
                index,
                clause,
                required: false,
            }));
            count += 1;
        }
        state.set_expected_count(count);
    }

    /// The file at `path` appears within five seconds, with `content` if given.
    pub fn expected_file_exists(&self, path: impl Into<PathBuf>, content: Option<&str>) {
        self.state.lock().add_task(Task::plain(FileExists {
            path: path.into(),
            content: content.map(str::to_string),
        }));
    }

    /// Every message has the given exchange pattern.
    pub fn expected_exchange_pattern(&self, pattern: ExchangePattern) {
        self.all_messages()
            .exchange_pattern()
            .is_equal_to(pattern.to_string());
    }

    // ============== Ordering / Duplicates ==============

    pub fn expects_ascending(&self, expression: ExpressionRef) {
        self.add_sorted(KeySource::Fixed(expression), true);
    }

    pub fn expects_descending(&self, expression: ExpressionRef) {
        self.add_sorted(KeySource::Fixed(expression), false);
    }

    /// Messages are strictly ascending by the expression chosen on the clause.
    pub fn expects_ascending_clause(&self) -> AssertionClause {
        let clause = AssertionClause::new(self.uri.clone());
        self.add_sorted(KeySource::Clause(clause.clone()), true);
        clause
    }

    pub fn expects_descending_clause(&self) -> AssertionClause {
        let clause = AssertionClause::new(self.uri.clone());
        self.add_sorted(KeySource::Clause(clause.clone()), false);
        clause
    }

    fn add_sorted(&self, key: KeySource, ascending: bool) {
        self.state
            .lock()
            .add_task(Task::indexed(Sorted { key, ascending }));
    }

    pub fn expects_no_duplicates(&self, expression: ExpressionRef) {
        self.state
            .lock()
            .add_task(Task::indexed(NoDuplicates::new(KeySource::Fixed(expression))));
    }

    pub fn expects_no_duplicates_clause(&self) -> AssertionClause {
        let clause = AssertionClause::new(self.uri.clone());
        self.state
            .lock()
            .add_task(Task::indexed(NoDuplicates::new(KeySource::Clause(clause.clone()))));
        clause
    }

    // ============== Clauses ==============

    /// Assertions on the message at `index`; fails verification when fewer
    /// messages arrive.
    pub fn message(&self, index: usize) -> AssertionClause {
        let clause = AssertionClause::new(self.uri.clone());
        self.state.lock().add_task(Task::indexed(ClauseAt {
            index,
            clause: clause.clone(),
            required: true,
        }));
        clause
    }

    /// Assertions on every message.
    pub fn all_messages(&self) -> AssertionClause {
        let clause = AssertionClause::new(self.uri.clone());
        self.state
            .lock()
            .add_task(Task::indexed(ClauseAll(clause.clone())));
        clause
    }

    /// A custom check over the retained messages, run at verification.
    pub fn expects<F>(&self, check: F)
    where
        F: Fn(&[Exchange]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.state.lock().add_task(Task::plain(FnCheck(check)));
    }

    // ============== Reactions ==============

    /// Runs `processor` on the `nth` arriving exchange (1-based).
    pub fn when_exchange_received(&self, nth: usize, processor: ProcessorRef) {
        self.state
            .lock()
            .reactions
            .by_arrival
            .insert(nth, Reaction::Handler(processor));
    }

    /// Runs `processor` on every arriving exchange without a per-arrival reaction.
    pub fn when_any_exchange_received(&self, processor: ProcessorRef) {
        self.state.lock().reactions.default = Reaction::Handler(processor);
    }

    /// Replaces the body of every arriving exchange with `expression`.
    pub fn return_reply_body(&self, expression: ExpressionRef) {
        self.state.lock().reactions.default = Reaction::ReplyBody(expression);
    }

    /// Sets header `name` on every arriving exchange to `expression`.
    pub fn return_reply_header(&self, name: &str, expression: ExpressionRef) {
        self.state.lock().reactions.default = Reaction::ReplyHeader(name.to_string(), expression);
    }

    // ============== Immediate Checks ==============

    /// The retained exchange at `index`; fails when fewer messages arrived.
    pub fn assert_exchange_received(&self, index: usize) -> Result<Exchange, AssertionError> {
        let state = self.state.lock();
        if state.counter <= index {
            return Err(AssertionError::on(
                &self.uri,
                FailureKind::Missing,
                format!("Not enough messages received. Was: {}", state.counter),
            ));
        }
        state.received.get(index).cloned().ok_or_else(|| {
            AssertionError::on(
                &self.uri,
                FailureKind::Missing,
                format!("No exchange received for counter: {index}"),
            )
        })
    }

    pub fn assert_messages_ascending(&self, expression: ExpressionRef) -> Result<(), AssertionError> {
        self.check_now(Sorted {
            key: KeySource::Fixed(expression),
            ascending: true,
        })
    }

    pub fn assert_messages_descending(&self, expression: ExpressionRef) -> Result<(), AssertionError> {
        self.check_now(Sorted {
            key: KeySource::Fixed(expression),
            ascending: false,
        })
    }

    pub fn assert_no_duplicates(&self, expression: ExpressionRef) -> Result<(), AssertionError> {
        self.check_now(NoDuplicates::new(KeySource::Fixed(expression)))
    }

    fn check_now(&self, check: impl IndexedCheck + 'static) -> Result<(), AssertionError> {
        let task = IndexedTask::new(check);
        if let Some(context) = self.context() {
            task.init(&context)
                .map_err(|e| unexpected(&self.uri, "Initializing expectation", e))?;
        }
        let snapshot = self.snapshot();
        task.verify_all(&Scope {
            uri: &self.uri,
            received: &snapshot.received,
            received_counter: snapshot.counter,
            ledger: &snapshot.ledger,
        })
    }

    // ============== Configuration ==============

    pub fn config(&self) -> MockConfig {
        self.state.lock().config.clone()
    }

    pub fn result_wait_time(&self) -> Duration {
        self.state.lock().config.result_wait_time
    }

    pub fn set_result_wait_time(&self, wait: Duration) {
        self.state.lock().config.result_wait_time = wait;
    }

    pub fn result_minimum_wait_time(&self) -> Duration {
        self.state.lock().config.result_minimum_wait_time
    }

    pub fn set_result_minimum_wait_time(&self, wait: Duration) {
        self.state.lock().config.result_minimum_wait_time = wait;
    }

    pub fn sleep_for_empty_test(&self) -> Duration {
        self.state.lock().config.sleep_for_empty_test
    }

    pub fn set_sleep_for_empty_test(&self, sleep: Duration) {
        self.state.lock().config.sleep_for_empty_test = sleep;
    }

    pub fn assert_period(&self) -> Duration {
        self.state.lock().config.assert_period
    }

    pub fn set_assert_period(&self, period: Duration) {
        self.state.lock().config.assert_period = period;
    }

    pub fn retain_first(&self) -> i64 {
        self.state.lock().config.retain_first
    }

    pub fn set_retain_first(&self, retain: i64) {
        self.state.lock().config.retain_first = retain;
    }

    pub fn retain_last(&self) -> i64 {
        self.state.lock().config.retain_last
    }

    pub fn set_retain_last(&self, retain: i64) {
        self.state.lock().config.retain_last = retain;
    }

    pub fn report_group(&self) -> u64 {
        self.state.lock().config.report_group
    }

    /// Logs throughput every `group` messages; zero disables.
    pub fn set_report_group(&self, group: u64) {
        let mut state = self.state.lock();
        state.config.report_group = group;
        state.reporter = reporter_for(&self.uri, group);
    }

    /// Runs `reporter` first on every arriving exchange.
    pub fn set_reporter(&self, reporter: ProcessorRef) {
        self.state.lock().reporter = Some(reporter);
    }

    pub fn is_fail_fast(&self) -> bool {
        self.state.lock().config.fail_fast
    }

    pub fn set_fail_fast(&self, fail_fast: bool) {
        self.state.lock().config.fail_fast = fail_fast;
    }

    pub fn is_copy_on_exchange(&self) -> bool {
        self.state.lock().config.copy_on_exchange
    }

    pub fn set_copy_on_exchange(&self, copy: bool) {
        self.state.lock().config.copy_on_exchange = copy;
    }

    pub fn is_log(&self) -> bool {
        self.state.lock().config.log
    }

    pub fn set_log(&self, log: bool) {
        self.state.lock().config.log = log;
    }

    // ============== Received State ==============

    /// Number of arrivals, including those evicted by retention.
    pub fn received_counter(&self) -> usize {
        self.state.lock().counter
    }

    /// The retained exchanges, in arrival order.
    pub fn received_exchanges(&self) -> Arc<Vec<Exchange>> {
        self.state.lock().received.clone()
    }

    /// Errors raised while receiving, replayed at verification.
    pub fn failures(&self) -> Arc<Vec<Arc<anyhow::Error>>> {
        self.state.lock().failures.clone()
    }

    pub fn ledger(&self) -> Arc<Ledger> {
        self.state.lock().ledger.clone()
    }

    pub fn expected_bodies(&self) -> Option<Vec<Value>> {
        self.state.lock().ledger.expected_bodies.clone()
    }

    pub fn actual_bodies(&self) -> Vec<Value> {
        self.state.lock().ledger.actual_bodies.clone()
    }

    pub fn actual_headers(&self) -> BTreeMap<String, Value> {
        self.state.lock().ledger.actual_headers.clone()
    }

    pub fn actual_properties(&self) -> BTreeMap<String, Value> {
        self.state.lock().ledger.actual_properties.clone()
    }

    // ============== Static Helpers ==============

    /// Waits for every endpoint's latch, sharing one `timeout` between them.
    pub async fn assert_wait(timeout: Duration, endpoints: &[Arc<MockEndpoint>]) -> Result<(), AssertionError> {
        let deadline = Instant::now() + timeout;
        for endpoint in endpoints {
            let left = deadline.saturating_duration_since(Instant::now());
            if !endpoint.wait_for_latch_within(left).await {
                return Err(AssertionError::new(
                    FailureKind::Timing,
                    format!(
                        "Timeout waiting for endpoints to receive enough messages. {} timed out.",
                        endpoint.uri
                    ),
                ));
            }
        }
        Ok(())
    }

    pub async fn assert_all_satisfied(endpoints: &[Arc<MockEndpoint>]) -> Result<(), AssertionError> {
        for endpoint in endpoints {
            endpoint.assert_is_satisfied().await?;
        }
        Ok(())
    }

    /// Waits up to `timeout` for all endpoints, then verifies each.
    pub async fn assert_all_satisfied_within(
        timeout: Duration,
        endpoints: &[Arc<MockEndpoint>],
    ) -> Result<(), AssertionError> {
        Self::assert_wait(timeout, endpoints).await?;
        Self::assert_all_satisfied(endpoints).await
    }

    /// Verifies every mock endpoint registered in `context`.
    pub async fn assert_context_satisfied(context: &Context) -> Result<(), AssertionError> {
        Self::assert_all_satisfied(&Self::mocks_in(context)).await
    }

    pub async fn assert_context_satisfied_within(
        context: &Context,
        timeout: Duration,
    ) -> Result<(), AssertionError> {
        let mocks = Self::mocks_in(context);
        for endpoint in &mocks {
            endpoint.set_result_wait_time(timeout);
        }
        Self::assert_all_satisfied(&mocks).await
    }

    pub fn set_context_assert_period(context: &Context, period: Duration) {
        for endpoint in Self::mocks_in(context) {
            endpoint.set_assert_period(period);
        }
    }

    pub fn reset_mocks(context: &Context) {
        for endpoint in Self::mocks_in(context) {
            endpoint.reset();
        }
    }

    pub fn expects_message_count(count: usize, endpoints: &[Arc<MockEndpoint>]) {
        for endpoint in endpoints {
            endpoint.expected_message_count(count);
        }
    }
}

fn parse(uri: &str) -> Result<EndpointUri, ResolveError> {
    let parsed = EndpointUri::parse(uri)?;
    if parsed.scheme != SCHEME {
        return Err(ResolveError::UnsupportedScheme {
            scheme: parsed.scheme,
            uri: uri.to_string(),
        });
    }
    Ok(parsed)
}

impl Endpoint for MockEndpoint {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn process(&self, exchange: &mut Exchange) -> anyhow::Result<()> {
        self.on_exchange(exchange);
        Ok(())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl fmt::Debug for MockEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockEndpoint")
            .field("uri", &self.uri)
            .field("expected_count", &state.config.expected_count)
            .field("received", &state.counter)
            .field("tasks", &state.tasks.len())
            .finish()
    }
}

impl fmt::Display for MockEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MockEndpoint[{}]", self.uri)
    }
}
