use relay_core::context::Context;
use relay_core::exchange::{Exchange, ExchangePattern};
use relay_core::expression::{self, constant};
use relay_core::processor::processor;
use relay_core::value::{Value, ValueKind};
use relay_core::Endpoint;
use relay_mock::prelude::*;
use relay_runtime::{ProducerTemplate, Route, RouteError};
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    context: Arc<Context>,
    mock: Arc<MockEndpoint>,
    template: ProducerTemplate,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fixture(uri: &str) -> Fixture {
    init_tracing();
    let context = Arc::new(Context::new("scenarios"));
    let mock = MockEndpoint::resolve(&context, uri).unwrap();
    // keep failing scenarios fast
    mock.set_result_wait_time(Duration::from_millis(200));
    Fixture {
        template: ProducerTemplate::new(context.clone()),
        context,
        mock,
    }
}

fn send_all<T: Into<Value> + Clone>(fx: &Fixture, bodies: &[T]) {
    for body in bodies {
        fx.template.send_body("mock:result", body.clone()).unwrap();
    }
}

// ============== Counts ==============

#[tokio::test]
async fn exact_count_is_satisfied() {
    let fx = fixture("mock:result");
    fx.mock.expected_message_count(3);
    send_all(&fx, &[1, 2, 3]);
    fx.mock.assert_is_satisfied().await.unwrap();
    assert_eq!(fx.mock.received_counter(), 3);
}

#[tokio::test]
async fn too_few_messages() {
    let fx = fixture("mock:result");
    fx.mock.expected_message_count(3);
    send_all(&fx, &[1, 2]);
    let err = fx.mock.assert_is_satisfied().await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Mismatch);
    assert_eq!(
        err.to_string(),
        "mock:result Received message count. Expected: <3> but was: <2>"
    );
    fx.mock.assert_is_not_satisfied().await.unwrap();
}

#[tokio::test]
async fn too_many_messages() {
    let fx = fixture("mock:result");
    fx.mock.expected_message_count(2);
    send_all(&fx, &[1, 2, 3]);
    let err = fx.mock.assert_is_satisfied().await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "mock:result Received message count. Expected: <2> but was: <3>"
    );
}

#[tokio::test]
async fn minimum_count() {
    let fx = fixture("mock:result");
    fx.mock.expected_minimum_message_count(2);
    send_all(&fx, &["a", "b", "c"]);
    fx.mock.assert_is_satisfied().await.unwrap();

    fx.mock.reset();
    fx.mock.set_result_wait_time(Duration::from_millis(50));
    fx.mock.expected_minimum_message_count(2);
    send_all(&fx, &["a"]);
    let err = fx.mock.assert_is_satisfied().await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "mock:result Received message count 1, expected at least 2"
    );
}

#[tokio::test]
async fn late_message_caught_by_assert_period() {
    let fx = fixture("mock:result");
    fx.mock.expected_message_count(0);
    fx.mock.set_assert_period(Duration::from_millis(300));

    let mock = fx.mock.clone();
    let late = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        mock.process(&mut Exchange::new("late")).unwrap();
    });

    let err = fx.mock.assert_is_satisfied().await.unwrap_err();
    late.await.unwrap();
    assert_eq!(
        err.to_string(),
        "mock:result Received message count. Expected: <0> but was: <1>"
    );
}

#[tokio::test]
async fn empty_test_sleep_catches_late_message() {
    let fx = fixture("mock:result");
    fx.mock.expected_message_count(0);
    fx.mock.set_sleep_for_empty_test(Duration::from_millis(300));

    let mock = fx.mock.clone();
    let late = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        mock.process(&mut Exchange::new("late")).unwrap();
    });

    let err = fx.mock.assert_is_satisfied().await.unwrap_err();
    late.await.unwrap();
    assert_eq!(
        err.to_string(),
        "mock:result Received message count. Expected: <0> but was: <1>"
    );
}

#[tokio::test]
async fn waits_for_slow_producer() {
    let fx = fixture("mock:result");
    fx.mock.set_result_wait_time(Duration::from_secs(5));
    fx.mock.expected_message_count(2);

    let template = fx.template.clone();
    tokio::spawn(async move {
        for body in ["a", "b"] {
            tokio::time::sleep(Duration::from_millis(20)).await;
            template.send_body("mock:result", body).unwrap();
        }
    });
    fx.mock.assert_is_satisfied().await.unwrap();
}

#[tokio::test]
async fn result_minimum_wait_time() {
    let fx = fixture("mock:result");
    fx.mock.expected_message_count(1);
    fx.mock
        .set_result_minimum_wait_time(Duration::from_millis(500));
    let template = fx.template.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        template.send_body("mock:result", "fast").unwrap();
    });
    fx.mock.set_result_wait_time(Duration::from_secs(2));
    let err = fx.mock.assert_is_satisfied().await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Timing);
    assert!(err.to_string().contains("Expected minimum 500 millis waiting on the result"));
}

// ============== Bodies ==============

#[tokio::test]
async fn ordered_bodies_report_first_mismatch() {
    for fail_fast in [true, false] {
        let fx = fixture("mock:result");
        fx.mock.set_fail_fast(fail_fast);
        fx.mock.expected_bodies_received(["a", "b", "c"]);
        send_all(&fx, &["a", "x", "c"]);
        let err = fx.mock.assert_is_satisfied().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "mock:result Body of message: 1. Expected: <b> but was: <x>",
            "fail_fast = {fail_fast}"
        );
    }
}

#[tokio::test]
async fn ordered_bodies_convert_to_expected_kind() {
    let fx = fixture("mock:result");
    fx.mock.expected_bodies_received([1, 2]);
    send_all(&fx, &["1", "2"]);
    fx.mock.assert_is_satisfied().await.unwrap();
    assert_eq!(fx.mock.actual_bodies(), vec![Value::Int(1), Value::Int(2)]);
}

#[tokio::test]
async fn any_order_bodies() {
    let fx = fixture("mock:result");
    fx.mock.expected_bodies_received_in_any_order(["a", "b", "c"]);
    send_all(&fx, &["c", "a", "b"]);
    fx.mock.assert_is_satisfied().await.unwrap();

    let fx = fixture("mock:result");
    fx.mock.expected_bodies_received_in_any_order(["a", "b", "c"]);
    send_all(&fx, &["c", "a", "a"]);
    let err = fx.mock.assert_is_satisfied().await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "mock:result Message with body b was expected but not found in [c, a]"
    );
}

#[tokio::test]
async fn expected_body_from_expression() {
    let fx = fixture("mock:result");
    fx.mock.expected_body_received().constant("hello");
    send_all(&fx, &["hello"]);
    fx.mock.assert_is_satisfied().await.unwrap();

    let fx = fixture("mock:result");
    fx.mock.expected_body_received().header("expected");
    fx.template
        .send_body_and_header("mock:result", "hi", "expected", "bye")
        .unwrap();
    let err = fx.mock.assert_is_satisfied().await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "mock:result Body of message: 0. Expected: <bye> but was: <hi>"
    );
}

// ============== Headers / Properties ==============

#[tokio::test]
async fn header_null_means_absent_or_null() {
    let fx = fixture("mock:result");
    fx.mock.expected_header_received("foo", Value::Null);
    fx.mock.expected_message_count(2);
    fx.template.send_body("mock:result", 1).unwrap();
    fx.template
        .send_body_and_header("mock:result", 2, "foo", Value::Null)
        .unwrap();
    fx.mock.assert_is_satisfied().await.unwrap();
}

#[tokio::test]
async fn header_expectation_implies_one_message() {
    let fx = fixture("mock:result");
    fx.mock.set_result_wait_time(Duration::from_millis(50));
    fx.mock.expected_header_received("foo", "bar");
    assert_eq!(fx.mock.expected_minimum_count(), 1);
    let err = fx.mock.assert_is_satisfied().await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "mock:result Received message count 0, expected at least 1"
    );
}

#[tokio::test]
async fn header_value_mismatch() {
    let fx = fixture("mock:result");
    fx.mock.expected_header_received("foo", 8);
    fx.template
        .send_body_and_header("mock:result", "x", "foo", 7)
        .unwrap();
    let err = fx.mock.assert_is_satisfied().await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "mock:result Header with name foo for message: 0. Expected: <8> but was: <7>"
    );
}

#[tokio::test]
async fn header_values_in_any_order() {
    let fx = fixture("mock:result");
    fx.mock
        .expected_header_values_received_in_any_order("seq", [3, 1, 2]);
    for seq in 1..=3 {
        fx.template
            .send_body_and_header("mock:result", "x", "seq", seq)
            .unwrap();
    }
    fx.mock.assert_is_satisfied().await.unwrap();
    assert_eq!(fx.mock.expected_count(), 3);
}

#[tokio::test]
async fn property_expectations() {
    let fx = fixture("mock:result");
    fx.mock.expected_property_received("region", "eu");
    fx.mock
        .expected_property_values_received_in_any_order("tenant", ["b", "a"]);
    fx.template
        .send_body_and_property("mock:result", 1, "region", "eu")
        .unwrap();
    fx.template
        .send(
            "mock:result",
            Exchange::new(2)
                .with_property("region", "eu")
                .with_property("tenant", "a"),
        )
        .unwrap();
    let err = fx.mock.assert_is_satisfied().await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "mock:result Expected 2 properties with key[tenant], received 1 properties. Expected property values: [b]"
    );
}

// ============== Ordering / Duplicates ==============

#[tokio::test]
async fn ascending_and_descending() {
    let fx = fixture("mock:result");
    fx.mock.expects_ascending(expression::body());
    send_all(&fx, &[1, 2, 3]);
    fx.mock.assert_is_satisfied().await.unwrap();

    let fx = fixture("mock:result");
    fx.mock.expects_ascending(expression::body());
    send_all(&fx, &[1, 2, 2]);
    let err = fx.mock.assert_is_satisfied().await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Ordering);
    assert!(err.to_string().contains("Messages 1 and 2 are equal with value: 2"));

    let fx = fixture("mock:result");
    let _ = fx.mock.expects_descending_clause().body();
    send_all(&fx, &[3, 2, 1]);
    fx.mock.assert_is_satisfied().await.unwrap();
}

#[tokio::test]
async fn immediate_order_checks() {
    let fx = fixture("mock:result");
    send_all(&fx, &[3, 1, 2]);
    assert!(fx.mock.assert_messages_ascending(expression::body()).is_err());
    assert!(fx.mock.assert_messages_descending(expression::body()).is_err());
    fx.mock.assert_no_duplicates(expression::body()).unwrap();

    let second = fx.mock.assert_exchange_received(1).unwrap();
    assert_eq!(second.body(), &Value::Int(1));
    let err = fx.mock.assert_exchange_received(3).unwrap_err();
    assert_eq!(
        err.to_string(),
        "mock:result Not enough messages received. Was: 3"
    );
}

#[tokio::test]
async fn no_duplicates() {
    let fx = fixture("mock:result");
    fx.mock.expects_no_duplicates(expression::header("id"));
    for id in [1, 2, 1] {
        fx.template
            .send_body_and_header("mock:result", "x", "id", id)
            .unwrap();
    }
    let err = fx.mock.assert_is_satisfied().await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Duplicate);
    assert!(
        err.to_string()
            .contains("Duplicate message found on message 2 has value: 1 for expression: header(id)")
    );

    // re-verification after a passing run does not see earlier keys twice
    let fx = fixture("mock:result");
    let _ = fx.mock.expects_no_duplicates_clause().header("id");
    for id in [1, 2, 3] {
        fx.template
            .send_body_and_header("mock:result", "x", "id", id)
            .unwrap();
    }
    fx.mock.assert_is_satisfied().await.unwrap();
    fx.mock.assert_is_satisfied().await.unwrap();
}

// ============== Clauses ==============

#[tokio::test]
async fn message_clauses() {
    let fx = fixture("mock:result");
    fx.mock.expected_message_count(2);
    fx.mock.message(0).header("region").is_equal_to("eu");
    fx.mock.message(1).body().not().is_null();
    fx.mock.all_messages().body_as(ValueKind::Int).is_greater_than(0);
    fx.template
        .send_body_and_header("mock:result", "5", "region", "eu")
        .unwrap();
    fx.template.send_body("mock:result", 7).unwrap();
    fx.mock.assert_is_satisfied().await.unwrap();
}

#[tokio::test]
async fn message_clause_failure_is_indexed() {
    let fx = fixture("mock:result");
    fx.mock.message(1).header("bar").is_equal_to(8);
    fx.template
        .send_body_and_header("mock:result", "a", "bar", 8)
        .unwrap();
    fx.template
        .send_body_and_header("mock:result", "b", "bar", 7)
        .unwrap();
    let err = fx.mock.assert_is_satisfied().await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Assertion error at index 1 on mock mock:result with predicate: header(bar) == 8 (7 == 8)"
    );
}

#[tokio::test]
async fn messages_match_predicates() {
    let fx = fixture("mock:result");
    fx.mock.expected_messages_matches([
        body().starts_with("a"),
        body().ends_with("z"),
    ]);
    send_all(&fx, &["abc", "xyz"]);
    fx.mock.assert_is_satisfied().await.unwrap();
}

#[tokio::test]
async fn exchange_pattern_applies_to_all_messages() {
    let fx = fixture("mock:result");
    fx.mock.expected_exchange_pattern(ExchangePattern::InOut);
    fx.template.request_body("mock:result", "a").unwrap();
    fx.template.send_body("mock:result", "b").unwrap();
    let err = fx.mock.assert_is_satisfied().await.unwrap_err();
    assert!(err.to_string().starts_with("Assertion error at index 1"));
}

#[tokio::test]
async fn custom_expectation() {
    let fx = fixture("mock:result");
    fx.mock.expects(|received: &[Exchange]| {
        anyhow::ensure!(
            received.iter().all(|e| e.header("signed").is_some()),
            "unsigned message"
        );
        Ok(())
    });
    fx.template.send_body("mock:result", 1).unwrap();
    let err = fx.mock.assert_is_satisfied().await.unwrap_err();
    assert_eq!(err.to_string(), "mock:result unsigned message");
}

#[tokio::test]
async fn arrival_before_next_window() {
    for fail_fast in [true, false] {
        let fx = fixture("mock:result");
        fx.mock.set_fail_fast(fail_fast);
        fx.mock.expected_message_count(2);
        fx.mock
            .message(0)
            .arrives()
            .no_later_than(Duration::from_millis(50))
            .before_next();
        fx.template.send_body("mock:result", "a").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        fx.template.send_body("mock:result", "b").unwrap();

        let err = fx.mock.assert_is_satisfied().await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Timing, "fail_fast = {fail_fast}");
        let message = err.to_string();
        assert!(
            message.starts_with("Assertion error at index 0 on mock mock:result with predicate:"),
            "fail_fast = {fail_fast}: {message}"
        );
        assert!(
            message.contains("arrives no later than 50 millis before next (was "),
            "fail_fast = {fail_fast}: {message}"
        );
    }
}

#[tokio::test]
async fn arrival_after_previous_window() {
    for fail_fast in [true, false] {
        let fx = fixture("mock:result");
        fx.mock.set_fail_fast(fail_fast);
        fx.mock.expected_message_count(2);
        fx.mock
            .message(1)
            .arrives()
            .no_later_than(Duration::from_millis(50))
            .after_previous();
        fx.template.send_body("mock:result", "a").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        fx.template.send_body("mock:result", "b").unwrap();

        let err = fx.mock.assert_is_satisfied().await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Timing, "fail_fast = {fail_fast}");
        let message = err.to_string();
        assert!(
            message.starts_with("Assertion error at index 1 on mock mock:result with predicate:"),
            "fail_fast = {fail_fast}: {message}"
        );
        assert!(
            message.contains("arrives no later than 50 millis after previous (was "),
            "fail_fast = {fail_fast}: {message}"
        );
    }
}

#[tokio::test]
async fn arrival_windows_hold() {
    for fail_fast in [true, false] {
        let fx = fixture("mock:result");
        fx.mock.set_fail_fast(fail_fast);
        fx.mock.expected_message_count(3);
        fx.mock
            .all_messages()
            .arrives()
            .no_later_than(Duration::from_secs(5))
            .after_previous();
        fx.mock
            .all_messages()
            .arrives()
            .no_later_than(Duration::from_secs(5))
            .before_next();
        send_all(&fx, &["a", "b", "c"]);
        fx.mock.assert_is_satisfied().await.unwrap();
    }
}

// ============== Retention / Reset ==============

#[tokio::test]
async fn retain_last_keeps_counter_authoritative() {
    let fx = fixture("mock:result?retainLast=2");
    fx.mock.expected_message_count(5);
    send_all(&fx, &[1, 2, 3, 4, 5]);
    fx.mock.assert_is_satisfied().await.unwrap();
    assert_eq!(fx.mock.received_counter(), 5);
    let bodies: Vec<Value> = fx
        .mock
        .received_exchanges()
        .iter()
        .map(|e| e.body().clone())
        .collect();
    assert_eq!(bodies, vec![Value::Int(4), Value::Int(5)]);
}

#[tokio::test]
async fn ordered_bodies_fail_fast_with_nothing_retained() {
    let fx = fixture("mock:result?retainLast=0");
    fx.mock.set_fail_fast(true);
    fx.mock.expected_bodies_received(["a", "b", "c"]);
    send_all(&fx, &["a", "x"]);
    // the mismatch drains the latch, so the missing third message is not waited on
    let err = fx.mock.assert_is_satisfied().await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "mock:result Body of message: 1. Expected: <b> but was: <x>"
    );
    assert!(fx.mock.received_exchanges().is_empty());
    assert_eq!(fx.mock.received_counter(), 2);
}

#[tokio::test]
async fn reset_is_idempotent() {
    let fx = fixture("mock:result");
    fx.mock.expected_bodies_received(["a"]);
    fx.mock.set_assert_period(Duration::from_millis(10));
    send_all(&fx, &["b", "c"]);
    assert!(fx.mock.assert_is_satisfied().await.is_err());

    MockEndpoint::reset_mocks(&fx.context);
    fx.mock.reset();
    assert_eq!(fx.mock.received_counter(), 0);
    assert_eq!(fx.mock.expected_count(), -1);
    assert!(fx.mock.received_exchanges().is_empty());
    assert!(fx.mock.failures().is_empty());
    assert_eq!(fx.mock.assert_period(), Duration::ZERO);
    fx.mock.assert_is_satisfied().await.unwrap();

    fx.mock.expected_bodies_received(["a"]);
    send_all(&fx, &["a"]);
    fx.mock.assert_is_satisfied().await.unwrap();
}

#[tokio::test]
async fn copies_are_isolated_from_later_mutation() {
    let fx = fixture("mock:result");
    let mut exchange = Exchange::new("original");
    fx.mock.process(&mut exchange).unwrap();
    exchange.set_body("changed");
    assert_eq!(
        fx.mock.received_exchanges()[0].body(),
        &Value::from("original")
    );
    assert!(fx.mock.received_exchanges()[0].received_timestamp().is_some());
}

// ============== Reactions ==============

#[tokio::test]
async fn reactions_through_a_route() {
    let fx = fixture("mock:result");
    Route::from("direct:start")
        .set_header("via", constant("route"))
        .to("mock:result")
        .install(&fx.context)
        .unwrap();

    fx.mock.return_reply_body(constant("pong"));
    fx.mock.when_exchange_received(
        2,
        processor(|_| Err(anyhow::anyhow!("Simulated failure"))),
    );
    fx.mock.expected_message_count(3);
    fx.mock.expected_header_received("via", "route");

    assert_eq!(
        fx.template.request_body("direct:start", "ping").unwrap(),
        Value::from("pong")
    );
    let err = fx.template.send_body("direct:start", "ping").unwrap_err();
    assert!(matches!(err, RouteError::Rejected { .. }));
    assert!(err.to_string().ends_with("Simulated failure"));
    fx.template.send_body("direct:start", "ping").unwrap();

    fx.mock.assert_is_satisfied().await.unwrap();
    // the retained copy is the exchange as it arrived
    assert_eq!(fx.mock.received_exchanges()[0].body(), &Value::from("ping"));
}

#[tokio::test]
async fn reporter_failures_are_replayed() {
    let fx = fixture("mock:result");
    fx.mock
        .set_reporter(processor(|_| Err(anyhow::anyhow!("Reporter down"))));
    fx.mock.expected_message_count(1);
    send_all(&fx, &[1]);
    let err = fx.mock.assert_is_satisfied().await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Unexpected);
    assert_eq!(
        err.to_string(),
        "Caught exception on mock:result due to: Reporter down"
    );
}

// ============== Files ==============

#[tokio::test]
async fn file_written_by_reaction() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.txt");
    let fx = fixture("mock:result");
    let target = path.clone();
    fx.mock.when_any_exchange_received(processor(move |ex| {
        std::fs::write(&target, ex.body().to_text())?;
        Ok(())
    }));
    fx.mock.expected_file_exists(&path, Some("written"));
    send_all(&fx, &["written"]);
    fx.mock.assert_is_satisfied().await.unwrap();
}

// ============== Context Helpers ==============

#[tokio::test]
async fn context_wide_helpers() {
    init_tracing();
    let context = Arc::new(Context::new("helpers"));
    let a = MockEndpoint::resolve(&context, "mock:a").unwrap();
    let b = MockEndpoint::resolve(&context, "mock://b").unwrap();
    assert!(Arc::ptr_eq(&a, &MockEndpoint::resolve(&context, "mock:a").unwrap()));
    assert!(matches!(
        MockEndpoint::resolve(&context, "direct:a"),
        Err(relay_mock::ResolveError::UnsupportedScheme { .. })
    ));

    MockEndpoint::expects_message_count(1, &[a.clone(), b.clone()]);
    a.process(&mut Exchange::new(1)).unwrap();

    let err = MockEndpoint::assert_wait(Duration::from_millis(50), &[a.clone(), b.clone()])
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Timeout waiting for endpoints to receive enough messages. mock:b timed out."
    );

    b.process(&mut Exchange::new(2)).unwrap();
    MockEndpoint::assert_all_satisfied_within(Duration::from_secs(1), &[a.clone(), b.clone()])
        .await
        .unwrap();
    MockEndpoint::set_context_assert_period(&context, Duration::from_millis(5));
    MockEndpoint::assert_context_satisfied_within(&context, Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(b.assert_period(), Duration::from_millis(5));
}

// ============== Concurrency ==============

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers() {
    let fx = fixture("mock:result");
    fx.mock.set_result_wait_time(Duration::from_secs(5));
    fx.mock.expected_message_count(400);
    fx.mock.expects_no_duplicates(expression::body());

    let producers: Vec<_> = (0..8)
        .map(|p| {
            let template = fx.template.clone();
            tokio::spawn(async move {
                for i in 0..50 {
                    template.send_body("mock:result", p * 50 + i).unwrap();
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    fx.mock.assert_is_satisfied().await.unwrap();
    for producer in producers {
        producer.await.unwrap();
    }
    assert_eq!(fx.mock.received_counter(), 400);
    assert_eq!(fx.mock.received_exchanges().len(), 400);
}
