//! # Relay Mock
//!
//! A mock endpoint for testing Relay routes: it records the exchanges it
//! receives and verifies declared expectations against them.
//!
//! ```rust,ignore
//! let mock = MockEndpoint::resolve(&context, "mock:result")?;
//! mock.expected_bodies_received(["a", "b"]);
//! mock.message(0).header("region").is_equal_to("eu");
//!
//! template.send_body("direct:start", "a")?;
//! template.send_body("direct:start", "b")?;
//!
//! mock.assert_is_satisfied().await?;
//! ```
//!
//! ## Layers
//!
//! - [`builder`]: fluent predicates over an expression ([`ValueBuilder`])
//! - [`clause`]: predicates bundled and applied to one received message ([`AssertionClause`])
//! - [`endpoint`]: ingestion, retention, the countdown latch and verification ([`MockEndpoint`])

pub mod builder;
pub mod clause;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod latch;
pub mod retention;
pub mod task;

pub mod prelude {
    pub use crate::builder::{BuilderHooks, ExpressionClause, ValueBuilder, body, constant, header, property};
    pub use crate::clause::AssertionClause;
    pub use crate::config::MockConfig;
    pub use crate::endpoint::MockEndpoint;
    pub use crate::error::{AssertionError, FailureKind};
    pub use crate::retention::RetentionPolicy;
}

pub use builder::{BuilderHooks, Detached, ExpressionClause, ExpressionSlot, ValueBuilder};
pub use clause::{ArrivalBound, ArrivalClause, AssertionClause};
pub use config::MockConfig;
pub use endpoint::MockEndpoint;
pub use error::{AssertionError, ConfigError, FailureKind, ResolveError};
pub use latch::CountDownLatch;
pub use retention::RetentionPolicy;
pub use task::{Check, IndexedCheck, Ledger, Scope, Verdict};
