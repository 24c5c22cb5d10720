//! # Relay Core
//!
//! Message model, expression/predicate contracts and endpoint registry shared
//! by the Relay runtime and the mock endpoint.

pub mod context;
pub mod endpoint;
pub mod error;
pub mod exchange;
pub mod expression;
pub mod language;
pub mod predicate;
pub mod processor;
pub mod telemetry;
pub mod uri;
pub mod value;

pub mod prelude {
    pub use crate::context::Context;
    pub use crate::endpoint::{Endpoint, EndpointRef};
    pub use crate::error::{ConversionError, ExpressionError};
    pub use crate::exchange::{Exchange, ExchangePattern, Message};
    pub use crate::expression::{Expression, ExpressionRef, Predicate, PredicateRef};
    pub use crate::processor::{Processor, ProcessorRef, processor};
    pub use crate::value::{StreamCache, Value, ValueKind};
}

pub use context::Context;
pub use endpoint::{Endpoint, EndpointRef};
pub use error::{ConversionError, ExpressionError, UriError};
pub use exchange::{Exchange, ExchangePattern, Message, RECEIVED_TIMESTAMP};
pub use expression::{Expression, ExpressionRef, Predicate, PredicateRef};
pub use language::{Language, LanguageRegistry};
pub use predicate::Operand;
pub use processor::{Processor, ProcessorRef};
pub use telemetry::ThroughputLogger;
pub use uri::EndpointUri;
pub use value::{StreamCache, Value, ValueKind};
