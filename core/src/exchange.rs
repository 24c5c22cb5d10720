//! Exchange - the unit of data flowing through a route.
//!
//! An [`Exchange`] carries one inbound [`Message`] (body and headers), a set of
//! exchange-scoped properties and, when a processing step failed, the error it
//! failed with.

use crate::value::{Value, ValueKind};
use crate::error::ConversionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Property stamped on every exchange a mock endpoint receives.
pub const RECEIVED_TIMESTAMP: &str = "RelayReceivedTimestamp";

/// Message exchange pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ExchangePattern {
    /// One-way: no reply is expected.
    #[default]
    InOnly,
    /// Request/reply.
    InOut,
}

impl fmt::Display for ExchangePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangePattern::InOnly => f.write_str("InOnly"),
            ExchangePattern::InOut => f.write_str("InOut"),
        }
    }
}

/// Body plus headers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    body: Value,
    headers: BTreeMap<String, Value>,
}

impl Message {
    pub fn new(body: impl Into<Value>) -> Self {
        Self {
            body: body.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Value>) {
        self.body = body.into();
    }

    /// The body converted to `kind`.
    pub fn body_as(&self, kind: ValueKind) -> Result<Value, ConversionError> {
        self.body.convert_to(kind)
    }

    /// Header value; `None` when absent, `Some(Value::Null)` when present but null.
    pub fn header(&self, name: &str) -> Option<&Value> {
        self.headers.get(name)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    pub fn has_headers(&self) -> bool {
        !self.headers.is_empty()
    }

    pub fn headers(&self) -> &BTreeMap<String, Value> {
        &self.headers
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.headers.insert(name.into(), value.into());
    }

    pub fn remove_header(&mut self, name: &str) -> Option<Value> {
        self.headers.remove(name)
    }

    fn deep_copy(&self) -> Self {
        Self {
            body: self.body.deep_copy(),
            headers: self
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.deep_copy()))
                .collect(),
        }
    }
}

/// One unit of work: an inbound message plus exchange-scoped state.
#[derive(Debug, Clone)]
pub struct Exchange {
    id: String,
    pattern: ExchangePattern,
    created: DateTime<Utc>,
    message: Message,
    properties: BTreeMap<String, Value>,
    exception: Option<Arc<anyhow::Error>>,
}

impl Exchange {
    pub fn new(body: impl Into<Value>) -> Self {
        Self::with_message(Message::new(body))
    }

    pub fn with_message(message: Message) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            pattern: ExchangePattern::default(),
            created: Utc::now(),
            message,
            properties: BTreeMap::new(),
            exception: None,
        }
    }

    /// Builder-style header setter.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.message.set_header(name, value);
        self
    }

    /// Builder-style property setter.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_property(name, value);
        self
    }

    pub fn with_pattern(mut self, pattern: ExchangePattern) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pattern(&self) -> ExchangePattern {
        self.pattern
    }

    pub fn set_pattern(&mut self, pattern: ExchangePattern) {
        self.pattern = pattern;
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    pub fn body(&self) -> &Value {
        self.message.body()
    }

    pub fn set_body(&mut self, body: impl Into<Value>) {
        self.message.set_body(body);
    }

    pub fn header(&self, name: &str) -> Option<&Value> {
        self.message.header(name)
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.message.set_header(name, value);
    }

    /// Property value; `None` when absent, `Some(Value::Null)` when present but null.
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn properties(&self) -> &BTreeMap<String, Value> {
        &self.properties
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn remove_property(&mut self, name: &str) -> Option<Value> {
        self.properties.remove(name)
    }

    /// Timestamp stamped by a receiving mock endpoint, if any.
    pub fn received_timestamp(&self) -> Option<DateTime<Utc>> {
        self.property(RECEIVED_TIMESTAMP).and_then(Value::as_timestamp)
    }

    pub fn exception(&self) -> Option<&anyhow::Error> {
        self.exception.as_deref()
    }

    pub fn is_failed(&self) -> bool {
        self.exception.is_some()
    }

    pub fn set_exception(&mut self, error: anyhow::Error) {
        self.exception = Some(Arc::new(error));
    }

    pub fn take_exception(&mut self) -> Option<Arc<anyhow::Error>> {
        self.exception.take()
    }

    /// A copy that shares nothing mutable with this exchange.
    ///
    /// The id is preserved so the copy identifies the same unit of work.
    pub fn deep_copy(&self) -> Self {
        Self {
            id: self.id.clone(),
            pattern: self.pattern,
            created: self.created,
            message: self.message.deep_copy(),
            properties: self
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), v.deep_copy()))
                .collect(),
            exception: self.exception.clone(),
        }
    }

    /// Map view of the whole exchange, used by the `exchange()` expression.
    pub fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("id".to_string(), Value::from(self.id.as_str()));
        map.insert("pattern".to_string(), Value::from(self.pattern.to_string()));
        map.insert("message".to_string(), self.message_value());
        map.insert("properties".to_string(), Value::Map(self.properties.clone()));
        Value::Map(map)
    }

    /// Map view of the inbound message, used by the `message()` expression.
    pub fn message_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("body".to_string(), self.message.body.clone());
        map.insert("headers".to_string(), Value::Map(self.message.headers.clone()));
        Value::Map(map)
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Exchange[{}]", self.id)
    }
}
