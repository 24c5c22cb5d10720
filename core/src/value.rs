//! Dynamic message values.
//!
//! A [`Value`] is what flows through an exchange body, a header or a property.
//! Every value knows its [`ValueKind`] and can be converted into another kind
//! on demand, which is what type-coerced comparisons rely on.

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use crate::error::ConversionError;

/// The kind (runtime type) of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    Text,
    Bytes,
    Timestamp,
    List,
    Map,
    Stream,
}

impl ValueKind {
    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Text => "text",
            ValueKind::Bytes => "bytes",
            ValueKind::Timestamp => "timestamp",
            ValueKind::List => "list",
            ValueKind::Map => "map",
            ValueKind::Stream => "stream",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A re-readable, stream-like body.
///
/// Reading moves a shared cursor forward; [`StreamCache::reset`] rewinds it so
/// the content can be consumed again. Clones share the cursor, use
/// [`StreamCache::detached`] for an independent one.
#[derive(Clone)]
pub struct StreamCache {
    data: Bytes,
    position: Arc<AtomicUsize>,
}

impl StreamCache {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            position: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current cursor position.
    pub fn position(&self) -> usize {
        self.position.load(AtomicOrdering::SeqCst)
    }

    /// Reads everything from the cursor to the end, leaving the cursor at the end.
    pub fn read_remaining(&self) -> Bytes {
        let len = self.data.len();
        let start = self.position.swap(len, AtomicOrdering::SeqCst).min(len);
        self.data.slice(start..)
    }

    /// Rewinds the cursor to the beginning.
    pub fn reset(&self) {
        self.position.store(0, AtomicOrdering::SeqCst);
    }

    /// The whole content, independent of the cursor.
    pub fn content(&self) -> &Bytes {
        &self.data
    }

    /// A copy sharing the content but owning its own cursor.
    pub fn detached(&self) -> Self {
        Self {
            data: self.data.clone(),
            position: Arc::new(AtomicUsize::new(self.position())),
        }
    }
}

impl PartialEq for StreamCache {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl fmt::Debug for StreamCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCache")
            .field("len", &self.data.len())
            .field("position", &self.position())
            .finish()
    }
}

/// A dynamic message value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Bytes),
    Timestamp(DateTime<Utc>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Stream(StreamCache),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Text(_) => ValueKind::Text,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Timestamp(_) => ValueKind::Timestamp,
            Value::List(_) => ValueKind::List,
            Value::Map(_) => ValueKind::Map,
            Value::Stream(_) => ValueKind::Stream,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// Rewinds the value if it is a stream; no-op otherwise.
    pub fn reset_stream(&self) {
        if let Value::Stream(stream) = self {
            stream.reset();
        }
    }

    /// Deep copy: streams get an independent cursor.
    pub fn deep_copy(&self) -> Value {
        match self {
            Value::Stream(stream) => Value::Stream(stream.detached()),
            Value::List(items) => Value::List(items.iter().map(Value::deep_copy).collect()),
            Value::Map(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_copy()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Predicate interpretation of a value.
    ///
    /// `Null` is false, booleans are themselves, the texts `"true"`/`"false"`
    /// parse, other texts and collections are true when non-empty.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Text(s) => {
                if s.eq_ignore_ascii_case("true") {
                    true
                } else if s.eq_ignore_ascii_case("false") {
                    false
                } else {
                    !s.is_empty()
                }
            }
            Value::List(items) => !items.is_empty(),
            Value::Map(entries) => !entries.is_empty(),
            _ => true,
        }
    }

    /// Text rendering used by `Text` conversion. Consumes stream content.
    pub fn to_text(&self) -> String {
        match self {
            Value::Stream(stream) => String::from_utf8_lossy(&stream.read_remaining()).into_owned(),
            other => other.to_string(),
        }
    }

    /// Converts this value into the given kind.
    ///
    /// `Null` converts to `Null` for every target kind.
    pub fn convert_to(&self, kind: ValueKind) -> Result<Value, ConversionError> {
        if self.kind() == kind {
            return Ok(self.clone());
        }
        let unsupported = || ConversionError::new(self.kind(), kind);

        let converted = match (self, kind) {
            (Value::Null, _) => Value::Null,
            (Value::Bytes(bytes), ValueKind::Text) => Value::Text(
                String::from_utf8(bytes.to_vec()).map_err(|_| unsupported())?,
            ),
            (Value::Bytes(bytes), ValueKind::Stream) => Value::Stream(StreamCache::new(bytes.clone())),
            (Value::Stream(stream), ValueKind::Bytes) => Value::Bytes(stream.read_remaining()),
            (Value::Stream(stream), target) => {
                let text = String::from_utf8(stream.read_remaining().to_vec())
                    .map_err(|_| unsupported())?;
                return Value::Text(text)
                    .convert_to(target)
                    .map_err(|_| unsupported());
            }
            (_, ValueKind::Text) => Value::Text(self.to_text()),
            (Value::Text(s), ValueKind::Int) => {
                Value::Int(s.trim().parse::<i64>().map_err(|_| unsupported())?)
            }
            (Value::Text(s), ValueKind::Float) => {
                Value::Float(s.trim().parse::<f64>().map_err(|_| unsupported())?)
            }
            (Value::Text(s), ValueKind::Bool) => match s.trim() {
                t if t.eq_ignore_ascii_case("true") => Value::Bool(true),
                t if t.eq_ignore_ascii_case("false") => Value::Bool(false),
                _ => return Err(unsupported()),
            },
            (Value::Text(s), ValueKind::Bytes) => Value::Bytes(Bytes::from(s.clone().into_bytes())),
            (Value::Text(s), ValueKind::Stream) => {
                Value::Stream(StreamCache::new(Bytes::from(s.clone().into_bytes())))
            }
            (Value::Text(s), ValueKind::Timestamp) => Value::Timestamp(
                DateTime::parse_from_rfc3339(s.trim())
                    .map_err(|_| unsupported())?
                    .with_timezone(&Utc),
            ),
            (Value::Int(i), ValueKind::Float) => Value::Float(*i as f64),
            (Value::Float(f), ValueKind::Int) if f.is_finite() && f.fract() == 0.0 => {
                Value::Int(*f as i64)
            }
            (Value::Int(ms), ValueKind::Timestamp) => {
                Value::Timestamp(Utc.timestamp_millis_opt(*ms).single().ok_or_else(unsupported)?)
            }
            (Value::Timestamp(t), ValueKind::Int) => Value::Int(t.timestamp_millis()),
            _ => return Err(unsupported()),
        };
        Ok(converted)
    }

    /// Type-coerced equality: `other` is converted to this value's kind first,
    /// falling back to converting this value to `other`'s kind.
    pub fn coerce_eq(&self, other: &Value) -> bool {
        if self == other {
            return true;
        }
        if self.is_null() || other.is_null() {
            return false;
        }
        if let Ok(converted) = other.convert_to(self.kind()) {
            if converted == *self {
                return true;
            }
        }
        match self.convert_to(other.kind()) {
            Ok(converted) => converted == *other,
            Err(_) => false,
        }
    }

    /// Type-coerced ordering, `None` when the two values cannot be compared.
    pub fn coerce_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) | (_, Value::Null) => None,
            _ => {
                let converted = other.convert_to(self.kind()).ok()?;
                if converted.kind() != self.kind() {
                    return None;
                }
                self.coerce_cmp(&converted)
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
            Value::Bytes(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
            Value::Timestamp(t) => f.write_str(&t.to_rfc3339()),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Map(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}={value}")?;
                }
                f.write_str("}")
            }
            Value::Stream(stream) => f.write_str(&String::from_utf8_lossy(stream.content())),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => |$v:ident| $conv:expr),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from($v: $ty) -> Self {
                    $conv
                }
            }
        )*
    };
}

value_from! {
    bool => |v| Value::Bool(v),
    i32 => |v| Value::Int(i64::from(v)),
    i64 => |v| Value::Int(v),
    u32 => |v| Value::Int(i64::from(v)),
    usize => |v| Value::Int(v as i64),
    f32 => |v| Value::Float(f64::from(v)),
    f64 => |v| Value::Float(v),
    &str => |v| Value::Text(v.to_string()),
    String => |v| Value::Text(v),
    &String => |v| Value::Text(v.clone()),
    Bytes => |v| Value::Bytes(v),
    DateTime<Utc> => |v| Value::Timestamp(v),
    StreamCache => |v| Value::Stream(v),
    BTreeMap<String, Value> => |v| Value::Map(v),
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}
