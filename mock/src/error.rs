use relay_core::error::{ConversionError, ExpressionError, UriError};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// What an assertion failure is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Expected and actual values disagree.
    Mismatch,
    /// A required element is absent: an exchange, headers, a property.
    Missing,
    /// The actual value cannot be converted to the expected kind.
    Conversion,
    /// Two messages share a key that must be unique.
    Duplicate,
    /// Two adjacent messages are out of order.
    Ordering,
    /// Waiting took less time than required.
    Timing,
    /// An error raised while processing or evaluating, replayed at verification.
    Unexpected,
}

/// The single failure reported by a verification call.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AssertionError {
    message: String,
    kind: FailureKind,
    #[source]
    cause: Option<Cause>,
}

impl AssertionError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            cause: None,
        }
    }

    /// A failure on the endpoint at `uri`; the message is prefixed with the URI.
    pub fn on(uri: &str, kind: FailureKind, message: impl fmt::Display) -> Self {
        Self::new(kind, format!("{uri} {message}"))
    }

    /// A replayed error captured while receiving on `uri`.
    pub fn caught(uri: &str, cause: Arc<anyhow::Error>) -> Self {
        Self {
            message: format!("Caught exception on {uri} due to: {cause}"),
            kind: FailureKind::Unexpected,
            cause: Some(Cause(cause)),
        }
    }

    pub fn with_cause(mut self, cause: impl Into<anyhow::Error>) -> Self {
        self.cause = Some(Cause(Arc::new(cause.into())));
        self
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<ConversionError> for AssertionError {
    fn from(error: ConversionError) -> Self {
        Self::new(FailureKind::Conversion, error.to_string())
    }
}

/// Shared error chained as the source of an [`AssertionError`].
#[derive(Debug, Clone)]
pub struct Cause(Arc<anyhow::Error>);

impl Cause {
    pub fn error(&self) -> &anyhow::Error {
        &self.0
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl StdError for Cause {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        let inner: &(dyn StdError + Send + Sync + 'static) = (*self.0).as_ref();
        inner.source()
    }
}

/// Invalid mock endpoint configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid mock configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid value '{value}' for option {key}: {reason}")]
    InvalidOption {
        key: String,
        value: String,
        reason: String,
    },
    #[error(transparent)]
    Uri(#[from] UriError),
}

/// A mock endpoint could not be resolved from a context.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Endpoint {0} is not a mock endpoint")]
    NotMock(String),
    #[error("Unsupported scheme '{scheme}' for mock endpoint: {uri}")]
    UnsupportedScheme { scheme: String, uri: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Uri(#[from] UriError),
}

pub(crate) fn unexpected(uri: &str, context: impl fmt::Display, error: ExpressionError) -> AssertionError {
    match error {
        ExpressionError::Conversion(conversion) => AssertionError::on(uri, FailureKind::Conversion, conversion),
        other => AssertionError::on(uri, FailureKind::Unexpected, format!("{context}: {other}"))
            .with_cause(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_is_prefixed_with_uri() {
        let err = AssertionError::on("mock:result", FailureKind::Missing, "Exchange 0 has no headers");
        assert_eq!(err.to_string(), "mock:result Exchange 0 has no headers");
        assert_eq!(err.kind(), FailureKind::Missing);
        assert!(err.source().is_none());
    }

    #[test]
    fn caught_error_chains_its_cause() {
        let cause = Arc::new(anyhow::anyhow!("Forced"));
        let err = AssertionError::caught("mock:result", cause);
        assert_eq!(err.to_string(), "Caught exception on mock:result due to: Forced");
        assert_eq!(err.source().map(ToString::to_string).as_deref(), Some("Forced"));
        assert_eq!(err.kind(), FailureKind::Unexpected);
    }

    #[test]
    fn conversion_errors_keep_both_kinds() {
        use relay_core::value::ValueKind;
        let err = unexpected(
            "mock:a",
            "header(x)",
            ExpressionError::Conversion(ConversionError::new(ValueKind::Text, ValueKind::Int)),
        );
        assert_eq!(err.kind(), FailureKind::Conversion);
        assert_eq!(err.to_string(), "mock:a There is no type conversion possible from text to int");
    }
}
