use crate::value::ValueKind;
use thiserror::Error;

/// A value could not be converted into the requested kind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("There is no type conversion possible from {from} to {to}")]
pub struct ConversionError {
    pub from: ValueKind,
    pub to: ValueKind,
}

impl ConversionError {
    pub fn new(from: ValueKind, to: ValueKind) -> Self {
        Self { from, to }
    }
}

/// Errors raised while initializing or evaluating an expression or predicate.
#[derive(Error, Debug)]
pub enum ExpressionError {
    #[error("No language registered with name: {0}")]
    UnknownLanguage(String),
    #[error("Expression {0} has not been initialized")]
    NotInitialized(String),
    #[error("No expression has been configured on the clause")]
    Unconfigured,
    #[error("Invalid regular expression {pattern}: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error("Evaluation failed: {0}")]
    Evaluation(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ExpressionError {
    pub fn invalid_regex(pattern: &str, source: regex::Error) -> Self {
        Self::InvalidRegex {
            pattern: pattern.to_string(),
            source,
        }
    }
}

/// Endpoint URI parsing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UriError {
    #[error("Endpoint URI has no scheme: {0}")]
    MissingScheme(String),
    #[error("Endpoint URI has an empty path: {0}")]
    EmptyPath(String),
    #[error("Malformed query parameter '{param}' in endpoint URI: {uri}")]
    MalformedParameter { uri: String, param: String },
}
