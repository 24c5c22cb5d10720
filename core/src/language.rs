//! Named expression languages.
//!
//! A [`Language`] turns source text into an expression. Languages are looked
//! up by name in the [`LanguageRegistry`] owned by each context.

use crate::error::ExpressionError;
use crate::expression::{self, ExpressionRef, PredicateRef};
use crate::predicate;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

pub trait Language: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn create_expression(&self, source: &str) -> Result<ExpressionRef, ExpressionError>;

    /// Predicate form of `source`; defaults to the truthiness of the expression.
    fn create_predicate(&self, source: &str) -> Result<PredicateRef, ExpressionError> {
        Ok(predicate::truthy(self.create_expression(source)?))
    }
}

/// `constant` language: the source text itself.
pub struct ConstantLanguage;

impl Language for ConstantLanguage {
    fn name(&self) -> &str {
        "constant"
    }

    fn create_expression(&self, source: &str) -> Result<ExpressionRef, ExpressionError> {
        Ok(expression::constant(source))
    }
}

/// `header` language: the header named by the source text.
pub struct HeaderLanguage;

impl Language for HeaderLanguage {
    fn name(&self) -> &str {
        "header"
    }

    fn create_expression(&self, source: &str) -> Result<ExpressionRef, ExpressionError> {
        Ok(expression::header(source.trim()))
    }
}

/// `exchangeProperty` language: the property named by the source text.
pub struct PropertyLanguage;

impl Language for PropertyLanguage {
    fn name(&self) -> &str {
        "exchangeProperty"
    }

    fn create_expression(&self, source: &str) -> Result<ExpressionRef, ExpressionError> {
        Ok(expression::property(source.trim()))
    }
}

/// Registry of languages keyed by name.
#[derive(Default)]
pub struct LanguageRegistry {
    languages: RwLock<BTreeMap<String, Arc<dyn Language>>>,
}

impl LanguageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `constant`, `header` and `exchangeProperty`.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(ConstantLanguage);
        registry.register(HeaderLanguage);
        registry.register(PropertyLanguage);
        registry
    }

    /// Registers a language, replacing any previous one with the same name.
    pub fn register(&self, language: impl Language) {
        let language: Arc<dyn Language> = Arc::new(language);
        self.languages
            .write()
            .insert(language.name().to_string(), language);
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Language>, ExpressionError> {
        self.languages
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ExpressionError::UnknownLanguage(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.languages.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Exchange;
    use crate::value::Value;

    struct Upper;

    impl Language for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn create_expression(&self, source: &str) -> Result<ExpressionRef, ExpressionError> {
            Ok(expression::constant(source.to_uppercase()))
        }
    }

    #[test]
    fn custom_language_is_resolvable() {
        let registry = LanguageRegistry::with_builtins();
        registry.register(Upper);
        assert_eq!(
            registry.names(),
            vec!["constant", "exchangeProperty", "header", "upper"]
        );

        let expr = registry.resolve("upper").unwrap().create_expression("abc").unwrap();
        assert_eq!(expr.evaluate(&Exchange::new(1)).unwrap(), Value::from("ABC"));
    }

    #[test]
    fn language_predicate_uses_truthiness() {
        let registry = LanguageRegistry::with_builtins();
        let predicate = registry
            .resolve("header")
            .unwrap()
            .create_predicate("flag")
            .unwrap();
        assert!(predicate.matches(&Exchange::new(1).with_header("flag", "true")).unwrap());
        assert!(!predicate.matches(&Exchange::new(1)).unwrap());
    }

    #[test]
    fn unknown_language() {
        let registry = LanguageRegistry::new();
        assert!(registry.resolve("simple").is_err());
    }
}
