//! # Context
//!
//! The shared environment endpoints, routes and expressions run in: a name,
//! the language registry and the endpoint registry.

use crate::endpoint::EndpointRef;
use crate::language::LanguageRegistry;
use crate::uri::base_uri;
use parking_lot::RwLock;
use std::collections::BTreeMap;

pub struct Context {
    name: String,
    languages: LanguageRegistry,
    endpoints: RwLock<BTreeMap<String, EndpointRef>>,
}

impl Context {
    /// A context with the builtin languages registered.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            languages: LanguageRegistry::with_builtins(),
            endpoints: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn languages(&self) -> &LanguageRegistry {
        &self.languages
    }

    /// Registers an endpoint under its URI, returning the one it replaced.
    pub fn add_endpoint(&self, endpoint: EndpointRef) -> Option<EndpointRef> {
        let key = base_uri(endpoint.uri());
        tracing::debug!(context = %self.name, endpoint = %key, "Registering endpoint");
        self.endpoints.write().insert(key, endpoint)
    }

    /// Looks up an endpoint; query parameters in `uri` are ignored.
    pub fn endpoint(&self, uri: &str) -> Option<EndpointRef> {
        self.endpoints.read().get(&base_uri(uri)).cloned()
    }

    /// Returns the endpoint registered under `uri`, creating it with `create`
    /// when absent. Creation happens under the registry lock.
    pub fn get_or_add_endpoint<F, E>(&self, uri: &str, create: F) -> Result<EndpointRef, E>
    where
        F: FnOnce() -> Result<EndpointRef, E>,
    {
        let key = base_uri(uri);
        if let Some(existing) = self.endpoints.read().get(&key) {
            return Ok(existing.clone());
        }
        let mut endpoints = self.endpoints.write();
        if let Some(existing) = endpoints.get(&key) {
            return Ok(existing.clone());
        }
        let endpoint = create()?;
        tracing::debug!(context = %self.name, endpoint = %key, "Created endpoint");
        endpoints.insert(key, endpoint.clone());
        Ok(endpoint)
    }

    pub fn endpoints(&self) -> Vec<EndpointRef> {
        self.endpoints.read().values().cloned().collect()
    }

    pub fn remove_endpoint(&self, uri: &str) -> Option<EndpointRef> {
        self.endpoints.write().remove(&base_uri(uri))
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("endpoints", &self.endpoints.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{Endpoint, downcast};
    use crate::exchange::Exchange;
    use std::any::Any;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        uri: String,
        seen: AtomicUsize,
    }

    impl Endpoint for Counting {
        fn uri(&self) -> &str {
            &self.uri
        }

        fn process(&self, _exchange: &mut Exchange) -> anyhow::Result<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    fn counting(uri: &str) -> EndpointRef {
        Arc::new(Counting {
            uri: uri.to_string(),
            seen: AtomicUsize::new(0),
        })
    }

    #[test]
    fn lookup_ignores_query() {
        let context = Context::new("test");
        context.add_endpoint(counting("mock:result"));
        assert!(context.endpoint("mock:result?retainLast=2").is_some());
        assert!(context.endpoint("mock:other").is_none());
    }

    #[test]
    fn get_or_add_creates_once() {
        let context = Context::new("test");
        let first = context
            .get_or_add_endpoint::<_, ()>("mock:a", || Ok(counting("mock:a")))
            .unwrap();
        let second = context
            .get_or_add_endpoint::<_, ()>("mock:a?log=true", || Err(()))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(context.endpoints().len(), 1);
    }

    #[test]
    fn downcast_recovers_concrete_type() {
        let context = Context::new("test");
        context.add_endpoint(counting("mock:a"));
        let endpoint = context.endpoint("mock:a").unwrap();
        let mut exchange = Exchange::new("x");
        endpoint.process(&mut exchange).unwrap();
        let concrete = downcast::<Counting>(endpoint).unwrap();
        assert_eq!(concrete.seen.load(Ordering::SeqCst), 1);
    }
}
