use crate::exchange::Exchange;
use std::any::Any;
use std::sync::Arc;

/// The contract for a message consumer addressed by URI.
///
/// `process` receives the live exchange and may mutate it; an `Err` is a
/// failure of the endpoint itself, not of the exchange.
pub trait Endpoint: Send + Sync + 'static {
    /// Canonical `scheme:path` URI.
    fn uri(&self) -> &str;

    fn process(&self, exchange: &mut Exchange) -> anyhow::Result<()>;

    /// Upcast used to recover the concrete endpoint type from the registry.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

pub type EndpointRef = Arc<dyn Endpoint>;

/// Recovers a concrete endpoint type from a registry entry.
pub fn downcast<E: Endpoint>(endpoint: EndpointRef) -> Option<Arc<E>> {
    endpoint.as_any().downcast::<E>().ok()
}
