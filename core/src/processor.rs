use crate::exchange::Exchange;
use std::sync::Arc;

/// The contract for a step that acts on an exchange in place.
///
/// Processors are synchronous: they run on the thread delivering the exchange
/// and must not block on other deliveries.
pub trait Processor: Send + Sync + 'static {
    fn process(&self, exchange: &mut Exchange) -> anyhow::Result<()>;
}

impl<F> Processor for F
where
    F: Fn(&mut Exchange) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn process(&self, exchange: &mut Exchange) -> anyhow::Result<()> {
        self(exchange)
    }
}

pub type ProcessorRef = Arc<dyn Processor>;

/// Wraps a closure as a shared processor.
pub fn processor<F>(f: F) -> ProcessorRef
where
    F: Fn(&mut Exchange) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}
