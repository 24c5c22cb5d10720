use crate::route::RouteError;
use relay_core::context::Context;
use relay_core::exchange::{Exchange, ExchangePattern};
use relay_core::value::Value;
use std::sync::Arc;

/// Sends exchanges to endpoints of a context by URI.
#[derive(Clone)]
pub struct ProducerTemplate {
    context: Arc<Context>,
}

impl ProducerTemplate {
    pub fn new(context: Arc<Context>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Delivers `exchange` and returns it as the endpoint left it, including
    /// any exception recorded on it.
    pub fn send(&self, uri: &str, mut exchange: Exchange) -> Result<Exchange, RouteError> {
        let endpoint = self
            .context
            .endpoint(uri)
            .ok_or_else(|| RouteError::NoEndpoint(uri.to_string()))?;
        endpoint
            .process(&mut exchange)
            .map_err(|source| RouteError::Failed {
                uri: uri.to_string(),
                source,
            })?;
        Ok(exchange)
    }

    /// One-way send; an exception recorded on the exchange is returned as an error.
    pub fn send_body(&self, uri: &str, body: impl Into<Value>) -> Result<(), RouteError> {
        self.deliver(uri, Exchange::new(body)).map(|_| ())
    }

    pub fn send_body_and_header(
        &self,
        uri: &str,
        body: impl Into<Value>,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), RouteError> {
        self.deliver(uri, Exchange::new(body).with_header(name, value))
            .map(|_| ())
    }

    pub fn send_body_and_headers<I, K, V>(
        &self,
        uri: &str,
        body: impl Into<Value>,
        headers: I,
    ) -> Result<(), RouteError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut exchange = Exchange::new(body);
        for (name, value) in headers {
            exchange.set_header(name, value);
        }
        self.deliver(uri, exchange).map(|_| ())
    }

    pub fn send_body_and_property(
        &self,
        uri: &str,
        body: impl Into<Value>,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), RouteError> {
        self.deliver(uri, Exchange::new(body).with_property(name, value))
            .map(|_| ())
    }

    /// Request/reply send returning the body the exchange ends with.
    pub fn request_body(&self, uri: &str, body: impl Into<Value>) -> Result<Value, RouteError> {
        let exchange = Exchange::new(body).with_pattern(ExchangePattern::InOut);
        Ok(self.deliver(uri, exchange)?.body().clone())
    }

    fn deliver(&self, uri: &str, exchange: Exchange) -> Result<Exchange, RouteError> {
        let mut exchange = self.send(uri, exchange)?;
        match exchange.take_exception() {
            Some(exception) => Err(RouteError::Rejected {
                uri: uri.to_string(),
                exchange: exchange.id().to_string(),
                exception,
            }),
            None => Ok(exchange),
        }
    }
}
