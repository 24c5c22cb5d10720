//! # Route: Linear Exchange Pipeline
//!
//! A `Route` is a reusable chain of steps applied to one exchange at a time.
//!
//! * **Builder pattern**: `Route::from("direct:start").set_header(..).to("mock:result")`
//! * **Installed as an endpoint**: once installed into a [`Context`], the
//!   route consumes exchanges sent to its source URI.
//!
//! A step failure is recorded as the exchange's exception and stops the
//! route; a failed exchange is never forwarded.

use relay_core::context::Context;
use relay_core::endpoint::{Endpoint, EndpointRef};
use relay_core::error::ExpressionError;
use relay_core::exchange::Exchange;
use relay_core::expression::{ExpressionRef, PredicateRef};
use relay_core::processor::ProcessorRef;
use relay_core::uri::base_uri;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("No endpoint could be found for: {0}")]
    NoEndpoint(String),
    #[error("Endpoint {uri} failed: {source}")]
    Failed {
        uri: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Exchange {exchange} failed on {uri}: {exception}")]
    Rejected {
        uri: String,
        exchange: String,
        exception: Arc<anyhow::Error>,
    },
    #[error("Failed to initialize route {route}: {source}")]
    Init {
        route: String,
        #[source]
        source: ExpressionError,
    },
    #[error("Context of route {0} has been dropped")]
    ContextDropped(String),
}

#[derive(Clone)]
enum Step {
    Process(ProcessorRef),
    SetHeader(String, ExpressionRef),
    SetProperty(String, ExpressionRef),
    SetBody(ExpressionRef),
    Filter(PredicateRef),
    To(String),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Process(_) => f.write_str("process"),
            Step::SetHeader(name, expr) => write!(f, "setHeader({name}, {expr})"),
            Step::SetProperty(name, expr) => write!(f, "setProperty({name}, {expr})"),
            Step::SetBody(expr) => write!(f, "setBody({expr})"),
            Step::Filter(predicate) => write!(f, "filter({predicate})"),
            Step::To(uri) => write!(f, "to({uri})"),
        }
    }
}

/// The Route builder.
#[derive(Clone)]
pub struct Route {
    source: String,
    steps: Vec<Step>,
}

impl Route {
    /// Start defining a route consuming from `source`.
    pub fn from(source: &str) -> Self {
        Self {
            source: base_uri(source),
            steps: Vec::new(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn process(mut self, processor: ProcessorRef) -> Self {
        self.steps.push(Step::Process(processor));
        self
    }

    pub fn set_header(mut self, name: &str, expression: ExpressionRef) -> Self {
        self.steps.push(Step::SetHeader(name.to_string(), expression));
        self
    }

    pub fn set_property(mut self, name: &str, expression: ExpressionRef) -> Self {
        self.steps
            .push(Step::SetProperty(name.to_string(), expression));
        self
    }

    pub fn set_body(mut self, expression: ExpressionRef) -> Self {
        self.steps.push(Step::SetBody(expression));
        self
    }

    /// Stops routing exchanges that do not match `predicate`.
    pub fn filter(mut self, predicate: PredicateRef) -> Self {
        self.steps.push(Step::Filter(predicate));
        self
    }

    pub fn to(mut self, uri: &str) -> Self {
        self.steps.push(Step::To(uri.to_string()));
        self
    }

    /// Step descriptions in order.
    pub fn describe(&self) -> Vec<String> {
        self.steps.iter().map(ToString::to_string).collect()
    }

    /// Initializes every expression of the route against `context`.
    pub fn init(&self, context: &Context) -> Result<(), RouteError> {
        let init = |result: Result<(), ExpressionError>| {
            result.map_err(|source| RouteError::Init {
                route: self.source.clone(),
                source,
            })
        };
        for step in &self.steps {
            match step {
                Step::SetHeader(_, expr) | Step::SetProperty(_, expr) | Step::SetBody(expr) => {
                    init(expr.init(context))?
                }
                Step::Filter(predicate) => init(predicate.init(context))?,
                Step::Process(_) | Step::To(_) => {}
            }
        }
        Ok(())
    }

    /// Runs `exchange` through every step.
    ///
    /// Only a missing target endpoint or a failing endpoint is an `Err`; step
    /// failures are recorded on the exchange.
    pub fn dispatch(&self, context: &Context, exchange: &mut Exchange) -> Result<(), RouteError> {
        let span = tracing::info_span!("Route", relay.route = %self.source);
        let _entered = span.enter();

        for step in &self.steps {
            if exchange.is_failed() {
                tracing::debug!(exchange = %exchange, "Exchange failed, stopping route");
                break;
            }
            match step {
                Step::Process(processor) => {
                    if let Err(error) = processor.process(exchange) {
                        exchange.set_exception(error);
                    }
                }
                Step::SetHeader(name, expr) => match expr.evaluate(exchange) {
                    Ok(value) => exchange.set_header(name.clone(), value),
                    Err(error) => exchange.set_exception(error.into()),
                },
                Step::SetProperty(name, expr) => match expr.evaluate(exchange) {
                    Ok(value) => exchange.set_property(name.clone(), value),
                    Err(error) => exchange.set_exception(error.into()),
                },
                Step::SetBody(expr) => match expr.evaluate(exchange) {
                    Ok(value) => exchange.set_body(value),
                    Err(error) => exchange.set_exception(error.into()),
                },
                Step::Filter(predicate) => match predicate.matches(exchange) {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::debug!(exchange = %exchange, filter = %predicate, "Filtered out");
                        return Ok(());
                    }
                    Err(error) => exchange.set_exception(error.into()),
                },
                Step::To(uri) => {
                    let endpoint = context
                        .endpoint(uri)
                        .ok_or_else(|| RouteError::NoEndpoint(uri.clone()))?;
                    tracing::trace!(endpoint = %uri, exchange = %exchange, "Sending");
                    endpoint
                        .process(exchange)
                        .map_err(|source| RouteError::Failed {
                            uri: uri.clone(),
                            source,
                        })?;
                }
            }
        }
        Ok(())
    }

    /// Initializes the route and registers it as the endpoint for its source URI.
    pub fn install(self, context: &Arc<Context>) -> Result<EndpointRef, RouteError> {
        self.init(context)?;
        let endpoint: EndpointRef = Arc::new(RouteEndpoint {
            route: self,
            context: Arc::downgrade(context),
        });
        context.add_endpoint(endpoint.clone());
        Ok(endpoint)
    }
}

/// A route registered as the consumer of its source URI.
struct RouteEndpoint {
    route: Route,
    context: Weak<Context>,
}

impl Endpoint for RouteEndpoint {
    fn uri(&self) -> &str {
        &self.route.source
    }

    fn process(&self, exchange: &mut Exchange) -> anyhow::Result<()> {
        let context = self
            .context
            .upgrade()
            .ok_or_else(|| RouteError::ContextDropped(self.route.source.clone()))?;
        self.route.dispatch(&context, exchange)?;
        Ok(())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
