pub mod route;
pub mod template;

pub mod prelude {
    pub use crate::route::{Route, RouteError};
    pub use crate::template::ProducerTemplate;
}

pub use route::{Route, RouteError};
pub use template::ProducerTemplate;
