pub mod cors;
pub mod rate_limit;
pub mod validation;

pub use cors::create_cors_layer;
pub use rate_limit::{rate_limit_middleware, RateLimitLayer};
pub use validation::ValidatedJson;
