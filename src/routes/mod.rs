pub mod middleware;
pub mod routes;

pub use routes::{api_router, routes};

/// Version prefix every API route lives under.
pub const API_PREFIX: &str = "/v1";
