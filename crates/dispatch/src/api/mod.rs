//! HTTP API for the dispatch service

pub mod handlers;
pub mod routes;

pub use handlers::DispatchApiState;
pub use routes::{create_coordinator_router, create_router};
