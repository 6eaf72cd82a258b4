//! HTTP API module - handlers and router

pub mod handlers;
pub mod routes;

pub use routes::create_router;
