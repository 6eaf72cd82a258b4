//! Generation module - request validation, inference, persistence, encoding

pub mod encoding;
pub mod output;
pub mod request;
pub mod service;

pub use output::OutputStore;
pub use request::{GenerationRequest, GenerationResult, DEFAULT_MAX_SIDE, UNSEEDED};
pub use service::GenerationService;
