//! Queue module - admission control for the shared pipeline

pub mod request_queue;

pub use request_queue::{GenerationQueue, QueueConfig, QueueStats};
