//! Content classification
//!
//! Wraps an opaque inference service behind `InferenceClient` and degrades to
//! deterministic defaults whenever it is absent or misbehaves.

pub mod engine;
pub mod inference;
pub mod prompts;

pub use engine::ClassificationEngine;
pub use inference::{HttpInferenceClient, InferenceClient, InferenceError};
