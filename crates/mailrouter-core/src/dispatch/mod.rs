//! Workstream dispatch

pub mod workstream;

pub use workstream::{DispatchOutcome, DispatchPayload, WorkstreamDispatcher};
