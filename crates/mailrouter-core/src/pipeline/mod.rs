//! Routing pipeline

pub mod headers;
pub mod processor;
pub mod source;

pub use processor::{MessageProcessor, ProcessingAction, ProcessingOutcome};
pub use source::{ExtraHeaders, MessageSource, TerminalError, TerminalGuard};
