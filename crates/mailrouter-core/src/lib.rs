//! MailRouter Core - routing decisions for inbound mail
//!
//! This crate holds the decision engine: rate limiting, spam heuristics,
//! classification, routing resolution, workstream dispatch and the
//! best-effort analytics/alert side channel, tied together by the pipeline.

pub mod classify;
pub mod dispatch;
pub mod notify;
pub mod pipeline;
pub mod ratelimit;
pub mod routing;
pub mod spam;
pub mod webhook;

pub use classify::{ClassificationEngine, HttpInferenceClient, InferenceClient, InferenceError};
pub use dispatch::{DispatchOutcome, WorkstreamDispatcher};
pub use notify::{Notifier, RoutingEvent};
pub use pipeline::{MessageProcessor, MessageSource, ProcessingAction, ProcessingOutcome};
pub use ratelimit::{RateLimiter, RateRecord};
pub use routing::RoutingResolver;
pub use spam::SpamFilter;
