//! Routing decisions

pub mod resolver;

pub use resolver::{resolve, RoutingResolver, DOMAIN_NOT_CONFIGURED};
