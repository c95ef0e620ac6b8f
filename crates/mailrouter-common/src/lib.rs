//! MailRouter Common - Shared types and configuration
//!
//! This crate provides the configuration model, error type and the
//! message/decision types shared by every MailRouter component.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
