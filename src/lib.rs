//! Near-duplicate image detection for scoped content streams.
//!
//! Archived images are fingerprinted, indexed per scope, and the first
//! reappearance of an image within a scope is announced once.

pub mod config;
pub mod core;
pub mod logging;
pub mod services;

pub use config::AppConfig;
pub use services::{Pipeline, PipelineSettings};
