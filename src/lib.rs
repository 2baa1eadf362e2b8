//! FerrousMoat - model residency and query caching in front of a local inference service
//!
//! FerrousMoat keeps a memory-bounded set of language models resident on an
//! Ollama-compatible service, answers repeated or similar questions from a
//! semantic cache, and groups concurrent queries into batches sized by an
//! online cost model.

#![warn(clippy::all)]

pub mod api;
pub mod cache;
pub mod cli;
pub mod config;
pub mod core;
pub mod inference;
pub mod management;
pub mod models;
pub mod plugins;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use crate::api::error::{FerrousMoatError, Result};
pub use crate::config::Config;

/// FerrousMoat version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
