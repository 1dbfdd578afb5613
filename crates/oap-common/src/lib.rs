//! OAP Common - Shared utilities and types
//!
//! This crate provides common functionality used across the analysis core:
//! - Error types for compilation, dispatch and persistence
//! - Configuration management
//! - Runtime counters
//! - Time buckets, values and script locations

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

pub use config::Config;
pub use error::{CompileError, DispatchError, Error, Result};
pub use types::*;
