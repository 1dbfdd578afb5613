//! OAP Stream - runtime side of the analysis core
//!
//! Provides:
//! - Concurrent minute cache of metric units
//! - Stream processor with hour/day rollup and persistence
//! - Storage writer seam with an in-memory implementation
//! - Remote pre-aggregation codec and routing
//! - Analysis engine driving dispatch and the flush loop

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod processor;
pub mod remote;
pub mod storage;

mod engine;

pub use cache::MetricsCache;
pub use engine::AnalysisEngine;
pub use processor::{FlushReport, MetricsStreamProcessor};
pub use storage::{InMemoryStorage, StorageWriter};
