//! OAP OAL - Observability Analysis Language engine
//!
//! Compiles metric-definition scripts into executable aggregation units:
//! - pest grammar and parser producing metric definitions
//! - schema registry of source scopes, fields and decorators
//! - enricher resolving definitions into code generation models
//! - aggregation function catalog with combine, merge and value semantics
//! - unit and dispatcher generation, storage builder and wire form
//! - debug source emission

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod ast;
pub mod compiler;
pub mod enricher;
pub mod functions;
pub mod generator;
pub mod model;
pub mod parser;
pub mod schema;
pub mod source;
pub mod wire;

pub use compiler::{CompiledOal, OalCompiler, ScriptSource};
pub use functions::{Accumulator, ArgValue, FunctionContext, FunctionKind, MetricValue};
pub use generator::{
    DispatchOutcome, Dispatcher, MetricUnit, MetricUnitType, MetricsSink, StorageBuilder,
    StorageRow, UnitSeed,
};
pub use schema::{default_registry, SchemaRegistry};
pub use source::SourceEvent;
pub use wire::{RemoteData, WIRE_VERSION};
