//! Cadence Core -- tool-invocation orchestration kernel
//!
//! This crate turns an assistant message into tool calls and runs them:
//! parsing (inline tags, batch wrappers, JSON execution blocks), dependency
//! resolution, mode-specific execution with retry and fallback, and result
//! aggregation.
//!
//! Side effects live behind the [`tools::ToolRunner`] trait. The `cadence`
//! meta-crate re-exports this crate with a default tool catalogue.

pub mod aggregate;
pub mod condition;
pub mod config;
pub mod engine;
pub mod error;
pub mod parser;
pub mod prelude;
pub mod resilience;
pub mod resolver;
pub mod tools;
pub mod types;

pub use aggregate::{aggregate, aggregate_report, ResultAggregator};
pub use config::EngineConfig;
pub use engine::{EngineEvent, EngineEventPayload, EngineEventSink, ExecutionEngine};
pub use error::{CadenceError, Result};
pub use parser::{MessageParser, ParsedMessage};
pub use resolver::{resolve, Resolution};
