//! Cadence — tool-call orchestration for LLM coding agents
//!
//! Parses assistant messages into tool invocations, orders them by their
//! dependencies, executes them through a pluggable runner and reports the
//! outcome. This meta-crate re-exports `cadence-core` and adds the standard
//! coding-agent tool catalogue.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use cadence::prelude::*;
//!
//! # async fn example() -> cadence::error::Result<()> {
//! let runner = FnRunner::new(|name, args, _ctx| async move {
//!     Ok(serde_json::json!({ "tool": name, "params": args.raw() }))
//! });
//! let parsed = cadence::default_parser()
//!     .parse_message("<read_file><path>src/main.rs</path></read_file>");
//! let outcome = cadence::default_engine(Arc::new(runner))
//!     .execute_message(parsed, ExecutionOptions::default())
//!     .await?;
//! println!("{}", outcome.report);
//! # Ok(())
//! # }
//! ```

pub mod catalog;

pub use cadence_core::{
    aggregate, condition, config, engine, error, parser, prelude, resilience, resolver, tools,
    types,
};

pub use cadence_core::{
    aggregate_report, resolve, CadenceError, EngineConfig, ExecutionEngine, MessageParser,
    ParsedMessage, Result,
};

pub use catalog::default_catalog;

use std::sync::Arc;

use cadence_core::tools::ToolRunner;

/// Parser recognising the standard tool tags.
pub fn default_parser() -> MessageParser {
    MessageParser::new(default_catalog())
}

/// Engine validating against the standard catalogue and running through
/// `runner`.
pub fn default_engine(runner: Arc<dyn ToolRunner>) -> ExecutionEngine {
    ExecutionEngine::new(default_catalog(), runner)
}

/// Parser and engine sharing one catalogue, both configured from `config`.
pub fn configured(config: &EngineConfig, runner: Arc<dyn ToolRunner>) -> (MessageParser, ExecutionEngine) {
    let catalog = Arc::new(default_catalog());
    (
        MessageParser::from_config(catalog.clone(), config),
        ExecutionEngine::from_config(catalog, runner, config),
    )
}
