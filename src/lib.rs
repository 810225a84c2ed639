//! Jump Code - compact command dispatch
//!
//! Parses jump codes (`@name:key=value,...`), resolves them against a
//! registry of aliased handlers and runs them singly, asynchronously, as an
//! ordered batch sharing a context, or as a bounded parallel batch. Macros
//! expand named templates into batches; every attempt lands in a bounded
//! history.
//!
//! ## Call Chain
//! raw string -> parser -> CommandInvocation -> Registry::execute -> ExecutionResult -> history
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use jumpcode::{Context, Engine, EngineConfig, HandlerDescriptor, Params};
//! use serde_json::{json, Value};
//!
//! let engine = Engine::with_builtins(EngineConfig::default()).unwrap();
//! engine
//!     .registry()
//!     .register(
//!         HandlerDescriptor::new("greet", |p: &Params, _: &Context| -> anyhow::Result<Value> {
//!             Ok(json!({"hello": p.get_str("who").unwrap_or("world")}))
//!         })
//!         .with_alias("g"),
//!     )
//!     .unwrap();
//!
//! let result = engine.execute("@g:who=ana", &Context::new());
//! assert!(result.success);
//! ```

// Core error handling
pub mod error;

// Command text -> invocation
pub mod parser;

// Handlers, aliases and dispatch
pub mod registry;

// Shared state for sequential runs
pub mod context;

// Ring buffers for attempts and sequences
pub mod history;

// Named command templates
pub mod macros;

// Sync, async, sequential and parallel execution
pub mod engine;

// status/help/list/exec_macro/list_macros
pub mod builtin;

pub mod config;

pub use jump_types::{
    AttemptRecord, CommandInvocation, ErrorInfo, ErrorKind, ExecutionResult, ParallelBatchResult,
    ParamValue, Params, SequenceRecord, StepOutcome,
};

pub use config::EngineConfig;
pub use context::Context;
pub use engine::{
    AbortPolicy, Engine, InlineExpansion, InputOutcome, MacroRun, MacroStepFailure,
    ParallelOptions, PendingExecution,
};
pub use error::{DefinitionError, DispatchError, HistoryError};
pub use macros::{MacroDefinition, MacroRegistry, MacroSummary};
pub use parser::parse_command;
pub use registry::{CommandHandler, CommandSummary, HandlerDescriptor, Registration, Registry};
