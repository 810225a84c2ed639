//! Execution Engine
//!
//! Drives the parser and registry for single invocations and composes them
//! into batches. Every mode funnels through [`Engine::execute`], so parse,
//! resolve and context validation always run.
//!
//! ```text
//! execute            parse ─► registry.execute ─► ExecutionResult ─► history
//! execute_async      same, on the tokio blocking pool
//! execute_sequential execute × N, shared Context, abort on critical kinds
//! execute_parallel   execute × N, bounded workers, deadline, fail-fast
//! run_macro          expand ─► sequential, abort on any failure
//! process_input      free-form text ─► one of the above
//! ```
//!
//! The engine is always held as `Arc<Engine>`; async and parallel modes move
//! a clone of the `Arc` onto worker threads.

mod input;
mod macro_run;
mod parallel;
mod sequential;

pub use input::{InlineExpansion, InputOutcome};
pub use macro_run::{MacroRun, MacroStepFailure};
pub use parallel::ParallelOptions;
pub use sequential::AbortPolicy;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;
use std::time::Instant;

use jump_types::{AttemptRecord, ErrorInfo, ErrorKind, ExecutionResult, SequenceRecord};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::EngineConfig;
use crate::context::Context;
use crate::error::DefinitionError;
use crate::history::BoundedLog;
use crate::macros::MacroRegistry;
use crate::parser::parse_command;
use crate::registry::{Registration, Registry};

pub struct Engine {
    registry: Arc<Registry>,
    macros: Arc<MacroRegistry>,
    config: EngineConfig,
    history: BoundedLog<AttemptRecord>,
    sequences: BoundedLog<SequenceRecord>,
}

impl Engine {
    pub fn new(
        registry: Arc<Registry>,
        macros: Arc<MacroRegistry>,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            history: BoundedLog::new(config.history_capacity),
            sequences: BoundedLog::new(config.sequence_history_capacity),
            registry,
            macros,
            config,
        })
    }

    /// Engine over fresh registries with the built-in commands installed
    pub fn with_builtins(config: EngineConfig) -> Result<Arc<Self>, DefinitionError> {
        let engine = Self::new(
            Arc::new(Registry::new()),
            Arc::new(MacroRegistry::new()),
            config,
        );
        engine.install_builtins()?;
        Ok(engine)
    }

    /// Register `status`, `help`, `list`, `exec_macro` and `list_macros`
    pub fn install_builtins(self: &Arc<Self>) -> Result<Vec<Registration>, DefinitionError> {
        crate::builtin::install(self)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn macros(&self) -> &Arc<MacroRegistry> {
        &self.macros
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========================================================================
    // Single dispatch
    // ========================================================================

    /// Parse and run one jump code, blocking until the handler returns.
    ///
    /// Never fails: every error becomes a `success = false` result. Exactly
    /// one history entry is appended.
    pub fn execute(&self, command: &str, context: &Context) -> ExecutionResult {
        let started = Instant::now();
        let outcome = parse_command(command)
            .and_then(|invocation| self.registry.execute(&invocation, context));
        let elapsed = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(data) => ExecutionResult::succeeded(command, data, elapsed),
            Err(err) => ExecutionResult::failed(command, err.to_info(), elapsed),
        };

        match &result.error {
            None => debug!("{} succeeded in {}ms", command, elapsed),
            Some(err) => debug!("{} failed in {}ms: {}", command, elapsed, err),
        }
        self.history.push(AttemptRecord::from(&result));
        result
    }

    /// Run one jump code on the blocking pool without blocking the caller.
    ///
    /// Must be called from within a tokio runtime.
    pub fn execute_async(
        self: &Arc<Self>,
        command: impl Into<String>,
        context: Context,
    ) -> PendingExecution {
        self.spawn_dispatch(command.into(), Arc::new(context))
    }

    pub(crate) fn spawn_dispatch(
        self: &Arc<Self>,
        command: String,
        context: Arc<Context>,
    ) -> PendingExecution {
        let engine = Arc::clone(self);
        let task_command = command.clone();
        let handle = tokio::task::spawn_blocking(move || engine.execute(&task_command, &context));
        PendingExecution { command, handle }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Canonical names and aliases, sorted
    pub fn list_commands(&self) -> Vec<String> {
        self.registry.list_commands()
    }

    /// The last `limit` attempts, oldest first
    pub fn history(&self, limit: usize) -> Vec<AttemptRecord> {
        self.history.recent(limit)
    }

    /// Success rate over the attempt history (0.0 when empty)
    pub fn success_rate(&self) -> f64 {
        self.history.success_rate()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("macros", &self.macros.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Pending handle for async dispatch
// ============================================================================

/// Resolves to the [`ExecutionResult`] of an async dispatch
#[derive(Debug)]
pub struct PendingExecution {
    command: String,
    handle: JoinHandle<ExecutionResult>,
}

impl PendingExecution {
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Future for PendingExecution {
    type Output = ExecutionResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        let polled = Pin::new(&mut self.handle).poll(cx);
        match polled {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // panics are caught inside the registry, so this is cancellation
            Poll::Ready(Err(err)) => Poll::Ready(ExecutionResult::failed(
                self.command.clone(),
                ErrorInfo::new(ErrorKind::Handler, format!("Task failed: {}", err)),
                0,
            )),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
