//! Parallel batches
//!
//! ```text
//!  pending (input order) ──► in flight (≤ max_workers) ──► results
//!                                  │
//!                 deadline ────────┤ timeout: in flight + pending -> TimeoutError
//!                 fail_fast ───────┘ first failure: stop launching and waiting
//! ```
//!
//! Handlers run on the tokio blocking pool and see one shared, read-only
//! [`Context`]. Stopping early never interrupts a running handler; it only
//! stops the batch from waiting on it.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use jump_types::{ExecutionResult, ParallelBatchResult};
use tracing::{debug, info, warn};

use super::Engine;
use crate::context::Context;
use crate::error::DispatchError;

/// Knobs for [`Engine::execute_parallel`]; `None` falls back to the engine config
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParallelOptions {
    pub timeout_ms: Option<u64>,
    pub fail_fast: bool,
    pub max_workers: Option<usize>,
}

impl ParallelOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers);
        self
    }
}

impl Engine {
    /// Run `commands` concurrently and collect results keyed by command.
    ///
    /// Duplicate commands run once. Tasks launch in input order, at most
    /// `max_workers` at a time. `completed` counts tasks whose real outcome
    /// arrived before the batch stopped waiting.
    pub async fn execute_parallel(
        self: &Arc<Self>,
        commands: Vec<String>,
        context: Context,
        options: ParallelOptions,
    ) -> ParallelBatchResult {
        let started = Instant::now();
        let timeout_ms = options.timeout_ms.unwrap_or(self.config.default_timeout_ms);
        let max_workers = options.max_workers.unwrap_or(self.config.max_workers).max(1);
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);

        let mut seen = HashSet::new();
        let commands: Vec<String> = commands
            .into_iter()
            .filter(|c| seen.insert(c.clone()))
            .collect();
        let total = commands.len();
        info!(
            "Parallel batch starting: {} tasks, {} workers, timeout {}ms, fail_fast={}",
            total, max_workers, timeout_ms, options.fail_fast
        );

        let context = Arc::new(context);
        let mut pending = commands.into_iter();
        let mut running: HashSet<String> = HashSet::new();
        let mut in_flight = FuturesUnordered::new();
        let mut results: BTreeMap<String, ExecutionResult> = BTreeMap::new();
        let mut failed = false;
        let mut timed_out = false;

        loop {
            while in_flight.len() < max_workers {
                let Some(command) = pending.next() else { break };
                debug!("Launching {}", command);
                let task = self.spawn_dispatch(command.clone(), Arc::clone(&context));
                running.insert(command.clone());
                in_flight.push(async move { (command, task.await) });
            }
            if in_flight.is_empty() {
                break;
            }

            match tokio::time::timeout_at(deadline, in_flight.next()).await {
                Ok(Some((command, result))) => {
                    running.remove(&command);
                    let task_failed = !result.success;
                    results.insert(command.clone(), result);
                    if task_failed && options.fail_fast {
                        warn!("Parallel batch fail-fast triggered by {}", command);
                        failed = true;
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Parallel batch timed out after {}ms with {} tasks unfinished",
                        timeout_ms,
                        total - results.len()
                    );
                    timed_out = true;
                    break;
                }
            }
        }

        let completed = results.len();
        if timed_out {
            let timeout = DispatchError::Timeout { timeout_ms }.to_info();
            for command in running.into_iter().chain(pending) {
                let result = ExecutionResult::failed(command.clone(), timeout.clone(), timeout_ms);
                results.insert(command, result);
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "Parallel batch finished: {}/{} completed in {}ms",
            completed, total, duration_ms
        );
        ParallelBatchResult {
            results,
            completed,
            total,
            failed,
            timed_out,
            duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::test_engine;
    use super::*;
    use crate::config::EngineConfig;
    use crate::registry::HandlerDescriptor;
    use jump_types::{ErrorKind, Params};
    use serde_json::{json, Value};

    fn cmds(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn register_sleep(engine: &Arc<Engine>) {
        engine
            .registry()
            .register(HandlerDescriptor::new(
                "sleep",
                |p: &Params, _: &Context| -> anyhow::Result<Value> {
                    let ms = p.get_i64("ms").unwrap_or(0) as u64;
                    std::thread::sleep(Duration::from_millis(ms));
                    Ok(json!({"slept": ms}))
                },
            ))
            .unwrap();
    }

    #[tokio::test]
    async fn test_all_tasks_complete() {
        let engine = test_engine(EngineConfig::default());
        let batch = engine
            .execute_parallel(
                cmds(&["@echo:a=1", "@echo:b=2", "@fail", "@echo:a=1"]),
                Context::new(),
                ParallelOptions::new(),
            )
            .await;

        assert_eq!(batch.total, 3);
        assert_eq!(batch.completed, 3);
        assert!(!batch.failed);
        assert!(!batch.timed_out);
        assert_eq!(batch.failures(), 1);
        assert_eq!(batch.get("@echo:b=2").unwrap().data, json!({"b": 2}));
    }

    #[tokio::test]
    async fn test_fail_fast_stops_launching() {
        let engine = test_engine(EngineConfig::default());
        let batch = engine
            .execute_parallel(
                cmds(&["@fail", "@echo:a=1", "@echo:b=2"]),
                Context::new(),
                ParallelOptions::new().with_fail_fast(true).with_max_workers(1),
            )
            .await;

        assert!(batch.failed);
        assert_eq!(batch.completed, 1);
        assert!(batch.completed < batch.total);
        assert!(batch.get("@echo:a=1").is_none());
        assert!(batch.get("@echo:b=2").is_none());
    }

    #[tokio::test]
    async fn test_fail_fast_with_tasks_in_flight() {
        let engine = test_engine(EngineConfig::default());
        register_sleep(&engine);

        let batch = engine
            .execute_parallel(
                cmds(&["@fail", "@sleep:ms=400", "@echo:a=1"]),
                Context::new(),
                ParallelOptions::new().with_fail_fast(true).with_max_workers(2),
            )
            .await;

        assert!(batch.failed);
        assert!(!batch.timed_out);
        assert_eq!(batch.total, 3);
        assert_eq!(batch.completed, 1);
        assert_eq!(batch.get("@fail").unwrap().error_kind(), Some(ErrorKind::Handler));
        // launched but not waited on
        assert!(batch.get("@sleep:ms=400").is_none());
        // never launched
        assert!(batch.get("@echo:a=1").is_none());
    }

    #[tokio::test]
    async fn test_timeout_marks_unfinished_tasks() {
        let engine = test_engine(EngineConfig::default());
        register_sleep(&engine);

        let batch = engine
            .execute_parallel(
                cmds(&["@echo:a=1", "@sleep:ms=800", "@sleep:ms=801"]),
                Context::new(),
                ParallelOptions::new().with_timeout_ms(100).with_max_workers(2),
            )
            .await;

        assert!(batch.timed_out);
        assert_eq!(batch.completed, 1);
        assert_eq!(batch.results.len(), 3);
        assert!(batch.get("@echo:a=1").unwrap().success);
        for slow in ["@sleep:ms=800", "@sleep:ms=801"] {
            assert_eq!(batch.get(slow).unwrap().error_kind(), Some(ErrorKind::Timeout));
        }
    }

    #[tokio::test]
    async fn test_shared_context_is_visible() {
        let engine = test_engine(EngineConfig::default());
        engine
            .registry()
            .register(
                HandlerDescriptor::new("whoami", |_: &Params, ctx: &Context| -> anyhow::Result<Value> {
                    Ok(json!({"user": ctx.get("user").cloned()}))
                })
                .with_required_context("user"),
            )
            .unwrap();

        let batch = engine
            .execute_parallel(
                cmds(&["@whoami"]),
                Context::new().with("user", "ana"),
                ParallelOptions::new(),
            )
            .await;
        assert_eq!(batch.get("@whoami").unwrap().data, json!({"user": "ana"}));
    }
}
