//! Sequential batches
//!
//! Steps run strictly in order against one shared [`Context`]. Before each
//! step the engine writes the sequence metadata keys; after it, an object
//! payload is merged into the context for later steps.

use std::time::Instant;

use chrono::Utc;
use jump_types::{ErrorKind, SequenceRecord, StepOutcome};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::Engine;
use crate::context::{Context, PREVIOUS_RESULTS, SEQUENCE_ID, SEQUENCE_POSITION};
use crate::error::HistoryError;

/// When a failing step stops a sequential run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AbortPolicy {
    /// Stop on parse, unknown-command and missing-context failures only
    #[default]
    CriticalOnly,
    /// Stop on the first failure of any kind
    AnyFailure,
}

impl AbortPolicy {
    pub fn should_abort(&self, kind: ErrorKind) -> bool {
        match self {
            AbortPolicy::CriticalOnly => kind.is_critical(),
            AbortPolicy::AnyFailure => true,
        }
    }
}

impl Engine {
    /// Run `commands` in order, threading `context` through every step.
    ///
    /// A [`SequenceRecord`] is always produced and appended to the sequence
    /// history, whether the run completed or was aborted.
    pub fn execute_sequential(&self, commands: &[String], context: &mut Context) -> SequenceRecord {
        self.run_sequence(commands, context, AbortPolicy::CriticalOnly)
    }

    pub fn run_sequence(
        &self,
        commands: &[String],
        context: &mut Context,
        policy: AbortPolicy,
    ) -> SequenceRecord {
        let id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();
        info!("Sequence {} starting ({} commands)", id, commands.len());

        context.set_reserved(SEQUENCE_ID, json!(id.to_string()));
        let mut steps: Vec<StepOutcome> = Vec::with_capacity(commands.len());

        for (position, command) in commands.iter().enumerate() {
            context.set_reserved(SEQUENCE_POSITION, json!(position));
            context.set_reserved(
                PREVIOUS_RESULTS,
                serde_json::to_value(&steps).unwrap_or_else(|_| Value::Array(Vec::new())),
            );

            let result = self.execute(command, context);
            if result.success {
                let merged = context.merge_result(&result.data);
                if !merged.is_empty() {
                    debug!("Step {} merged context keys {:?}", position, merged);
                }
            }
            steps.push(StepOutcome::from_result(position, &result));

            if let Some(kind) = result.error_kind() {
                if policy.should_abort(kind) {
                    warn!(
                        "Sequence {} aborted at step {} ({}): {}",
                        id,
                        position,
                        command,
                        result.message().unwrap_or_default()
                    );
                    break;
                }
            }
        }

        let record = SequenceRecord::new(
            id,
            commands.to_vec(),
            steps,
            started.elapsed().as_millis() as u64,
            started_at,
        );
        info!(
            "Sequence {} finished: {}/{} steps, success rate {:.2}",
            id,
            record.steps.len(),
            commands.len(),
            record.success_rate
        );
        self.sequences.push(record.clone());
        record
    }

    /// The last `limit` sequence records, oldest first
    pub fn sequence_history(&self, limit: usize) -> Vec<SequenceRecord> {
        self.sequences.recent(limit)
    }

    /// Completed runs in which every step succeeded
    pub fn find_successful_sequences(&self) -> Vec<SequenceRecord> {
        self.sequences.filter(SequenceRecord::is_fully_successful)
    }

    /// Re-run the commands of a stored record (0 = oldest retained).
    ///
    /// The replay is recorded as a new sequence.
    pub fn replay_sequence(
        &self,
        index: usize,
        context: &mut Context,
    ) -> Result<SequenceRecord, HistoryError> {
        let record = self.sequences.get(index).ok_or(HistoryError::OutOfRange {
            index,
            len: self.sequences.len(),
        })?;
        info!("Replaying sequence {} as a new run", record.id);
        Ok(self.execute_sequential(&record.commands, context))
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::test_engine;
    use super::*;
    use crate::config::EngineConfig;
    use pretty_assertions::assert_eq;

    fn cmds(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_critical_failure_aborts() {
        let engine = test_engine(EngineConfig::default());
        let mut ctx = Context::new();
        let record = engine.execute_sequential(&cmds(&["@echo:a=1", "@nope", "@echo:b=2"]), &mut ctx);

        assert_eq!(record.steps.len(), 2);
        assert!(!record.completed);
        assert_eq!(record.success_rate, 0.5);
    }

    #[test]
    fn test_parse_failure_aborts() {
        let engine = test_engine(EngineConfig::default());
        let mut ctx = Context::new();
        let record = engine.execute_sequential(&cmds(&["@echo:a=1", "bad", "@echo:c=3"]), &mut ctx);

        assert_eq!(record.steps.len(), 2);
        assert!(!record.completed);
        assert_eq!(record.steps[1].error.as_ref().unwrap().kind, ErrorKind::Parse);
        assert_eq!(ctx.get("c"), None);
    }

    #[test]
    fn test_missing_context_aborts() {
        let engine = test_engine(EngineConfig::default());
        engine
            .registry()
            .register(
                crate::registry::HandlerDescriptor::new(
                    "deploy",
                    |_: &jump_types::Params, _: &Context| -> anyhow::Result<Value> {
                        Ok(json!({"deployed": true}))
                    },
                )
                .with_required_context("env"),
            )
            .unwrap();

        let mut ctx = Context::new();
        let record = engine.execute_sequential(&cmds(&["@echo:a=1", "@deploy", "@echo:c=3"]), &mut ctx);

        assert_eq!(record.steps.len(), 2);
        assert!(!record.completed);
        assert_eq!(
            record.steps[1].error.as_ref().unwrap().kind,
            ErrorKind::MissingContext
        );
    }

    #[test]
    fn test_handler_failure_continues() {
        let engine = test_engine(EngineConfig::default());
        let mut ctx = Context::new();
        let record = engine.execute_sequential(&cmds(&["@echo:a=1", "@fail", "@echo:b=2"]), &mut ctx);

        assert_eq!(record.steps.len(), 3);
        assert!(record.completed);
        assert!(!record.is_fully_successful());
        assert_eq!(record.steps[1].error.as_ref().unwrap().kind, ErrorKind::Handler);
    }

    #[test]
    fn test_results_merge_into_context() {
        let engine = test_engine(EngineConfig::default());
        let mut ctx = Context::new();
        engine.execute_sequential(&cmds(&["@echo:agent=a1", "@echo:task=t9"]), &mut ctx);

        assert_eq!(ctx.get("agent"), Some(&json!("a1")));
        assert_eq!(ctx.get("task"), Some(&json!("t9")));
        assert_eq!(ctx.get(SEQUENCE_POSITION), Some(&json!(1)));
        let previous = ctx.get(PREVIOUS_RESULTS).unwrap().as_array().unwrap();
        assert_eq!(previous.len(), 1);
    }

    #[test]
    fn test_protected_keys_not_overwritten_by_results() {
        let engine = test_engine(EngineConfig::default());
        let mut ctx = Context::new();
        let record = engine.execute_sequential(&cmds(&["@echo:sequenceId=hijack"]), &mut ctx);

        assert!(record.steps[0].success);
        assert_eq!(ctx.get(SEQUENCE_ID), Some(&json!(record.id.to_string())));
    }

    #[test]
    fn test_any_failure_policy() {
        let engine = test_engine(EngineConfig::default());
        let mut ctx = Context::new();
        let record = engine.run_sequence(
            &cmds(&["@fail", "@echo:a=1"]),
            &mut ctx,
            AbortPolicy::AnyFailure,
        );
        assert_eq!(record.steps.len(), 1);
        assert!(!record.completed);
    }

    #[test]
    fn test_sequence_history_and_replay() {
        let engine = test_engine(EngineConfig::default());
        let mut ctx = Context::new();
        engine.execute_sequential(&cmds(&["@echo:a=1"]), &mut ctx);
        engine.execute_sequential(&cmds(&["@echo:a=1", "@fail"]), &mut ctx);

        assert_eq!(engine.sequence_history(10).len(), 2);
        assert_eq!(engine.find_successful_sequences().len(), 1);

        let replayed = engine.replay_sequence(1, &mut Context::new()).unwrap();
        assert_eq!(replayed.commands, cmds(&["@echo:a=1", "@fail"]));
        assert_eq!(engine.sequence_history(10).len(), 3);

        assert_eq!(
            engine.replay_sequence(7, &mut ctx).unwrap_err(),
            HistoryError::OutOfRange { index: 7, len: 3 }
        );
    }
}
