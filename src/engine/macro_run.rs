//! Macro execution: expand, then run as a sequential batch that stops at the
//! first failing step.

use jump_types::{ErrorInfo, ErrorKind, Params, SequenceRecord};
use serde::Serialize;
use tracing::{info, warn};

use super::{AbortPolicy, Engine};
use crate::context::Context;
use crate::error::DispatchError;

/// The step that stopped a macro run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MacroStepFailure {
    pub position: usize,
    /// Template as defined, before substitution
    pub template: String,
    /// Command that actually ran
    pub command: String,
    pub error: ErrorInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MacroRun {
    pub name: String,
    pub parameters: Params,
    pub commands: Vec<String>,
    pub record: SequenceRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<MacroStepFailure>,
}

impl MacroRun {
    pub fn succeeded(&self) -> bool {
        self.failed.is_none() && self.record.completed
    }
}

impl Engine {
    /// Expand macro `name` with `values` and run the commands in order.
    ///
    /// The run gets its own copy of `context` one nesting level deeper, so
    /// step results do not leak back to the caller. Expansion errors and the
    /// nesting limit are returned as `Err`; step failures end up in
    /// [`MacroRun::failed`].
    pub fn run_macro(
        &self,
        name: &str,
        values: &Params,
        context: &Context,
    ) -> Result<MacroRun, DispatchError> {
        let mut scoped = context.nested();
        if scoped.depth() > self.config.max_nesting_depth {
            warn!(
                "Refusing to run macro '{}' at nesting depth {}",
                name,
                scoped.depth()
            );
            return Err(DispatchError::NestingLimit {
                depth: scoped.depth(),
                limit: self.config.max_nesting_depth,
            });
        }

        let templates = self
            .macros
            .get(name)
            .map(|def| def.templates)
            .ok_or_else(|| DispatchError::UnknownMacro {
                name: name.to_string(),
            })?;
        let commands = self.macros.expand(name, values)?;
        info!("Running macro '{}' ({} steps)", name, commands.len());

        let record = self.run_sequence(&commands, &mut scoped, AbortPolicy::AnyFailure);
        let failed = record.failed_steps().next().map(|step| MacroStepFailure {
            position: step.position,
            template: templates.get(step.position).cloned().unwrap_or_default(),
            command: step.code.clone(),
            error: step
                .error
                .clone()
                .unwrap_or_else(|| ErrorInfo::new(ErrorKind::Handler, "step failed")),
        });
        if let Some(failure) = &failed {
            warn!(
                "Macro '{}' failed at step {} ({}): {}",
                name, failure.position, failure.command, failure.error
            );
        }

        Ok(MacroRun {
            name: name.to_string(),
            parameters: values.clone(),
            commands,
            record,
            failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::test_engine;
    use super::*;
    use crate::config::EngineConfig;
    use pretty_assertions::assert_eq;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_macro_runs_expanded_commands() {
        let engine = test_engine(EngineConfig::default());
        engine
            .macros()
            .define("pair", strings(&["@echo:role=${r}", "@echo:n=2"]), "", None)
            .unwrap();

        let run = engine
            .run_macro("pair", &Params::new().with("r", "dev"), &Context::new())
            .unwrap();
        assert!(run.succeeded());
        assert_eq!(run.commands, strings(&["@echo:role=dev", "@echo:n=2"]));
        assert_eq!(run.record.steps.len(), 2);
    }

    #[test]
    fn test_macro_stops_at_first_failure() {
        let engine = test_engine(EngineConfig::default());
        engine
            .macros()
            .define("risky", strings(&["@echo:a=1", "@fail", "@echo:b=${b}"]), "", None)
            .unwrap();

        let run = engine
            .run_macro("risky", &Params::new().with("b", 2i64), &Context::new())
            .unwrap();
        assert!(!run.succeeded());
        assert_eq!(run.record.steps.len(), 2);

        let failure = run.failed.unwrap();
        assert_eq!(failure.position, 1);
        assert_eq!(failure.template, "@fail");
        assert_eq!(failure.error.kind, ErrorKind::Handler);
    }

    #[test]
    fn test_macro_context_does_not_leak() {
        let engine = test_engine(EngineConfig::default());
        engine
            .macros()
            .define("set", strings(&["@echo:leaked=yes"]), "", None)
            .unwrap();

        let ctx = Context::new();
        engine.run_macro("set", &Params::new(), &ctx).unwrap();
        assert!(!ctx.contains_key("leaked"));
    }

    #[test]
    fn test_expansion_errors() {
        let engine = test_engine(EngineConfig::default());
        engine
            .macros()
            .define("m", strings(&["@echo:r=${r}"]), "", None)
            .unwrap();

        let err = engine.run_macro("m", &Params::new(), &Context::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingParameter);

        let err = engine.run_macro("ghost", &Params::new(), &Context::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownMacro);
        assert_eq!(engine.sequence_history(10).len(), 0);
    }
}
