//! Free-form input routing
//!
//! ```text
//! "@name:k=v"            single dispatch (macro of the same name if no handler)
//! "!name(k=v, k2=v2)"    macro run; "!name" alone when there are no parameters
//! "go @@a @@b:x=1"       sequential batch of every @@ token
//! "see {@status} now"    inline codes run and replaced by a summary
//! ```
//!
//! Anything else is not jump code input and yields `None`.

use std::sync::LazyLock;

use jump_types::{ExecutionResult, ParamValue, Params, SequenceRecord};
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::{Engine, MacroRun};
use crate::context::Context;
use crate::error::DispatchError;
use crate::parser::parse_command;

static MACRO_CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^!(\w+)(?:\(([^)]*)\))?$").expect("macro call pattern compiles")
});
static SEQUENCE_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@@(\S+)").expect("sequence token pattern compiles"));
static INLINE_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{@([^}]+)\}").expect("inline code pattern compiles"));

/// Text with its inline codes executed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InlineExpansion {
    pub original_text: String,
    /// Successful codes replaced by `[summary]`; failed ones left as written
    pub processed_text: String,
    pub results: Vec<ExecutionResult>,
}

/// What [`Engine::process_input`] ran
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputOutcome {
    Single(ExecutionResult),
    Macro(MacroRun),
    Sequence(SequenceRecord),
    Inline(InlineExpansion),
}

impl InputOutcome {
    pub fn succeeded(&self) -> bool {
        match self {
            InputOutcome::Single(result) => result.success,
            InputOutcome::Macro(run) => run.succeeded(),
            InputOutcome::Sequence(record) => record.is_fully_successful(),
            InputOutcome::Inline(inline) => inline.results.iter().all(|r| r.success),
        }
    }
}

impl Engine {
    /// Route one line of user input to the matching execution mode.
    ///
    /// Macro expansion failures come back as `Err`; everything that reaches
    /// a handler is reported inside the outcome. Sequences write into
    /// `context` the same way [`Engine::execute_sequential`] does.
    pub fn process_input(
        &self,
        input: &str,
        context: &mut Context,
    ) -> Result<Option<InputOutcome>, DispatchError> {
        let input = input.trim();

        if input.starts_with('@') && !input.starts_with("@@") {
            return self.process_single(input, context).map(Some);
        }

        if let Some(caps) = MACRO_CALL_RE.captures(input) {
            let params = parse_macro_arguments(caps.get(2).map_or("", |m| m.as_str()));
            debug!("Macro shorthand for '{}'", &caps[1]);
            return self
                .run_macro(&caps[1], &params, context)
                .map(|run| Some(InputOutcome::Macro(run)));
        }

        let codes: Vec<String> = SEQUENCE_TOKEN_RE
            .captures_iter(input)
            .map(|caps| format!("@{}", &caps[1]))
            .collect();
        if !codes.is_empty() {
            let record = self.execute_sequential(&codes, context);
            return Ok(Some(InputOutcome::Sequence(record)));
        }

        if INLINE_CODE_RE.is_match(input) {
            return Ok(Some(InputOutcome::Inline(self.process_inline(input, context))));
        }

        Ok(None)
    }

    fn process_single(&self, input: &str, context: &Context) -> Result<InputOutcome, DispatchError> {
        if let Ok(invocation) = parse_command(input) {
            let name = invocation.name();
            if !self.registry.contains(name) && self.macros.contains(name) {
                debug!("No handler for '{}', running macro of the same name", name);
                return self
                    .run_macro(name, invocation.params(), context)
                    .map(InputOutcome::Macro);
            }
        }
        Ok(InputOutcome::Single(self.execute(input, context)))
    }

    fn process_inline(&self, text: &str, context: &Context) -> InlineExpansion {
        let mut results = Vec::new();
        let processed = INLINE_CODE_RE.replace_all(text, |caps: &Captures| {
            let result = self.execute(&format!("@{}", &caps[1]), context);
            let replacement = if result.success {
                format!("[{}]", inline_summary(&result.data))
            } else {
                caps[0].to_string()
            };
            results.push(result);
            replacement
        });

        InlineExpansion {
            original_text: text.to_string(),
            processed_text: processed.into_owned(),
            results,
        }
    }
}

/// `k=v, k2=v2` with values kept as written; entries without `=` are dropped
fn parse_macro_arguments(arguments: &str) -> Params {
    arguments
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), ParamValue::Str(v.trim().to_string())))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

fn inline_summary(data: &Value) -> String {
    match data.get("message") {
        Some(Value::String(message)) => message.clone(),
        _ => "Executed".to_string(),
    }
}
