//! Built-in jump codes
//!
//! | command       | aliases          | payload `type`    |
//! |---------------|------------------|-------------------|
//! | `status`      | `s`, `stat`      | `status`          |
//! | `help`        | `h`              | `help`            |
//! | `list`        | `ls`, `l`        | `list`            |
//! | `exec_macro`  | `em`, `run_macro`| `macro_executed`  |
//! | `list_macros` | `lm`, `macros`   | `macros_list`     |
//!
//! Handlers hold weak references to the engine and registry so installing
//! them does not create reference cycles.

use std::sync::{Arc, Weak};

use anyhow::anyhow;
use chrono::Utc;
use jump_types::Params;
use serde_json::{json, Value};

use crate::context::Context;
use crate::engine::Engine;
use crate::error::DefinitionError;
use crate::macros::MacroRegistry;
use crate::registry::{HandlerDescriptor, Registration, Registry};

/// Parameter of `exec_macro` naming the macro to run
pub const MACRO_NAME_PARAM: &str = "name";

pub fn install(engine: &Arc<Engine>) -> Result<Vec<Registration>, DefinitionError> {
    let registry = engine.registry();
    let weak_registry = Arc::downgrade(registry);

    let descriptors = vec![
        status(weak_registry.clone()),
        help(weak_registry.clone()),
        list(weak_registry),
        exec_macro(Arc::downgrade(engine)),
        list_macros(Arc::downgrade(engine.macros())),
    ];

    descriptors
        .into_iter()
        .map(|d| registry.register(d))
        .collect()
}

fn upgrade<T>(weak: &Weak<T>) -> anyhow::Result<Arc<T>> {
    weak.upgrade().ok_or_else(|| anyhow!("engine has been shut down"))
}

fn status(registry: Weak<Registry>) -> HandlerDescriptor {
    HandlerDescriptor::new(
        "status",
        move |_: &Params, ctx: &Context| -> anyhow::Result<Value> {
            let registry = upgrade(&registry)?;
            Ok(json!({
                "type": "status",
                "total_codes": registry.len(),
                "total_aliases": registry.alias_count(),
                "context_keys": ctx.keys().collect::<Vec<_>>(),
                "timestamp": Utc::now().to_rfc3339(),
            }))
        },
    )
    .with_description("Show system status")
    .with_aliases(["s", "stat"])
}

fn help(registry: Weak<Registry>) -> HandlerDescriptor {
    HandlerDescriptor::new(
        "help",
        move |params: &Params, _: &Context| -> anyhow::Result<Value> {
            let registry = upgrade(&registry)?;
            let filter = params
                .get("filter")
                .map(|v| v.to_string())
                .unwrap_or_default();
            let needle = filter.to_lowercase();

            let codes: Vec<Value> = registry
                .descriptors()
                .into_iter()
                .filter(|d| {
                    needle.is_empty()
                        || d.name.to_lowercase().contains(&needle)
                        || d.description.to_lowercase().contains(&needle)
                })
                .map(|d| {
                    json!({
                        "code": format!("@{}", d.name),
                        "description": d.description,
                        "aliases": d.aliases,
                        "parameters": d.parameters,
                        "context_required": d.context_required,
                    })
                })
                .collect();

            Ok(json!({"type": "help", "codes": codes, "filter": filter}))
        },
    )
    .with_description("Show help for jump codes")
    .with_alias("h")
    .with_default("filter", "")
}

fn list(registry: Weak<Registry>) -> HandlerDescriptor {
    HandlerDescriptor::new(
        "list",
        move |_: &Params, _: &Context| -> anyhow::Result<Value> {
            let registry = upgrade(&registry)?;
            let codes: Vec<String> = registry
                .descriptors()
                .into_iter()
                .map(|d| {
                    if d.aliases.is_empty() {
                        format!("@{} - {}", d.name, d.description)
                    } else {
                        format!("@{} (aliases: {}) - {}", d.name, d.aliases.join(", "), d.description)
                    }
                })
                .collect();
            Ok(json!({"type": "list", "codes": codes}))
        },
    )
    .with_description("List all available jump codes")
    .with_aliases(["ls", "l"])
}

fn exec_macro(engine: Weak<Engine>) -> HandlerDescriptor {
    HandlerDescriptor::new(
        "exec_macro",
        move |params: &Params, ctx: &Context| -> anyhow::Result<Value> {
            let engine = upgrade(&engine)?;
            let name = params
                .get(MACRO_NAME_PARAM)
                .map(|v| v.to_string())
                .ok_or_else(|| anyhow!("exec_macro requires a '{}' parameter", MACRO_NAME_PARAM))?;

            let mut values = params.clone();
            values.remove(MACRO_NAME_PARAM);

            let run = engine.run_macro(&name, &values, ctx)?;
            if let Some(failure) = &run.failed {
                return Err(anyhow!(
                    "Macro failed at: {} ({})",
                    failure.command,
                    failure.error
                ));
            }

            Ok(json!({
                "type": "macro_executed",
                "name": run.name,
                "parameters": run.parameters.to_json(),
                "sequence_length": run.commands.len(),
                "results": run.record.steps,
                "success_rate": run.record.success_rate,
                "completed": run.record.completed,
            }))
        },
    )
    .with_description("Execute a stored macro")
    .with_aliases(["em", "run_macro"])
}

fn list_macros(macros: Weak<MacroRegistry>) -> HandlerDescriptor {
    HandlerDescriptor::new(
        "list_macros",
        move |_: &Params, _: &Context| -> anyhow::Result<Value> {
            let macros = upgrade(&macros)?;
            let lines: Vec<String> = macros.list().iter().map(|m| m.to_string()).collect();
            Ok(json!({"type": "macros_list", "total": lines.len(), "macros": lines}))
        },
    )
    .with_description("List stored macros")
    .with_aliases(["lm", "macros"])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use jump_types::ErrorKind;
    use pretty_assertions::assert_eq;

    fn engine() -> Arc<Engine> {
        Engine::with_builtins(EngineConfig::default()).unwrap()
    }

    fn keys(value: &Value) -> Vec<String> {
        value.as_object().unwrap().keys().cloned().collect()
    }

    #[test]
    fn test_status_aliases_share_shape() {
        let engine = engine();
        let ctx = Context::new().with("user", "ana");

        let full = engine.execute("@status", &ctx);
        let short = engine.execute("@s", &ctx);
        let other = engine.execute("@stat", &ctx);

        assert!(full.success && short.success && other.success);
        assert_eq!(keys(&full.data), keys(&short.data));
        assert_eq!(keys(&full.data), keys(&other.data));
        assert_eq!(full.data["total_codes"], json!(5));
        assert_eq!(full.data["context_keys"], json!(["user"]));
    }

    #[test]
    fn test_help_filter() {
        let engine = engine();
        let result = engine.execute("@help:filter=MACRO", &Context::new());
        let codes: Vec<&str> = result.data["codes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["code"].as_str().unwrap())
            .collect();
        assert_eq!(codes, vec!["@exec_macro", "@list_macros"]);
        assert_eq!(result.data["filter"], json!("MACRO"));

        let all = engine.execute("@h", &Context::new());
        assert_eq!(all.data["codes"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn test_list_format() {
        let engine = engine();
        let result = engine.execute("@ls", &Context::new());
        let codes = result.data["codes"].as_array().unwrap();
        assert_eq!(
            codes[1],
            json!("@help (aliases: h) - Show help for jump codes")
        );
        assert_eq!(
            codes[3],
            json!("@list_macros (aliases: lm, macros) - List stored macros")
        );
    }

    #[test]
    fn test_exec_macro_builtin() {
        let engine = engine();
        engine
            .macros()
            .define("check", vec!["@status".into(), "@list".into()], "Status then list", None)
            .unwrap();

        let result = engine.execute("@em:name=check", &Context::new());
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.data["type"], json!("macro_executed"));
        assert_eq!(result.data["sequence_length"], json!(2));
        assert_eq!(result.data["completed"], json!(true));

        let listing = engine.execute("@lm", &Context::new());
        assert_eq!(
            listing.data["macros"],
            json!(["!check - Status then list (2 steps)"])
        );
        assert_eq!(listing.data["total"], json!(1));
    }

    #[test]
    fn test_exec_macro_errors_keep_kind() {
        let engine = engine();
        let result = engine.execute("@exec_macro:name=ghost", &Context::new());
        assert_eq!(result.error_kind(), Some(ErrorKind::UnknownMacro));

        let result = engine.execute("@exec_macro", &Context::new());
        assert_eq!(result.error_kind(), Some(ErrorKind::Handler));

        engine
            .macros()
            .define("broken", vec!["@nope".into()], "", None)
            .unwrap();
        let result = engine.execute("@run_macro:name=broken", &Context::new());
        assert_eq!(result.error_kind(), Some(ErrorKind::Handler));
        assert!(result.message().unwrap().contains("Macro failed at: @nope"));
    }

    #[test]
    fn test_recursive_macro_hits_nesting_limit() {
        let engine = Engine::with_builtins(EngineConfig::default().with_max_nesting_depth(3)).unwrap();
        engine
            .macros()
            .define("loop_forever", vec!["@em:name=loop_forever".into()], "", None)
            .unwrap();

        let run = engine
            .run_macro("loop_forever", &Params::new(), &Context::new())
            .unwrap();
        let failure = run.failed.unwrap();
        assert_eq!(failure.error.kind, ErrorKind::Handler);
        assert!(failure.error.message.contains("nesting depth"));
    }
}
