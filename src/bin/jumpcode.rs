//! Jump Code Command Line Interface
//!
//! Runs jump codes against an engine with the built-in commands installed and
//! prints JSON results on stdout. Logs go to stderr (`RUST_LOG`, default info).
//!
//! # Usage
//!
//! ```bash
//! # One command
//! jumpcode exec @status
//!
//! # Ordered batch sharing a context
//! jumpcode -c user=ana seq @status @list
//!
//! # Parallel batch
//! jumpcode par @status @help @list --timeout-ms 5000 --fail-fast
//!
//! # Free-form input
//! jumpcode input '!onboard(role=dev, task=docs)'
//! jumpcode input 'check @@status then @@list'
//!
//! # Macros from a file
//! jumpcode --macros macros.yaml macro list
//! jumpcode --macros macros.yaml macro run onboard -p role=dev
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;

use jumpcode::parser::coerce_value;
use jumpcode::{Context, Engine, EngineConfig, ParallelOptions, Params};

#[derive(Parser)]
#[command(name = "jumpcode")]
#[command(version = "0.1.0")]
#[command(about = "Run jump codes (@name:key=value) and macros from the command line")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine config file (YAML); falls back to JUMPCODE_CONFIG
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Macro document to load (.json, .yaml or .yml)
    #[arg(long, global = true, env = "JUMPCODE_MACROS")]
    macros: Option<PathBuf>,

    /// Initial context entries, key=value (repeatable)
    #[arg(short = 'c', long = "context", global = true, value_parser = parse_key_val)]
    context: Vec<(String, String)>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a single jump code
    Exec {
        command: String,
    },

    /// Execute jump codes in order with a shared context
    Seq {
        #[arg(required = true)]
        commands: Vec<String>,
    },

    /// Execute jump codes concurrently
    Par {
        #[arg(required = true)]
        commands: Vec<String>,

        /// Overall deadline in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Stop waiting after the first failure
        #[arg(long)]
        fail_fast: bool,

        /// Maximum concurrent tasks
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Route free-form input: @code, !macro(k=v), @@a @@b or text with {@code}
    Input {
        text: String,
    },

    /// List registered jump codes and aliases
    List,

    /// Execute jump codes one by one, then print the attempt history
    History {
        commands: Vec<String>,

        /// Number of most recent entries to show
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Work with macros
    Macro {
        #[command(subcommand)]
        action: MacroAction,
    },
}

#[derive(Subcommand)]
enum MacroAction {
    /// Show the commands a macro expands to
    Expand {
        name: String,

        /// Macro parameters, key=value (repeatable)
        #[arg(short = 'p', long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
    },

    /// Expand and run a macro
    Run {
        name: String,

        #[arg(short = 'p', long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
    },

    /// List loaded macros
    List,
}

// =============================================================================
// MAIN
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

/// Returns whether everything that ran succeeded
async fn run(cli: Cli) -> Result<bool> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::from_env()?,
    };

    let engine = Engine::with_builtins(config).context("Failed to install built-in commands")?;
    if let Some(path) = &cli.macros {
        engine
            .macros()
            .load(path)
            .with_context(|| format!("Failed to load macros from {:?}", path))?;
    }

    let mut context = Context::new();
    for (key, value) in &cli.context {
        context.insert(key.clone(), coerce_value(value).to_json());
    }

    match cli.command {
        Commands::Exec { command } => {
            let result = engine.execute(&command, &context);
            print_json(&result)?;
            Ok(result.success)
        }
        Commands::Seq { commands } => {
            let record = engine.execute_sequential(&commands, &mut context);
            print_json(&record)?;
            Ok(record.is_fully_successful())
        }
        Commands::Par {
            commands,
            timeout_ms,
            fail_fast,
            workers,
        } => {
            let mut options = ParallelOptions::new().with_fail_fast(fail_fast);
            if let Some(ms) = timeout_ms {
                options = options.with_timeout_ms(ms);
            }
            if let Some(n) = workers {
                options = options.with_max_workers(n);
            }
            let batch = engine.execute_parallel(commands, context, options).await;
            print_json(&batch)?;
            Ok(!batch.failed && !batch.timed_out && batch.failures() == 0)
        }
        Commands::Input { text } => match engine.process_input(&text, &mut context)? {
            Some(outcome) => {
                print_json(&outcome)?;
                Ok(outcome.succeeded())
            }
            None => {
                eprintln!("No jump codes found in input");
                Ok(false)
            }
        },
        Commands::List => {
            print_json(&engine.list_commands())?;
            Ok(true)
        }
        Commands::History { commands, limit } => {
            for command in &commands {
                engine.execute(command, &context);
            }
            print_json(&json!({
                "history": engine.history(limit),
                "success_rate": engine.success_rate(),
            }))?;
            Ok(true)
        }
        Commands::Macro { action } => match action {
            MacroAction::Expand { name, params } => {
                let commands = engine.macros().expand(&name, &to_params(params))?;
                print_json(&commands)?;
                Ok(true)
            }
            MacroAction::Run { name, params } => {
                let run = engine.run_macro(&name, &to_params(params), &context)?;
                print_json(&run)?;
                Ok(run.succeeded())
            }
            MacroAction::List => {
                print_json(&engine.macros().list())?;
                Ok(true)
            }
        },
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: {}", s))?;
    Ok((s[..pos].trim().to_string(), s[pos + 1..].trim().to_string()))
}

fn to_params(pairs: Vec<(String, String)>) -> Params {
    pairs
        .into_iter()
        .map(|(k, v)| {
            let value = coerce_value(&v);
            (k, value)
        })
        .collect()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
