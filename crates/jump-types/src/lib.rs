//! Jump Types - Level 1 Foundation Types
//!
//! Pure data structures shared by every layer of the jump code engine.
//! This crate depends on nothing else in the workspace; the parser, registry,
//! engine and macro layers all build on it.
//!
//! ## Contents
//!
//! - Typed parameter values and parameter maps
//! - Parsed command invocations
//! - The error kind taxonomy used in every result record
//! - Execution results, history attempt records and batch records
//!
//! Records are value types: they are produced once per invocation or batch
//! and never mutated afterwards.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ============================================================================
// PARAMETER VALUES
// ============================================================================

/// A typed scalar parameter value produced by command parsing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    /// Name of the coerced type, for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "bool",
            ParamValue::Int(_) => "int",
            ParamValue::Float(_) => "float",
            ParamValue::Str(_) => "string",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; integers widen to floats
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(i) => Some(*i as f64),
            ParamValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ParamValue::Bool(b) => Value::Bool(*b),
            ParamValue::Int(i) => Value::from(*i),
            ParamValue::Float(f) => Value::from(*f),
            ParamValue::Str(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(x) => write!(f, "{}", x),
            ParamValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

/// Parameter map keyed by parameter name, iterated in insertion order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(IndexMap<String, ParamValue>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the previous one for that key
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Option<ParamValue> {
        self.0.insert(key.into(), value.into())
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<ParamValue> {
        self.0.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ParamValue::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(ParamValue::as_bool)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(ParamValue::as_i64)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(ParamValue::as_f64)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Layer `self` over `defaults`: keys present in `self` win, default keys keep their slots
    pub fn merged_over(&self, defaults: &Params) -> Params {
        let mut merged = defaults.0.clone();
        merged.extend(self.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Params(merged)
    }

    /// JSON object view, used when params are echoed into result payloads
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl FromIterator<(String, ParamValue)> for Params {
    fn from_iter<I: IntoIterator<Item = (String, ParamValue)>>(iter: I) -> Self {
        Params(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Params {
    type Item = (&'a String, &'a ParamValue);
    type IntoIter = indexmap::map::Iter<'a, String, ParamValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ============================================================================
// COMMAND INVOCATION
// ============================================================================

/// One parsed unit of work: a command name plus typed parameters.
///
/// Created by the parser for every call and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandInvocation {
    name: String,
    params: Params,
    raw: String,
}

impl CommandInvocation {
    pub fn new(name: impl Into<String>, params: Params, raw: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params,
            raw: raw.into(),
        }
    }

    /// Name as written (may be an alias)
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Original command text
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

// ============================================================================
// ERROR TAXONOMY
// ============================================================================

/// Category of a failed invocation.
///
/// Sequential batches decide whether to abort purely from this kind, never
/// from message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "ParseError")]
    Parse,
    #[serde(rename = "UnknownCommandError")]
    UnknownCommand,
    #[serde(rename = "MissingContextError")]
    MissingContext,
    #[serde(rename = "MissingParameterError")]
    MissingParameter,
    #[serde(rename = "HandlerError")]
    Handler,
    #[serde(rename = "TimeoutError")]
    Timeout,
    #[serde(rename = "UnknownMacroError")]
    UnknownMacro,
    #[serde(rename = "NestingLimitError")]
    NestingLimit,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Parse => "ParseError",
            ErrorKind::UnknownCommand => "UnknownCommandError",
            ErrorKind::MissingContext => "MissingContextError",
            ErrorKind::MissingParameter => "MissingParameterError",
            ErrorKind::Handler => "HandlerError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::UnknownMacro => "UnknownMacroError",
            ErrorKind::NestingLimit => "NestingLimitError",
        }
    }

    /// Critical kinds stop a sequential batch. Handler failures never do.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            ErrorKind::Parse | ErrorKind::UnknownCommand | ErrorKind::MissingContext
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind plus human-readable message of a failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

// ============================================================================
// EXECUTION RESULT
// ============================================================================

/// Outcome of a single invocation.
///
/// `error` is present exactly when `success` is false; use the constructors
/// rather than building the struct by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Command text that produced this result
    pub command: String,
    pub success: bool,
    /// Handler payload (null on failure)
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn succeeded(command: impl Into<String>, data: Value, duration_ms: u64) -> Self {
        Self {
            command: command.into(),
            success: true,
            data,
            error: None,
            duration_ms,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(command: impl Into<String>, error: ErrorInfo, duration_ms: u64) -> Self {
        Self {
            command: command.into(),
            success: false,
            data: Value::Null,
            error: Some(error),
            duration_ms,
            timestamp: Utc::now(),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    pub fn message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }
}

// ============================================================================
// HISTORY AND BATCH RECORDS
// ============================================================================

/// Anything that reports success or failure, for success-rate aggregation
pub trait Outcome {
    fn succeeded(&self) -> bool;
}

/// Fraction of successful outcomes in `items`; 0.0 when empty
pub fn success_rate<'a, T, I>(items: I) -> f64
where
    T: Outcome + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let (ok, total) = items
        .into_iter()
        .fold((0usize, 0usize), |(ok, total), item| {
            (ok + usize::from(item.succeeded()), total + 1)
        });
    if total == 0 {
        0.0
    } else {
        ok as f64 / total as f64
    }
}

impl Outcome for ExecutionResult {
    fn succeeded(&self) -> bool {
        self.success
    }
}

/// One entry in the attempt history ring buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub code: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl From<&ExecutionResult> for AttemptRecord {
    fn from(result: &ExecutionResult) -> Self {
        Self {
            code: result.command.clone(),
            timestamp: result.timestamp,
            success: result.success,
            duration_ms: result.duration_ms,
            error_kind: result.error_kind(),
        }
    }
}

impl Outcome for AttemptRecord {
    fn succeeded(&self) -> bool {
        self.success
    }
}

/// Per-step record of a sequential run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub code: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub position: usize,
    pub timestamp: DateTime<Utc>,
}

impl StepOutcome {
    pub fn from_result(position: usize, result: &ExecutionResult) -> Self {
        Self {
            code: result.command.clone(),
            success: result.success,
            result: result.success.then(|| result.data.clone()),
            error: result.error.clone(),
            position,
            timestamp: result.timestamp,
        }
    }
}

impl Outcome for StepOutcome {
    fn succeeded(&self) -> bool {
        self.success
    }
}

/// Record of one sequential run, appended to the sequence history whether
/// the run completed or was aborted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceRecord {
    pub id: Uuid,
    /// Commands as submitted
    pub commands: Vec<String>,
    pub steps: Vec<StepOutcome>,
    /// True when every submitted command produced a step
    pub completed: bool,
    /// Successful steps / recorded steps, in [0, 1]
    pub success_rate: f64,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
}

impl SequenceRecord {
    pub fn new(
        id: Uuid,
        commands: Vec<String>,
        steps: Vec<StepOutcome>,
        duration_ms: u64,
        started_at: DateTime<Utc>,
    ) -> Self {
        let completed = steps.len() == commands.len();
        let success_rate = success_rate(&steps);
        Self {
            id,
            commands,
            steps,
            completed,
            success_rate,
            duration_ms,
            started_at,
        }
    }

    /// Completed with every step successful
    pub fn is_fully_successful(&self) -> bool {
        self.completed && self.steps.iter().all(|s| s.success)
    }

    pub fn successful_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.success).count()
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps.iter().filter(|s| !s.success)
    }
}

/// Outcome of a parallel batch, keyed by the original command string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelBatchResult {
    pub results: BTreeMap<String, ExecutionResult>,
    /// Tasks whose real outcome was observed before the batch stopped waiting
    pub completed: usize,
    /// Distinct commands submitted
    pub total: usize,
    /// Set when fail-fast saw a failing task
    pub failed: bool,
    /// Set when the deadline expired before every task finished
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl ParallelBatchResult {
    pub fn get(&self, command: &str) -> Option<&ExecutionResult> {
        self.results.get(command)
    }

    pub fn failures(&self) -> usize {
        self.results.values().filter(|r| !r.success).count()
    }
}

// ============================================================================
// TESTS
// ============================================================================
