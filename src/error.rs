//! Error types for jump code dispatch
//!
//! Two families:
//! - [`DispatchError`] - everything that can go wrong while turning a command
//!   string into a handler result. Every variant maps onto an [`ErrorKind`],
//!   which is what ends up in result records.
//! - [`DefinitionError`] - registering handlers, defining macros and
//!   reading/writing macro documents.

use jump_types::{ErrorInfo, ErrorKind};
use thiserror::Error;

/// Failure of a single dispatch (parse, resolve, validate, invoke)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("Unknown jump code: {name}")]
    UnknownCommand { name: String },

    #[error("Missing required context: {}", .keys.join(", "))]
    MissingContext { command: String, keys: Vec<String> },

    #[error("Missing required parameters for macro '{macro_name}': {}", .params.join(", "))]
    MissingParameter {
        macro_name: String,
        params: Vec<String>,
    },

    #[error("Handler '{command}' failed: {message}")]
    Handler { command: String, message: String },

    #[error("Timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Unknown macro: {name}")]
    UnknownMacro { name: String },

    #[error("Macro nesting depth {depth} exceeds limit of {limit}")]
    NestingLimit { depth: usize, limit: usize },
}

impl DispatchError {
    pub fn parse(message: impl Into<String>) -> Self {
        DispatchError::Parse {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Parse { .. } => ErrorKind::Parse,
            DispatchError::UnknownCommand { .. } => ErrorKind::UnknownCommand,
            DispatchError::MissingContext { .. } => ErrorKind::MissingContext,
            DispatchError::MissingParameter { .. } => ErrorKind::MissingParameter,
            DispatchError::Handler { .. } => ErrorKind::Handler,
            DispatchError::Timeout { .. } => ErrorKind::Timeout,
            DispatchError::UnknownMacro { .. } => ErrorKind::UnknownMacro,
            DispatchError::NestingLimit { .. } => ErrorKind::NestingLimit,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.kind().is_critical()
    }

    pub fn to_info(&self) -> ErrorInfo {
        ErrorInfo::new(self.kind(), self.to_string())
    }
}

impl From<DispatchError> for ErrorInfo {
    fn from(error: DispatchError) -> Self {
        error.to_info()
    }
}

/// Registration, macro definition and persistence errors
#[derive(Error, Debug)]
pub enum DefinitionError {
    #[error("Invalid {what} name '{name}': expected a letter or '_' followed by letters, digits or '_'")]
    InvalidName { what: &'static str, name: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Lookup into a bounded history that no longer (or never) held the entry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("Sequence index {index} out of range ({len} recorded)")]
    OutOfRange { index: usize, len: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_context_message_lists_keys() {
        let err = DispatchError::MissingContext {
            command: "deploy".into(),
            keys: vec!["env".into(), "region".into()],
        };
        assert_eq!(err.to_string(), "Missing required context: env, region");
        assert_eq!(err.kind(), ErrorKind::MissingContext);
        assert!(err.is_critical());
    }

    #[test]
    fn test_handler_error_is_not_critical() {
        let err = DispatchError::Handler {
            command: "build".into(),
            message: "disk full".into(),
        };
        assert!(!err.is_critical());

        let info = err.to_info();
        assert_eq!(info.kind, ErrorKind::Handler);
        assert!(info.message.contains("disk full"));
    }

    #[test]
    fn test_every_variant_maps_to_a_kind() {
        let cases = vec![
            (DispatchError::parse("x"), ErrorKind::Parse),
            (DispatchError::Timeout { timeout_ms: 5 }, ErrorKind::Timeout),
            (
                DispatchError::UnknownMacro { name: "m".into() },
                ErrorKind::UnknownMacro,
            ),
            (
                DispatchError::NestingLimit { depth: 5, limit: 4 },
                ErrorKind::NestingLimit,
            ),
            (
                DispatchError::MissingParameter {
                    macro_name: "m".into(),
                    params: vec!["r".into()],
                },
                ErrorKind::MissingParameter,
            ),
        ];
        for (err, kind) in cases {
            assert_eq!(err.kind(), kind, "{}", err);
        }
    }
}
