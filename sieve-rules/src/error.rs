//! Error types for rule loading and action execution.
//!
//! Load-time problems are terminal: the whole rule file is rejected and the
//! previously active tree stays in place. Runtime action failures are logged
//! by the caller and never abort the evaluation of the remaining actions.

use thiserror::Error;

/// Why a selector string failed to compile.
#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("missing request attribute")]
    MissingAttribute,
    #[error("invalid regexp")]
    InvalidRegex,
    #[error("cannot resolve host {0:?}")]
    Lookup(String),
}

/// A fatal problem while parsing a rule file. The engine never partially
/// loads: any of these aborts the whole load.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read rule file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid rule JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cannot parse selector {selector:?}: {source}")]
    Selector {
        selector: String,
        #[source]
        source: SelectorError,
    },
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("action {action:?}: parameter {param:?} {problem}")]
    ActionParam {
        action: &'static str,
        param: &'static str,
        problem: &'static str,
    },
    #[error("at least one subrule or action required in rule: {0:?}")]
    EmptyRule(String),
}

/// A runtime failure inside a firing action.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("log write failed: {0}")]
    Log(#[source] std::io::Error),
    #[error("cannot spawn {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("empty shell command after substitution")]
    EmptyCommand,
}
