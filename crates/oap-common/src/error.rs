//! Error types for the OAP analysis core
//!
//! Provides a unified error type hierarchy for the entire system.

use thiserror::Error;

use crate::types::ScriptLocation;

/// Result type alias using the analysis core's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the analysis core
#[derive(Error, Debug)]
pub enum Error {
    // Script compilation errors
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    // Runtime dispatch errors
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    // Storage writer errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Configuration Errors
    #[error("Configuration error: {0}")]
    Config(String),

    // IO Errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Internal Errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while turning OAL scripts into metric units.
///
/// All of them are fatal for the batch being compiled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("{script}:{line}:{column}: syntax error: {message}")]
    Syntax {
        script: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("{location}: unknown scope '{scope}'")]
    UnknownScope { location: ScriptLocation, scope: String },

    #[error("{location}: scope '{scope}' has no attribute '{attribute}'")]
    UnknownAttribute {
        location: ScriptLocation,
        scope: String,
        attribute: String,
    },

    #[error("{location}: unknown aggregation function '{function}'")]
    UnknownFunction {
        location: ScriptLocation,
        function: String,
    },

    #[error("{location}: unknown decorator '{decorator}'")]
    UnknownDecorator {
        location: ScriptLocation,
        decorator: String,
    },

    #[error("{location}: invalid filter on '{attribute}': {message}")]
    InvalidFilter {
        location: ScriptLocation,
        attribute: String,
        message: String,
    },

    #[error("{location}: invalid argument for {function}(): {message}")]
    InvalidArgument {
        location: ScriptLocation,
        function: String,
        message: String,
    },

    #[error("{location}: cannot coerce {from} into {to}")]
    TypeCoercion {
        location: ScriptLocation,
        from: String,
        to: String,
    },

    #[error("duplicate metric '{name}' defined at {first} and {second}")]
    DuplicateMetric {
        name: String,
        first: ScriptLocation,
        second: ScriptLocation,
    },
}

impl CompileError {
    /// Name of the script the error originates from
    pub fn script(&self) -> &str {
        match self {
            Self::Syntax { script, .. } => script,
            Self::UnknownScope { location, .. }
            | Self::UnknownAttribute { location, .. }
            | Self::UnknownFunction { location, .. }
            | Self::UnknownDecorator { location, .. }
            | Self::InvalidFilter { location, .. }
            | Self::InvalidArgument { location, .. }
            | Self::TypeCoercion { location, .. } => &location.script,
            Self::DuplicateMetric { second, .. } => &second.script,
        }
    }
}

/// Errors raised while routing an event into metric units.
///
/// These are isolated per dispatcher step and never abort other metrics.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("metric {metric}: {reason}")]
    Extraction { metric: String, reason: String },

    #[error("metric {metric}: merge failed: {reason}")]
    Merge { metric: String, reason: String },

    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    #[error("unknown scope: {0}")]
    UnknownScope(String),

    #[error("malformed remote data: {0}")]
    Remote(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error_display() {
        let err = CompileError::Syntax {
            script: "core.oal".to_string(),
            line: 3,
            column: 14,
            message: "expected filter".to_string(),
        };
        assert_eq!(err.to_string(), "core.oal:3:14: syntax error: expected filter");
        assert_eq!(err.script(), "core.oal");
    }

    #[test]
    fn test_duplicate_reports_second_script() {
        let err = CompileError::DuplicateMetric {
            name: "service_cpm".to_string(),
            first: ScriptLocation::new("a.oal", 0, 1, 1),
            second: ScriptLocation::new("b.oal", 2, 5, 1),
        };
        assert_eq!(err.script(), "b.oal");
        assert!(err.to_string().contains("a.oal:1:1"));
    }

    #[test]
    fn test_compile_error_converts() {
        let err: Error = CompileError::UnknownScope {
            location: ScriptLocation::new("x.oal", 0, 1, 1),
            scope: "Nope".to_string(),
        }
        .into();
        assert!(matches!(err, Error::Compile(_)));
    }
}
