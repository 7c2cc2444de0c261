use thiserror::Error;

/// A3S Build error types
#[derive(Error, Debug)]
pub enum BuildError {
    /// A variable reference names nothing in the environment or build args
    #[error("Undefined variable: {name}")]
    UndefinedVariable { name: String },

    /// Malformed `${...}` expression, or a `${VAR?message}` that fired
    #[error("Bad substitution: {0}")]
    BadSubstitution(String),

    /// A resolved value failed an instruction-specific check
    #[error("Invalid {instruction} value '{value}': {reason}")]
    Validation {
        instruction: String,
        value: String,
        reason: String,
    },

    /// A filesystem instruction (COPY, RUN, WORKDIR) failed
    #[error("Execution failed: {0}")]
    Execution(String),

    /// The filesystem-snapshot collaborator failed
    #[error("Snapshot failed: {0}")]
    Snapshot(String),

    /// Dockerfile syntax error
    #[error("Dockerfile line {line}: {message}")]
    Parse { line: usize, message: String },

    /// A Dockerfile instruction failed; `source` keeps the original kind
    #[error("Dockerfile line {line}: step {step} ({instruction}) failed: {source}")]
    Step {
        line: usize,
        /// One-based position of the instruction after FROM
        step: usize,
        instruction: String,
        #[source]
        source: Box<BuildError>,
    },

    /// Build aborted between instructions
    #[error("Build cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl BuildError {
    /// Shorthand for a validation failure.
    pub fn validation(
        instruction: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        BuildError::Validation {
            instruction: instruction.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// The innermost error, looking through [`BuildError::Step`].
    pub fn root_cause(&self) -> &BuildError {
        match self {
            BuildError::Step { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Shorthand for a parse failure at a given line.
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        BuildError::Parse {
            line,
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for BuildError {
    fn from(err: serde_json::Error) -> Self {
        BuildError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for BuildError {
    fn from(err: serde_yaml::Error) -> Self {
        BuildError::SerializationError(err.to_string())
    }
}

/// Result type alias for A3S Build operations
pub type Result<T> = std::result::Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undefined_variable_display() {
        let error = BuildError::UndefinedVariable {
            name: "MYSIG".to_string(),
        };
        assert_eq!(error.to_string(), "Undefined variable: MYSIG");
    }

    #[test]
    fn test_validation_display() {
        let error = BuildError::validation("STOPSIGNAL", "NOTASIGNAL", "unknown signal");
        assert_eq!(
            error.to_string(),
            "Invalid STOPSIGNAL value 'NOTASIGNAL': unknown signal"
        );
    }

    #[test]
    fn test_parse_display() {
        let error = BuildError::parse(3, "Unknown instruction 'FOO'");
        assert_eq!(error.to_string(), "Dockerfile line 3: Unknown instruction 'FOO'");
    }

    #[test]
    fn test_snapshot_display() {
        let error = BuildError::Snapshot("permission denied".to_string());
        assert_eq!(error.to_string(), "Snapshot failed: permission denied");
    }

    #[test]
    fn test_step_keeps_source_kind() {
        let error = BuildError::Step {
            line: 4,
            step: 2,
            instruction: "STOPSIGNAL $NOPE".to_string(),
            source: Box::new(BuildError::UndefinedVariable {
                name: "NOPE".to_string(),
            }),
        };
        assert_eq!(
            error.to_string(),
            "Dockerfile line 4: step 2 (STOPSIGNAL $NOPE) failed: Undefined variable: NOPE"
        );
        assert!(matches!(
            error.root_cause(),
            BuildError::UndefinedVariable { name } if name == "NOPE"
        ));
        let source = std::error::Error::source(&error).unwrap();
        assert_eq!(source.to_string(), "Undefined variable: NOPE");
    }

    #[test]
    fn test_cancelled_display() {
        assert_eq!(BuildError::Cancelled.to_string(), "Build cancelled");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let build_error: BuildError = io_error.into();
        assert!(matches!(build_error, BuildError::IoError(_)));
        assert!(build_error.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let build_error: BuildError = result.unwrap_err().into();
        assert!(matches!(build_error, BuildError::SerializationError(_)));
    }

    #[test]
    fn test_serde_yaml_error_conversion() {
        let result: std::result::Result<serde_yaml::Value, _> =
            serde_yaml::from_str("invalid: yaml: content:");
        let build_error: BuildError = result.unwrap_err().into();
        assert!(matches!(build_error, BuildError::SerializationError(_)));
    }

    #[test]
    fn test_other_error_display() {
        let error = BuildError::Other("something broke".to_string());
        assert_eq!(error.to_string(), "something broke");
    }
}
