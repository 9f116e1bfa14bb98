use thiserror::Error;

/// Why a build file could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// A line continuation marker was the last thing in the file
    #[error("unexpected end of file after line continuation")]
    UnexpectedEof,

    /// The file holds no instructions at all
    #[error("build file is empty or contains only comments")]
    EmptyFile,

    /// An instruction other than ARG appeared before the first FROM
    #[error("first instruction must be FROM (or ARG before FROM)")]
    MissingFrom,

    /// An instruction that needs an argument had none
    #[error("{0} requires an argument")]
    MissingArgument(String),

    /// FROM named an image reference that could not be parsed
    #[error("invalid image reference: {0}")]
    InvalidImage(String),
}

/// dhi-migrate error types
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Malformed build file
    #[error("Parse error at line {line}: {reason}")]
    Parse { reason: ParseErrorKind, line: usize },

    /// `COPY --from=` names a stage that is not declared before it
    #[error("Invalid COPY --from reference '{reference}' at line {line}")]
    InvalidCopyFrom { reference: String, line: usize },

    /// Target image reference could not be parsed
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    /// A pass was handed a model it cannot work on
    #[error("Invalid build model: {0}")]
    InvalidModel(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl MigrateError {
    /// Shorthand for a parse failure at `line`.
    pub fn parse(reason: ParseErrorKind, line: usize) -> Self {
        MigrateError::Parse { reason, line }
    }

    /// Source line the error points at, when there is one.
    pub fn line(&self) -> Option<usize> {
        match self {
            MigrateError::Parse { line, .. } | MigrateError::InvalidCopyFrom { line, .. } => {
                Some(*line)
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for MigrateError {
    fn from(err: serde_json::Error) -> Self {
        MigrateError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for MigrateError {
    fn from(err: serde_yaml::Error) -> Self {
        MigrateError::SerializationError(err.to_string())
    }
}

/// Result type alias for dhi-migrate operations
pub type Result<T> = std::result::Result<T, MigrateError>;
