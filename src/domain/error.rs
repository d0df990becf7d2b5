use thiserror::Error;

/// Common error types for the process engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Inputs or outputs failed a port type or requiredness check
    #[error("{0}")]
    Validation(String),

    /// Builder misuse: unknown attribute or assignment to a whole namespace
    #[error("{0}")]
    Attribute(String),

    /// A value of the wrong declared type, or a duplicate port declaration
    #[error("{0}")]
    Value(String),

    /// Resume attempted on a process that already excepted or was killed
    #[error("{0}")]
    PastException(String),

    /// Missing required descriptor, e.g. a computer without a work directory
    #[error("{0}")]
    Configuration(String),

    /// Lookup of a named entity found nothing
    #[error("{0}")]
    NotExistent(String),

    /// Lookup of a named entity was ambiguous
    #[error("{0}")]
    DbContent(String),

    /// Action attempted while the subject is in the wrong lifecycle state
    #[error("{0}")]
    InvalidOperation(String),

    /// Parser construction or parsing failures
    #[error("{0}")]
    Parsing(String),

    /// Storage backend errors
    #[error("{0}")]
    Storage(String),

    /// Serialization/deserialization errors
    #[error("{0}")]
    Serialization(String),

    /// Step or job execution errors
    #[error("{0}")]
    Execution(String),

    /// Spawn errors
    #[error("{0}")]
    Spawn(String),

    /// Timeout errors
    #[error("{0}")]
    Timeout(String),

    /// Generic errors with context
    #[error("{0}")]
    Generic(String)
}

impl EngineError {
    /// Short name of the error kind, used in reports and checkpoints
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "ValidationError",
            EngineError::Attribute(_) => "AttributeError",
            EngineError::Value(_) => "ValueError",
            EngineError::PastException(_) => "PastException",
            EngineError::Configuration(_) => "ConfigurationError",
            EngineError::NotExistent(_) => "NotExistent",
            EngineError::DbContent(_) => "DbContentError",
            EngineError::InvalidOperation(_) => "InvalidOperation",
            EngineError::Parsing(_) => "ParsingError",
            EngineError::Storage(_) => "StorageError",
            EngineError::Serialization(_) => "SerializationError",
            EngineError::Execution(_) => "ExecutionError",
            EngineError::Spawn(_) => "SpawnError",
            EngineError::Timeout(_) => "TimeoutError",
            EngineError::Generic(_) => "Error"
        }
    }

    /// Process exit code reported by the command line for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            EngineError::Validation(_) | EngineError::Attribute(_) | EngineError::Value(_) => 2,
            EngineError::NotExistent(_) | EngineError::DbContent(_) => 3,
            EngineError::PastException(_) | EngineError::InvalidOperation(_) => 4,
            EngineError::Configuration(_) => 5,
            _ => 1
        }
    }
}

/// Convert from anyhow::Error
impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Generic(format!("{:#}", err))
    }
}

/// Convert from std::io::Error
impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

/// Convert from serde_yaml::Error
impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

/// Convert from serde_json::Error
impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

/// Convert from rocksdb::Error
impl From<rocksdb::Error> for EngineError {
    fn from(err: rocksdb::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

/// Convert from ractor::SpawnErr
impl From<ractor::SpawnErr> for EngineError {
    fn from(err: ractor::SpawnErr) -> Self {
        EngineError::Spawn(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_non_zero_and_distinguish_lookup_failures() {
        assert_eq!(EngineError::Validation("x".into()).exit_code(), 2);
        assert_eq!(EngineError::NotExistent("x".into()).exit_code(), 3);
        assert_eq!(EngineError::DbContent("x".into()).exit_code(), 3);
        assert_eq!(EngineError::PastException("x".into()).exit_code(), 4);
        assert_eq!(EngineError::Storage("x".into()).exit_code(), 1);
    }

    #[test]
    fn test_display_is_the_message() {
        let err = EngineError::PastException("process 7 already excepted".into());
        assert_eq!(err.to_string(), "process 7 already excepted");
        assert_eq!(err.kind(), "PastException");
    }
}
