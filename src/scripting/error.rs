use thiserror::Error;

use super::value::ValueKind;

/// A guest value could not be converted to the host shape an operation needs
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarshalError {
    #[error("expected {expected}, got unsupported shape {found}")]
    UnsupportedShape { expected: ValueKind, found: String },

    #[error("{value} does not fit in {expected}")]
    OutOfRange { expected: ValueKind, value: f64 },

    #[error("missing required argument '{name}'")]
    MissingArgument { name: String },
}

/// A host operation's signature was rejected at registration time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("operation '{name}' has no callable attached")]
    MissingCallable { name: String },

    #[error("'{name}' is not a valid qualified operation name")]
    InvalidName { name: String },

    #[error("operation '{name}' declares parameter '{param}' more than once")]
    DuplicateParameter { name: String, param: String },

    #[error("operation '{name}': required parameter '{param}' follows an optional one")]
    RequiredAfterOptional { name: String, param: String },

    #[error("operation '{name}': parameter '{param}' has a default but is not optional")]
    DefaultOnRequired { name: String, param: String },

    #[error("operation '{name}' could not be bound in the guest namespace: {message}")]
    Binding { name: String, message: String },
}

/// Failure raised inside a published operation's own logic
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HostOperationError {
    pub message: String,
}

impl HostOperationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn invalid_argument(name: &str, expected: ValueKind, found: &str) -> Self {
        Self::new(format!(
            "argument '{}' expected {}, got {}",
            name, expected, found
        ))
    }
}

impl From<mlua::Error> for HostOperationError {
    fn from(err: mlua::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<MarshalError> for HostOperationError {
    fn from(err: MarshalError) -> Self {
        Self::new(err.to_string())
    }
}

/// A new execution was requested while a run was still active
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("execution requested while a run is active ({state}); force-stopping the previous run")]
pub struct SchedulerMisuse {
    pub state: String,
}
