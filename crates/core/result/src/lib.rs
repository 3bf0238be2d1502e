#[cfg(feature = "serde")]
#[macro_use]
extern crate serde;

use std::fmt;

/// Result type with custom Error
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error information
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct Error {
    /// Type of error and additional information
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub error_type: ErrorType,

    /// Where this error occurred
    pub location: String,
}

/// Possible error types
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorType {
    /// This error was not labeled :(
    LabelMe,

    // ? Storage related errors
    StorageUnavailable {
        driver: String,
    },
    IoError {
        operation: String,
        path: String,
    },
    SerializationFailed {
        error: String,
    },
    InvalidKey,

    // ? General errors
    InternalError,
    NotFound,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_type {
            ErrorType::StorageUnavailable { driver } => {
                write!(f, "storage driver `{driver}` is unavailable")?
            }
            ErrorType::IoError { operation, path } => {
                write!(f, "failed to {operation} `{path}`")?
            }
            ErrorType::SerializationFailed { error } => {
                write!(f, "failed to (de)serialise value: {error}")?
            }
            other => write!(f, "{other:?}")?,
        }

        write!(f, " (at {})", self.location)
    }
}

impl std::error::Error for Error {}

#[macro_export]
macro_rules! create_error {
    ( $error: ident $( $tt:tt )? ) => {
        $crate::Error {
            error_type: $crate::ErrorType::$error $( $tt )?,
            location: format!("{}:{}:{}", file!(), line!(), column!()),
        }
    };
}

#[macro_export]
macro_rules! create_io_error {
    ( $operation: expr, $path: expr ) => {
        $crate::create_error!(IoError {
            operation: $operation.to_string(),
            path: $path.to_string()
        })
    };
}

/// Convert foreign errors into an internal error, logging the original
pub trait ToIdmpError<T> {
    fn to_internal_error(self) -> Result<T>;
}

impl<T, E: fmt::Debug> ToIdmpError<T> for std::result::Result<T, E> {
    #[track_caller]
    fn to_internal_error(self) -> Result<T> {
        let location = std::panic::Location::caller();
        self.map_err(|err| {
            log::error!("{err:?} at {location}");

            Error {
                error_type: ErrorType::InternalError,
                location: location.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::{ErrorType, ToIdmpError};

    #[test]
    fn use_macro_to_construct_error() {
        let error = create_error!(LabelMe);
        assert!(matches!(error.error_type, ErrorType::LabelMe));
    }

    #[test]
    fn use_macro_to_construct_complex_error() {
        let error = create_io_error!("read", "/tmp/idmp");
        assert_eq!(
            error.error_type,
            ErrorType::IoError {
                operation: "read".to_string(),
                path: "/tmp/idmp".to_string()
            }
        );
        assert!(error.to_string().starts_with("failed to read `/tmp/idmp`"));
    }

    #[test]
    fn foreign_errors_become_internal() {
        let result: Result<(), &str> = Err("boom");
        let error = result.to_internal_error().unwrap_err();
        assert_eq!(error.error_type, ErrorType::InternalError);
        assert!(error.location.contains("lib.rs"));
    }
}
