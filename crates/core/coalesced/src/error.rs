use std::{fmt, sync::Arc};

use crate::AbortReason;

/// Coalesced call error.
///
/// Every caller sharing a key receives a clone of the same error, so the
/// factory's own error is held in an [`Arc`].
pub enum Error<E> {
    /// The factory kept failing after the retry budget was spent
    Failed(Arc<E>),
    /// The call was aborted through an abort signal
    Aborted(AbortReason),
    /// The key is already in use with a different value or error type, this will be most likely a key collision
    TypeMismatch,
    /// The factory panicked
    Panicked,
    /// The shared state was dropped before it settled, e.g. on runtime shutdown
    RecvError,
}

impl<E> Error<E> {
    /// The factory's final error, if that's what this is
    pub fn failure(&self) -> Option<&Arc<E>> {
        match self {
            Error::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn abort_reason(&self) -> Option<&AbortReason> {
        match self {
            Error::Aborted(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Aborted(_))
    }
}

impl<E> Clone for Error<E> {
    fn clone(&self) -> Self {
        match self {
            Error::Failed(err) => Error::Failed(err.clone()),
            Error::Aborted(reason) => Error::Aborted(reason.clone()),
            Error::TypeMismatch => Error::TypeMismatch,
            Error::Panicked => Error::Panicked,
            Error::RecvError => Error::RecvError,
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
            Error::Aborted(reason) => f.debug_tuple("Aborted").field(reason).finish(),
            Error::TypeMismatch => write!(f, "TypeMismatch"),
            Error::Panicked => write!(f, "Panicked"),
            Error::RecvError => write!(f, "RecvError"),
        }
    }
}

impl<E: fmt::Display> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Failed(err) => write!(f, "{err}"),
            Error::Aborted(reason) => write!(f, "{reason}"),
            Error::TypeMismatch => write!(
                f,
                "Key is already in use with a different type, possible key collision"
            ),
            Error::Panicked => write!(f, "The factory panicked"),
            Error::RecvError => write!(f, "Unable to receive the result from the shared state"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for Error<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Failed(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}
