//! Caller errors.
//!
//! These are raised for misuse of a handle or a bad argument, never for an
//! engine outcome. Engine outcomes travel as [`Status`] values; the
//! `Status` variant exists only for callers that asked to unwind on failure.

use crate::idgen::HandleKind;
use crate::status::Status;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} is not opened")]
    NotOpened(HandleKind),

    #[error("{0} is already opened")]
    AlreadyOpened(HandleKind),

    #[error("{0} was never bound to a native resource")]
    NeverBound(HandleKind),

    #[error("{0} was already released")]
    AlreadyReleased(HandleKind),

    #[error("required argument `{0}` is missing")]
    NullArgument(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("future result was already consumed")]
    FutureConsumed,

    #[error("operation was dropped before it produced a result")]
    Abandoned,

    #[error("out of resources: {0}")]
    OutOfResources(String),

    #[error("{0}")]
    Status(Status),
}

impl Error {
    /// The engine outcome carried by this error, if it is one.
    #[must_use]
    pub fn status(&self) -> Option<&Status> {
        match self {
            Error::Status(status) => Some(status),
            _ => None,
        }
    }

    /// True for errors caused by using a handle in the wrong lifecycle state.
    #[must_use]
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            Error::NotOpened(_)
                | Error::AlreadyOpened(_)
                | Error::NeverBound(_)
                | Error::AlreadyReleased(_)
                | Error::FutureConsumed
        )
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        Error::Status(status)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
