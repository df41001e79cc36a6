//! Operation outcomes.
//!
//! Every store operation reports a [`Status`]: a code from a fixed table plus
//! an optional message. Statuses are plain values; they never unwind. Code
//! that wants unwinding on failure converts with [`Status::or_die`].

use std::fmt;
use std::io;
use std::ops::BitOrAssign;

use crate::error::{Error, Result};

/// Outcome codes. The numeric values are stable and shared with every
/// caller of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StatusCode {
    Success = 0,
    UnknownError = 1,
    SystemError = 2,
    NotImplementedError = 3,
    PreconditionError = 4,
    InvalidArgumentError = 5,
    CanceledError = 6,
    NotFoundError = 7,
    PermissionError = 8,
    InfeasibleError = 9,
    DuplicationError = 10,
    BrokenDataError = 11,
    NetworkError = 12,
    ApplicationError = 13,
}

impl StatusCode {
    const ALL: [StatusCode; 14] = [
        StatusCode::Success,
        StatusCode::UnknownError,
        StatusCode::SystemError,
        StatusCode::NotImplementedError,
        StatusCode::PreconditionError,
        StatusCode::InvalidArgumentError,
        StatusCode::CanceledError,
        StatusCode::NotFoundError,
        StatusCode::PermissionError,
        StatusCode::InfeasibleError,
        StatusCode::DuplicationError,
        StatusCode::BrokenDataError,
        StatusCode::NetworkError,
        StatusCode::ApplicationError,
    ];

    /// Codes outside the table map to `UnknownError`.
    #[must_use]
    pub fn from_i32(num: i32) -> Self {
        usize::try_from(num)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
            .unwrap_or(StatusCode::UnknownError)
    }

    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            StatusCode::Success => "SUCCESS",
            StatusCode::UnknownError => "UNKNOWN_ERROR",
            StatusCode::SystemError => "SYSTEM_ERROR",
            StatusCode::NotImplementedError => "NOT_IMPLEMENTED_ERROR",
            StatusCode::PreconditionError => "PRECONDITION_ERROR",
            StatusCode::InvalidArgumentError => "INVALID_ARGUMENT_ERROR",
            StatusCode::CanceledError => "CANCELED_ERROR",
            StatusCode::NotFoundError => "NOT_FOUND_ERROR",
            StatusCode::PermissionError => "PERMISSION_ERROR",
            StatusCode::InfeasibleError => "INFEASIBLE_ERROR",
            StatusCode::DuplicationError => "DUPLICATION_ERROR",
            StatusCode::BrokenDataError => "BROKEN_DATA_ERROR",
            StatusCode::NetworkError => "NETWORK_ERROR",
            StatusCode::ApplicationError => "APPLICATION_ERROR",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one operation: a code and a message.
///
/// A successful status never carries a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: StatusCode,
    message: String,
}

impl Status {
    #[must_use]
    pub fn success() -> Self {
        Self {
            code: StatusCode::Success,
            message: String::new(),
        }
    }

    #[must_use]
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        let message = if code == StatusCode::Success {
            String::new()
        } else {
            message.into()
        };
        Self { code, message }
    }

    #[must_use]
    pub fn code(&self) -> StatusCode {
        self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Success
    }

    /// Overwrites code and message.
    pub fn set(&mut self, code: StatusCode, message: impl Into<String>) {
        *self = Status::new(code, message);
    }

    /// Merges another outcome into this one. The first error wins: a
    /// successful status adopts `other`, a failed one keeps its own.
    pub fn join(&mut self, other: &Status) {
        if self.is_ok() && !other.is_ok() {
            self.clone_from(other);
        }
    }

    /// Converts a failed status into an error value.
    pub fn or_die(&self) -> Result<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(Error::Status(self.clone()))
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::success()
    }
}

impl From<StatusCode> for Status {
    fn from(code: StatusCode) -> Self {
        Self::new(code, "")
    }
}

impl PartialEq<StatusCode> for Status {
    fn eq(&self, other: &StatusCode) -> bool {
        self.code == *other
    }
}

impl BitOrAssign for Status {
    fn bitor_assign(&mut self, rhs: Status) {
        if self.is_ok() && !rhs.is_ok() {
            *self = rhs;
        }
    }
}

impl BitOrAssign<&Status> for Status {
    fn bitor_assign(&mut self, rhs: &Status) {
        self.join(rhs);
    }
}

/// Folds many outcomes into the first error, or success.
impl FromIterator<Status> for Status {
    fn from_iter<I: IntoIterator<Item = Status>>(iter: I) -> Self {
        let mut joined = Status::success();
        for status in iter {
            joined |= status;
        }
        joined
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl From<&io::Error> for Status {
    fn from(err: &io::Error) -> Self {
        let code = match err.kind() {
            io::ErrorKind::NotFound => StatusCode::NotFoundError,
            io::ErrorKind::PermissionDenied => StatusCode::PermissionError,
            io::ErrorKind::AlreadyExists => StatusCode::DuplicationError,
            io::ErrorKind::InvalidInput => StatusCode::InvalidArgumentError,
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                StatusCode::BrokenDataError
            }
            io::ErrorKind::Interrupted => StatusCode::CanceledError,
            io::ErrorKind::Unsupported => StatusCode::NotImplementedError,
            _ => StatusCode::SystemError,
        };
        Status::new(code, err.to_string())
    }
}

/// A status together with the value the operation produced, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusAnd<T> {
    pub status: Status,
    pub value: Option<T>,
}

impl<T> StatusAnd<T> {
    #[must_use]
    pub fn new(status: Status, value: Option<T>) -> Self {
        Self { status, value }
    }

    #[must_use]
    pub fn ok(value: T) -> Self {
        Self {
            status: Status::success(),
            value: Some(value),
        }
    }

    #[must_use]
    pub fn failed(status: Status) -> Self {
        Self {
            status,
            value: None,
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// Copies the status into a caller-held slot and returns the value.
    pub fn assign_to(self, out: &mut Status) -> Option<T> {
        *out = self.status;
        self.value
    }

    /// Unwinds on a failed status.
    pub fn into_result(self) -> Result<Option<T>> {
        self.status.or_die()?;
        Ok(self.value)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StatusAnd<U> {
        StatusAnd {
            status: self.status,
            value: self.value.map(f),
        }
    }
}

impl<T> fmt::Display for StatusAnd<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{} ({value:?})", self.status),
            None => write!(f, "{}", self.status),
        }
    }
}
