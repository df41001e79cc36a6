//! Record mutation protocol.
//!
//! The engine owns the record; a caller-supplied [`RecordProcessor`] only
//! decides what happens to it. For one key the engine calls exactly one of
//! `process_full` (record exists) or `process_empty` (record absent) and
//! applies the returned [`Directive`] under the record lock. The processor
//! never touches storage directly.
//!
//! A processor that panics is treated as if it returned [`Directive::Keep`];
//! the failure is reported as an `ApplicationError` status.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::warn;

use crate::status::{Status, StatusCode};

/// What to do with the record after a processor has looked at it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Store these bytes as the new value.
    Replace(Vec<u8>),
    /// Leave the record as it is (absent stays absent).
    Keep,
    /// Remove the record.
    Delete,
}

/// Decision procedure run under the record lock.
///
/// Implementations must return in bounded time and must not call back into
/// the store for the same key.
pub trait RecordProcessor {
    /// Called with the current value when a record exists.
    fn process_full(&mut self, key: &[u8], value: &[u8]) -> Directive;

    /// Called when no record exists for the key.
    fn process_empty(&mut self, key: &[u8]) -> Directive;
}

impl<F> RecordProcessor for F
where
    F: FnMut(&[u8], Option<&[u8]>) -> Directive,
{
    fn process_full(&mut self, key: &[u8], value: &[u8]) -> Directive {
        self(key, Some(value))
    }

    fn process_empty(&mut self, key: &[u8]) -> Directive {
        self(key, None)
    }
}

/// Asks `processor` for a decision on the current state of `key`.
pub(crate) fn decide(
    processor: &mut dyn RecordProcessor,
    key: &[u8],
    current: Option<&[u8]>,
) -> (Directive, Status) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| match current {
        Some(value) => processor.process_full(key, value),
        None => processor.process_empty(key),
    }));
    match outcome {
        Ok(directive) => (directive, Status::success()),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(key_len = key.len(), %message, "record processor failed, record left untouched");
            (
                Directive::Keep,
                Status::new(
                    StatusCode::ApplicationError,
                    format!("record processor failed: {message}"),
                ),
            )
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Expected state of a record in a compare-and-exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expected {
    /// The record must not exist.
    Absent,
    /// Matches anything, including absence.
    Any,
    /// The record must exist, whatever its value.
    Existing,
    /// The record must exist with exactly this value.
    Value(Vec<u8>),
}

impl Expected {
    #[must_use]
    pub fn matches(&self, current: Option<&[u8]>) -> bool {
        match (self, current) {
            (Expected::Any, _) | (Expected::Absent, None) | (Expected::Existing, Some(_)) => true,
            (Expected::Value(expected), Some(value)) => expected.as_slice() == value,
            _ => false,
        }
    }
}

impl From<&[u8]> for Expected {
    fn from(value: &[u8]) -> Self {
        Expected::Value(value.to_vec())
    }
}

impl From<Option<&[u8]>> for Expected {
    fn from(value: Option<&[u8]>) -> Self {
        value.map_or(Expected::Absent, Expected::from)
    }
}

/// Desired state of a record after a successful compare-and-exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Desired {
    /// Store this value.
    Value(Vec<u8>),
    /// Remove the record. Also the meaning of an absent or wildcard desired
    /// value.
    Remove,
    /// Leave the record as it is.
    Keep,
}

impl From<&[u8]> for Desired {
    fn from(value: &[u8]) -> Self {
        Desired::Value(value.to_vec())
    }
}

impl From<Option<&[u8]>> for Desired {
    fn from(value: Option<&[u8]>) -> Self {
        value.map_or(Desired::Remove, Desired::from)
    }
}

/// Reads the value without changing anything.
#[derive(Debug, Default)]
pub struct GetProcessor {
    value: Option<Vec<u8>>,
}

impl GetProcessor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn into_value(self) -> Option<Vec<u8>> {
        self.value
    }
}

impl RecordProcessor for GetProcessor {
    fn process_full(&mut self, _key: &[u8], value: &[u8]) -> Directive {
        self.value = Some(value.to_vec());
        Directive::Keep
    }

    fn process_empty(&mut self, _key: &[u8]) -> Directive {
        Directive::Keep
    }
}

/// Stores a value, optionally refusing to overwrite, and remembers the old
/// value.
#[derive(Debug)]
pub struct SetProcessor {
    value: Vec<u8>,
    overwrite: bool,
    status: Status,
    old_value: Option<Vec<u8>>,
}

impl SetProcessor {
    #[must_use]
    pub fn new(value: Vec<u8>, overwrite: bool) -> Self {
        Self {
            value,
            overwrite,
            status: Status::success(),
            old_value: None,
        }
    }

    /// Outcome as seen by the processor and the value that was there before.
    #[must_use]
    pub fn finish(self) -> (Status, Option<Vec<u8>>) {
        (self.status, self.old_value)
    }
}

impl RecordProcessor for SetProcessor {
    fn process_full(&mut self, _key: &[u8], value: &[u8]) -> Directive {
        self.old_value = Some(value.to_vec());
        if self.overwrite {
            Directive::Replace(std::mem::take(&mut self.value))
        } else {
            self.status = Status::new(StatusCode::DuplicationError, "the record exists");
            Directive::Keep
        }
    }

    fn process_empty(&mut self, _key: &[u8]) -> Directive {
        Directive::Replace(std::mem::take(&mut self.value))
    }
}

/// Removes the record and remembers what it held.
#[derive(Debug)]
pub struct RemoveProcessor {
    status: Status,
    old_value: Option<Vec<u8>>,
}

impl Default for RemoveProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoveProcessor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: Status::success(),
            old_value: None,
        }
    }

    #[must_use]
    pub fn finish(self) -> (Status, Option<Vec<u8>>) {
        (self.status, self.old_value)
    }
}

impl RecordProcessor for RemoveProcessor {
    fn process_full(&mut self, _key: &[u8], value: &[u8]) -> Directive {
        self.old_value = Some(value.to_vec());
        Directive::Delete
    }

    fn process_empty(&mut self, _key: &[u8]) -> Directive {
        self.status = Status::new(StatusCode::NotFoundError, "no such record");
        Directive::Keep
    }
}

/// Appends to the existing value with a delimiter, or stores the value as
/// is when the record is absent.
#[derive(Debug)]
pub struct AppendProcessor<'a> {
    value: &'a [u8],
    delim: &'a [u8],
}

impl<'a> AppendProcessor<'a> {
    #[must_use]
    pub fn new(value: &'a [u8], delim: &'a [u8]) -> Self {
        Self { value, delim }
    }
}

impl RecordProcessor for AppendProcessor<'_> {
    fn process_full(&mut self, _key: &[u8], value: &[u8]) -> Directive {
        let mut joined = Vec::with_capacity(value.len() + self.delim.len() + self.value.len());
        joined.extend_from_slice(value);
        joined.extend_from_slice(self.delim);
        joined.extend_from_slice(self.value);
        Directive::Replace(joined)
    }

    fn process_empty(&mut self, _key: &[u8]) -> Directive {
        Directive::Replace(self.value.to_vec())
    }
}

/// Compare-and-exchange on one record.
#[derive(Debug)]
pub struct CompareExchangeProcessor {
    expected: Expected,
    desired: Option<Desired>,
    status: Status,
    actual: Option<Vec<u8>>,
}

impl CompareExchangeProcessor {
    #[must_use]
    pub fn new(expected: Expected, desired: Desired) -> Self {
        Self {
            expected,
            desired: Some(desired),
            status: Status::success(),
            actual: None,
        }
    }

    /// Outcome and the value found before the exchange.
    #[must_use]
    pub fn finish(self) -> (Status, Option<Vec<u8>>) {
        (self.status, self.actual)
    }

    fn decide(&mut self, current: Option<&[u8]>) -> Directive {
        self.actual = current.map(<[u8]>::to_vec);
        if !self.expected.matches(current) {
            self.status = Status::new(StatusCode::InfeasibleError, "unexpected value");
            return Directive::Keep;
        }
        match self.desired.take() {
            Some(Desired::Value(value)) => Directive::Replace(value),
            Some(Desired::Remove) if current.is_some() => Directive::Delete,
            _ => Directive::Keep,
        }
    }
}

impl RecordProcessor for CompareExchangeProcessor {
    fn process_full(&mut self, _key: &[u8], value: &[u8]) -> Directive {
        self.decide(Some(value))
    }

    fn process_empty(&mut self, _key: &[u8]) -> Directive {
        self.decide(None)
    }
}

/// Adds to an integer stored as 8 big-endian bytes.
///
/// An absent record is created holding `initial`. A `delta` of `i64::MIN`
/// only reads the current number.
#[derive(Debug)]
pub struct IncrementProcessor {
    delta: i64,
    initial: i64,
    status: Status,
    current: i64,
}

impl IncrementProcessor {
    pub const READ_ONLY: i64 = i64::MIN;

    #[must_use]
    pub fn new(delta: i64, initial: i64) -> Self {
        Self {
            delta,
            initial,
            status: Status::success(),
            current: initial,
        }
    }

    #[must_use]
    pub fn finish(self) -> (Status, i64) {
        (self.status, self.current)
    }
}

impl RecordProcessor for IncrementProcessor {
    fn process_full(&mut self, _key: &[u8], value: &[u8]) -> Directive {
        let Ok(bytes) = <[u8; 8]>::try_from(value) else {
            self.status = Status::new(
                StatusCode::InfeasibleError,
                format!("value is not an 8-byte integer: {} bytes", value.len()),
            );
            return Directive::Keep;
        };
        let stored = i64::from_be_bytes(bytes);
        if self.delta == Self::READ_ONLY {
            self.current = stored;
            return Directive::Keep;
        }
        self.current = stored.wrapping_add(self.delta);
        Directive::Replace(self.current.to_be_bytes().to_vec())
    }

    fn process_empty(&mut self, _key: &[u8]) -> Directive {
        self.current = self.initial;
        if self.delta == Self::READ_ONLY {
            return Directive::Keep;
        }
        Directive::Replace(self.initial.to_be_bytes().to_vec())
    }
}
