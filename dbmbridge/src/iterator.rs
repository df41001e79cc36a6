//! Cursor over the records of a store.
//!
//! The cursor remembers the key it stands on, not a position in storage.
//! When that record disappears the cursor moves on to the next key the
//! next time it is read.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::context::Context;
use crate::engine::{Engine, Seek, Step};
use crate::error::{Error, Result};
use crate::idgen::HandleKind;
use crate::ops;
use crate::processor::Directive;
use crate::slot::NativeSlot;
use crate::status::{Status, StatusAnd, StatusCode};
use crate::Record;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Position {
    Unpositioned,
    OnRecord(Vec<u8>),
    Exhausted,
}

pub struct DbmIterator {
    slot: NativeSlot<Arc<dyn Engine>>,
    position: Position,
}

fn not_ordered() -> Status {
    Status::new(
        StatusCode::NotImplementedError,
        "backward navigation needs an ordered database",
    )
}

impl DbmIterator {
    pub(crate) fn new(ctx: &Context, engine: Arc<dyn Engine>) -> Result<Self> {
        let mut slot = ctx.slot(HandleKind::Iterator);
        let handle = slot.bind(engine)?;
        trace!(iterator = %handle, "iterator created");
        Ok(Self {
            slot,
            position: Position::Unpositioned,
        })
    }

    fn engine(&self) -> Result<Arc<dyn Engine>> {
        let engine = self.slot.get()?;
        if !engine.is_open() {
            return Err(Error::NotOpened(HandleKind::Store));
        }
        Ok(Arc::clone(engine))
    }

    fn land(&mut self, key: Option<Vec<u8>>) -> Status {
        self.position = key.map_or(Position::Exhausted, Position::OnRecord);
        Status::success()
    }

    /// Moves to the first record. An empty database leaves the cursor
    /// exhausted and still succeeds.
    pub fn first(&mut self) -> Result<Status> {
        let key = self.engine()?.seek(Seek::First);
        Ok(self.land(key))
    }

    pub fn last(&mut self) -> Result<Status> {
        let engine = self.engine()?;
        if !engine.is_ordered() {
            return Ok(not_ordered());
        }
        Ok(self.land(engine.seek(Seek::Last)))
    }

    /// Moves to `key`, or on an ordered database to the first key after it.
    pub fn jump(&mut self, key: impl AsRef<[u8]>) -> Result<Status> {
        let key = key.as_ref();
        let engine = self.engine()?;
        if engine.is_ordered() {
            return Ok(self.land(engine.seek(Seek::AtOrAfter(key))));
        }
        if ops::get(engine.as_ref(), key).is_ok() {
            Ok(self.land(Some(key.to_vec())))
        } else {
            self.position = Position::Exhausted;
            Ok(Status::new(StatusCode::NotFoundError, "no such record"))
        }
    }

    /// Moves to the last key before `key` (or at it, when `inclusive`).
    pub fn jump_lower(&mut self, key: impl AsRef<[u8]>, inclusive: bool) -> Result<Status> {
        let key = key.as_ref();
        let engine = self.engine()?;
        if !engine.is_ordered() {
            return Ok(not_ordered());
        }
        let seek = if inclusive {
            Seek::AtOrBefore(key)
        } else {
            Seek::Before(key)
        };
        Ok(self.land(engine.seek(seek)))
    }

    /// Moves to the first key after `key` (or at it, when `inclusive`).
    pub fn jump_upper(&mut self, key: impl AsRef<[u8]>, inclusive: bool) -> Result<Status> {
        let key = key.as_ref();
        let engine = self.engine()?;
        if !engine.is_ordered() {
            return Ok(not_ordered());
        }
        let seek = if inclusive {
            Seek::AtOrAfter(key)
        } else {
            Seek::After(key)
        };
        Ok(self.land(engine.seek(seek)))
    }

    /// Moves to the following record. Moving past the last record succeeds
    /// and exhausts the cursor; moving an exhausted or unpositioned cursor is
    /// `NotFoundError`.
    pub fn next(&mut self) -> Result<Status> {
        let engine = self.engine()?;
        let Position::OnRecord(key) = &self.position else {
            return Ok(Status::new(StatusCode::NotFoundError, "not positioned"));
        };
        let next = engine.seek(Seek::After(key));
        Ok(self.land(next))
    }

    pub fn previous(&mut self) -> Result<Status> {
        let engine = self.engine()?;
        if !engine.is_ordered() {
            return Ok(not_ordered());
        }
        let Position::OnRecord(key) = &self.position else {
            return Ok(Status::new(StatusCode::NotFoundError, "not positioned"));
        };
        let previous = engine.seek(Seek::Before(key));
        Ok(self.land(previous))
    }

    /// Current record. A vanished record moves the cursor forward.
    pub fn get(&mut self) -> Result<StatusAnd<Record>> {
        let engine = self.engine()?;
        loop {
            let Position::OnRecord(key) = &self.position else {
                return Ok(StatusAnd::failed(Status::new(
                    StatusCode::NotFoundError,
                    "not positioned",
                )));
            };
            let result = ops::get(engine.as_ref(), key);
            match result.value {
                Some(value) => return Ok(StatusAnd::ok((key.clone(), value))),
                None if result.status == StatusCode::NotFoundError => {
                    let next = engine.seek(Seek::After(key));
                    self.land(next);
                }
                None => return Ok(StatusAnd::failed(result.status)),
            }
        }
    }

    /// Key of the current record, if any.
    pub fn get_key(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.get()?.value.map(|(key, _)| key))
    }

    /// Value of the current record, if any.
    pub fn get_value(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.get()?.value.map(|(_, value)| value))
    }

    /// Replaces the value of the current record.
    pub fn set(&mut self, value: impl AsRef<[u8]>) -> Result<Status> {
        let engine = self.engine()?;
        let Position::OnRecord(key) = &self.position else {
            return Ok(Status::new(StatusCode::NotFoundError, "not positioned"));
        };
        let value = value.as_ref();
        let mut found = false;
        let mut processor = |_: &[u8], current: Option<&[u8]>| {
            found = current.is_some();
            if found {
                Directive::Replace(value.to_vec())
            } else {
                Directive::Keep
            }
        };
        let mut status = engine.process(key, &mut processor, true);
        if status.is_ok() && !found {
            status = Status::new(StatusCode::NotFoundError, "the record was removed");
        }
        Ok(status)
    }

    /// Removes the current record and moves to the one after it.
    pub fn remove(&mut self) -> Result<Status> {
        let engine = self.engine()?;
        let Position::OnRecord(key) = &self.position else {
            return Ok(Status::new(StatusCode::NotFoundError, "not positioned"));
        };
        let status = ops::remove(engine.as_ref(), key);
        if status.is_ok() {
            let next = engine.seek(Seek::After(key));
            self.land(next);
        }
        Ok(status)
    }

    /// Current record, then moves to the next one. Both happen in one
    /// engine call.
    pub fn step(&mut self) -> Result<StatusAnd<Record>> {
        let engine = self.engine()?;
        let Position::OnRecord(key) = &self.position else {
            return Ok(StatusAnd::failed(Status::new(
                StatusCode::NotFoundError,
                "not positioned",
            )));
        };
        match engine.step(key) {
            Ok(Some(Step { key, value, next })) => {
                self.land(next);
                Ok(StatusAnd::ok((key, value)))
            }
            Ok(None) => {
                self.land(None);
                Ok(StatusAnd::failed(Status::new(
                    StatusCode::NotFoundError,
                    "no more records",
                )))
            }
            Err(status) => Ok(StatusAnd::failed(status)),
        }
    }

    /// Removes and returns the first record of the database. The cursor
    /// position is not changed.
    pub fn pop_first(&mut self) -> Result<StatusAnd<Record>> {
        Ok(ops::pop_first(self.engine()?.as_ref()))
    }

    /// Releases the cursor. Further calls fail as not opened.
    pub fn destruct(&mut self) -> Result<()> {
        let handle = self.slot.handle();
        self.slot.release()?;
        self.position = Position::Unpositioned;
        trace!(iterator = ?handle, "iterator released");
        Ok(())
    }
}

impl fmt::Display for DbmIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.position {
            Position::OnRecord(key) => {
                write!(f, "DbmIterator(key={:?})", String::from_utf8_lossy(key))
            }
            Position::Unpositioned => write!(f, "DbmIterator(unpositioned)"),
            Position::Exhausted => write!(f, "DbmIterator(exhausted)"),
        }
    }
}
