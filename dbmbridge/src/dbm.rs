//! Synchronous store handle.
//!
//! Operations report engine outcomes as [`Status`] values inside `Ok`. An
//! `Err` means the call itself was wrong: the store is not open, or an
//! argument was rejected before reaching the engine.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{OpenOptions, Params};
use crate::context::Context;
use crate::engine::{self, Engine};
use crate::error::{Error, Result};
use crate::file::File;
use crate::idgen::HandleKind;
use crate::iterator::DbmIterator;
use crate::ops;
use crate::processor::{Desired, Expected, RecordProcessor};
use crate::slot::NativeSlot;
use crate::status::{Status, StatusAnd};
use crate::Record;

pub struct Dbm {
    ctx: Context,
    slot: NativeSlot<Arc<dyn Engine>>,
}

impl Dbm {
    #[must_use]
    pub fn new(ctx: &Context) -> Self {
        Self {
            ctx: ctx.clone(),
            slot: ctx.slot(HandleKind::Store),
        }
    }

    /// Opens the database at `path`.
    ///
    /// The open flags `truncate`, `no_create`, `no_wait`, `no_lock`,
    /// `sync_hard` and `num_shards` are taken out of `params`; everything
    /// else is passed to the engine. `dbm` names the engine class
    /// explicitly, otherwise the path extension decides.
    pub fn open(&mut self, path: &str, writable: bool, params: &Params) -> Result<Status> {
        if self.slot.is_live() {
            return Err(Error::AlreadyOpened(HandleKind::Store));
        }
        let mut params = params.clone();
        let options = OpenOptions::consume(&mut params)?;
        match engine::open_engine(path, writable, &options, &params) {
            Ok(engine) => {
                let class = engine.class_name();
                let handle = self.slot.bind(engine)?;
                info!(store = %handle, path, class, writable, "database opened");
                Ok(Status::success())
            }
            Err(status) => {
                warn!(path, %status, "database open failed");
                Ok(status)
            }
        }
    }

    /// Closes the database. Closing twice is a state error.
    pub fn close(&mut self) -> Result<Status> {
        let handle = self.slot.handle();
        let engine = self.slot.release()?;
        let status = engine.close();
        info!(store = ?handle, %status, "database closed");
        Ok(status)
    }

    /// Closes the database if it is open. Safe to call any number of times.
    pub fn destruct(&mut self) {
        if self.slot.is_live() {
            if let Ok(status) = self.close() {
                if !status.is_ok() {
                    warn!(%status, "implicit close failed");
                }
            }
        }
    }

    fn engine(&self) -> Result<&dyn Engine> {
        self.slot.get().map(|engine| engine.as_ref())
    }

    pub(crate) fn shared_engine(&self) -> Result<Arc<dyn Engine>> {
        self.slot.get().map(Arc::clone)
    }

    pub(crate) fn context(&self) -> &Context {
        &self.ctx
    }

    /// Runs `processor` on the record of `key`.
    pub fn process(
        &self,
        key: impl AsRef<[u8]>,
        processor: &mut dyn RecordProcessor,
        writable: bool,
    ) -> Result<Status> {
        Ok(ops::process(self.engine()?, key.as_ref(), processor, writable))
    }

    /// Runs each processor on its key in order.
    pub fn process_multi(
        &self,
        requests: &mut [(&[u8], &mut dyn RecordProcessor)],
        writable: bool,
    ) -> Result<Status> {
        Ok(ops::process_multi(self.engine()?, requests, writable))
    }

    pub fn contains(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        Ok(ops::get(self.engine()?, key.as_ref()).is_ok())
    }

    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<StatusAnd<Vec<u8>>> {
        Ok(ops::get(self.engine()?, key.as_ref()))
    }

    /// Records found for `keys`; absent keys are left out.
    pub fn get_multi<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
        let result = ops::get_multi(self.engine()?, keys);
        Ok(result.value.unwrap_or_default())
    }

    pub fn set(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        overwrite: bool,
    ) -> Result<Status> {
        Ok(ops::set(self.engine()?, key.as_ref(), value.as_ref(), overwrite))
    }

    pub fn set_multi<K: AsRef<[u8]>, V: AsRef<[u8]>>(
        &self,
        records: &[(K, V)],
        overwrite: bool,
    ) -> Result<Status> {
        Ok(ops::set_multi(self.engine()?, records, overwrite))
    }

    /// Sets the value and returns the value it replaced, if there was one.
    pub fn set_and_get(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        overwrite: bool,
    ) -> Result<StatusAnd<Vec<u8>>> {
        Ok(ops::set_and_get(
            self.engine()?,
            key.as_ref(),
            value.as_ref(),
            overwrite,
        ))
    }

    pub fn remove(&self, key: impl AsRef<[u8]>) -> Result<Status> {
        Ok(ops::remove(self.engine()?, key.as_ref()))
    }

    pub fn remove_multi<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<Status> {
        Ok(ops::remove_multi(self.engine()?, keys))
    }

    pub fn remove_and_get(&self, key: impl AsRef<[u8]>) -> Result<StatusAnd<Vec<u8>>> {
        Ok(ops::remove_and_get(self.engine()?, key.as_ref()))
    }

    pub fn append(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        delim: impl AsRef<[u8]>,
    ) -> Result<Status> {
        Ok(ops::append(
            self.engine()?,
            key.as_ref(),
            value.as_ref(),
            delim.as_ref(),
        ))
    }

    pub fn append_multi<K: AsRef<[u8]>, V: AsRef<[u8]>>(
        &self,
        records: &[(K, V)],
        delim: impl AsRef<[u8]>,
    ) -> Result<Status> {
        Ok(ops::append_multi(self.engine()?, records, delim.as_ref()))
    }

    /// Replaces the record with `desired` if its state matches `expected`.
    /// A mismatch is reported as `InfeasibleError`.
    pub fn compare_exchange(
        &self,
        key: impl AsRef<[u8]>,
        expected: Expected,
        desired: Desired,
    ) -> Result<Status> {
        Ok(ops::compare_exchange(
            self.engine()?,
            key.as_ref(),
            expected,
            desired,
        ))
    }

    /// Like [`Dbm::compare_exchange`], also returning the value found.
    pub fn compare_exchange_and_get(
        &self,
        key: impl AsRef<[u8]>,
        expected: Expected,
        desired: Desired,
    ) -> Result<StatusAnd<Vec<u8>>> {
        Ok(ops::compare_exchange_and_get(
            self.engine()?,
            key.as_ref(),
            expected,
            desired,
        ))
    }

    /// Adds `delta` to the 8-byte big-endian integer at `key`. An absent
    /// record is created holding `initial`. `i64::MIN` as `delta` reads
    /// without changing.
    pub fn increment(
        &self,
        key: impl AsRef<[u8]>,
        delta: i64,
        initial: i64,
    ) -> Result<StatusAnd<i64>> {
        Ok(ops::increment(self.engine()?, key.as_ref(), delta, initial))
    }

    pub fn compare_exchange_multi<K: AsRef<[u8]>, L: AsRef<[u8]>>(
        &self,
        expected: &[(K, Expected)],
        desired: &[(L, Desired)],
    ) -> Result<Status> {
        Ok(ops::compare_exchange_multi(self.engine()?, expected, desired))
    }

    pub fn rekey(
        &self,
        old_key: impl AsRef<[u8]>,
        new_key: impl AsRef<[u8]>,
        overwrite: bool,
        copying: bool,
    ) -> Result<Status> {
        Ok(ops::rekey(
            self.engine()?,
            old_key.as_ref(),
            new_key.as_ref(),
            overwrite,
            copying,
        ))
    }

    pub fn pop_first(&self) -> Result<StatusAnd<Record>> {
        Ok(ops::pop_first(self.engine()?))
    }

    /// Stores `value` under a timestamp key. Negative `wtime` means now.
    pub fn push_last(&self, value: impl AsRef<[u8]>, wtime: f64) -> Result<Status> {
        Ok(ops::push_last(self.engine()?, value.as_ref(), wtime))
    }

    pub fn count(&self) -> Result<i64> {
        Ok(self.engine()?.count())
    }

    pub fn file_size(&self) -> Result<i64> {
        Ok(self.engine()?.file_size())
    }

    /// Seconds since the epoch of the last modification. `None` when the
    /// engine cannot tell.
    pub fn timestamp(&self) -> Result<Option<f64>> {
        Ok(self.engine()?.timestamp())
    }

    pub fn file_path(&self) -> Result<String> {
        Ok(self.engine()?.path().to_string())
    }

    pub fn clear(&self) -> Result<Status> {
        Ok(ops::clear(self.engine()?))
    }

    pub fn rebuild(&self, params: &Params) -> Result<Status> {
        Ok(ops::rebuild(self.engine()?, params))
    }

    pub fn should_be_rebuilt(&self) -> Result<bool> {
        Ok(self.engine()?.should_be_rebuilt())
    }

    pub fn synchronize(&self, hard: bool, params: &Params) -> Result<Status> {
        Ok(ops::synchronize(self.engine()?, hard, params))
    }

    pub fn copy_file_data(&self, dest_path: &str, sync_hard: bool) -> Result<Status> {
        Ok(ops::copy_file_data(self.engine()?, dest_path, sync_hard))
    }

    /// Copies every record into another open database.
    pub fn export(&self, dest: &Dbm) -> Result<Status> {
        Ok(ops::export(self.engine()?, dest.engine()?))
    }

    pub fn export_to_flat_records(&self, dest: &File) -> Result<Status> {
        let dest = dest.core()?;
        Ok(ops::export_to_flat_records(self.engine()?, &dest))
    }

    pub fn import_from_flat_records(&self, src: &File) -> Result<Status> {
        let src = src.core()?;
        Ok(ops::import_from_flat_records(self.engine()?, &src))
    }

    pub fn export_keys_as_lines(&self, dest: &File) -> Result<Status> {
        let dest = dest.core()?;
        Ok(ops::export_keys_as_lines(self.engine()?, &dest))
    }

    pub fn inspect(&self) -> Result<BTreeMap<String, String>> {
        Ok(ops::inspect(self.engine()?))
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.slot.is_live()
    }

    pub fn is_writable(&self) -> Result<bool> {
        Ok(self.engine()?.is_writable())
    }

    pub fn is_healthy(&self) -> Result<bool> {
        Ok(self.engine()?.is_healthy())
    }

    pub fn is_ordered(&self) -> Result<bool> {
        Ok(self.engine()?.is_ordered())
    }

    /// Keys matching `pattern`. `mode` is `contain`, `begin` or `end`;
    /// `capacity` zero means no limit. Fails with the engine status instead
    /// of returning it.
    pub fn search(
        &self,
        mode: &str,
        pattern: impl AsRef<[u8]>,
        capacity: usize,
    ) -> Result<Vec<Vec<u8>>> {
        let result = ops::search(self.engine()?, mode, pattern.as_ref(), capacity);
        result.status.or_die()?;
        Ok(result.value.unwrap_or_default())
    }

    /// A cursor over this database. It stays valid after this handle is
    /// closed but then reports every operation as not opened.
    pub fn make_iterator(&self) -> Result<DbmIterator> {
        DbmIterator::new(&self.ctx, self.shared_engine()?)
    }
}

impl Drop for Dbm {
    fn drop(&mut self) {
        if self.slot.is_live() {
            debug!(store = ?self.slot.handle(), "closing database on drop");
            self.destruct();
        }
    }
}

impl fmt::Display for Dbm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.engine() {
            Ok(engine) => write!(
                f,
                "Dbm(class={}, path={:?}, num_records={})",
                engine.class_name(),
                engine.path(),
                engine.count()
            ),
            Err(_) => write!(f, "Dbm(unopened)"),
        }
    }
}
