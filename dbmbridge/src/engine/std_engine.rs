//! Single-map engine.
//!
//! Records live in a `BTreeMap` behind a reader/writer lock. With a
//! non-empty path the map is loaded from a flat record file at open and
//! written back (temporary file, then rename) on synchronize and close.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use super::flock::FileLock;
use super::{Engine, EngineKind, Layout, Seek, Step};
use crate::config::{OpenOptions, Params};
use crate::flat;
use crate::processor::{decide, Directive, RecordProcessor};
use crate::status::{Status, StatusCode};

type Records = BTreeMap<Vec<u8>, Vec<u8>>;

pub struct StdEngine {
    path: String,
    layout: Layout,
    writable: bool,
    sync_hard: bool,
    open: AtomicBool,
    records: RwLock<Records>,
    lock: Mutex<Option<FileLock>>,
    /// Bits of the modification time as `f64` seconds.
    modified: AtomicU64,
}

impl StdEngine {
    pub(crate) fn open(
        path: &str,
        layout: Layout,
        writable: bool,
        options: &OpenOptions,
    ) -> Result<Self, Status> {
        let mut records = Records::new();
        let mut lock = None;
        let mut modified = seconds_since_epoch(SystemTime::now());
        if !path.is_empty() {
            let file_path = Path::new(path);
            let exists = file_path.exists();
            if !exists && (!writable || options.no_create) {
                return Err(Status::new(
                    StatusCode::NotFoundError,
                    format!("no such file: {path}"),
                ));
            }
            if writable && !options.no_lock {
                lock = Some(lock_store(path, !options.no_wait)?);
            }
            if exists && !(writable && options.truncate) {
                let data = fs::read(file_path).map_err(|e| Status::from(&e))?;
                records = flat::decode_pairs(&data)?.into_iter().collect();
                modified = fs::metadata(file_path)
                    .and_then(|meta| meta.modified())
                    .map_or(modified, seconds_since_epoch);
            } else {
                into_result(write_snapshot(file_path, &records, options.sync_hard))?;
            }
        }
        let engine = Self {
            path: path.to_string(),
            layout,
            writable,
            sync_hard: options.sync_hard,
            open: AtomicBool::new(true),
            records: RwLock::new(records),
            lock: Mutex::new(lock),
            modified: AtomicU64::new(modified.to_bits()),
        };
        debug!(
            path,
            class = engine.class_name(),
            writable,
            num_records = engine.records.read().len(),
            "engine opened"
        );
        Ok(engine)
    }

    fn check_open(&self) -> Result<(), Status> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Status::new(
                StatusCode::PreconditionError,
                "not opened database",
            ))
        }
    }

    fn check_writable(&self) -> Result<(), Status> {
        self.check_open()?;
        if self.writable {
            Ok(())
        } else {
            Err(Status::new(
                StatusCode::PreconditionError,
                "not writable database",
            ))
        }
    }

    fn touch(&self) {
        let now = seconds_since_epoch(SystemTime::now());
        self.modified.store(now.to_bits(), Ordering::Release);
    }

    fn persistent(&self) -> bool {
        !self.path.is_empty()
    }

    fn flush(&self, hard: bool) -> Status {
        if !self.persistent() || !self.writable {
            return Status::success();
        }
        let records = self.records.read();
        write_snapshot(Path::new(&self.path), &records, hard)
    }
}

fn seconds_since_epoch(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0.0, |elapsed| elapsed.as_secs_f64())
}

fn lock_store(path: &str, wait: bool) -> Result<FileLock, Status> {
    FileLock::lock(path, wait).map_err(|e| {
        if e.kind() == std::io::ErrorKind::WouldBlock {
            Status::new(
                StatusCode::InfeasibleError,
                format!("database is locked by another handle: {path}"),
            )
        } else {
            Status::from(&e)
        }
    })
}

fn into_result(status: Status) -> Result<(), Status> {
    if status.is_ok() {
        Ok(())
    } else {
        Err(status)
    }
}

fn write_snapshot(path: &Path, records: &Records, hard: bool) -> Status {
    let data = flat::encode_pairs(
        records
            .iter()
            .map(|(key, value)| (key.as_slice(), value.as_slice())),
    );
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut status = match fs::File::create(&tmp_path) {
        Ok(mut file) => {
            let mut status = Status::success();
            if let Err(e) = file.write_all(&data) {
                status |= Status::from(&e);
            }
            if hard {
                if let Err(e) = file.sync_all() {
                    status |= Status::from(&e);
                }
            }
            status
        }
        Err(e) => return Status::from(&e),
    };
    if status.is_ok() {
        if let Err(e) = fs::rename(&tmp_path, path) {
            status |= Status::from(&e);
        }
    }
    if status.is_ok() {
        trace!(path = %path.display(), bytes = data.len(), "snapshot written");
    } else {
        warn!(path = %path.display(), %status, "snapshot failed");
        if let Err(e) = fs::remove_file(&tmp_path) {
            trace!(path = %tmp_path.display(), error = %e, "temporary file not removed");
        }
    }
    status
}

impl Engine for StdEngine {
    fn class_name(&self) -> &'static str {
        match (self.layout.kind, self.layout.on_memory) {
            (EngineKind::Hash, false) => "HashDBM",
            (EngineKind::Tree, false) => "TreeDBM",
            (EngineKind::Hash, true) => "TinyDBM",
            (EngineKind::Tree, true) => "BabyDBM",
        }
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    fn is_ordered(&self) -> bool {
        self.layout.kind == EngineKind::Tree
    }

    fn is_healthy(&self) -> bool {
        self.is_open()
    }

    fn close(&self) -> Status {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Status::new(StatusCode::PreconditionError, "not opened database");
        }
        let status = self.flush(self.sync_hard);
        if let Some(lock) = self.lock.lock().take() {
            trace!(lock = %lock.path().display(), "store lock released");
        }
        debug!(path = %self.path, %status, "engine closed");
        status
    }

    fn process(&self, key: &[u8], processor: &mut dyn RecordProcessor, writable: bool) -> Status {
        if writable {
            if let Err(status) = self.check_writable() {
                return status;
            }
            let mut records = self.records.write();
            let (directive, status) = decide(processor, key, records.get(key).map(Vec::as_slice));
            match directive {
                Directive::Replace(value) => {
                    records.insert(key.to_vec(), value);
                    self.touch();
                }
                Directive::Delete => {
                    if records.remove(key).is_some() {
                        self.touch();
                    }
                }
                Directive::Keep => {}
            }
            status
        } else {
            if let Err(status) = self.check_open() {
                return status;
            }
            let records = self.records.read();
            let (directive, mut status) =
                decide(processor, key, records.get(key).map(Vec::as_slice));
            if directive != Directive::Keep {
                status |= Status::new(
                    StatusCode::PreconditionError,
                    "read-only processing cannot modify a record",
                );
            }
            status
        }
    }

    fn rekey(&self, old_key: &[u8], new_key: &[u8], overwrite: bool, copying: bool) -> Status {
        if let Err(status) = self.check_writable() {
            return status;
        }
        let mut records = self.records.write();
        let Some(value) = records.get(old_key).cloned() else {
            return Status::new(StatusCode::NotFoundError, "no such record");
        };
        if !overwrite && records.contains_key(new_key) {
            return Status::new(StatusCode::DuplicationError, "the new key exists");
        }
        if !copying {
            records.remove(old_key);
        }
        records.insert(new_key.to_vec(), value);
        self.touch();
        Status::success()
    }

    fn count(&self) -> i64 {
        if !self.is_open() {
            return -1;
        }
        i64::try_from(self.records.read().len()).unwrap_or(i64::MAX)
    }

    fn file_size(&self) -> i64 {
        if !self.is_open() {
            return -1;
        }
        if self.persistent() {
            return fs::metadata(&self.path)
                .ok()
                .and_then(|meta| i64::try_from(meta.len()).ok())
                .unwrap_or(-1);
        }
        let bytes: usize = self
            .records
            .read()
            .iter()
            .map(|(key, value)| key.len() + value.len())
            .sum();
        i64::try_from(bytes).unwrap_or(i64::MAX)
    }

    fn timestamp(&self) -> Option<f64> {
        self.is_open()
            .then(|| f64::from_bits(self.modified.load(Ordering::Acquire)))
    }

    fn clear(&self) -> Status {
        if let Err(status) = self.check_writable() {
            return status;
        }
        self.records.write().clear();
        self.touch();
        Status::success()
    }

    fn rebuild(&self, params: &Params) -> Status {
        if let Err(status) = self.check_writable() {
            return status;
        }
        if !params.is_empty() {
            debug!(path = %self.path, ?params, "rebuild parameters ignored");
        }
        self.flush(false)
    }

    fn should_be_rebuilt(&self) -> bool {
        false
    }

    fn synchronize(&self, hard: bool, params: &Params) -> Status {
        if let Err(status) = self.check_open() {
            return status;
        }
        if !params.is_empty() {
            debug!(path = %self.path, ?params, "synchronize parameters ignored");
        }
        self.flush(hard)
    }

    fn copy_file_data(&self, dest_path: &str, sync_hard: bool) -> Status {
        if let Err(status) = self.check_open() {
            return status;
        }
        let records = self.records.read();
        write_snapshot(Path::new(dest_path), &records, sync_hard)
    }

    fn seek(&self, seek: Seek<'_>) -> Option<Vec<u8>> {
        if !self.is_open() {
            return None;
        }
        let records = self.records.read();
        let found = match seek {
            Seek::First => records.keys().next(),
            Seek::Last => records.keys().next_back(),
            Seek::AtOrAfter(key) => records
                .range::<[u8], _>((Bound::Included(key), Bound::Unbounded))
                .next()
                .map(|(key, _)| key),
            Seek::After(key) => records
                .range::<[u8], _>((Bound::Excluded(key), Bound::Unbounded))
                .next()
                .map(|(key, _)| key),
            Seek::AtOrBefore(key) => records
                .range::<[u8], _>((Bound::Unbounded, Bound::Included(key)))
                .next_back()
                .map(|(key, _)| key),
            Seek::Before(key) => records
                .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(key)))
                .next_back()
                .map(|(key, _)| key),
        };
        found.cloned()
    }

    fn step(&self, key: &[u8]) -> Result<Option<Step>, Status> {
        self.check_open()?;
        let records = self.records.read();
        let mut range = records.range::<[u8], _>((Bound::Included(key), Bound::Unbounded));
        let Some((key, value)) = range.next() else {
            return Ok(None);
        };
        Ok(Some(Step {
            key: key.clone(),
            value: value.clone(),
            next: range.next().map(|(next, _)| next.clone()),
        }))
    }

    fn inspect(&self) -> Vec<(String, String)> {
        vec![
            ("class".to_string(), self.class_name().to_string()),
            ("path".to_string(), self.path.clone()),
            ("num_records".to_string(), self.count().to_string()),
            ("file_size".to_string(), self.file_size().to_string()),
            ("writable".to_string(), self.writable.to_string()),
            ("healthy".to_string(), self.is_healthy().to_string()),
        ]
    }
}
