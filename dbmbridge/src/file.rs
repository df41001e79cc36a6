//! Raw file handle used for flat record import and export.

use std::fmt;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::{OpenOptions, Params};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::idgen::HandleKind;
use crate::slot::NativeSlot;
use crate::status::{Status, StatusAnd, StatusCode};

pub(crate) struct FileCore {
    path: String,
    writable: bool,
    file: Mutex<fs::File>,
}

impl FileCore {
    fn check_writable(&self) -> std::result::Result<(), Status> {
        if self.writable {
            Ok(())
        } else {
            Err(Status::new(
                StatusCode::PreconditionError,
                "not writable file",
            ))
        }
    }

    pub(crate) fn read_at(&self, offset: u64, buf: &mut [u8]) -> Status {
        let mut file = self.file.lock();
        let result = file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| file.read_exact(buf));
        match result {
            Ok(()) => Status::success(),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Status::new(
                StatusCode::InfeasibleError,
                format!("read beyond end of file at {offset}"),
            ),
            Err(e) => Status::from(&e),
        }
    }

    pub(crate) fn read_all(&self) -> std::result::Result<Vec<u8>, Status> {
        let mut file = self.file.lock();
        let mut data = Vec::new();
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_to_end(&mut data))
            .map_err(|e| Status::from(&e))?;
        Ok(data)
    }

    pub(crate) fn write_at(&self, offset: u64, data: &[u8]) -> Status {
        if let Err(status) = self.check_writable() {
            return status;
        }
        let mut file = self.file.lock();
        match file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| file.write_all(data))
        {
            Ok(()) => Status::success(),
            Err(e) => Status::from(&e),
        }
    }

    pub(crate) fn append(&self, data: &[u8]) -> StatusAnd<u64> {
        if let Err(status) = self.check_writable() {
            return StatusAnd::failed(status);
        }
        let mut file = self.file.lock();
        let result = file.seek(SeekFrom::End(0)).and_then(|offset| {
            file.write_all(data)?;
            Ok(offset)
        });
        match result {
            Ok(offset) => StatusAnd::ok(offset),
            Err(e) => StatusAnd::failed(Status::from(&e)),
        }
    }

    fn truncate(&self, size: u64) -> Status {
        if let Err(status) = self.check_writable() {
            return status;
        }
        match self.file.lock().set_len(size) {
            Ok(()) => Status::success(),
            Err(e) => Status::from(&e),
        }
    }

    fn synchronize(&self, hard: bool) -> Status {
        let file = self.file.lock();
        let result = if hard {
            file.sync_all()
        } else {
            file.sync_data()
        };
        match result {
            Ok(()) => Status::success(),
            Err(e) => Status::from(&e),
        }
    }

    fn size(&self) -> std::result::Result<u64, Status> {
        self.file
            .lock()
            .metadata()
            .map(|meta| meta.len())
            .map_err(|e| Status::from(&e))
    }
}

pub struct File {
    slot: NativeSlot<Arc<FileCore>>,
}

impl File {
    #[must_use]
    pub fn new(ctx: &Context) -> Self {
        Self {
            slot: ctx.slot(HandleKind::File),
        }
    }

    /// Opens `path`. Recognized parameters are `truncate` and `no_create`.
    pub fn open(&mut self, path: &str, writable: bool, params: &Params) -> Result<Status> {
        if self.slot.is_live() {
            return Err(Error::AlreadyOpened(HandleKind::File));
        }
        let mut params = params.clone();
        let options = OpenOptions::consume(&mut params)?;
        let opened = fs::OpenOptions::new()
            .read(true)
            .write(writable)
            .create(writable && !options.no_create)
            .truncate(writable && options.truncate)
            .open(path);
        match opened {
            Ok(file) => {
                let core = FileCore {
                    path: path.to_string(),
                    writable,
                    file: Mutex::new(file),
                };
                let handle = self.slot.bind(Arc::new(core))?;
                info!(file = %handle, path, writable, "file opened");
                Ok(Status::success())
            }
            Err(e) => {
                debug!(path, error = %e, "file open failed");
                Ok(Status::from(&e))
            }
        }
    }

    pub fn close(&mut self) -> Result<Status> {
        let core = self.slot.release()?;
        let status = if core.writable {
            core.synchronize(false)
        } else {
            Status::success()
        };
        debug!(path = %core.path, %status, "file closed");
        Ok(status)
    }

    pub(crate) fn core(&self) -> Result<Arc<FileCore>> {
        self.slot.get().map(Arc::clone)
    }

    /// Reads `size` bytes at `offset`. The buffer is reserved up front; a
    /// request that cannot be allocated is a resource error.
    pub fn read(&self, offset: u64, size: usize) -> Result<StatusAnd<Vec<u8>>> {
        let core = self.slot.get()?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(size)
            .map_err(|e| Error::OutOfResources(format!("cannot allocate {size} bytes: {e}")))?;
        buf.resize(size, 0);
        let status = core.read_at(offset, &mut buf);
        Ok(if status.is_ok() {
            StatusAnd::ok(buf)
        } else {
            StatusAnd::failed(status)
        })
    }

    pub fn write(&self, offset: u64, data: &[u8]) -> Result<Status> {
        Ok(self.slot.get()?.write_at(offset, data))
    }

    /// Appends `data` and returns the offset it was written at.
    pub fn append(&self, data: &[u8]) -> Result<StatusAnd<u64>> {
        Ok(self.slot.get()?.append(data))
    }

    pub fn truncate(&self, size: u64) -> Result<Status> {
        Ok(self.slot.get()?.truncate(size))
    }

    pub fn synchronize(&self, hard: bool) -> Result<Status> {
        Ok(self.slot.get()?.synchronize(hard))
    }

    pub fn size(&self) -> Result<u64> {
        self.slot.get()?.size().map_err(Error::Status)
    }

    pub fn path(&self) -> Result<String> {
        Ok(self.slot.get()?.path.clone())
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.slot.is_live()
    }
}

impl fmt::Display for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot.get() {
            Ok(core) => write!(f, "File(path={:?})", core.path),
            Err(_) => write!(f, "File(unopened)"),
        }
    }
}
