//! Asynchronous front end of a store.
//!
//! Requests are queued to a fixed pool of worker threads and answered
//! through [`Future`]s. The pool shares the engine of the [`Dbm`] it was
//! created from. Destroying the async handle stops accepting requests; the
//! workers finish what is already queued and then exit, so futures handed
//! out earlier still complete.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use crate::config::Params;
use crate::context::Context;
use crate::dbm::Dbm;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::file::{File, FileCore};
use crate::future::{Future, Promise};
use crate::idgen::HandleKind;
use crate::ops;
use crate::processor::{panic_message, Desired, Expected};
use crate::slot::NativeSlot;
use crate::status::{Status, StatusAnd};
use crate::Record;

/// Work item for the pool
enum Request {
    Get {
        key: Vec<u8>,
        response: Promise<StatusAnd<Vec<u8>>>,
    },
    GetMulti {
        keys: Vec<Vec<u8>>,
        response: Promise<StatusAnd<BTreeMap<Vec<u8>, Vec<u8>>>>,
    },
    Set {
        key: Vec<u8>,
        value: Vec<u8>,
        overwrite: bool,
        response: Promise<Status>,
    },
    SetMulti {
        records: Vec<Record>,
        overwrite: bool,
        response: Promise<Status>,
    },
    Remove {
        key: Vec<u8>,
        response: Promise<Status>,
    },
    RemoveMulti {
        keys: Vec<Vec<u8>>,
        response: Promise<Status>,
    },
    Append {
        key: Vec<u8>,
        value: Vec<u8>,
        delim: Vec<u8>,
        response: Promise<Status>,
    },
    AppendMulti {
        records: Vec<Record>,
        delim: Vec<u8>,
        response: Promise<Status>,
    },
    CompareExchange {
        key: Vec<u8>,
        expected: Expected,
        desired: Desired,
        response: Promise<Status>,
    },
    Increment {
        key: Vec<u8>,
        delta: i64,
        initial: i64,
        response: Promise<StatusAnd<i64>>,
    },
    CompareExchangeMulti {
        expected: Vec<(Vec<u8>, Expected)>,
        desired: Vec<(Vec<u8>, Desired)>,
        response: Promise<Status>,
    },
    Rekey {
        old_key: Vec<u8>,
        new_key: Vec<u8>,
        overwrite: bool,
        copying: bool,
        response: Promise<Status>,
    },
    PopFirst {
        response: Promise<StatusAnd<Record>>,
    },
    PushLast {
        value: Vec<u8>,
        wtime: f64,
        response: Promise<Status>,
    },
    Clear {
        response: Promise<Status>,
    },
    Rebuild {
        params: Params,
        response: Promise<Status>,
    },
    Synchronize {
        hard: bool,
        params: Params,
        response: Promise<Status>,
    },
    CopyFileData {
        dest_path: String,
        sync_hard: bool,
        response: Promise<Status>,
    },
    Export {
        dest: Arc<dyn Engine>,
        response: Promise<Status>,
    },
    ExportToFlatRecords {
        dest: Arc<FileCore>,
        response: Promise<Status>,
    },
    ImportFromFlatRecords {
        src: Arc<FileCore>,
        response: Promise<Status>,
    },
    Search {
        mode: String,
        pattern: Vec<u8>,
        capacity: usize,
        response: Promise<StatusAnd<Vec<Vec<u8>>>>,
    },
}

impl Request {
    fn name(&self) -> &'static str {
        match self {
            Request::Get { .. } => "get",
            Request::GetMulti { .. } => "get_multi",
            Request::Set { .. } => "set",
            Request::SetMulti { .. } => "set_multi",
            Request::Remove { .. } => "remove",
            Request::RemoveMulti { .. } => "remove_multi",
            Request::Append { .. } => "append",
            Request::AppendMulti { .. } => "append_multi",
            Request::CompareExchange { .. } => "compare_exchange",
            Request::Increment { .. } => "increment",
            Request::CompareExchangeMulti { .. } => "compare_exchange_multi",
            Request::Rekey { .. } => "rekey",
            Request::PopFirst { .. } => "pop_first",
            Request::PushLast { .. } => "push_last",
            Request::Clear { .. } => "clear",
            Request::Rebuild { .. } => "rebuild",
            Request::Synchronize { .. } => "synchronize",
            Request::CopyFileData { .. } => "copy_file_data",
            Request::Export { .. } => "export",
            Request::ExportToFlatRecords { .. } => "export_to_flat_records",
            Request::ImportFromFlatRecords { .. } => "import_from_flat_records",
            Request::Search { .. } => "search",
        }
    }

    fn execute(self, engine: &dyn Engine) {
        match self {
            Request::Get { key, response } => response.fulfill(ops::get(engine, &key)),
            Request::GetMulti { keys, response } => {
                response.fulfill(ops::get_multi(engine, &keys));
            }
            Request::Set {
                key,
                value,
                overwrite,
                response,
            } => response.fulfill(ops::set(engine, &key, &value, overwrite)),
            Request::SetMulti {
                records,
                overwrite,
                response,
            } => response.fulfill(ops::set_multi(engine, &records, overwrite)),
            Request::Remove { key, response } => response.fulfill(ops::remove(engine, &key)),
            Request::RemoveMulti { keys, response } => {
                response.fulfill(ops::remove_multi(engine, &keys));
            }
            Request::Append {
                key,
                value,
                delim,
                response,
            } => response.fulfill(ops::append(engine, &key, &value, &delim)),
            Request::AppendMulti {
                records,
                delim,
                response,
            } => response.fulfill(ops::append_multi(engine, &records, &delim)),
            Request::CompareExchange {
                key,
                expected,
                desired,
                response,
            } => response.fulfill(ops::compare_exchange(engine, &key, expected, desired)),
            Request::Increment {
                key,
                delta,
                initial,
                response,
            } => response.fulfill(ops::increment(engine, &key, delta, initial)),
            Request::CompareExchangeMulti {
                expected,
                desired,
                response,
            } => response.fulfill(ops::compare_exchange_multi(engine, &expected, &desired)),
            Request::Rekey {
                old_key,
                new_key,
                overwrite,
                copying,
                response,
            } => response.fulfill(ops::rekey(engine, &old_key, &new_key, overwrite, copying)),
            Request::PopFirst { response } => response.fulfill(ops::pop_first(engine)),
            Request::PushLast {
                value,
                wtime,
                response,
            } => response.fulfill(ops::push_last(engine, &value, wtime)),
            Request::Clear { response } => response.fulfill(ops::clear(engine)),
            Request::Rebuild { params, response } => {
                response.fulfill(ops::rebuild(engine, &params));
            }
            Request::Synchronize {
                hard,
                params,
                response,
            } => response.fulfill(ops::synchronize(engine, hard, &params)),
            Request::CopyFileData {
                dest_path,
                sync_hard,
                response,
            } => response.fulfill(ops::copy_file_data(engine, &dest_path, sync_hard)),
            Request::Export { dest, response } => {
                response.fulfill(ops::export(engine, dest.as_ref()));
            }
            Request::ExportToFlatRecords { dest, response } => {
                response.fulfill(ops::export_to_flat_records(engine, &dest));
            }
            Request::ImportFromFlatRecords { src, response } => {
                response.fulfill(ops::import_from_flat_records(engine, &src));
            }
            Request::Search {
                mode,
                pattern,
                capacity,
                response,
            } => response.fulfill(ops::search(engine, &mode, &pattern, capacity)),
        }
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of threads pulling jobs from one queue
struct WorkerPool {
    queue: mpsc::UnboundedSender<Job>,
    num_workers: usize,
}

impl WorkerPool {
    fn start(num_workers: usize, name: &str) -> Result<Self> {
        let (queue, jobs) = mpsc::unbounded_channel::<Job>();
        let jobs = Arc::new(Mutex::new(jobs));
        for index in 0..num_workers {
            let jobs = Arc::clone(&jobs);
            thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || worker_loop(&jobs))
                .map_err(|e| Error::OutOfResources(format!("cannot start worker thread: {e}")))?;
        }
        Ok(Self { queue, num_workers })
    }

    fn submit(&self, job: Job) -> Result<()> {
        self.queue
            .send(job)
            .map_err(|_| Error::NotOpened(HandleKind::AsyncEngine))
    }
}

fn worker_loop(jobs: &Mutex<mpsc::UnboundedReceiver<Job>>) {
    trace!("worker started");
    loop {
        let job = jobs.lock().blocking_recv();
        match job {
            Some(job) => job(),
            None => break,
        }
    }
    trace!("worker exiting");
}

pub struct AsyncDbm {
    ctx: Context,
    engine: Arc<dyn Engine>,
    slot: NativeSlot<WorkerPool>,
}

impl AsyncDbm {
    /// Starts `num_worker_threads` workers serving `dbm`. Zero picks the
    /// configured default.
    pub fn new(dbm: &Dbm, num_worker_threads: usize) -> Result<Self> {
        let engine = dbm.shared_engine()?;
        let ctx = dbm.context().clone();
        let num_workers = if num_worker_threads == 0 {
            ctx.config().default_workers.max(1)
        } else {
            num_worker_threads
        };
        let pool = WorkerPool::start(num_workers, &ctx.config().worker_thread_name)?;
        let mut slot = ctx.slot(HandleKind::AsyncEngine);
        let handle = slot.bind(pool)?;
        info!(engine = %handle, num_workers, "async database started");
        Ok(Self { ctx, engine, slot })
    }

    /// Stops accepting requests. Queued requests still run and their
    /// futures still complete.
    pub fn destruct(&mut self) -> Result<()> {
        let handle = self.slot.handle();
        let pool = self.slot.release()?;
        info!(engine = ?handle, num_workers = pool.num_workers, "async database stopped");
        Ok(())
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.slot.is_live()
    }

    fn submit<R: Send + 'static>(
        &self,
        build: impl FnOnce(Promise<R>) -> Request,
    ) -> Result<Future<R>> {
        let pool = self.slot.get()?;
        let (future, promise) = Future::pair(&self.ctx)?;
        let request = build(promise);
        let engine = Arc::clone(&self.engine);
        let name = request.name();
        debug!(request = name, "queued");
        pool.submit(Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| request.execute(engine.as_ref())));
            if let Err(payload) = outcome {
                error!(request = name, message = %panic_message(payload.as_ref()), "request failed");
            }
        }))?;
        Ok(future)
    }

    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Future<StatusAnd<Vec<u8>>>> {
        let key = key.as_ref().to_vec();
        self.submit(|response| Request::Get { key, response })
    }

    pub fn get_multi<K: AsRef<[u8]>>(
        &self,
        keys: &[K],
    ) -> Result<Future<StatusAnd<BTreeMap<Vec<u8>, Vec<u8>>>>> {
        let keys = keys.iter().map(|key| key.as_ref().to_vec()).collect();
        self.submit(|response| Request::GetMulti { keys, response })
    }

    pub fn set(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        overwrite: bool,
    ) -> Result<Future<Status>> {
        let key = key.as_ref().to_vec();
        let value = value.as_ref().to_vec();
        self.submit(|response| Request::Set {
            key,
            value,
            overwrite,
            response,
        })
    }

    pub fn set_multi<K: AsRef<[u8]>, V: AsRef<[u8]>>(
        &self,
        records: &[(K, V)],
        overwrite: bool,
    ) -> Result<Future<Status>> {
        let records = to_records(records);
        self.submit(|response| Request::SetMulti {
            records,
            overwrite,
            response,
        })
    }

    pub fn remove(&self, key: impl AsRef<[u8]>) -> Result<Future<Status>> {
        let key = key.as_ref().to_vec();
        self.submit(|response| Request::Remove { key, response })
    }

    pub fn remove_multi<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<Future<Status>> {
        let keys = keys.iter().map(|key| key.as_ref().to_vec()).collect();
        self.submit(|response| Request::RemoveMulti { keys, response })
    }

    pub fn append(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        delim: impl AsRef<[u8]>,
    ) -> Result<Future<Status>> {
        let key = key.as_ref().to_vec();
        let value = value.as_ref().to_vec();
        let delim = delim.as_ref().to_vec();
        self.submit(|response| Request::Append {
            key,
            value,
            delim,
            response,
        })
    }

    pub fn append_multi<K: AsRef<[u8]>, V: AsRef<[u8]>>(
        &self,
        records: &[(K, V)],
        delim: impl AsRef<[u8]>,
    ) -> Result<Future<Status>> {
        let records = to_records(records);
        let delim = delim.as_ref().to_vec();
        self.submit(|response| Request::AppendMulti {
            records,
            delim,
            response,
        })
    }

    pub fn compare_exchange(
        &self,
        key: impl AsRef<[u8]>,
        expected: Expected,
        desired: Desired,
    ) -> Result<Future<Status>> {
        let key = key.as_ref().to_vec();
        self.submit(|response| Request::CompareExchange {
            key,
            expected,
            desired,
            response,
        })
    }

    pub fn increment(
        &self,
        key: impl AsRef<[u8]>,
        delta: i64,
        initial: i64,
    ) -> Result<Future<StatusAnd<i64>>> {
        let key = key.as_ref().to_vec();
        self.submit(|response| Request::Increment {
            key,
            delta,
            initial,
            response,
        })
    }

    pub fn compare_exchange_multi<K: AsRef<[u8]>, L: AsRef<[u8]>>(
        &self,
        expected: &[(K, Expected)],
        desired: &[(L, Desired)],
    ) -> Result<Future<Status>> {
        let expected = expected
            .iter()
            .map(|(key, state)| (key.as_ref().to_vec(), state.clone()))
            .collect();
        let desired = desired
            .iter()
            .map(|(key, state)| (key.as_ref().to_vec(), state.clone()))
            .collect();
        self.submit(|response| Request::CompareExchangeMulti {
            expected,
            desired,
            response,
        })
    }

    pub fn rekey(
        &self,
        old_key: impl AsRef<[u8]>,
        new_key: impl AsRef<[u8]>,
        overwrite: bool,
        copying: bool,
    ) -> Result<Future<Status>> {
        let old_key = old_key.as_ref().to_vec();
        let new_key = new_key.as_ref().to_vec();
        self.submit(|response| Request::Rekey {
            old_key,
            new_key,
            overwrite,
            copying,
            response,
        })
    }

    pub fn pop_first(&self) -> Result<Future<StatusAnd<Record>>> {
        self.submit(|response| Request::PopFirst { response })
    }

    pub fn push_last(&self, value: impl AsRef<[u8]>, wtime: f64) -> Result<Future<Status>> {
        let value = value.as_ref().to_vec();
        self.submit(|response| Request::PushLast {
            value,
            wtime,
            response,
        })
    }

    pub fn clear(&self) -> Result<Future<Status>> {
        self.submit(|response| Request::Clear { response })
    }

    pub fn rebuild(&self, params: &Params) -> Result<Future<Status>> {
        let params = params.clone();
        self.submit(|response| Request::Rebuild { params, response })
    }

    pub fn synchronize(&self, hard: bool, params: &Params) -> Result<Future<Status>> {
        let params = params.clone();
        self.submit(|response| Request::Synchronize {
            hard,
            params,
            response,
        })
    }

    pub fn copy_file_data(&self, dest_path: &str, sync_hard: bool) -> Result<Future<Status>> {
        let dest_path = dest_path.to_string();
        self.submit(|response| Request::CopyFileData {
            dest_path,
            sync_hard,
            response,
        })
    }

    pub fn export(&self, dest: &Dbm) -> Result<Future<Status>> {
        let dest = dest.shared_engine()?;
        self.submit(|response| Request::Export { dest, response })
    }

    pub fn export_to_flat_records(&self, dest: &File) -> Result<Future<Status>> {
        let dest = dest.core()?;
        self.submit(|response| Request::ExportToFlatRecords { dest, response })
    }

    pub fn import_from_flat_records(&self, src: &File) -> Result<Future<Status>> {
        let src = src.core()?;
        self.submit(|response| Request::ImportFromFlatRecords { src, response })
    }

    /// Search never unwinds on this front end; the status travels in the
    /// result.
    pub fn search(
        &self,
        mode: &str,
        pattern: impl AsRef<[u8]>,
        capacity: usize,
    ) -> Result<Future<StatusAnd<Vec<Vec<u8>>>>> {
        let mode = mode.to_string();
        let pattern = pattern.as_ref().to_vec();
        self.submit(|response| Request::Search {
            mode,
            pattern,
            capacity,
            response,
        })
    }
}

fn to_records<K: AsRef<[u8]>, V: AsRef<[u8]>>(records: &[(K, V)]) -> Vec<Record> {
    records
        .iter()
        .map(|(key, value)| (key.as_ref().to_vec(), value.as_ref().to_vec()))
        .collect()
}

impl fmt::Display for AsyncDbm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot.get() {
            Ok(pool) => write!(
                f,
                "AsyncDbm(class={}, workers={})",
                self.engine.class_name(),
                pool.num_workers
            ),
            Err(_) => write!(f, "AsyncDbm(destroyed)"),
        }
    }
}
