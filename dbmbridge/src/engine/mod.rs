//! Storage engines behind a store handle.
//!
//! The bridge only talks to an engine through [`Engine`]. Every record
//! change goes through [`Engine::process`], which runs a
//! [`RecordProcessor`] under the record lock.

mod flock;
mod shard;
mod std_engine;

pub use shard::ShardEngine;
pub use std_engine::StdEngine;

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::config::{OpenOptions, Params};
use crate::processor::{GetProcessor, RecordProcessor, RemoveProcessor, SetProcessor};
use crate::status::{Status, StatusCode};

/// Where to position a cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seek<'a> {
    First,
    Last,
    AtOrAfter(&'a [u8]),
    After(&'a [u8]),
    AtOrBefore(&'a [u8]),
    Before(&'a [u8]),
}

/// Record layout of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// Unordered; backward navigation is not offered.
    Hash,
    /// Ordered by key.
    Tree,
}

/// A record read by [`Engine::step`] and the key that follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub next: Option<Vec<u8>>,
}

pub trait Engine: Send + Sync {
    fn class_name(&self) -> &'static str;

    fn path(&self) -> &str;

    fn is_open(&self) -> bool;

    fn is_writable(&self) -> bool;

    fn is_ordered(&self) -> bool;

    fn is_healthy(&self) -> bool;

    fn close(&self) -> Status;

    /// Runs `processor` on the record for `key`. A processor run with
    /// `writable == false` must not ask for a change.
    fn process(&self, key: &[u8], processor: &mut dyn RecordProcessor, writable: bool) -> Status;

    /// Moves the value of `old_key` to `new_key`. Composed from separate
    /// steps, so another thread may observe the intermediate state.
    fn rekey(&self, old_key: &[u8], new_key: &[u8], overwrite: bool, copying: bool) -> Status {
        rekey_by_steps(self, old_key, new_key, overwrite, copying)
    }

    fn count(&self) -> i64;

    fn file_size(&self) -> i64;

    /// Seconds since the epoch of the last modification, if known.
    fn timestamp(&self) -> Option<f64>;

    fn clear(&self) -> Status;

    fn rebuild(&self, params: &Params) -> Status;

    fn should_be_rebuilt(&self) -> bool;

    fn synchronize(&self, hard: bool, params: &Params) -> Status;

    /// Writes a consistent snapshot of the data to `dest_path`.
    fn copy_file_data(&self, dest_path: &str, sync_hard: bool) -> Status;

    /// Key found by `seek`, if any.
    fn seek(&self, seek: Seek<'_>) -> Option<Vec<u8>>;

    /// The first record at or after `key`, together with the key after it.
    fn step(&self, key: &[u8]) -> Result<Option<Step>, Status> {
        step_by_seeks(self, key)
    }

    fn inspect(&self) -> Vec<(String, String)>;
}

/// Read, write, then remove, each as its own record operation.
pub(crate) fn rekey_by_steps<E: Engine + ?Sized>(
    engine: &E,
    old_key: &[u8],
    new_key: &[u8],
    overwrite: bool,
    copying: bool,
) -> Status {
    let mut get = GetProcessor::new();
    let status = engine.process(old_key, &mut get, false);
    if !status.is_ok() {
        return status;
    }
    let Some(value) = get.into_value() else {
        return Status::new(StatusCode::NotFoundError, "no such record");
    };
    let mut set = SetProcessor::new(value, overwrite);
    let mut status = engine.process(new_key, &mut set, true);
    status |= set.finish().0;
    if !status.is_ok() || copying {
        return status;
    }
    let mut remove = RemoveProcessor::new();
    status |= engine.process(old_key, &mut remove, true);
    status
}

/// Seek, read, then seek again, each as its own engine call.
pub(crate) fn step_by_seeks<E: Engine + ?Sized>(
    engine: &E,
    key: &[u8],
) -> Result<Option<Step>, Status> {
    let mut found = engine.seek(Seek::AtOrAfter(key));
    while let Some(key) = found {
        let mut get = GetProcessor::new();
        let status = engine.process(&key, &mut get, false);
        if !status.is_ok() {
            return Err(status);
        }
        match get.into_value() {
            Some(value) => {
                let next = engine.seek(Seek::After(&key));
                return Ok(Some(Step { key, value, next }));
            }
            None => found = engine.seek(Seek::After(&key)),
        }
    }
    Ok(None)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Layout {
    pub kind: EngineKind,
    pub on_memory: bool,
}

/// Picks the engine layout from an explicit `dbm` parameter or from the
/// path extension.
pub(crate) fn resolve_layout(path: &str, params: &mut Params) -> Result<Layout, Status> {
    let layout = |kind, on_memory| Ok(Layout { kind, on_memory });
    if let Some(class) = params.remove("dbm") {
        return match class.to_ascii_lowercase().as_str() {
            "hashdbm" | "hash" => layout(EngineKind::Hash, false),
            "treedbm" | "tree" | "skipdbm" | "skip" => layout(EngineKind::Tree, false),
            "tinydbm" | "tiny" | "stdhashdbm" | "stdhash" | "cachedbm" | "cache" => {
                layout(EngineKind::Hash, true)
            }
            "babydbm" | "baby" | "stdtreedbm" | "stdtree" => layout(EngineKind::Tree, true),
            _ => Err(Status::new(
                StatusCode::InvalidArgumentError,
                format!("unknown database class: {class}"),
            )),
        };
    }
    if path.is_empty() {
        return layout(EngineKind::Hash, true);
    }
    let ext = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "tkt" | "tks" => layout(EngineKind::Tree, false),
        "tkmt" | "tksh" | "tkmc" => layout(EngineKind::Hash, true),
        "tkmb" | "tkst" => layout(EngineKind::Tree, true),
        _ => layout(EngineKind::Hash, false),
    }
}

/// Opens the engine for `path`. Open flags have already been taken out of
/// `params`.
pub fn open_engine(
    path: &str,
    writable: bool,
    options: &OpenOptions,
    params: &Params,
) -> Result<Arc<dyn Engine>, Status> {
    let mut params = params.clone();
    let layout = resolve_layout(path, &mut params)?;
    if !params.is_empty() {
        debug!(path, ignored = ?params, "tuning parameters not used by this engine");
    }
    let engine: Arc<dyn Engine> = match options.num_shards {
        Some(num_shards) => Arc::new(ShardEngine::open(
            path, layout, writable, options, num_shards,
        )?),
        None => Arc::new(StdEngine::open(path, layout, writable, options)?),
    };
    Ok(engine)
}
