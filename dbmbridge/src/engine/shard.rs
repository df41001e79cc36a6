//! Sharded engine.
//!
//! Records are spread over several [`StdEngine`]s by a hash of the key.
//! Shard files are named `PATH-NNNNN-of-NNNNN`.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use super::{rekey_by_steps, Engine, Layout, Seek, StdEngine};
use crate::config::{OpenOptions, Params, MAX_SHARDS};
use crate::processor::RecordProcessor;
use crate::status::{Status, StatusCode};

pub struct ShardEngine {
    path: String,
    shards: Vec<StdEngine>,
    open: AtomicBool,
}

fn shard_path(path: &str, index: usize, total: usize) -> String {
    if path.is_empty() {
        return String::new();
    }
    format!("{path}-{index:05}-of-{total:05}")
}

/// Counts the shards of an existing sharded database, if there is one.
fn detect_shards(path: &str) -> Option<usize> {
    let path = Path::new(path);
    let name = path.file_name()?.to_str()?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let prefix = format!("{name}-00000-of-");
    fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let file_name = entry.file_name();
            let total = file_name.to_str()?.strip_prefix(&prefix)?.parse().ok()?;
            Some(total)
        })
        .filter(|&total: &usize| total > 0 && total <= MAX_SHARDS as usize)
        .max()
}

fn fnv1a(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in data {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

impl ShardEngine {
    pub(crate) fn open(
        path: &str,
        layout: Layout,
        writable: bool,
        options: &OpenOptions,
        num_shards: u32,
    ) -> Result<Self, Status> {
        let total = match usize::try_from(num_shards) {
            Ok(0) | Err(_) => detect_shards(path).unwrap_or(1),
            Ok(total) => total,
        };
        let mut shards = Vec::with_capacity(total);
        for index in 0..total {
            let shard = StdEngine::open(&shard_path(path, index, total), layout, writable, options);
            match shard {
                Ok(shard) => shards.push(shard),
                Err(status) => {
                    for opened in &shards {
                        let _ = opened.close();
                    }
                    return Err(status);
                }
            }
        }
        debug!(path, num_shards = total, "sharded engine opened");
        Ok(Self {
            path: path.to_string(),
            shards,
            open: AtomicBool::new(true),
        })
    }

    fn shard(&self, key: &[u8]) -> &StdEngine {
        let index = fnv1a(key) % self.shards.len() as u64;
        &self.shards[index as usize]
    }

    fn join_all(&self, op: impl Fn(&StdEngine) -> Status) -> Status {
        self.shards.iter().map(op).collect()
    }
}

impl Engine for ShardEngine {
    fn class_name(&self) -> &'static str {
        "ShardDBM"
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn is_writable(&self) -> bool {
        self.shards.iter().all(Engine::is_writable)
    }

    fn is_ordered(&self) -> bool {
        self.shards.iter().all(Engine::is_ordered)
    }

    fn is_healthy(&self) -> bool {
        self.is_open() && self.shards.iter().all(Engine::is_healthy)
    }

    fn close(&self) -> Status {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Status::new(StatusCode::PreconditionError, "not opened database");
        }
        self.join_all(Engine::close)
    }

    fn process(&self, key: &[u8], processor: &mut dyn RecordProcessor, writable: bool) -> Status {
        self.shard(key).process(key, processor, writable)
    }

    fn rekey(&self, old_key: &[u8], new_key: &[u8], overwrite: bool, copying: bool) -> Status {
        let shard = self.shard(old_key);
        if std::ptr::eq(shard, self.shard(new_key)) {
            return shard.rekey(old_key, new_key, overwrite, copying);
        }
        rekey_by_steps(self, old_key, new_key, overwrite, copying)
    }

    fn count(&self) -> i64 {
        if !self.is_open() {
            return -1;
        }
        self.shards.iter().map(Engine::count).sum()
    }

    fn file_size(&self) -> i64 {
        if !self.is_open() {
            return -1;
        }
        self.shards.iter().map(Engine::file_size).sum()
    }

    fn timestamp(&self) -> Option<f64> {
        if !self.is_open() {
            return None;
        }
        self.shards
            .iter()
            .filter_map(Engine::timestamp)
            .reduce(f64::max)
    }

    fn clear(&self) -> Status {
        self.join_all(Engine::clear)
    }

    fn rebuild(&self, params: &Params) -> Status {
        self.join_all(|shard| shard.rebuild(params))
    }

    fn should_be_rebuilt(&self) -> bool {
        self.shards.iter().any(Engine::should_be_rebuilt)
    }

    fn synchronize(&self, hard: bool, params: &Params) -> Status {
        self.join_all(|shard| shard.synchronize(hard, params))
    }

    fn copy_file_data(&self, dest_path: &str, sync_hard: bool) -> Status {
        let total = self.shards.len();
        self.shards
            .iter()
            .enumerate()
            .map(|(index, shard)| {
                shard.copy_file_data(&shard_path(dest_path, index, total), sync_hard)
            })
            .collect()
    }

    fn seek(&self, seek: Seek<'_>) -> Option<Vec<u8>> {
        let found = self.shards.iter().filter_map(|shard| shard.seek(seek));
        match seek {
            Seek::First | Seek::AtOrAfter(_) | Seek::After(_) => found.min(),
            Seek::Last | Seek::AtOrBefore(_) | Seek::Before(_) => found.max(),
        }
    }

    fn inspect(&self) -> Vec<(String, String)> {
        vec![
            ("class".to_string(), self.class_name().to_string()),
            ("path".to_string(), self.path.clone()),
            ("num_shards".to_string(), self.shards.len().to_string()),
            ("num_records".to_string(), self.count().to_string()),
            ("file_size".to_string(), self.file_size().to_string()),
            ("healthy".to_string(), self.is_healthy().to_string()),
        ]
    }
}
