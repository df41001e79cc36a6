//! Store primitives shared by the synchronous and asynchronous front ends.
//!
//! Each function runs against an engine and reports the engine outcome.
//! Multi-key functions apply each key separately and report the first
//! failure.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::trace;

use crate::engine::{Engine, Seek};
use crate::file::FileCore;
use crate::flat;
use crate::processor::{
    AppendProcessor, CompareExchangeProcessor, Desired, Expected, GetProcessor,
    IncrementProcessor, RecordProcessor, RemoveProcessor, SetProcessor,
};
use crate::status::{Status, StatusAnd, StatusCode};
use crate::Record;

fn check_open(engine: &dyn Engine) -> Status {
    if engine.is_open() {
        Status::success()
    } else {
        Status::new(StatusCode::PreconditionError, "not opened database")
    }
}

/// Calls `visit` with every key in engine order until it returns false.
fn visit_keys(engine: &dyn Engine, mut visit: impl FnMut(Vec<u8>) -> bool) {
    let mut cursor = engine.seek(Seek::First);
    while let Some(key) = cursor {
        cursor = engine.seek(Seek::After(&key));
        if !visit(key) {
            break;
        }
    }
}

/// Every record in engine order. Keys removed while walking are skipped.
fn collect_records(engine: &dyn Engine) -> Result<Vec<Record>, Status> {
    let status = check_open(engine);
    if !status.is_ok() {
        return Err(status);
    }
    let mut records = Vec::new();
    let mut status = Status::success();
    visit_keys(engine, |key| {
        let mut get = GetProcessor::new();
        status |= engine.process(&key, &mut get, false);
        if let Some(value) = get.into_value() {
            records.push((key, value));
        }
        status.is_ok()
    });
    if status.is_ok() {
        Ok(records)
    } else {
        Err(status)
    }
}

pub(crate) fn process(
    engine: &dyn Engine,
    key: &[u8],
    processor: &mut dyn RecordProcessor,
    writable: bool,
) -> Status {
    engine.process(key, processor, writable)
}

pub(crate) fn process_multi(
    engine: &dyn Engine,
    requests: &mut [(&[u8], &mut dyn RecordProcessor)],
    writable: bool,
) -> Status {
    requests
        .iter_mut()
        .map(|(key, processor)| engine.process(key, &mut **processor, writable))
        .collect()
}

pub(crate) fn get(engine: &dyn Engine, key: &[u8]) -> StatusAnd<Vec<u8>> {
    let mut processor = GetProcessor::new();
    let status = engine.process(key, &mut processor, false);
    if !status.is_ok() {
        return StatusAnd::failed(status);
    }
    match processor.into_value() {
        Some(value) => StatusAnd::ok(value),
        None => StatusAnd::failed(Status::new(StatusCode::NotFoundError, "no such record")),
    }
}

/// Found records only. A missing key turns the status into `NotFoundError`
/// but does not stop the lookup.
pub(crate) fn get_multi<K: AsRef<[u8]>>(
    engine: &dyn Engine,
    keys: &[K],
) -> StatusAnd<BTreeMap<Vec<u8>, Vec<u8>>> {
    let mut status = Status::success();
    let mut found = BTreeMap::new();
    for key in keys {
        let key = key.as_ref();
        let result = get(engine, key);
        status |= result.status;
        if let Some(value) = result.value {
            found.insert(key.to_vec(), value);
        }
    }
    StatusAnd::new(status, Some(found))
}

pub(crate) fn set_and_get(
    engine: &dyn Engine,
    key: &[u8],
    value: &[u8],
    overwrite: bool,
) -> StatusAnd<Vec<u8>> {
    let mut processor = SetProcessor::new(value.to_vec(), overwrite);
    let mut status = engine.process(key, &mut processor, true);
    let (impl_status, old_value) = processor.finish();
    status |= impl_status;
    StatusAnd::new(status, old_value)
}

pub(crate) fn set(engine: &dyn Engine, key: &[u8], value: &[u8], overwrite: bool) -> Status {
    set_and_get(engine, key, value, overwrite).status
}

pub(crate) fn set_multi<K: AsRef<[u8]>, V: AsRef<[u8]>>(
    engine: &dyn Engine,
    records: &[(K, V)],
    overwrite: bool,
) -> Status {
    records
        .iter()
        .map(|(key, value)| set(engine, key.as_ref(), value.as_ref(), overwrite))
        .collect()
}

pub(crate) fn remove_and_get(engine: &dyn Engine, key: &[u8]) -> StatusAnd<Vec<u8>> {
    let mut processor = RemoveProcessor::new();
    let mut status = engine.process(key, &mut processor, true);
    let (impl_status, old_value) = processor.finish();
    status |= impl_status;
    StatusAnd::new(status, old_value)
}

pub(crate) fn remove(engine: &dyn Engine, key: &[u8]) -> Status {
    remove_and_get(engine, key).status
}

pub(crate) fn remove_multi<K: AsRef<[u8]>>(engine: &dyn Engine, keys: &[K]) -> Status {
    keys.iter().map(|key| remove(engine, key.as_ref())).collect()
}

pub(crate) fn append(engine: &dyn Engine, key: &[u8], value: &[u8], delim: &[u8]) -> Status {
    let mut processor = AppendProcessor::new(value, delim);
    engine.process(key, &mut processor, true)
}

pub(crate) fn append_multi<K: AsRef<[u8]>, V: AsRef<[u8]>>(
    engine: &dyn Engine,
    records: &[(K, V)],
    delim: &[u8],
) -> Status {
    records
        .iter()
        .map(|(key, value)| append(engine, key.as_ref(), value.as_ref(), delim))
        .collect()
}

pub(crate) fn compare_exchange_and_get(
    engine: &dyn Engine,
    key: &[u8],
    expected: Expected,
    desired: Desired,
) -> StatusAnd<Vec<u8>> {
    let mut processor = CompareExchangeProcessor::new(expected, desired);
    let mut status = engine.process(key, &mut processor, true);
    let (impl_status, actual) = processor.finish();
    status |= impl_status;
    StatusAnd::new(status, actual)
}

pub(crate) fn compare_exchange(
    engine: &dyn Engine,
    key: &[u8],
    expected: Expected,
    desired: Desired,
) -> Status {
    compare_exchange_and_get(engine, key, expected, desired).status
}

pub(crate) fn increment(engine: &dyn Engine, key: &[u8], delta: i64, initial: i64) -> StatusAnd<i64> {
    let mut processor = IncrementProcessor::new(delta, initial);
    let writable = delta != IncrementProcessor::READ_ONLY;
    let mut status = engine.process(key, &mut processor, writable);
    let (impl_status, current) = processor.finish();
    status |= impl_status;
    if status.is_ok() {
        StatusAnd::ok(current)
    } else {
        StatusAnd::failed(status)
    }
}

/// Checks every expectation first, then applies every desired state. No
/// record is changed when a check fails. Another thread may interleave
/// between the two phases.
pub(crate) fn compare_exchange_multi<K: AsRef<[u8]>, L: AsRef<[u8]>>(
    engine: &dyn Engine,
    expected: &[(K, Expected)],
    desired: &[(L, Desired)],
) -> Status {
    for (key, expectation) in expected {
        let mut get = GetProcessor::new();
        let status = engine.process(key.as_ref(), &mut get, false);
        if !status.is_ok() {
            return status;
        }
        if !expectation.matches(get.into_value().as_deref()) {
            return Status::new(StatusCode::InfeasibleError, "unexpected value");
        }
    }
    let mut status = Status::success();
    for (key, state) in desired {
        let key = key.as_ref();
        status |= match state {
            Desired::Value(value) => set(engine, key, value, true),
            Desired::Remove => {
                let removed = remove(engine, key);
                if removed == StatusCode::NotFoundError {
                    Status::success()
                } else {
                    removed
                }
            }
            Desired::Keep => Status::success(),
        };
    }
    status
}

pub(crate) fn rekey(
    engine: &dyn Engine,
    old_key: &[u8],
    new_key: &[u8],
    overwrite: bool,
    copying: bool,
) -> Status {
    engine.rekey(old_key, new_key, overwrite, copying)
}

/// Removes and returns the first record in engine order.
pub(crate) fn pop_first(engine: &dyn Engine) -> StatusAnd<Record> {
    let status = check_open(engine);
    if !status.is_ok() {
        return StatusAnd::failed(status);
    }
    loop {
        let Some(key) = engine.seek(Seek::First) else {
            return StatusAnd::failed(Status::new(StatusCode::NotFoundError, "no records"));
        };
        let result = remove_and_get(engine, &key);
        match result.value {
            Some(value) if result.status.is_ok() => return StatusAnd::ok((key, value)),
            // Taken by someone else between seek and remove.
            None if result.status == StatusCode::NotFoundError => continue,
            _ => return StatusAnd::failed(result.status),
        }
    }
}

/// Stores `value` under a key made from a timestamp in microseconds, as 8
/// big-endian bytes. A negative `wtime` means now. Colliding timestamps are
/// bumped until a free key is found.
pub(crate) fn push_last(engine: &dyn Engine, value: &[u8], wtime: f64) -> Status {
    let mut micros = if wtime < 0.0 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    } else {
        (wtime * 1_000_000.0) as u64
    };
    loop {
        let status = set(engine, &micros.to_be_bytes(), value, false);
        if status != StatusCode::DuplicationError {
            return status;
        }
        micros = micros.wrapping_add(1);
    }
}

pub(crate) fn clear(engine: &dyn Engine) -> Status {
    engine.clear()
}

pub(crate) fn rebuild(engine: &dyn Engine, params: &crate::config::Params) -> Status {
    engine.rebuild(params)
}

pub(crate) fn synchronize(engine: &dyn Engine, hard: bool, params: &crate::config::Params) -> Status {
    engine.synchronize(hard, params)
}

pub(crate) fn copy_file_data(engine: &dyn Engine, dest_path: &str, sync_hard: bool) -> Status {
    engine.copy_file_data(dest_path, sync_hard)
}

/// Copies every record into `dest`, overwriting.
pub(crate) fn export(engine: &dyn Engine, dest: &dyn Engine) -> Status {
    let records = match collect_records(engine) {
        Ok(records) => records,
        Err(status) => return status,
    };
    let mut status = Status::success();
    for (key, value) in &records {
        status |= set(dest, key, value, true);
        if !status.is_ok() {
            break;
        }
    }
    trace!(num_records = records.len(), %status, "records exported");
    status
}

pub(crate) fn export_to_flat_records(engine: &dyn Engine, dest: &FileCore) -> Status {
    let records = match collect_records(engine) {
        Ok(records) => records,
        Err(status) => return status,
    };
    let data = flat::encode_pairs(
        records
            .iter()
            .map(|(key, value)| (key.as_slice(), value.as_slice())),
    );
    dest.append(&data).status
}

pub(crate) fn import_from_flat_records(engine: &dyn Engine, src: &FileCore) -> Status {
    let data = match src.read_all() {
        Ok(data) => data,
        Err(status) => return status,
    };
    let records = match flat::decode_pairs(&data) {
        Ok(records) => records,
        Err(status) => return status,
    };
    let mut status = Status::success();
    for (key, value) in &records {
        status |= set(engine, key, value, true);
        if !status.is_ok() {
            break;
        }
    }
    trace!(num_records = records.len(), %status, "records imported");
    status
}

/// Writes each key followed by a newline.
pub(crate) fn export_keys_as_lines(engine: &dyn Engine, dest: &FileCore) -> Status {
    let status = check_open(engine);
    if !status.is_ok() {
        return status;
    }
    let mut data = Vec::new();
    visit_keys(engine, |key| {
        data.extend_from_slice(&key);
        data.push(b'\n');
        true
    });
    dest.append(&data).status
}

/// Keys matching `pattern` under `mode` (`contain`, `begin` or `end`), at
/// most `capacity` of them; zero means no limit.
pub(crate) fn search(
    engine: &dyn Engine,
    mode: &str,
    pattern: &[u8],
    capacity: usize,
) -> StatusAnd<Vec<Vec<u8>>> {
    let matcher: fn(&[u8], &[u8]) -> bool = match mode {
        "contain" => |key, pattern| {
            pattern.is_empty() || key.windows(pattern.len()).any(|window| window == pattern)
        },
        "begin" => |key, pattern| key.starts_with(pattern),
        "end" => |key, pattern| key.ends_with(pattern),
        _ => {
            return StatusAnd::failed(Status::new(
                StatusCode::InvalidArgumentError,
                format!("unknown search mode: {mode}"),
            ))
        }
    };
    let status = check_open(engine);
    if !status.is_ok() {
        return StatusAnd::failed(status);
    }
    let mut keys = Vec::new();
    visit_keys(engine, |key| {
        if matcher(&key, pattern) {
            keys.push(key);
        }
        capacity == 0 || keys.len() < capacity
    });
    StatusAnd::ok(keys)
}

pub(crate) fn inspect(engine: &dyn Engine) -> BTreeMap<String, String> {
    engine.inspect().into_iter().collect()
}
