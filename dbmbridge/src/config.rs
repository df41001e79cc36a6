//! Tuning parameters and bridge settings.

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Largest shard count; shard file names carry five digits.
pub const MAX_SHARDS: u32 = 99_999;

/// Environment variable overriding [`BridgeConfig::default_workers`].
pub const WORKERS_ENV: &str = "DBMBRIDGE_WORKERS";

/// String-keyed tuning parameters handed to the engine.
///
/// Parameters come either as `key=value` pairs separated by commas or as a
/// flat JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Params {
    entries: BTreeMap<String, String>,
}

impl Params {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `"k1=v1,k2=v2"`. Fields without `=` are skipped; keys and
    /// values are trimmed.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        text.split(',')
            .filter_map(|field| field.split_once('='))
            .map(|(key, value)| (key.trim(), value.trim()))
            .filter(|(key, _)| !key.is_empty())
            .collect()
    }

    /// Parses a flat JSON object. Scalar values are kept in their textual
    /// form.
    pub fn from_json(text: &str) -> Result<Self> {
        let opts: BTreeMap<String, serde_json::Value> = serde_json::from_str(text)
            .map_err(|e| Error::InvalidArgument(format!("bad parameter JSON: {e}")))?;
        let mut params = Params::new();
        for (key, value) in opts {
            let value = match value {
                serde_json::Value::String(text) => text,
                serde_json::Value::Bool(_) | serde_json::Value::Number(_) => value.to_string(),
                other => {
                    return Err(Error::InvalidArgument(format!(
                        "parameter `{key}` must be a scalar, got {other}"
                    )))
                }
            };
            params.insert(key, value);
        }
        Ok(params)
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Removes `key` and reads it as a boolean.
    pub fn take_bool(&mut self, key: &str, default: bool) -> Result<bool> {
        match self.remove(key) {
            None => Ok(default),
            Some(value) => parse_bool(&value)
                .ok_or_else(|| Error::InvalidArgument(format!("`{key}` is not a boolean: {value}"))),
        }
    }

    /// Removes `key` and reads it as an integer.
    pub fn take_int(&mut self, key: &str, default: i64) -> Result<i64> {
        match self.remove(key) {
            None => Ok(default),
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| Error::InvalidArgument(format!("`{key}` is not an integer: {value}"))),
        }
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" | "" => Some(false),
        _ => None,
    }
}

impl<K, V> FromIterator<(K, V)> for Params
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

/// Open flags that the bridge consumes before the rest of the parameters
/// reach the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub truncate: bool,
    pub no_create: bool,
    pub no_wait: bool,
    pub no_lock: bool,
    pub sync_hard: bool,
    /// `Some(n)` selects the sharded engine; `Some(0)` detects the shard
    /// count from existing files.
    pub num_shards: Option<u32>,
}

impl OpenOptions {
    /// Removes the open flags from `params`.
    pub fn consume(params: &mut Params) -> Result<Self> {
        let truncate = params.take_bool("truncate", false)?;
        let no_create = params.take_bool("no_create", false)?;
        let no_wait = params.take_bool("no_wait", false)?;
        let no_lock = params.take_bool("no_lock", false)?;
        let sync_hard = params.take_bool("sync_hard", false)?;
        let num_shards = params.take_int("num_shards", -1)?;
        let num_shards = if num_shards < 0 {
            None
        } else {
            match u32::try_from(num_shards) {
                Ok(count) if count <= MAX_SHARDS => Some(count),
                _ => {
                    return Err(Error::InvalidArgument(format!(
                        "`num_shards` exceeds {MAX_SHARDS}: {num_shards}"
                    )))
                }
            }
        };
        Ok(Self {
            truncate,
            no_create,
            no_wait,
            no_lock,
            sync_hard,
            num_shards,
        })
    }
}

/// Settings shared by every handle created from one [`crate::Context`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Worker threads started when an async engine is asked for zero.
    pub default_workers: usize,
    /// Prefix of worker thread names.
    pub worker_thread_name: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            default_workers: std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(4),
            worker_thread_name: "dbm-worker".to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::InvalidArgument(format!("bad bridge config JSON: {e}")))
    }

    /// Defaults overridden by `DBMBRIDGE_WORKERS`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(value) = std::env::var(WORKERS_ENV) {
            config.default_workers = value.trim().parse().map_err(|_| {
                Error::InvalidArgument(format!("{WORKERS_ENV} is not a count: {value}"))
            })?;
        }
        Ok(config)
    }
}
