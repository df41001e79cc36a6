//! Bridge between a calling runtime and a key-value database engine.
//!
//! Handles ([`Dbm`], [`DbmIterator`], [`File`], [`AsyncDbm`], [`Future`])
//! each own one native resource through a [`slot::NativeSlot`]. Record
//! changes go through the [`processor::RecordProcessor`] protocol. Engine
//! outcomes are reported as [`Status`] values; misuse of a handle is an
//! [`Error`].

pub mod async_dbm;
pub mod config;
pub mod context;
pub mod dbm;
pub mod engine;
pub mod error;
pub mod file;
pub mod flat;
pub mod future;
pub mod idgen;
pub mod iterator;
mod ops;
pub mod processor;
pub mod slot;
pub mod status;

/// A key and its value
pub type Record = (Vec<u8>, Vec<u8>);

pub use async_dbm::AsyncDbm;
pub use config::{BridgeConfig, OpenOptions, Params};
pub use context::Context;
pub use dbm::Dbm;
pub use error::{Error, Result};
pub use file::File;
pub use future::{Future, Wait};
pub use idgen::{Handle, HandleKind, IdGen};
pub use iterator::DbmIterator;
pub use processor::{Desired, Directive, Expected, RecordProcessor};
pub use status::{Status, StatusAnd, StatusCode};
