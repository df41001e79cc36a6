use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// What a handle refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Store,
    Iterator,
    File,
    AsyncEngine,
    Future,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandleKind::Store => "database",
            HandleKind::Iterator => "iterator",
            HandleKind::File => "file",
            HandleKind::AsyncEngine => "async database",
            HandleKind::Future => "future",
        };
        f.write_str(name)
    }
}

/// Identity of one native resource held by a wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    kind: HandleKind,
    id: i64,
}

impl Handle {
    #[must_use]
    pub fn new(kind: HandleKind, id: i64) -> Self {
        Self { kind, id }
    }

    #[must_use]
    pub fn id(&self) -> i64 {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> HandleKind {
        self.kind
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// Thread-safe ID generator
#[derive(Debug)]
pub struct IdGen {
    next_id: AtomicI64,
}

impl IdGen {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
        }
    }

    /// Get the next unique ID
    pub fn get_next(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdGen {
    fn default() -> Self {
        Self::new()
    }
}
