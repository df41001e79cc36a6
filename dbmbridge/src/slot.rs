//! Binding of wrapper objects to native resources.
//!
//! Every wrapper (store, iterator, file, async engine, future) owns exactly
//! one [`NativeSlot`]. A slot starts unbound, becomes live on `bind`, and
//! ends released. A released slot may be bound again, which is how a closed
//! store is re-opened. A live slot refuses a second `bind` so that a resource
//! is never silently leaked.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::error::{Error, Result};
use crate::idgen::{Handle, HandleKind, IdGen};

enum State<T> {
    Unbound,
    Live { handle: Handle, resource: T },
    Released { handle: Handle },
}

pub struct NativeSlot<T> {
    kind: HandleKind,
    ids: Arc<IdGen>,
    state: State<T>,
}

impl<T> NativeSlot<T> {
    #[must_use]
    pub fn new(kind: HandleKind, ids: Arc<IdGen>) -> Self {
        Self {
            kind,
            ids,
            state: State::Unbound,
        }
    }

    /// Takes ownership of `resource` and issues a fresh handle for it.
    pub fn bind(&mut self, resource: T) -> Result<Handle> {
        if matches!(self.state, State::Live { .. }) {
            return Err(Error::AlreadyOpened(self.kind));
        }
        let handle = Handle::new(self.kind, self.ids.get_next());
        trace!(%handle, "bound");
        self.state = State::Live { handle, resource };
        Ok(handle)
    }

    /// Gives the resource back and clears the slot.
    pub fn release(&mut self) -> Result<T> {
        match std::mem::replace(&mut self.state, State::Unbound) {
            State::Live { handle, resource } => {
                trace!(%handle, "released");
                self.state = State::Released { handle };
                Ok(resource)
            }
            State::Unbound => Err(Error::NeverBound(self.kind)),
            released @ State::Released { .. } => {
                self.state = released;
                Err(Error::AlreadyReleased(self.kind))
            }
        }
    }

    pub fn get(&self) -> Result<&T> {
        match &self.state {
            State::Live { resource, .. } => Ok(resource),
            _ => Err(Error::NotOpened(self.kind)),
        }
    }

    pub fn get_mut(&mut self) -> Result<&mut T> {
        match &mut self.state {
            State::Live { resource, .. } => Ok(resource),
            _ => Err(Error::NotOpened(self.kind)),
        }
    }

    /// Handle of the live or most recently released resource.
    #[must_use]
    pub fn handle(&self) -> Option<Handle> {
        match &self.state {
            State::Unbound => None,
            State::Live { handle, .. } | State::Released { handle } => Some(*handle),
        }
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self.state, State::Live { .. })
    }

    #[must_use]
    pub fn kind(&self) -> HandleKind {
        self.kind
    }
}

impl<T> fmt::Debug for NativeSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Unbound => "unbound",
            State::Live { .. } => "live",
            State::Released { .. } => "released",
        };
        f.debug_struct("NativeSlot")
            .field("kind", &self.kind)
            .field("handle", &self.handle())
            .field("state", &state)
            .finish()
    }
}
