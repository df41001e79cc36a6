//! Results of asynchronous operations.
//!
//! A [`Future`] is filled once by a worker through its [`Promise`] and read
//! once by the caller. It can be waited on from a plain thread with
//! [`Future::wait`]/[`Future::get`] or awaited from async code.

use std::fmt;
use std::future::IntoFuture;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::{Duration, Instant};

use futures::task::AtomicWaker;
use parking_lot::{Condvar, Mutex};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::idgen::HandleKind;
use crate::slot::NativeSlot;

enum State<R> {
    Pending,
    Ready(R),
    Abandoned,
    Taken,
}

struct Shared<R> {
    state: Mutex<State<R>>,
    ready: Condvar,
    waker: AtomicWaker,
}

impl<R> Shared<R> {
    fn settle(&self, state: State<R>) {
        {
            let mut current = self.state.lock();
            if matches!(*current, State::Pending) {
                *current = state;
            }
        }
        self.ready.notify_all();
        self.waker.wake();
    }

    fn take(&self) -> Option<Result<R>> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, State::Taken) {
            State::Pending => {
                *state = State::Pending;
                None
            }
            State::Ready(value) => Some(Ok(value)),
            State::Abandoned => Some(Err(Error::Abandoned)),
            State::Taken => Some(Err(Error::FutureConsumed)),
        }
    }
}

/// Write side of a [`Future`]. Dropping it unfulfilled marks the future
/// abandoned.
pub(crate) struct Promise<R> {
    shared: Option<Arc<Shared<R>>>,
}

impl<R> Promise<R> {
    pub(crate) fn fulfill(mut self, value: R) {
        if let Some(shared) = self.shared.take() {
            shared.settle(State::Ready(value));
        }
    }
}

impl<R> Drop for Promise<R> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.settle(State::Abandoned);
        }
    }
}

pub struct Future<R> {
    slot: NativeSlot<Arc<Shared<R>>>,
}

impl<R> Future<R> {
    pub(crate) fn pair(ctx: &Context) -> Result<(Self, Promise<R>)> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::Pending),
            ready: Condvar::new(),
            waker: AtomicWaker::new(),
        });
        let mut slot = ctx.slot(HandleKind::Future);
        slot.bind(Arc::clone(&shared))?;
        Ok((
            Self { slot },
            Promise {
                shared: Some(shared),
            },
        ))
    }

    fn shared(&self) -> Result<&Arc<Shared<R>>> {
        self.slot.get().map_err(|_| Error::FutureConsumed)
    }

    /// Waits up to `timeout` seconds for the result. A negative or infinite
    /// timeout waits without limit, zero only checks. Returns whether the
    /// result is ready.
    pub fn wait(&self, timeout: f64) -> Result<bool> {
        if timeout.is_nan() {
            return Err(Error::InvalidArgument("timeout is NaN".to_string()));
        }
        let shared = self.shared()?;
        let mut state = shared.state.lock();
        if !matches!(*state, State::Pending) {
            return Ok(true);
        }
        let deadline = if timeout < 0.0 {
            None
        } else {
            Duration::try_from_secs_f64(timeout)
                .ok()
                .and_then(|timeout| Instant::now().checked_add(timeout))
        };
        let Some(deadline) = deadline else {
            while matches!(*state, State::Pending) {
                shared.ready.wait(&mut state);
            }
            return Ok(true);
        };
        while matches!(*state, State::Pending) {
            if shared.ready.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        Ok(!matches!(*state, State::Pending))
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.shared()
            .map(|shared| !matches!(*shared.state.lock(), State::Pending))
            .unwrap_or(false)
    }

    /// Blocks for the result and hands it over. A second call fails with
    /// [`Error::FutureConsumed`].
    pub fn get(&mut self) -> Result<R> {
        self.wait(-1.0)?;
        let shared = self.slot.release().map_err(|_| Error::FutureConsumed)?;
        match shared.take() {
            Some(result) => result,
            None => Err(Error::Abandoned),
        }
    }

    /// Drops the result without reading it. The operation itself still runs
    /// to completion.
    pub fn destruct(&mut self) -> Result<()> {
        self.slot.release().map(drop)
    }

    /// Converts into a value that can be `.await`ed.
    #[must_use]
    pub fn into_async(mut self) -> Wait<R> {
        let shared = self.slot.release().map_err(|_| Error::FutureConsumed);
        Wait { shared: Some(shared) }
    }
}

impl<R> IntoFuture for Future<R> {
    type Output = Result<R>;
    type IntoFuture = Wait<R>;

    fn into_future(self) -> Wait<R> {
        self.into_async()
    }
}

impl<R> fmt::Display for Future<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.shared() {
            Err(_) => "consumed",
            Ok(shared) => match *shared.state.lock() {
                State::Pending => "pending",
                State::Ready(_) => "ready",
                State::Abandoned => "abandoned",
                State::Taken => "consumed",
            },
        };
        write!(f, "Future({state})")
    }
}

/// Awaitable form of a [`Future`]
pub struct Wait<R> {
    shared: Option<Result<Arc<Shared<R>>>>,
}

impl<R> std::future::Future for Wait<R> {
    type Output = Result<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let shared = match this.shared.take() {
            Some(Ok(shared)) => shared,
            Some(Err(e)) => return Poll::Ready(Err(e)),
            None => return Poll::Ready(Err(Error::FutureConsumed)),
        };
        shared.waker.register(cx.waker());
        match shared.take() {
            Some(result) => Poll::Ready(result),
            None => {
                this.shared = Some(Ok(shared));
                Poll::Pending
            }
        }
    }
}
