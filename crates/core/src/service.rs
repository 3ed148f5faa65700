//! Uniform lifecycle for long-running units of execution.
//!
//! Every receiver, sender, server acceptor and control connection runs on
//! its own named thread and reports progress through a [`ServiceHandle`]:
//!
//! ```text
//! Created -> Starting -> Running -> Stopping -> Terminated
//!                 \          \           \
//!                  +----------+-----------+--> Failed(reason)
//! ```
//!
//! Dependents observe terminal states either by polling
//! [`ServiceHandle::state`], blocking in [`ServiceHandle::await_terminated`],
//! or registering a listener with [`ServiceHandle::add_listener`].

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

/// Lifecycle state of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Starting,
    Running,
    Stopping,
    Terminated,
    Failed(String),
}

impl ServiceState {
    /// `Terminated` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServiceState::Terminated | ServiceState::Failed(_))
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Created => write!(f, "created"),
            ServiceState::Starting => write!(f, "starting"),
            ServiceState::Running => write!(f, "running"),
            ServiceState::Stopping => write!(f, "stopping"),
            ServiceState::Terminated => write!(f, "terminated"),
            ServiceState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

type Listener = Box<dyn FnOnce(&ServiceState) + Send>;

struct Inner {
    name: String,
    state: Mutex<ServiceState>,
    changed: Condvar,
    listeners: Mutex<Vec<Listener>>,
}

/// Shared view of one service's lifecycle.
#[derive(Clone)]
pub struct ServiceHandle {
    inner: Arc<Inner>,
}

impl ServiceHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(ServiceState::Created),
                changed: Condvar::new(),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> ServiceState {
        self.inner.state.lock().clone()
    }

    /// Whether the service body should keep working (`Starting` or `Running`).
    pub fn is_running(&self) -> bool {
        matches!(
            *self.inner.state.lock(),
            ServiceState::Starting | ServiceState::Running
        )
    }

    /// Ask the service to stop.
    ///
    /// A service that was never started terminates immediately. Returns
    /// `true` if this call changed the state.
    pub fn request_stop(&self) -> bool {
        let mut state = self.inner.state.lock();
        match *state {
            ServiceState::Created => {
                *state = ServiceState::Terminated;
                drop(state);
                self.inner.changed.notify_all();
                self.fire_listeners(&ServiceState::Terminated);
                true
            }
            ServiceState::Starting | ServiceState::Running => {
                *state = ServiceState::Stopping;
                drop(state);
                tracing::debug!(service = %self.inner.name, "stop requested");
                self.inner.changed.notify_all();
                true
            }
            _ => false,
        }
    }

    /// Register a callback invoked once the service reaches a terminal
    /// state. Runs immediately on the caller's thread if already terminal.
    pub fn add_listener<F>(&self, listener: F)
    where
        F: FnOnce(&ServiceState) + Send + 'static,
    {
        let state = self.inner.state.lock();
        if state.is_terminal() {
            let snapshot = state.clone();
            drop(state);
            listener(&snapshot);
            return;
        }
        // Listeners are taken under the state lock in `fire_listeners`, so holding it
        // here guarantees the callback is not missed.
        self.inner.listeners.lock().push(Box::new(listener));
    }

    /// Block until the service is terminal or `timeout` elapses, returning
    /// the state observed last.
    pub fn await_terminated(&self, timeout: Option<Duration>) -> ServiceState {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.inner.state.lock();
        while !state.is_terminal() {
            match deadline {
                Some(deadline) => {
                    if self
                        .inner
                        .changed
                        .wait_until(&mut state, deadline)
                        .timed_out()
                    {
                        break;
                    }
                }
                None => self.inner.changed.wait(&mut state),
            }
        }
        state.clone()
    }

    /// Run `body` on a new named thread, driving the state machine around it.
    pub(crate) fn spawn<F>(&self, body: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        {
            let mut state = self.inner.state.lock();
            if *state != ServiceState::Created {
                return Err(Error::AlreadyRunning);
            }
            *state = ServiceState::Starting;
        }

        let handle = self.clone();
        let spawned = thread::Builder::new()
            .name(self.inner.name.clone())
            .spawn(move || {
                handle.mark_running();
                let result = body();
                handle.finish(result);
            });

        match spawned {
            Ok(join) => Ok(join),
            Err(e) => {
                self.finish(Err(Error::Io(std::io::Error::new(e.kind(), e.to_string()))));
                Err(Error::Io(e))
            }
        }
    }

    fn mark_running(&self) {
        let mut state = self.inner.state.lock();
        if *state == ServiceState::Starting {
            *state = ServiceState::Running;
            drop(state);
            tracing::debug!(service = %self.inner.name, "service running");
            self.inner.changed.notify_all();
        }
    }

    fn finish(&self, result: Result<()>) {
        let terminal = match result {
            Ok(()) => ServiceState::Terminated,
            Err(e) => ServiceState::Failed(e.to_string()),
        };

        {
            let mut state = self.inner.state.lock();
            if state.is_terminal() {
                return;
            }
            *state = terminal.clone();
        }

        match &terminal {
            ServiceState::Failed(reason) => {
                tracing::error!(service = %self.inner.name, reason = %reason, "service failed")
            }
            _ => tracing::debug!(service = %self.inner.name, "service terminated"),
        }

        self.inner.changed.notify_all();
        self.fire_listeners(&terminal);
    }

    fn fire_listeners(&self, terminal: &ServiceState) {
        let listeners = {
            let _state = self.inner.state.lock();
            std::mem::take(&mut *self.inner.listeners.lock())
        };
        for listener in listeners {
            listener(terminal);
        }
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}
