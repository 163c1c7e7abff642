// SPDX-License-Identifier: GPL-3.0-only

//! Background loop threads with cooperative stop
//!
//! Used for the presence scanner, the platform event pump, the uevent watcher
//! and the V4L2 stream thread. Loop bodies receive a [`StopSignal`] and may
//! sleep on it, so a stop request wakes them immediately instead of after
//! their interval.

use std::io;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of one loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Run the body again
    Continue,
    /// Leave the loop
    Stop,
}

/// Stop flag a loop body can poll or sleep on
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_requested(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep up to `timeout`; returns true if a stop was requested
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut stopped = flag.lock().unwrap_or_else(PoisonError::into_inner);
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            stopped = cvar
                .wait_timeout(stopped, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *stopped
    }
}

/// Owner of one loop thread
///
/// Dropping the controller stops the loop and joins the thread.
pub struct LoopController {
    thread_handle: Option<JoinHandle<()>>,
    stop: StopSignal,
    name: String,
}

impl LoopController {
    /// Spawn a named thread running `loop_fn` until it returns
    /// [`LoopAction::Stop`] or a stop is requested
    pub fn start<F>(name: &str, mut loop_fn: F) -> io::Result<Self>
    where
        F: FnMut(&StopSignal) -> LoopAction + Send + 'static,
    {
        Self::start_with_init(name, || Ok(()), move |_: &mut (), stop| loop_fn(stop))
    }

    /// Like [`start`](Self::start), with per-thread state built on the new thread
    ///
    /// The body never runs when `init_fn` fails.
    pub fn start_with_init<S, I, F>(name: &str, init_fn: I, mut loop_fn: F) -> io::Result<Self>
    where
        S: 'static,
        I: FnOnce() -> Result<S, String> + Send + 'static,
        F: FnMut(&mut S, &StopSignal) -> LoopAction + Send + 'static,
    {
        let stop = StopSignal::new();
        let thread_stop = stop.clone();
        let thread_name = name.to_string();

        info!(name = %name, "Starting worker loop");

        let thread_handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            let mut state = match init_fn() {
                Ok(s) => s,
                Err(e) => {
                    warn!(name = %thread_name, error = %e, "Worker loop initialization failed");
                    return;
                }
            };

            while !thread_stop.is_requested() {
                if loop_fn(&mut state, &thread_stop) == LoopAction::Stop {
                    debug!(name = %thread_name, "Loop requested stop");
                    break;
                }
            }

            debug!(name = %thread_name, "Worker loop exiting");
        })?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            stop,
            name: name.to_string(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Signal the loop to stop without waiting
    pub fn request_stop(&self) {
        self.stop.request();
    }

    /// Signal the loop to stop and wait for the thread
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Wait for the thread to finish
    ///
    /// Called from the loop's own thread (a loop body tearing down its owner)
    /// this only detaches, since a thread cannot join itself.
    pub fn join(&mut self) {
        let Some(handle) = self.thread_handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            debug!(name = %self.name, "Worker loop stopped from its own thread, detaching");
            return;
        }
        if let Err(e) = handle.join() {
            warn!(name = %self.name, "Worker loop thread panicked: {:?}", e);
        }
    }
}

impl Drop for LoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            self.stop();
        }
    }
}
