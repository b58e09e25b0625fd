// SPDX-License-Identifier: GPL-3.0-only

//! Stoppable worker thread for frame sources
//!
//! The loop body is called until it returns [`LoopAction::Stop`] or the
//! owner stops the loop. Preparation runs on the worker thread too, so
//! starting never blocks the caller on file or device work.

use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    Continue,
    Stop,
}

/// Handle to a running frame loop; dropping it stops the loop
pub struct FrameLoop {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl FrameLoop {
    /// Spawn a loop whose state is built by `init_fn` on the new thread
    ///
    /// If `init_fn` fails the thread exits without running `loop_fn`.
    pub fn start_with_init<S, E, I, F>(name: &str, init_fn: I, mut loop_fn: F) -> std::io::Result<Self>
    where
        S: Send + 'static,
        E: Display,
        I: FnOnce() -> Result<S, E> + Send + 'static,
        F: FnMut(&mut S) -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop_signal);
        let thread_name = name.to_string();

        info!(name, "Starting frame loop");
        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut state = match init_fn() {
                    Ok(state) => state,
                    Err(e) => {
                        warn!(name = %thread_name, error = %e, "Frame loop preparation failed");
                        return;
                    }
                };
                debug!(name = %thread_name, "Frame loop prepared");

                while !thread_stop.load(Ordering::SeqCst) {
                    if loop_fn(&mut state) == LoopAction::Stop {
                        debug!(name = %thread_name, "Loop requested stop");
                        break;
                    }
                }
                info!(name = %thread_name, "Frame loop exiting");
            })?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Signal the loop without waiting for it
    pub fn request_stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Signal the loop and join the thread
    pub fn stop(&mut self) {
        self.request_stop();
        if let Some(handle) = self.thread_handle.take() {
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Frame loop thread panicked: {:?}", e);
            } else {
                debug!(name = %self.name, "Frame loop finished");
            }
        }
    }
}

impl Drop for FrameLoop {
    fn drop(&mut self) {
        self.stop();
    }
}
