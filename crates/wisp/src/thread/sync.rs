//! Cooperation between threads of one runtime. A grower raises `stop`,
//! peers park at their next frame boundary, and the memory's write lock
//! then gives the grower exclusive rewrite rights over the buffer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

pub struct SyncContext {
    stop: AtomicBool,
    gate: Mutex<()>,
    cond: Condvar,
}

impl Default for SyncContext {
    fn default() -> SyncContext {
        SyncContext::new()
    }
}

impl SyncContext {
    pub fn new() -> SyncContext {
        SyncContext { stop: AtomicBool::new(false), gate: Mutex::new(()), cond: Condvar::new() }
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Block until the current grow completes. Called from frame tops.
    pub fn wait_if_stopped(&self) {
        if !self.stop_requested() {
            return;
        }
        let mut guard = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        while self.stop_requested() {
            guard = self.cond.wait(guard).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Run `f` as the exclusive writer: peers yield while `stop` is set
    /// and are woken afterwards.
    pub fn with_stopped_peers<R>(&self, f: impl FnOnce() -> R) -> R {
        self.stop.store(true, Ordering::Release);
        let result = f();
        self.stop.store(false, Ordering::Release);
        drop(self.gate.lock().unwrap_or_else(|e| e.into_inner()));
        self.cond.notify_all();
        result
    }
}
