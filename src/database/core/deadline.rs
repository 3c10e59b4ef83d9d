//! Caller-supplied deadlines
//!
//! A `Deadline` bounds pool checkout and, through an `InterruptGuard`, the
//! statements run on a checked-out connection. When the deadline passes
//! while a statement is running, the statement is interrupted and fails
//! with `SQLITE_INTERRUPT`.

use rusqlite::{Connection, ErrorCode, InterruptHandle};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Point in time after which in-flight work should be abandoned
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// No deadline
    pub fn none() -> Self {
        Self { at: None }
    }

    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Some(Instant::now() + timeout),
        }
    }

    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        timeout.map(Self::after).unwrap_or_default()
    }

    /// Time left, `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|r| r.is_zero())
    }

    /// Arm an interrupt on `conn` that fires when the deadline passes
    pub fn watch(&self, conn: &Connection) -> InterruptGuard {
        match self.remaining() {
            Some(remaining) => InterruptGuard::arm(conn.get_interrupt_handle(), remaining),
            None => InterruptGuard::disarmed(),
        }
    }
}

/// Interrupts a connection once its timer runs out; disarmed on drop
pub struct InterruptGuard {
    stop: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl InterruptGuard {
    fn disarmed() -> Self {
        Self {
            stop: None,
            worker: None,
        }
    }

    fn arm(handle: InterruptHandle, remaining: Duration) -> Self {
        let (stop, stopped) = mpsc::channel::<()>();
        let worker = thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(remaining) {
                handle.interrupt();
            }
        });
        Self {
            stop: Some(stop),
            worker: Some(worker),
        }
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        // dropping the sender wakes the worker with `Disconnected`
        self.stop.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Whether a rusqlite error was caused by an interrupt
pub fn is_interrupted(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::OperationInterrupted
    )
}
