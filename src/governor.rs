//! IO event governor: a rolling-window rate limiter for read/write events.
//!
//! Callers record one event per IO operation; a background tick clears the
//! window on a fixed interval.  The buffer is shared between caller threads
//! (append-and-check) and the tick thread (clear), guarded by a single
//! mutex.  The tick asserts the `app_run` lifecycle flag on every firing —
//! a missing flag means the process is using the governor outside its
//! lifecycle, which is a programming error, not a runtime condition.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;

use crate::config::{FlagStore, APP_RUN_FLAG};

/// The kind of IO operation being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoEvent {
    Read,
    Write,
}

#[derive(Error, Debug)]
#[error("Too many IO events in one window: {recorded} recorded, limit {limit}")]
pub struct RateLimitError {
    pub recorded: usize,
    pub limit:    usize,
}

// ── Policy ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernorPolicy {
    /// Events allowed per minute; scaled down to the tick interval.
    pub max_events_per_minute: u32,
    /// How often the window resets.
    pub tick_interval: Duration,
}

impl Default for GovernorPolicy {
    fn default() -> Self {
        Self {
            max_events_per_minute: 1000,
            tick_interval:         Duration::from_secs(10),
        }
    }
}

impl GovernorPolicy {
    /// The per-window threshold: events-per-minute scaled to the tick
    /// interval, never below 1.
    pub fn window_limit(&self) -> usize {
        let per_minute = u64::from(self.max_events_per_minute);
        let limit = per_minute * self.tick_interval.as_secs() / 60;
        limit.max(1) as usize
    }
}

// ── Governor ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct IoGovernor {
    events: Mutex<Vec<IoEvent>>,
    policy: GovernorPolicy,
}

impl IoGovernor {
    pub fn new(policy: GovernorPolicy) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            policy,
        }
    }

    pub fn policy(&self) -> GovernorPolicy {
        self.policy
    }

    /// Record one IO event.
    ///
    /// The entry is appended before the limit check, so a rejected call
    /// still counts against the current window.
    pub fn record(&self, event: IoEvent) -> Result<(), RateLimitError> {
        let limit = self.policy.window_limit();
        let mut events = self.events.lock();
        events.push(event);
        if events.len() > limit {
            return Err(RateLimitError {
                recorded: events.len(),
                limit,
            });
        }
        Ok(())
    }

    /// Events recorded since the last window reset.
    pub fn events_in_window(&self) -> usize {
        self.events.lock().len()
    }

    /// Clear the current window.  Called by the tick thread.
    pub fn reset_window(&self) {
        self.events.lock().clear();
    }

    /// Start the periodic window-reset tick on a background thread.
    ///
    /// Every tick asserts that `app_run` is raised in `flags`; if it is not,
    /// the tick thread panics.  Shut down with [`GovernorHandle::shutdown`]
    /// before clearing the flag.
    pub fn start(self: Arc<Self>, flags: Arc<FlagStore>) -> std::io::Result<GovernorHandle> {
        let governor = self;
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let ticking = Arc::new(AtomicBool::new(true));
        let ticking_flag = Arc::clone(&ticking);
        let interval = governor.policy.tick_interval;

        let join = thread::Builder::new()
            .name("vellum-io-governor".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        ticking_flag.store(false, Ordering::SeqCst);
                        return;
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                }

                let running = flags.check(APP_RUN_FLAG).unwrap_or(0);
                if running == 0 {
                    ticking_flag.store(false, Ordering::SeqCst);
                    panic!("IO governor tick fired without the {APP_RUN_FLAG} flag raised");
                }

                governor.reset_window();
            })?;

        Ok(GovernorHandle {
            stop_tx,
            ticking,
            join: Some(join),
        })
    }
}

/// Handle to the background tick.  Dropping the handle without calling
/// [`shutdown`](GovernorHandle::shutdown) stops future ticks but does not
/// wait for the thread to exit.
#[derive(Debug)]
pub struct GovernorHandle {
    stop_tx: mpsc::Sender<()>,
    ticking: Arc<AtomicBool>,
    join:    Option<thread::JoinHandle<()>>,
}

impl GovernorHandle {
    /// True while the tick thread is alive and has not panicked.
    pub fn is_ticking(&self) -> bool {
        self.ticking.load(Ordering::SeqCst)
    }

    /// Stop future ticks and wait for the tick thread to exit.
    pub fn shutdown(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(join) = self.join.take() {
            // A tick panic (missing lifecycle flag) surfaces here.
            if join.join().is_err() {
                tracing::error!("IO governor tick thread panicked during shutdown");
            }
        }
    }
}
