//! External-completion waits
//!
//! The host raises a [`CompletionFlag`] (from any thread) when some
//! asynchronous work finishes. A poll checks the flag at a fixed wall-clock
//! cadence; the guest callback is only handed back through
//! [`CompletionPoller::poll`], which the scheduler calls from its update step,
//! so guest state is never touched off the main thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle as RuntimeHandle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Default cadence for checking a completion flag
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Shorter intervals (including zero) are raised to this
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Shared completion signal raised by the host
#[derive(Debug, Clone, Default)]
pub struct CompletionFlag(Arc<AtomicBool>);

impl CompletionFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// A flag that is already raised
    pub fn raised() -> Self {
        let flag = Self::new();
        flag.raise();
        flag
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

enum Poll {
    /// Tokio task checking the flag, reports back over the channel
    Background(JoinHandle<()>),
    /// No runtime available: checked from `poll` at the same cadence
    Inline {
        flag: CompletionFlag,
        next_check: Instant,
    },
}

struct ActiveWait<T> {
    id: u64,
    callback: T,
    poll: Poll,
}

/// Owns at most one active completion wait
pub struct CompletionPoller<T> {
    interval: Duration,
    runtime: Option<RuntimeHandle>,
    tx: UnboundedSender<u64>,
    rx: UnboundedReceiver<u64>,
    next_id: u64,
    active: Option<ActiveWait<T>>,
}

impl<T> CompletionPoller<T> {
    /// Create a poller; uses the ambient Tokio runtime if there is one
    pub fn new(interval: Duration) -> Self {
        Self::with_runtime(interval, RuntimeHandle::try_current().ok())
    }

    pub fn with_runtime(interval: Duration, runtime: Option<RuntimeHandle>) -> Self {
        if interval < MIN_POLL_INTERVAL {
            warn!(
                target: "scripting",
                "Completion poll interval {:?} is too short; using {:?}",
                interval,
                MIN_POLL_INTERVAL
            );
        }
        let (tx, rx) = unbounded_channel();
        Self {
            interval: interval.max(MIN_POLL_INTERVAL),
            runtime,
            tx,
            rx,
            next_id: 0,
            active: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn uses_background_task(&self) -> bool {
        self.runtime.is_some()
    }

    /// Start waiting on `flag`; any previous wait is cancelled first
    pub fn start(&mut self, flag: CompletionFlag, callback: T) {
        if self.cancel() {
            debug!(target: "scripting", "Replaced an active completion wait");
        }

        let id = self.next_id;
        self.next_id += 1;

        let poll = match &self.runtime {
            Some(runtime) => {
                let tx = self.tx.clone();
                let interval = self.interval;
                Poll::Background(runtime.spawn(async move {
                    let mut ticker = tokio::time::interval(interval);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        ticker.tick().await;
                        if flag.is_raised() {
                            let _ = tx.send(id);
                            break;
                        }
                    }
                }))
            }
            None => Poll::Inline {
                flag,
                next_check: Instant::now(),
            },
        };

        self.active = Some(ActiveWait { id, callback, poll });
    }

    /// Cancel the active wait; returns whether there was one
    pub fn cancel(&mut self) -> bool {
        match self.active.take() {
            Some(wait) => {
                if let Poll::Background(task) = wait.poll {
                    task.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Hand back the callback once its flag has been observed raised
    ///
    /// Returns `Some` at most once per wait; the wait is cleared when it does.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        let mut completed = false;

        while let Ok(id) = self.rx.try_recv() {
            if self.active.as_ref().is_some_and(|wait| wait.id == id) {
                completed = true;
            }
        }

        if let Some(ActiveWait {
            poll: Poll::Inline { flag, next_check },
            ..
        }) = self.active.as_mut()
        {
            if now >= *next_check {
                *next_check = now + self.interval;
                completed = completed || flag.is_raised();
            }
        }

        if completed {
            self.active.take().map(|wait| wait.callback)
        } else {
            None
        }
    }
}

impl<T> Drop for CompletionPoller<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}
