use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use mlua::Function;

use super::completion::{CompletionFlag, CompletionPoller};
use super::host::HostApi;
use super::report::{CallHistory, CallRecord, ErrorOrigin, ErrorReporter, ExecutionError};
use super::timer::DelayQueue;
use crate::config::BridgeConfig;

/// State shared between the scheduler and the trampolines of one environment
///
/// Each concern sits in its own `RefCell`. Borrows never outlive a single
/// method call here, so a guest callback can never run while one is held.
pub struct ScriptContext {
    host: Rc<dyn HostApi>,
    history: RefCell<CallHistory>,
    delays: RefCell<DelayQueue<Function>>,
    completion: RefCell<CompletionPoller<Function>>,
    surface: RefCell<Option<ExecutionError>>,
    /// Source of the block whose code is currently live in the environment
    source: RefCell<String>,
}

impl ScriptContext {
    pub fn new(config: &BridgeConfig, host: Rc<dyn HostApi>) -> Self {
        Self {
            host,
            history: RefCell::new(CallHistory::new(config.history_capacity)),
            delays: RefCell::new(DelayQueue::new(config.rebase_threshold)),
            completion: RefCell::new(CompletionPoller::new(Duration::from_millis(
                config.completion_poll_interval_ms,
            ))),
            surface: RefCell::new(None),
            source: RefCell::new(String::new()),
        }
    }

    pub fn host(&self) -> &dyn HostApi {
        self.host.as_ref()
    }

    /// Reset per-attempt state before a top-level execution
    pub fn begin_attempt(&self, source: &str) {
        self.history.borrow_mut().clear();
        *self.surface.borrow_mut() = None;
        *self.source.borrow_mut() = source.to_string();
    }

    // ===== Call history =====

    pub fn record_call(&self, record: CallRecord) {
        self.history.borrow_mut().push(record);
    }

    pub fn history(&self) -> Vec<CallRecord> {
        self.history.borrow().snapshot()
    }

    pub fn log_history(&self, as_error: bool) {
        self.history.borrow().log(as_error);
    }

    // ===== Tick delays =====

    pub fn schedule_delay(&self, ticks: i64, callback: Function) -> i64 {
        self.delays.borrow_mut().schedule(ticks, callback)
    }

    /// Advance the tick counter and take at most one due callback
    pub fn advance_delays(&self) -> Option<Function> {
        self.delays.borrow_mut().advance()
    }

    pub fn counter(&self) -> i64 {
        self.delays.borrow().counter()
    }

    pub fn pending_delays(&self) -> usize {
        self.delays.borrow().len()
    }

    // ===== Completion waits =====

    pub fn start_completion(&self, flag: CompletionFlag, callback: Function) {
        self.completion.borrow_mut().start(flag, callback);
    }

    pub fn poll_completion(&self, now: Instant) -> Option<Function> {
        self.completion.borrow_mut().poll(now)
    }

    pub fn completion_active(&self) -> bool {
        self.completion.borrow().is_active()
    }

    /// Whether continuations are still waiting to resume guest code
    pub fn has_pending_work(&self) -> bool {
        !self.delays.borrow().is_empty() || self.completion_active()
    }

    /// Drop every pending continuation
    pub fn abort_pending(&self) {
        self.delays.borrow_mut().clear();
        self.completion.borrow_mut().cancel();
    }

    // ===== Error surface =====

    /// Record a failure raised inside a published operation
    ///
    /// Only the first failure of an attempt reaches the surface.
    pub fn report_host_error(&self, message: String, line: Option<i64>) {
        let report = self.capture(ErrorOrigin::HostOperation, message, line);
        let mut surface = self.surface.borrow_mut();
        if surface.is_none() {
            *surface = Some(report);
        }
    }

    /// Record a guest fault; supersedes an earlier host-operation entry
    pub fn report_guest_error(&self, message: String) -> ExecutionError {
        let report = self.capture(ErrorOrigin::Guest, message, None);
        let mut surface = self.surface.borrow_mut();
        let replace = surface
            .as_ref()
            .map_or(true, |current| current.origin == ErrorOrigin::HostOperation);
        if replace {
            *surface = Some(report.clone());
        }
        report
    }

    pub fn last_error(&self) -> Option<ExecutionError> {
        self.surface.borrow().clone()
    }

    pub fn dismiss_error(&self) {
        if let Some(error) = self.surface.borrow_mut().as_mut() {
            error.is_displaying = false;
        }
    }

    /// Clear everything a hard stop discards
    pub fn teardown(&self) {
        self.abort_pending();
        self.history.borrow_mut().clear();
        *self.surface.borrow_mut() = None;
        self.source.borrow_mut().clear();
    }

    fn capture(&self, origin: ErrorOrigin, message: String, line: Option<i64>) -> ExecutionError {
        let history = self.history.borrow();
        let source = self.source.borrow();
        ErrorReporter::capture(origin, message, line, &source, &history)
    }
}
