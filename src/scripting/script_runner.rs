use std::rc::Rc;
use std::time::Instant;

use mlua::{Function, Lua, MultiValue};
use strum_macros::Display;
use tracing::{debug, error, info, warn};

use super::builtins;
use super::context::ScriptContext;
use super::error::SchedulerMisuse;
use super::host::{concat_sources, HostApi, NoHost, SourceUnit};
use super::marshal::{MarshalOptions, Marshaller};
use super::operation::OperationDescriptor;
use super::registry::MethodRegistry;
use super::report::{CallRecord, ExecutionError, CHUNK_NAME};
use super::value::{HostValue, ValueKind};
use crate::config::BridgeConfig;

/// Observable scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SchedulerState {
    Idle,
    /// Continuations, a deferred block or repetition are still pending
    Running,
    /// The last attempt failed; cleared by the next tick or execution
    ErrorReported,
}

/// One guest environment: the Lua state plus everything bound into it
struct Environment {
    lua: Lua,
    registry: MethodRegistry,
    context: Rc<ScriptContext>,
}

impl Environment {
    fn build(config: &BridgeConfig, host: &Rc<dyn HostApi>) -> Self {
        let lua = Lua::new();
        let context = Rc::new(ScriptContext::new(config, host.clone()));
        let marshaller =
            Rc::new(Marshaller::new(MarshalOptions::from(config)).with_host(host.clone()));
        let mut registry = MethodRegistry::new(
            config.namespace.clone(),
            marshaller.clone(),
            context.clone(),
            config.type_checking,
        );

        let mut published = 0;
        for operation in builtins::operations(&config.namespace, &context)
            .into_iter()
            .chain(host.operations())
        {
            if registry.register(&lua, operation) {
                published += 1;
            }
        }

        if let Err(e) = builtins::publish_values(&lua, config, &marshaller) {
            error!(target: "scripting", "Failed to publish built-in values: {}", e);
        }
        if let Err(e) = registry.publish_introspection(&lua) {
            error!(target: "scripting", "Failed to publish introspection tables: {}", e);
        }

        debug!(
            target: "scripting",
            "Environment built with {} operation(s) under '{}'",
            published,
            config.namespace
        );

        Self {
            lua,
            registry,
            context,
        }
    }
}

struct Repeating {
    source: String,
    every_ticks: u64,
    elapsed: u64,
}

/// Runs guest blocks against the host's update loop
///
/// Call [`tick`](Self::tick) once per host update step. Guest code only
/// ever runs from inside a method of this type, on the owning thread.
pub struct ExecutionScheduler {
    config: BridgeConfig,
    host: Rc<dyn HostApi>,
    env: Environment,
    error_reported: bool,
    deferred: Option<String>,
    repeating: Option<Repeating>,
}

impl ExecutionScheduler {
    /// Create a scheduler with the default configuration
    pub fn new(host: Rc<dyn HostApi>) -> Self {
        Self::with_config(host, BridgeConfig::default())
    }

    pub fn with_config(host: Rc<dyn HostApi>, config: BridgeConfig) -> Self {
        let env = Environment::build(&config, &host);
        Self {
            config,
            host,
            env,
            error_reported: false,
            deferred: None,
            repeating: None,
        }
    }

    /// A scheduler exposing only the built-in operations
    pub fn without_host() -> Self {
        Self::new(Rc::new(NoHost))
    }

    pub fn state(&self) -> SchedulerState {
        if self.error_reported {
            SchedulerState::ErrorReported
        } else if self.deferred.is_some()
            || self.repeating.is_some()
            || self.env.context.has_pending_work()
        {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    /// Run `source` now and return its results
    ///
    /// An active run is force-stopped first. The environment itself is kept,
    /// so globals defined by earlier blocks remain visible.
    pub fn execute_block(&mut self, source: &str) -> Result<Vec<HostValue>, ExecutionError> {
        self.force_stop_if_running();
        self.run_block(source)
    }

    /// Run `source` on the next tick without waiting for it
    pub fn execute_once(&mut self, source: impl Into<String>) {
        self.force_stop_if_running();
        self.deferred = Some(source.into());
    }

    /// Run the concatenated contents of `units` on the next tick
    pub fn execute_units(&mut self, units: &[SourceUnit]) {
        self.execute_once(concat_sources(units));
    }

    /// Re-run `source` every `every_ticks` steps once the previous run is idle
    ///
    /// The first run happens on the next tick. Disarmed by `stop()` or by a
    /// guest error.
    pub fn execute_repeating(&mut self, source: impl Into<String>, every_ticks: u64) {
        self.force_stop_if_running();
        let every_ticks = every_ticks.max(1);
        self.repeating = Some(Repeating {
            source: source.into(),
            every_ticks,
            elapsed: every_ticks - 1,
        });
    }

    /// Cancel everything and rebuild the environment from scratch
    pub fn stop(&mut self) {
        self.deferred = None;
        self.repeating = None;
        self.error_reported = false;
        self.env.context.teardown();
        self.env = Environment::build(&self.config, &self.host);
        info!(target: "scripting", "Execution stopped; environment rebuilt");
    }

    /// Advance one host update step
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// Advance one host update step, using `now` for wall-clock polling
    pub fn tick_at(&mut self, now: Instant) {
        self.error_reported = false;

        if let Some(callback) = self.env.context.advance_delays() {
            self.invoke_callback("tick delay", callback);
        }

        if let Some(callback) = self.env.context.poll_completion(now) {
            self.invoke_callback("completion wait", callback);
        }

        if let Some(source) = self.deferred.take() {
            let _ = self.run_block(&source);
        }

        self.tick_repeating();
    }

    pub fn last_error(&self) -> Option<ExecutionError> {
        self.env.context.last_error()
    }

    /// Hide the current error from the editor surface
    pub fn dismiss_error(&mut self) {
        self.env.context.dismiss_error();
    }

    pub fn describe_all(&self) -> &[OperationDescriptor] {
        self.env.registry.describe_all()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Change the configuration; takes effect at the next `stop()`
    pub fn update_config(&mut self, update: impl FnOnce(&mut BridgeConfig)) {
        update(&mut self.config);
        debug!(target: "scripting", "Configuration updated; applies on next environment rebuild");
    }

    pub fn pending_delays(&self) -> usize {
        self.env.context.pending_delays()
    }

    /// Current value of the tick counter
    pub fn counter(&self) -> i64 {
        self.env.context.counter()
    }

    pub fn completion_pending(&self) -> bool {
        self.env.context.completion_active()
    }

    /// Call records of the current attempt, most recent last
    pub fn call_history(&self) -> Vec<CallRecord> {
        self.env.context.history()
    }

    /// The live guest state
    pub fn lua(&self) -> &Lua {
        &self.env.lua
    }

    fn force_stop_if_running(&mut self) {
        let state = self.state();
        if state == SchedulerState::Running {
            warn!(
                target: "scripting",
                "{}",
                SchedulerMisuse {
                    state: state.to_string()
                }
            );
            self.stop();
        }
    }

    fn run_block(&mut self, source: &str) -> Result<Vec<HostValue>, ExecutionError> {
        self.error_reported = false;
        self.env.context.begin_attempt(source);
        info!(
            target: "scripting",
            "Executing block ({} line(s))",
            source.lines().count()
        );

        let result = self
            .env
            .lua
            .load(source)
            .set_name(CHUNK_NAME)
            .call::<MultiValue>(());

        match result {
            Ok(values) => {
                let marshaller = self.env.registry.marshaller();
                let values = values
                    .iter()
                    .map(|value| {
                        marshaller
                            .to_host(value, ValueKind::Any)
                            .unwrap_or_else(|e| {
                                warn!(target: "scripting", "Block result not converted: {}", e);
                                HostValue::Nil
                            })
                    })
                    .collect();
                debug!(target: "scripting", "Block completed ({})", self.state());
                Ok(values)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn invoke_callback(&mut self, label: &str, callback: Function) {
        debug!(target: "scripting", "Resuming guest code from {}", label);
        if let Err(e) = callback.call::<()>(()) {
            self.fail(e);
        }
    }

    /// A guest fault aborts the run: pending continuations and repetition are dropped
    fn fail(&mut self, e: mlua::Error) -> ExecutionError {
        let report = self.env.context.report_guest_error(e.to_string());
        self.env.context.abort_pending();
        self.deferred = None;
        if self.repeating.take().is_some() {
            warn!(target: "scripting", "Repeating execution disarmed after error");
        }
        self.error_reported = true;
        report
    }

    fn tick_repeating(&mut self) {
        if self.env.context.has_pending_work() || self.deferred.is_some() {
            return;
        }
        let Some(repeating) = self.repeating.as_mut() else {
            return;
        };

        repeating.elapsed += 1;
        if repeating.elapsed < repeating.every_ticks {
            return;
        }
        repeating.elapsed = 0;
        let source = repeating.source.clone();
        let _ = self.run_block(&source);
    }
}

impl Drop for ExecutionScheduler {
    fn drop(&mut self) {
        self.env.context.teardown();
    }
}
