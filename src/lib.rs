pub mod config;
pub mod logging;
pub mod scripting;

pub use config::{BridgeConfig, ConfigLoadError};
pub use scripting::{
    CompletionFlag, Coord, ExecutionError, ExecutionScheduler, Handle, HostApi, HostValue,
    Operation, ParameterDescriptor, SchedulerState, SourceUnit, Target, ValueKind,
};
