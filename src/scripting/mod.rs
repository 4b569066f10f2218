/// Lua scripting bridge
///
/// Host operations are published into a Lua environment through the
/// registry, guest values are converted by the marshaller, and the
/// scheduler drives execution and suspended continuations from the host's
/// update loop.
pub mod builtins;
pub mod completion;
pub mod context;
pub mod error;
pub mod host;
pub mod marshal;
pub mod operation;
pub mod registry;
pub mod report;
pub mod script_runner;
pub mod timer;
pub mod value;

// Re-export commonly used types
pub use completion::CompletionFlag;
pub use error::{HostOperationError, MarshalError, RegistrationError, SchedulerMisuse};
pub use host::{HostApi, NoHost, SourceUnit};
pub use marshal::{MarshalOptions, Marshaller};
pub use operation::{Args, Operation, OperationDescriptor, ParameterDescriptor};
pub use registry::MethodRegistry;
pub use report::{CallHistory, CallRecord, ErrorOrigin, ExecutionError};
pub use script_runner::{ExecutionScheduler, SchedulerState};
pub use timer::DelayQueue;
pub use value::{Coord, Handle, HostValue, Target, ValueKind};
