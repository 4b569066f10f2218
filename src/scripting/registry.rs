//! Publication of host operations into the guest namespace
//!
//! Every operation is bound to a trampoline built from three layers:
//! the core marshals arguments, invokes the handler and marshals the result
//! back; [`with_call_logging`] records the call for every operation that is
//! not excluded; the outer guard turns any failure into a logged report and
//! a sentinel return, so nothing raises into the guest.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use mlua::{Lua, MultiValue, Table, Value};
use tracing::{debug, error, warn, Level};

use super::context::ScriptContext;
use super::error::{HostOperationError, MarshalError, RegistrationError};
use super::marshal::Marshaller;
use super::operation::{Args, Handler, Operation, OperationDescriptor};
use super::report::CallRecord;
use super::value::{Handle, HostValue, ValueKind};

/// Marshal, invoke and marshal back; failures are returned, not raised
pub type Invocation = Rc<dyn Fn(&Lua, &MultiValue) -> Result<Value, HostOperationError>>;

pub struct MethodRegistry {
    namespace: String,
    descriptors: Vec<OperationDescriptor>,
    marshaller: Rc<Marshaller>,
    context: Rc<ScriptContext>,
    type_checking: bool,
}

impl MethodRegistry {
    pub fn new(
        namespace: impl Into<String>,
        marshaller: Rc<Marshaller>,
        context: Rc<ScriptContext>,
        type_checking: bool,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            descriptors: Vec::new(),
            marshaller,
            context,
            type_checking,
        }
    }

    pub fn marshaller(&self) -> &Rc<Marshaller> {
        &self.marshaller
    }

    /// Register an operation, logging and skipping it when it is rejected
    pub fn register(&mut self, lua: &Lua, operation: Operation) -> bool {
        match self.try_register(lua, operation) {
            Ok(()) => true,
            Err(e) => {
                error!(target: "scripting", "Skipping operation: {}", e);
                false
            }
        }
    }

    pub fn try_register(&mut self, lua: &Lua, operation: Operation) -> Result<(), RegistrationError> {
        let (descriptor, handler) = operation.validate()?;
        let name = descriptor.name.clone();
        let binding_error = |e: mlua::Error| RegistrationError::Binding {
            name: name.clone(),
            message: e.to_string(),
        };

        let descriptor = Rc::new(descriptor);
        let mut invocation = self.core(descriptor.clone(), handler);
        if !descriptor.exclude_from_logging {
            invocation = with_call_logging(
                descriptor.base_name().to_string(),
                self.context.clone(),
                invocation,
            );
        }
        let trampoline = self.guard(lua, descriptor.clone(), invocation).map_err(binding_error)?;

        let segments: Vec<&str> = name.split('.').collect();
        let (leaf, path) = segments
            .split_last()
            .ok_or_else(|| RegistrationError::InvalidName { name: name.clone() })?;
        let table = namespace_table(lua, path).map_err(binding_error)?;
        table.raw_set(*leaf, trampoline).map_err(binding_error)?;

        let descriptor = Rc::unwrap_or_clone(descriptor);
        match self.descriptors.iter_mut().find(|d| d.name == name) {
            Some(existing) => {
                debug!(target: "scripting", "Re-registered operation: {}", name);
                *existing = descriptor;
            }
            None => {
                debug!(target: "scripting", "Registered operation: {}", descriptor);
                self.descriptors.push(descriptor);
            }
        }
        Ok(())
    }

    /// One descriptor per successfully registered operation, in registration order
    pub fn describe_all(&self) -> &[OperationDescriptor] {
        &self.descriptors
    }

    /// Publish `MethodsInfoTable` and `MethodsInfoString` under the namespace
    pub fn publish_introspection(&self, lua: &Lua) -> mlua::Result<()> {
        let info = lua.create_table()?;
        let mut listing = Vec::with_capacity(self.descriptors.len());

        for descriptor in &self.descriptors {
            let key = self.introspection_key(&descriptor.name);
            let entry = lua.create_table()?;
            entry.raw_set("Name", key)?;
            entry.raw_set("ReturnType", descriptor.returns.to_string())?;

            let arguments = lua.create_table()?;
            for (i, param) in descriptor.params.iter().enumerate() {
                let argument = lua.create_table()?;
                argument.raw_set("ArgName", param.name.as_str())?;
                argument.raw_set("ArgType", param.kind.to_string())?;
                argument.raw_set("IsOptional", param.optional)?;
                argument.raw_set("DefaultValue", param.default_string())?;
                arguments.raw_set(i + 1, argument)?;
            }
            entry.raw_set("Arguments", arguments)?;

            info.raw_set(key, entry)?;
            listing.push(descriptor.to_string());
        }

        let segments: Vec<&str> = self.namespace.split('.').collect();
        let namespace = namespace_table(lua, &segments)?;
        namespace.raw_set("MethodsInfoTable", info)?;
        namespace.raw_set("MethodsInfoString", listing.join("\n"))?;
        Ok(())
    }

    /// Qualified name with only this registry's own namespace prefix removed
    fn introspection_key<'a>(&self, name: &'a str) -> &'a str {
        if self.namespace.is_empty() {
            return name;
        }
        name.strip_prefix(self.namespace.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(name)
    }

    fn core(&self, descriptor: Rc<OperationDescriptor>, handler: Handler) -> Invocation {
        let marshaller = self.marshaller.clone();
        let type_checking = self.type_checking;

        Rc::new(move |lua: &Lua, guest_args: &MultiValue| {
            let mut supplied = guest_args.iter();
            let mut values = Vec::with_capacity(descriptor.params.len());

            for param in &descriptor.params {
                let kind = if type_checking {
                    param.kind
                } else {
                    ValueKind::Any
                };
                let guest = supplied.next();

                let value = match guest {
                    None | Some(Value::Nil) if param.optional => {
                        param.default.clone().unwrap_or(HostValue::Nil)
                    }
                    None => {
                        let e = MarshalError::MissingArgument {
                            name: param.name.clone(),
                        };
                        warn!(target: "scripting", "{}: {}", descriptor.name, e);
                        param.kind.sentinel()
                    }
                    Some(guest) => match marshaller.to_host(guest, kind) {
                        Ok(value) => value,
                        Err(e) => {
                            warn!(
                                target: "scripting",
                                "{}: argument '{}' not converted: {}",
                                descriptor.name,
                                param.name,
                                e
                            );
                            param.kind.sentinel()
                        }
                    },
                };
                values.push(value);
            }

            let args = Args::new(&descriptor.params, values);
            let result = catch_unwind(AssertUnwindSafe(|| handler(&args)))
                .map_err(|_| HostOperationError::new("operation panicked"))??;

            Ok(marshaller.to_guest(lua, &result)?)
        })
    }

    fn guard(
        &self,
        lua: &Lua,
        descriptor: Rc<OperationDescriptor>,
        invocation: Invocation,
    ) -> mlua::Result<mlua::Function> {
        let marshaller = self.marshaller.clone();
        let context = self.context.clone();

        lua.create_function(move |lua, args: MultiValue| match invocation(lua, &args) {
            Ok(value) => Ok(value),
            Err(e) => {
                let message = format!("Error in {}: {}", descriptor.name, e);
                error!(target: "scripting", "{}", message);
                context.report_host_error(message, calling_line(lua));
                Ok(marshaller
                    .to_guest(lua, &descriptor.returns.sentinel())
                    .unwrap_or(Value::Nil))
            }
        })
    }
}

/// Wrap an invocation so every call is recorded in the call history
///
/// Applied the same way to every operation; only the base name varies.
pub fn with_call_logging(
    base_name: String,
    context: Rc<ScriptContext>,
    inner: Invocation,
) -> Invocation {
    Rc::new(move |lua: &Lua, args: &MultiValue| {
        let types = if args.is_empty() {
            "No arguments".to_string()
        } else {
            args.iter()
                .map(guest_type_name)
                .collect::<Vec<_>>()
                .join(", ")
        };
        context.record_call(CallRecord::new(&base_name, &types));

        if !tracing::enabled!(target: "scripting", Level::DEBUG) {
            return inner(lua, args);
        }

        let snapshot = args
            .iter()
            .map(describe_guest_value)
            .collect::<Vec<_>>()
            .join(", ");
        debug!(target: "scripting", "{}({})", base_name, snapshot);

        inner(lua, args).inspect_err(|_| {
            debug!(target: "scripting", "{} failed with arguments ({})", base_name, snapshot);
        })
    })
}

/// Line of the guest frame that called into the current operation
fn calling_line(lua: &Lua) -> Option<i64> {
    lua.inspect_stack(1)
        .map(|frame| frame.curr_line())
        .filter(|line| *line > 0)
        .map(i64::from)
}

/// Walk (creating as needed) the tables along `path` from the globals
pub(crate) fn namespace_table(lua: &Lua, path: &[&str]) -> mlua::Result<Table> {
    let mut table = lua.globals();
    for segment in path {
        table = match table.raw_get::<Value>(*segment)? {
            Value::Table(existing) => existing,
            _ => {
                let created = lua.create_table()?;
                table.raw_set(*segment, created.clone())?;
                created
            }
        };
    }
    Ok(table)
}

fn guest_type_name(value: &Value) -> String {
    match value {
        Value::UserData(userdata) => userdata
            .borrow::<Handle>()
            .map(|handle| handle.kind.clone())
            .unwrap_or_else(|_| "userdata".to_string()),
        other => other.type_name().to_string(),
    }
}

fn describe_guest_value(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("{:?}", s.to_string_lossy()),
        Value::UserData(userdata) => userdata
            .borrow::<Handle>()
            .map(|handle| handle.to_string())
            .unwrap_or_else(|_| "<userdata>".to_string()),
        other => format!("<{}>", other.type_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_table_creates_nested_tables() {
        let lua = Lua::new();
        let table = namespace_table(&lua, &["A", "B"]).unwrap();
        table.raw_set("leaf", 1).unwrap();

        let value: i64 = lua.load("return A.B.leaf").eval().unwrap();
        assert_eq!(value, 1);

        // Existing tables are reused
        namespace_table(&lua, &["A"]).unwrap();
        let value: i64 = lua.load("return A.B.leaf").eval().unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn test_introspection_key_strips_only_own_namespace() {
        let context = Rc::new(ScriptContext::new(
            &crate::config::BridgeConfig::default(),
            Rc::new(crate::scripting::host::NoHost),
        ));
        let marshaller = Rc::new(Marshaller::new(Default::default()));
        let registry = MethodRegistry::new("Turtle", marshaller, context, true);

        assert_eq!(registry.introspection_key("Turtle.GetPosition"), "GetPosition");
        assert_eq!(registry.introspection_key("Camera.GetPosition"), "Camera.GetPosition");
        assert_eq!(registry.introspection_key("TurtleX.Move"), "TurtleX.Move");
        assert_eq!(registry.introspection_key("Add"), "Add");
    }

    #[test]
    fn test_guest_type_names() {
        let lua = Lua::new();
        let handle = lua.create_userdata(Handle::new("Pawn", 1)).unwrap();
        assert_eq!(guest_type_name(&Value::UserData(handle)), "Pawn");
        assert_eq!(guest_type_name(&Value::Integer(3)), "integer");
        assert_eq!(describe_guest_value(&Value::Nil), "nil");
    }
}
