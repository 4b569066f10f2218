//! Operations and values every environment publishes under the namespace

use std::collections::BTreeMap;
use std::rc::Rc;

use mlua::Lua;
use tracing::{debug, error, info, warn};

use super::context::ScriptContext;
use super::error::HostOperationError;
use super::marshal::Marshaller;
use super::operation::{Operation, ParameterDescriptor};
use super::registry::namespace_table;
use super::value::{Coord, HostValue, ValueKind};
use crate::config::BridgeConfig;

/// Qualify `name` with the namespace; an empty namespace binds a global
pub fn qualify(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", namespace, name)
    }
}

pub fn operations(namespace: &str, context: &Rc<ScriptContext>) -> Vec<Operation> {
    let mut ops = vec![
        Operation::new(qualify(namespace, "Log"))
            .param(ParameterDescriptor::required("message", ValueKind::Any))
            .exclude_from_logging()
            .handler(|args| {
                info!(target: "script", "{}", args.get("message"));
                Ok(HostValue::Nil)
            }),
        Operation::new(qualify(namespace, "LogWarning"))
            .param(ParameterDescriptor::required("message", ValueKind::Any))
            .exclude_from_logging()
            .handler(|args| {
                warn!(target: "script", "{}", args.get("message"));
                Ok(HostValue::Nil)
            }),
        Operation::new(qualify(namespace, "LogError"))
            .param(ParameterDescriptor::required("message", ValueKind::Any))
            .exclude_from_logging()
            .handler(|args| {
                error!(target: "script", "{}", args.get("message"));
                Ok(HostValue::Nil)
            }),
        Operation::new(qualify(namespace, "GetType"))
            .param(ParameterDescriptor::required("value", ValueKind::Any))
            .returns(ValueKind::String)
            .exclude_from_logging()
            .handler(|args| Ok(args.get("value").type_name().into())),
        Operation::new(qualify(namespace, "CreateCoord"))
            .param(ParameterDescriptor::required("input", ValueKind::Coord))
            .returns(ValueKind::Coord)
            .handler(|args| Ok(args.coord("input")?.into())),
        Operation::new(qualify(namespace, "ToTarget"))
            .param(ParameterDescriptor::required("target", ValueKind::Target))
            .returns(ValueKind::Target)
            .handler(|args| Ok(args.target("target")?.into())),
        Operation::new(qualify(namespace, "IsValid"))
            .param(ParameterDescriptor::required("value", ValueKind::Any))
            .returns(ValueKind::Bool)
            .handler(|args| Ok(is_valid(args.get("value")).into())),
    ];

    let ctx = context.clone();
    ops.push(
        Operation::new(qualify(namespace, "WaitForTicks"))
            .param(ParameterDescriptor::required("ticks", ValueKind::Int))
            .param(ParameterDescriptor::required("callback", ValueKind::Callback))
            .handler(move |args| {
                let ticks = args.int("ticks")?;
                let callback = args.callback("callback")?.clone();
                let due = ctx.schedule_delay(ticks, callback);
                debug!(target: "scripting", "Delay of {} tick(s) due at {}", ticks, due);
                Ok(HostValue::Nil)
            }),
    );

    let ctx = context.clone();
    ops.push(
        Operation::new(qualify(namespace, "WaitForCompletion"))
            .param(ParameterDescriptor::required("callback", ValueKind::Callback))
            .param(ParameterDescriptor::optional("subject", ValueKind::Handle(None)))
            .handler(move |args| {
                let callback = args.callback("callback")?.clone();
                let subject = args.handle("subject")?;
                let flag = ctx.host().watch_completion(subject).ok_or_else(|| {
                    HostOperationError::new(match subject {
                        Some(subject) => format!("{} has no completion to wait for", subject),
                        None => "the host has no pending work to wait for".to_string(),
                    })
                })?;
                ctx.start_completion(flag, callback);
                Ok(HostValue::Nil)
            }),
    );

    let ctx = context.clone();
    ops.push(
        Operation::new(qualify(namespace, "MethodCallHistory"))
            .param(ParameterDescriptor::with_default(
                "log_as_error",
                ValueKind::Bool,
                false,
            ))
            .returns(ValueKind::List)
            .handler(move |args| {
                ctx.log_history(args.bool("log_as_error")?);
                let records = ctx
                    .history()
                    .into_iter()
                    .map(|record| {
                        let mut fields = BTreeMap::new();
                        fields.insert("Operation".to_string(), record.operation.into());
                        fields.insert("ArgumentTypes".to_string(), record.argument_types.into());
                        HostValue::Record(fields)
                    })
                    .collect();
                Ok(HostValue::List(records))
            }),
    );

    ops
}

/// Publish `InvalidCoord` and the read-only configuration globals
pub fn publish_values(lua: &Lua, config: &BridgeConfig, marshaller: &Marshaller) -> mlua::Result<()> {
    let globals = lua.globals();
    globals.raw_set("_TypeChecking", config.type_checking)?;
    globals.raw_set("_AutoConvert", config.auto_convert)?;
    globals.raw_set("_LogConversions", config.log_conversions)?;
    globals.raw_set("_WarnOnKindMismatch", config.warn_on_kind_mismatch)?;

    let invalid = marshaller.to_guest(lua, &HostValue::Coord(Coord::INVALID))?;
    let path = qualify(&config.namespace, "InvalidCoord");
    let segments: Vec<&str> = path.split('.').collect();
    match segments.split_last() {
        Some((leaf, parents)) => namespace_table(lua, parents)?.raw_set(*leaf, invalid),
        None => Ok(()),
    }
}

/// Validity as guest code sees it; coordinate-shaped tables are checked too
fn is_valid(value: &HostValue) -> bool {
    match value {
        HostValue::Record(fields) => {
            let axis = |key: &str| match fields.get(key) {
                Some(HostValue::Int(v)) => Some(*v),
                _ => None,
            };
            match (axis("x"), axis("y"), axis("z")) {
                (Some(x), Some(y), Some(z)) => {
                    (x, y, z)
                        != (
                            Coord::INVALID.x as i64,
                            Coord::INVALID.y as i64,
                            Coord::INVALID.z as i64,
                        )
                }
                _ => true,
            }
        }
        other => other.is_valid(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualify() {
        assert_eq!(qualify("Bridge", "Log"), "Bridge.Log");
        assert_eq!(qualify("", "Log"), "Log");
    }

    #[test]
    fn test_invalid_coord_record_is_not_valid() {
        let mut fields = BTreeMap::new();
        fields.insert("x".to_string(), HostValue::Int(-1000));
        fields.insert("y".to_string(), HostValue::Int(-1000));
        fields.insert("z".to_string(), HostValue::Int(-1000));
        assert!(!is_valid(&HostValue::Record(fields.clone())));

        fields.insert("y".to_string(), HostValue::Int(0));
        assert!(is_valid(&HostValue::Record(fields)));
        assert!(!is_valid(&HostValue::Nil));
        assert!(is_valid(&HostValue::Int(0)));
    }
}
