use std::rc::Rc;

use mlua::Lua;
use tickbridge::scripting::context::ScriptContext;
use tickbridge::scripting::{
    ExecutionScheduler, HostApi, HostOperationError, HostValue, MarshalOptions, Marshaller,
    MethodRegistry, NoHost, Operation, ParameterDescriptor, RegistrationError, ValueKind,
};
use tickbridge::BridgeConfig;

const BUILTIN_COUNT: usize = 10;

struct MathHost;

impl HostApi for MathHost {
    fn operations(&self) -> Vec<Operation> {
        vec![
            Operation::new("Add")
                .param(ParameterDescriptor::required("a", ValueKind::Number))
                .param(ParameterDescriptor::required("b", ValueKind::Number))
                .returns(ValueKind::Number)
                .handler(|args| Ok(HostValue::Number(args.number("a")? + args.number("b")?))),
            // No callable: skipped
            Operation::new("Math.Broken").returns(ValueKind::Number),
            Operation::new("Math.Scale")
                .param(ParameterDescriptor::required("value", ValueKind::Number))
                .param(ParameterDescriptor::with_default("factor", ValueKind::Number, 2))
                .returns(ValueKind::Number)
                .handler(|args| Ok(HostValue::Number(args.number("value")? * args.number("factor")?))),
            // Invalid name: skipped
            Operation::new("Bad Name").handler(|_| Ok(HostValue::Nil)),
            Operation::new("Math.Pi")
                .returns(ValueKind::Number)
                .handler(|_| Ok(HostValue::Number(std::f64::consts::PI))),
        ]
    }
}

fn standalone_registry() -> MethodRegistry {
    let context = Rc::new(ScriptContext::new(&BridgeConfig::default(), Rc::new(NoHost)));
    let marshaller = Rc::new(Marshaller::new(MarshalOptions::default()));
    MethodRegistry::new("Bridge", marshaller, context, true)
}

#[test]
fn test_describe_all_has_one_entry_per_successful_registration() {
    let scheduler = ExecutionScheduler::new(Rc::new(MathHost));
    let descriptors = scheduler.describe_all();

    assert_eq!(descriptors.len(), BUILTIN_COUNT + 3);
    assert!(descriptors.iter().all(|d| d.name != "Math.Broken"));
    assert!(descriptors.iter().all(|d| d.name != "Bad Name"));

    let add = descriptors.iter().find(|d| d.name == "Add").unwrap();
    assert_eq!(add.params.len(), 2);
    let scale = descriptors.iter().find(|d| d.name == "Math.Scale").unwrap();
    assert_eq!(scale.params.len(), 2);
    assert!(scale.params[1].optional);
}

#[test]
fn test_skipped_operations_leave_the_rest_callable() {
    let mut scheduler = ExecutionScheduler::new(Rc::new(MathHost));
    let values = scheduler
        .execute_block("return Math.Scale(4), Math.Scale(4, 3), Math.Broken")
        .unwrap();
    assert_eq!(
        values,
        vec![HostValue::Number(8.0), HostValue::Number(12.0), HostValue::Nil]
    );
}

#[test]
fn test_methods_info_table() {
    let mut scheduler = ExecutionScheduler::new(Rc::new(MathHost));
    let values = scheduler
        .execute_block(
            r#"
            local info = Bridge.MethodsInfoTable["Math.Scale"]
            local factor = info.Arguments[2]
            return info.Name, info.ReturnType, #info.Arguments,
                factor.ArgName, factor.ArgType, factor.IsOptional, factor.DefaultValue,
                info.Arguments[1].DefaultValue
            "#,
        )
        .unwrap();

    assert_eq!(
        values,
        vec![
            HostValue::from("Math.Scale"),
            HostValue::from("Number"),
            HostValue::Int(2),
            HostValue::from("factor"),
            HostValue::from("Number"),
            HostValue::Bool(true),
            HostValue::from("2"),
            HostValue::from("nil"),
        ]
    );
}

#[test]
fn test_methods_info_table_empty_arguments_and_no_self_entry() {
    let mut scheduler = ExecutionScheduler::new(Rc::new(MathHost));
    let values = scheduler
        .execute_block(
            r#"
            local info = Bridge.MethodsInfoTable
            return #info["Math.Pi"].Arguments, info.MethodsInfoTable == nil,
                info.WaitForTicks.Arguments[2].ArgType
            "#,
        )
        .unwrap();
    assert_eq!(
        values,
        vec![
            HostValue::Int(0),
            HostValue::Bool(true),
            HostValue::from("Function")
        ]
    );
}

#[test]
fn test_methods_info_string_lists_operations() {
    let mut scheduler = ExecutionScheduler::new(Rc::new(MathHost));
    let values = scheduler.execute_block("return Bridge.MethodsInfoString").unwrap();
    let listing = values[0].as_str().unwrap().to_string();
    assert!(listing.contains("Add(a: Number, b: Number) -> Number"));
    assert!(listing.contains("Math.Scale(value: Number, factor: Number = 2) -> Number"));
    assert_eq!(listing.lines().count(), BUILTIN_COUNT + 3);
}

#[test]
fn test_reregistration_replaces_metadata_and_binding() {
    let lua = Lua::new();
    let mut registry = standalone_registry();

    assert!(registry.register(
        &lua,
        Operation::new("Bridge.Echo")
            .returns(ValueKind::Int)
            .handler(|_| Ok(HostValue::Int(1))),
    ));
    assert!(registry.register(
        &lua,
        Operation::new("Bridge.Echo")
            .param(ParameterDescriptor::required("value", ValueKind::Int))
            .returns(ValueKind::Int)
            .handler(|args| Ok(HostValue::Int(args.int("value")? * 10))),
    ));

    assert_eq!(registry.describe_all().len(), 1);
    assert_eq!(registry.describe_all()[0].params.len(), 1);

    let value: i64 = lua.load("return Bridge.Echo(4)").eval().unwrap();
    assert_eq!(value, 40);
}

#[test]
fn test_try_register_reports_rejection() {
    let lua = Lua::new();
    let mut registry = standalone_registry();

    let result = registry.try_register(
        &lua,
        Operation::new("Bridge.Op")
            .param(ParameterDescriptor::required("a", ValueKind::Int))
            .param(ParameterDescriptor {
                name: "b".to_string(),
                kind: ValueKind::Int,
                optional: false,
                default: Some(HostValue::Int(1)),
            })
            .handler(|_| Ok(HostValue::Nil)),
    );
    assert!(matches!(
        result,
        Err(RegistrationError::DefaultOnRequired { .. })
    ));
    assert!(registry.describe_all().is_empty());
}

#[test]
fn test_excluded_operations_are_not_recorded() {
    let mut scheduler = ExecutionScheduler::new(Rc::new(MathHost));
    scheduler
        .execute_block("Add(1, 2)\nBridge.Log('hello')\nBridge.GetType(1)\nAdd(1.5, 2)")
        .unwrap();

    let history = scheduler.call_history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].operation, "Add");
    assert_eq!(history[0].argument_types, "integer, integer");
    assert_eq!(history[1].argument_types, "number, integer");
}

#[test]
fn test_method_call_history_builtin() {
    let mut scheduler = ExecutionScheduler::new(Rc::new(MathHost));
    let values = scheduler
        .execute_block(
            "Math.Pi()\nlocal h = Bridge.MethodCallHistory()\nreturn #h, h[1].Operation, h[1].ArgumentTypes, h[2].Operation",
        )
        .unwrap();
    assert_eq!(
        values,
        vec![
            HostValue::Int(2),
            HostValue::from("Pi"),
            HostValue::from("No arguments"),
            HostValue::from("MethodCallHistory"),
        ]
    );
}

#[test]
fn test_history_is_bounded_and_cleared_per_execution() {
    let config = BridgeConfig {
        history_capacity: 3,
        ..BridgeConfig::default()
    };
    let mut scheduler = ExecutionScheduler::with_config(Rc::new(MathHost), config);
    scheduler
        .execute_block("for i = 1, 5 do Add(i, i) end")
        .unwrap();
    assert_eq!(scheduler.call_history().len(), 3);

    scheduler.execute_block("local x = 1").unwrap();
    assert!(scheduler.call_history().is_empty());
}

#[test]
fn test_type_checking_off_converts_structurally() {
    let config = BridgeConfig {
        type_checking: false,
        ..BridgeConfig::default()
    };
    let mut scheduler = ExecutionScheduler::with_config(Rc::new(MathHost), config);
    let values = scheduler
        .execute_block("return Add(2, 3), _TypeChecking, _AutoConvert")
        .unwrap();
    assert_eq!(
        values,
        vec![
            HostValue::Number(5.0),
            HostValue::Bool(false),
            HostValue::Bool(true)
        ]
    );
}

#[test]
fn test_custom_namespace() {
    let config = BridgeConfig {
        namespace: "Turtle".to_string(),
        ..BridgeConfig::default()
    };
    let mut scheduler = ExecutionScheduler::with_config(Rc::new(NoHost), config);
    let values = scheduler
        .execute_block("return Bridge == nil, Turtle.IsValid(Turtle.InvalidCoord)")
        .unwrap();
    assert_eq!(values, vec![HostValue::Bool(true), HostValue::Bool(false)]);
}

#[test]
fn test_handler_errors_never_raise_into_guest() {
    struct Failing;
    impl HostApi for Failing {
        fn operations(&self) -> Vec<Operation> {
            vec![
                Operation::new("Fail").handler(|_| Err(HostOperationError::new("nope"))),
                Operation::new("Panic").handler(|_| panic!("handler panicked")),
            ]
        }
    }

    let mut scheduler = ExecutionScheduler::new(Rc::new(Failing));
    let values = scheduler
        .execute_block("local a = Fail()\nlocal b = Panic()\nreturn a, b, 'done'")
        .unwrap();
    assert_eq!(values, vec![HostValue::Nil, HostValue::Nil, HostValue::from("done")]);

    let error = scheduler.last_error().unwrap();
    assert!(error.message.contains("Fail"));
    assert!(error.message.contains("nope"));
}

#[test]
fn test_methods_info_table_keeps_operations_sharing_a_base_name() {
    struct Rig;
    impl HostApi for Rig {
        fn operations(&self) -> Vec<Operation> {
            vec![
                Operation::new("Turtle.GetPosition")
                    .returns(ValueKind::Coord)
                    .handler(|_| Ok(HostValue::Nil)),
                Operation::new("Camera.GetPosition")
                    .returns(ValueKind::Coord)
                    .handler(|_| Ok(HostValue::Nil)),
                Operation::new("Bridge.GetPosition")
                    .returns(ValueKind::Coord)
                    .handler(|_| Ok(HostValue::Nil)),
            ]
        }
    }

    let mut scheduler = ExecutionScheduler::new(Rc::new(Rig));
    let registered = scheduler.describe_all().len();
    let values = scheduler
        .execute_block(
            r#"
            local count = 0
            for _ in pairs(Bridge.MethodsInfoTable) do count = count + 1 end
            local info = Bridge.MethodsInfoTable
            return count, info["Turtle.GetPosition"].Name,
                info["Camera.GetPosition"].Name, info.GetPosition.Name
            "#,
        )
        .unwrap();

    assert_eq!(registered, BUILTIN_COUNT + 3);
    assert_eq!(
        values,
        vec![
            HostValue::Int(registered as i64),
            HostValue::from("Turtle.GetPosition"),
            HostValue::from("Camera.GetPosition"),
            HostValue::from("GetPosition"),
        ]
    );
}
