use std::rc::Rc;

use mlua::{Lua, Value};
use tickbridge::scripting::{
    Coord, Handle, HostApi, HostValue, MarshalError, MarshalOptions, Marshaller, Operation,
    Target, ValueKind,
};

fn eval(lua: &Lua, source: &str) -> Value {
    lua.load(source).eval::<Value>().unwrap()
}

fn marshaller() -> Marshaller {
    Marshaller::new(MarshalOptions::default())
}

struct MarkerHost;

impl HostApi for MarkerHost {
    fn operations(&self) -> Vec<Operation> {
        Vec::new()
    }

    fn construct_entity(&self, type_name: &str) -> Option<Handle> {
        (type_name == "Marker").then(|| Handle::new("Marker", 99))
    }
}

#[test]
fn test_coordinate_round_trip() {
    let lua = Lua::new();
    let m = marshaller();

    for coord in [
        Coord::new(0, 0, 0),
        Coord::new(12, -3, 250),
        Coord::new(i32::MIN, i32::MAX, 1),
        Coord::INVALID,
    ] {
        let guest = m.to_guest(&lua, &HostValue::Coord(coord)).unwrap();
        assert_eq!(m.to_host(&guest, ValueKind::Coord), Ok(HostValue::Coord(coord)));
    }
}

#[test]
fn test_coordinate_shapes() {
    let lua = Lua::new();
    let m = marshaller();
    let coord = |source: &str| m.to_host(&eval(&lua, source), ValueKind::Coord);

    assert_eq!(coord("return {x = 1, y = 2, z = 3}"), Ok(HostValue::Coord(Coord::new(1, 2, 3))));
    assert_eq!(coord("return {4, 5, 6}"), Ok(HostValue::Coord(Coord::new(4, 5, 6))));
    assert_eq!(coord("return {7, 8}"), Ok(HostValue::Coord(Coord::new(7, 0, 8))));
    assert_eq!(coord("return {x = 1, z = 9}"), Ok(HostValue::Coord(Coord::new(1, 0, 9))));
    assert_eq!(coord("return '10, 11, 12'"), Ok(HostValue::Coord(Coord::new(10, 11, 12))));
    assert_eq!(coord("return {x = 1.6, y = -2.5, z = '3'}"), Ok(HostValue::Coord(Coord::new(2, -3, 3))));
}

#[test]
fn test_nil_coordinate_is_invalid_sentinel() {
    assert_eq!(
        marshaller().to_host(&Value::Nil, ValueKind::Coord),
        Ok(HostValue::Coord(Coord::INVALID))
    );
    assert_eq!(
        marshaller().to_host(&Value::Nil, ValueKind::Target),
        Ok(HostValue::Target(Target::Invalid))
    );
}

#[test]
fn test_unsupported_shapes() {
    let lua = Lua::new();
    let m = marshaller();

    assert!(matches!(
        m.to_host(&Value::Boolean(true), ValueKind::Coord),
        Err(MarshalError::UnsupportedShape { .. })
    ));
    assert!(matches!(
        m.to_host(&eval(&lua, "return {y = 1}"), ValueKind::Coord),
        Err(MarshalError::UnsupportedShape { .. })
    ));
    assert!(matches!(
        m.to_host(&eval(&lua, "return {1e12, 0, 0}"), ValueKind::Coord),
        Err(MarshalError::OutOfRange { .. })
    ));
    assert!(matches!(
        m.to_host(&Value::Number(f64::NAN), ValueKind::Int),
        Err(MarshalError::OutOfRange { .. })
    ));
}

#[test]
fn test_auto_convert_toggle() {
    let lua = Lua::new();
    let strict = Marshaller::new(MarshalOptions {
        auto_convert: false,
        ..MarshalOptions::default()
    });
    let text = eval(&lua, "return '42'");

    assert_eq!(marshaller().to_host(&text, ValueKind::Number), Ok(HostValue::Number(42.0)));
    assert!(strict.to_host(&text, ValueKind::Number).is_err());
    assert!(strict
        .to_host(&eval(&lua, "return '1,2,3'"), ValueKind::Coord)
        .is_err());
}

#[test]
fn test_int_rounds_to_nearest() {
    let m = marshaller();
    assert_eq!(m.to_host(&Value::Number(2.5), ValueKind::Int), Ok(HostValue::Int(3)));
    assert_eq!(m.to_host(&Value::Number(-1.4), ValueKind::Int), Ok(HostValue::Int(-1)));
    assert_eq!(m.to_host(&Value::Integer(7), ValueKind::Int), Ok(HostValue::Int(7)));
}

#[test]
fn test_handles_are_opaque_userdata() {
    let lua = Lua::new();
    let m = marshaller();
    let handle = Handle::new("Pawn", 3);

    let guest = m.to_guest(&lua, &HostValue::Handle(handle.clone())).unwrap();
    assert!(matches!(guest, Value::UserData(_)));
    assert_eq!(m.to_host(&guest, ValueKind::Handle(Some("Pawn"))), Ok(HostValue::Handle(handle.clone())));
    // A different declared kind still converts (with a warning)
    assert_eq!(m.to_host(&guest, ValueKind::Handle(Some("Job"))), Ok(HostValue::Handle(handle.clone())));

    lua.globals().set("a", guest).unwrap();
    lua.globals()
        .set("b", m.to_guest(&lua, &HostValue::Handle(handle)).unwrap())
        .unwrap();
    let results: (bool, String) = lua.load("return a == b, tostring(a)").eval().unwrap();
    assert_eq!(results, (true, "Pawn#3".to_string()));
}

#[test]
fn test_target_shapes() {
    let lua = Lua::new();
    let m = marshaller().with_host(Rc::new(MarkerHost));
    let pawn = Handle::new("Pawn", 1);
    lua.globals()
        .set("pawn", m.to_guest(&lua, &HostValue::Handle(pawn.clone())).unwrap())
        .unwrap();
    let target = |source: &str| m.to_host(&eval(&lua, source), ValueKind::Target);

    assert_eq!(target("return pawn"), Ok(HostValue::Target(Target::Entity(pawn.clone()))));
    assert_eq!(target("return {Entity = pawn}"), Ok(HostValue::Target(Target::Entity(pawn))));
    assert_eq!(
        target("return {Cell = {1, 2, 3}}"),
        Ok(HostValue::Target(Target::Cell(Coord::new(1, 2, 3))))
    );
    assert_eq!(target("return {5, 6}"), Ok(HostValue::Target(Target::Cell(Coord::new(5, 0, 6)))));
    assert_eq!(
        target("return 'Marker'"),
        Ok(HostValue::Target(Target::Entity(Handle::new("Marker", 99))))
    );
    assert!(target("return 'Dragon'").is_err());
}

#[test]
fn test_invalid_target_becomes_nil_in_guest() {
    let lua = Lua::new();
    let guest = marshaller()
        .to_guest(&lua, &HostValue::Target(Target::Invalid))
        .unwrap();
    assert!(guest.is_nil());
}

#[test]
fn test_structural_conversion() {
    let lua = Lua::new();
    let m = marshaller();

    let list = m
        .to_host(&eval(&lua, "return {1, 'two', {3}}"), ValueKind::Any)
        .unwrap();
    assert_eq!(
        list,
        HostValue::List(vec![
            HostValue::Int(1),
            HostValue::from("two"),
            HostValue::List(vec![HostValue::Int(3)]),
        ])
    );

    let record = m
        .to_host(&eval(&lua, "return {name = 'turtle', speed = 1.5}"), ValueKind::Record)
        .unwrap();
    match record {
        HostValue::Record(fields) => {
            assert_eq!(fields.get("name"), Some(&HostValue::from("turtle")));
            assert_eq!(fields.get("speed"), Some(&HostValue::Number(1.5)));
        }
        other => panic!("expected a record, got {}", other),
    }

    // Self-referencing tables stop at the depth limit instead of recursing forever
    let cyclic = eval(&lua, "local t = {}; t.self = t; return t");
    assert!(m.to_host(&cyclic, ValueKind::Any).is_err());
}
