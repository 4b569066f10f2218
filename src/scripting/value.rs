use std::collections::BTreeMap;
use std::fmt;

use mlua::{AnyUserData, MetaMethod, UserData, UserDataMethods};

/// Kind tag used by parameter and return descriptors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Accept whatever the guest passes, converted structurally
    Any,
    /// No value (used for operations returning nothing)
    Nil,
    Bool,
    Int,
    Number,
    String,
    /// 3-component integer coordinate
    Coord,
    /// A cell coordinate or an entity handle
    Target,
    /// Opaque host object, optionally of a specific kind
    Handle(Option<&'static str>),
    /// Guest function passed back to the host for later invocation
    Callback,
    List,
    Record,
}

impl ValueKind {
    /// Value handed to the host when a guest argument could not be converted
    pub fn sentinel(&self) -> HostValue {
        match self {
            ValueKind::Coord => HostValue::Coord(Coord::INVALID),
            ValueKind::Target => HostValue::Target(Target::Invalid),
            _ => HostValue::Nil,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Any => write!(f, "Any"),
            ValueKind::Nil => write!(f, "Void"),
            ValueKind::Bool => write!(f, "Boolean"),
            ValueKind::Int => write!(f, "Int32"),
            ValueKind::Number => write!(f, "Number"),
            ValueKind::String => write!(f, "String"),
            ValueKind::Coord => write!(f, "Coord"),
            ValueKind::Target => write!(f, "Target"),
            ValueKind::Handle(Some(kind)) => write!(f, "{}", kind),
            ValueKind::Handle(None) => write!(f, "Handle"),
            ValueKind::Callback => write!(f, "Function"),
            ValueKind::List => write!(f, "List"),
            ValueKind::Record => write!(f, "Table"),
        }
    }
}

/// Integer grid coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Coord {
    /// Marker for "no position"; all axes far outside any real grid
    pub const INVALID: Coord = Coord {
        x: -1000,
        y: -1000,
        z: -1000,
    };

    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Opaque reference to a host object (entity, job, zone, ...)
///
/// Guest code receives these as userdata that can be compared and printed
/// but not constructed or inspected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle {
    pub kind: String,
    pub id: u64,
}

impl Handle {
    pub fn new(kind: impl Into<String>, id: u64) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

impl UserData for Handle {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.to_string()));
        methods.add_meta_method(MetaMethod::Eq, |_, this, other: AnyUserData| {
            Ok(other
                .borrow::<Handle>()
                .map(|other| *other == *this)
                .unwrap_or(false))
        });
    }
}

/// Where a job or action should be aimed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Cell(Coord),
    Entity(Handle),
    Invalid,
}

impl Target {
    pub fn is_valid(&self) -> bool {
        match self {
            Target::Cell(coord) => coord.is_valid(),
            Target::Entity(_) => true,
            Target::Invalid => false,
        }
    }
}

/// A value on the host side of the bridge
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Nil,
    Bool(bool),
    Int(i64),
    Number(f64),
    Str(String),
    Coord(Coord),
    Target(Target),
    Handle(Handle),
    Callback(mlua::Function),
    List(Vec<HostValue>),
    Record(BTreeMap<String, HostValue>),
}

impl HostValue {
    /// Short type label used in call history summaries
    pub fn type_name(&self) -> &str {
        match self {
            HostValue::Nil => "nil",
            HostValue::Bool(_) => "Boolean",
            HostValue::Int(_) => "Int64",
            HostValue::Number(_) => "Double",
            HostValue::Str(_) => "String",
            HostValue::Coord(_) => "Coord",
            HostValue::Target(_) => "Target",
            HostValue::Handle(handle) => &handle.kind,
            HostValue::Callback(_) => "Function",
            HostValue::List(_) => "List",
            HostValue::Record(_) => "Table",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, HostValue::Nil)
    }

    /// Validity as seen by guest `IsValid`: invalid sentinels and nil are false
    pub fn is_valid(&self) -> bool {
        match self {
            HostValue::Nil => false,
            HostValue::Coord(coord) => coord.is_valid(),
            HostValue::Target(target) => target.is_valid(),
            _ => true,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::Int(i) => Some(*i as f64),
            HostValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        HostValue::Bool(value)
    }
}

impl From<i64> for HostValue {
    fn from(value: i64) -> Self {
        HostValue::Int(value)
    }
}

impl From<i32> for HostValue {
    fn from(value: i32) -> Self {
        HostValue::Int(value as i64)
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        HostValue::Number(value)
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        HostValue::Str(value.to_string())
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        HostValue::Str(value)
    }
}

impl From<Coord> for HostValue {
    fn from(value: Coord) -> Self {
        HostValue::Coord(value)
    }
}

impl From<Target> for HostValue {
    fn from(value: Target) -> Self {
        HostValue::Target(value)
    }
}

impl From<Handle> for HostValue {
    fn from(value: Handle) -> Self {
        HostValue::Handle(value)
    }
}

impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(HostValue::Nil)
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Nil => write!(f, "nil"),
            HostValue::Bool(b) => write!(f, "{}", b),
            HostValue::Int(i) => write!(f, "{}", i),
            HostValue::Number(n) => write!(f, "{}", n),
            HostValue::Str(s) => write!(f, "{}", s),
            HostValue::Coord(c) => write!(f, "{}", c),
            HostValue::Target(Target::Cell(c)) => write!(f, "Target{}", c),
            HostValue::Target(Target::Entity(h)) => write!(f, "Target({})", h),
            HostValue::Target(Target::Invalid) => write!(f, "Target(invalid)"),
            HostValue::Handle(h) => write!(f, "{}", h),
            HostValue::Callback(_) => write!(f, "<function>"),
            HostValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            HostValue::Record(fields) => {
                write!(f, "{{")?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", key, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}
