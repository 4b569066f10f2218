//! Conversion of values crossing the host/guest boundary
//!
//! Host to guest is infallible apart from Lua allocation failures. Guest to
//! host is best-effort: the caller gets a [`MarshalError`] it can turn into
//! a warning plus [`ValueKind::sentinel`], so a malformed argument never
//! aborts the surrounding script.

use std::collections::BTreeMap;
use std::rc::Rc;

use mlua::{Lua, Table, Value};
use tracing::{debug, warn};

use super::error::MarshalError;
use super::host::HostApi;
use super::value::{Coord, Handle, HostValue, Target, ValueKind};
use crate::config::BridgeConfig;

/// Nested guest tables deeper than this are rejected (guards against cycles)
const MAX_TABLE_DEPTH: usize = 32;

/// Conversion toggles, taken from [`BridgeConfig`] at environment build time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarshalOptions {
    /// Accept numeric strings for numbers and "x,y,z" strings for coordinates
    pub auto_convert: bool,
    /// Debug-log every guest to host conversion
    pub log_conversions: bool,
    /// Warn when a handle of one kind is passed where another is declared
    pub warn_on_kind_mismatch: bool,
}

impl Default for MarshalOptions {
    fn default() -> Self {
        Self {
            auto_convert: true,
            log_conversions: false,
            warn_on_kind_mismatch: true,
        }
    }
}

impl From<&BridgeConfig> for MarshalOptions {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            auto_convert: config.auto_convert,
            log_conversions: config.log_conversions,
            warn_on_kind_mismatch: config.warn_on_kind_mismatch,
        }
    }
}

pub struct Marshaller {
    options: MarshalOptions,
    host: Option<Rc<dyn HostApi>>,
}

impl Marshaller {
    pub fn new(options: MarshalOptions) -> Self {
        Self {
            options,
            host: None,
        }
    }

    /// Attach the host used to construct entities named by strings
    pub fn with_host(mut self, host: Rc<dyn HostApi>) -> Self {
        self.host = Some(host);
        self
    }

    /// Convert a host value into a guest value
    pub fn to_guest(&self, lua: &Lua, value: &HostValue) -> mlua::Result<Value> {
        Ok(match value {
            HostValue::Nil => Value::Nil,
            HostValue::Bool(b) => Value::Boolean(*b),
            HostValue::Int(i) => Value::Integer(*i),
            HostValue::Number(n) => Value::Number(*n),
            HostValue::Str(s) => Value::String(lua.create_string(s)?),
            HostValue::Coord(coord) => Value::Table(coord_table(lua, coord)?),
            HostValue::Target(Target::Cell(coord)) => Value::Table(coord_table(lua, coord)?),
            HostValue::Target(Target::Entity(handle)) | HostValue::Handle(handle) => {
                Value::UserData(lua.create_userdata(handle.clone())?)
            }
            HostValue::Target(Target::Invalid) => Value::Nil,
            HostValue::Callback(function) => Value::Function(function.clone()),
            HostValue::List(items) => {
                let table = lua.create_table_with_capacity(items.len(), 0)?;
                for (i, item) in items.iter().enumerate() {
                    table.raw_set(i + 1, self.to_guest(lua, item)?)?;
                }
                Value::Table(table)
            }
            HostValue::Record(fields) => {
                let table = lua.create_table_with_capacity(0, fields.len())?;
                for (key, item) in fields {
                    table.raw_set(key.as_str(), self.to_guest(lua, item)?)?;
                }
                Value::Table(table)
            }
        })
    }

    /// Convert a guest value into the host shape `kind` describes
    pub fn to_host(&self, value: &Value, kind: ValueKind) -> Result<HostValue, MarshalError> {
        let converted = match kind {
            ValueKind::Any => self.any_to_host(value, 0)?,
            ValueKind::Nil => HostValue::Nil,
            ValueKind::Bool => HostValue::Bool(self.bool_to_host(value)?),
            ValueKind::Int => HostValue::Int(self.int_to_host(value)?),
            ValueKind::Number => HostValue::Number(self.number_to_host(value)?),
            ValueKind::String => HostValue::Str(self.string_to_host(value)?),
            ValueKind::Coord => HostValue::Coord(self.coord_to_host(value)?),
            ValueKind::Target => HostValue::Target(self.target_to_host(value)?),
            ValueKind::Handle(expected) => self.handle_to_host(value, expected)?,
            ValueKind::Callback => match value {
                Value::Function(function) => HostValue::Callback(function.clone()),
                other => return Err(unsupported(kind, other)),
            },
            ValueKind::List => match value {
                Value::Table(table) => self.list_to_host(table, 0)?,
                other => return Err(unsupported(kind, other)),
            },
            ValueKind::Record => match value {
                Value::Table(table) => self.record_to_host(table, 0)?,
                other => return Err(unsupported(kind, other)),
            },
        };

        if self.options.log_conversions {
            debug!(
                target: "scripting",
                "Converted guest {} to {} as {}",
                value.type_name(),
                converted.type_name(),
                kind
            );
        }

        Ok(converted)
    }

    fn bool_to_host(&self, value: &Value) -> Result<bool, MarshalError> {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::Nil if self.options.auto_convert => Ok(false),
            other => Err(unsupported(ValueKind::Bool, other)),
        }
    }

    fn int_to_host(&self, value: &Value) -> Result<i64, MarshalError> {
        match value {
            Value::Integer(i) => Ok(*i),
            Value::Number(n) => round_to_i64(*n),
            Value::String(s) if self.options.auto_convert => {
                let text = s.to_string_lossy();
                text.trim()
                    .parse::<f64>()
                    .map_err(|_| unsupported(ValueKind::Int, value))
                    .and_then(round_to_i64)
            }
            other => Err(unsupported(ValueKind::Int, other)),
        }
    }

    fn number_to_host(&self, value: &Value) -> Result<f64, MarshalError> {
        match value {
            Value::Integer(i) => Ok(*i as f64),
            Value::Number(n) => Ok(*n),
            Value::String(s) if self.options.auto_convert => s
                .to_string_lossy()
                .trim()
                .parse::<f64>()
                .map_err(|_| unsupported(ValueKind::Number, value)),
            other => Err(unsupported(ValueKind::Number, other)),
        }
    }

    fn string_to_host(&self, value: &Value) -> Result<String, MarshalError> {
        match value {
            Value::String(s) => Ok(s.to_string_lossy()),
            Value::Integer(i) if self.options.auto_convert => Ok(i.to_string()),
            Value::Number(n) if self.options.auto_convert => Ok(n.to_string()),
            Value::Boolean(b) if self.options.auto_convert => Ok(b.to_string()),
            other => Err(unsupported(ValueKind::String, other)),
        }
    }

    fn coord_to_host(&self, value: &Value) -> Result<Coord, MarshalError> {
        match value {
            Value::Nil => {
                warn!(target: "scripting", "Received nil where a coordinate was expected");
                Ok(Coord::INVALID)
            }
            Value::Table(table) => self
                .coord_from_table(table)?
                .ok_or_else(|| unsupported(ValueKind::Coord, value)),
            Value::String(s) if self.options.auto_convert => {
                parse_coord(&s.to_string_lossy()).ok_or_else(|| unsupported(ValueKind::Coord, value))
            }
            other => Err(unsupported(ValueKind::Coord, other)),
        }
    }

    /// Field-keyed, positional, then two-component shapes; `None` if none match
    fn coord_from_table(&self, table: &Table) -> Result<Option<Coord>, MarshalError> {
        let x = field(table, "x");
        let y = field(table, "y");
        let z = field(table, "z");
        if !x.is_nil() && !y.is_nil() && !z.is_nil() {
            return Ok(Some(Coord::new(
                self.axis(&x)?,
                self.axis(&y)?,
                self.axis(&z)?,
            )));
        }

        let a = index(table, 1);
        let b = index(table, 2);
        let c = index(table, 3);
        if !a.is_nil() && !b.is_nil() && !c.is_nil() {
            return Ok(Some(Coord::new(
                self.axis(&a)?,
                self.axis(&b)?,
                self.axis(&c)?,
            )));
        }

        // Planar shorthand: the vertical axis defaults to 0
        if !a.is_nil() && !b.is_nil() {
            return Ok(Some(Coord::new(self.axis(&a)?, 0, self.axis(&b)?)));
        }
        if !x.is_nil() && !z.is_nil() {
            return Ok(Some(Coord::new(self.axis(&x)?, 0, self.axis(&z)?)));
        }

        Ok(None)
    }

    fn axis(&self, value: &Value) -> Result<i32, MarshalError> {
        let wide = self.int_to_host(value)?;
        i32::try_from(wide).map_err(|_| MarshalError::OutOfRange {
            expected: ValueKind::Coord,
            value: wide as f64,
        })
    }

    fn target_to_host(&self, value: &Value) -> Result<Target, MarshalError> {
        match value {
            Value::Nil => {
                warn!(target: "scripting", "Received nil where a target was expected");
                Ok(Target::Invalid)
            }
            Value::UserData(userdata) => userdata
                .borrow::<Handle>()
                .map(|handle| Target::Entity(handle.clone()))
                .map_err(|_| unsupported(ValueKind::Target, value)),
            Value::Table(table) => {
                if let Some(coord) = self.coord_from_table(table)? {
                    return Ok(Target::Cell(coord));
                }
                if let Value::UserData(userdata) = field(table, "Entity") {
                    if let Ok(handle) = userdata.borrow::<Handle>() {
                        return Ok(Target::Entity(handle.clone()));
                    }
                }
                if let Value::Table(cell) = field(table, "Cell") {
                    if let Some(coord) = self.coord_from_table(&cell)? {
                        return Ok(Target::Cell(coord));
                    }
                }
                Err(unsupported(ValueKind::Target, value))
            }
            Value::String(s) => {
                let name = s.to_string_lossy();
                self.host
                    .as_ref()
                    .and_then(|host| host.construct_entity(&name))
                    .map(Target::Entity)
                    .ok_or_else(|| MarshalError::UnsupportedShape {
                        expected: ValueKind::Target,
                        found: format!("string '{}' (no constructible entity type)", name),
                    })
            }
            other => Err(unsupported(ValueKind::Target, other)),
        }
    }

    fn handle_to_host(
        &self,
        value: &Value,
        expected: Option<&'static str>,
    ) -> Result<HostValue, MarshalError> {
        let kind = ValueKind::Handle(expected);
        match value {
            Value::Nil => Ok(HostValue::Nil),
            Value::UserData(userdata) => {
                let handle = userdata
                    .borrow::<Handle>()
                    .map(|handle| handle.clone())
                    .map_err(|_| unsupported(kind, value))?;
                if let Some(expected) = expected {
                    if handle.kind != expected && self.options.warn_on_kind_mismatch {
                        warn!(
                            target: "scripting",
                            "Expected a {} handle but received {}",
                            expected,
                            handle
                        );
                    }
                }
                Ok(HostValue::Handle(handle))
            }
            other => Err(unsupported(kind, other)),
        }
    }

    fn any_to_host(&self, value: &Value, depth: usize) -> Result<HostValue, MarshalError> {
        match value {
            Value::Nil => Ok(HostValue::Nil),
            Value::Boolean(b) => Ok(HostValue::Bool(*b)),
            Value::Integer(i) => Ok(HostValue::Int(*i)),
            Value::Number(n) => Ok(HostValue::Number(*n)),
            Value::String(s) => Ok(HostValue::Str(s.to_string_lossy())),
            Value::Function(function) => Ok(HostValue::Callback(function.clone())),
            Value::UserData(userdata) => userdata
                .borrow::<Handle>()
                .map(|handle| HostValue::Handle(handle.clone()))
                .map_err(|_| unsupported(ValueKind::Any, value)),
            Value::Table(table) => {
                if is_sequence(table) {
                    self.list_to_host(table, depth)
                } else {
                    self.record_to_host(table, depth)
                }
            }
            other => Err(unsupported(ValueKind::Any, other)),
        }
    }

    fn list_to_host(&self, table: &Table, depth: usize) -> Result<HostValue, MarshalError> {
        if depth >= MAX_TABLE_DEPTH {
            return Err(too_deep(ValueKind::List));
        }
        let mut items = Vec::with_capacity(table.raw_len());
        for item in table.clone().sequence_values::<Value>() {
            let item = item.map_err(|e| MarshalError::UnsupportedShape {
                expected: ValueKind::List,
                found: e.to_string(),
            })?;
            items.push(self.any_to_host(&item, depth + 1)?);
        }
        Ok(HostValue::List(items))
    }

    fn record_to_host(&self, table: &Table, depth: usize) -> Result<HostValue, MarshalError> {
        if depth >= MAX_TABLE_DEPTH {
            return Err(too_deep(ValueKind::Record));
        }
        let mut fields = BTreeMap::new();
        for pair in table.clone().pairs::<Value, Value>() {
            let (key, item) = pair.map_err(|e| MarshalError::UnsupportedShape {
                expected: ValueKind::Record,
                found: e.to_string(),
            })?;
            let key = match &key {
                Value::String(s) => s.to_string_lossy(),
                Value::Integer(i) => i.to_string(),
                Value::Number(n) => n.to_string(),
                Value::Boolean(b) => b.to_string(),
                other => return Err(unsupported(ValueKind::Record, other)),
            };
            fields.insert(key, self.any_to_host(&item, depth + 1)?);
        }
        Ok(HostValue::Record(fields))
    }
}

/// Round a guest float to the nearest integer (half away from zero)
pub fn round_to_i64(value: f64) -> Result<i64, MarshalError> {
    let rounded = value.round();
    if !rounded.is_finite() || rounded < i64::MIN as f64 || rounded >= i64::MAX as f64 {
        return Err(MarshalError::OutOfRange {
            expected: ValueKind::Int,
            value,
        });
    }
    Ok(rounded as i64)
}

/// Parse "x,y,z" (whitespace tolerant) into a coordinate
pub fn parse_coord(text: &str) -> Option<Coord> {
    let parts: Vec<&str> = text.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return None;
    }
    let x = parts[0].parse().ok()?;
    let y = parts[1].parse().ok()?;
    let z = parts[2].parse().ok()?;
    Some(Coord::new(x, y, z))
}

fn coord_table(lua: &Lua, coord: &Coord) -> mlua::Result<Table> {
    let table = lua.create_table_with_capacity(0, 3)?;
    table.raw_set("x", coord.x)?;
    table.raw_set("y", coord.y)?;
    table.raw_set("z", coord.z)?;
    Ok(table)
}

fn field(table: &Table, key: &str) -> Value {
    table.get::<Value>(key).unwrap_or(Value::Nil)
}

fn index(table: &Table, i: i64) -> Value {
    table.get::<Value>(i).unwrap_or(Value::Nil)
}

/// Empty tables count as (empty) sequences
fn is_sequence(table: &Table) -> bool {
    let entries = table.clone().pairs::<Value, Value>().count();
    entries == table.raw_len()
}

fn unsupported(expected: ValueKind, value: &Value) -> MarshalError {
    MarshalError::UnsupportedShape {
        expected,
        found: value.type_name().to_string(),
    }
}

fn too_deep(expected: ValueKind) -> MarshalError {
    MarshalError::UnsupportedShape {
        expected,
        found: format!("table nested deeper than {}", MAX_TABLE_DEPTH),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to_nearest() {
        assert_eq!(round_to_i64(2.4), Ok(2));
        assert_eq!(round_to_i64(2.5), Ok(3));
        assert_eq!(round_to_i64(-2.5), Ok(-3));
        assert!(round_to_i64(f64::NAN).is_err());
        assert!(round_to_i64(f64::INFINITY).is_err());
    }

    #[test]
    fn test_parse_coord() {
        assert_eq!(parse_coord("1, 2,3"), Some(Coord::new(1, 2, 3)));
        assert_eq!(parse_coord("1,2"), None);
        assert_eq!(parse_coord("a,b,c"), None);
    }
}
