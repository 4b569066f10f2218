use std::fmt;
use std::rc::Rc;

use super::error::{HostOperationError, RegistrationError};
use super::marshal::round_to_i64;
use super::value::{Coord, Handle, HostValue, Target, ValueKind};

/// Host-side implementation of a published operation
pub type Handler = Rc<dyn Fn(&Args<'_>) -> Result<HostValue, HostOperationError>>;

/// Metadata for one parameter of a host operation
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDescriptor {
    pub name: String,
    pub kind: ValueKind,
    pub optional: bool,
    /// Value used when the guest omits the argument; `None` means nil
    pub default: Option<HostValue>,
}

impl ParameterDescriptor {
    pub fn required(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
            default: None,
        }
    }

    /// Optional parameter with no default (reference-like, omitted means nil)
    pub fn optional(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: true,
            default: None,
        }
    }

    pub fn with_default(
        name: impl Into<String>,
        kind: ValueKind,
        default: impl Into<HostValue>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: true,
            default: Some(default.into()),
        }
    }

    /// Stringified default; "nil" when there is none
    pub fn default_string(&self) -> String {
        match &self.default {
            Some(value) => value.to_string(),
            None => "nil".to_string(),
        }
    }
}

/// Immutable record of a registered operation
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDescriptor {
    /// Namespace-qualified name, e.g. "Bridge.WaitForTicks"
    pub name: String,
    pub params: Vec<ParameterDescriptor>,
    pub returns: ValueKind,
    pub exclude_from_logging: bool,
}

impl OperationDescriptor {
    /// Last path segment of the qualified name
    pub fn base_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

impl fmt::Display for OperationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", param.name, param.kind)?;
            if param.optional {
                write!(f, " = {}", param.default_string())?;
            }
        }
        write!(f, ") -> {}", self.returns)
    }
}

/// Registration table entry for a host operation
///
/// ```ignore
/// Operation::new("Bridge.Add")
///     .param(ParameterDescriptor::required("a", ValueKind::Number))
///     .param(ParameterDescriptor::required("b", ValueKind::Number))
///     .returns(ValueKind::Number)
///     .handler(|args| Ok(HostValue::Number(args.number("a")? + args.number("b")?)))
/// ```
pub struct Operation {
    descriptor: OperationDescriptor,
    handler: Option<Handler>,
}

impl Operation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            descriptor: OperationDescriptor {
                name: name.into(),
                params: Vec::new(),
                returns: ValueKind::Nil,
                exclude_from_logging: false,
            },
            handler: None,
        }
    }

    pub fn param(mut self, param: ParameterDescriptor) -> Self {
        self.descriptor.params.push(param);
        self
    }

    pub fn returns(mut self, kind: ValueKind) -> Self {
        self.descriptor.returns = kind;
        self
    }

    /// Skip call history and argument snapshots for this operation
    pub fn exclude_from_logging(mut self) -> Self {
        self.descriptor.exclude_from_logging = true;
        self
    }

    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Args<'_>) -> Result<HostValue, HostOperationError> + 'static,
    {
        self.handler = Some(Rc::new(handler));
        self
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Check the signature and split into descriptor and handler
    pub(crate) fn validate(self) -> Result<(OperationDescriptor, Handler), RegistrationError> {
        let Operation {
            descriptor,
            handler,
        } = self;
        let name = descriptor.name.clone();

        if name.is_empty()
            || name
                .split('.')
                .any(|segment| segment.is_empty() || !is_identifier(segment))
        {
            return Err(RegistrationError::InvalidName { name });
        }

        let mut seen_optional = false;
        for (i, param) in descriptor.params.iter().enumerate() {
            if descriptor.params[..i].iter().any(|p| p.name == param.name) {
                return Err(RegistrationError::DuplicateParameter {
                    name,
                    param: param.name.clone(),
                });
            }
            if param.default.is_some() && !param.optional {
                return Err(RegistrationError::DefaultOnRequired {
                    name,
                    param: param.name.clone(),
                });
            }
            if param.optional {
                seen_optional = true;
            } else if seen_optional {
                return Err(RegistrationError::RequiredAfterOptional {
                    name,
                    param: param.name.clone(),
                });
            }
        }

        let handler = handler.ok_or(RegistrationError::MissingCallable { name })?;
        Ok((descriptor, handler))
    }
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Arguments after marshalling, aligned with the operation's parameters
pub struct Args<'a> {
    params: &'a [ParameterDescriptor],
    values: Vec<HostValue>,
    nil: HostValue,
}

impl<'a> Args<'a> {
    pub fn new(params: &'a [ParameterDescriptor], values: Vec<HostValue>) -> Self {
        Self {
            params,
            values,
            nil: HostValue::Nil,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of a named parameter; nil when the name is unknown
    pub fn get(&self, name: &str) -> &HostValue {
        self.params
            .iter()
            .position(|p| p.name == name)
            .and_then(|i| self.values.get(i))
            .unwrap_or(&self.nil)
    }

    pub fn bool(&self, name: &str) -> Result<bool, HostOperationError> {
        match self.get(name) {
            HostValue::Bool(b) => Ok(*b),
            other => Err(self.mismatch(name, ValueKind::Bool, other)),
        }
    }

    pub fn int(&self, name: &str) -> Result<i64, HostOperationError> {
        match self.get(name) {
            HostValue::Int(i) => Ok(*i),
            HostValue::Number(n) => Ok(round_to_i64(*n)?),
            other => Err(self.mismatch(name, ValueKind::Int, other)),
        }
    }

    pub fn number(&self, name: &str) -> Result<f64, HostOperationError> {
        self.get(name)
            .as_f64()
            .ok_or_else(|| self.mismatch(name, ValueKind::Number, self.get(name)))
    }

    pub fn string(&self, name: &str) -> Result<&str, HostOperationError> {
        self.get(name)
            .as_str()
            .ok_or_else(|| self.mismatch(name, ValueKind::String, self.get(name)))
    }

    pub fn coord(&self, name: &str) -> Result<Coord, HostOperationError> {
        match self.get(name) {
            HostValue::Coord(coord) => Ok(*coord),
            HostValue::Target(Target::Cell(coord)) => Ok(*coord),
            other => Err(self.mismatch(name, ValueKind::Coord, other)),
        }
    }

    pub fn target(&self, name: &str) -> Result<Target, HostOperationError> {
        match self.get(name) {
            HostValue::Target(target) => Ok(target.clone()),
            HostValue::Coord(coord) => Ok(Target::Cell(*coord)),
            HostValue::Handle(handle) => Ok(Target::Entity(handle.clone())),
            HostValue::Nil => Ok(Target::Invalid),
            other => Err(self.mismatch(name, ValueKind::Target, other)),
        }
    }

    /// Handle argument; `None` when the guest passed nil
    pub fn handle(&self, name: &str) -> Result<Option<&Handle>, HostOperationError> {
        match self.get(name) {
            HostValue::Handle(handle) => Ok(Some(handle)),
            HostValue::Nil => Ok(None),
            other => Err(self.mismatch(name, ValueKind::Handle(None), other)),
        }
    }

    pub fn callback(&self, name: &str) -> Result<&mlua::Function, HostOperationError> {
        match self.get(name) {
            HostValue::Callback(function) => Ok(function),
            other => Err(self.mismatch(name, ValueKind::Callback, other)),
        }
    }

    fn mismatch(&self, name: &str, expected: ValueKind, found: &HostValue) -> HostOperationError {
        HostOperationError::invalid_argument(name, expected, found.type_name())
    }
}
