//! Parameter typing for dispatch.
//!
//! Every argument arrives as a `serde_json::Value`; its runtime kind decides
//! which declared parameter types it can fill. Primitive parameter types
//! refuse `null` and accept only the value kind they wrap: a JSON integer is
//! a `Long`, so it fills `long`/`Long`/`Object` but never `int`.

use serde_json::{Map, Value};

/// Runtime kind of an argument value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Long,
    Double,
    /// Integer outside the signed 64-bit range.
    BigNumber,
    Boolean,
    String,
    List,
    Map,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Boolean,
            Value::Number(n) if n.is_i64() => ValueKind::Long,
            Value::Number(n) if n.is_f64() => ValueKind::Double,
            Value::Number(_) => ValueKind::BigNumber,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::List,
            Value::Object(_) => ValueKind::Map,
        }
    }
}

/// Declared type of one handler parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
    // Primitives: never null
    Long,
    Int,
    Double,
    Boolean,
    // References: nullable
    LongObj,
    IntObj,
    DoubleObj,
    BooleanObj,
    Str,
    List,
    Map,
    Any,
}

impl ParamType {
    pub const fn is_primitive(self) -> bool {
        matches!(
            self,
            ParamType::Long | ParamType::Int | ParamType::Double | ParamType::Boolean
        )
    }

    /// Wrapper type of a primitive; reference types map to themselves.
    pub const fn boxed(self) -> Self {
        match self {
            ParamType::Long => ParamType::LongObj,
            ParamType::Int => ParamType::IntObj,
            ParamType::Double => ParamType::DoubleObj,
            ParamType::Boolean => ParamType::BooleanObj,
            other => other,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ParamType::Long => "long",
            ParamType::Int => "int",
            ParamType::Double => "double",
            ParamType::Boolean => "boolean",
            ParamType::LongObj => "Long",
            ParamType::IntObj => "Integer",
            ParamType::DoubleObj => "Double",
            ParamType::BooleanObj => "Boolean",
            ParamType::Str => "String",
            ParamType::List => "List",
            ParamType::Map => "Map",
            ParamType::Any => "Object",
        }
    }

    /// Whether a non-null value of `kind` is an instance of this type.
    fn is_instance(self, kind: ValueKind) -> bool {
        match self {
            ParamType::Any => kind != ValueKind::Null,
            ParamType::LongObj => kind == ValueKind::Long,
            ParamType::DoubleObj => kind == ValueKind::Double,
            ParamType::BooleanObj => kind == ValueKind::Boolean,
            ParamType::Str => kind == ValueKind::String,
            ParamType::List => kind == ValueKind::List,
            ParamType::Map => kind == ValueKind::Map,
            // No JSON value materializes as a 32-bit integer or a raw primitive.
            ParamType::IntObj
            | ParamType::Long
            | ParamType::Int
            | ParamType::Double
            | ParamType::Boolean => false,
        }
    }

    /// Whether `value` can fill a parameter of this type.
    pub fn accepts(self, value: &Value) -> bool {
        let kind = ValueKind::of(value);
        if kind == ValueKind::Null {
            return !self.is_primitive();
        }
        if self.is_instance(kind) {
            return true;
        }
        self.is_primitive() && self.boxed().is_instance(kind)
    }

    /// Re-cast `value` for this parameter type, or `None` if it cannot fill it.
    pub fn coerce(self, value: &Value) -> Option<Value> {
        if self.accepts(value) {
            Some(value.clone())
        } else {
            None
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Pairwise compatibility of an argument list with a signature.
pub fn are_compatible(args: &[Value], types: &[ParamType]) -> bool {
    args.len() == types.len() && args.iter().zip(types).all(|(arg, ty)| ty.accepts(arg))
}

/// Coerce every argument to its declared type; fails on the first mismatch.
pub fn coerce_all(args: &[Value], types: &[ParamType]) -> Option<Vec<Value>> {
    if args.len() != types.len() {
        return None;
    }
    args.iter().zip(types).map(|(arg, ty)| ty.coerce(arg)).collect()
}

/// Conversion from a coerced argument into a typed handler parameter.
pub trait FromParam: Sized {
    /// Declared parameter type used for resolution.
    const TYPE: ParamType;

    fn from_param(value: Value) -> Option<Self>;
}

impl FromParam for i64 {
    const TYPE: ParamType = ParamType::Long;

    fn from_param(value: Value) -> Option<Self> {
        value.as_i64()
    }
}

impl FromParam for i32 {
    const TYPE: ParamType = ParamType::Int;

    fn from_param(value: Value) -> Option<Self> {
        value.as_i64().and_then(|v| i32::try_from(v).ok())
    }
}

impl FromParam for f64 {
    const TYPE: ParamType = ParamType::Double;

    fn from_param(value: Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FromParam for bool {
    const TYPE: ParamType = ParamType::Boolean;

    fn from_param(value: Value) -> Option<Self> {
        value.as_bool()
    }
}

/// Non-nullable string: `null` fails coercion even though it resolves.
impl FromParam for String {
    const TYPE: ParamType = ParamType::Str;

    fn from_param(value: Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl FromParam for Vec<Value> {
    const TYPE: ParamType = ParamType::List;

    fn from_param(value: Value) -> Option<Self> {
        match value {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl FromParam for Map<String, Value> {
    const TYPE: ParamType = ParamType::Map;

    fn from_param(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }
}

impl FromParam for Value {
    const TYPE: ParamType = ParamType::Any;

    fn from_param(value: Value) -> Option<Self> {
        Some(value)
    }
}

impl<T: FromParam> FromParam for Option<T> {
    const TYPE: ParamType = T::TYPE.boxed();

    fn from_param(value: Value) -> Option<Self> {
        if value.is_null() {
            Some(None)
        } else {
            T::from_param(value).map(Some)
        }
    }
}
