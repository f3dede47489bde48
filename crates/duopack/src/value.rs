//! The dynamic value model and its conversions to and from Rust types.

use crate::Error;

/// A dynamically typed value.
///
/// Maps keep their entries in insertion order and may repeat keys; the codec
/// preserves whatever the sender wrote.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(Vec<(String, Value)>),
}

/// The runtime type of a `Value`, used for signature checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Nil,
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    List,
    Map,
}

impl TypeTag {
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Nil => "nil",
            TypeTag::Bool => "bool",
            TypeTag::Int => "int",
            TypeTag::Float => "float",
            TypeTag::Str => "string",
            TypeTag::Bytes => "bytes",
            TypeTag::List => "list",
            TypeTag::Map => "map",
        }
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Value {
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Nil => TypeTag::Nil,
            Value::Bool(_) => TypeTag::Bool,
            Value::Int(_) => TypeTag::Int,
            Value::Float(_) => TypeTag::Float,
            Value::Str(_) => TypeTag::Str,
            Value::Bytes(_) => TypeTag::Bytes,
            Value::List(_) => TypeTag::List,
            Value::Map(_) => TypeTag::Map,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the first entry under `key`, if this is a map.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    fn mismatch(&self, expected: TypeTag) -> Error {
        Error::TypeMismatch { expected, found: self.type_tag() }
    }
}

// ============================================================================
//  INTO VALUE
// ============================================================================

macro_rules! impl_from {
    ($($ty:ty => |$v:ident| $body:expr;)*) => {
        $(
            impl From<$ty> for Value {
                fn from($v: $ty) -> Self {
                    $body
                }
            }
        )*
    };
}

impl_from! {
    () => |_v| Value::Nil;
    bool => |v| Value::Bool(v);
    i64 => |v| Value::Int(v);
    i32 => |v| Value::Int(i64::from(v));
    u32 => |v| Value::Int(i64::from(v));
    u8 => |v| Value::Int(i64::from(v));
    f64 => |v| Value::Float(v);
    f32 => |v| Value::Float(f64::from(v));
    String => |v| Value::Str(v);
    &str => |v| Value::Str(v.to_owned());
    Vec<u8> => |v| Value::Bytes(v);
    &[u8] => |v| Value::Bytes(v.to_vec());
    Vec<Value> => |v| Value::List(v);
    Vec<(String, Value)> => |v| Value::Map(v);
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Nil, Into::into)
    }
}

// ============================================================================
//  FROM VALUE
// ============================================================================

impl TryFrom<Value> for () {
    type Error = Error;
    fn try_from(v: Value) -> Result<Self, Error> {
        match v {
            Value::Nil => Ok(()),
            other => Err(other.mismatch(TypeTag::Nil)),
        }
    }
}

impl TryFrom<Value> for bool {
    type Error = Error;
    fn try_from(v: Value) -> Result<Self, Error> {
        v.as_bool().ok_or_else(|| v.mismatch(TypeTag::Bool))
    }
}

impl TryFrom<Value> for i64 {
    type Error = Error;
    fn try_from(v: Value) -> Result<Self, Error> {
        v.as_int().ok_or_else(|| v.mismatch(TypeTag::Int))
    }
}

impl TryFrom<Value> for i32 {
    type Error = Error;
    fn try_from(v: Value) -> Result<Self, Error> {
        let n = i64::try_from(v)?;
        i32::try_from(n).map_err(|_| Error::OutOfRange(n))
    }
}

impl TryFrom<Value> for u32 {
    type Error = Error;
    fn try_from(v: Value) -> Result<Self, Error> {
        let n = i64::try_from(v)?;
        u32::try_from(n).map_err(|_| Error::OutOfRange(n))
    }
}

impl TryFrom<Value> for f64 {
    type Error = Error;
    fn try_from(v: Value) -> Result<Self, Error> {
        v.as_float().ok_or_else(|| v.mismatch(TypeTag::Float))
    }
}

impl TryFrom<Value> for String {
    type Error = Error;
    fn try_from(v: Value) -> Result<Self, Error> {
        match v {
            Value::Str(s) => Ok(s),
            other => Err(other.mismatch(TypeTag::Str)),
        }
    }
}

impl TryFrom<Value> for Vec<u8> {
    type Error = Error;
    fn try_from(v: Value) -> Result<Self, Error> {
        match v {
            Value::Bytes(b) => Ok(b),
            other => Err(other.mismatch(TypeTag::Bytes)),
        }
    }
}

impl TryFrom<Value> for Vec<Value> {
    type Error = Error;
    fn try_from(v: Value) -> Result<Self, Error> {
        match v {
            Value::List(items) => Ok(items),
            other => Err(other.mismatch(TypeTag::List)),
        }
    }
}

impl TryFrom<Value> for Vec<(String, Value)> {
    type Error = Error;
    fn try_from(v: Value) -> Result<Self, Error> {
        match v {
            Value::Map(entries) => Ok(entries),
            other => Err(other.mismatch(TypeTag::Map)),
        }
    }
}
