//! Typed column values

use crate::{Error, Result};
use std::cmp::Ordering;
use std::fmt;

/// Semantic type of a column, independent of any backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticType {
    Integer,
    Long,
    Double,
    String,
    Binary,
    /// Value object persisted through its string storage form
    ComplexObject,
    /// Enumerated constant persisted as its numeric ordinal
    Enum,
    /// List of `key=value` strings
    TagList,
}

impl SemanticType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::Integer => "INTEGER",
            SemanticType::Long => "LONG",
            SemanticType::Double => "DOUBLE",
            SemanticType::String => "STRING",
            SemanticType::Binary => "BINARY",
            SemanticType::ComplexObject => "COMPLEX_OBJECT",
            SemanticType::Enum => "ENUM",
            SemanticType::TagList => "TAG_LIST",
        }
    }

    /// Columns of these types can take part in an identity.
    pub fn is_identity_capable(&self) -> bool {
        matches!(
            self,
            SemanticType::Integer | SemanticType::Long | SemanticType::String | SemanticType::Enum
        )
    }

    /// Columns of these types can be merged arithmetically.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            SemanticType::Integer | SemanticType::Long | SemanticType::Double
        )
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single column value of a generic record.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Double(f64),
    Str(String),
    Binary(Vec<u8>),
    /// Storage form of a value object
    Complex(String),
    List(Vec<String>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Double(_) => "double",
            Value::Str(_) => "string",
            Value::Binary(_) => "binary",
            Value::Complex(_) => "complex",
            Value::List(_) => "list",
        }
    }

    /// Whether this value may be stored in a column of `semantic` type.
    pub fn conforms_to(&self, semantic: SemanticType) -> bool {
        matches!(
            (self, semantic),
            (Value::Int(_), SemanticType::Integer)
                | (Value::Long(_), SemanticType::Long)
                | (Value::Long(_), SemanticType::Enum)
                | (Value::Double(_), SemanticType::Double)
                | (Value::Str(_), SemanticType::String)
                | (Value::Binary(_), SemanticType::Binary)
                | (Value::Complex(_), SemanticType::ComplexObject)
                | (Value::List(_), SemanticType::TagList)
        )
    }

    pub fn check(&self, column: &str, semantic: SemanticType) -> Result<()> {
        if self.conforms_to(semantic) {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                column: column.to_string(),
                expected: semantic.to_string(),
                actual: self.kind().to_string(),
            })
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v as i64),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Complex(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Rendering used when the value is part of a record identity.
    pub fn identity_fragment(&self) -> Option<String> {
        match self {
            Value::Int(v) => Some(v.to_string()),
            Value::Long(v) => Some(v.to_string()),
            Value::Str(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Total order over values of the same kind. Values of different kinds
    /// order by kind name so the order stays total.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Long(a), Value::Long(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::Str(a), Value::Str(b)) | (Value::Complex(a), Value::Complex(b)) => a.cmp(b),
            (Value::Binary(a), Value::Binary(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a.cmp(b),
            (a, b) => a.kind().cmp(b.kind()),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Binary(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::List(v)
    }
}

/// A value object stored through a string representation.
pub trait ComplexObject: Sized {
    fn to_storage_form(&self) -> String;
    fn from_storage_form(data: &str) -> Result<Self>;
}
