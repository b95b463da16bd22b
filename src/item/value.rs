//! Typed property values
//!
//! One tagged union covers every value kind. A [`PropertyRecord`] is the
//! persisted shape of a property: its type, its multiplicity (fixed when the
//! property is created) and its values.

use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::path::{Path, PathFactory, QualifiedName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    String,
    Binary,
    Long,
    Double,
    Date,
    Boolean,
    Name,
    Path,
    Reference,
    /// Schema wildcard: any type is accepted
    Undefined,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::String => "string",
            PropertyType::Binary => "binary",
            PropertyType::Long => "long",
            PropertyType::Double => "double",
            PropertyType::Date => "date",
            PropertyType::Boolean => "boolean",
            PropertyType::Name => "name",
            PropertyType::Path => "path",
            PropertyType::Reference => "reference",
            PropertyType::Undefined => "undefined",
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PropertyType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "string" => PropertyType::String,
            "binary" => PropertyType::Binary,
            "long" => PropertyType::Long,
            "double" => PropertyType::Double,
            "date" => PropertyType::Date,
            "boolean" => PropertyType::Boolean,
            "name" => PropertyType::Name,
            "path" => PropertyType::Path,
            "reference" => PropertyType::Reference,
            "undefined" => PropertyType::Undefined,
            other => {
                return Err(StoreError::ConstraintViolation(format!(
                    "unknown property type '{}'",
                    other
                )))
            }
        })
    }
}

/// A single typed value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Boolean(bool),
    Long(i64),
    Double(f64),
    Date(DateTime<FixedOffset>),
    Name(QualifiedName),
    Path(Path),
    /// Reference key of a referenceable node
    Reference(String),
    Binary(Vec<u8>),
    String(String),
}

impl Value {
    pub fn property_type(&self) -> PropertyType {
        match self {
            Value::Boolean(_) => PropertyType::Boolean,
            Value::Long(_) => PropertyType::Long,
            Value::Double(_) => PropertyType::Double,
            Value::Date(_) => PropertyType::Date,
            Value::Name(_) => PropertyType::Name,
            Value::Path(_) => PropertyType::Path,
            Value::Reference(_) => PropertyType::Reference,
            Value::Binary(_) => PropertyType::Binary,
            Value::String(_) => PropertyType::String,
        }
    }

    /// Parses user input as a value of the given type. Names and paths go
    /// through the factory so prefixes are honoured.
    pub fn parse(kind: PropertyType, input: &str, factory: &PathFactory) -> Result<Self> {
        let bad = |what: &str| {
            StoreError::ConstraintViolation(format!("'{}' is not a valid {}", input, what))
        };
        Ok(match kind {
            PropertyType::String | PropertyType::Undefined => Value::String(input.to_string()),
            PropertyType::Binary => Value::Binary(input.as_bytes().to_vec()),
            PropertyType::Long => Value::Long(input.trim().parse().map_err(|_| bad("long"))?),
            PropertyType::Double => Value::Double(input.trim().parse().map_err(|_| bad("double"))?),
            PropertyType::Boolean => {
                Value::Boolean(input.trim().parse().map_err(|_| bad("boolean"))?)
            }
            PropertyType::Date => Value::Date(
                DateTime::parse_from_rfc3339(input.trim()).map_err(|_| bad("RFC 3339 date"))?,
            ),
            PropertyType::Name => Value::Name(factory.parse_name(input)?),
            PropertyType::Path => Value::Path(factory.parse(input)?),
            PropertyType::Reference => Value::Reference(input.to_string()),
        })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Reference(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&QualifiedName> {
        match self {
            Value::Name(n) => Some(n),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Date(v) => write!(f, "{}", v.to_rfc3339()),
            Value::Name(v) => write!(f, "{}", v),
            Value::Path(v) => write!(f, "{}", v),
            Value::Reference(v) | Value::String(v) => write!(f, "{}", v),
            Value::Binary(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
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

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Value::Date(v)
    }
}

impl From<QualifiedName> for Value {
    fn from(v: QualifiedName) -> Self {
        Value::Name(v)
    }
}

impl From<Path> for Value {
    fn from(v: Path) -> Self {
        Value::Path(v)
    }
}

/// Persisted shape of a property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    #[serde(rename = "type")]
    pub kind: PropertyType,
    pub multiple: bool,
    pub values: Vec<Value>,
}

impl PropertyRecord {
    pub fn single(value: Value) -> Self {
        Self {
            kind: value.property_type(),
            multiple: false,
            values: vec![value],
        }
    }

    /// A multi-valued record. `kind` is required so an empty list stays typed.
    pub fn multiple(kind: PropertyType, values: Vec<Value>) -> Result<Self> {
        let record = Self {
            kind,
            multiple: true,
            values,
        };
        record.validate()?;
        Ok(record)
    }

    /// Checks multiplicity and that every value has the record's type
    pub fn validate(&self) -> Result<()> {
        if !self.multiple && self.values.len() != 1 {
            return Err(StoreError::ConstraintViolation(format!(
                "single-valued property holds {} values",
                self.values.len()
            )));
        }
        if let Some(v) = self.values.iter().find(|v| v.property_type() != self.kind) {
            return Err(StoreError::ConstraintViolation(format!(
                "value of type {} in property of type {}",
                v.property_type(),
                self.kind
            )));
        }
        Ok(())
    }

    /// The first value, for single-valued properties
    pub fn value(&self) -> Option<&Value> {
        self.values.first()
    }
}
