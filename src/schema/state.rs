/// Typed state schema — variable declarations, values, and their validation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("variable '{variable}': min {min} is greater than max {max}")]
    InvalidRange { variable: String, min: i64, max: i64 },
    #[error("variable '{variable}': default {default} is outside [{min}, {max}]")]
    DefaultOutOfRange {
        variable: String,
        default: i64,
        min: i64,
        max: i64,
    },
    #[error("variable '{0}': enum must list at least one value")]
    EmptyEnum(String),
    #[error("variable '{variable}': enum value '{value}' is listed more than once")]
    DuplicateEnumValue { variable: String, value: String },
    #[error("variable '{variable}': default '{default}' is not one of the enum values")]
    InvalidEnumDefault { variable: String, default: String },
    #[error("default override targets '{0}', which is not a declared integer variable")]
    InvalidOverrideTarget(String),
}

/// A concrete value held by a state variable.
///
/// Serialized untagged, so story files write plain `true`, `3` or `"gold"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Value {
    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
        }
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

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

/// Declaration of one persistent story variable and its domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableDecl {
    /// Bounded integer in `[min, max]`, both ends inclusive.
    Int {
        min: i64,
        max: i64,
        #[serde(default)]
        default: Option<i64>,
    },
    /// Boolean flag, always starting at `false`.
    Bool,
    /// One of an ordered set of distinct strings.
    Enum {
        values: Vec<String>,
        #[serde(default)]
        default: Option<String>,
    },
}

impl VariableDecl {
    /// Check that the declaration is internally consistent.
    pub fn validate(&self, name: &str) -> Result<(), SchemaError> {
        match self {
            VariableDecl::Int { min, max, default } => {
                if min > max {
                    return Err(SchemaError::InvalidRange {
                        variable: name.to_string(),
                        min: *min,
                        max: *max,
                    });
                }
                if let Some(d) = default {
                    if d < min || d > max {
                        return Err(SchemaError::DefaultOutOfRange {
                            variable: name.to_string(),
                            default: *d,
                            min: *min,
                            max: *max,
                        });
                    }
                }
                Ok(())
            }
            VariableDecl::Bool => Ok(()),
            VariableDecl::Enum { values, default } => {
                if values.is_empty() {
                    return Err(SchemaError::EmptyEnum(name.to_string()));
                }
                for (i, value) in values.iter().enumerate() {
                    if values[..i].contains(value) {
                        return Err(SchemaError::DuplicateEnumValue {
                            variable: name.to_string(),
                            value: value.clone(),
                        });
                    }
                }
                if let Some(d) = default {
                    if !values.contains(d) {
                        return Err(SchemaError::InvalidEnumDefault {
                            variable: name.to_string(),
                            default: d.clone(),
                        });
                    }
                }
                Ok(())
            }
        }
    }

    /// Returns true if `value` lies inside this declaration's domain.
    pub fn admits(&self, value: &Value) -> bool {
        match (self, value) {
            (VariableDecl::Int { min, max, .. }, Value::Int(n)) => min <= n && n <= max,
            (VariableDecl::Bool, Value::Bool(_)) => true,
            (VariableDecl::Enum { values, .. }, Value::Str(s)) => values.contains(s),
            _ => false,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            VariableDecl::Int { .. } => "int",
            VariableDecl::Bool => "bool",
            VariableDecl::Enum { .. } => "enum",
        }
    }
}

/// All variable declarations of a story, keyed and ordered by name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateSchema {
    pub variables: BTreeMap<String, VariableDecl>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style declaration, mostly for tests and programmatic stories.
    pub fn with(mut self, name: &str, decl: VariableDecl) -> Self {
        self.variables.insert(name.to_string(), decl);
        self
    }

    pub fn get(&self, name: &str) -> Option<&VariableDecl> {
        self.variables.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &VariableDecl)> {
        self.variables.iter()
    }

    /// Validate every declaration, reporting the first inconsistency
    /// in name order.
    pub fn validate(&self) -> Result<(), SchemaError> {
        for (name, decl) in &self.variables {
            decl.validate(name)?;
        }
        Ok(())
    }
}
