use serde::{Deserialize, Serialize};
use std::fmt;

/// The declared type of a variable. Fixed when the variable is declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableKind {
    Bool,
    Int,
    String,
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::String => "string",
        };
        f.write_str(name)
    }
}

/// A dynamic value held by a variable or produced by a script expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    String(String),
}

impl Value {
    pub fn kind(&self) -> VariableKind {
        match self {
            Self::Bool(_) => VariableKind::Bool,
            Self::Int(_) => VariableKind::Int,
            Self::String(_) => VariableKind::String,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Parse a value from user-facing text, guided by the expected kind.
    ///
    /// Used by tools that accept values on the command line.
    pub fn parse_as(kind: VariableKind, text: &str) -> Option<Value> {
        match kind {
            VariableKind::Bool => match text {
                "true" | "True" | "1" => Some(Self::Bool(true)),
                "false" | "False" | "0" => Some(Self::Bool(false)),
                _ => None,
            },
            VariableKind::Int => text.parse().ok().map(Self::Int),
            VariableKind::String => Some(Self::String(
                text.trim_matches(|c| c == '"' || c == '\'').to_string(),
            )),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

/// A single named, typed variable inside a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub value: Value,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// The declared kind. Derived from the value, which `VariableStore::set`
    /// never allows to change kind.
    pub fn kind(&self) -> VariableKind {
        self.value.kind()
    }
}

/// A namespace-qualified variable name: `Namespace.Variable`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GvName {
    pub namespace: String,
    pub variable: String,
}

impl GvName {
    pub fn new(namespace: impl Into<String>, variable: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            variable: variable.into(),
        }
    }

    /// Split a full name at its first `.`. Returns `None` when either half is empty.
    pub fn parse(full_name: &str) -> Option<GvName> {
        let (namespace, variable) = full_name.split_once('.')?;
        if namespace.is_empty() || variable.is_empty() {
            return None;
        }
        Some(Self::new(namespace, variable))
    }
}

impl fmt::Display for GvName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.variable)
    }
}
