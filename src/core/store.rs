//! Variable store: namespaced, typed narrative state.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::trace;

use crate::core::state::ScriptRng;
use crate::schema::node::NodeId;
use crate::schema::variable::{GvName, Value, Variable, VariableKind};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),
    #[error("variable not found: {0}")]
    VariableNotFound(GvName),
    #[error("type mismatch for {name}: declared {expected}, got {found}")]
    TypeMismatch {
        name: GvName,
        expected: VariableKind,
        found: VariableKind,
    },
    #[error("duplicate namespace: {0}")]
    DuplicateNamespace(String),
    #[error("duplicate variable: {0}")]
    DuplicateVariable(GvName),
    #[error("invalid variable name: '{0}'")]
    InvalidName(String),
    #[error("node {node} has no property '{property}'")]
    PropertyNotFound { node: NodeId, property: String },
    #[error("type mismatch for property '{property}' of node {node}: declared {expected}, got {found}")]
    PropertyTypeMismatch {
        node: NodeId,
        property: String,
        expected: VariableKind,
        found: VariableKind,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

impl StoreError {
    /// True for the "no such namespace/variable" family.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NamespaceNotFound(_) | Self::VariableNotFound(_)
        )
    }
}

/// A named group of variables, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableNamespace {
    name: String,
    variables: Vec<Variable>,
    index: FxHashMap<String, usize>,
}

impl VariableNamespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variables: Vec::new(),
            index: FxHashMap::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn get(&self, variable: &str) -> Option<&Variable> {
        self.index.get(variable).map(|&i| &self.variables[i])
    }

    fn get_mut(&mut self, variable: &str) -> Option<&mut Variable> {
        match self.index.get(variable) {
            Some(&i) => Some(&mut self.variables[i]),
            None => None,
        }
    }

    fn push(&mut self, variable: Variable) -> bool {
        if self.index.contains_key(&variable.name) {
            return false;
        }
        self.index
            .insert(variable.name.clone(), self.variables.len());
        self.variables.push(variable);
        true
    }
}

/// The single source of truth for narrative variables.
///
/// Namespaces and variables keep insertion order so enumeration is
/// deterministic; lookups go through hash indexes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VariableStore {
    namespaces: Vec<VariableNamespace>,
    index: FxHashMap<String, usize>,
}

// RON file shape: a list of namespaces, each a list of (name, value) pairs.

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "Namespace")]
struct RonNamespace {
    name: String,
    #[serde(default)]
    variables: Vec<RonVariable>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RonVariable {
    name: String,
    value: Value,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a store from a RON file.
    pub fn load_from_ron(path: &Path) -> Result<VariableStore, StoreError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    /// Parse a store from a RON string.
    pub fn parse_ron(input: &str) -> Result<VariableStore, StoreError> {
        let raw: Vec<RonNamespace> = ron::from_str(input)?;
        let mut store = VariableStore::new();
        for ns in raw {
            store.add_namespace(&ns.name)?;
            for var in ns.variables {
                store.declare(&GvName::new(ns.name.clone(), var.name), var.value)?;
            }
        }
        Ok(store)
    }

    /// Serialize the store back to the RON file shape.
    pub fn to_ron(&self) -> Result<String, ron::Error> {
        let raw: Vec<RonNamespace> = self
            .namespaces
            .iter()
            .map(|ns| RonNamespace {
                name: ns.name.clone(),
                variables: ns
                    .variables
                    .iter()
                    .map(|v| RonVariable {
                        name: v.name.clone(),
                        value: v.value.clone(),
                    })
                    .collect(),
            })
            .collect();
        ron::ser::to_string_pretty(&raw, ron::ser::PrettyConfig::default())
    }

    pub fn add_namespace(&mut self, name: &str) -> Result<(), StoreError> {
        if name.is_empty() || name.contains('.') {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        if self.index.contains_key(name) {
            return Err(StoreError::DuplicateNamespace(name.to_string()));
        }
        self.index.insert(name.to_string(), self.namespaces.len());
        self.namespaces.push(VariableNamespace::new(name));
        Ok(())
    }

    /// Declare a new variable. Its kind is fixed by the initial value.
    /// Creates the namespace if it does not exist yet.
    pub fn declare(&mut self, name: &GvName, value: Value) -> Result<(), StoreError> {
        if name.variable.is_empty() || name.variable.contains('.') {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        if !self.index.contains_key(&name.namespace) {
            self.add_namespace(&name.namespace)?;
        }
        let ns = self.namespace_mut(&name.namespace)?;
        if !ns.push(Variable::new(name.variable.clone(), value)) {
            return Err(StoreError::DuplicateVariable(name.clone()));
        }
        Ok(())
    }

    /// Namespace names in declaration order.
    pub fn namespaces(&self) -> impl Iterator<Item = &str> + '_ {
        self.namespaces.iter().map(|ns| ns.name.as_str())
    }

    pub fn namespace(&self, name: &str) -> Result<&VariableNamespace, StoreError> {
        self.index
            .get(name)
            .map(|&i| &self.namespaces[i])
            .ok_or_else(|| StoreError::NamespaceNotFound(name.to_string()))
    }

    fn namespace_mut(&mut self, name: &str) -> Result<&mut VariableNamespace, StoreError> {
        match self.index.get(name) {
            Some(&i) => Ok(&mut self.namespaces[i]),
            None => Err(StoreError::NamespaceNotFound(name.to_string())),
        }
    }

    pub fn get(&self, name: &GvName) -> Result<&Variable, StoreError> {
        let variable = self
            .namespace(&name.namespace)?
            .get(&name.variable)
            .ok_or_else(|| StoreError::VariableNotFound(name.clone()))?;
        trace!(variable = %name, value = %variable.value, "read variable");
        Ok(variable)
    }

    pub fn value(&self, name: &GvName) -> Result<&Value, StoreError> {
        self.get(name).map(|v| &v.value)
    }

    /// Check that `value` could be written to `name` without writing it.
    pub fn check_set(&self, name: &GvName, value: &Value) -> Result<(), StoreError> {
        let expected = self.get(name)?.kind();
        if expected != value.kind() {
            return Err(StoreError::TypeMismatch {
                name: name.clone(),
                expected,
                found: value.kind(),
            });
        }
        Ok(())
    }

    /// Overwrite a variable's value. The store is unchanged on error.
    pub fn set(&mut self, name: &GvName, value: Value) -> Result<(), StoreError> {
        self.check_set(name, &value)?;
        let variable = self
            .namespace_mut(&name.namespace)?
            .get_mut(&name.variable)
            .ok_or_else(|| StoreError::VariableNotFound(name.clone()))?;
        trace!(variable = %name, from = %variable.value, to = %value, "write variable");
        variable.value = value;
        Ok(())
    }

    /// Every variable with its full name, in declaration order.
    pub fn entries(&self) -> Vec<(GvName, Value)> {
        self.namespaces
            .iter()
            .flat_map(|ns| {
                ns.variables
                    .iter()
                    .map(move |v| (GvName::new(ns.name.clone(), v.name.clone()), v.value.clone()))
            })
            .collect()
    }

    /// Apply saved values (e.g. from a save game). Every entry is validated
    /// before anything is written, so a bad entry leaves the store untouched.
    pub fn restore(&mut self, values: &[(GvName, Value)]) -> Result<(), StoreError> {
        for (name, value) in values {
            self.check_set(name, value)?;
        }
        for (name, value) in values {
            self.set(name, value.clone())?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.namespaces.iter().map(|ns| ns.variables.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The evaluator's window on state.
///
/// Implemented directly by `VariableStore` and, shadow-aware, by `FlowState`.
/// Seen counters, the random source and node properties are optional hooks;
/// a plain store has none of them.
pub trait StoreView {
    fn value(&self, name: &GvName) -> Result<&Value, StoreError>;

    fn set_value(&mut self, name: &GvName, value: Value) -> Result<(), StoreError>;

    /// Validate a write without performing it.
    fn check_value(&self, name: &GvName, value: &Value) -> Result<(), StoreError>;

    fn seen_counter(&self, _node: NodeId) -> u32 {
        0
    }

    fn set_seen_counter(&mut self, _node: NodeId, _count: u32) {}

    fn reset_seen_counters(&mut self) {}

    fn rng(&self) -> Option<&ScriptRng> {
        None
    }

    fn replace_rng(&mut self, _rng: ScriptRng) {}

    fn node_property(&self, node: NodeId, property: &str) -> Result<&Value, StoreError> {
        Err(StoreError::PropertyNotFound {
            node,
            property: property.to_string(),
        })
    }

    /// Validate a property write without performing it.
    fn check_node_property(
        &self,
        node: NodeId,
        property: &str,
        _value: &Value,
    ) -> Result<(), StoreError> {
        self.node_property(node, property).map(|_| ())
    }

    fn set_node_property(
        &mut self,
        node: NodeId,
        property: &str,
        _value: Value,
    ) -> Result<(), StoreError> {
        Err(StoreError::PropertyNotFound {
            node,
            property: property.to_string(),
        })
    }
}

impl StoreView for VariableStore {
    fn value(&self, name: &GvName) -> Result<&Value, StoreError> {
        VariableStore::value(self, name)
    }

    fn set_value(&mut self, name: &GvName, value: Value) -> Result<(), StoreError> {
        self.set(name, value)
    }

    fn check_value(&self, name: &GvName, value: &Value) -> Result<(), StoreError> {
        self.check_set(name, value)
    }
}
