//! Per-node runtime properties, readable and writable from scripts.
//!
//! Seeded from node features when a state is created. Property names follow
//! the feature names (`DisplayName`, `Text`, `Speaker`, ...); positions and
//! colors have no script type and are left out.

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::core::graph::FlowGraph;
use crate::core::shadow::Shadowable;
use crate::core::store::StoreError;
use crate::schema::node::{Feature, FlowNode, NodeId};
use crate::schema::variable::Value;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeProperties {
    nodes: FxHashMap<NodeId, FxHashMap<String, Value>>,
}

impl NodeProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Properties for every node in `graph` that has representable features.
    pub fn from_graph(graph: &FlowGraph) -> Self {
        let mut props = Self::new();
        for node in graph.nodes() {
            props.declare_node(node);
        }
        props
    }

    fn declare_node(&mut self, node: &FlowNode) {
        for feature in &node.features {
            let (name, value) = match feature {
                Feature::DisplayName(s) => ("DisplayName", Value::from(s.as_str())),
                Feature::TechnicalName(s) => ("TechnicalName", Value::from(s.as_str())),
                Feature::Text(s) => ("Text", Value::from(s.as_str())),
                Feature::MenuText(s) => ("MenuText", Value::from(s.as_str())),
                Feature::StageDirections(s) => ("StageDirections", Value::from(s.as_str())),
                Feature::Speaker(id) => match i64::try_from(*id) {
                    Ok(id) => ("Speaker", Value::Int(id)),
                    Err(_) => continue,
                },
                Feature::Position { .. } | Feature::Color { .. } => continue,
            };
            self.declare(node.id, name, value);
        }
    }

    /// Declare `property` on `node`, replacing any earlier declaration.
    pub fn declare(&mut self, node: NodeId, property: &str, value: Value) {
        self.nodes
            .entry(node)
            .or_default()
            .insert(property.to_string(), value);
    }

    pub fn get(&self, node: NodeId, property: &str) -> Result<&Value, StoreError> {
        self.nodes
            .get(&node)
            .and_then(|props| props.get(property))
            .ok_or_else(|| StoreError::PropertyNotFound {
                node,
                property: property.to_string(),
            })
    }

    pub fn check_set(&self, node: NodeId, property: &str, value: &Value) -> Result<(), StoreError> {
        let expected = self.get(node, property)?.kind();
        if expected != value.kind() {
            return Err(StoreError::PropertyTypeMismatch {
                node,
                property: property.to_string(),
                expected,
                found: value.kind(),
            });
        }
        Ok(())
    }

    /// Overwrite a declared property. Unchanged on error.
    pub fn set(&mut self, node: NodeId, property: &str, value: Value) -> Result<(), StoreError> {
        self.check_set(node, property, &value)?;
        if let Some(slot) = self
            .nodes
            .get_mut(&node)
            .and_then(|props| props.get_mut(property))
        {
            trace!(%node, property, from = %slot, to = %value, "write property");
            *slot = value;
        }
        Ok(())
    }

    /// Property names and values of `node`, sorted by name.
    pub fn of_node(&self, node: NodeId) -> Vec<(&str, &Value)> {
        let mut props: Vec<(&str, &Value)> = self
            .nodes
            .get(&node)
            .map(|props| props.iter().map(|(k, v)| (k.as_str(), v)).collect())
            .unwrap_or_default();
        props.sort_by(|a, b| a.0.cmp(b.0));
        props
    }

    pub fn len(&self) -> usize {
        self.nodes.values().map(|props| props.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Shadowable for NodeProperties {}
