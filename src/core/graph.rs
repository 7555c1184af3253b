/// Flow graph — nodes, pins, and id-based connections.

use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::script;
use crate::schema::node::{
    Connection, Feature, FlowNode, JumpTarget, NodeId, NodeKind, Pin, PinDirection, PinId,
};

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),
    #[error("pin not found: {0}")]
    PinNotFound(PinId),
    #[error("dangling connection {pin} -> {target}")]
    Dangling { pin: PinId, target: PinId },
    #[error("jump {jump} targets missing node {target}")]
    DanglingTarget { jump: NodeId, target: NodeId },
    #[error("malformed node {node}: {reason}")]
    Malformed { node: NodeId, reason: String },
    #[error("duplicate node id: {0}")]
    DuplicateNode(NodeId),
    #[error("duplicate pin id: {0}")]
    DuplicatePin(PinId),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

#[derive(Debug, Clone, Copy)]
struct PinSlot {
    node: usize,
    direction: PinDirection,
    index: usize,
}

/// The directed graph of flow nodes.
///
/// Nodes keep declaration order. Connections refer to pins by id, so a
/// removed node leaves dangling ids behind rather than invalid pointers;
/// traversal prunes those and `validate` reports them.
#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    nodes: Vec<FlowNode>,
    node_index: FxHashMap<NodeId, usize>,
    pin_index: FxHashMap<PinId, PinSlot>,
    dropped: Vec<Connection>,
}

// RON deserialization helpers. Pins list their connections as bare target
// ids and blank expressions mean "no script".

#[derive(Debug, Deserialize)]
#[serde(rename = "Pin")]
struct RonPin {
    id: u64,
    #[serde(default)]
    expression: String,
    #[serde(default)]
    connections: Vec<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename = "Target")]
struct RonTarget {
    node: u64,
    #[serde(default)]
    pin: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename = "Node")]
struct RonNode {
    id: u64,
    kind: NodeKind,
    #[serde(default)]
    inputs: Vec<RonPin>,
    #[serde(default)]
    outputs: Vec<RonPin>,
    #[serde(default)]
    target: Option<RonTarget>,
    #[serde(default)]
    expression: String,
    #[serde(default)]
    features: Vec<Feature>,
}

fn non_blank(text: String) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

impl RonPin {
    fn into_pin(self, owner: NodeId, direction: PinDirection) -> Pin {
        let id = PinId(self.id);
        Pin {
            id,
            direction,
            owner,
            expression: non_blank(self.expression),
            connections: self
                .connections
                .into_iter()
                .map(|target| Connection {
                    source: id,
                    target: PinId(target),
                })
                .collect(),
        }
    }
}

impl RonNode {
    fn into_node(self) -> FlowNode {
        let id = NodeId(self.id);
        FlowNode {
            id,
            kind: self.kind,
            inputs: self
                .inputs
                .into_iter()
                .map(|p| p.into_pin(id, PinDirection::In))
                .collect(),
            outputs: self
                .outputs
                .into_iter()
                .map(|p| p.into_pin(id, PinDirection::Out))
                .collect(),
            target: self.target.map(|t| JumpTarget {
                node: NodeId(t.node),
                pin: t.pin.map(PinId),
            }),
            expression: non_blank(self.expression),
            features: self.features,
        }
    }
}

impl FlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a graph from a RON file.
    pub fn load_from_ron(path: &Path) -> Result<FlowGraph, GraphError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    /// Parse a graph from a RON string.
    pub fn parse_ron(input: &str) -> Result<FlowGraph, GraphError> {
        let raw: Vec<RonNode> = ron::from_str(input)?;
        Self::from_nodes(raw.into_iter().map(RonNode::into_node).collect())
    }

    /// Build a graph from materialized nodes.
    ///
    /// Pin owners and connection sources are normalized to the node and pin
    /// that hold them. Connections whose target is not an existing input
    /// pin are dropped and kept in `dropped_connections()`.
    pub fn from_nodes(nodes: Vec<FlowNode>) -> Result<FlowGraph, GraphError> {
        let mut graph = FlowGraph::new();
        for node in nodes {
            graph.insert_node(node)?;
        }

        let pin_index = &graph.pin_index;
        let mut dropped = Vec::new();
        for node in &mut graph.nodes {
            for pin in &mut node.outputs {
                pin.connections.retain(|conn| {
                    let resolves = pin_index
                        .get(&conn.target)
                        .is_some_and(|slot| slot.direction == PinDirection::In);
                    if !resolves {
                        warn!(source = %conn.source, target = %conn.target, "dropping dangling connection");
                        dropped.push(*conn);
                    }
                    resolves
                });
            }
        }
        graph.dropped = dropped;
        debug!(
            nodes = graph.nodes.len(),
            pins = graph.pin_index.len(),
            dropped = graph.dropped.len(),
            "flow graph loaded"
        );
        Ok(graph)
    }

    /// Connections removed at load time because their target did not resolve.
    pub fn dropped_connections(&self) -> &[Connection] {
        &self.dropped
    }

    pub fn nodes(&self) -> &[FlowNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node_index.contains_key(&id)
    }

    pub fn node(&self, id: NodeId) -> Result<&FlowNode, GraphError> {
        self.node_index
            .get(&id)
            .map(|&i| &self.nodes[i])
            .ok_or(GraphError::NodeNotFound(id))
    }

    /// Find a node by its technical name feature.
    pub fn find_by_technical_name(&self, name: &str) -> Option<&FlowNode> {
        self.nodes
            .iter()
            .find(|node| node.technical_name() == Some(name))
    }

    pub fn output_pins(&self, id: NodeId) -> Result<&[Pin], GraphError> {
        self.node(id).map(|node| node.outputs.as_slice())
    }

    pub fn pin(&self, id: PinId) -> Result<&Pin, GraphError> {
        let slot = self.pin_index.get(&id).ok_or(GraphError::PinNotFound(id))?;
        let node = &self.nodes[slot.node];
        let pins = match slot.direction {
            PinDirection::In => &node.inputs,
            PinDirection::Out => &node.outputs,
        };
        Ok(&pins[slot.index])
    }

    /// The input pin a connection leads to.
    pub fn resolve_connection(&self, connection: &Connection) -> Result<&Pin, GraphError> {
        match self.pin(connection.target) {
            Ok(pin) if pin.direction == PinDirection::In => Ok(pin),
            _ => Err(GraphError::Dangling {
                pin: connection.source,
                target: connection.target,
            }),
        }
    }

    /// The node (and input pin, if recorded and still present) a jump leads to.
    pub fn jump_target(&self, jump: &FlowNode) -> Result<(&FlowNode, Option<&Pin>), GraphError> {
        let target = jump.target.ok_or_else(|| GraphError::Malformed {
            node: jump.id,
            reason: "jump without a target".to_string(),
        })?;
        let node = self
            .node(target.node)
            .map_err(|_| GraphError::DanglingTarget {
                jump: jump.id,
                target: target.node,
            })?;
        let pin = target
            .pin
            .and_then(|id| node.inputs.iter().find(|pin| pin.id == id));
        Ok((node, pin))
    }

    /// Add a node. Its connections are not checked, so live edits may
    /// reference nodes that are inserted later.
    pub fn insert_node(&mut self, mut node: FlowNode) -> Result<(), GraphError> {
        if self.node_index.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        normalize(&mut node);
        let mut seen = Vec::new();
        for pin in node.inputs.iter().chain(node.outputs.iter()) {
            if self.pin_index.contains_key(&pin.id) || seen.contains(&pin.id) {
                return Err(GraphError::DuplicatePin(pin.id));
            }
            seen.push(pin.id);
        }

        let position = self.nodes.len();
        self.node_index.insert(node.id, position);
        index_pins(&mut self.pin_index, position, &node);
        self.nodes.push(node);
        Ok(())
    }

    /// Remove a node. Connections into it from other nodes are left in
    /// place and become dangling.
    pub fn remove_node(&mut self, id: NodeId) -> Result<FlowNode, GraphError> {
        let position = *self
            .node_index
            .get(&id)
            .ok_or(GraphError::NodeNotFound(id))?;
        let node = self.nodes.remove(position);
        self.reindex();
        Ok(node)
    }

    fn reindex(&mut self) {
        self.node_index.clear();
        self.pin_index.clear();
        for (position, node) in self.nodes.iter().enumerate() {
            self.node_index.insert(node.id, position);
            index_pins(&mut self.pin_index, position, node);
        }
    }

    /// Structural and script problems, in node order.
    pub fn validate(&self) -> Vec<GraphError> {
        let mut issues = Vec::new();
        for node in &self.nodes {
            let malformed = |reason: String| GraphError::Malformed {
                node: node.id,
                reason,
            };

            match node.kind {
                NodeKind::Condition => {
                    if node.inputs.len() != 1 || node.outputs.len() != 2 {
                        issues.push(malformed(format!(
                            "condition needs 1 input and 2 outputs, has {} and {}",
                            node.inputs.len(),
                            node.outputs.len()
                        )));
                    }
                }
                NodeKind::Instruction => {
                    if node.outputs.len() != 1 {
                        issues.push(malformed(format!(
                            "instruction needs exactly 1 output, has {}",
                            node.outputs.len()
                        )));
                    }
                }
                NodeKind::Jump => {
                    if !node.outputs.is_empty() {
                        issues.push(malformed("jump must not have outputs".to_string()));
                    }
                    if let Err(err) = self.jump_target(node) {
                        issues.push(err);
                    }
                }
                _ => {}
            }

            if let Some(text) = &node.expression {
                if let Err(err) = script::parse(text) {
                    issues.push(malformed(format!("script: {err}")));
                }
            }

            for pin in node.inputs.iter().chain(node.outputs.iter()) {
                if let Some(text) = &pin.expression {
                    if let Err(err) = script::parse(text) {
                        issues.push(malformed(format!("guard on pin {}: {err}", pin.id)));
                    }
                }
            }

            for conn in node.outputs.iter().flat_map(|pin| pin.connections.iter()) {
                if let Err(err) = self.resolve_connection(conn) {
                    issues.push(err);
                }
            }
        }
        issues
    }
}

fn normalize(node: &mut FlowNode) {
    let owner = node.id;
    for pin in &mut node.inputs {
        pin.owner = owner;
        pin.direction = PinDirection::In;
    }
    for pin in &mut node.outputs {
        pin.owner = owner;
        pin.direction = PinDirection::Out;
        let source = pin.id;
        for conn in &mut pin.connections {
            conn.source = source;
        }
    }
}

fn index_pins(index: &mut FxHashMap<PinId, PinSlot>, position: usize, node: &FlowNode) {
    for (i, pin) in node.inputs.iter().enumerate() {
        index.insert(
            pin.id,
            PinSlot {
                node: position,
                direction: PinDirection::In,
                index: i,
            },
        );
    }
    for (i, pin) in node.outputs.iter().enumerate() {
        index.insert(
            pin.id,
            PinSlot {
                node: position,
                direction: PinDirection::Out,
                index: i,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[
        (id: 0x10, kind: Dialogue, features: [DisplayName("Cell")],
         outputs: [(id: 0x11, connections: [0x21])]),
        (id: 0x20, kind: Condition, expression: "GameState.awake == true",
         inputs: [(id: 0x21)],
         outputs: [(id: 0x22, connections: [0x31]), (id: 0x23, connections: [0x99])]),
        (id: 0x30, kind: DialogueFragment, inputs: [(id: 0x31, expression: "  ")],
         features: [Text("Good morning."), Speaker(7)]),
        (id: 0x40, kind: Jump, inputs: [(id: 0x41)], target: Some((node: 0x10))),
    ]"#;

    #[test]
    fn parse_sample_graph() {
        let graph = FlowGraph::parse_ron(SAMPLE).unwrap();
        assert_eq!(graph.len(), 4);
        let cond = graph.node(NodeId(0x20)).unwrap();
        assert_eq!(cond.kind, NodeKind::Condition);
        assert_eq!(cond.expression.as_deref(), Some("GameState.awake == true"));
        assert_eq!(graph.output_pins(NodeId(0x20)).unwrap().len(), 2);

        let pin = graph.pin(PinId(0x31)).unwrap();
        assert_eq!(pin.owner, NodeId(0x30));
        assert_eq!(pin.direction, PinDirection::In);
        assert!(pin.expression.is_none());

        let line = graph.node(NodeId(0x30)).unwrap();
        assert_eq!(line.text(), Some("Good morning."));
        assert_eq!(line.speaker(), Some(7));
    }

    #[test]
    fn dangling_connections_are_dropped_at_load() {
        let graph = FlowGraph::parse_ron(SAMPLE).unwrap();
        assert_eq!(
            graph.dropped_connections(),
            &[Connection {
                source: PinId(0x23),
                target: PinId(0x99),
            }]
        );
        assert!(graph.output_pins(NodeId(0x20)).unwrap()[1].connections.is_empty());
    }

    #[test]
    fn resolve_connection_and_jump() {
        let graph = FlowGraph::parse_ron(SAMPLE).unwrap();
        let conn = graph.pin(PinId(0x11)).unwrap().connections[0];
        assert_eq!(graph.resolve_connection(&conn).unwrap().owner, NodeId(0x20));

        let bogus = Connection {
            source: PinId(0x11),
            target: PinId(0x22),
        };
        assert!(matches!(
            graph.resolve_connection(&bogus),
            Err(GraphError::Dangling { .. })
        ));

        let jump = graph.node(NodeId(0x40)).unwrap();
        let (target, pin) = graph.jump_target(jump).unwrap();
        assert_eq!(target.id, NodeId(0x10));
        assert!(pin.is_none());
    }

    #[test]
    fn duplicates_are_load_errors() {
        let dup_node = "[(id: 1, kind: Hub), (id: 1, kind: Hub)]";
        assert!(matches!(
            FlowGraph::parse_ron(dup_node),
            Err(GraphError::DuplicateNode(NodeId(1)))
        ));
        let dup_pin = "[(id: 1, kind: Hub, inputs: [(id: 5)]), (id: 2, kind: Hub, outputs: [(id: 5)])]";
        assert!(matches!(
            FlowGraph::parse_ron(dup_pin),
            Err(GraphError::DuplicatePin(PinId(5)))
        ));
    }

    #[test]
    fn remove_node_leaves_dangling_references() {
        let mut graph = FlowGraph::parse_ron(SAMPLE).unwrap();
        graph.remove_node(NodeId(0x10)).unwrap();
        assert!(matches!(
            graph.node(NodeId(0x10)),
            Err(GraphError::NodeNotFound(_))
        ));
        // Later nodes are still reachable after reindexing.
        assert_eq!(graph.pin(PinId(0x41)).unwrap().owner, NodeId(0x40));

        let issues = graph.validate();
        assert!(issues
            .iter()
            .any(|e| matches!(e, GraphError::DanglingTarget { jump: NodeId(0x40), .. })));
    }

    #[test]
    fn insert_node_checks_ids() {
        let mut graph = FlowGraph::parse_ron(SAMPLE).unwrap();
        let mut hub = FlowNode::new(NodeId(0x50), NodeKind::Hub);
        hub.inputs.push(Pin {
            id: PinId(0x11),
            direction: PinDirection::In,
            owner: NodeId(0x50),
            expression: None,
            connections: Vec::new(),
        });
        assert!(matches!(
            graph.insert_node(hub.clone()),
            Err(GraphError::DuplicatePin(_))
        ));
        hub.inputs[0].id = PinId(0x51);
        graph.insert_node(hub).unwrap();
        assert!(graph.contains(NodeId(0x50)));
    }

    #[test]
    fn validate_reports_layout_and_scripts() {
        let input = r#"[
            (id: 1, kind: Condition, expression: "A.b ==", inputs: [(id: 10)], outputs: [(id: 11)]),
            (id: 2, kind: Instruction, outputs: [(id: 20, expression: "(("), (id: 21)]),
            (id: 3, kind: Jump, outputs: [(id: 30)]),
        ]"#;
        let graph = FlowGraph::parse_ron(input).unwrap();
        let issues = graph.validate();
        let malformed = issues
            .iter()
            .filter(|e| matches!(e, GraphError::Malformed { .. }))
            .count();
        // condition layout + condition script, instruction layout + guard,
        // jump outputs + missing target
        assert_eq!(malformed, 6);
        assert!(FlowGraph::parse_ron(SAMPLE)
            .unwrap()
            .validate()
            .iter()
            .all(|e| !matches!(e, GraphError::Malformed { .. })));
    }

    #[test]
    fn find_by_technical_name() {
        let mut graph = FlowGraph::new();
        let mut node = FlowNode::new(NodeId(9), NodeKind::Hub);
        node.features.push(Feature::TechnicalName("Hub_Start".to_string()));
        graph.insert_node(node).unwrap();
        assert_eq!(graph.find_by_technical_name("Hub_Start").unwrap().id, NodeId(9));
    }
}
