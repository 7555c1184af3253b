use serde::{Deserialize, Serialize};
use std::fmt;

/// Newtype wrapper for flow node IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

/// Newtype wrapper for pin IDs. Pin IDs share one namespace across the whole graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PinId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

impl NodeId {
    /// Parse `0x`-prefixed hex or plain decimal.
    pub fn parse(text: &str) -> Option<NodeId> {
        let text = text.trim();
        match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16).ok().map(NodeId),
            None => text.parse().ok().map(NodeId),
        }
    }
}

/// The kind of a flow node. Traversal behavior is keyed on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    FlowFragment,
    Hub,
    Dialogue,
    DialogueFragment,
    Condition,
    Instruction,
    Jump,
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FlowFragment => "flow_fragment",
            Self::Hub => "hub",
            Self::Dialogue => "dialogue",
            Self::DialogueFragment => "dialogue_fragment",
            Self::Condition => "condition",
            Self::Instruction => "instruction",
            Self::Jump => "jump",
        }
    }

    /// Dialogue-like nodes carry presentation data for the caller.
    pub fn is_presentable(&self) -> bool {
        matches!(self, Self::Dialogue | Self::DialogueFragment)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinDirection {
    In,
    Out,
}

/// An edge from an output pin to an input pin, by ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub source: PinId,
    pub target: PinId,
}

/// A connection point on a node.
///
/// The optional expression is a guard condition: a pin whose guard evaluates
/// false makes every branch through it invalid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pin {
    pub id: PinId,
    pub direction: PinDirection,
    pub owner: NodeId,
    pub expression: Option<String>,
    pub connections: Vec<Connection>,
}

impl Pin {
    pub fn has_guard(&self) -> bool {
        self.expression
            .as_deref()
            .is_some_and(|text| !text.trim().is_empty())
    }
}

/// Where a jump node sends traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JumpTarget {
    pub node: NodeId,
    /// Specific input pin on the target node, if the export recorded one.
    pub pin: Option<PinId>,
}

/// Optional, presence-queried data attached to a node.
///
/// The engine never interprets these; they are passed through to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Feature {
    DisplayName(String),
    TechnicalName(String),
    Text(String),
    MenuText(String),
    StageDirections(String),
    /// Reference to a speaker entity in the exported project.
    Speaker(u64),
    Position { x: f32, y: f32 },
    Color { r: f32, g: f32, b: f32, a: f32 },
}

/// A node in the flow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub inputs: Vec<Pin>,
    pub outputs: Vec<Pin>,
    pub target: Option<JumpTarget>,
    /// Condition text for `Condition` nodes, instruction text for `Instruction` nodes.
    pub expression: Option<String>,
    pub features: Vec<Feature>,
}

impl FlowNode {
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            target: None,
            expression: None,
            features: Vec::new(),
        }
    }

    pub fn display_name(&self) -> Option<&str> {
        self.features.iter().find_map(|f| match f {
            Feature::DisplayName(s) => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn technical_name(&self) -> Option<&str> {
        self.features.iter().find_map(|f| match f {
            Feature::TechnicalName(s) => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn text(&self) -> Option<&str> {
        self.features.iter().find_map(|f| match f {
            Feature::Text(s) => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn menu_text(&self) -> Option<&str> {
        self.features.iter().find_map(|f| match f {
            Feature::MenuText(s) => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn stage_directions(&self) -> Option<&str> {
        self.features.iter().find_map(|f| match f {
            Feature::StageDirections(s) => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn speaker(&self) -> Option<u64> {
        self.features.iter().find_map(|f| match f {
            Feature::Speaker(id) => Some(*id),
            _ => None,
        })
    }

    pub fn position(&self) -> Option<(f32, f32)> {
        self.features.iter().find_map(|f| match f {
            Feature::Position { x, y } => Some((*x, *y)),
            _ => None,
        })
    }

    pub fn color(&self) -> Option<[f32; 4]> {
        self.features.iter().find_map(|f| match f {
            Feature::Color { r, g, b, a } => Some([*r, *g, *b, *a]),
            _ => None,
        })
    }

    /// A human-readable label: display name, technical name, or the ID.
    pub fn label(&self) -> String {
        self.display_name()
            .or_else(|| self.technical_name())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} {}", self.kind.name(), self.id))
    }
}
