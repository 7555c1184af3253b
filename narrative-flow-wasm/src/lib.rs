//! WASM bindings for narrative-flow — powers the interactive web demo.

use wasm_bindgen::prelude::*;

use narrative_flow::core::player::FlowPlayer;
use narrative_flow::core::state::FlowState;
use narrative_flow::core::store::{StoreView, VariableStore};
use narrative_flow::schema::branch::BranchSet;
use narrative_flow::schema::node::{FlowNode, NodeId};
use narrative_flow::schema::variable::{GvName, Value};
use narrative_flow::{FlowGraph, PlayerConfig};

// ---------------------------------------------------------------------------
// Embedded sample data — compiled into the WASM binary
// ---------------------------------------------------------------------------
mod data {
    pub const CLINIC_FLOW: &str = include_str!("../../flow_data/clinic/flow.ron");
    pub const CLINIC_VARIABLES: &str = include_str!("../../flow_data/clinic/variables.ron");
    pub const CLINIC_PLAYER: &str = include_str!("../../flow_data/clinic/player.ron");

    pub const CLINIC_START: u64 = 0x100;
}

// ---------------------------------------------------------------------------
// JSON helper types for communication across the WASM boundary
// ---------------------------------------------------------------------------
#[derive(serde::Serialize)]
struct NodeInfo {
    id: u64,
    kind: &'static str,
    label: String,
    text: Option<String>,
    menu_text: Option<String>,
    stage_directions: Option<String>,
    speaker: Option<u64>,
}

#[derive(serde::Serialize)]
struct BranchInfo {
    index: usize,
    target: NodeInfo,
    valid: bool,
    path: Vec<u64>,
}

#[derive(serde::Serialize)]
struct BranchesInfo {
    branches: Vec<BranchInfo>,
    skipped: usize,
}

#[derive(serde::Serialize)]
struct VariableInfo {
    name: String,
    kind: String,
    value: String,
}

// ---------------------------------------------------------------------------
// Conversion helpers
// ---------------------------------------------------------------------------
fn node_info(node: &FlowNode) -> NodeInfo {
    NodeInfo {
        id: node.id.0,
        kind: node.kind.name(),
        label: node.label(),
        text: node.text().map(str::to_string),
        menu_text: node.menu_text().map(str::to_string),
        stage_directions: node.stage_directions().map(str::to_string),
        speaker: node.speaker(),
    }
}

fn branches_info(graph: &FlowGraph, set: &BranchSet) -> BranchesInfo {
    let branches = set
        .iter()
        .filter_map(|branch| {
            let target = graph.node(branch.target).ok()?;
            Some(BranchInfo {
                index: branch.index,
                target: node_info(target),
                valid: branch.is_valid,
                path: branch.nodes().map(|n| n.0).collect(),
            })
        })
        .collect();
    BranchesInfo {
        branches,
        skipped: set.skipped.len(),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, JsError> {
    serde_json::to_string(value).map_err(|e| JsError::new(&format!("Serialization error: {e}")))
}

// ---------------------------------------------------------------------------
// FlowSession — the main exported struct
// ---------------------------------------------------------------------------
/// RON inputs a session was built from, kept so `reset` can rebuild it.
#[derive(Clone)]
struct SessionSource {
    flow: String,
    variables: String,
    player: String,
    start: u64,
}

#[wasm_bindgen]
pub struct FlowSession {
    player: FlowPlayer,
    state: FlowState,
    source: SessionSource,
    seed: u64,
}

#[wasm_bindgen]
impl FlowSession {
    /// Create a session over the bundled clinic sample.
    #[wasm_bindgen(constructor)]
    pub fn new(seed: u64) -> Result<FlowSession, JsError> {
        FlowSession::from_ron(
            data::CLINIC_FLOW,
            data::CLINIC_VARIABLES,
            data::CLINIC_PLAYER,
            data::CLINIC_START,
            seed,
        )
    }

    /// Create a session from RON text for the graph, variables and player config.
    pub fn from_ron(
        flow: &str,
        variables: &str,
        player_ron: &str,
        start: u64,
        seed: u64,
    ) -> Result<FlowSession, JsError> {
        let graph = FlowGraph::parse_ron(flow)
            .map_err(|e| JsError::new(&format!("Flow parse error: {e}")))?;
        let config = PlayerConfig::parse_ron(player_ron)
            .map_err(|e| JsError::new(&format!("Config parse error: {e}")))?;
        let store = VariableStore::parse_ron(variables)
            .map_err(|e| JsError::new(&format!("Variables parse error: {e}")))?;

        let player = FlowPlayer::builder()
            .with_graph(graph)
            .with_config(config)
            .seed(seed)
            .start_on(NodeId(start))
            .build()
            .map_err(|e| JsError::new(&format!("Player build error: {e}")))?;
        let state = player.new_state(store);
        let source = SessionSource {
            flow: flow.to_string(),
            variables: variables.to_string(),
            player: player_ron.to_string(),
            start,
        };

        Ok(FlowSession {
            player,
            state,
            source,
            seed,
        })
    }

    /// Return the node under the cursor as JSON.
    pub fn current(&self) -> Result<String, JsError> {
        let cursor = self
            .player
            .cursor()
            .ok_or_else(|| JsError::new("No cursor"))?;
        let node = self
            .player
            .graph()
            .node(cursor)
            .map_err(|e| JsError::new(&e.to_string()))?;
        to_json(&node_info(node))
    }

    /// Return the branches from the cursor as JSON.
    pub fn branches(&mut self) -> Result<String, JsError> {
        let set = self
            .player
            .branches(&mut self.state)
            .map_err(|e| JsError::new(&format!("Traversal error: {e}")))?;
        to_json(&branches_info(self.player.graph(), &set))
    }

    /// Look ahead from any node without moving or changing state.
    pub fn peek(&mut self, node: u64) -> Result<String, JsError> {
        let set = self
            .player
            .peek(&mut self.state, NodeId(node))
            .map_err(|e| JsError::new(&format!("Traversal error: {e}")))?;
        to_json(&branches_info(self.player.graph(), &set))
    }

    /// Take branch `index` and return the new current node as JSON.
    pub fn play(&mut self, index: usize) -> Result<String, JsError> {
        self.player
            .play(&mut self.state, index)
            .map_err(|e| JsError::new(&format!("Play error: {e}")))?;
        self.current()
    }

    /// Return all variables as a JSON array.
    pub fn variables(&self) -> Result<String, JsError> {
        let vars: Vec<VariableInfo> = self
            .state
            .variables()
            .entries()
            .into_iter()
            .map(|(name, value)| VariableInfo {
                name: name.to_string(),
                kind: value.kind().to_string(),
                value: value.to_string(),
            })
            .collect();
        to_json(&vars)
    }

    /// Overwrite one variable, parsing `text` as the variable's declared type.
    pub fn set_variable(&mut self, name: &str, text: &str) -> Result<(), JsError> {
        let name =
            GvName::parse(name).ok_or_else(|| JsError::new(&format!("Bad variable name: {name}")))?;
        let kind = self
            .state
            .value(&name)
            .map_err(|e| JsError::new(&e.to_string()))?
            .kind();
        let value = Value::parse_as(kind, text)
            .ok_or_else(|| JsError::new(&format!("'{text}' is not a valid {kind}")))?;
        self.state
            .set_value(&name, value)
            .map_err(|e| JsError::new(&e.to_string()))
    }

    /// Open a "what if" layer. Everything played until `discard` can be undone.
    pub fn speculate(&mut self) {
        self.player.begin_speculation(&mut self.state);
    }

    pub fn commit(&mut self) -> Result<(), JsError> {
        self.player
            .commit_speculation(&mut self.state)
            .map_err(|e| JsError::new(&e.to_string()))
    }

    pub fn discard(&mut self) -> Result<(), JsError> {
        self.player
            .discard_speculation(&mut self.state)
            .map_err(|e| JsError::new(&e.to_string()))
    }

    pub fn speculation_depth(&self) -> usize {
        self.player.speculation_depth()
    }

    /// Restart from the session's own graph, variables and config with a new seed.
    pub fn reset(&mut self, seed: u64) -> Result<(), JsError> {
        let source = self.source.clone();
        *self = FlowSession::from_ron(
            &source.flow,
            &source.variables,
            &source.player,
            source.start,
            seed,
        )?;
        Ok(())
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}
