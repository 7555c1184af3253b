/// Flow player: cursor, branch queries, and committed advancement.
///
/// The player owns the graph and cursor. Narrative state lives in a
/// `FlowState` passed to each call, so one graph can drive several states.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::core::evaluator;
use crate::core::explore::explore_branches;
use crate::core::graph::{FlowGraph, GraphError};
use crate::core::properties::NodeProperties;
use crate::core::script::ScriptError;
use crate::core::shadow::{ShadowError, ShadowToken};
use crate::core::state::FlowState;
use crate::core::store::{StoreError, VariableStore};
use crate::schema::branch::{Branch, BranchSet, FlowRef};
use crate::schema::node::{NodeId, NodeKind};

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("shadow error: {0}")]
    Shadow(#[from] ShadowError),
    #[error("script error: {0}")]
    Script(#[from] ScriptError),
    #[error("stale branch from {origin}: {reason}")]
    StaleBranch { origin: NodeId, reason: String },
    #[error("player has no cursor")]
    NoCursor,
    #[error("branch index {index} out of range ({count} branches)")]
    BranchIndex { index: usize, count: usize },
    #[error("no speculation session is open")]
    NoSpeculation,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

fn default_pause_on() -> FxHashSet<NodeKind> {
    [NodeKind::Dialogue, NodeKind::DialogueFragment]
        .into_iter()
        .collect()
}

fn default_true() -> bool {
    true
}

fn default_max_depth() -> usize {
    128
}

/// Player settings, loadable from RON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Node kinds where exploration stops and a branch is reported.
    #[serde(default = "default_pause_on")]
    pub pause_on: FxHashSet<NodeKind>,
    /// Drop branches whose pin guards failed.
    #[serde(default = "default_true")]
    pub ignore_invalid_branches: bool,
    /// Maximum number of pass-through nodes on one path.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Seed for the script random source.
    #[serde(default)]
    pub seed: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            pause_on: default_pause_on(),
            ignore_invalid_branches: true,
            max_depth: default_max_depth(),
            seed: 0,
        }
    }
}

impl PlayerConfig {
    pub fn load_from_ron(path: &Path) -> Result<PlayerConfig, FlowError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    pub fn parse_ron(input: &str) -> Result<PlayerConfig, FlowError> {
        Ok(ron::from_str(input)?)
    }
}

#[derive(Debug, Clone, Copy)]
struct Speculation {
    token: ShadowToken,
    cursor: Option<NodeId>,
}

/// Walks a flow graph. Built via `FlowPlayer::builder()`.
#[derive(Debug, Clone)]
pub struct FlowPlayer {
    graph: FlowGraph,
    config: PlayerConfig,
    cursor: Option<NodeId>,
    speculations: Vec<Speculation>,
}

/// Builder for constructing a `FlowPlayer`.
#[derive(Debug, Default)]
pub struct FlowPlayerBuilder {
    graph_path: Option<PathBuf>,
    config_path: Option<PathBuf>,
    /// Directly provided graph (for testing without files).
    graph: Option<FlowGraph>,
    /// Directly provided config (for testing without files).
    config: Option<PlayerConfig>,
    pause_on: Option<FxHashSet<NodeKind>>,
    ignore_invalid_branches: Option<bool>,
    max_depth: Option<usize>,
    seed: Option<u64>,
    start_on: Option<NodeId>,
}

impl FlowPlayer {
    pub fn builder() -> FlowPlayerBuilder {
        FlowPlayerBuilder::default()
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    /// Mutable graph access for live editing. Branches computed before an
    /// edit may become stale.
    pub fn graph_mut(&mut self) -> &mut FlowGraph {
        &mut self.graph
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// A fresh state for `store`, seeded from the config, with node
    /// properties taken from the graph.
    pub fn new_state(&self, store: VariableStore) -> FlowState {
        FlowState::with_seed(store, self.config.seed)
            .with_properties(NodeProperties::from_graph(&self.graph))
    }

    pub fn cursor(&self) -> Option<NodeId> {
        self.cursor
    }

    pub fn set_cursor(&mut self, node: NodeId) -> Result<(), FlowError> {
        self.graph.node(node)?;
        debug!(%node, "cursor set");
        self.cursor = Some(node);
        Ok(())
    }

    /// Branches reachable from `from`. Never mutates `state`.
    pub fn get_valid_branches(
        &self,
        state: &mut FlowState,
        from: NodeId,
    ) -> Result<BranchSet, FlowError> {
        let token = state.begin_shadow();
        let result = explore_branches(&self.graph, state, from, &self.config);
        state.discard_shadow(token)?;
        let mut set = result?;

        if self.config.ignore_invalid_branches {
            set.branches.retain(|branch| branch.is_valid);
            for (index, branch) in set.branches.iter_mut().enumerate() {
                branch.index = index;
            }
        }
        Ok(set)
    }

    /// Branches from the cursor.
    pub fn branches(&self, state: &mut FlowState) -> Result<BranchSet, FlowError> {
        let cursor = self.cursor.ok_or(FlowError::NoCursor)?;
        self.get_valid_branches(state, cursor)
    }

    /// Lookahead from any node, inside a layer that is always discarded.
    pub fn peek(&self, state: &mut FlowState, from: NodeId) -> Result<BranchSet, FlowError> {
        let token = state.begin_shadow();
        let result = self.get_valid_branches(state, from);
        state.discard_shadow(token)?;
        result
    }

    /// Take `branch`: replay its path against `state`, commit the effects
    /// and move the cursor to its target.
    ///
    /// The path is replayed inside its own layer. If anything along it no
    /// longer holds, the layer is discarded and `state` is unchanged.
    pub fn advance(&mut self, state: &mut FlowState, branch: &Branch) -> Result<(), FlowError> {
        let cursor = self.cursor.ok_or(FlowError::NoCursor)?;
        if branch.origin != cursor {
            return Err(FlowError::StaleBranch {
                origin: branch.origin,
                reason: format!("cursor is at {cursor}"),
            });
        }

        let token = state.begin_shadow();
        match self.replay(state, branch) {
            Ok(()) => state.commit_shadow(token)?,
            Err(err) => {
                state.discard_shadow(token)?;
                return Err(err);
            }
        }

        self.cursor = Some(branch.target);
        info!(from = %cursor, to = %branch.target, "advanced");
        Ok(())
    }

    /// Advance along the branch at `index` from the cursor.
    pub fn play(&mut self, state: &mut FlowState, index: usize) -> Result<Branch, FlowError> {
        let set = self.branches(state)?;
        let count = set.len();
        let branch = set
            .branches
            .into_iter()
            .nth(index)
            .ok_or(FlowError::BranchIndex { index, count })?;
        self.advance(state, &branch)?;
        Ok(branch)
    }

    fn replay(&self, state: &mut FlowState, branch: &Branch) -> Result<(), FlowError> {
        let stale = |reason: String| FlowError::StaleBranch {
            origin: branch.origin,
            reason,
        };

        for (i, step) in branch.path.iter().enumerate() {
            match *step {
                FlowRef::Pin(id) => {
                    let pin = self
                        .graph
                        .pin(id)
                        .map_err(|_| stale(format!("pin {id} is gone")))?;
                    let guard = pin.expression.as_deref().filter(|_| pin.has_guard());
                    if let (true, Some(text)) = (branch.is_valid, guard) {
                        if !evaluator::evaluate_condition(text, state)? {
                            return Err(stale(format!("guard on pin {id} no longer holds")));
                        }
                    }
                }
                FlowRef::Node(id) => {
                    let node = self
                        .graph
                        .node(id)
                        .map_err(|_| stale(format!("node {id} is gone")))?;
                    state.mark_seen(id);
                    if self.config.pause_on.contains(&node.kind) {
                        continue;
                    }
                    match node.kind {
                        NodeKind::Instruction => {
                            if let Some(text) = node.expression.as_deref() {
                                evaluator::execute_instruction(text, state)?;
                            }
                        }
                        NodeKind::Condition if node.outputs.len() == 2 => {
                            let passed = match node.expression.as_deref() {
                                Some(text) => evaluator::evaluate_condition(text, state)?,
                                None => true,
                            };
                            let route = if passed { 0 } else { 1 };
                            let expected = Some(FlowRef::Pin(node.outputs[route].id));
                            let next = branch.path.get(i + 1).copied();
                            if next.is_some() && next != expected {
                                return Err(stale(format!("condition {id} now routes elsewhere")));
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    // Speculation sessions: nested "what if" scopes over the state and cursor.

    /// Open a speculation layer. Advances made until it is released land in
    /// that layer only.
    pub fn begin_speculation(&mut self, state: &mut FlowState) -> ShadowToken {
        let token = state.begin_shadow();
        self.speculations.push(Speculation {
            token,
            cursor: self.cursor,
        });
        token
    }

    /// Keep everything done since the matching `begin_speculation`.
    pub fn commit_speculation(&mut self, state: &mut FlowState) -> Result<(), FlowError> {
        let top = self.speculations.last().ok_or(FlowError::NoSpeculation)?;
        state.commit_shadow(top.token)?;
        self.speculations.pop();
        Ok(())
    }

    /// Drop everything done since the matching `begin_speculation`,
    /// including cursor moves.
    pub fn discard_speculation(&mut self, state: &mut FlowState) -> Result<(), FlowError> {
        let top = *self.speculations.last().ok_or(FlowError::NoSpeculation)?;
        state.discard_shadow(top.token)?;
        self.speculations.pop();
        self.cursor = top.cursor;
        Ok(())
    }

    pub fn speculation_depth(&self) -> usize {
        self.speculations.len()
    }
}

impl FlowPlayerBuilder {
    pub fn graph_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.graph_path = Some(path.into());
        self
    }

    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Provide the graph directly (for testing without files).
    pub fn with_graph(mut self, graph: FlowGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Provide the config directly (for testing without files).
    pub fn with_config(mut self, config: PlayerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn pause_on(mut self, kinds: &[NodeKind]) -> Self {
        self.pause_on = Some(kinds.iter().copied().collect());
        self
    }

    pub fn ignore_invalid_branches(mut self, ignore: bool) -> Self {
        self.ignore_invalid_branches = Some(ignore);
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn start_on(mut self, node: NodeId) -> Self {
        self.start_on = Some(node);
        self
    }

    pub fn build(self) -> Result<FlowPlayer, FlowError> {
        // Explicit values win over files.
        let graph = match (self.graph, &self.graph_path) {
            (Some(graph), _) => graph,
            (None, Some(path)) => FlowGraph::load_from_ron(path)?,
            (None, None) => FlowGraph::new(),
        };
        let mut config = match (self.config, &self.config_path) {
            (Some(config), _) => config,
            (None, Some(path)) => PlayerConfig::load_from_ron(path)?,
            (None, None) => PlayerConfig::default(),
        };

        if let Some(pause_on) = self.pause_on {
            config.pause_on = pause_on;
        }
        if let Some(ignore) = self.ignore_invalid_branches {
            config.ignore_invalid_branches = ignore;
        }
        if let Some(depth) = self.max_depth {
            config.max_depth = depth;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }

        let mut player = FlowPlayer {
            graph,
            config,
            cursor: None,
            speculations: Vec::new(),
        };
        if let Some(start) = self.start_on {
            player.set_cursor(start)?;
        }
        Ok(player)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::StoreView;
    use crate::schema::variable::{GvName, Value};

    const GRAPH: &str = r#"[
        (id: 1, kind: Dialogue, outputs: [(id: 10, connections: [20])]),
        (id: 2, kind: Instruction, expression: "Quest.Stage += 1",
         inputs: [(id: 20)], outputs: [(id: 21, connections: [30])]),
        (id: 3, kind: Dialogue, inputs: [(id: 30)], outputs: [(id: 31, connections: [40])]),
        (id: 4, kind: DialogueFragment, inputs: [(id: 40, expression: "Quest.Stage > 5")]),
    ]"#;

    fn stage() -> GvName {
        GvName::new("Quest", "Stage")
    }

    fn make_player() -> (FlowPlayer, FlowState) {
        let graph = FlowGraph::parse_ron(GRAPH).unwrap();
        let player = FlowPlayer::builder()
            .with_graph(graph)
            .start_on(NodeId(1))
            .build()
            .unwrap();
        let mut store = VariableStore::new();
        store.declare(&stage(), Value::Int(0)).unwrap();
        let state = player.new_state(store);
        (player, state)
    }

    #[test]
    fn config_defaults_and_ron() {
        let config = PlayerConfig::default();
        assert!(config.pause_on.contains(&NodeKind::Dialogue));
        assert!(config.ignore_invalid_branches);
        assert_eq!(config.max_depth, 128);

        let parsed = PlayerConfig::parse_ron("(pause_on: [Hub], seed: 9)").unwrap();
        assert_eq!(parsed.pause_on.len(), 1);
        assert!(parsed.ignore_invalid_branches);
        assert_eq!(parsed.seed, 9);
    }

    #[test]
    fn builder_overrides_config() {
        let player = FlowPlayer::builder()
            .with_config(PlayerConfig::default())
            .pause_on(&[NodeKind::Hub])
            .ignore_invalid_branches(false)
            .max_depth(4)
            .seed(3)
            .build()
            .unwrap();
        assert_eq!(player.config().max_depth, 4);
        assert!(!player.config().ignore_invalid_branches);
        assert!(player.config().pause_on.contains(&NodeKind::Hub));
        assert_eq!(player.config().seed, 3);
        assert!(player.cursor().is_none());
    }

    #[test]
    fn start_on_missing_node_fails() {
        let result = FlowPlayer::builder().start_on(NodeId(99)).build();
        assert!(matches!(
            result,
            Err(FlowError::Graph(GraphError::NodeNotFound(_)))
        ));
    }

    #[test]
    fn play_commits_instruction_effects() {
        let (mut player, mut state) = make_player();
        let branch = player.play(&mut state, 0).unwrap();
        assert_eq!(branch.target, NodeId(3));
        assert_eq!(player.cursor(), Some(NodeId(3)));
        assert_eq!(state.value(&stage()).unwrap(), &Value::Int(1));
        assert_eq!(state.shadow_level(), 0);
        assert_eq!(state.seen_counter(NodeId(2)), 1);
        assert_eq!(state.seen_counter(NodeId(3)), 1);
    }

    #[test]
    fn invalid_branches_filtered_or_kept() {
        let (mut player, mut state) = make_player();
        player.set_cursor(NodeId(3)).unwrap();
        assert!(player.branches(&mut state).unwrap().is_empty());

        let mut lenient = FlowPlayer::builder()
            .with_graph(player.graph().clone())
            .ignore_invalid_branches(false)
            .start_on(NodeId(3))
            .build()
            .unwrap();
        let set = lenient.branches(&mut state).unwrap();
        assert_eq!(set.len(), 1);
        assert!(!set.branches[0].is_valid);
        lenient.play(&mut state, 0).unwrap();
        assert_eq!(lenient.cursor(), Some(NodeId(4)));
    }

    #[test]
    fn stale_branch_rejected() {
        let (mut player, mut state) = make_player();
        let set = player.branches(&mut state).unwrap();
        player.set_cursor(NodeId(3)).unwrap();
        assert!(matches!(
            player.advance(&mut state, &set.branches[0]),
            Err(FlowError::StaleBranch { .. })
        ));
        assert_eq!(state.value(&stage()).unwrap(), &Value::Int(0));
    }

    #[test]
    fn branch_index_out_of_range() {
        let (mut player, mut state) = make_player();
        assert!(matches!(
            player.play(&mut state, 3),
            Err(FlowError::BranchIndex { index: 3, count: 1 })
        ));
    }

    #[test]
    fn speculation_restores_cursor_and_state() {
        let (mut player, mut state) = make_player();
        player.begin_speculation(&mut state);
        player.play(&mut state, 0).unwrap();
        assert_eq!(state.value(&stage()).unwrap(), &Value::Int(1));
        assert_eq!(
            state.committed_variables().value(&stage()).unwrap(),
            &Value::Int(0)
        );
        player.discard_speculation(&mut state).unwrap();
        assert_eq!(player.cursor(), Some(NodeId(1)));
        assert_eq!(state.value(&stage()).unwrap(), &Value::Int(0));

        player.begin_speculation(&mut state);
        player.play(&mut state, 0).unwrap();
        player.commit_speculation(&mut state).unwrap();
        assert_eq!(player.cursor(), Some(NodeId(3)));
        assert_eq!(
            state.committed_variables().value(&stage()).unwrap(),
            &Value::Int(1)
        );
        assert!(matches!(
            player.commit_speculation(&mut state),
            Err(FlowError::NoSpeculation)
        ));
    }
}
