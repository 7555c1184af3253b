//! Depth-first branch computation.
//!
//! Exploration writes to whatever shadow layer is on top of the state when
//! it starts; `FlowPlayer` opens one around every call. Inside, each fork
//! gets its own nested layer so sibling branches never see each other's
//! instruction effects.

use tracing::{debug, warn};

use crate::core::evaluator;
use crate::core::graph::{FlowGraph, GraphError};
use crate::core::player::{FlowError, PlayerConfig};
use crate::core::state::FlowState;
use crate::schema::branch::{Branch, BranchSet, FlowRef, SkipReason, SkippedBranch};
use crate::schema::node::{Connection, FlowNode, NodeId, NodeKind, Pin};

/// Collect every branch reachable from `origin`.
///
/// Dangling connections, dangling jump targets, malformed jump nodes
/// and paths beyond `config.max_depth` are pruned and reported in
/// `BranchSet::skipped`. Script errors abort the call.
pub fn explore_branches(
    graph: &FlowGraph,
    state: &mut FlowState,
    origin: NodeId,
    config: &PlayerConfig,
) -> Result<BranchSet, FlowError> {
    let node = graph.node(origin)?;
    let mut explorer = Explorer {
        graph,
        config,
        origin,
        path: Vec::new(),
        depth: 0,
        valid: true,
        out: BranchSet::default(),
    };
    explorer.leave(node, state)?;
    debug!(
        %origin,
        branches = explorer.out.branches.len(),
        skipped = explorer.out.skipped.len(),
        "explored"
    );
    Ok(explorer.out)
}

struct Explorer<'g> {
    graph: &'g FlowGraph,
    config: &'g PlayerConfig,
    origin: NodeId,
    path: Vec<FlowRef>,
    /// Nodes on `path`.
    depth: usize,
    /// False once a pin guard on the current path failed.
    valid: bool,
    out: BranchSet,
}

impl<'g> Explorer<'g> {
    fn emit(&mut self, target: NodeId) {
        debug!(origin = %self.origin, %target, valid = self.valid, "branch");
        self.out.branches.push(Branch {
            index: self.out.branches.len(),
            origin: self.origin,
            target,
            path: self.path.clone(),
            is_valid: self.valid,
        });
    }

    fn skip(&mut self, reason: SkipReason) {
        warn!(origin = %self.origin, ?reason, "pruned branch");
        self.out.skipped.push(SkippedBranch {
            origin: self.origin,
            path: self.path.clone(),
            reason,
        });
    }

    fn on_path(&self, node: NodeId) -> bool {
        node == self.origin || self.path.contains(&FlowRef::Node(node))
    }

    fn check_guard(&mut self, pin: &Pin, state: &FlowState) -> Result<(), FlowError> {
        let Some(text) = pin.expression.as_deref().filter(|_| pin.has_guard()) else {
            return Ok(());
        };
        if !evaluator::evaluate_condition(text, state)? {
            self.valid = false;
        }
        Ok(())
    }

    fn enter(&mut self, node: &'g FlowNode, state: &mut FlowState) -> Result<(), FlowError> {
        if self.config.pause_on.contains(&node.kind) {
            self.path.push(FlowRef::Node(node.id));
            self.emit(node.id);
            self.path.pop();
            return Ok(());
        }

        if self.on_path(node.id) {
            debug!(node = %node.id, "cycle pruned");
            return Ok(());
        }

        // Only pass-through nodes count towards the limit.
        if self.depth >= self.config.max_depth {
            self.skip(SkipReason::DepthLimit {
                node: node.id,
                depth: self.depth,
            });
            return Ok(());
        }

        self.path.push(FlowRef::Node(node.id));
        self.depth += 1;
        state.mark_seen(node.id);

        let result = self.pass_through(node, state);

        self.depth -= 1;
        self.path.pop();
        result
    }

    fn pass_through(&mut self, node: &'g FlowNode, state: &mut FlowState) -> Result<(), FlowError> {
        if node.kind == NodeKind::Instruction {
            if let Some(text) = node.expression.as_deref() {
                evaluator::execute_instruction(text, state)?;
            }
        }
        self.leave(node, state)
    }

    /// Continue out of `node` according to its kind.
    fn leave(&mut self, node: &'g FlowNode, state: &mut FlowState) -> Result<(), FlowError> {
        let pins: &'g [Pin] = match node.kind {
            NodeKind::Jump => return self.jump(node, state),
            NodeKind::Condition if node.outputs.len() == 2 => {
                let passed = match node.expression.as_deref() {
                    Some(text) => evaluator::evaluate_condition(text, state)?,
                    None => true,
                };
                let route = if passed { 0 } else { 1 };
                std::slice::from_ref(&node.outputs[route])
            }
            NodeKind::Condition => {
                // No true/false pair to route on: every output is a candidate.
                debug!(
                    node = %node.id,
                    outputs = node.outputs.len(),
                    "condition without two outputs"
                );
                &node.outputs
            }
            _ => &node.outputs,
        };

        let candidates: Vec<(&'g Pin, &'g Connection)> = pins
            .iter()
            .flat_map(|pin| pin.connections.iter().map(move |conn| (pin, conn)))
            .collect();

        if candidates.is_empty() {
            // Dead end. The origin itself is never its own branch.
            if node.id != self.origin {
                self.emit(node.id);
            }
            return Ok(());
        }

        if candidates.len() == 1 {
            let (pin, conn) = candidates[0];
            return self.follow(pin, conn, state);
        }

        for (pin, conn) in candidates {
            let token = state.begin_shadow();
            let result = self.follow(pin, conn, state);
            let released = state.discard_shadow(token);
            result?;
            released?;
        }
        Ok(())
    }

    fn follow(
        &mut self,
        out: &'g Pin,
        conn: &'g Connection,
        state: &mut FlowState,
    ) -> Result<(), FlowError> {
        let valid = self.valid;
        self.path.push(FlowRef::Pin(out.id));
        let result = self.cross(out, conn, state);
        self.path.pop();
        self.valid = valid;
        result
    }

    fn cross(
        &mut self,
        out: &'g Pin,
        conn: &'g Connection,
        state: &mut FlowState,
    ) -> Result<(), FlowError> {
        self.check_guard(out, state)?;

        let input = match self.graph.resolve_connection(conn) {
            Ok(pin) => pin,
            Err(_) => {
                self.skip(SkipReason::Dangling {
                    source: conn.source,
                    target: conn.target,
                });
                return Ok(());
            }
        };
        let owner = self.graph.node(input.owner)?;

        self.path.push(FlowRef::Pin(input.id));
        let result = self
            .check_guard(input, state)
            .and_then(|()| self.enter(owner, state));
        self.path.pop();
        result
    }

    fn jump(&mut self, node: &'g FlowNode, state: &mut FlowState) -> Result<(), FlowError> {
        let (target, pin) = match self.graph.jump_target(node) {
            Ok(found) => found,
            Err(GraphError::DanglingTarget { jump, target }) => {
                self.skip(SkipReason::DanglingTarget { jump, target });
                return Ok(());
            }
            Err(err) => {
                self.skip(SkipReason::Malformed {
                    node: node.id,
                    reason: err.to_string(),
                });
                return Ok(());
            }
        };

        let Some(pin) = pin else {
            return self.enter(target, state);
        };
        let valid = self.valid;
        self.path.push(FlowRef::Pin(pin.id));
        let result = self
            .check_guard(pin, state)
            .and_then(|()| self.enter(target, state));
        self.path.pop();
        self.valid = valid;
        result
    }
}
