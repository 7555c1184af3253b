//! Narrative Flow — branch exploration over exported narrative flow graphs.
//!
//! Walks a graph of dialogue, hub, condition, instruction and jump nodes to
//! find the branches a player can take, running condition and instruction
//! scripts against a typed variable store. Lookahead runs inside
//! copy-on-write shadow layers, so previewing a branch never changes the
//! state a game observes; only `FlowPlayer::advance` commits.

pub mod core;
pub mod schema;

pub use crate::core::graph::{FlowGraph, GraphError};
pub use crate::core::player::{FlowError, FlowPlayer, PlayerConfig};
pub use crate::core::properties::NodeProperties;
pub use crate::core::state::FlowState;
pub use crate::core::store::{StoreError, StoreView, VariableStore};
pub use crate::schema::branch::{Branch, BranchSet};
pub use crate::schema::node::{NodeId, NodeKind, PinId};
pub use crate::schema::variable::{GvName, Value};
