//! Runtime: variable state, shadowing, scripts, graph, and the flow player.

pub mod evaluator;
pub mod explore;
pub mod graph;
pub mod player;
pub mod properties;
pub mod script;
pub mod shadow;
pub mod state;
pub mod store;
