//! Plain data exchanged with the import layer and with callers.

pub mod branch;
pub mod node;
pub mod variable;
