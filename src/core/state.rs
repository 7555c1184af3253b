//! Runtime state bundle: everything a traversal may mutate, shadowed together.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;
use std::fmt;
use tracing::debug;

use crate::core::properties::NodeProperties;
use crate::core::shadow::{ShadowError, ShadowToken, Shadowable, Shadowed};
use crate::core::store::{StoreError, StoreView, VariableStore};
use crate::schema::node::NodeId;
use crate::schema::variable::{GvName, Value};

/// Seeded random source for the script `random` builtin.
///
/// Lives in the shadowed state so that draws made during exploration are
/// rolled back with everything else.
#[derive(Debug, Clone)]
pub struct ScriptRng(StdRng);

impl ScriptRng {
    pub fn seeded(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }

    /// Uniform draw from `low..=high`. Callers ensure `low <= high`.
    pub fn range_inclusive(&mut self, low: i64, high: i64) -> i64 {
        self.0.gen_range(low..=high)
    }
}

impl Default for ScriptRng {
    fn default() -> Self {
        Self::seeded(0)
    }
}

impl Shadowable for ScriptRng {}

/// How many times each node has been entered.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SeenCounters {
    counts: FxHashMap<NodeId, u32>,
}

impl SeenCounters {
    pub fn get(&self, node: NodeId) -> u32 {
        self.counts.get(&node).copied().unwrap_or(0)
    }

    pub fn set(&mut self, node: NodeId, count: u32) {
        if count == 0 {
            self.counts.remove(&node);
        } else {
            self.counts.insert(node, count);
        }
    }

    pub fn increment(&mut self, node: NodeId) -> u32 {
        let count = self.counts.entry(node).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn reset(&mut self) {
        self.counts.clear();
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

impl Shadowable for SeenCounters {}

impl Shadowable for VariableStore {
    fn absorb(&mut self, shadow: Self) {
        // Same declarations on both sides; only values can differ.
        for (name, value) in shadow.entries() {
            let changed = VariableStore::value(self, &name).map_or(true, |old| *old != value);
            if changed {
                if let Err(err) = self.set(&name, value) {
                    debug!(%err, "skipping shadow write-back");
                }
            }
        }
    }
}

/// Callback for committed variable changes.
pub type VariableListener = Box<dyn FnMut(&GvName, &Value)>;

#[derive(Default)]
struct Listeners(Vec<VariableListener>);

impl Listeners {
    fn notify(&mut self, name: &GvName, value: &Value) {
        for listener in &mut self.0 {
            listener(name, value);
        }
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} listener(s)", self.0.len())
    }
}

/// All mutable narrative state, with one shared shadow stack.
///
/// `begin_shadow` pushes a layer on every member at once and the returned
/// token releases all of them together.
///
/// Variable listeners only ever see committed state: a direct write with no
/// layer open, or a value that changed when the bottom layer commits.
#[derive(Debug)]
pub struct FlowState {
    variables: Shadowed<VariableStore>,
    seen: Shadowed<SeenCounters>,
    rng: Shadowed<ScriptRng>,
    properties: Shadowed<NodeProperties>,
    listeners: Listeners,
    next_token: u64,
}

impl FlowState {
    pub fn new(store: VariableStore) -> Self {
        Self::with_seed(store, 0)
    }

    pub fn with_seed(store: VariableStore, seed: u64) -> Self {
        Self {
            variables: Shadowed::new(store),
            seen: Shadowed::new(SeenCounters::default()),
            rng: Shadowed::new(ScriptRng::seeded(seed)),
            properties: Shadowed::new(NodeProperties::default()),
            listeners: Listeners::default(),
            next_token: 1,
        }
    }

    /// Replace the node properties. Layers already open start clean over them.
    pub fn with_properties(mut self, properties: NodeProperties) -> Self {
        let mut shadowed = Shadowed::new(properties);
        for layer in self.variables.layers() {
            shadowed.begin(layer.token());
        }
        self.properties = shadowed;
        self
    }

    /// Register a callback for committed variable changes.
    pub fn on_variable_changed(&mut self, listener: impl FnMut(&GvName, &Value) + 'static) {
        self.listeners.0.push(Box::new(listener));
    }

    pub fn shadow_level(&self) -> usize {
        self.variables.level()
    }

    pub fn is_shadowed(&self) -> bool {
        self.shadow_level() > 0
    }

    pub fn begin_shadow(&mut self) -> ShadowToken {
        let token = ShadowToken {
            id: self.next_token,
            level: self.shadow_level() + 1,
        };
        self.next_token += 1;
        self.variables.begin(token);
        self.seen.begin(token);
        self.rng.begin(token);
        self.properties.begin(token);
        debug!(%token, "begin shadow");
        token
    }

    fn check_top(&self, token: ShadowToken) -> Result<(), ShadowError> {
        self.variables.check_top(token)?;
        self.seen.check_top(token)?;
        self.rng.check_top(token)?;
        self.properties.check_top(token)
    }

    /// Write the layer's changes one level down and pop it.
    pub fn commit_shadow(&mut self, token: ShadowToken) -> Result<(), ShadowError> {
        self.check_top(token)?;
        let changes = if token.level == 1 {
            self.pending_changes()
        } else {
            Vec::new()
        };
        self.variables.commit(token)?;
        self.seen.commit(token)?;
        self.rng.commit(token)?;
        self.properties.commit(token)?;
        for (name, value) in &changes {
            self.listeners.notify(name, value);
        }
        Ok(())
    }

    /// Values that differ between the visible and the real store.
    fn pending_changes(&self) -> Vec<(GvName, Value)> {
        let committed = self.variables.original();
        self.variables
            .current()
            .entries()
            .into_iter()
            .filter(|(name, value)| committed.value(name).map_or(true, |old| old != value))
            .collect()
    }

    /// Pop the layer, dropping its changes.
    pub fn discard_shadow(&mut self, token: ShadowToken) -> Result<(), ShadowError> {
        self.check_top(token)?;
        self.variables.discard(token)?;
        self.seen.discard(token)?;
        self.rng.discard(token)?;
        self.properties.discard(token)
    }

    /// Variables as seen through the open layers.
    pub fn variables(&self) -> &VariableStore {
        self.variables.current()
    }

    /// The real store, ignoring open layers.
    pub fn committed_variables(&self) -> &VariableStore {
        self.variables.original()
    }

    /// Direct access to the real store, for non-speculative changes such
    /// as loading a save game. Listeners are not notified.
    pub fn variables_mut(&mut self) -> Result<&mut VariableStore, ShadowError> {
        self.variables.original_mut()
    }

    /// Node properties as seen through the open layers.
    pub fn properties(&self) -> &NodeProperties {
        self.properties.current()
    }

    pub fn committed_properties(&self) -> &NodeProperties {
        self.properties.original()
    }

    pub fn seen(&self) -> &SeenCounters {
        self.seen.current()
    }

    pub fn committed_seen(&self) -> &SeenCounters {
        self.seen.original()
    }

    pub fn mark_seen(&mut self, node: NodeId) -> u32 {
        self.seen.current_mut().increment(node)
    }

    pub fn into_variables(self) -> VariableStore {
        self.variables.into_original()
    }
}

impl StoreView for FlowState {
    fn value(&self, name: &GvName) -> Result<&Value, StoreError> {
        self.variables.current().value(name)
    }

    fn set_value(&mut self, name: &GvName, value: Value) -> Result<(), StoreError> {
        // Validate before touching the layer so a failed write makes no copy.
        let current = self.variables.current();
        current.check_set(name, &value)?;
        if self.is_shadowed() {
            return self.variables.current_mut().set(name, value);
        }
        let changed = current.value(name).map_or(true, |old| *old != value);
        self.variables.current_mut().set(name, value.clone())?;
        if changed {
            self.listeners.notify(name, &value);
        }
        Ok(())
    }

    fn check_value(&self, name: &GvName, value: &Value) -> Result<(), StoreError> {
        self.variables.current().check_set(name, value)
    }

    fn seen_counter(&self, node: NodeId) -> u32 {
        self.seen.current().get(node)
    }

    fn set_seen_counter(&mut self, node: NodeId, count: u32) {
        self.seen.current_mut().set(node, count);
    }

    fn reset_seen_counters(&mut self) {
        self.seen.current_mut().reset();
    }

    fn rng(&self) -> Option<&ScriptRng> {
        Some(self.rng.current())
    }

    fn replace_rng(&mut self, rng: ScriptRng) {
        *self.rng.current_mut() = rng;
    }

    fn node_property(&self, node: NodeId, property: &str) -> Result<&Value, StoreError> {
        self.properties.current().get(node, property)
    }

    fn check_node_property(
        &self,
        node: NodeId,
        property: &str,
        value: &Value,
    ) -> Result<(), StoreError> {
        self.properties.current().check_set(node, property, value)
    }

    fn set_node_property(
        &mut self,
        node: NodeId,
        property: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        self.properties.current().check_set(node, property, &value)?;
        self.properties.current_mut().set(node, property, value)
    }
}
