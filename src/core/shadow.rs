//! Copy-on-write shadow layers over arbitrary state.
//!
//! A `Shadowed<T>` owns the real value and a stack of layers. Readers see the
//! topmost materialized copy (or the original). The first write inside a
//! layer clones the visible state into that layer; nothing below it changes
//! until the layer is committed.

use std::fmt;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShadowError {
    #[error("shadow stack order violated: {token} is not the top layer (top is {})", display_top(.top))]
    StackOrderViolation {
        token: ShadowToken,
        top: Option<ShadowToken>,
    },
    #[error("cannot mutate original state directly while {level} shadow layer(s) are open")]
    ShadowActive { level: usize },
}

fn display_top(top: &Option<ShadowToken>) -> String {
    match top {
        Some(token) => token.to_string(),
        None => "none".to_string(),
    }
}

/// Identifies one shadow layer. Tokens are never reused within a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShadowToken {
    pub id: u64,
    /// 1-based depth of the layer when it was created.
    pub level: usize,
}

impl fmt::Display for ShadowToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer #{} (level {})", self.id, self.level)
    }
}

/// State that can live under shadow layers.
pub trait Shadowable: Clone {
    /// Write a committed shadow copy back into `self`.
    ///
    /// `shadow` started as a clone of `self`, so replacing wholesale is
    /// always correct; implementors may write back field by field instead.
    fn absorb(&mut self, shadow: Self) {
        *self = shadow;
    }
}

/// One speculative layer. `copy` is created on first write.
#[derive(Debug, Clone)]
pub struct ShadowLayer<T> {
    token: ShadowToken,
    copy: Option<T>,
}

impl<T> ShadowLayer<T> {
    pub fn token(&self) -> ShadowToken {
        self.token
    }

    pub fn is_dirty(&self) -> bool {
        self.copy.is_some()
    }
}

/// An original value plus its stack of shadow layers.
#[derive(Debug, Clone)]
pub struct Shadowed<T: Shadowable> {
    original: T,
    layers: Vec<ShadowLayer<T>>,
}

impl<T: Shadowable> Shadowed<T> {
    pub fn new(original: T) -> Self {
        Self {
            original,
            layers: Vec::new(),
        }
    }

    /// Number of open layers.
    pub fn level(&self) -> usize {
        self.layers.len()
    }

    pub fn top(&self) -> Option<ShadowToken> {
        self.layers.last().map(|layer| layer.token)
    }

    pub fn layers(&self) -> &[ShadowLayer<T>] {
        &self.layers
    }

    /// The real, externally observable value. Unaffected by open layers.
    pub fn original(&self) -> &T {
        &self.original
    }

    /// Mutable access to the real value; refused while any layer is open.
    pub fn original_mut(&mut self) -> Result<&mut T, ShadowError> {
        if !self.layers.is_empty() {
            return Err(ShadowError::ShadowActive {
                level: self.layers.len(),
            });
        }
        Ok(&mut self.original)
    }

    /// Consume the wrapper, dropping any open layers.
    pub fn into_original(self) -> T {
        self.original
    }

    /// Push a new layer. No copy is made until the first write.
    pub fn begin(&mut self, token: ShadowToken) {
        self.layers.push(ShadowLayer { token, copy: None });
    }

    /// The value readers see: the topmost materialized copy, else the original.
    pub fn current(&self) -> &T {
        self.layers
            .iter()
            .rev()
            .find_map(|layer| layer.copy.as_ref())
            .unwrap_or(&self.original)
    }

    /// Writable view of the top layer, materializing its copy if needed.
    /// Without open layers this is the original.
    pub fn current_mut(&mut self) -> &mut T {
        let Self { original, layers } = self;
        match layers.split_last_mut() {
            None => original,
            Some((top, below)) => {
                let token = top.token;
                top.copy.get_or_insert_with(|| {
                    trace!(%token, "materializing shadow copy");
                    below
                        .iter()
                        .rev()
                        .find_map(|layer| layer.copy.as_ref())
                        .unwrap_or(&*original)
                        .clone()
                })
            }
        }
    }

    /// Fail unless `token` is the top layer.
    pub fn check_top(&self, token: ShadowToken) -> Result<(), ShadowError> {
        let top = self.top();
        if top != Some(token) {
            return Err(ShadowError::StackOrderViolation { token, top });
        }
        Ok(())
    }

    /// Flatten the top layer into the one beneath it (or the original).
    pub fn commit(&mut self, token: ShadowToken) -> Result<(), ShadowError> {
        self.check_top(token)?;
        let Some(layer) = self.layers.pop() else {
            return Err(ShadowError::StackOrderViolation { token, top: None });
        };
        let Some(copy) = layer.copy else {
            debug!(%token, "committed clean shadow layer");
            return Ok(());
        };
        match self.layers.last_mut() {
            Some(below) => match below.copy.as_mut() {
                Some(below_copy) => below_copy.absorb(copy),
                // The layer beneath never wrote, so this copy is exactly its
                // visible state plus our writes.
                None => below.copy = Some(copy),
            },
            None => self.original.absorb(copy),
        }
        debug!(%token, "committed shadow layer");
        Ok(())
    }

    /// Drop the top layer and everything written in it.
    pub fn discard(&mut self, token: ShadowToken) -> Result<(), ShadowError> {
        self.check_top(token)?;
        self.layers.pop();
        debug!(%token, "discarded shadow layer");
        Ok(())
    }
}
