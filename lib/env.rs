//! Cached partial contractions of a sandwich of chains.
//!
//! For a two-site update on bond `b` (sites `b` and `b + 1`), the left
//! environment is the contraction of everything at sites `0..b` and the right
//! environment is the contraction of everything at sites `b + 2..n`. Both are
//! stored in one array indexed by the last site they absorbed:
//!
//! ```text
//!   slot:   0     1    ...   b-1  | b   b+1 |  b+2  ...  n-1
//!          [-- left(b) = E[b-1] --]          [-- right(b) = E[b+2] --]
//! ```
//!
//! A left environment is grown one site at a time going right and a right
//! environment going left, so a single slot array serves both sides as long as
//! a slot is only read after it was last written for the side being read.

use log::trace;
use crate::tensor::{ Tensor, TensorResult };

/// Per-call cache of environment tensors; see the module-level docs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Environments {
    slots: Vec<Option<Tensor>>,
}

impl Environments {
    /// Create an empty cache for a chain of `n` sites.
    pub fn new(n: usize) -> Self { Self { slots: vec![None; n] } }

    pub fn len(&self) -> usize { self.slots.len() }

    pub fn is_empty(&self) -> bool { self.slots.is_empty() }

    /// Entry for `site`, if set.
    pub fn get(&self, site: usize) -> Option<&Tensor> {
        self.slots.get(site).and_then(Option::as_ref)
    }

    /// Overwrite the entry for `site`.
    ///
    /// *Panics* if `site` is out of bounds.
    pub fn set(&mut self, site: usize, t: Tensor) {
        trace!("environment {site}: rank {}", t.rank());
        self.slots[site] = Some(t);
    }

    /// Left environment of bond `b`, absent at the left end.
    pub fn left(&self, b: usize) -> Option<&Tensor> {
        b.checked_sub(1).and_then(|k| self.get(k))
    }

    /// Right environment of bond `b`, absent at the right end.
    pub fn right(&self, b: usize) -> Option<&Tensor> { self.get(b + 2) }
}

/// Absorb `t` into an environment, or start one from `t`.
pub fn grow(env: Option<&Tensor>, t: &Tensor) -> TensorResult<Tensor> {
    match env {
        Some(e) => e.contract(t),
        None => Ok(t.clone()),
    }
}
