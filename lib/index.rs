//! Tensor indices with a value identity, a dimension, a role, and two levels
//! of disambiguation.
//!
//! An [`Index`] is compared by value: two indices are the same contraction leg
//! if and only if they carry the same identity, prime level, and layer. The
//! identity is a random 64-bit number drawn when the index is created, so
//! indices made independently never collide in practice; copies made by
//! [`Index::prime`] and friends keep the identity and differ only in level.
//!
//! The prime level is the user-visible level. An MPO tensor, for instance,
//! carries its input site index at level 0 and its output site index at level
//! 1. The *layer* is a separate namespace reserved for algorithms that need to
//! build bra/ket pairs out of the same chain without accidentally joining legs
//! that should stay apart:
//!
//! ```text
//!   Layer::Ket     -- everything a user ever constructs
//!   Layer::Bra     -- conjugated copies used to close an overlap
//!   Layer::Aux(k)  -- scratch copies used while two chains are merged
//! ```
//!
//! Only code inside this crate can move an index between layers, so there is
//! no prime level a caller can pick that would alias an internal copy.

use std::fmt;
use rand::Rng;

/// The role an index plays in a chain.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    /// Physical degree of freedom of a single lattice site.
    Site,
    /// Virtual bond between two neighboring tensors of a chain.
    Link,
}

/// Internal disambiguation namespace; see the module-level docs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Layer {
    Ket,
    Bra,
    Aux(u8),
}

/// A tensor index.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Index {
    id: u64,
    dim: usize,
    role: Role,
    plev: u32,
    layer: Layer,
}

impl Index {
    fn with_role(dim: usize, role: Role) -> Self {
        let id: u64 = rand::thread_rng().gen();
        Self { id, dim, role, plev: 0, layer: Layer::Ket }
    }

    /// Create a new site index of dimension `dim` at prime level 0.
    pub fn site(dim: usize) -> Self { Self::with_role(dim, Role::Site) }

    /// Create a new link index of dimension `dim` at prime level 0.
    pub fn link(dim: usize) -> Self { Self::with_role(dim, Role::Link) }

    /// Create an index with the same role, prime level, and layer as `self`,
    /// but with a fresh identity and dimension `dim`.
    pub fn sim(&self, dim: usize) -> Self {
        Self::with_role(dim, self.role)
            .with_plev(self.plev)
            .with_layer(self.layer)
    }

    pub fn id(&self) -> u64 { self.id }

    pub fn dim(&self) -> usize { self.dim }

    pub fn role(&self) -> Role { self.role }

    pub fn plev(&self) -> u32 { self.plev }

    pub fn layer(&self) -> Layer { self.layer }

    pub fn is_site(&self) -> bool { self.role == Role::Site }

    pub fn is_link(&self) -> bool { self.role == Role::Link }

    /// Return `true` if `self` and `other` share an identity, regardless of
    /// level or layer.
    pub fn same_id(&self, other: &Self) -> bool { self.id == other.id }

    /// Return a copy with prime level raised by one.
    pub fn prime(&self) -> Self { self.clone().with_plev(self.plev + 1) }

    /// Return a copy at prime level 0.
    pub fn noprime(&self) -> Self { self.clone().with_plev(0) }

    /// Return a copy at prime level `plev`.
    pub fn with_plev(mut self, plev: u32) -> Self {
        self.plev = plev;
        self
    }

    pub(crate) fn with_layer(mut self, layer: Layer) -> Self {
        self.layer = layer;
        self
    }

    pub(crate) fn bra(&self) -> Self { self.clone().with_layer(Layer::Bra) }

    pub(crate) fn ket(&self) -> Self { self.clone().with_layer(Layer::Ket) }

    pub(crate) fn set_plev(&mut self, plev: u32) { self.plev = plev; }

    pub(crate) fn set_layer(&mut self, layer: Layer) { self.layer = layer; }

    /// Short human-readable label, e.g. `s#3fa2'` for a primed site index.
    pub fn label(&self) -> String {
        let tag = match self.role {
            Role::Site => 's',
            Role::Link => 'l',
        };
        let layer = match self.layer {
            Layer::Ket => String::new(),
            Layer::Bra => "~".to_string(),
            Layer::Aux(k) => format!("@{k}"),
        };
        let primes = "'".repeat(self.plev as usize);
        format!("{}#{:04x}{}{}", tag, self.id & 0xffff, layer, primes)
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.label(), self.dim)
    }
}

/// Return `true` if no two elements of `idxs` are equal.
pub(crate) fn is_unique(idxs: &[Index]) -> bool {
    idxs.iter().enumerate()
        .all(|(k, idx)| !idxs[k + 1..].contains(idx))
}
