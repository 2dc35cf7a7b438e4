//! Matrix product states and operators as chains of [`Tensor`]s.
//!
//! A [`Chain`] is an ordered, non-empty sequence of tensors in which every
//! pair of neighbors shares exactly one link index. A state ([`Mps`]) carries
//! one site index per tensor; an operator ([`Mpo`]) carries two, its input at
//! prime level 0 and its output at prime level 1.
//!
//! ```text
//!         .-link 0-.     .-link 1-.          .-link n-2-.
//!         V        V     V        V          V          V
//! MPS:  A[0] ------- A[1] ------- ... ------- A[n-1]
//!        |            |                        |
//!        s0           s1                       s{n-1}
//!
//!        s0'          s1'                      s{n-1}'
//!        |            |                        |
//! MPO:  W[0] ------- W[1] ------- ... ------- W[n-1]
//!        |            |                        |
//!        s0           s1                       s{n-1}
//! ```
//!
//! Canonical form is tracked with two limits: every site below `left_lim` is
//! a left isometry and every site at or above `right_lim` is a right isometry.
//! When `left_lim + 1 == right_lim`, the remaining site is the orthogonality
//! center. [`Chain::position`] moves the center by exact SVDs, and
//! [`Chain::svd_bond`] writes a pre-formed two-site tensor back into the chain
//! with truncation, updating the limits to match.

use std::marker::PhantomData;
use ndarray as nd;
use num_complex::Complex64 as C64;
use num_traits::One;
use thiserror::Error;
use crate::{
    decomp::{
        self,
        DecompError,
        Direction,
        LocalOp,
        Method,
        Spectrum,
        TruncPolicy,
    },
    index::{ Index, Layer },
    tensor::{ Tensor, TensorError },
};

#[derive(Debug, Error)]
pub enum ChainError {
    /// Returned when attempting to create a chain with no tensors.
    #[error("error in chain creation: cannot create an empty chain")]
    EmptyChain,

    /// Returned when two neighboring tensors share no index.
    #[error("error in chain creation: no link index between sites {0} and {1}")]
    MissingLink(usize, usize),

    /// Returned when dense data doesn't match the provided site indices.
    #[error("error in chain creation: array length/shape doesn't match site indices")]
    IncompatibleShape,

    /// Returned when two chains that must line up site-by-site don't.
    #[error("error in chain pairing: chains of lengths {0} and {1}")]
    LengthMismatch(usize, usize),

    /// Returned when two chains paired in an overlap have different site
    /// indices.
    #[error("error in chain pairing: site indices don't match")]
    SiteMismatch,

    #[error("site {0} out of bounds")]
    SiteOutOfBounds(usize),

    #[error("bond {0} out of bounds")]
    BondOutOfBounds(usize),

    #[error("{0}")]
    Tensor(#[from] TensorError),

    #[error("{0}")]
    Decomp(#[from] DecompError),
}
use ChainError::*;
pub type ChainResult<T> = Result<T, ChainError>;

/// Marker for chains representing states.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct State;

/// Marker for chains representing operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Operator;

/// A chain of tensors; see the module-level docs.
#[derive(Debug, PartialEq)]
pub struct Chain<K> {
    tensors: Vec<Tensor>, // length ≥ 1
    left_lim: usize,
    right_lim: usize,
    kind: PhantomData<K>,
}

impl<K> Clone for Chain<K> {
    fn clone(&self) -> Self {
        Self {
            tensors: self.tensors.clone(),
            left_lim: self.left_lim,
            right_lim: self.right_lim,
            kind: PhantomData,
        }
    }
}

/// A matrix product state.
pub type Mps = Chain<State>;

/// A matrix product operator.
pub type Mpo = Chain<Operator>;

impl<K> Chain<K> {
    /// Assemble a chain from its tensors. The result makes no claim of
    /// canonical form.
    ///
    /// Fails if `tensors` is empty or any two neighbors share no index.
    pub fn from_tensors(tensors: Vec<Tensor>) -> ChainResult<Self> {
        if tensors.is_empty() { return Err(EmptyChain); }
        if let Some(b)
            = tensors.windows(2)
            .position(|pair| pair[0].common_index(&pair[1]).is_none())
        {
            return Err(MissingLink(b, b + 1));
        }
        let right_lim = tensors.len();
        Ok(Self { tensors, left_lim: 0, right_lim, kind: PhantomData })
    }

    pub(crate) fn with_lims(mut self, left_lim: usize, right_lim: usize) -> Self {
        self.left_lim = left_lim;
        self.right_lim = right_lim;
        self
    }

    /// Number of sites.
    pub fn len(&self) -> usize { self.tensors.len() }

    /// Always `false`; chains hold at least one tensor.
    pub fn is_empty(&self) -> bool { self.tensors.is_empty() }

    /// Tensor at site `i`.
    ///
    /// *Panics* if `i` is out of bounds.
    pub fn tensor(&self, i: usize) -> &Tensor { &self.tensors[i] }

    pub fn tensors(&self) -> &[Tensor] { &self.tensors }

    pub fn into_tensors(self) -> Vec<Tensor> { self.tensors }

    /// Overwrite the tensor at site `i`, widening the non-canonical region to
    /// include it.
    ///
    /// Fails if `i` is out of bounds.
    pub fn set_tensor(&mut self, i: usize, t: Tensor) -> ChainResult<()> {
        if i >= self.len() { return Err(SiteOutOfBounds(i)); }
        self.tensors[i] = t;
        self.left_lim = self.left_lim.min(i);
        self.right_lim = self.right_lim.max(i + 1);
        Ok(())
    }

    pub fn left_lim(&self) -> usize { self.left_lim }

    pub fn right_lim(&self) -> usize { self.right_lim }

    /// The orthogonality center, if the chain is in mixed-canonical form.
    pub fn ortho_center(&self) -> Option<usize> {
        (self.left_lim + 1 == self.right_lim).then_some(self.left_lim)
    }

    /// Link index between sites `b` and `b + 1`.
    pub fn link_index(&self, b: usize) -> Option<Index> {
        (b + 1 < self.len())
            .then(|| self.tensors[b].common_index(&self.tensors[b + 1]))
            .flatten()
    }

    /// All site indices of the tensor at `i`.
    pub fn site_indices(&self, i: usize) -> Vec<Index> {
        self.tensors.get(i)
            .map(|t| t.indices().iter().filter(|idx| idx.is_site()).cloned().collect())
            .unwrap_or_default()
    }

    /// Replace index `old` with `new` in the tensor at site `i`.
    pub fn replace_index_at(&mut self, i: usize, old: &Index, new: Index)
        -> ChainResult<()>
    {
        if i >= self.len() { return Err(SiteOutOfBounds(i)); }
        self.tensors[i].replace_index(old, new)?;
        Ok(())
    }

    /// Complex conjugate of every tensor, indices unchanged.
    pub fn conj(&self) -> Self {
        let mut conj = self.clone();
        conj.tensors.iter_mut().for_each(Tensor::conj_mut);
        conj
    }

    /// Apply `f` to every index of every tensor.
    pub(crate) fn map_indices<F>(mut self, mut f: F) -> Self
    where F: FnMut(&mut Index)
    {
        self.tensors = self.tensors.into_iter()
            .map(|t| t.map_indices(&mut f))
            .collect();
        self
    }

    /// Contract the whole chain into a single tensor.
    pub fn contract_all(&self) -> ChainResult<Tensor> {
        let mut acc = self.tensors[0].clone();
        for t in self.tensors.iter().skip(1) {
            acc = acc.contract(t)?;
        }
        Ok(acc)
    }

    /// Overlap ⟨`self`|`other`⟩: every tensor of `self` is conjugated and
    /// contracted with its partner in `other` over the site indices.
    ///
    /// Fails if the chains differ in length or site indices.
    pub fn inner(&self, other: &Self) -> ChainResult<C64> {
        if self.len() != other.len() {
            return Err(LengthMismatch(self.len(), other.len()));
        }
        let mut env = Tensor::new_scalar(C64::one());
        for (a, b) in self.tensors.iter().zip(&other.tensors) {
            let bra = a.conj().map_indices(|idx| {
                if idx.is_link() { idx.set_layer(Layer::Bra); }
            });
            env = env.contract(&bra)?.contract(b)?;
        }
        env.as_scalar().ok_or(SiteMismatch)
    }

    /// Euclidean norm, √⟨`self`|`self`⟩.
    pub fn norm(&self) -> ChainResult<f64> {
        Ok(self.inner(self)?.re.max(0.0).sqrt())
    }

    /// Multiply the chain by `a`, applied to the orthogonality center if there
    /// is one and to site 0 otherwise.
    pub fn scale(&mut self, a: C64) {
        let k = self.ortho_center().unwrap_or(0);
        self.tensors[k] = self.tensors[k].clone().scale(a);
    }

    /// Move the orthogonality center to site `c` with exact (untruncated)
    /// factorizations.
    ///
    /// Fails if `c` is out of bounds.
    pub fn position(&mut self, c: usize) -> ChainResult<()> {
        if c >= self.len() { return Err(SiteOutOfBounds(c)); }
        while self.left_lim < c {
            let b = self.left_lim;
            self.orthogonalize_bond(b, Direction::FromLeft)?;
        }
        while self.right_lim > c + 1 {
            let b = self.right_lim - 2;
            self.orthogonalize_bond(b, Direction::FromRight)?;
        }
        Ok(())
    }

    fn orthogonalize_bond(&mut self, b: usize, dir: Direction) -> ChainResult<()> {
        let link = self.link_index(b).ok_or(MissingLink(b, b + 1))?;
        let exact = TruncPolicy::exact();
        match dir {
            Direction::FromLeft => {
                let t = &self.tensors[b];
                let left: Vec<Index>
                    = t.indices().iter()
                    .filter(|idx| **idx != link)
                    .cloned()
                    .collect();
                let f = decomp::factorize(
                    t, &left, dir, Method::Svd, &exact, &link, None)?;
                self.tensors[b + 1] = f.right.contract(&self.tensors[b + 1])?;
                self.tensors[b] = f.left;
                self.left_lim = b + 1;
                self.right_lim = self.right_lim.max(b + 2);
            },
            Direction::FromRight => {
                let t = &self.tensors[b + 1];
                let f = decomp::factorize(
                    t, std::slice::from_ref(&link), dir, Method::Svd, &exact,
                    &link, None)?;
                self.tensors[b] = self.tensors[b].contract(&f.left)?;
                self.tensors[b + 1] = f.right;
                self.right_lim = b + 1;
                self.left_lim = self.left_lim.min(b);
            },
        }
        Ok(())
    }

    /// Factorize a two-site tensor `phi` back into sites `b` and `b + 1`.
    ///
    /// The indices of `phi` that also appear on the current tensor at `b`
    /// (other than the link `b`-`b + 1` itself) go to the left factor. The new
    /// link copies the role, level and layer of the old one. Afterwards the
    /// orthogonality center is at `b + 1` for [`Direction::FromLeft`] and at
    /// `b` for [`Direction::FromRight`].
    ///
    /// Fails if `b` is not a bond of the chain or the factorization fails.
    pub fn svd_bond(
        &mut self,
        b: usize,
        phi: &Tensor,
        dir: Direction,
        method: Method,
        policy: &TruncPolicy,
        ctx: Option<LocalOp<'_>>,
    ) -> ChainResult<Spectrum>
    {
        if b + 1 >= self.len() { return Err(BondOutOfBounds(b)); }
        let old = self.link_index(b);
        let left: Vec<Index>
            = phi.indices().iter()
            .filter(|idx| {
                self.tensors[b].has_index(idx) && Some(*idx) != old.as_ref()
            })
            .cloned()
            .collect();
        let template = old.unwrap_or_else(|| Index::link(1));
        let f = decomp::factorize(phi, &left, dir, method, policy, &template, ctx)?;
        self.tensors[b] = f.left;
        self.tensors[b + 1] = f.right;
        match dir {
            Direction::FromLeft => {
                self.left_lim = b + 1;
                self.right_lim = b + 2;
            },
            Direction::FromRight => {
                self.left_lim = b;
                self.right_lim = b + 1;
            },
        }
        Ok(f.spec)
    }

    /// Bring the chain into canonical form with the center at site 0,
    /// truncating every bond according to `policy` on the way.
    pub fn orthogonalize(&mut self, policy: &TruncPolicy) -> ChainResult<()> {
        let n = self.len();
        self.position(n - 1)?;
        for b in (0..n - 1).rev() {
            let phi = self.tensors[b].contract(&self.tensors[b + 1])?;
            self.svd_bond(b, &phi, Direction::FromRight, Method::Svd, policy, None)?;
        }
        Ok(())
    }
}

// Successive left-to-right SVDs of a full tensor, one group of indices per
// site.
fn split_dense(full: Tensor, groups: &[Vec<Index>], policy: &TruncPolicy)
    -> ChainResult<Vec<Tensor>>
{
    let n = groups.len();
    let mut tensors: Vec<Tensor> = Vec::with_capacity(n);
    let mut rest = full;
    let mut prev: Option<Index> = None;
    for group in groups.iter().take(n - 1) {
        let left: Vec<Index>
            = prev.iter().chain(group.iter()).cloned().collect();
        let f = decomp::factorize(
            &rest, &left, Direction::FromLeft, Method::Svd, policy,
            &Index::link(1), None)?;
        tensors.push(f.left);
        prev = Some(f.link);
        rest = f.right;
    }
    tensors.push(rest);
    Ok(tensors)
}

impl Chain<State> {
    /// Initialize to a product state with site `k` in basis state
    /// `states[k]`.
    ///
    /// Fails if `sites` is empty, the two slices differ in length, or a state
    /// is out of range.
    pub fn product(sites: &[Index], states: &[usize]) -> ChainResult<Self> {
        if sites.is_empty() { return Err(EmptyChain); }
        if sites.len() != states.len()
            || sites.iter().zip(states).any(|(s, k)| *k >= s.dim())
        {
            return Err(IncompatibleShape);
        }
        let n = sites.len();
        let links: Vec<Index> = (0..n - 1).map(|_| Index::link(1)).collect();
        let tensors: Vec<Tensor>
            = sites.iter().zip(states).enumerate()
            .map(|(k, (s, state))| {
                let idxs: Vec<Index>
                    = k.checked_sub(1).map(|j| links[j].clone()).into_iter()
                    .chain(std::iter::once(s.clone()))
                    .chain(links.get(k).cloned())
                    .collect();
                let pos = usize::from(k > 0);
                Tensor::new(idxs, |ix| {
                    if ix[pos] == *state { C64::one() } else { C64::from(0.0) }
                })
            })
            .collect::<Result<_, _>>()?;
        Self::from_tensors(tensors)
    }

    /// Factor a dense state vector, laid out row-major over `sites`.
    ///
    /// The result is left-canonical with its center at the last site.
    ///
    /// Fails if `sites` is empty or `state` has the wrong length.
    pub fn from_dense(sites: &[Index], state: &[C64], policy: &TruncPolicy)
        -> ChainResult<Self>
    {
        if sites.is_empty() { return Err(EmptyChain); }
        let len: usize = sites.iter().map(Index::dim).product();
        if state.len() != len { return Err(IncompatibleShape); }
        let mat: nd::Array2<C64>
            = nd::Array2::from_shape_fn((len, 1), |(i, _)| state[i]);
        let full = Tensor::from_matrix(sites, &[], mat)?;
        let groups: Vec<Vec<Index>>
            = sites.iter().map(|s| vec![s.clone()]).collect();
        let n = sites.len();
        Ok(Self::from_tensors(split_dense(full, &groups, policy)?)?
            .with_lims(n - 1, n))
    }

    /// Contract into a dense vector, laid out row-major over `sites`.
    pub fn to_dense(&self, sites: &[Index]) -> ChainResult<nd::Array1<C64>> {
        let arr = self.contract_all()?.to_array(sites)?;
        Ok(arr.iter().copied().collect())
    }

    /// The site index of the tensor at `i`.
    pub fn site_index(&self, i: usize) -> Option<Index> {
        self.site_indices(i).into_iter().next()
    }
}

impl Chain<Operator> {
    /// Factor a dense operator on `sites`. Rows of `op` are outputs and
    /// columns are inputs, both laid out row-major over `sites`; the output
    /// index at each site is the primed version of the input.
    ///
    /// The result is left-canonical with its center at the last site.
    ///
    /// Fails if `sites` is empty or `op` has the wrong shape.
    pub fn from_dense(sites: &[Index], op: &nd::Array2<C64>, policy: &TruncPolicy)
        -> ChainResult<Self>
    {
        if sites.is_empty() { return Err(EmptyChain); }
        let len: usize = sites.iter().map(Index::dim).product();
        if op.shape() != [len, len] { return Err(IncompatibleShape); }
        let outs: Vec<Index> = sites.iter().map(Index::prime).collect();
        let full = Tensor::from_matrix(&outs, sites, op.clone())?;
        let groups: Vec<Vec<Index>>
            = sites.iter().zip(&outs)
            .map(|(s, o)| vec![o.clone(), s.clone()])
            .collect();
        let n = sites.len();
        Ok(Self::from_tensors(split_dense(full, &groups, policy)?)?
            .with_lims(n - 1, n))
    }

    /// The identity operator on `sites`, with bond dimension 1.
    pub fn identity(sites: &[Index]) -> ChainResult<Self> {
        if sites.is_empty() { return Err(EmptyChain); }
        let n = sites.len();
        let links: Vec<Index> = (0..n - 1).map(|_| Index::link(1)).collect();
        let tensors: Vec<Tensor>
            = sites.iter().enumerate()
            .map(|(k, s)| {
                let idxs: Vec<Index>
                    = k.checked_sub(1).map(|j| links[j].clone()).into_iter()
                    .chain([s.prime(), s.clone()])
                    .chain(links.get(k).cloned())
                    .collect();
                let pos = usize::from(k > 0);
                Tensor::new(idxs, |ix| {
                    if ix[pos] == ix[pos + 1] { C64::one() } else { C64::from(0.0) }
                })
            })
            .collect::<Result<_, _>>()?;
        Self::from_tensors(tensors)
    }

    /// Contract into a dense matrix over `sites` (inputs), with rows indexed
    /// by the primed outputs.
    pub fn to_dense(&self, sites: &[Index]) -> ChainResult<nd::Array2<C64>> {
        let outs: Vec<Index> = sites.iter().map(Index::prime).collect();
        Ok(self.contract_all()?.to_matrix(&outs, sites)?)
    }

    /// Input site index at `i`, the one at prime level 0.
    pub fn site_in(&self, i: usize) -> Option<Index> {
        self.site_indices(i).into_iter().find(|idx| idx.plev() == 0)
    }

    /// Output site index at `i`, the one at prime level 1.
    pub fn site_out(&self, i: usize) -> Option<Index> {
        self.site_indices(i).into_iter().find(|idx| idx.plev() == 1)
    }
}
