//! Dense complex tensors addressed by an unordered set of [`Index`]es.
//!
//! A [`Tensor`] is a multi-dimensional array whose axes are named by indices
//! rather than positions. Contracting two tensors sums over every index they
//! share and keeps all others; the order of axes in the result is an
//! implementation detail, since every operation that cares about layout
//! (matricization, dense export, addition) looks indices up by value.
//!
//! <blockquote>
//!   <p style="font-size:20px">
//!     <i>C</i><sub><i>a</i>,<i>c</i></sub>
//!       = Σ<sub><i>b</i></sub>
//!         <i>A</i><sub><i>a</i>,<i>b</i></sub>
//!         <i>B</i><sub><i>b</i>,<i>c</i></sub>
//!   </p>
//! </blockquote>
//!
//! Two tensors with no common indices contract to their outer product.
//! Contraction is carried out by permuting the shared axes to the inside,
//! reshaping both operands to matrices, and handing the product to `ndarray`.
//!
//! ```
//! use mpo_algs::{ index::Index, tensor::Tensor };
//! use num_complex::Complex64 as C64;
//!
//! let a = Index::site(3);
//! let b = Index::link(4);
//! let c = Index::site(5);
//! let x = Tensor::new([a.clone(), b.clone()], |_| C64::from(1.0)).unwrap();
//! let y = Tensor::new([b.clone(), c.clone()], |_| C64::from(2.0)).unwrap();
//! let z = x.contract(&y).unwrap(); // z_{a,c} = x_{a,b} y_{b,c}
//! assert_eq!(z.rank(), 2);
//! assert!(z.has_index(&a) && z.has_index(&c) && !z.has_index(&b));
//! ```

use std::fmt;
use itertools::Itertools;
use ndarray::{ self as nd, Dimension };
use num_complex::Complex64 as C64;
use rustc_hash::FxHashSet;
use thiserror::Error;
use crate::index::{ self, Index };

#[derive(Debug, Error)]
pub enum TensorError {
    /// Returned when attempting to create a new tensor with duplicate indices.
    #[error("error in tensor creation: duplicate indices")]
    DuplicateIndices,

    /// Returned when attempting to create a new tensor from an array whose
    /// shape doesn't match the dimensions of the provided indices.
    #[error("error in tensor creation: array shape doesn't match indices")]
    IncompatibleShape,

    /// Returned when a tensor add is attempted between two tensors with
    /// incompatible indices.
    #[error("error in tensor add: non-matching indices")]
    IncompatibleIndicesAdd,

    /// Returned when an operation names an index the tensor doesn't carry.
    #[error("error in tensor reindex: missing index {0}")]
    MissingIndex(String),

    /// Returned when a replacement index has a different dimension from the
    /// one it replaces.
    #[error("error in tensor reindex: expected dimension {0}, got {1}")]
    IncompatibleDim(usize, usize),

    /// Reshape failure from the array backend.
    #[error("error in tensor reshape: {0}")]
    Shape(#[from] nd::ShapeError),
}
use TensorError::*;
pub type TensorResult<T> = Result<T, TensorError>;

/// A dense, complex-valued tensor.
///
/// This implementation distinguishes between rank 0 (scalar) and rank > 0
/// (array) quantities; full contractions always produce the scalar variant.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor(TensorData);

#[derive(Clone, Debug, PartialEq)]
enum TensorData {
    Scalar(C64),
    Tensor(Vec<Index>, nd::ArrayD<C64>),
}

impl From<TensorData> for Tensor {
    fn from(data: TensorData) -> Self { Self(data) }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            TensorData::Scalar(z) => write!(f, "{} {{ }}", z),
            TensorData::Tensor(idxs, a) => {
                write!(f, "{} {{ {} }}", a, idxs.iter().map(Index::label).join(", "))
            },
        }
    }
}

fn matricize(
    a: &nd::ArrayD<C64>,
    perm: Vec<usize>,
    shape: (usize, usize),
) -> TensorResult<nd::Array2<C64>>
{
    let permuted = a.view().permuted_axes(perm);
    Ok(permuted.as_standard_layout().into_owned().into_shape(shape)?)
}

fn positions_of(idxs: &[Index], targets: &[Index]) -> TensorResult<Vec<usize>> {
    targets.iter()
        .map(|t| {
            idxs.iter().position(|idx| idx == t)
                .ok_or_else(|| MissingIndex(t.label()))
        })
        .collect()
}

impl Tensor {
    /// Create a new tensor using a function over given indices.
    ///
    /// An empty set of indices produces a scalar, evaluated at the empty
    /// multi-index.
    ///
    /// Fails if `indices` contains duplicates.
    pub fn new<I, F>(indices: I, mut elems: F) -> TensorResult<Self>
    where
        I: IntoIterator<Item = Index>,
        F: FnMut(&[usize]) -> C64,
    {
        let idxs: Vec<Index> = indices.into_iter().collect();
        if idxs.is_empty() { return Ok(Self::new_scalar(elems(&[]))); }
        if !index::is_unique(&idxs) { return Err(DuplicateIndices); }
        let shape: Vec<usize> = idxs.iter().map(Index::dim).collect();
        let data: nd::ArrayD<C64>
            = nd::ArrayD::from_shape_fn(shape, |ix| elems(ix.slice()));
        Ok(TensorData::Tensor(idxs, data).into())
    }

    /// Create a new tensor from an existing array whose axes correspond to
    /// `indices` in order.
    ///
    /// Fails if `indices` contains duplicates or the shape of `data` doesn't
    /// match.
    pub fn from_array<I>(indices: I, data: nd::ArrayD<C64>) -> TensorResult<Self>
    where I: IntoIterator<Item = Index>
    {
        let idxs: Vec<Index> = indices.into_iter().collect();
        if idxs.is_empty() {
            return match data.iter().exactly_one() {
                Ok(z) => Ok(Self::new_scalar(*z)),
                Err(_) => Err(IncompatibleShape),
            };
        }
        if !index::is_unique(&idxs) { return Err(DuplicateIndices); }
        let dims_match
            = data.ndim() == idxs.len()
            && idxs.iter().zip(data.shape()).all(|(idx, d)| idx.dim() == *d);
        if !dims_match { return Err(IncompatibleShape); }
        Ok(TensorData::Tensor(idxs, data).into())
    }

    /// Create a new rank-0 tensor.
    pub fn new_scalar(val: C64) -> Self { TensorData::Scalar(val).into() }

    pub fn is_scalar(&self) -> bool { matches!(self.0, TensorData::Scalar(_)) }

    /// Return the value of a rank-0 tensor.
    pub fn as_scalar(&self) -> Option<C64> {
        match &self.0 {
            TensorData::Scalar(z) => Some(*z),
            TensorData::Tensor(..) => None,
        }
    }

    pub fn rank(&self) -> usize { self.indices().len() }

    pub fn indices(&self) -> &[Index] {
        match &self.0 {
            TensorData::Scalar(_) => &[],
            TensorData::Tensor(idxs, _) => idxs,
        }
    }

    pub fn has_index(&self, index: &Index) -> bool {
        self.indices().contains(index)
    }

    /// Return all indices held in common with `other`, in the order they
    /// appear in `self`.
    pub fn common_indices(&self, other: &Self) -> Vec<Index> {
        let theirs: FxHashSet<&Index> = other.indices().iter().collect();
        self.indices().iter()
            .filter(|idx| theirs.contains(idx))
            .cloned()
            .collect()
    }

    /// Return the first index held in common with `other`, if any.
    pub fn common_index(&self, other: &Self) -> Option<Index> {
        self.indices().iter().find(|idx| other.has_index(idx)).cloned()
    }

    /// Euclidean (Frobenius) norm.
    pub fn norm(&self) -> f64 {
        match &self.0 {
            TensorData::Scalar(z) => z.norm(),
            TensorData::Tensor(_, a) => {
                a.iter().map(|z| z.norm_sqr()).sum::<f64>().sqrt()
            },
        }
    }

    /// Return the complex conjugate. Indices are unchanged.
    pub fn conj(&self) -> Self { self.clone().into_conj() }

    pub fn into_conj(mut self) -> Self {
        self.conj_mut();
        self
    }

    pub fn conj_mut(&mut self) {
        match &mut self.0 {
            TensorData::Scalar(z) => { *z = z.conj(); },
            TensorData::Tensor(_, a) => { a.mapv_inplace(|z| z.conj()); },
        }
    }

    /// Multiply every element by `a`.
    pub fn scale(mut self, a: C64) -> Self {
        match &mut self.0 {
            TensorData::Scalar(z) => { *z *= a; },
            TensorData::Tensor(_, data) => { data.mapv_inplace(|z| z * a); },
        }
        self
    }

    /// Contract over all common indices.
    ///
    /// Tensors without common indices produce their outer product; if every
    /// index is summed, the result is a scalar.
    pub fn contract(&self, other: &Self) -> TensorResult<Self> {
        match (&self.0, &other.0) {
            (TensorData::Scalar(a), TensorData::Scalar(b)) => {
                Ok(Self::new_scalar(a * b))
            },
            (TensorData::Scalar(a), TensorData::Tensor(idxs, b)) => {
                Ok(TensorData::Tensor(idxs.clone(), b.mapv(|bk| a * bk)).into())
            },
            (TensorData::Tensor(idxs, a), TensorData::Scalar(b)) => {
                Ok(TensorData::Tensor(idxs.clone(), a.mapv(|ak| ak * b)).into())
            },
            (TensorData::Tensor(idxs_a, a), TensorData::Tensor(idxs_b, b)) => {
                let common: Vec<(usize, usize)>
                    = idxs_a.iter().enumerate()
                    .filter_map(|(ka, idx)| {
                        idxs_b.iter().position(|jdx| jdx == idx)
                            .map(|kb| (ka, kb))
                    })
                    .collect();
                let free_a: Vec<usize>
                    = (0..idxs_a.len())
                    .filter(|k| !common.iter().any(|(ka, _)| ka == k))
                    .collect();
                let free_b: Vec<usize>
                    = (0..idxs_b.len())
                    .filter(|k| !common.iter().any(|(_, kb)| kb == k))
                    .collect();

                // move summed axes to the inside and multiply as matrices
                let perm_a: Vec<usize>
                    = free_a.iter().copied()
                    .chain(common.iter().map(|(ka, _)| *ka))
                    .collect();
                let perm_b: Vec<usize>
                    = common.iter().map(|(_, kb)| *kb)
                    .chain(free_b.iter().copied())
                    .collect();
                let m: usize = free_a.iter().map(|k| idxs_a[*k].dim()).product();
                let k: usize
                    = common.iter().map(|(ka, _)| idxs_a[*ka].dim()).product();
                let n: usize = free_b.iter().map(|k| idxs_b[*k].dim()).product();
                let c: nd::Array2<C64>
                    = matricize(a, perm_a, (m, k))?
                    .dot(&matricize(b, perm_b, (k, n))?);

                let new_idxs: Vec<Index>
                    = free_a.iter().map(|k| idxs_a[*k].clone())
                    .chain(free_b.iter().map(|k| idxs_b[*k].clone()))
                    .collect();
                if new_idxs.is_empty() {
                    Ok(Self::new_scalar(c[[0, 0]]))
                } else {
                    let shape: Vec<usize>
                        = new_idxs.iter().map(Index::dim).collect();
                    Ok(TensorData::Tensor(new_idxs, c.into_shape(shape)?).into())
                }
            },
        }
    }

    /// Elementwise sum of two tensors over the same set of indices, in any
    /// order.
    ///
    /// Fails if the index sets differ.
    pub fn add_checked(&self, other: &Self) -> TensorResult<Self> {
        match (&self.0, &other.0) {
            (TensorData::Scalar(a), TensorData::Scalar(b)) => {
                Ok(Self::new_scalar(a + b))
            },
            (TensorData::Tensor(idxs_a, a), TensorData::Tensor(idxs_b, b)) => {
                if idxs_a.len() != idxs_b.len() {
                    return Err(IncompatibleIndicesAdd);
                }
                let perm: Vec<usize>
                    = positions_of(idxs_b, idxs_a)
                    .map_err(|_| IncompatibleIndicesAdd)?;
                let b_aligned = b.view().permuted_axes(perm);
                Ok(TensorData::Tensor(idxs_a.clone(), a + &b_aligned).into())
            },
            _ => Err(IncompatibleIndicesAdd),
        }
    }

    /// Replace index `old` with `new`, keeping the data as-is.
    ///
    /// Fails if `old` isn't present, `new` has a different dimension, or `new`
    /// is already carried by the tensor.
    pub fn replace_index(&mut self, old: &Index, new: Index) -> TensorResult<()> {
        if old.dim() != new.dim() {
            return Err(IncompatibleDim(old.dim(), new.dim()));
        }
        if old == &new { return Ok(()); }
        if self.has_index(&new) { return Err(DuplicateIndices); }
        match &mut self.0 {
            TensorData::Scalar(_) => Err(MissingIndex(old.label())),
            TensorData::Tensor(idxs, _) => {
                let k = idxs.iter().position(|idx| idx == old)
                    .ok_or_else(|| MissingIndex(old.label()))?;
                idxs[k] = new;
                Ok(())
            },
        }
    }

    /// Apply `f` to every index in place. `f` may change prime levels and
    /// layers only, which never alters dimensions.
    pub(crate) fn map_indices<F>(mut self, mut f: F) -> Self
    where F: FnMut(&mut Index)
    {
        if let TensorData::Tensor(idxs, _) = &mut self.0 {
            idxs.iter_mut().for_each(|idx| f(idx));
        }
        self
    }

    /// Return the data with axes arranged in the order of `order`, which must
    /// be a permutation of the tensor's indices.
    pub fn to_array(&self, order: &[Index]) -> TensorResult<nd::ArrayD<C64>> {
        match &self.0 {
            TensorData::Scalar(z) => {
                if !order.is_empty() { return Err(MissingIndex(order[0].label())); }
                Ok(nd::ArrayD::from_elem(nd::IxDyn(&[]), *z))
            },
            TensorData::Tensor(idxs, a) => {
                if order.len() != idxs.len() { return Err(IncompatibleShape); }
                let perm = positions_of(idxs, order)?;
                Ok(a.view().permuted_axes(perm).as_standard_layout().into_owned())
            },
        }
    }

    /// Flatten into a matrix with `rows` fused (row-major) into the first axis
    /// and `cols` into the second. Together `rows` and `cols` must cover the
    /// tensor's indices exactly.
    pub fn to_matrix(&self, rows: &[Index], cols: &[Index])
        -> TensorResult<nd::Array2<C64>>
    {
        let m: usize = rows.iter().map(Index::dim).product();
        let n: usize = cols.iter().map(Index::dim).product();
        match &self.0 {
            TensorData::Scalar(z) => {
                if !rows.is_empty() || !cols.is_empty() {
                    return Err(IncompatibleShape);
                }
                Ok(nd::Array2::from_elem((1, 1), *z))
            },
            TensorData::Tensor(idxs, a) => {
                if rows.len() + cols.len() != idxs.len() {
                    return Err(IncompatibleShape);
                }
                let perm: Vec<usize>
                    = positions_of(idxs, rows)?.into_iter()
                    .chain(positions_of(idxs, cols)?)
                    .collect();
                matricize(a, perm, (m, n))
            },
        }
    }

    /// Inverse of [`Self::to_matrix`].
    pub fn from_matrix(rows: &[Index], cols: &[Index], mat: nd::Array2<C64>)
        -> TensorResult<Self>
    {
        let idxs: Vec<Index> = rows.iter().chain(cols).cloned().collect();
        let shape: Vec<usize> = idxs.iter().map(Index::dim).collect();
        let data = mat.as_standard_layout().into_owned().into_shape(shape)?;
        Self::from_array(idxs, data)
    }
}
