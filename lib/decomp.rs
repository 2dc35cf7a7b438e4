//! Rank-reducing factorizations with a truncation policy.
//!
//! Every sweep algorithm in this crate eventually hands a tensor spanning two
//! neighboring sites to [`factorize`], which splits it across a new link index
//! and discards the smallest components of the split. Three strategies are
//! available:
//!
//! - [`Method::Svd`]: a plain truncated singular value decomposition.
//! - [`Method::DensityMatrix`]: diagonalize the reduced density matrix of the
//!   kept side, *M M*<sup>†</sup> or *M*<sup>†</sup> *M*. This is the only mode
//!   that can absorb a noise term, see [`LocalOp`].
//! - [`Method::Auto`]: plain SVD when the policy is effectively exact and
//!   noiseless, the density matrix otherwise.
//!
//! [`diag_hermitian`] covers the case where the caller has already formed a
//! (positive semi-definite) density matrix and only wants its dominant
//! eigenvectors.
//!
//! In all cases the number of kept components follows [`TruncPolicy`]: the
//! squared singular values (or eigenvalues) *w*<sub>*k*</sub> are sorted in
//! descending order, those with *w*<sub>*k*</sub> > cutoff Σ *w* are counted,
//! and the count is then clamped to `mindim..=maxdim`.

use ndarray as nd;
use ndarray_linalg::{ Eigh, SVDInto, UPLO, error::LinalgError };
use num_complex::Complex64 as C64;
use thiserror::Error;
use crate::{
    index::Index,
    tensor::{ Tensor, TensorError },
};

#[derive(Debug, Error)]
pub enum DecompError {
    /// Returned when the linear algebra backend fails, e.g. on
    /// non-convergence. The backend's error is passed through untouched.
    #[error("numerical backend failure: {0}")]
    Backend(#[from] LinalgError),

    /// Returned when the requested split of a tensor's indices is malformed.
    #[error("error in decomposition: invalid split: {0}")]
    InvalidSplit(&'static str),

    #[error("error in decomposition: {0}")]
    Tensor(#[from] TensorError),
}
use DecompError::*;
pub type DecompResult<T> = Result<T, DecompError>;

/// Cutoff/bond-dimension policy applied after every factorization.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TruncPolicy {
    /// Discard threshold on squared singular values (or eigenvalues) relative
    /// to their sum.
    pub cutoff: f64,
    /// Hard upper bound on the kept dimension; `usize::MAX` for unrestricted.
    pub maxdim: usize,
    /// Lower bound on the kept dimension, honored when the available rank
    /// permits.
    pub mindim: usize,
    /// Relative weight of the perturbation added to density matrices.
    pub noise: f64,
}

impl Default for TruncPolicy {
    fn default() -> Self { Self::exact() }
}

impl TruncPolicy {
    /// Keep every non-zero component.
    pub const fn exact() -> Self {
        Self { cutoff: 0.0, maxdim: usize::MAX, mindim: 1, noise: 0.0 }
    }

    #[must_use]
    pub fn with_cutoff(mut self, cutoff: f64) -> Self {
        self.cutoff = cutoff.abs();
        self
    }

    #[must_use]
    pub fn with_maxdim(mut self, maxdim: usize) -> Self {
        self.maxdim = maxdim.max(1);
        self
    }

    #[must_use]
    pub fn with_mindim(mut self, mindim: usize) -> Self {
        self.mindim = mindim.max(1);
        self
    }

    #[must_use]
    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = noise.abs();
        self
    }

    /// Number of components to keep out of `weights`, which must be sorted in
    /// descending order and non-negative.
    pub fn kept_dim(&self, weights: &[f64]) -> usize {
        let avail = weights.len();
        let total: f64 = weights.iter().sum();
        let above
            = weights.iter()
            .take_while(|w| **w > self.cutoff * total)
            .count();
        let maxdim = self.maxdim.max(1);
        let mindim = self.mindim.clamp(1, maxdim);
        above.min(maxdim).max(mindim).min(avail).max(1)
    }
}

/// Diagnostics from a single truncated factorization.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Spectrum {
    /// Kept weights, normalized to the total weight.
    pub eigs: Vec<f64>,
    /// Discarded weight relative to the total.
    pub truncerr: f64,
    /// Dimension of the new link index.
    pub kept: usize,
}

fn spectrum(weights: &[f64], kept: usize) -> Spectrum {
    let total: f64 = weights.iter().sum();
    if total > 0.0 {
        Spectrum {
            eigs: weights[..kept].iter().map(|w| w / total).collect(),
            truncerr: weights[kept..].iter().sum::<f64>() / total,
            kept,
        }
    } else {
        Spectrum { eigs: vec![0.0; kept], truncerr: 0.0, kept }
    }
}

/// Which factor of a split is left as an isometry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    /// The left factor is an isometry; weights go right.
    FromLeft,
    /// The right factor is an isometry; weights go left.
    FromRight,
}

/// Factorization strategy; see the module-level docs.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Method {
    #[default]
    Auto,
    Svd,
    DensityMatrix,
}

impl Method {
    fn resolve(self, policy: &TruncPolicy) -> Self {
        match self {
            Self::Auto if policy.noise == 0.0 && policy.cutoff < 1e-12 => Self::Svd,
            Self::Auto => Self::DensityMatrix,
            other => other,
        }
    }
}

/// Local operator context for a two-site factorization.
///
/// Describes how the tensor being factorized was produced: on each side of
/// the bond, an environment (absent at the ends of a chain) absorbs a source
/// tensor, which is then acted on by an operator tensor,
///
/// ```text
///   env_left --- src_left --- op_left ---   ...   --- op_right --- src_right --- env_right
/// ```
///
/// With a non-zero [`TruncPolicy::noise`] in density-matrix mode, the half on
/// the kept side is contracted with its operator link left open and its
/// density matrix is mixed into the one being diagonalized. This lets the kept
/// basis pick up every direction the operator can reach, not only the ones the
/// current right (or left) block projects onto.
///
/// The half must carry every kept index of the factorization; otherwise the
/// perturbation is skipped. Set `conj` if the tensor being factorized is the
/// complex conjugate of the product the context describes.
#[derive(Copy, Clone, Debug)]
pub struct LocalOp<'a> {
    pub src_left: &'a Tensor,
    pub src_right: &'a Tensor,
    pub op_left: &'a Tensor,
    pub op_right: &'a Tensor,
    pub env_left: Option<&'a Tensor>,
    pub env_right: Option<&'a Tensor>,
    pub conj: bool,
}

impl<'a> LocalOp<'a> {
    /// Context with no environments on either side.
    pub fn new(src: [&'a Tensor; 2], op: [&'a Tensor; 2]) -> Self {
        Self {
            src_left: src[0],
            src_right: src[1],
            op_left: op[0],
            op_right: op[1],
            env_left: None,
            env_right: None,
            conj: false,
        }
    }

    #[must_use]
    pub fn with_envs(mut self, left: Option<&'a Tensor>, right: Option<&'a Tensor>)
        -> Self
    {
        self.env_left = left;
        self.env_right = right;
        self
    }

    #[must_use]
    pub fn conjugated(mut self) -> Self {
        self.conj = !self.conj;
        self
    }

    // density matrix perturbation on the kept side of the split, in the same
    // basis as the unperturbed density matrix
    fn perturbation(&self, rows: &[Index], cols: &[Index], dir: Direction)
        -> DecompResult<Option<nd::Array2<C64>>>
    {
        let (env, src, op, kept) = match dir {
            Direction::FromLeft => (self.env_left, self.src_left, self.op_left, rows),
            Direction::FromRight => (self.env_right, self.src_right, self.op_right, cols),
        };
        let half = match env {
            Some(e) => e.contract(src)?,
            None => src.clone(),
        };
        let half = half.contract(op)?;
        if kept.iter().any(|idx| !half.has_index(idx)) { return Ok(None); }
        let rest: Vec<Index>
            = half.indices().iter()
            .filter(|idx| !kept.contains(idx))
            .cloned()
            .collect();
        let hm = half.to_matrix(kept, &rest)?;
        let hhh = hm.dot(&hm.t().mapv(|z| z.conj()));
        // the right-side density matrix is M^dag M, conjugate to the left form
        if matches!(dir, Direction::FromRight) != self.conj {
            Ok(Some(hhh.mapv(|z| z.conj())))
        } else {
            Ok(Some(hhh))
        }
    }
}

/// Output of [`factorize`].
#[derive(Clone, Debug)]
pub struct Factors {
    /// Factor carrying the requested left indices plus `link`.
    pub left: Tensor,
    /// Factor carrying `link` plus all remaining indices.
    pub right: Tensor,
    /// The new link index.
    pub link: Index,
    pub spec: Spectrum,
}

/// Split `t` into a factor over `left` and a factor over the remaining
/// indices, joined by a new link index.
///
/// The new link is created with [`Index::sim`] from `link`, so it keeps the
/// template's role, prime level, and layer. `ctx` is only used by the
/// density-matrix mode when `policy.noise` is non-zero.
///
/// Fails if any of `left` is not carried by `t`, or if the backend fails.
pub fn factorize(
    t: &Tensor,
    left: &[Index],
    dir: Direction,
    method: Method,
    policy: &TruncPolicy,
    link: &Index,
    ctx: Option<LocalOp<'_>>,
) -> DecompResult<Factors>
{
    if left.iter().any(|idx| !t.has_index(idx)) {
        return Err(InvalidSplit("left index not carried by the tensor"));
    }
    let right: Vec<Index>
        = t.indices().iter()
        .filter(|idx| !left.contains(idx))
        .cloned()
        .collect();
    let mat = t.to_matrix(left, &right)?;
    let (l, r, weights) = match method.resolve(policy) {
        Method::DensityMatrix => {
            let noise = match ctx {
                Some(op) if policy.noise > 0.0 => {
                    op.perturbation(left, &right, dir)?
                },
                _ => None,
            };
            denmat_split(mat, dir, policy, noise)?
        },
        _ => svd_split(mat, dir, policy)?,
    };
    let kept = l.ncols();
    let new_link = link.sim(kept);
    let left_t = Tensor::from_matrix(left, std::slice::from_ref(&new_link), l)?;
    let right_t = Tensor::from_matrix(std::slice::from_ref(&new_link), &right, r)?;
    Ok(Factors {
        left: left_t,
        right: right_t,
        link: new_link,
        spec: spectrum(&weights, kept),
    })
}

type Split = (nd::Array2<C64>, nd::Array2<C64>, Vec<f64>);

fn svd_split(mat: nd::Array2<C64>, dir: Direction, policy: &TruncPolicy)
    -> DecompResult<Split>
{
    let (Some(u), s, Some(vt)) = mat.svd_into(true, true)?
        else { return Err(InvalidSplit("missing singular vectors")); };
    let weights: Vec<f64> = s.iter().map(|sk| sk * sk).collect();
    let rank = policy.kept_dim(&weights);
    let mut l: nd::Array2<C64> = u.slice(nd::s![.., ..rank]).to_owned();
    let mut r: nd::Array2<C64> = vt.slice(nd::s![..rank, ..]).to_owned();
    match dir {
        Direction::FromLeft => {
            r.axis_iter_mut(nd::Axis(0)).zip(&s)
                .for_each(|(mut rv, sv)| { rv.mapv_inplace(|z| z * *sv); });
        },
        Direction::FromRight => {
            l.axis_iter_mut(nd::Axis(1)).zip(&s)
                .for_each(|(mut lv, sv)| { lv.mapv_inplace(|z| z * *sv); });
        },
    }
    Ok((l, r, weights))
}

// dominant eigenvectors of a hermitian matrix as the columns of an isometry,
// plus all eigenvalues in descending order (clamped to be non-negative)
fn dominant_eigvecs(rho: &nd::Array2<C64>, policy: &TruncPolicy)
    -> DecompResult<(nd::Array2<C64>, Vec<f64>)>
{
    let (evals, evecs) = rho.eigh(UPLO::Lower)?;
    let n = evals.len();
    let weights: Vec<f64> = evals.iter().rev().map(|e| e.max(0.0)).collect();
    let rank = policy.kept_dim(&weights);
    let iso: nd::Array2<C64>
        = nd::Array2::from_shape_fn(
            (evecs.nrows(), rank),
            |(i, j)| evecs[[i, n - 1 - j]],
        );
    Ok((iso, weights))
}

fn denmat_split(
    mat: nd::Array2<C64>,
    dir: Direction,
    policy: &TruncPolicy,
    noise: Option<nd::Array2<C64>>,
) -> DecompResult<Split>
{
    let mat_h: nd::Array2<C64> = mat.t().mapv(|z| z.conj());
    let mut rho = match dir {
        Direction::FromLeft => mat.dot(&mat_h),
        Direction::FromRight => mat_h.dot(&mat),
    };
    if let Some(drho) = noise {
        let tr_rho: f64 = rho.diag().iter().map(|z| z.re).sum();
        let tr_drho: f64 = drho.diag().iter().map(|z| z.re).sum();
        if tr_drho > 0.0 {
            let a = policy.noise * tr_rho / tr_drho;
            rho.zip_mut_with(&drho, |rk, dk| { *rk += *dk * a; });
        }
    }
    let (iso, weights) = dominant_eigvecs(&rho, policy)?;
    let iso_h: nd::Array2<C64> = iso.t().mapv(|z| z.conj());
    match dir {
        Direction::FromLeft => {
            let r = iso_h.dot(&mat);
            Ok((iso, r, weights))
        },
        Direction::FromRight => {
            let l = mat.dot(&iso);
            Ok((l, iso_h, weights))
        },
    }
}

/// Output of [`diag_hermitian`].
#[derive(Clone, Debug)]
pub struct Eigen {
    /// Isometry over `rows` plus `link`; its columns are the kept
    /// eigenvectors, in order of decreasing eigenvalue.
    pub u: Tensor,
    pub link: Index,
    pub spec: Spectrum,
}

/// Truncated eigendecomposition of a Hermitian tensor `rho`, viewed as a
/// matrix from `cols` to `rows`.
///
/// `rows` and `cols` must have the same length and together cover the indices
/// of `rho`; `cols[k]` is the conjugate partner of `rows[k]`. Negative
/// eigenvalues from round-off count as zero weight.
pub fn diag_hermitian(
    rho: &Tensor,
    rows: &[Index],
    cols: &[Index],
    policy: &TruncPolicy,
    link: &Index,
) -> DecompResult<Eigen>
{
    if rows.len() != cols.len() {
        return Err(InvalidSplit("row and column index sets differ in size"));
    }
    let mat = rho.to_matrix(rows, cols)?;
    let (iso, weights) = dominant_eigvecs(&mat, policy)?;
    let kept = iso.ncols();
    let new_link = link.sim(kept);
    let u = Tensor::from_matrix(rows, std::slice::from_ref(&new_link), iso)?;
    Ok(Eigen { u, link: new_link, spec: spectrum(&weights, kept) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{ Rng, SeedableRng, rngs::StdRng };

    fn random_tensor(idxs: &[Index], rng: &mut StdRng) -> Tensor {
        Tensor::new(idxs.iter().cloned(), |_| {
            C64::new(rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5)
        })
        .unwrap()
    }

    fn distance(a: &Tensor, b: &Tensor) -> f64 {
        a.add_checked(&b.clone().scale(C64::new(-1.0, 0.0))).unwrap().norm()
    }

    fn is_isometry(t: &Tensor, outer: &[Index], link: &Index) -> bool {
        let m = t.to_matrix(outer, std::slice::from_ref(link)).unwrap();
        let g = m.t().mapv(|z| z.conj()).dot(&m);
        g.indexed_iter().all(|((i, j), z)| {
            let want = if i == j { 1.0 } else { 0.0 };
            (z.re - want).abs() < 1e-10 && z.im.abs() < 1e-10
        })
    }

    #[test]
    fn kept_dim_respects_bounds() {
        let w = [0.5, 0.3, 0.15, 0.05, 0.0];
        let p = TruncPolicy::exact();
        assert_eq!(p.kept_dim(&w), 4);
        assert_eq!(p.with_maxdim(2).kept_dim(&w), 2);
        assert_eq!(p.with_cutoff(0.1).kept_dim(&w), 3);
        assert_eq!(p.with_cutoff(0.1).with_mindim(4).kept_dim(&w), 4);
        // mindim can't exceed the available rank or the cap
        assert_eq!(p.with_mindim(10).kept_dim(&w), 5);
        assert_eq!(p.with_maxdim(2).with_mindim(3).kept_dim(&w), 2);
        assert_eq!(p.kept_dim(&[0.0, 0.0]), 1);
    }

    #[test]
    fn exact_svd_reconstructs() {
        let mut rng = StdRng::seed_from_u64(10);
        let (a, b, c) = (Index::site(2), Index::site(3), Index::link(4));
        let t = random_tensor(&[a.clone(), b.clone(), c.clone()], &mut rng);
        for dir in [Direction::FromLeft, Direction::FromRight] {
            let f = factorize(
                &t, &[a.clone()], dir, Method::Svd, &TruncPolicy::exact(),
                &Index::link(1), None,
            ).unwrap();
            assert_eq!(f.spec.kept, 2);
            assert_abs_diff_eq!(f.spec.truncerr, 0.0, epsilon = 1e-12);
            let back = f.left.contract(&f.right).unwrap();
            assert!(distance(&back, &t) < 1e-10);
            match dir {
                Direction::FromLeft => {
                    assert!(is_isometry(&f.left, &[a.clone()], &f.link));
                },
                Direction::FromRight => {
                    assert!(is_isometry(&f.right, &[b.clone(), c.clone()], &f.link));
                },
            }
        }
    }

    #[test]
    fn density_matrix_split_matches_svd() {
        let mut rng = StdRng::seed_from_u64(11);
        let (a, b, c, d) = (Index::link(3), Index::site(2), Index::site(2), Index::link(3));
        let t = random_tensor(&[a.clone(), b.clone(), c, d], &mut rng);
        let policy = TruncPolicy::exact().with_maxdim(3);
        let by_svd = factorize(
            &t, &[a.clone(), b.clone()], Direction::FromLeft, Method::Svd,
            &policy, &Index::link(1), None,
        ).unwrap();
        let by_rho = factorize(
            &t, &[a.clone(), b.clone()], Direction::FromLeft, Method::DensityMatrix,
            &policy, &Index::link(1), None,
        ).unwrap();
        assert_eq!(by_svd.spec.kept, 3);
        assert_eq!(by_rho.spec.kept, 3);
        assert_abs_diff_eq!(by_svd.spec.truncerr, by_rho.spec.truncerr, epsilon = 1e-10);
        let x = by_svd.left.contract(&by_svd.right).unwrap();
        let y = by_rho.left.contract(&by_rho.right).unwrap();
        assert!(distance(&x, &y) < 1e-9);
        assert!(is_isometry(&by_rho.left, &[a, b], &by_rho.link));
    }

    #[test]
    fn truncation_reports_discarded_weight() {
        let mut rng = StdRng::seed_from_u64(12);
        let (a, b) = (Index::site(4), Index::site(4));
        let t = random_tensor(&[a.clone(), b], &mut rng);
        let full = factorize(
            &t, &[a.clone()], Direction::FromLeft, Method::Svd,
            &TruncPolicy::exact(), &Index::link(1), None,
        ).unwrap();
        let cut = factorize(
            &t, &[a], Direction::FromLeft, Method::Svd,
            &TruncPolicy::exact().with_maxdim(2), &Index::link(1), None,
        ).unwrap();
        assert_eq!(cut.spec.kept, 2);
        let dropped: f64 = full.spec.eigs[2..].iter().sum();
        assert_abs_diff_eq!(cut.spec.truncerr, dropped, epsilon = 1e-10);
        let back = cut.left.contract(&cut.right).unwrap();
        let err = distance(&back, &t).powi(2) / t.norm().powi(2);
        assert_abs_diff_eq!(err, dropped, epsilon = 1e-10);
    }

    #[test]
    fn noise_opens_new_directions() {
        let (s0, s1) = (Index::site(2), Index::site(2));
        let one_hot = |ix: &[usize]| {
            if ix.iter().all(|k| *k == 0) { C64::from(1.0) } else { C64::from(0.0) }
        };
        // product state |0>|0>, and the same state before a spin flip on the
        // left site
        let t = Tensor::new([s0.clone(), s1.clone()], one_hot).unwrap();
        let src = Tensor::new([s0.prime(), s1.clone()], one_hot).unwrap();
        let flip = Tensor::new([s0.prime(), s0.clone()], |ix| {
            if ix[0] != ix[1] { C64::from(1.0) } else { C64::from(0.0) }
        })
        .unwrap();
        let ident = Tensor::new([s1.clone(), s1.prime()], |ix| {
            if ix[0] == ix[1] { C64::from(1.0) } else { C64::from(0.0) }
        })
        .unwrap();
        let policy = TruncPolicy::exact().with_cutoff(1e-8).with_noise(1e-3);
        let quiet = factorize(
            &t, &[s0.clone()], Direction::FromLeft, Method::DensityMatrix,
            &policy, &Index::link(1), None,
        ).unwrap();
        assert_eq!(quiet.spec.kept, 1);
        let ctx = LocalOp::new([&src, &src], [&flip, &ident]);
        let noisy = factorize(
            &t, &[s0.clone()], Direction::FromLeft, Method::DensityMatrix,
            &policy, &Index::link(1), Some(ctx),
        ).unwrap();
        assert_eq!(noisy.spec.kept, 2);
        // the perturbation changes the basis, not the tensor
        let back = noisy.left.contract(&noisy.right).unwrap();
        assert!(distance(&back, &t) < 1e-10);

        // a context that can't reach the kept indices is ignored
        let stray = LocalOp::new([&src, &src], [&ident, &ident]);
        let skipped = factorize(
            &t, &[s0.clone()], Direction::FromLeft, Method::DensityMatrix,
            &policy, &Index::link(1), Some(stray),
        ).unwrap();
        assert_eq!(skipped.spec.kept, 1);
    }

    #[test]
    fn hermitian_isometry() {
        let mut rng = StdRng::seed_from_u64(13);
        let (a, b) = (Index::site(2), Index::link(3));
        let o = random_tensor(&[a.clone(), b.clone()], &mut rng);
        let ob = o.conj().map_indices(|idx| idx.set_layer(crate::index::Layer::Bra));
        let rho = o.contract(&ob).unwrap();
        assert_eq!(rho.rank(), 4);
        let rows = [a.clone(), b.clone()];
        let cols = [a.bra(), b.bra()];
        let e = diag_hermitian(&rho, &rows, &cols, &TruncPolicy::exact().with_cutoff(1e-12),
            &Index::link(1)).unwrap();
        // a rank-1 density matrix
        assert_eq!(e.spec.kept, 1);
        assert_abs_diff_eq!(e.spec.eigs[0], 1.0, epsilon = 1e-10);
        assert!(is_isometry(&e.u, &rows, &e.link));
        assert!(matches!(
            diag_hermitian(&rho, &rows, &cols[..1], &TruncPolicy::exact(), &Index::link(1)),
            Err(InvalidSplit(_)),
        ));
    }
}
