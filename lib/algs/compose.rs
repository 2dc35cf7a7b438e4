//! Product of two operator chains.
//!
//! For operators *A* and *B* on the same sites, [`compose`] builds the chain
//! for *AB*, where *B* acts first. The two chains are zipped together in a
//! single left-to-right pass: at every site the running right factor (the
//! *fork*) absorbs one tensor of each operator and is split again, leaving the
//! finished result tensor behind.
//!
//! ```text
//!        A out                 A out
//!          |                     |
//!   fork--A[i]--        =  C[i]--fork'--
//!          |               |  |
//!   fork--B[i]--         B in
//!          |
//!        B in
//! ```
//!
//! The result is finally brought into canonical form with its center at site 0,
//! truncating according to the resolved [`TruncPolicy`].

use log::debug;
use crate::{
    args::{ Args, ConfigError, Defaults },
    chain::Mpo,
    decomp::{ self, Direction, Method, TruncPolicy },
    index::{ Index, Layer },
    tensor::Tensor,
};
use super::AlgResult;

/// Compute the operator product `a · b`, where `b` acts first.
///
/// Unset options in `args` default to a cutoff of 10<sup>−14</sup> and no
/// bound on bond dimensions. `a` and `b` may be the same chain.
///
/// Fails if the chains differ in length or the input index of `a` doesn't fit
/// the output index of `b` at some site.
pub fn compose(a: &Mpo, b: &Mpo, args: &Args) -> AlgResult<Mpo> {
    let opts = args.resolve(&Defaults::COMPOSE);
    compose_with(a, b, &opts.policy)
}

/// Like [`compose`], but write the result into `res`. `res` is left untouched
/// if an error is returned.
pub fn compose_into(a: &Mpo, b: &Mpo, res: &mut Mpo, args: &Args) -> AlgResult<()> {
    *res = compose(a, b, args)?;
    Ok(())
}

fn check_sites(a: &Mpo, b: &Mpo) -> Result<(), ConfigError> {
    if a.len() != b.len() {
        return Err(ConfigError::LengthMismatch(a.len(), b.len()));
    }
    (0..a.len()).try_for_each(|site| {
        match (a.site_in(site), b.site_out(site)) {
            (Some(a_in), Some(b_out)) if a_in.dim() == b_out.dim() => Ok(()),
            _ => Err(ConfigError::SiteMismatch { site }),
        }
    })
}

fn lower_aux(idx: &mut Index) {
    if matches!(idx.layer(), Layer::Aux(_)) { idx.set_layer(Layer::Ket); }
}

fn compose_with(a: &Mpo, b: &Mpo, policy: &TruncPolicy) -> AlgResult<Mpo> {
    check_sites(a, b)?;
    let n = a.len();

    let mut a_c = a.clone();
    a_c.position(0)?;
    let b_c
        = if std::ptr::eq(a, b) {
            a_c.clone()
        } else {
            let mut b_c = b.clone();
            b_c.position(0)?;
            b_c
        };

    // every leg of b moves out of the way, then its outputs are tied to the
    // inputs of a
    let mut b_c = b_c.map_indices(|idx| idx.set_layer(Layer::Aux(0)));
    let mut a_out: Vec<Index> = Vec::with_capacity(n);
    let mut b_in: Vec<Index> = Vec::with_capacity(n);
    for i in 0..n {
        let (Some(ai), Some(ao), Some(bi), Some(bo))
            = (a_c.site_in(i), a_c.site_out(i), b_c.site_in(i), b_c.site_out(i))
            else { return Err(ConfigError::SiteMismatch { site: i }.into()); };
        b_c.replace_index_at(i, &bo, ai)?;
        a_out.push(ao);
        b_in.push(bi);
    }

    if n == 1 {
        let t = a_c.tensor(0).contract(b_c.tensor(0))?.map_indices(lower_aux);
        return Ok(Mpo::from_tensors(vec![t])?);
    }

    let mut tensors: Vec<Tensor> = Vec::with_capacity(n);
    let mut fork: Option<Tensor> = None;
    let mut prev: Option<Index> = None;
    for i in 0..n - 2 {
        let cluster = grow_fork(fork.as_ref(), a_c.tensor(i), b_c.tensor(i))?;
        let left: Vec<Index>
            = prev.iter().cloned()
            .chain([a_out[i].clone(), b_in[i].clone()])
            .collect();
        let f = decomp::factorize(
            &cluster, &left, Direction::FromLeft, Method::DensityMatrix, policy,
            &Index::link(1), None)?;
        debug!("compose: site {i}: kept {} truncerr {:.2e}", f.spec.kept, f.spec.truncerr);
        tensors.push(f.left);
        prev = Some(f.link);
        fork = Some(f.right);
    }

    // close the last bond with a single split of the remaining two sites
    let cluster = grow_fork(fork.as_ref(), a_c.tensor(n - 2), b_c.tensor(n - 2))?;
    let nfork = cluster.contract(a_c.tensor(n - 1))?.contract(b_c.tensor(n - 1))?;
    let left: Vec<Index>
        = prev.iter().cloned()
        .chain([a_out[n - 2].clone(), b_in[n - 2].clone()])
        .collect();
    let f = decomp::factorize(
        &nfork, &left, Direction::FromRight, Method::Auto, policy,
        &Index::link(1), None)?;
    debug!("compose: bond {}: kept {} truncerr {:.2e}", n - 2, f.spec.kept, f.spec.truncerr);
    tensors.push(f.left);
    tensors.push(f.right);

    let tensors: Vec<Tensor>
        = tensors.into_iter().map(|t| t.map_indices(lower_aux)).collect();
    let mut res = Mpo::from_tensors(tensors)?.with_lims(n - 2, n - 1);
    res.orthogonalize(policy)?;
    Ok(res)
}

fn grow_fork(fork: Option<&Tensor>, a: &Tensor, b: &Tensor) -> AlgResult<Tensor> {
    let ab = match fork {
        Some(f) => f.contract(a)?,
        None => a.clone(),
    };
    Ok(ab.contract(b)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::{ AlgError, testing::* };
    use rand::{ SeedableRng, rngs::StdRng };

    #[test]
    fn composition_matches_matrix_product() {
        let mut rng = StdRng::seed_from_u64(21);
        let sites: Vec<Index> = (0..4).map(|_| Index::site(2)).collect();
        let a = random_mpo(&sites, &mut rng);
        let b = random_mpo(&sites, &mut rng);
        let ab = compose(&a, &b, &Args::new()).unwrap();
        assert_eq!(ab.ortho_center(), Some(0));
        let want = a.to_dense(&sites).unwrap().dot(&b.to_dense(&sites).unwrap());
        let got = ab.to_dense(&sites).unwrap();
        let err = got.iter().zip(&want).map(|(x, y)| (x - y).norm()).fold(0.0, f64::max);
        assert!(err < 1e-9);
    }

    #[test]
    fn self_composition() {
        let mut rng = StdRng::seed_from_u64(22);
        let sites: Vec<Index> = (0..3).map(|_| Index::site(2)).collect();
        let a = random_mpo(&sites, &mut rng);
        let before = a.clone();
        let aa = compose(&a, &a, &Args::new()).unwrap();
        assert_eq!(a, before);
        let aa2 = compose(&a.clone(), &a.clone(), &Args::new()).unwrap();
        let x = aa.to_dense(&sites).unwrap();
        let y = aa2.to_dense(&sites).unwrap();
        let err = x.iter().zip(&y).map(|(p, q)| (p - q).norm()).fold(0.0, f64::max);
        assert!(err < 1e-9);
    }

    #[test]
    fn single_site_and_two_sites() {
        let mut rng = StdRng::seed_from_u64(23);
        for n in [1, 2] {
            let sites: Vec<Index> = (0..n).map(|_| Index::site(3)).collect();
            let a = random_mpo(&sites, &mut rng);
            let b = random_mpo(&sites, &mut rng);
            let ab = compose(&a, &b, &Args::new()).unwrap();
            let want = a.to_dense(&sites).unwrap().dot(&b.to_dense(&sites).unwrap());
            let got = ab.to_dense(&sites).unwrap();
            let err = got.iter().zip(&want).map(|(x, y)| (x - y).norm()).fold(0.0, f64::max);
            assert!(err < 1e-9);
        }
    }

    #[test]
    fn maxdim_bounds_result() {
        let mut rng = StdRng::seed_from_u64(24);
        let sites: Vec<Index> = (0..5).map(|_| Index::site(2)).collect();
        let a = random_mpo(&sites, &mut rng);
        let b = random_mpo(&sites, &mut rng);
        let ab = compose(&a, &b, &Args::new().with_maxdim(3)).unwrap();
        for bond in 0..4 {
            assert!(ab.link_index(bond).unwrap().dim() <= 3);
        }
    }

    #[test]
    fn mismatched_lengths_leave_output() {
        let mut rng = StdRng::seed_from_u64(25);
        let sites: Vec<Index> = (0..3).map(|_| Index::site(2)).collect();
        let a = random_mpo(&sites, &mut rng);
        let b = random_mpo(&sites[..2], &mut rng);
        let mut res = a.clone();
        let out = compose_into(&a, &b, &mut res, &Args::new());
        assert!(matches!(
            out,
            Err(AlgError::Config(ConfigError::LengthMismatch(3, 2))),
        ));
        assert_eq!(res, a);
    }
}
