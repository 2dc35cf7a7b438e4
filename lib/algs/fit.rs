//! Variational application of an operator to a state.
//!
//! Starting from a guess for *K*|*x*⟩, every two-site block of the guess is
//! replaced in turn by the projection of the exact product onto the rest of
//! the guess:
//!
//! ```text
//!   L[b-1] --- Kx*[b] --- Kx*[b+1] --- R[b+2]
//!     |          |           |           |
//!     |--------- K[b] ------ K[b+1] -----|
//!     |          |           |           |
//!   L[b-1] ---- x[b] ------ x[b+1] ---- R[b+2]
//! ```
//!
//! The environments `L` and `R` hold ⟨*Kx*|*K*|*x*⟩ contracted over every other
//! site. The guess is stored conjugated while the sweeps run, so both
//! environments and local targets are plain contractions; it's conjugated
//! back at the end.
//!
//! Sweeps run a fixed number of times with no convergence check, each with
//! its own [`TruncPolicy`](crate::decomp::TruncPolicy). A non-zero noise term
//! mixes the kept half of the diagram above, with its operator link left
//! open, into the density matrix of each split.

use log::debug;
use crate::{
    args::{ Args, ConfigError, Defaults, Resolved },
    chain::{ Mpo, Mps },
    decomp::{ LocalOp, Method },
    env::{ self, Environments },
    index::{ Index, Layer },
    sweep::SweepIter,
};
use super::{ AlgResult, normalized, site_pairs };

/// Fit `kx` to `fac · k |x⟩`, starting from the current contents of `kx`.
///
/// The schedule is taken from [`Args::with_sweeps`] if set, and otherwise
/// repeats the resolved truncation policy `nsweep` times (default 1, with a
/// cutoff of 10<sup>−13</sup>). The prefactor `fac` defaults to 1.
///
/// Fails without touching `kx` if the chains differ in length, the site
/// indices of `x` aren't inputs to `k`, or the site indices of `kx` aren't the
/// outputs of `k` at prime level 0.
pub fn fit_apply(k: &Mpo, x: &Mps, kx: &mut Mps, args: &Args) -> AlgResult<()> {
    let opts = args.resolve(&Defaults::APPLY_GUESS);
    apply_fit(k, x, kx, &opts)
}

pub(crate) fn apply_fit(k: &Mpo, x: &Mps, kx: &mut Mps, opts: &Resolved)
    -> AlgResult<()>
{
    let pairs = site_pairs(k, x)?;
    let n = x.len();
    if kx.len() != n {
        return Err(ConfigError::LengthMismatch(n, kx.len()).into());
    }
    let outs: Vec<Index> = pairs.into_iter().map(|(_, o)| o).collect();
    let targets: Vec<Index> = outs.iter().map(Index::noprime).collect();
    if let Some(site)
        = (0..n).find(|i| kx.site_index(*i).as_ref() != Some(&targets[*i]))
    {
        return Err(ConfigError::SiteMismatch { site }.into());
    }

    if n == 1 {
        let mut t = x.tensor(0).contract(k.tensor(0))?.scale(opts.fac);
        if opts.normalize { t = normalized(t); }
        t.replace_index(&outs[0], targets[0].clone())?;
        *kx = Mps::from_tensors(vec![t])?;
        return Ok(());
    }

    // conjugated working copy carrying the raw outputs of k, with its links
    // pushed into the bra layer
    let mut w = kx.conj().map_indices(|idx| {
        if idx.is_link() { idx.set_layer(Layer::Bra); }
    });
    for (i, (out, target)) in outs.iter().zip(&targets).enumerate() {
        w.replace_index_at(i, target, out.clone())?;
    }
    w.position(0)?;

    let mut envs = Environments::new(n);
    for j in (2..n).rev() {
        let e
            = env::grow(envs.get(j + 1), x.tensor(j))?
            .contract(k.tensor(j))?
            .contract(w.tensor(j))?;
        envs.set(j, e);
    }

    for (sw, policy) in opts.sweeps.iter().enumerate() {
        for (b, half) in SweepIter::new(n) {
            let lwf = env::grow(envs.left(b), x.tensor(b))?.contract(k.tensor(b))?;
            let rwf
                = env::grow(envs.right(b), x.tensor(b + 1))?
                .contract(k.tensor(b + 1))?;
            let mut wf = lwf.contract(&rwf)?.scale(opts.fac);
            if opts.normalize { wf = normalized(wf); }
            wf.conj_mut();
            let ctx
                = LocalOp::new(
                    [x.tensor(b), x.tensor(b + 1)], [k.tensor(b), k.tensor(b + 1)])
                .with_envs(envs.left(b), envs.right(b))
                .conjugated();
            let spec
                = w.svd_bond(b, &wf, half.direction(), Method::Auto, policy, Some(ctx))?;
            debug!(
                "fit: sweep {sw} bond {b} {half:?}: kept {} truncerr {:.2e}",
                spec.kept, spec.truncerr,
            );
            if half.is_forward() {
                envs.set(b, lwf.contract(w.tensor(b))?);
            } else {
                envs.set(b + 1, rwf.contract(w.tensor(b + 1))?);
            }
        }
    }

    let mut res = w.conj().map_indices(|idx| {
        if idx.is_link() { idx.set_layer(Layer::Ket); }
    });
    for (i, (out, target)) in outs.iter().zip(&targets).enumerate() {
        res.replace_index_at(i, out, target.clone())?;
    }
    *kx = res;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use num_complex::Complex64 as C64;
    use rand::{ SeedableRng, rngs::StdRng };
    use crate::{
        algs::{ AlgError, density_matrix_apply, testing::* },
        decomp::TruncPolicy,
        sweep::Sweeps,
    };

    #[test]
    fn fit_from_exact_stays_exact() {
        let mut rng = StdRng::seed_from_u64(41);
        let sites: Vec<Index> = (0..5).map(|_| Index::site(2)).collect();
        let k = random_mpo(&sites, &mut rng);
        let x = random_mps(&sites, &mut rng);
        let want = k.to_dense(&sites).unwrap().dot(&x.to_dense(&sites).unwrap());
        let mut kx = density_matrix_apply(&k, &x, &Args::new()).unwrap();
        fit_apply(&k, &x, &mut kx, &Args::new()).unwrap();
        assert_eq!(kx.ortho_center(), Some(0));
        assert!(max_diff(&kx.to_dense(&sites).unwrap(), &want) < 1e-9);
    }

    #[test]
    fn fit_from_product_guess() {
        // two sweeps from a rank-1 guess recover the exact product on 4 sites
        let mut rng = StdRng::seed_from_u64(42);
        let sites: Vec<Index> = (0..4).map(|_| Index::site(2)).collect();
        let k = random_mpo(&sites, &mut rng);
        let x = random_mps(&sites, &mut rng);
        let want = k.to_dense(&sites).unwrap().dot(&x.to_dense(&sites).unwrap());
        let mut kx = Mps::product(&sites, &[0, 0, 0, 0]).unwrap();
        fit_apply(&k, &x, &mut kx, &Args::new().with_nsweep(2)).unwrap();
        assert!(max_diff(&kx.to_dense(&sites).unwrap(), &want) < 1e-9);
    }

    #[test]
    fn prefactor_and_normalization() {
        let mut rng = StdRng::seed_from_u64(43);
        let sites: Vec<Index> = (0..3).map(|_| Index::site(2)).collect();
        let k = random_mpo(&sites, &mut rng);
        let x = random_mps(&sites, &mut rng);
        let fac = C64::new(0.0, 2.0);
        let want
            = k.to_dense(&sites).unwrap().dot(&x.to_dense(&sites).unwrap())
            .mapv(|z| z * fac);
        let mut kx = density_matrix_apply(&k, &x, &Args::new()).unwrap();
        fit_apply(&k, &x, &mut kx, &Args::new().with_fac(fac)).unwrap();
        assert!(max_diff(&kx.to_dense(&sites).unwrap(), &want) < 1e-9);

        fit_apply(&k, &x, &mut kx, &Args::new().with_normalize(true)).unwrap();
        assert_abs_diff_eq!(kx.norm().unwrap(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn schedule_bounds_bond_dimensions() {
        let mut rng = StdRng::seed_from_u64(44);
        let sites: Vec<Index> = (0..6).map(|_| Index::site(2)).collect();
        let k = random_mpo(&sites, &mut rng);
        let x = random_mps(&sites, &mut rng);
        let mut kx = density_matrix_apply(&k, &x, &Args::new()).unwrap();
        let sweeps
            = Sweeps::uniform(3, TruncPolicy::exact())
            .with_maxdim(&[6, 4, 3])
            .with_noise(&[1e-6, 0.0]);
        fit_apply(&k, &x, &mut kx, &Args::new().with_sweeps(sweeps)).unwrap();
        for b in 0..5 {
            assert!(kx.link_index(b).unwrap().dim() <= 3);
        }
        assert_eq!(kx.ortho_center(), Some(0));
    }

    #[test]
    fn noisy_sweeps_stay_exact() {
        let mut rng = StdRng::seed_from_u64(47);
        let sites: Vec<Index> = (0..5).map(|_| Index::site(2)).collect();
        let k = random_mpo(&sites, &mut rng);
        let x = random_mps(&sites, &mut rng);
        let want = k.to_dense(&sites).unwrap().dot(&x.to_dense(&sites).unwrap());
        let mut kx = density_matrix_apply(&k, &x, &Args::new()).unwrap();
        let sweeps
            = Sweeps::uniform(2, TruncPolicy::exact().with_cutoff(1e-13))
            .with_noise(&[1e-3, 0.0]);
        fit_apply(&k, &x, &mut kx, &Args::new().with_sweeps(sweeps)).unwrap();
        assert!(max_diff(&kx.to_dense(&sites).unwrap(), &want) < 1e-9);
    }

    #[test]
    fn noise_with_resized_outputs() {
        // inputs of dimension 2 mapped to outputs of dimension 3
        let mut rng = StdRng::seed_from_u64(48);
        let ins: Vec<Index> = (0..4).map(|_| Index::site(2)).collect();
        let outs: Vec<Index> = (0..4).map(|_| Index::site(3)).collect();
        let (k, kd) = random_rect_mpo(&ins, &outs, &mut rng);
        let x = random_mps(&ins, &mut rng);
        let want = kd.dot(&x.to_dense(&ins).unwrap());
        let mut kx = density_matrix_apply(&k, &x, &Args::new()).unwrap();
        assert!(max_diff(&kx.to_dense(&outs).unwrap(), &want) < 1e-9);
        let sweeps = Sweeps::uniform(1, TruncPolicy::exact()).with_noise(&[1e-3]);
        fit_apply(&k, &x, &mut kx, &Args::new().with_sweeps(sweeps)).unwrap();
        assert!(max_diff(&kx.to_dense(&outs).unwrap(), &want) < 1e-9);
        assert!((0..4).all(|i| kx.site_index(i) == Some(outs[i].clone())));
    }

    #[test]
    fn single_site() {
        let mut rng = StdRng::seed_from_u64(45);
        let sites = vec![Index::site(3)];
        let k = random_mpo(&sites, &mut rng);
        let x = random_mps(&sites, &mut rng);
        let want = k.to_dense(&sites).unwrap().dot(&x.to_dense(&sites).unwrap());
        let mut kx = x.clone();
        fit_apply(&k, &x, &mut kx, &Args::new()).unwrap();
        assert!(max_diff(&kx.to_dense(&sites).unwrap(), &want) < 1e-12);
    }

    #[test]
    fn bad_guess_is_left_alone() {
        let mut rng = StdRng::seed_from_u64(46);
        let sites: Vec<Index> = (0..3).map(|_| Index::site(2)).collect();
        let other: Vec<Index> = (0..3).map(|_| Index::site(2)).collect();
        let k = random_mpo(&sites, &mut rng);
        let x = random_mps(&sites, &mut rng);
        let mut kx = random_mps(&other, &mut rng);
        let before = kx.clone();
        assert!(matches!(
            fit_apply(&k, &x, &mut kx, &Args::new()),
            Err(AlgError::Config(ConfigError::SiteMismatch { site: 0 })),
        ));
        assert_eq!(kx, before);

        let mut short = random_mps(&sites[..2], &mut rng);
        assert!(matches!(
            fit_apply(&k, &x, &mut short, &Args::new()),
            Err(AlgError::Config(ConfigError::LengthMismatch(3, 2))),
        ));
    }
}
