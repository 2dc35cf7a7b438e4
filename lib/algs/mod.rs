//! Sweep algorithms on operator and state chains.
//!
//! - [`compose`]: product of two operators, compressed in one pass.
//! - [`apply`] / [`apply_with_guess`]: an operator acting on a state, either
//!   contracted exactly and compressed with reduced density matrices
//!   ([`density_matrix_apply`]) or fitted variationally against a guess
//!   ([`fit_apply`]).
//! - [`apply_exp`]: a truncated Taylor series of *e*<sup>−τ*H*</sup> acting on
//!   a state, fitted one order at a time.
//!
//! All of them take an [`Args`] and validate their inputs before touching any
//! output.

use num_complex::Complex64 as C64;
use thiserror::Error;
use crate::{
    args::{ ApplyMethod, Args, ConfigError, Defaults },
    chain::{ ChainError, Mpo, Mps },
    decomp::DecompError,
    index::Index,
    tensor::{ Tensor, TensorError },
};

pub mod compose;
pub mod density;
pub mod exph;
pub mod fit;

pub use compose::{ compose, compose_into };
pub use density::density_matrix_apply;
pub use exph::apply_exp;
pub use fit::fit_apply;

#[derive(Debug, Error)]
pub enum AlgError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Decomp(#[from] DecompError),

    #[error("{0}")]
    Chain(#[from] ChainError),

    #[error("{0}")]
    Tensor(#[from] TensorError),
}
pub type AlgResult<T> = Result<T, AlgError>;

/// Pair up the site indices of an operator and a state: for each site, the
/// state's index and the operator's other site index.
///
/// Fails if the chains differ in length or the state's site index isn't one of
/// the operator's.
pub(crate) fn site_pairs(k: &Mpo, x: &Mps) -> Result<Vec<(Index, Index)>, ConfigError> {
    if k.len() != x.len() {
        return Err(ConfigError::LengthMismatch(k.len(), x.len()));
    }
    (0..x.len())
        .map(|site| {
            let s = x.site_index(site)
                .filter(|s| k.tensor(site).has_index(s))
                .ok_or(ConfigError::SiteMismatch { site })?;
            let o = k.site_indices(site).into_iter()
                .find(|idx| *idx != s)
                .ok_or(ConfigError::SiteMismatch { site })?;
            Ok((s, o))
        })
        .collect()
}

/// Rescale `t` to unit norm, unless it's zero.
pub(crate) fn normalized(t: Tensor) -> Tensor {
    let norm = t.norm();
    if norm > 0.0 { t.scale(C64::from(norm.recip())) } else { t }
}

/// Apply operator `k` to state `x`.
///
/// The method is selected by [`Args::with_method`] and defaults to
/// [`ApplyMethod::DensityMatrix`]. With [`ApplyMethod::Fit`], the fit starts
/// from `x` itself, relabeled to carry the output site indices of `k`.
///
/// The site indices of the result are the output indices of `k` brought down
/// to prime level 0.
pub fn apply(k: &Mpo, x: &Mps, args: &Args) -> AlgResult<Mps> {
    let opts = args.resolve(&Defaults::APPLY);
    match opts.method {
        ApplyMethod::DensityMatrix => density::apply_density(k, x, &opts),
        ApplyMethod::Fit => {
            let pairs = site_pairs(k, x)?;
            let mut guess = x.clone();
            for (i, (s, o)) in pairs.iter().enumerate() {
                guess.replace_index_at(i, s, o.noprime())?;
            }
            fit::apply_fit(k, x, &mut guess, &opts)?;
            Ok(guess)
        },
    }
}

/// Apply operator `k` to state `x`, starting from an initial `guess`.
///
/// The method defaults to [`ApplyMethod::Fit`], which is the only one that
/// accepts a guess.
pub fn apply_with_guess(k: &Mpo, x: &Mps, guess: &Mps, args: &Args)
    -> AlgResult<Mps>
{
    let opts = args.resolve(&Defaults::APPLY_GUESS);
    match opts.method {
        ApplyMethod::DensityMatrix => Err(ConfigError::GuessNotAccepted.into()),
        ApplyMethod::Fit => {
            let mut res = guess.clone();
            fit::apply_fit(k, x, &mut res, &opts)?;
            Ok(res)
        },
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rand::{ SeedableRng, rngs::StdRng };
    use testing::*;

    #[test]
    fn apply_methods_agree() {
        let mut rng = StdRng::seed_from_u64(11);
        let sites: Vec<Index> = (0..4).map(|_| Index::site(2)).collect();
        let k = random_mpo(&sites, &mut rng);
        let x = random_mps(&sites, &mut rng);
        let want = k.to_dense(&sites).unwrap().dot(&x.to_dense(&sites).unwrap());

        let exact = apply(&k, &x, &Args::new()).unwrap();
        assert!(max_diff(&exact.to_dense(&sites).unwrap(), &want) < 1e-9);

        let fitted
            = apply(
                &k, &x,
                &Args::new().with_method(ApplyMethod::Fit).with_nsweep(2),
            )
            .unwrap();
        assert!(max_diff(&fitted.to_dense(&sites).unwrap(), &want) < 1e-9);

        let refit = apply_with_guess(&k, &x, &exact, &Args::new()).unwrap();
        assert!(max_diff(&refit.to_dense(&sites).unwrap(), &want) < 1e-9);
    }

    #[test]
    fn guess_rejected_for_density_matrix() {
        let mut rng = StdRng::seed_from_u64(12);
        let sites: Vec<Index> = (0..3).map(|_| Index::site(2)).collect();
        let k = random_mpo(&sites, &mut rng);
        let x = random_mps(&sites, &mut rng);
        let args = Args::new().with_method(ApplyMethod::DensityMatrix);
        assert!(matches!(
            apply_with_guess(&k, &x, &x, &args),
            Err(AlgError::Config(ConfigError::GuessNotAccepted)),
        ));
    }

    #[test]
    fn site_pairs_checks_sites() {
        let mut rng = StdRng::seed_from_u64(13);
        let sites: Vec<Index> = (0..3).map(|_| Index::site(2)).collect();
        let other: Vec<Index> = (0..3).map(|_| Index::site(2)).collect();
        let k = random_mpo(&sites, &mut rng);
        let x = random_mps(&sites, &mut rng);
        let pairs = site_pairs(&k, &x).unwrap();
        assert!(pairs.iter().zip(&sites).all(|((s, o), t)| s == t && *o == t.prime()));

        let y = random_mps(&other, &mut rng);
        assert_eq!(site_pairs(&k, &y), Err(ConfigError::SiteMismatch { site: 0 }));
        let z = random_mps(&sites[..2], &mut rng);
        assert_eq!(site_pairs(&k, &z), Err(ConfigError::LengthMismatch(3, 2)));
    }
}
