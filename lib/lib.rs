//! Sweep algorithms for matrix product operators and states.
//!
//! Operators ([`Mpo`]) and states ([`Mps`]) are chains of dense complex
//! tensors whose legs are named by [`Index`]es. On top of them this crate
//! provides
//!
//! - operator composition, *C* = *AB* ([`compose`]);
//! - operator application, *K*|ψ⟩, either exactly with density-matrix
//!   compression ([`density_matrix_apply`]) or variationally against a guess
//!   ([`fit_apply`]);
//! - power-series application of *e*<sup>−τ*H*</sup> ([`apply_exp`]).
//!
//! Every algorithm keeps its results in canonical form and truncates bonds
//! according to a [`TruncPolicy`], resolved from an [`Args`] builder against
//! per-algorithm defaults.
//!
//! ```
//! use mpo_algs::{ Args, Index, Mpo, Mps, compose, density_matrix_apply };
//!
//! let sites: Vec<Index> = (0..4).map(|_| Index::site(2)).collect();
//! let psi = Mps::product(&sites, &[0, 1, 0, 1]).unwrap();
//! let id = Mpo::identity(&sites).unwrap();
//!
//! let id2 = compose(&id, &id, &Args::new()).unwrap();
//! let out = density_matrix_apply(&id2, &psi, &Args::new().with_cutoff(1e-12)).unwrap();
//! assert!((out.inner(&psi).unwrap().re - 1.0).abs() < 1e-10);
//! ```
//!
//! Diagnostics are emitted through the [`log`] facade: per-bond truncation
//! summaries at `debug` level, environment updates at `trace` level, and uses
//! of deprecated options at `warn` level.

pub mod index;
pub mod tensor;
pub mod decomp;
pub mod chain;
pub mod sweep;
pub mod env;
pub mod args;
pub mod algs;

pub use index::Index;
pub use tensor::Tensor;
pub use decomp::TruncPolicy;
pub use chain::{ Mpo, Mps };
pub use sweep::Sweeps;
pub use args::{ ApplyMethod, Args };
pub use algs::{
    AlgError,
    AlgResult,
    apply,
    apply_exp,
    apply_with_guess,
    compose,
    compose_into,
    density_matrix_apply,
    fit_apply,
};
