//! Exact application of an operator to a state, compressed from the right
//! with reduced density matrices.
//!
//! The product *K*|ψ⟩ is never formed as a chain. Instead, left environments
//! of ⟨ψ|*K*<sup>†</sup>*K*|ψ⟩ are built once, and a single right-to-left pass
//! diagonalizes the reduced density matrix of the growing right block at each
//! bond. Its dominant eigenvectors become the new right-orthogonal tensors and
//! are folded back into the block before moving on.
//!
//! ```text
//!   E[j-1] ---- O ----      rho = E[j-1] · O · O*
//!     |         |
//!     |        out
//!     |
//!   E[j-1] ---- O* ---
//!               |
//!              out~
//! ```
//!
//! There is no iteration, so the quality of the result depends only on the
//! truncation applied at each bond. When the caller doesn't fix a maximum
//! bond dimension, it is set at each bond to the product of the state's and
//! the operator's bond dimensions there, which bounds the rank of the density
//! matrix.

use log::debug;
use crate::{
    args::{ Args, Defaults, Resolved },
    chain::{ Mpo, Mps },
    decomp,
    env::{ self, Environments },
    index::{ Index, Layer },
    tensor::Tensor,
};
use super::{ AlgResult, normalized, site_pairs };

/// Apply `k` to `psi` exactly, compressing the result with reduced density
/// matrices.
///
/// Unset options in `args` default to a cutoff of 10<sup>−13</sup>, a
/// bond-dimension bound inferred per bond, and no normalization. The result
/// has its orthogonality center at site 0 and site indices equal to the
/// outputs of `k` at prime level 0.
///
/// Fails if the chains differ in length or the site indices of `psi` aren't
/// inputs to `k`.
pub fn density_matrix_apply(k: &Mpo, psi: &Mps, args: &Args) -> AlgResult<Mps> {
    let opts = args.resolve(&Defaults::APPLY);
    apply_density(k, psi, &opts)
}

fn to_bra(idx: &mut Index) { idx.set_layer(Layer::Bra); }

pub(crate) fn apply_density(k: &Mpo, psi: &Mps, opts: &Resolved) -> AlgResult<Mps> {
    let pairs = site_pairs(k, psi)?;
    let n = psi.len();
    let outs: Vec<Index> = pairs.into_iter().map(|(_, o)| o).collect();

    if n == 1 {
        let mut o = psi.tensor(0).contract(k.tensor(0))?;
        if opts.normalize { o = normalized(o); }
        o.replace_index(&outs[0], outs[0].noprime())?;
        return Ok(Mps::from_tensors(vec![o])?);
    }

    // conjugate copies; the operator's output stays in the ket layer so that
    // K† K is formed site by site
    let psic: Vec<Tensor>
        = psi.tensors().iter()
        .map(|t| t.conj().map_indices(to_bra))
        .collect();
    let kc: Vec<Tensor>
        = k.tensors().iter().zip(&outs)
        .map(|(t, out)| {
            t.conj().map_indices(|idx| { if *idx != *out { to_bra(idx); } })
        })
        .collect();

    let mut envs = Environments::new(n);
    for j in 0..n - 1 {
        let e
            = env::grow(envs.left(j), psi.tensor(j))?
            .contract(k.tensor(j))?
            .contract(&kc[j])?
            .contract(&psic[j])?;
        envs.set(j, e);
    }

    let mut res: Vec<Option<Tensor>> = vec![None; n];
    let mut o = psi.tensor(n - 1).contract(k.tensor(n - 1))?;
    for j in (0..n - 1).rev() {
        let e = envs.left(j + 1);
        let rows: Vec<Index>
            = o.indices().iter()
            .filter(|idx| e.map_or(true, |e| !e.has_index(idx)))
            .cloned()
            .collect();
        let cols: Vec<Index> = rows.iter().map(Index::bra).collect();
        let rho = env::grow(e, &o)?.contract(&o.conj().map_indices(to_bra))?;
        let mut policy = opts.policy;
        if !opts.maxdim_explicit {
            let dim_at = |t: Option<Index>| t.map(|idx| idx.dim()).unwrap_or(1);
            policy = policy.with_maxdim(dim_at(psi.link_index(j)) * dim_at(k.link_index(j)));
        }
        let eig = decomp::diag_hermitian(&rho, &rows, &cols, &policy, &Index::link(1))?;
        debug!(
            "density matrix apply: bond {j}: kept {} truncerr {:.2e}",
            eig.spec.kept, eig.spec.truncerr,
        );
        o = o.contract(&eig.u.conj())?
            .contract(psi.tensor(j))?
            .contract(k.tensor(j))?;
        res[j + 1] = Some(eig.u);
    }
    if opts.normalize { o = normalized(o); }
    res[0] = Some(o);

    let mut tensors: Vec<Tensor> = res.into_iter().flatten().collect();
    for (t, out) in tensors.iter_mut().zip(&outs) {
        t.replace_index(out, out.noprime())?;
    }
    Ok(Mps::from_tensors(tensors)?.with_lims(0, 1))
}
