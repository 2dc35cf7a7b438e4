//! Truncated Taylor series of *e*<sup>−τ*H*</sup> acting on a state.
//!
//! The series to order *n* is evaluated in nested (Horner) form,
//!
//! <blockquote>
//!   <p>
//!     |φ<sub><i>n</i>+1</sub>⟩ = |ψ⟩,
//!     &nbsp;&nbsp;
//!     |φ<sub><i>k</i></sub>⟩ = |ψ⟩ − (τ/<i>k</i>) <i>H</i> |φ<sub><i>k</i>+1</sub>⟩,
//!     &nbsp;&nbsp;
//!     <i>k</i> = <i>n</i>, ..., 1,
//!   </p>
//! </blockquote>
//!
//! and each term is fitted into the output chain with two-site sweeps, the
//! same way [`fit_apply`](super::fit_apply) does for a single operator. Two
//! environment caches are kept: `B` for the overlap of the output with |ψ⟩
//! and `BH` for the overlap of the output with *H*|φ<sub><i>k</i>+1</sub>⟩.
//!
//! Successive orders alternate between two orientations of the caches. On
//! "up" orders the output sits on the bra side of every environment; on
//! "down" orders it sits on the ket side, the local targets come out
//! conjugated, and *H* is applied through its conjugate, which requires *H* to
//! be Hermitian. This way the `BH` cache left behind by one order is already
//! oriented correctly for the next, where the previous output becomes the
//! operand. The `B` cache for an order is taken from two orders back, which
//! shares that orientation.

use std::borrow::Cow;
use log::debug;
use num_complex::Complex64 as C64;
use crate::{
    args::{ Args, ConfigError, Defaults },
    chain::{ Mpo, Mps },
    decomp::Method,
    env::{ self, Environments },
    index::Layer,
    sweep::SweepIter,
    tensor::Tensor,
};
use super::{ AlgResult, site_pairs };

// conjugate, links in the bra layer
fn bra(t: &Tensor) -> Tensor {
    t.conj().map_indices(|idx| {
        if idx.is_link() { idx.set_layer(Layer::Bra); }
    })
}

// conjugate, links in the bra layer, sites raised to meet the output of H
fn bra_raised(t: &Tensor) -> Tensor {
    t.conj().map_indices(|idx| {
        if idx.is_link() { idx.set_layer(Layer::Bra); }
        if idx.is_site() { idx.set_plev(1); }
    })
}

// back to the ket layer at site level 0
fn lower(t: Tensor) -> Tensor {
    t.map_indices(|idx| {
        if idx.layer() == Layer::Bra { idx.set_layer(Layer::Ket); }
        if idx.is_site() { idx.set_plev(0); }
    })
}

fn ket_side(t: &Tensor, up: bool) -> Cow<'_, Tensor> {
    if up { Cow::Borrowed(t) } else { Cow::Owned(bra(t)) }
}

fn op_side(t: &Tensor, up: bool) -> Cow<'_, Tensor> {
    if up { Cow::Borrowed(t) } else { Cow::Owned(bra_raised(t)) }
}

/// Approximate *e*<sup>−τ*H*</sup>|`psi`⟩ by its Taylor series and write it
/// into `res`.
///
/// `h` must be Hermitian with outputs at prime level 1. Unset options in
/// `args` default to order 10, one sweep per order, and a cutoff of
/// 10<sup>−13</sup>; every local factorization is a plain SVD.
///
/// `res` must carry the site indices of `psi`; its contents are otherwise
/// replaced, and it's left untouched if an error is returned. On success its
/// orthogonality center is at site 0.
pub fn apply_exp(psi: &Mps, h: &Mpo, tau: f64, res: &mut Mps, args: &Args)
    -> AlgResult<()>
{
    let opts = args.resolve(&Defaults::EXP);
    let pairs = site_pairs(h, psi)?;
    let n = psi.len();
    if res.len() != n {
        return Err(ConfigError::LengthMismatch(n, res.len()).into());
    }
    for (site, (s, o)) in pairs.iter().enumerate() {
        if o.noprime() != *s || res.site_index(site).as_ref() != Some(s) {
            return Err(ConfigError::SiteMismatch { site }.into());
        }
    }

    let mut psi = psi.clone();
    psi.position(0)?;
    let mut out = psi.clone();
    let mut last = psi.clone();

    if n == 1 {
        for ord in (1..=opts.order).rev() {
            let mpofac = C64::from(-tau / ord as f64);
            let hlast = lower(h.tensor(0).contract(last.tensor(0))?);
            let t = psi.tensor(0).add_checked(&hlast.scale(mpofac))?;
            out.set_tensor(0, t)?;
            last = out.clone();
        }
        *res = out;
        return Ok(());
    }

    let mut b_envs = Environments::new(n);
    let mut bh_envs = Environments::new(n);
    for j in (2..n).rev() {
        let p = psi.tensor(j);
        let e = env::grow(b_envs.get(j + 1), p)?.contract(&bra(p))?;
        b_envs.set(j, e);
        let e
            = env::grow(bh_envs.get(j + 1), p)?
            .contract(h.tensor(j))?
            .contract(&bra_raised(p))?;
        bh_envs.set(j, e);
    }
    let mut last_b_envs = b_envs.clone();

    let mut up = true;
    for (k, ord) in (1..=opts.order).rev().enumerate() {
        let mpofac = C64::from(-tau / ord as f64);
        if k > 0 { std::mem::swap(&mut b_envs, &mut last_b_envs); }
        for sw in 0..opts.nsweep {
            for (b, half) in SweepIter::new(n) {
                let lwf = env::grow(b_envs.left(b), &ket_side(psi.tensor(b), up))?;
                let rwf = env::grow(b_envs.right(b), &ket_side(psi.tensor(b + 1), up))?;
                let lwfh
                    = env::grow(bh_envs.left(b), &op_side(last.tensor(b), up))?
                    .contract(h.tensor(b))?;
                let rwfh
                    = env::grow(bh_envs.right(b), &op_side(last.tensor(b + 1), up))?
                    .contract(h.tensor(b + 1))?;
                let mut wf
                    = lower(lwf.contract(&rwf)?)
                    .add_checked(&lower(lwfh.contract(&rwfh)?).scale(mpofac))?;
                if !up { wf.conj_mut(); }
                let spec
                    = out.svd_bond(
                        b, &wf, half.direction(), Method::Svd, &opts.policy, None)?;
                debug!(
                    "exp: order {ord} sweep {sw} bond {b} {half:?}: kept {} truncerr {:.2e}",
                    spec.kept, spec.truncerr,
                );

                let (site, wfp, wfh)
                    = if half.is_forward() { (b, lwf, lwfh) } else { (b + 1, rwf, rwfh) };
                let t = out.tensor(site);
                if up {
                    b_envs.set(site, wfp.contract(&bra(t))?);
                    bh_envs.set(site, wfh.contract(&bra_raised(t))?);
                } else {
                    b_envs.set(site, wfp.contract(t)?);
                    bh_envs.set(site, wfh.contract(t)?);
                }
            }
        }
        last = out.clone();
        up = !up;
    }
    *res = out;
    Ok(())
}
