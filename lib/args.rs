//! Options shared by the chain algorithms.
//!
//! Every algorithm takes an [`Args`], a bag of optional settings built with
//! `with_*` methods. Unset options fall back to per-algorithm defaults; all
//! defaulting, along with the handling of the deprecated `maxm` spelling,
//! happens in [`Args::resolve`], so algorithm bodies only ever see fully
//! populated values.
//!
//! ```
//! use mpo_algs::args::{ Args, ApplyMethod };
//!
//! let args = Args::new()
//!     .with_cutoff(1e-10)
//!     .with_maxdim(64)
//!     .with_method("fit".parse::<ApplyMethod>().unwrap());
//! assert_eq!(args.method(), Some(ApplyMethod::Fit));
//! ```

use std::str::FromStr;
use log::warn;
use num_complex::Complex64 as C64;
use thiserror::Error;
use crate::{
    decomp::TruncPolicy,
    sweep::Sweeps,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Returned when chains that must line up site-by-site differ in length.
    #[error("configuration error: chains of lengths {0} and {1}")]
    LengthMismatch(usize, usize),

    /// Returned when the site indices of two chains don't match at a site.
    #[error("configuration error: site indices don't match at site {site}")]
    SiteMismatch { site: usize },

    /// Returned when a method name can't be parsed.
    #[error("configuration error: unknown method '{0}'; supported methods are 'DensityMatrix' and 'Fit'")]
    UnknownMethod(String),

    /// Returned when an initial guess is passed to a method that doesn't take
    /// one.
    #[error("configuration error: method 'DensityMatrix' does not accept an initial guess")]
    GuessNotAccepted,
}
use ConfigError::*;
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Strategy for applying an operator to a state.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ApplyMethod {
    /// Exact contraction, compressed from one end with reduced density
    /// matrices.
    DensityMatrix,
    /// Variational two-site fitting against an initial guess.
    Fit,
}

impl FromStr for ApplyMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DensityMatrix" | "exact" => Ok(Self::DensityMatrix),
            "Fit" | "fit" => Ok(Self::Fit),
            other => Err(UnknownMethod(other.to_string())),
        }
    }
}

/// Optional settings for the chain algorithms. See the module-level docs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Args {
    cutoff: Option<f64>,
    maxdim: Option<usize>,
    maxm: Option<usize>,
    mindim: Option<usize>,
    noise: Option<f64>,
    nsweep: Option<usize>,
    normalize: Option<bool>,
    method: Option<ApplyMethod>,
    order: Option<usize>,
    sweeps: Option<Sweeps>,
    fac: Option<C64>,
}

impl Args {
    pub fn new() -> Self { Self::default() }

    /// Truncation cutoff on normalized squared singular values.
    #[must_use]
    pub fn with_cutoff(mut self, cutoff: f64) -> Self {
        self.cutoff = Some(cutoff.max(0.0));
        self
    }

    /// Hard upper bound on bond dimensions.
    #[must_use]
    pub fn with_maxdim(mut self, maxdim: usize) -> Self {
        self.maxdim = Some(maxdim.max(1));
        self
    }

    /// Old spelling of [`Self::with_maxdim`]. When both are given, `maxdim`
    /// wins.
    #[deprecated(note = "use `with_maxdim` instead")]
    #[must_use]
    pub fn with_maxm(mut self, maxm: usize) -> Self {
        self.maxm = Some(maxm.max(1));
        self
    }

    /// Lower bound on bond dimensions, where the rank permits.
    #[must_use]
    pub fn with_mindim(mut self, mindim: usize) -> Self {
        self.mindim = Some(mindim.max(1));
        self
    }

    /// Relative density matrix perturbation during fitting.
    #[must_use]
    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = Some(noise.max(0.0));
        self
    }

    /// Number of sweeps per fit, or per expansion order.
    #[must_use]
    pub fn with_nsweep(mut self, nsweep: usize) -> Self {
        self.nsweep = Some(nsweep);
        self
    }

    /// Normalize the result.
    #[must_use]
    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = Some(normalize);
        self
    }

    #[must_use]
    pub fn with_method(mut self, method: ApplyMethod) -> Self {
        self.method = Some(method);
        self
    }

    /// Order of the series expansion of the exponential.
    #[must_use]
    pub fn with_order(mut self, order: usize) -> Self {
        self.order = Some(order);
        self
    }

    /// Full per-sweep schedule for fitting; overrides `nsweep` and the
    /// truncation settings above.
    #[must_use]
    pub fn with_sweeps(mut self, sweeps: Sweeps) -> Self {
        self.sweeps = Some(sweeps);
        self
    }

    /// Scalar prefactor applied along with the operator while fitting.
    #[must_use]
    pub fn with_fac(mut self, fac: C64) -> Self {
        self.fac = Some(fac);
        self
    }

    pub fn method(&self) -> Option<ApplyMethod> { self.method }

    /// Fill in every unset option from `defaults`.
    ///
    /// Logs a warning if the deprecated `maxm` was set.
    pub fn resolve(&self, defaults: &Defaults) -> Resolved {
        match (self.maxm, self.maxdim) {
            (Some(_), Some(_)) => {
                warn!("options `maxm` and `maxdim` are both set; `maxm` is deprecated in favor of `maxdim`, which will be used");
            },
            (Some(_), None) => {
                warn!("option `maxm` is deprecated in favor of `maxdim`");
            },
            _ => { },
        }
        let maxdim = self.maxdim.or(self.maxm);
        let mut policy
            = TruncPolicy::exact()
            .with_cutoff(self.cutoff.unwrap_or(defaults.cutoff))
            .with_noise(self.noise.unwrap_or(0.0));
        if let Some(m) = maxdim { policy = policy.with_maxdim(m); }
        if let Some(m) = self.mindim { policy = policy.with_mindim(m); }
        let nsweep = self.nsweep.unwrap_or(defaults.nsweep);
        let sweeps
            = self.sweeps.clone()
            .unwrap_or_else(|| Sweeps::uniform(nsweep, policy));
        Resolved {
            policy,
            maxdim_explicit: maxdim.is_some(),
            nsweep,
            normalize: self.normalize.unwrap_or(false),
            method: self.method.unwrap_or(defaults.method),
            order: self.order.unwrap_or(defaults.order),
            sweeps,
            fac: self.fac.unwrap_or(C64::from(1.0)),
        }
    }
}

/// Per-algorithm fallback values for [`Args::resolve`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Defaults {
    pub cutoff: f64,
    pub nsweep: usize,
    pub order: usize,
    pub method: ApplyMethod,
}

impl Defaults {
    /// Operator composition.
    pub const COMPOSE: Self = Self {
        cutoff: 1e-14, nsweep: 1, order: 10, method: ApplyMethod::DensityMatrix,
    };

    /// Operator application without an initial guess.
    pub const APPLY: Self = Self {
        cutoff: 1e-13, nsweep: 1, order: 10, method: ApplyMethod::DensityMatrix,
    };

    /// Operator application from an initial guess.
    pub const APPLY_GUESS: Self = Self {
        cutoff: 1e-13, nsweep: 1, order: 10, method: ApplyMethod::Fit,
    };

    /// Series expansion of an exponential.
    pub const EXP: Self = Self {
        cutoff: 1e-13, nsweep: 1, order: 10, method: ApplyMethod::DensityMatrix,
    };
}

/// Fully populated options, the output of [`Args::resolve`].
#[derive(Clone, Debug, PartialEq)]
pub struct Resolved {
    pub policy: TruncPolicy,
    /// Whether the caller fixed a maximum bond dimension.
    pub maxdim_explicit: bool,
    pub nsweep: usize,
    pub normalize: bool,
    pub method: ApplyMethod,
    pub order: usize,
    pub sweeps: Sweeps,
    pub fac: C64,
}
