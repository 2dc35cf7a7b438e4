//! Sweep order over the bonds of a chain, and per-sweep truncation schedules.
//!
//! One sweep visits every bond twice: left to right, then right to left. The
//! bond at the right end is visited twice in a row, once at the end of each
//! half-sweep.
//!
//! ```text
//! N = 4:  (0, →) (1, →) (2, →) (2, ←) (1, ←) (0, ←)
//! ```

use crate::decomp::{ Direction, TruncPolicy };

/// Half of a sweep.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum HalfSweep {
    /// Left to right; the orthogonality center ends at the right site.
    Forward,
    /// Right to left; the orthogonality center ends at the left site.
    Backward,
}

impl HalfSweep {
    /// Factorization direction that moves the center along with the sweep.
    pub fn direction(self) -> Direction {
        match self {
            Self::Forward => Direction::FromLeft,
            Self::Backward => Direction::FromRight,
        }
    }

    pub fn is_forward(self) -> bool { self == Self::Forward }
}

/// Iterator over the `(bond, half-sweep)` pairs of a single sweep on a chain
/// of `n` sites. Bond `b` joins sites `b` and `b + 1`.
///
/// Yields `2 (n - 1)` items, and nothing for `n ≤ 1`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweepIter {
    n: usize,
    k: usize,
}

impl SweepIter {
    pub fn new(n: usize) -> Self { Self { n, k: 0 } }

    /// Restart from the first bond.
    pub fn reset(&mut self) { self.k = 0; }

    fn total(&self) -> usize { 2 * self.n.saturating_sub(1) }
}

impl Iterator for SweepIter {
    type Item = (usize, HalfSweep);

    fn next(&mut self) -> Option<Self::Item> {
        let total = self.total();
        if self.k >= total { return None; }
        let half = total / 2;
        let item
            = if self.k < half {
                (self.k, HalfSweep::Forward)
            } else {
                (total - 1 - self.k, HalfSweep::Backward)
            };
        self.k += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rem = self.total().saturating_sub(self.k);
        (rem, Some(rem))
    }
}

impl ExactSizeIterator for SweepIter { }

impl std::iter::FusedIterator for SweepIter { }

/// A schedule of truncation policies, one per sweep.
#[derive(Clone, Debug, PartialEq)]
pub struct Sweeps {
    policies: Vec<TruncPolicy>,
}

impl Sweeps {
    /// `nsweep` sweeps, all with the same policy.
    pub fn uniform(nsweep: usize, policy: TruncPolicy) -> Self {
        Self { policies: vec![policy; nsweep] }
    }

    pub fn from_policies(policies: Vec<TruncPolicy>) -> Self { Self { policies } }

    /// Number of sweeps.
    pub fn len(&self) -> usize { self.policies.len() }

    pub fn is_empty(&self) -> bool { self.policies.is_empty() }

    /// Policy for sweep `sw`.
    pub fn policy(&self, sw: usize) -> Option<&TruncPolicy> { self.policies.get(sw) }

    pub fn iter(&self) -> std::slice::Iter<'_, TruncPolicy> { self.policies.iter() }

    // assign values[k] to sweep k, repeating the last value for the rest
    fn set_each<T, F>(mut self, values: &[T], mut f: F) -> Self
    where
        T: Copy,
        F: FnMut(TruncPolicy, T) -> TruncPolicy,
    {
        let Some(last) = values.last() else { return self; };
        self.policies.iter_mut().enumerate()
            .for_each(|(k, p)| {
                *p = f(*p, values.get(k).copied().unwrap_or(*last));
            });
        self
    }

    /// Set per-sweep maximum bond dimensions.
    #[must_use]
    pub fn with_maxdim(self, maxdims: &[usize]) -> Self {
        self.set_each(maxdims, TruncPolicy::with_maxdim)
    }

    /// Set per-sweep minimum bond dimensions.
    #[must_use]
    pub fn with_mindim(self, mindims: &[usize]) -> Self {
        self.set_each(mindims, TruncPolicy::with_mindim)
    }

    /// Set per-sweep cutoffs.
    #[must_use]
    pub fn with_cutoff(self, cutoffs: &[f64]) -> Self {
        self.set_each(cutoffs, TruncPolicy::with_cutoff)
    }

    /// Set per-sweep noise terms.
    #[must_use]
    pub fn with_noise(self, noises: &[f64]) -> Self {
        self.set_each(noises, TruncPolicy::with_noise)
    }
}

impl<'a> IntoIterator for &'a Sweeps {
    type Item = &'a TruncPolicy;
    type IntoIter = std::slice::Iter<'a, TruncPolicy>;

    fn into_iter(self) -> Self::IntoIter { self.policies.iter() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use HalfSweep::*;

    #[test]
    fn sweep_order() {
        let items: Vec<(usize, HalfSweep)> = SweepIter::new(4).collect();
        assert_eq!(
            items,
            vec![
                (0, Forward), (1, Forward), (2, Forward),
                (2, Backward), (1, Backward), (0, Backward),
            ],
        );
        assert_eq!(SweepIter::new(2).count(), 2);
        assert_eq!(SweepIter::new(1).count(), 0);
        assert_eq!(SweepIter::new(0).count(), 0);
        assert_eq!(SweepIter::new(7).len(), 12);
    }

    #[test]
    fn sweep_restart() {
        let mut iter = SweepIter::new(3);
        assert_eq!(iter.next(), Some((0, Forward)));
        assert_eq!(iter.next(), Some((1, Forward)));
        iter.reset();
        assert_eq!(iter.clone().count(), 4);
        assert_eq!(iter.next(), Some((0, Forward)));
        iter.by_ref().for_each(drop);
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn half_sweep_direction() {
        assert_eq!(Forward.direction(), Direction::FromLeft);
        assert_eq!(Backward.direction(), Direction::FromRight);
    }

    #[test]
    fn schedule_extends_last_value() {
        let sweeps
            = Sweeps::uniform(4, TruncPolicy::exact())
            .with_maxdim(&[10, 20])
            .with_cutoff(&[1e-8]);
        let maxdims: Vec<usize> = sweeps.iter().map(|p| p.maxdim).collect();
        assert_eq!(maxdims, vec![10, 20, 20, 20]);
        assert!(sweeps.iter().all(|p| p.cutoff == 1e-8));
        assert_eq!(sweeps.policy(4), None);

        let unchanged = Sweeps::uniform(2, TruncPolicy::exact()).with_noise(&[]);
        assert!(unchanged.iter().all(|p| p.noise == 0.0));
    }
}
