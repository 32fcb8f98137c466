//! Deterministic randomness for iteration bodies.
//!
//! Each iteration gets an [`IterationContext`] seeded from the run seed, the
//! worker slot and the iteration index, so a run with a fixed seed picks the
//! same users, scenarios and think times regardless of how the scheduler
//! interleaves workers.
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::Range;
use std::time::Duration;

/// Weighted list of choices, sampled by relative weight.
///
/// Weights need not sum to anything in particular; `(3, a), (1, b)` picks
/// `a` three times out of four on average.
pub struct WeightedChoice<T> {
    items: Vec<T>,
    index: WeightedIndex<u32>,
}

impl<T> WeightedChoice<T> {
    /// Builds the table from `(weight, item)` pairs.
    ///
    /// Panics if `entries` is empty, all weights are zero, or the weights
    /// overflow; those are wiring bugs in the caller's tables.
    pub fn new(entries: impl IntoIterator<Item = (u32, T)>) -> Self {
        let (weights, items): (Vec<_>, Vec<_>) = entries.into_iter().unzip();
        let index = WeightedIndex::new(weights).expect("invalid weights for weighted choice");
        Self { items, index }
    }

    /// Uniform choice over `items`, one share each.
    pub fn uniform(items: impl IntoIterator<Item = T>) -> Self {
        Self::new(items.into_iter().map(|item| (1, item)))
    }

    pub fn pick<'a, R: Rng>(&'a self, rng: &mut R) -> &'a T {
        &self.items[self.index.sample(rng)]
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Per-iteration random state handed to the iteration body.
pub struct IterationContext {
    rng: StdRng,
    worker: usize,
    iteration: u64,
}

impl IterationContext {
    /// Derives the context for iteration `iteration` on worker slot `worker`.
    ///
    /// The mixing constants only need to spread the three inputs over the
    /// seed space; two contexts differing in any input get unrelated streams.
    pub fn new(seed: u64, worker: usize, iteration: u64) -> Self {
        let stream = seed
            ^ (worker as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
            ^ iteration.wrapping_mul(0xD1B5_4A32_D192_ED03);
        Self {
            rng: StdRng::seed_from_u64(stream),
            worker,
            iteration,
        }
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Samples a think-time pause uniformly from `range`. An empty range
    /// yields its start, so `[d, d)` means a fixed pause of `d`.
    pub fn think_time(&mut self, range: Range<Duration>) -> Duration {
        if range.is_empty() {
            return range.start;
        }
        self.rng.gen_range(range)
    }

    /// True with probability `p`, clamped to `[0, 1]`.
    pub fn chance(&mut self, p: f64) -> bool {
        self.rng.gen_bool(p.clamp(0.0, 1.0))
    }
}
