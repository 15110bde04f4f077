//! Cache-aware interpolation over the canonical domain.
//!
//! Power-of-two lengths run an iterative radix-2 NTT (inverse for
//! interpolation, forward for evaluation).  The transform is blocked: after
//! the bit-reversal permutation, every butterfly stage whose span fits in
//! the cache budget is finished on one contiguous block before the next
//! block is touched, and the remaining wide stages walk each group in
//! block-sized sub-ranges.  The work stays `O(n log n)`; only the access
//! order changes.
//!
//! Other lengths fall back to a direct `O(n²)` Lagrange construction over the
//! same canonical domain, so interpolate-then-evaluate is the identity for
//! every length.
//!
//! All scratch storage comes from the [`PoolManager`] and is returned before
//! each call exits.

use std::time::Instant;

#[cfg(not(target_arch = "wasm32"))]
use rayon::prelude::*;
use tracing::debug;

use crate::domain::Domain;
use crate::error::{EngineError, Result};
use crate::field::Field;
use crate::polynomial::{horner, Polynomial};
use crate::pool::PoolManager;
use crate::table::Table;

/// Entries swapped per bit-reversal block (one L1-sized run of indices).
const BIT_REVERSAL_BLOCK: usize = 64;

/// Largest power of two representable in `usize`.
const MAX_CACHE_BUDGET: usize = usize::MAX / 2 + 1;

/// Interpolates and evaluates columns using pooled scratch buffers.
#[derive(Debug, Clone)]
pub struct Interpolator {
    pool: PoolManager,
    field: Field,
    cache_budget: usize,
    parallel_threshold: usize,
}

impl Interpolator {
    /// Creates an interpolator.
    ///
    /// `cache_budget` is rounded up to a power of two (at least 2, at most
    /// `2^(usize::BITS - 1)`); lengths of at least `parallel_threshold` spread
    /// butterflies over rayon.
    pub fn new(
        pool: PoolManager,
        field: Field,
        cache_budget: usize,
        parallel_threshold: usize,
    ) -> Self {
        Self {
            pool,
            field,
            cache_budget: cache_budget
                .max(2)
                .checked_next_power_of_two()
                .unwrap_or(MAX_CACHE_BUDGET),
            parallel_threshold,
        }
    }

    /// Block size used by the transform, in elements.
    pub fn cache_budget(&self) -> usize {
        self.cache_budget
    }

    /// Computes the polynomial of degree `< length` through
    /// `(domain[i], values[i])` for `i < length`.
    pub fn interpolate_streaming(&self, values: &[u64], length: usize) -> Result<Polynomial> {
        if length == 0 {
            return Err(EngineError::shape("interpolation length must be positive"));
        }
        if values.len() < length {
            return Err(EngineError::shape(format!(
                "interpolation of length {length} given only {} values",
                values.len()
            )));
        }
        let domain = Domain::new(self.field, length)?;
        let started = Instant::now();
        let coeffs = if domain.is_power_of_two() {
            let mut work = self.pool.checkout(length)?;
            for (dst, &v) in work.iter_mut().zip(values) {
                *dst = self.field.reduce(v);
            }
            let omega_inv = self.field.inv(domain.generator());
            self.ntt_in_place(&mut work, omega_inv)?;
            let n_inv = self.field.inv(length as u64);
            let field = self.field;
            self.for_each_block(&mut work, length, |_, block| {
                for v in block.iter_mut() {
                    *v = field.mul(*v, n_inv);
                }
            });
            work.to_vec()
        } else {
            self.lagrange(&domain, &values[..length])?
        };
        debug!(
            length,
            blocked = domain.is_power_of_two(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "interpolated"
        );
        Ok(Polynomial::from_coefficients(self.field, coeffs))
    }

    /// Evaluates `coeffs` (degree `< length`) on the canonical domain of
    /// `length` points; the inverse of [`Self::interpolate_streaming`].
    pub fn evaluate_streaming(&self, coeffs: &[u64], length: usize) -> Result<Vec<u64>> {
        if length == 0 {
            return Err(EngineError::shape("evaluation length must be positive"));
        }
        if coeffs.len() > length {
            return Err(EngineError::shape(format!(
                "{} coefficients do not fit a domain of {length} points",
                coeffs.len()
            )));
        }
        let domain = Domain::new(self.field, length)?;
        if domain.is_power_of_two() {
            let mut work = self.pool.checkout(length)?;
            for (dst, &c) in work.iter_mut().zip(coeffs) {
                *dst = self.field.reduce(c);
            }
            self.ntt_in_place(&mut work, domain.generator())?;
            return Ok(work.to_vec());
        }
        let mut work = self.pool.checkout(length)?;
        domain.fill_points(&mut work);
        let field = self.field;
        self.for_each_block(&mut work, length, |_, block| {
            for x in block.iter_mut() {
                *x = horner(&field, coeffs, *x);
            }
        });
        Ok(work.to_vec())
    }

    /// Interpolates column `col` of `table` over a domain of `table.height()` points.
    pub fn interpolate_column(&self, table: &Table, col: usize) -> Result<Polynomial> {
        let column = table.column_pooled(col)?;
        self.interpolate_streaming(&column, table.height())
    }

    fn parallel(&self, n: usize) -> bool {
        #[cfg(not(target_arch = "wasm32"))]
        {
            n >= self.parallel_threshold && rayon::current_num_threads() > 1
        }
        #[cfg(target_arch = "wasm32")]
        {
            let _ = n;
            false
        }
    }

    fn for_each_block<F>(&self, data: &mut [u64], n: usize, f: F)
    where
        F: Fn(usize, &mut [u64]) + Send + Sync,
    {
        let block = self.cache_budget.min(data.len()).max(1);
        #[cfg(not(target_arch = "wasm32"))]
        {
            if self.parallel(n) {
                data.par_chunks_mut(block)
                    .enumerate()
                    .for_each(|(idx, chunk)| f(idx, chunk));
                return;
            }
        }
        let _ = n;
        data.chunks_mut(block)
            .enumerate()
            .for_each(|(idx, chunk)| f(idx, chunk));
    }

    fn for_each_pair<F>(&self, lo: &mut [u64], hi: &mut [u64], size: usize, n: usize, f: F)
    where
        F: Fn(usize, &mut [u64], &mut [u64]) + Send + Sync,
    {
        #[cfg(not(target_arch = "wasm32"))]
        {
            if self.parallel(n) {
                lo.par_chunks_mut(size)
                    .zip(hi.par_chunks_mut(size))
                    .enumerate()
                    .for_each(|(idx, (a, b))| f(idx, a, b));
                return;
            }
        }
        let _ = n;
        lo.chunks_mut(size)
            .zip(hi.chunks_mut(size))
            .enumerate()
            .for_each(|(idx, (a, b))| f(idx, a, b));
    }

    /// In-place radix-2 NTT with root `omega` of order `data.len()`.
    ///
    /// Output is in natural order (the input is bit-reversed first).
    fn ntt_in_place(&self, data: &mut [u64], omega: u64) -> Result<()> {
        let n = data.len();
        if n <= 1 {
            return Ok(());
        }
        debug_assert!(n.is_power_of_two());
        let field = self.field;

        let mut twiddles = self.pool.checkout(n / 2)?;
        let mut acc = 1u64;
        for tw in twiddles.iter_mut() {
            *tw = acc;
            acc = field.mul(acc, omega);
        }
        let twiddles: &[u64] = &twiddles;

        bit_reverse_blocked(data);

        let block = self.cache_budget.min(n);
        // Stages with span < block: finish each block before moving on.
        self.for_each_block(data, n, |_, chunk| {
            let mut half = 1;
            while half < chunk.len() {
                let stride = n / (2 * half);
                for group in chunk.chunks_mut(2 * half) {
                    let (lo, hi) = group.split_at_mut(half);
                    butterflies(&field, lo, hi, twiddles, 0, stride);
                }
                half *= 2;
            }
        });

        // Wide stages: walk each group's halves in block-sized sub-ranges.
        let sub = (block / 2).max(1);
        let mut half = block;
        while half < n {
            let stride = n / (2 * half);
            for group in data.chunks_mut(2 * half) {
                let (lo, hi) = group.split_at_mut(half);
                self.for_each_pair(lo, hi, sub, n, |idx, a, b| {
                    butterflies(&field, a, b, twiddles, idx * sub, stride);
                });
            }
            half *= 2;
        }
        Ok(())
    }

    /// Direct Lagrange interpolation for lengths that are not powers of two.
    ///
    /// With `M(x) = ∏ (x - x_i)`, the interpolant is
    /// `Σ y_i / M'(x_i) · M(x) / (x - x_i)`.
    fn lagrange(&self, domain: &Domain, values: &[u64]) -> Result<Vec<u64>> {
        let n = values.len();
        let field = self.field;

        let mut points = self.pool.checkout(n)?;
        domain.fill_points(&mut points);

        // master[k] is the x^k coefficient of M(x); degree n.
        let mut master = self.pool.checkout(n + 1)?;
        master[0] = 1;
        for (deg, &x) in points.iter().enumerate() {
            for k in (0..=deg + 1).rev() {
                let shifted = if k > 0 { master[k - 1] } else { 0 };
                master[k] = field.sub(shifted, field.mul(x, master[k]));
            }
        }

        let mut derivative = self.pool.checkout(n)?;
        for (k, d) in derivative.iter_mut().enumerate() {
            *d = field.mul((k + 1) as u64, master[k + 1]);
        }

        let mut weights = self.pool.checkout(n)?;
        {
            let derivative: &[u64] = &derivative;
            let points: &[u64] = &points;
            self.for_each_block(&mut weights, n, |block_idx, block| {
                let base = block_idx * self.cache_budget.min(n).max(1);
                for (j, w) in block.iter_mut().enumerate() {
                    *w = horner(&field, derivative, points[base + j]);
                }
            });
        }
        field.batch_inverse(&mut weights);

        let mut coeffs = vec![0u64; n];
        let mut quotient = self.pool.checkout(n)?;
        for ((&x, &y), &w) in points.iter().zip(values).zip(weights.iter()) {
            let scale = field.mul(field.reduce(y), w);
            if scale == 0 {
                continue;
            }
            // Synthetic division of M by (x - point).
            quotient[n - 1] = master[n];
            for k in (1..n).rev() {
                quotient[k - 1] = field.add(master[k], field.mul(x, quotient[k]));
            }
            for (c, &q) in coeffs.iter_mut().zip(quotient.iter()) {
                *c = field.add(*c, field.mul(scale, q));
            }
        }
        Ok(coeffs)
    }
}

fn butterflies(
    field: &Field,
    lo: &mut [u64],
    hi: &mut [u64],
    twiddles: &[u64],
    first_k: usize,
    stride: usize,
) {
    for (j, (a, b)) in lo.iter_mut().zip(hi.iter_mut()).enumerate() {
        let t = field.mul(*b, twiddles[(first_k + j) * stride]);
        let u = *a;
        *a = field.add(u, t);
        *b = field.sub(u, t);
    }
}

fn reverse_bits(x: usize, bits: u32) -> usize {
    x.reverse_bits() >> (usize::BITS - bits)
}

fn bit_reverse_blocked(data: &mut [u64]) {
    let n = data.len();
    let bits = n.trailing_zeros();
    for block_start in (0..n).step_by(BIT_REVERSAL_BLOCK) {
        let block_end = (block_start + BIT_REVERSAL_BLOCK).min(n);
        for i in block_start..block_end {
            let j = reverse_bits(i, bits);
            if i < j {
                data.swap(i, j);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;

    fn pool() -> PoolManager {
        PoolManager::new(PoolConfig::from_classes(&[64, 1024, 65536], &[4, 4, 2]).unwrap())
            .unwrap()
    }

    fn interpolator(cache_budget: usize, parallel_threshold: usize) -> Interpolator {
        Interpolator::new(pool(), Field::goldilocks(), cache_budget, parallel_threshold)
    }

    fn naive_evaluate(field: &Field, coeffs: &[u64], length: usize) -> Vec<u64> {
        let domain = Domain::new(*field, length).unwrap();
        (0..length)
            .map(|i| horner(field, coeffs, domain.point(i)))
            .collect()
    }

    fn sample(length: usize) -> Vec<u64> {
        (0..length as u64).map(|i| i * i * 7 + 3 * i + 11).collect()
    }

    #[test]
    fn bit_reversal_permutes() {
        let mut data: Vec<u64> = (0..8).collect();
        bit_reverse_blocked(&mut data);
        assert_eq!(data, vec![0, 4, 2, 6, 1, 5, 3, 7]);
    }

    #[test]
    fn length_one_returns_input() {
        let interp = interpolator(16, usize::MAX);
        let poly = interp.interpolate_streaming(&[42], 1).unwrap();
        assert_eq!(poly.coefficients(), &[42]);
    }

    #[test]
    fn zero_length_and_short_input_are_rejected() {
        let interp = interpolator(16, usize::MAX);
        assert!(matches!(
            interp.interpolate_streaming(&[1, 2], 0),
            Err(EngineError::InvalidShape(_))
        ));
        assert!(matches!(
            interp.interpolate_streaming(&[1, 2], 4),
            Err(EngineError::InvalidShape(_))
        ));
        assert!(interp.evaluate_streaming(&[1, 2, 3], 2).is_err());
    }

    #[test]
    fn blocked_ntt_matches_naive_evaluation() {
        let field = Field::goldilocks();
        for &(length, budget) in &[(2usize, 2usize), (16, 4), (256, 16), (1024, 1024), (4096, 64)] {
            let coeffs = sample(length);
            let fast = interpolator(budget, usize::MAX)
                .evaluate_streaming(&coeffs, length)
                .unwrap();
            assert_eq!(fast, naive_evaluate(&field, &coeffs, length), "length {length}");
        }
    }

    #[test]
    fn block_size_does_not_change_the_result() {
        let values = sample(2048);
        let reference = interpolator(2048, usize::MAX)
            .interpolate_streaming(&values, 2048)
            .unwrap();
        for budget in [2usize, 8, 64, 512] {
            let poly = interpolator(budget, usize::MAX)
                .interpolate_streaming(&values, 2048)
                .unwrap();
            assert_eq!(poly, reference, "budget {budget}");
        }
        let parallel = interpolator(64, 0).interpolate_streaming(&values, 2048).unwrap();
        assert_eq!(parallel, reference);
    }

    #[test]
    fn interpolation_round_trips_for_power_of_two() {
        let interp = interpolator(32, usize::MAX);
        let values = sample(512);
        let poly = interp.interpolate_streaming(&values, 512).unwrap();
        assert_eq!(interp.evaluate_streaming(poly.coefficients(), 512).unwrap(), values);
        for idx in [0usize, 1, 100, 511] {
            assert_eq!(poly.evaluate_at_domain_index(idx).unwrap(), values[idx]);
        }
    }

    #[test]
    fn lagrange_round_trips_for_other_lengths() {
        let field = Field::goldilocks();
        let interp = interpolator(4, usize::MAX);
        for length in [3usize, 5, 6, 7, 12, 33] {
            let values = sample(length);
            let poly = interp.interpolate_streaming(&values, length).unwrap();
            assert_eq!(poly.len(), length);
            assert_eq!(naive_evaluate(&field, poly.coefficients(), length), values);
            assert_eq!(
                interp.evaluate_streaming(poly.coefficients(), length).unwrap(),
                values
            );
        }
    }

    #[test]
    fn constant_values_give_constant_polynomial() {
        let interp = interpolator(8, usize::MAX);
        for length in [8usize, 6] {
            let poly = interp.interpolate_streaming(&vec![9; length], length).unwrap();
            assert_eq!(poly.coefficients()[0], 9);
            assert_eq!(poly.degree(), Some(0));
        }
    }

    #[test]
    fn scratch_buffers_are_returned() {
        let interp = interpolator(16, usize::MAX);
        interp.interpolate_streaming(&sample(1024), 1024).unwrap();
        interp.interpolate_streaming(&sample(10), 10).unwrap();
        let stats = interp.pool.stats();
        assert_eq!(stats.checked_out(), 0);
        assert!(stats.invariant_holds());
    }

    #[test]
    fn only_the_first_length_values_are_used() {
        let interp = interpolator(8, usize::MAX);
        let mut values = sample(16);
        let poly = interp.interpolate_streaming(&values, 8).unwrap();
        values.truncate(8);
        assert_eq!(interp.interpolate_streaming(&values, 8).unwrap(), poly);
    }

    #[test]
    fn cache_budget_is_rounded_and_clamped() {
        assert_eq!(interpolator(0, usize::MAX).cache_budget(), 2);
        assert_eq!(interpolator(100, usize::MAX).cache_budget(), 128);
        let huge = interpolator(usize::MAX, 0);
        assert_eq!(huge.cache_budget(), MAX_CACHE_BUDGET);
        let values = sample(64);
        let poly = huge.interpolate_streaming(&values, 64).unwrap();
        assert_eq!(huge.evaluate_streaming(poly.coefficients(), 64).unwrap(), values);
    }
}
