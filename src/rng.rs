//! Deterministic PRNG and matrix initializer (C1).
//!
//! A 32-bit xorshift stream feeds every random decision made at birth:
//! `W_in` entries, `W_res` sparse positions and values, and the probe vector
//! used by spectral rescaling. Given the same seed and shape parameters two
//! conforming implementations produce byte-identical reservoirs — nothing
//! here may reach for `rand`'s OS entropy or a non-deterministic hasher.

use crate::error::CoreError;

/// Xorshift32 stream. Seed 0 is absorbing (`0 xor 0 = 0` forever), so it is
/// remapped to a fixed non-zero constant rather than rejected outright —
/// callers passing seed 0 still get a deterministic, reproducible stream.
#[derive(Debug, Clone)]
pub struct Xorshift32 {
    state: u32,
}

impl Xorshift32 {
    /// Construct a stream from a seed. Seed 0 is remapped.
    pub fn new(seed: u32) -> Self {
        let state = if seed == 0 { 0x9E3779B9 } else { seed };
        Self { state }
    }

    /// Next raw uint32 from the stream.
    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    /// Uniform float in `[-1, 1)`.
    pub fn uniform_unit(&mut self) -> f32 {
        let frac = self.next_u32() as f64 / 4294967296.0_f64;
        ((frac - 0.5) * 2.0) as f32
    }
}

/// One non-zero entry of a sparse reservoir matrix: (row, col, value).
pub type SparseEntry = (u16, u16, f32);

/// Generate the sparse `W_res` entries for an `N x N` reservoir with
/// sparsity factor `s`: exactly `floor(N^2 / s)` entries, no duplicate
/// `(row, col)` pairs. Duplicate avoidance uses linear probing over a flat
/// occupancy bitmap so the set of chosen indices (and thus the entries
/// themselves) is a pure function of the seed and shape.
pub fn sparse_matrix(rng: &mut Xorshift32, n: usize, s: usize) -> Vec<SparseEntry> {
    assert!(s >= 1, "sparsity factor must be >= 1");
    let total = n * n;
    let target = total / s;
    let mut occupied = vec![false; total];
    let mut entries = Vec::with_capacity(target);

    while entries.len() < target {
        let idx = (rng.next_u32() as usize) % total;
        let mut probe = idx;
        while occupied[probe] {
            probe = (probe + 1) % total;
            if probe == idx {
                // Every slot occupied; nothing left to probe. Only reachable
                // when target == total (s == 1).
                break;
            }
        }
        if occupied[probe] {
            continue;
        }
        occupied[probe] = true;
        let row = (probe / n) as u16;
        let col = (probe % n) as u16;
        let value = rng.uniform_unit();
        entries.push((row, col, value));
    }

    entries
}

/// Rescale `entries` (an `n x n` sparse matrix) in place so its spectral
/// radius equals `rho`. Uses power iteration with left-to-right summation
/// order, at most 100 iterations or until the Rayleigh quotient changes by
/// less than `1e-6`.
pub fn spectral_rescale(
    entries: &mut [SparseEntry],
    n: usize,
    rho: f32,
) -> Result<(), CoreError> {
    const MAX_ITERS: usize = 100;
    const TOLERANCE: f64 = 1e-6;

    let mut rng = Xorshift32::new(0xC0FFEE);
    let mut y: Vec<f64> = (0..n).map(|_| rng.uniform_unit() as f64).collect();
    normalize(&mut y);

    let mut rayleigh = 0.0_f64;
    let mut collapsed_for = 0usize;

    for iter in 0..MAX_ITERS {
        let mut next = vec![0.0_f64; n];
        for &(row, col, value) in entries.iter() {
            next[row as usize] += value as f64 * y[col as usize];
        }

        let norm = l2_norm(&next);
        if norm == 0.0 {
            collapsed_for += 1;
            if collapsed_for >= 5 {
                return Err(CoreError::NumericInstability(
                    "spectral_rescale: vector norm collapsed to 0 within five iterations"
                        .to_string(),
                ));
            }
            // Re-seed and keep iterating; a single collapsed step can occur
            // for pathological sparsity patterns without being fatal.
            y = (0..n).map(|_| rng.uniform_unit() as f64).collect();
            normalize(&mut y);
            continue;
        }
        collapsed_for = 0;

        let new_rayleigh = dot(&next, &y) / dot(&y, &y);
        for v in next.iter_mut() {
            *v /= norm;
        }
        y = next;

        if iter > 0 && (new_rayleigh - rayleigh).abs() < TOLERANCE {
            rayleigh = new_rayleigh;
            break;
        }
        rayleigh = new_rayleigh;
    }

    let estimated_radius = rayleigh.abs();
    if estimated_radius == 0.0 {
        return Err(CoreError::NumericInstability(
            "spectral_rescale: estimated spectral radius is 0".to_string(),
        ));
    }

    let scale = (rho as f64 / estimated_radius) as f32;
    for entry in entries.iter_mut() {
        entry.2 *= scale;
    }

    Ok(())
}

fn normalize(v: &mut [f64]) {
    let norm = l2_norm(v);
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

fn l2_norm(v: &[f64]) -> f64 {
    let mut acc = 0.0_f64;
    for &x in v.iter() {
        acc += x * x;
    }
    acc.sqrt()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    let mut acc = 0.0_f64;
    for i in 0..a.len() {
        acc += a[i] * b[i];
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_zero_is_remapped_not_absorbing() {
        let mut a = Xorshift32::new(0);
        let mut b = Xorshift32::new(0);
        assert_eq!(a.next_u32(), b.next_u32());
        assert_ne!(a.next_u32(), 0);
    }

    #[test]
    fn same_seed_same_stream() {
        let mut a = Xorshift32::new(42);
        let mut b = Xorshift32::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let mut a = Xorshift32::new(42);
        let mut b = Xorshift32::new(43);
        let stream_a: Vec<u32> = (0..16).map(|_| a.next_u32()).collect();
        let stream_b: Vec<u32> = (0..16).map(|_| b.next_u32()).collect();
        assert_ne!(stream_a, stream_b);
    }

    #[test]
    fn uniform_unit_is_bounded() {
        let mut rng = Xorshift32::new(7);
        for _ in 0..10_000 {
            let v = rng.uniform_unit();
            assert!(v >= -1.0 && v < 1.0);
        }
    }

    #[test]
    fn sparse_matrix_exact_count_no_duplicates() {
        let mut rng = Xorshift32::new(1234);
        let n = 20;
        let s = 4;
        let entries = sparse_matrix(&mut rng, n, s);
        assert_eq!(entries.len(), (n * n) / s);

        let mut seen = std::collections::HashSet::new();
        for (row, col, _) in &entries {
            assert!(seen.insert((*row, *col)), "duplicate entry");
        }
    }

    #[test]
    fn sparse_matrix_deterministic() {
        let n = 16;
        let s = 4;
        let mut rng_a = Xorshift32::new(99);
        let mut rng_b = Xorshift32::new(99);
        let a = sparse_matrix(&mut rng_a, n, s);
        let b = sparse_matrix(&mut rng_b, n, s);
        assert_eq!(a, b);
    }

    #[test]
    fn spectral_rescale_hits_target_within_tolerance() {
        let mut rng = Xorshift32::new(42);
        let n = 64;
        let mut entries = sparse_matrix(&mut rng, n, 4);
        spectral_rescale(&mut entries, n, 0.95).unwrap();

        // Re-estimate via the same power iteration to check convergence.
        let mut probe_rng = Xorshift32::new(0xC0FFEE);
        let mut y: Vec<f64> = (0..n).map(|_| probe_rng.uniform_unit() as f64).collect();
        normalize(&mut y);
        let mut rayleigh = 0.0;
        for _ in 0..100 {
            let mut next = vec![0.0; n];
            for &(row, col, value) in entries.iter() {
                next[row as usize] += value as f64 * y[col as usize];
            }
            let norm = l2_norm(&next);
            if norm == 0.0 {
                break;
            }
            rayleigh = dot(&next, &y) / dot(&y, &y);
            for v in next.iter_mut() {
                *v /= norm;
            }
            y = next;
        }
        assert!((rayleigh.abs() - 0.95).abs() < 0.095, "radius {}", rayleigh);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        // Invariant 1 (determinism): two streams from the same seed never
        // diverge, for any seed in the full u32 range.
        #[test]
        fn same_seed_streams_never_diverge(seed: u32, draws in 1usize..64) {
            let mut a = Xorshift32::new(seed);
            let mut b = Xorshift32::new(seed);
            for _ in 0..draws {
                prop_assert_eq!(a.next_u32(), b.next_u32());
            }
        }

        // sparse_matrix always produces exactly floor(n*n/s) entries with no
        // duplicate (row, col) pairs, for any shape a reservoir can take.
        #[test]
        fn sparse_matrix_count_and_uniqueness(
            seed: u32,
            n in 2usize..40,
            s in 1usize..8,
        ) {
            let mut rng = Xorshift32::new(seed);
            let entries = sparse_matrix(&mut rng, n, s);
            prop_assert_eq!(entries.len(), (n * n) / s);
            let mut seen = std::collections::HashSet::new();
            for (row, col, _) in &entries {
                prop_assert!(seen.insert((*row, *col)));
            }
        }

        // Invariant 5 (spectral rescale): the rescaled matrix's estimated
        // spectral radius lands within 10% of the requested rho, for any
        // shape/seed/target the birth path can be asked for.
        #[test]
        fn spectral_rescale_within_tolerance(
            seed: u32,
            n in 4usize..48,
            rho in 0.1f32..1.2,
        ) {
            let mut rng = Xorshift32::new(seed);
            let mut entries = sparse_matrix(&mut rng, n, 4.max(1));
            if spectral_rescale(&mut entries, n, rho).is_err() {
                // Pathological sparsity collapse is an accepted, reported
                // failure mode, not a violation of the tolerance invariant.
                return Ok(());
            }

            let mut probe_rng = Xorshift32::new(0xC0FFEE);
            let mut y: Vec<f64> = (0..n).map(|_| probe_rng.uniform_unit() as f64).collect();
            normalize(&mut y);
            let mut rayleigh = 0.0;
            for _ in 0..100 {
                let mut next = vec![0.0; n];
                for &(row, col, value) in entries.iter() {
                    next[row as usize] += value as f64 * y[col as usize];
                }
                let norm = l2_norm(&next);
                if norm == 0.0 {
                    break;
                }
                rayleigh = dot(&next, &y) / dot(&y, &y);
                for v in next.iter_mut() {
                    *v /= norm;
                }
                y = next;
            }
            prop_assert!(
                (rayleigh.abs() - rho as f64).abs() < 0.1 * rho as f64 + 0.01,
                "radius {} vs target {}",
                rayleigh,
                rho
            );
        }
    }
}
