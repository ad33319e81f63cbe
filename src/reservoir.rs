//! Reservoir engine (C2): recurrent state update, read-out regression, and
//! the capability set both the floating-point and fixed-point variants
//! implement.
//!
//! Tagged variants, not inheritance (spec §9): `Reservoir` and
//! `FixedReservoir` are two unrelated structs sharing the `ReservoirCore`
//! trait and the `ridge_train` free function; there is no base class and no
//! runtime-polymorphic dispatch inside the hot update loop.

use crate::config::Config;
use crate::error::CoreError;
use crate::rng::{sparse_matrix, spectral_rescale, SparseEntry, Xorshift32};
use nalgebra::DMatrix;

/// Lifecycle state of a reservoir core (spec §4.2 "State machine").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservoirState {
    /// Constructed but never updated or trained.
    Born,
    /// At least one `update` has run, but `train` has not.
    Untrained,
    /// `train` has completed at least once.
    Trained,
}

/// Capability set shared by every reservoir variant.
pub trait ReservoirCore {
    /// Construct a variant from config and a birth seed. Named distinctly
    /// from each variant's inherent `new` so the two never collide; `Core`
    /// uses this to stay generic over `R`.
    fn construct_variant(config: &Config, seed: u32) -> Result<Self, CoreError>
    where
        Self: Sized;

    /// Rebuild a variant from the exact raw parts a snapshot carries (spec
    /// §6.2): no RNG is consulted, weights and state are set verbatim.
    #[allow(clippy::too_many_arguments)]
    fn restore_parts(
        input_size: usize,
        reservoir_size: usize,
        output_size: usize,
        leak_rate: f32,
        input_weights: Vec<f32>,
        reservoir_sparse: Vec<SparseEntry>,
        output_weights: Vec<f32>,
        state: Vec<f32>,
        lifecycle: ReservoirState,
    ) -> Result<Self, CoreError>
    where
        Self: Sized;

    /// Input dimension (I).
    fn input_size(&self) -> usize;
    /// Output dimension (O).
    fn output_size(&self) -> usize;
    /// Reservoir size (N).
    fn reservoir_size(&self) -> usize;
    /// Whether this variant stores state in Q8.8 fixed point.
    fn is_fixed_point(&self) -> bool;
    /// Current lifecycle state.
    fn lifecycle(&self) -> ReservoirState;

    /// Advance the reservoir state with input `u`. Leaves state unchanged
    /// on `NUMERIC_INSTABILITY`.
    fn update(&mut self, u: &[f32]) -> Result<(), CoreError>;
    /// Pure function of the current state; does not advance it.
    fn predict(&self) -> Vec<f32>;
    /// Current state vector as real values, regardless of internal storage.
    fn state(&self) -> Vec<f32>;
    /// Overwrite the state vector (used by `restore` and by the ridge
    /// trainer to rewind after evaluation).
    fn set_state(&mut self, x: &[f32]) -> Result<(), CoreError>;
    /// Zero the state vector; weights are untouched.
    fn reset_state(&mut self);

    /// Dense read-out matrix, row-major, shape (O, N).
    fn output_weights(&self) -> Vec<f32>;
    /// Replace the read-out matrix. `w.len()` must equal `O * N`.
    fn set_output_weights(&mut self, w: &[f32]) -> Result<(), CoreError>;

    /// Dense input matrix, row-major, shape (N, I), as real values
    /// regardless of internal storage.
    fn input_weights(&self) -> Vec<f32>;
    /// Sparse reservoir matrix triples.
    fn reservoir_sparse(&self) -> &[SparseEntry];

    /// Batch-fit the read-out via ridge regression (spec §4.2 `train`).
    fn train(
        &mut self,
        inputs: &[Vec<f32>],
        targets: &[Vec<f32>],
        washout: usize,
        ridge: f32,
        cancel: Option<&dyn Fn() -> bool>,
    ) -> Result<f32, CoreError>;
}

/// Floating-point Echo State Network: the default, full-precision variant.
#[derive(Debug, Clone)]
pub struct Reservoir {
    input_size: usize,
    reservoir_size: usize,
    output_size: usize,
    leak_rate: f32,
    input_weights: Vec<f32>,
    reservoir_weights: Vec<SparseEntry>,
    output_weights: Vec<f32>,
    state: Vec<f32>,
    lifecycle: ReservoirState,
}

impl Reservoir {
    /// Construct a reservoir from config and a birth seed. The RNG stream
    /// is consumed in a fixed order: `W_in` entries row-major, then the
    /// `W_res` sparse positions/values, then spectral rescale's probe
    /// vector — this order is part of the determinism contract (spec §4.1).
    pub fn new(config: &Config, seed: u32) -> Result<Self, CoreError> {
        let mut rng = Xorshift32::new(seed);
        let n = config.reservoir_size;
        let i = config.input_size;
        let o = config.output_size;

        let mut input_weights = vec![0.0f32; n * i];
        for w in input_weights.iter_mut() {
            *w = rng.uniform_unit();
        }

        let mut reservoir_weights = sparse_matrix(&mut rng, n, config.sparsity_factor);
        spectral_rescale(&mut reservoir_weights, n, config.spectral_radius)?;

        Ok(Self {
            input_size: i,
            reservoir_size: n,
            output_size: o,
            leak_rate: config.leak_rate,
            input_weights,
            reservoir_weights,
            output_weights: vec![0.0f32; o * n],
            state: vec![0.0f32; n],
            lifecycle: ReservoirState::Born,
        })
    }

    /// Reconstruct from raw parts; used by snapshot restore.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        input_size: usize,
        reservoir_size: usize,
        output_size: usize,
        leak_rate: f32,
        input_weights: Vec<f32>,
        reservoir_weights: Vec<SparseEntry>,
        output_weights: Vec<f32>,
        state: Vec<f32>,
        lifecycle: ReservoirState,
    ) -> Self {
        Self {
            input_size,
            reservoir_size,
            output_size,
            leak_rate,
            input_weights,
            reservoir_weights,
            output_weights,
            state,
            lifecycle,
        }
    }
}

impl ReservoirCore for Reservoir {
    fn construct_variant(config: &Config, seed: u32) -> Result<Self, CoreError> {
        Self::new(config, seed)
    }

    fn restore_parts(
        input_size: usize,
        reservoir_size: usize,
        output_size: usize,
        leak_rate: f32,
        input_weights: Vec<f32>,
        reservoir_sparse: Vec<SparseEntry>,
        output_weights: Vec<f32>,
        state: Vec<f32>,
        lifecycle: ReservoirState,
    ) -> Result<Self, CoreError> {
        if output_weights.len() != output_size * reservoir_size {
            return Err(CoreError::DimensionMismatch {
                expected: output_size * reservoir_size,
                got: output_weights.len(),
            });
        }
        if state.len() != reservoir_size {
            return Err(CoreError::DimensionMismatch {
                expected: reservoir_size,
                got: state.len(),
            });
        }
        Ok(Self::from_parts(
            input_size,
            reservoir_size,
            output_size,
            leak_rate,
            input_weights,
            reservoir_sparse,
            output_weights,
            state,
            lifecycle,
        ))
    }

    fn input_size(&self) -> usize {
        self.input_size
    }

    fn output_size(&self) -> usize {
        self.output_size
    }

    fn reservoir_size(&self) -> usize {
        self.reservoir_size
    }

    fn is_fixed_point(&self) -> bool {
        false
    }

    fn lifecycle(&self) -> ReservoirState {
        self.lifecycle
    }

    fn update(&mut self, u: &[f32]) -> Result<(), CoreError> {
        if u.len() != self.input_size {
            return Err(CoreError::DimensionMismatch {
                expected: self.input_size,
                got: u.len(),
            });
        }

        let n = self.reservoir_size;
        let i = self.input_size;
        let mut pre = vec![0.0f32; n];

        for row in 0..n {
            let mut acc = 0.0f32;
            let base = row * i;
            for col in 0..i {
                acc += self.input_weights[base + col] * u[col];
            }
            pre[row] = acc;
        }

        for &(row, col, value) in self.reservoir_weights.iter() {
            pre[row as usize] += value * self.state[col as usize];
        }

        let mut next = vec![0.0f32; n];
        for idx in 0..n {
            let activated = pre[idx].tanh();
            next[idx] = (1.0 - self.leak_rate) * self.state[idx] + self.leak_rate * activated;
            if !next[idx].is_finite() {
                return Err(CoreError::NumericInstability(format!(
                    "non-finite state at index {idx}"
                )));
            }
        }

        self.state = next;
        if self.lifecycle == ReservoirState::Born {
            self.lifecycle = ReservoirState::Untrained;
        }
        Ok(())
    }

    fn predict(&self) -> Vec<f32> {
        if self.lifecycle == ReservoirState::Born || self.lifecycle == ReservoirState::Untrained {
            return vec![0.0; self.output_size];
        }
        dense_matvec(
            &self.output_weights,
            &self.state,
            self.output_size,
            self.reservoir_size,
        )
    }

    fn state(&self) -> Vec<f32> {
        self.state.clone()
    }

    fn set_state(&mut self, x: &[f32]) -> Result<(), CoreError> {
        if x.len() != self.reservoir_size {
            return Err(CoreError::DimensionMismatch {
                expected: self.reservoir_size,
                got: x.len(),
            });
        }
        self.state.copy_from_slice(x);
        Ok(())
    }

    fn reset_state(&mut self) {
        self.state.fill(0.0);
    }

    fn output_weights(&self) -> Vec<f32> {
        self.output_weights.clone()
    }

    fn set_output_weights(&mut self, w: &[f32]) -> Result<(), CoreError> {
        if w.len() != self.output_size * self.reservoir_size {
            return Err(CoreError::DimensionMismatch {
                expected: self.output_size * self.reservoir_size,
                got: w.len(),
            });
        }
        self.output_weights.copy_from_slice(w);
        Ok(())
    }

    fn input_weights(&self) -> Vec<f32> {
        self.input_weights.clone()
    }

    fn reservoir_sparse(&self) -> &[SparseEntry] {
        &self.reservoir_weights
    }

    fn train(
        &mut self,
        inputs: &[Vec<f32>],
        targets: &[Vec<f32>],
        washout: usize,
        ridge: f32,
        cancel: Option<&dyn Fn() -> bool>,
    ) -> Result<f32, CoreError> {
        let mse = ridge_train(self, inputs, targets, washout, ridge, cancel)?;
        self.lifecycle = ReservoirState::Trained;
        Ok(mse)
    }
}

/// Dense `W * x` where `w` is row-major shape (rows, cols).
pub(crate) fn dense_matvec(w: &[f32], x: &[f32], rows: usize, cols: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; rows];
    for r in 0..rows {
        let base = r * cols;
        let mut acc = 0.0f32;
        for c in 0..cols {
            acc += w[base + c] * x[c];
        }
        out[r] = acc;
    }
    out
}

/// Shared ridge-regression trainer used by every `ReservoirCore`
/// implementation (spec §4.2 `train`). Drives `update` across `inputs`,
/// collects post-washout states, and solves
/// `W_out = (X^T X + λI)^-1 X^T Y` via LU, escalating λ up to three times
/// on a singular solve before failing `NUMERIC_INSTABILITY`. Supports
/// cancellation with rollback to the pre-call read-out and state.
pub(crate) fn ridge_train<R: ReservoirCore + ?Sized>(
    reservoir: &mut R,
    inputs: &[Vec<f32>],
    targets: &[Vec<f32>],
    washout: usize,
    ridge: f32,
    cancel: Option<&dyn Fn() -> bool>,
) -> Result<f32, CoreError> {
    if inputs.len() < washout {
        return Err(CoreError::InsufficientData {
            needed: washout,
            got: inputs.len(),
        });
    }
    if inputs.len() != targets.len() {
        return Err(CoreError::DimensionMismatch {
            expected: inputs.len(),
            got: targets.len(),
        });
    }

    let pre_train_weights = reservoir.output_weights();
    let pre_train_state = reservoir.state();
    let n = reservoir.reservoir_size();
    let o = reservoir.output_size();

    reservoir.reset_state();
    let mut states: Vec<Vec<f32>> = Vec::with_capacity(inputs.len() - washout);
    let mut post_targets: Vec<Vec<f32>> = Vec::with_capacity(inputs.len() - washout);

    for (idx, input) in inputs.iter().enumerate() {
        if let Some(predicate) = cancel {
            if predicate() {
                reservoir.set_output_weights(&pre_train_weights)?;
                let _ = reservoir.set_state(&pre_train_state);
                return Err(CoreError::Cancelled);
            }
        }
        reservoir.update(input)?;
        if idx >= washout {
            states.push(reservoir.state());
            post_targets.push(targets[idx].clone());
        }
    }

    let mut lambda = ridge;
    let mut last_err: Option<CoreError> = None;
    for _attempt in 0..4 {
        match solve_ridge(&states, &post_targets, n, o, lambda) {
            Ok(w_out) => {
                reservoir.set_output_weights(&w_out)?;
                let mse = mean_squared_error(reservoir, inputs, targets, washout);
                reservoir.set_state(&pre_train_state)?;
                return Ok(mse);
            }
            Err(e) => {
                last_err = Some(e);
                lambda *= 10.0;
            }
        }
    }

    reservoir.set_output_weights(&pre_train_weights)?;
    let _ = reservoir.set_state(&pre_train_state);
    Err(last_err.unwrap_or_else(|| {
        CoreError::NumericInstability("ridge solve failed with no diagnostic".to_string())
    }))
}

/// Solve `W_out = (X^T X + λI)^-1 X^T Y` via LU decomposition. `states` is
/// one row per sample (length N each); `targets` is one row per sample
/// (length O each). Returns row-major (O, N).
fn solve_ridge(
    states: &[Vec<f32>],
    targets: &[Vec<f32>],
    n: usize,
    o: usize,
    lambda: f32,
) -> Result<Vec<f32>, CoreError> {
    let samples = states.len();
    if samples == 0 {
        return Ok(vec![0.0; o * n]);
    }

    let x = DMatrix::from_fn(samples, n, |r, c| states[r][c] as f64);
    let y = DMatrix::from_fn(samples, o, |r, c| targets[r][c] as f64);

    let xtx = x.transpose() * &x;
    let xty = x.transpose() * &y;
    let ridge_eye = DMatrix::<f64>::identity(n, n) * lambda as f64;
    let regularized = xtx + ridge_eye;

    let lu = regularized.lu();
    let solution = lu.solve(&xty).ok_or_else(|| {
        CoreError::NumericInstability(
            "XtX + lambda*I is singular to working precision".to_string(),
        )
    })?;

    // `solution` is (N, O); the read-out is stored row-major (O, N).
    let mut w_out = vec![0.0f32; o * n];
    for row in 0..o {
        for col in 0..n {
            w_out[row * n + col] = solution[(col, row)] as f32;
        }
    }
    Ok(w_out)
}

fn mean_squared_error<R: ReservoirCore + ?Sized>(
    reservoir: &mut R,
    inputs: &[Vec<f32>],
    targets: &[Vec<f32>],
    washout: usize,
) -> f32 {
    reservoir.reset_state();
    let mut sum_sq = 0.0f64;
    let mut count = 0usize;

    for (idx, input) in inputs.iter().enumerate() {
        if reservoir.update(input).is_err() {
            continue;
        }
        if idx < washout {
            continue;
        }
        let pred = dense_matvec(
            &reservoir.output_weights(),
            &reservoir.state(),
            reservoir.output_size(),
            reservoir.reservoir_size(),
        );
        for (p, t) in pred.iter().zip(targets[idx].iter()) {
            let diff = (*p - *t) as f64;
            sum_sq += diff * diff;
        }
        count += targets[idx].len();
    }

    if count == 0 {
        0.0
    } else {
        (sum_sq / count as f64) as f32
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        // Invariant 1 (determinism): identical config/seed pairs produce
        // byte-identical weights, for any reservoir shape in range.
        #[test]
        fn determinism_holds_across_shapes(
            seed: u32,
            n in 2usize..64,
            i in 1usize..6,
            o in 1usize..4,
        ) {
            let cfg = Config {
                reservoir_size: n,
                input_size: i,
                output_size: o,
                ..Config::default()
            };
            let a = Reservoir::new(&cfg, seed).unwrap();
            let b = Reservoir::new(&cfg, seed).unwrap();
            prop_assert_eq!(a.input_weights(), b.input_weights());
            prop_assert_eq!(a.reservoir_sparse(), b.reservoir_sparse());
        }

        // Invariant 2 (state bound): no reservoir entry ever leaves
        // [-1-eps, 1+eps] after any sequence of updates, since tanh and a
        // convex leaky blend with a bounded prior state can't escape it.
        #[test]
        fn state_stays_bounded(
            seed: u32,
            n in 2usize..32,
            steps in 1usize..40,
            values in prop::collection::vec(-5.0f32..5.0, 1..40),
        ) {
            let cfg = Config {
                reservoir_size: n,
                input_size: 1,
                output_size: 1,
                ..Config::default()
            };
            let mut r = Reservoir::new(&cfg, seed).unwrap();
            for k in 0..steps.min(values.len()) {
                r.update(&[values[k]]).unwrap();
            }
            prop_assert!(r.state().iter().all(|x| x.abs() <= 1.0 + 1e-6));
        }

        // Invariant 3 (prediction purity): predict() never advances state,
        // so repeated calls after any update sequence agree exactly.
        #[test]
        fn predict_is_pure_after_any_updates(
            seed: u32,
            n in 2usize..32,
            values in prop::collection::vec(-3.0f32..3.0, 1..20),
        ) {
            let cfg = Config {
                reservoir_size: n,
                input_size: 1,
                output_size: 1,
                ..Config::default()
            };
            let mut r = Reservoir::new(&cfg, seed).unwrap();
            for v in &values {
                r.update(&[*v]).unwrap();
            }
            let y1 = r.predict();
            let y2 = r.predict();
            prop_assert_eq!(y1, y2);
        }
    }
}
