//! Fixed-point (Q8.8) reservoir variant (spec §2 "Fixed-point variant of
//! C2 (Q8.8)"): the same `ReservoirCore` capability set as [`Reservoir`],
//! evaluated with saturating Q8.8 arithmetic for the MCU/edge profile
//! (N ≤ 256). The read-out stays real-valued (spec §3 only requires the
//! *state-space* arithmetic to be fixed-point); only `x` and the reservoir
//! update path use `Q8_8`.

use crate::config::Config;
use crate::error::CoreError;
use crate::fixed::{tanh_q8_8, Q8_8};
use crate::reservoir::{dense_matvec, ridge_train, ReservoirCore, ReservoirState};
use crate::rng::{sparse_matrix, spectral_rescale, SparseEntry, Xorshift32};

#[derive(Debug, Clone)]
pub struct FixedReservoir {
    input_size: usize,
    reservoir_size: usize,
    output_size: usize,
    leak_rate: Q8_8,
    input_weights: Vec<Q8_8>,
    reservoir_weights_raw: Vec<SparseEntry>,
    reservoir_weights: Vec<(u16, u16, Q8_8)>,
    output_weights: Vec<f32>,
    state: Vec<Q8_8>,
    lifecycle: ReservoirState,
}

impl FixedReservoir {
    /// Construct a fixed-point reservoir. Weights are generated in real
    /// arithmetic (same C1 contract as [`Reservoir`]) and quantized to
    /// Q8.8 once at birth.
    pub fn new(config: &Config, seed: u32) -> Result<Self, CoreError> {
        let mut rng = Xorshift32::new(seed);
        let n = config.reservoir_size;
        let i = config.input_size;
        let o = config.output_size;

        let mut input_weights_f32 = vec![0.0f32; n * i];
        for w in input_weights_f32.iter_mut() {
            *w = rng.uniform_unit();
        }

        let mut reservoir_weights_raw = sparse_matrix(&mut rng, n, config.sparsity_factor);
        spectral_rescale(&mut reservoir_weights_raw, n, config.spectral_radius)?;

        let input_weights = input_weights_f32.iter().map(|&v| Q8_8::from_f32(v)).collect();
        let reservoir_weights = reservoir_weights_raw
            .iter()
            .map(|&(r, c, v)| (r, c, Q8_8::from_f32(v)))
            .collect();

        Ok(Self {
            input_size: i,
            reservoir_size: n,
            output_size: o,
            leak_rate: Q8_8::from_f32(config.leak_rate),
            input_weights,
            reservoir_weights_raw,
            reservoir_weights,
            output_weights: vec![0.0f32; o * n],
            state: vec![Q8_8::ZERO; n],
            lifecycle: ReservoirState::Born,
        })
    }
}

impl ReservoirCore for FixedReservoir {
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

        let reservoir_weights = reservoir_sparse
            .iter()
            .map(|&(r, c, v)| (r, c, Q8_8::from_f32(v)))
            .collect();

        Ok(Self {
            input_size,
            reservoir_size,
            output_size,
            leak_rate: Q8_8::from_f32(leak_rate),
            input_weights: input_weights.iter().map(|&v| Q8_8::from_f32(v)).collect(),
            reservoir_weights_raw: reservoir_sparse,
            reservoir_weights,
            output_weights,
            state: state.iter().map(|&v| Q8_8::from_f32(v)).collect(),
            lifecycle,
        })
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
        true
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
        let u_q: Vec<Q8_8> = u.iter().map(|&v| Q8_8::from_f32(v)).collect();

        // 32-bit (here: i64 for headroom up to N=4096) accumulators, right
        // shifted by the fractional bit count once at the end, per the
        // fixed-point numerical policy in spec §4.2.
        let mut acc = vec![0i64; n];
        for row in 0..n {
            let base = row * i;
            let mut a = 0i64;
            for col in 0..i {
                a += self.input_weights[base + col].0 as i64 * u_q[col].0 as i64;
            }
            acc[row] = a;
        }
        for &(row, col, value) in self.reservoir_weights.iter() {
            acc[row as usize] += value.0 as i64 * self.state[col as usize].0 as i64;
        }

        let mut next = vec![Q8_8::ZERO; n];
        for idx in 0..n {
            let shifted = acc[idx] >> 8;
            let clamped = shifted.clamp(i16::MIN as i64, i16::MAX as i64) as i16;
            let pre = Q8_8(clamped);
            let activated = tanh_q8_8(pre);

            let one_minus_leak = Q8_8::ONE.saturating_add(Q8_8(-self.leak_rate.0));
            let kept = one_minus_leak.saturating_mul(self.state[idx]);
            let gained = self.leak_rate.saturating_mul(activated);
            next[idx] = kept.saturating_add(gained).saturate_unit();
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
        let x: Vec<f32> = self.state.iter().map(|q| q.to_f32()).collect();
        dense_matvec(&self.output_weights, &x, self.output_size, self.reservoir_size)
    }

    fn state(&self) -> Vec<f32> {
        self.state.iter().map(|q| q.to_f32()).collect()
    }

    fn set_state(&mut self, x: &[f32]) -> Result<(), CoreError> {
        if x.len() != self.reservoir_size {
            return Err(CoreError::DimensionMismatch {
                expected: self.reservoir_size,
                got: x.len(),
            });
        }
        self.state = x.iter().map(|&v| Q8_8::from_f32(v)).collect();
        Ok(())
    }

    fn reset_state(&mut self) {
        self.state.fill(Q8_8::ZERO);
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
        self.input_weights.iter().map(|q| q.to_f32()).collect()
    }

    fn reservoir_sparse(&self) -> &[SparseEntry] {
        &self.reservoir_weights_raw
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
