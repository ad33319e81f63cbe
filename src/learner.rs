//! Streaming online learner (C3): Recursive Least Squares with forgetting,
//! a feedback ledger, and a consolidation ("sleep") pass.

use crate::error::{CoreError, LearnerReseeded};
use crate::reservoir::ReservoirCore;

/// Inverse-correlation storage strategy (spec §5 "a host may opt into a
/// diagonal-only learner"). Tagged variants behind one trait, chosen at
/// construction — not a class hierarchy.
pub trait Correlation {
    /// Dimension N.
    fn dim(&self) -> usize;
    /// Reset to `delta^-1 * I`.
    fn reseed(&mut self, delta: f32);
    /// `P * x`.
    fn mul_vec(&self, x: &[f32]) -> Vec<f32>;
    /// `x^T * P * x`.
    fn quadratic_form(&self, x: &[f32]) -> f32;
    /// Apply the RLS update `P <- (P - k * (P^T x)^T) / lambda` given the
    /// already-computed gain `k` and `Px = P * x`.
    fn rls_update(&mut self, k: &[f32], px: &[f32], lambda: f32);
    /// `P <- P / lambda`, used by `decay`.
    fn decay(&mut self, lambda: f32);
    /// Cheap positive-definiteness proxy: every diagonal entry is strictly
    /// positive.
    fn diagonal_is_positive(&self) -> bool;

    /// Expand to a dense N*N row-major matrix, for the snapshot format
    /// (spec §6.2 stores P as N*N f32 regardless of in-memory storage).
    fn to_dense(&self) -> Vec<f32>;
    /// Rebuild from a dense N*N row-major matrix. A diagonal-only
    /// implementation keeps only the diagonal entries.
    fn from_dense(n: usize, dense: &[f32]) -> Self
    where
        Self: Sized;
}

/// Dense `P`, shape (N, N). The default, exact RLS correlation matrix.
#[derive(Debug, Clone)]
pub struct DenseCorrelation {
    n: usize,
    p: Vec<f32>,
}

impl DenseCorrelation {
    /// Construct `P = delta^-1 * I`.
    pub fn new(n: usize, delta: f32) -> Self {
        let mut p = vec![0.0f32; n * n];
        let diag = 1.0 / delta;
        for i in 0..n {
            p[i * n + i] = diag;
        }
        Self { n, p }
    }
}

impl Correlation for DenseCorrelation {
    fn dim(&self) -> usize {
        self.n
    }

    fn reseed(&mut self, delta: f32) {
        let diag = 1.0 / delta;
        self.p.fill(0.0);
        for i in 0..self.n {
            self.p[i * self.n + i] = diag;
        }
    }

    fn mul_vec(&self, x: &[f32]) -> Vec<f32> {
        let n = self.n;
        let mut out = vec![0.0f32; n];
        for row in 0..n {
            let base = row * n;
            let mut acc = 0.0f32;
            for col in 0..n {
                acc += self.p[base + col] * x[col];
            }
            out[row] = acc;
        }
        out
    }

    fn quadratic_form(&self, x: &[f32]) -> f32 {
        let px = self.mul_vec(x);
        px.iter().zip(x.iter()).map(|(a, b)| a * b).sum()
    }

    fn rls_update(&mut self, k: &[f32], px: &[f32], lambda: f32) {
        let n = self.n;
        for row in 0..n {
            let base = row * n;
            for col in 0..n {
                self.p[base + col] = (self.p[base + col] - k[row] * px[col]) / lambda;
            }
        }
    }

    fn decay(&mut self, lambda: f32) {
        for v in self.p.iter_mut() {
            *v /= lambda;
        }
    }

    fn diagonal_is_positive(&self) -> bool {
        (0..self.n).all(|i| self.p[i * self.n + i] > 0.0)
    }

    fn to_dense(&self) -> Vec<f32> {
        self.p.clone()
    }

    fn from_dense(n: usize, dense: &[f32]) -> Self {
        Self {
            n,
            p: dense.to_vec(),
        }
    }
}

/// Diagonal-only `P`, shape (N,). Reduced memory (spec §5), reduced
/// accuracy: treats the correlation matrix as if inputs were uncorrelated.
#[derive(Debug, Clone)]
pub struct DiagCorrelation {
    p: Vec<f32>,
}

impl DiagCorrelation {
    /// Construct `p = delta^-1` for every dimension.
    pub fn new(n: usize, delta: f32) -> Self {
        Self {
            p: vec![1.0 / delta; n],
        }
    }
}

impl Correlation for DiagCorrelation {
    fn dim(&self) -> usize {
        self.p.len()
    }

    fn reseed(&mut self, delta: f32) {
        self.p.fill(1.0 / delta);
    }

    fn mul_vec(&self, x: &[f32]) -> Vec<f32> {
        self.p.iter().zip(x.iter()).map(|(p, x)| p * x).collect()
    }

    fn quadratic_form(&self, x: &[f32]) -> f32 {
        self.p.iter().zip(x.iter()).map(|(p, x)| p * x * x).sum()
    }

    fn rls_update(&mut self, k: &[f32], px: &[f32], lambda: f32) {
        for i in 0..self.p.len() {
            self.p[i] = (self.p[i] - k[i] * px[i]) / lambda;
        }
    }

    fn decay(&mut self, lambda: f32) {
        for v in self.p.iter_mut() {
            *v /= lambda;
        }
    }

    fn diagonal_is_positive(&self) -> bool {
        self.p.iter().all(|&v| v > 0.0)
    }

    fn to_dense(&self) -> Vec<f32> {
        let n = self.p.len();
        let mut dense = vec![0.0f32; n * n];
        for i in 0..n {
            dense[i * n + i] = self.p[i];
        }
        dense
    }

    fn from_dense(n: usize, dense: &[f32]) -> Self {
        let p = (0..n).map(|i| dense[i * n + i]).collect();
        Self { p }
    }
}

/// Opaque host-supplied identifier (spec §3 "opaque hashable identifiers").
pub type LedgerKey = Vec<u8>;

/// One feedback ledger entry.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    /// Accumulated signed score for this (prompt, response) pair.
    pub score: i32,
    /// Last update time, host-supplied milliseconds since the epoch.
    pub timestamp_ms: u64,
    /// Set once `consolidate` has replayed this entry.
    pub consumed: bool,
}

/// Summary of a `consolidate` pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsolidateSummary {
    /// Entries whose score crossed the consolidation threshold and were
    /// replayed.
    pub replayed: usize,
    /// Entries skipped because they were already consumed.
    pub skipped_consumed: usize,
    /// Entries skipped because no (u, y_target) data was available.
    pub skipped_no_data: usize,
    /// Set if the pass diverged and was rolled back.
    pub aborted: bool,
}

/// Streaming online learner: RLS readout update, feedback ledger, and
/// consolidation.
pub struct OnlineLearner<C: Correlation> {
    correlation: C,
    forgetting: f32,
    delta: f32,
    output_ceiling: f32,
    consolidation_threshold: i32,
    ledger: std::collections::HashMap<(LedgerKey, LedgerKey), LedgerEntry>,
}

impl<C: Correlation> OnlineLearner<C> {
    /// Construct a learner over an already-built correlation store.
    pub fn new(correlation: C, forgetting: f32, delta: f32) -> Self {
        Self {
            correlation,
            forgetting,
            delta,
            output_ceiling: 100.0,
            consolidation_threshold: 3,
            ledger: std::collections::HashMap::new(),
        }
    }

    /// Override the Frobenius-norm ceiling applied to `W_out` (default 100).
    pub fn with_output_ceiling(mut self, ceiling: f32) -> Self {
        self.output_ceiling = ceiling;
        self
    }

    /// Override the consolidation score threshold (default 3).
    pub fn with_consolidation_threshold(mut self, threshold: i32) -> Self {
        self.consolidation_threshold = threshold;
        self
    }

    /// `observe(u, y_target)`: drive the reservoir, compute the RLS
    /// correction, and apply it to `W_out`. Returns `Some(LearnerReseeded)`
    /// if the positive-definiteness proxy failed and `P` was reset.
    pub fn observe<R: ReservoirCore + ?Sized>(
        &mut self,
        reservoir: &mut R,
        u: &[f32],
        y_target: &[f32],
    ) -> Result<Option<LearnerReseeded>, CoreError> {
        self.observe_weighted(reservoir, u, y_target, 1.0)
    }

    /// `observe` with a scaling weight on the innovation term, used by
    /// `consolidate` to apply `sign(score) * log(1 + |score|)`-weighted
    /// replays without duplicating the RLS math.
    fn observe_weighted<R: ReservoirCore + ?Sized>(
        &mut self,
        reservoir: &mut R,
        u: &[f32],
        y_target: &[f32],
        weight: f32,
    ) -> Result<Option<LearnerReseeded>, CoreError> {
        if u.len() != reservoir.input_size() {
            return Err(CoreError::DimensionMismatch {
                expected: reservoir.input_size(),
                got: u.len(),
            });
        }
        if y_target.len() != reservoir.output_size() {
            return Err(CoreError::DimensionMismatch {
                expected: reservoir.output_size(),
                got: y_target.len(),
            });
        }

        reservoir.update(u)?;
        let x = reservoir.state();
        let n = reservoir.reservoir_size();
        let o = reservoir.output_size();

        let mut w_out = reservoir.output_weights();
        let y_pred = crate::reservoir::dense_matvec(&w_out, &x, o, n);

        let px = self.correlation.mul_vec(&x);
        let denom = self.forgetting + self.correlation.quadratic_form(&x);
        let k: Vec<f32> = px.iter().map(|v| v / denom).collect();

        for row in 0..o {
            let error = (y_target[row] - y_pred[row]) * weight;
            let base = row * n;
            for col in 0..n {
                w_out[base + col] += error * k[col];
            }
        }
        clip_frobenius(&mut w_out, self.output_ceiling);
        reservoir.set_output_weights(&w_out)?;

        self.correlation.rls_update(&k, &px, self.forgetting);

        if !self.correlation.diagonal_is_positive() {
            self.correlation.reseed(self.delta);
            return Ok(Some(LearnerReseeded));
        }
        Ok(None)
    }

    /// Add a signed delta to the feedback score for a (prompt, response)
    /// pair. Has no direct effect on `W_out`.
    pub fn feedback(
        &mut self,
        prompt_key: LedgerKey,
        response_key: LedgerKey,
        delta: i32,
        timestamp_ms: u64,
    ) {
        let entry = self
            .ledger
            .entry((prompt_key, response_key))
            .or_insert(LedgerEntry {
                score: 0,
                timestamp_ms,
                consumed: false,
            });
        entry.score += delta;
        entry.timestamp_ms = timestamp_ms;
    }

    /// Idempotent "sleep" pass: replay every ledger entry whose score
    /// crosses the consolidation threshold, weighted by
    /// `sign(score) * log(1 + |score|)`. `lookup` resolves a (prompt,
    /// response) pair back to the `(u, y_target)` that produced it — the
    /// ledger itself only stores scores (spec §3). Aborts and rolls back
    /// `W_out` to its pre-pass value if any replay grows its Frobenius norm
    /// by more than 10x.
    pub fn consolidate<R: ReservoirCore + ?Sized>(
        &mut self,
        reservoir: &mut R,
        lookup: &dyn Fn(&[u8], &[u8]) -> Option<(Vec<f32>, Vec<f32>)>,
    ) -> ConsolidateSummary {
        let mut summary = ConsolidateSummary::default();
        let pre_pass_weights = reservoir.output_weights();
        let pre_pass_norm = frobenius_norm(&pre_pass_weights).max(1e-6);

        let keys: Vec<(LedgerKey, LedgerKey)> = self.ledger.keys().cloned().collect();
        for key in keys {
            let entry = match self.ledger.get(&key) {
                Some(e) => e.clone(),
                None => continue,
            };
            if entry.consumed {
                summary.skipped_consumed += 1;
                continue;
            }
            if entry.score.unsigned_abs() < self.consolidation_threshold as u32 {
                continue;
            }

            let Some((u, y_target)) = lookup(&key.0, &key.1) else {
                summary.skipped_no_data += 1;
                continue;
            };

            let weight = (entry.score.signum() as f32) * ((1.0 + entry.score.abs() as f32).ln());
            if self
                .observe_weighted(reservoir, &u, &y_target, weight)
                .is_err()
            {
                continue;
            }
            summary.replayed += 1;

            let current_norm = frobenius_norm(&reservoir.output_weights());
            if current_norm > pre_pass_norm * 10.0 {
                let _ = reservoir.set_output_weights(&pre_pass_weights);
                summary.aborted = true;
                return summary;
            }

            if let Some(e) = self.ledger.get_mut(&key) {
                e.consumed = true;
            }
        }

        summary
    }

    /// Age `P` by one step without a data observation:
    /// `P <- P / forgetting`.
    pub fn decay(&mut self) {
        self.correlation.decay(self.forgetting);
    }

    /// Read-only view of the feedback ledger.
    pub fn ledger(&self) -> &std::collections::HashMap<(LedgerKey, LedgerKey), LedgerEntry> {
        &self.ledger
    }

    /// Load a ledger, e.g. from a snapshot.
    pub(crate) fn load_ledger(
        &mut self,
        ledger: std::collections::HashMap<(LedgerKey, LedgerKey), LedgerEntry>,
    ) {
        self.ledger = ledger;
    }

    /// Replace the correlation store, e.g. from a snapshot.
    pub(crate) fn set_correlation(&mut self, correlation: C) {
        self.correlation = correlation;
    }

    /// Access the correlation store, e.g. for snapshot serialization.
    pub fn correlation(&self) -> &C {
        &self.correlation
    }
}

fn frobenius_norm(w: &[f32]) -> f32 {
    w.iter().map(|v| v * v).sum::<f32>().sqrt()
}

fn clip_frobenius(w: &mut [f32], ceiling: f32) {
    let norm = frobenius_norm(w);
    if norm > ceiling && norm > 0.0 {
        let scale = ceiling / norm;
        for v in w.iter_mut() {
            *v *= scale;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::reservoir::Reservoir;

    fn reservoir(n: usize) -> Reservoir {
        let cfg = Config {
            reservoir_size: n,
            input_size: 1,
            output_size: 1,
            ..Config::default()
        };
        Reservoir::new(&cfg, 11).unwrap()
    }

    #[test]
    fn observe_moves_prediction_toward_target() {
        let mut r = reservoir(30);
        let mut learner = OnlineLearner::new(DenseCorrelation::new(30, 1e-2), 1.0, 1e-2);

        let mut last_err = f32::INFINITY;
        for i in 0..200 {
            let u = vec![(i as f32 * 0.1).sin()];
            let target = vec![0.3];
            learner.observe(&mut r, &u, &target).unwrap();
        }
        let pred = r.predict();
        let err = (pred[0] - 0.3).abs();
        assert!(err < last_err.min(0.5));
        last_err = err;
        let _ = last_err;
    }

    #[test]
    fn feedback_then_consolidate_replays_entry() {
        let mut r = reservoir(20);
        let mut learner = OnlineLearner::new(DenseCorrelation::new(20, 1e-2), 1.0, 1e-2);

        let prompt = b"p1".to_vec();
        let response = b"r1".to_vec();
        learner.feedback(prompt.clone(), response.clone(), 5, 1_000);

        let data = (vec![0.2f32], vec![0.4f32]);
        let lookup = move |p: &[u8], r: &[u8]| {
            if p == b"p1" && r == b"r1" {
                Some(data.clone())
            } else {
                None
            }
        };

        let summary = learner.consolidate(&mut r, &lookup);
        assert_eq!(summary.replayed, 1);
        assert!(!summary.aborted);

        // Idempotent: a second pass finds the entry already consumed.
        let summary2 = learner.consolidate(&mut r, &lookup);
        assert_eq!(summary2.replayed, 0);
        assert_eq!(summary2.skipped_consumed, 1);
    }

    #[test]
    fn diagonal_proxy_reseeds_on_violation() {
        let mut corr = DenseCorrelation::new(4, 1e-2);
        corr.p[0] = -1.0;
        assert!(!corr.diagonal_is_positive());
        corr.reseed(1e-2);
        assert!(corr.diagonal_is_positive());
    }

    #[test]
    fn decay_shrinks_forgetting_factor_scaled_p() {
        let mut corr = DenseCorrelation::new(3, 1.0);
        let before = corr.p.clone();
        corr.decay(0.5);
        for (b, a) in before.iter().zip(corr.p.iter()) {
            assert!((a - b / 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn output_weights_respect_frobenius_ceiling() {
        let mut w = vec![1000.0f32; 16];
        clip_frobenius(&mut w, 100.0);
        assert!(frobenius_norm(&w) <= 100.0 + 1e-3);
    }
}
