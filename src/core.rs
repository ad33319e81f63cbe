//! Top-level core: bundles a reservoir variant, the online learner, and the
//! birth certificate behind the boundary operations of spec §6.1, plus the
//! byte-exact snapshot format of spec §6.2.

use crate::anomaly::{AnomalyDetector, AnomalyEvent};
use crate::birth::BirthCertificate;
use crate::codec::{self, Quantized};
use crate::config::Config;
use crate::error::{CoreError, LearnerReseeded};
use crate::learner::{Correlation, LedgerEntry, LedgerKey, OnlineLearner};
use crate::reservoir::{ReservoirCore, ReservoirState};
use crate::rng::SparseEntry;

const MAGIC: [u8; 8] = *b"EONCORE\0";
const VERSION_MAJOR: u8 = 1;
const VERSION_MINOR: u8 = 0;

/// Opaque handle a host uses to assert exclusive access to a core across
/// cooperating tasks (spec §5 "a single session token... assert exclusive
/// access via assertion"). The core performs no internal locking; this is
/// purely an identity check the host opts into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionToken(u64);

impl SessionToken {
    fn derive(birth: &BirthCertificate) -> Self {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&birth.birth_hash[..8]);
        Self(u64::from_le_bytes(bytes))
    }
}

/// The top-level reservoir-computing core: a reservoir variant plus its
/// online learner and birth identity, bundled behind one boundary API.
pub struct Core<R: ReservoirCore, C: Correlation> {
    reservoir: R,
    learner: OnlineLearner<C>,
    birth: BirthCertificate,
    config: Config,
    session_token: SessionToken,
    /// Self-supervised one-step-ahead prediction awaiting the next input
    /// (spec §4.5 steps 1–3: `e_t = u_{t+1} - y_pred` once `u_{t+1}`
    /// arrives). `None` when no prediction is pending.
    pending_prediction: Option<Vec<f32>>,
}

impl<R: ReservoirCore, C: Correlation> Core<R, C> {
    /// Construct a new core from a validated configuration and seed (spec
    /// §6.1 `construct`). `correlation` is supplied by the caller so the
    /// choice between dense and diagonal-only storage is made at
    /// construction, not hidden inside this function (spec §5).
    pub fn construct(
        config: Config,
        seed: u32,
        birth_time: u64,
        correlation: C,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let reservoir = R::construct_variant(&config, seed)?;
        let birth = BirthCertificate::new(&config, seed, birth_time);
        let session_token = SessionToken::derive(&birth);
        let learner = OnlineLearner::new(correlation, config.forgetting, 1e-2);

        Ok(Self {
            reservoir,
            learner,
            birth,
            config,
            session_token,
            pending_prediction: None,
        })
    }

    /// This core's session token, for the host to hand out to whichever
    /// task currently owns it.
    pub fn session_token(&self) -> SessionToken {
        self.session_token
    }

    /// Assert that `token` matches this core's session token. Reuses
    /// `CONFIG_MISMATCH`: both represent "this value was not constructed
    /// for/by this instance."
    pub fn assert_session(&self, token: SessionToken) -> Result<(), CoreError> {
        if token == self.session_token {
            Ok(())
        } else {
            Err(CoreError::ConfigMismatch(
                "session token does not match this core".to_string(),
            ))
        }
    }

    /// This core's immutable birth certificate.
    pub fn birth_certificate(&self) -> &BirthCertificate {
        &self.birth
    }

    /// This core's configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Advance the reservoir with input `u` (spec §6.1 `update`).
    pub fn update(&mut self, u: &[f32]) -> Result<(), CoreError> {
        self.reservoir.update(u)
    }

    /// Pure function of current state (spec §6.1 `predict`).
    pub fn predict(&self) -> Vec<f32> {
        self.reservoir.predict()
    }

    /// Batch-fit the read-out via ridge regression (spec §6.1 `train`).
    pub fn train(
        &mut self,
        inputs: &[Vec<f32>],
        targets: &[Vec<f32>],
        washout: usize,
        cancel: Option<&dyn Fn() -> bool>,
    ) -> Result<f32, CoreError> {
        self.reservoir
            .train(inputs, targets, washout, self.config.ridge, cancel)
    }

    /// Online RLS observation (spec §6.1 `observe`).
    pub fn observe(
        &mut self,
        u: &[f32],
        y_target: &[f32],
    ) -> Result<Option<LearnerReseeded>, CoreError> {
        self.learner.observe(&mut self.reservoir, u, y_target)
    }

    /// Record feedback for a (prompt, response) pair (spec §6.1
    /// `feedback`).
    pub fn feedback(
        &mut self,
        prompt_key: LedgerKey,
        response_key: LedgerKey,
        delta: i32,
        timestamp_ms: u64,
    ) {
        self.learner
            .feedback(prompt_key, response_key, delta, timestamp_ms);
    }

    /// Replay accumulated feedback into the read-out (spec §6.1
    /// `consolidate`).
    pub fn consolidate(
        &mut self,
        lookup: &dyn Fn(&[u8], &[u8]) -> Option<(Vec<f32>, Vec<f32>)>,
    ) -> crate::learner::ConsolidateSummary {
        self.learner.consolidate(&mut self.reservoir, lookup)
    }

    /// Drive the reservoir with `u` and feed its prediction error into
    /// `detector` (spec §6.1 `anomaly_observe`, §4.5 steps 1–3). `y_target`
    /// selects the error mode: `Some(y)` computes the supervised error
    /// `e_t = y_t - y_pred` against this step's own prediction; `None`
    /// computes the self-supervised one-step-ahead error
    /// `e_t = u_{t+1} - y_pred`, comparing the *previous* step's buffered
    /// prediction against this step's input once it arrives. Returns
    /// whatever `detector.observe` returns for the error magnitude
    /// `||e_t||_2` it was fed, or `None` if no error was available yet
    /// (e.g. the very first self-supervised sample).
    pub fn anomaly_observe(
        &mut self,
        detector: &mut AnomalyDetector,
        u: &[f32],
        y_target: Option<&[f32]>,
        timestamp: u64,
    ) -> Result<Option<AnomalyEvent>, CoreError> {
        if let Some(y) = y_target {
            if y.len() != self.reservoir.output_size() {
                return Err(CoreError::DimensionMismatch {
                    expected: self.reservoir.output_size(),
                    got: y.len(),
                });
            }
        }

        let mut emitted = None;

        if y_target.is_none() {
            if let Some(prev_pred) = self.pending_prediction.take() {
                let magnitude = error_magnitude(&prev_pred, u)?;
                emitted = detector.observe(magnitude, timestamp);
            }
        }

        self.reservoir.update(u)?;
        let y_pred = self.reservoir.predict();

        match y_target {
            Some(y) => {
                let magnitude = error_magnitude(&y_pred, y)?;
                emitted = detector.observe(magnitude, timestamp);
            }
            None => {
                self.pending_prediction = Some(y_pred);
            }
        }

        Ok(emitted)
    }

    /// Quantize the current read-out (spec §6.1 `quantize`).
    pub fn quantize(&self, mode: crate::config::QuantizationMode) -> Result<Quantized, CoreError> {
        let w_out = self.reservoir.output_weights();
        use crate::config::QuantizationMode as Q;
        match mode {
            Q::None => Err(CoreError::CodecError(
                "quantization_mode none has no packed representation".to_string(),
            )),
            Q::Int8 => Ok(codec::quantize_int8(&w_out)),
            Q::Int4 => Ok(codec::quantize_int4(&w_out)),
            Q::Bit1 => Ok(codec::quantize_bit1(&w_out)),
        }
    }

    /// Export the read-out as a 1-bit peer-sync packet (spec §6.1
    /// `export_sync_packet`).
    pub fn export_sync_packet(&self) -> Result<Vec<u8>, CoreError> {
        codec::export_sync_packet(&self.reservoir, self.birth.seed)
    }

    /// Absorb a peer-sync packet, merging the remote read-out into this
    /// one (spec §6.1 `absorb_sync_packet`).
    pub fn absorb_sync_packet(&mut self, bytes: &[u8]) -> Result<(), CoreError> {
        codec::absorb_sync_packet(&mut self.reservoir, bytes)
    }

    /// Serialize to the byte-exact snapshot format of spec §6.2.
    pub fn snapshot(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC);
        buf.push(VERSION_MAJOR);
        buf.push(VERSION_MINOR);
        buf.extend_from_slice(&self.birth.to_bytes());

        let n = self.reservoir.reservoir_size();
        let i = self.reservoir.input_size();
        let o = self.reservoir.output_size();
        push_f32(&mut buf, n as f32);
        push_f32(&mut buf, i as f32);
        push_f32(&mut buf, o as f32);
        push_f32(&mut buf, self.config.sparsity_factor as f32);
        push_f32(&mut buf, self.config.spectral_radius);
        push_f32(&mut buf, self.config.leak_rate);
        push_f32(&mut buf, self.config.forgetting);
        push_f32(&mut buf, self.config.ridge);

        for w in self.reservoir.input_weights() {
            push_f32(&mut buf, w);
        }

        let sparse = self.reservoir.reservoir_sparse();
        buf.extend_from_slice(&(sparse.len() as u32).to_le_bytes());
        for &(row, col, value) in sparse {
            buf.extend_from_slice(&row.to_le_bytes());
            buf.extend_from_slice(&col.to_le_bytes());
            push_f32(&mut buf, value);
        }

        for w in self.reservoir.output_weights() {
            push_f32(&mut buf, w);
        }
        for x in self.reservoir.state() {
            push_f32(&mut buf, x);
        }
        for p in self.learner.correlation().to_dense() {
            push_f32(&mut buf, p);
        }

        let ledger = self.learner.ledger();
        buf.extend_from_slice(&(ledger.len() as u32).to_le_bytes());
        for ((prompt, response), entry) in ledger.iter() {
            buf.extend_from_slice(&(prompt.len() as u16).to_le_bytes());
            buf.extend_from_slice(prompt);
            buf.extend_from_slice(&(response.len() as u16).to_le_bytes());
            buf.extend_from_slice(response);
            buf.extend_from_slice(&entry.score.to_le_bytes());
            buf.extend_from_slice(&entry.timestamp_ms.to_le_bytes());
        }

        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Parse the byte-exact snapshot format of spec §6.2. Rejects bad
    /// magic, unsupported version, bad CRC, or truncation with
    /// `SNAPSHOT_CORRUPT`.
    pub fn restore(bytes: &[u8]) -> Result<Self, CoreError> {
        let mut cursor = Cursor::new(bytes);

        let magic = cursor.take(8)?;
        if magic != MAGIC {
            return Err(CoreError::SnapshotCorrupt("bad magic".to_string()));
        }
        let major = cursor.take_u8()?;
        let minor = cursor.take_u8()?;
        if major != VERSION_MAJOR || minor != VERSION_MINOR {
            return Err(CoreError::SnapshotCorrupt(format!(
                "unsupported version {major}.{minor}"
            )));
        }

        if bytes.len() < 4 {
            return Err(CoreError::SnapshotCorrupt("truncated record".to_string()));
        }
        let body = &bytes[..bytes.len() - 4];
        let expected_crc = u32::from_le_bytes(bytes[bytes.len() - 4..].try_into().unwrap());
        let actual_crc = crc32fast::hash(body);
        if expected_crc != actual_crc {
            return Err(CoreError::SnapshotCorrupt("CRC mismatch".to_string()));
        }

        let birth_bytes: [u8; 40] = cursor.take(40)?.try_into().unwrap();
        let birth = BirthCertificate::from_bytes(&birth_bytes);

        let n = cursor.take_f32()? as usize;
        let i = cursor.take_f32()? as usize;
        let o = cursor.take_f32()? as usize;
        let sparsity_factor = cursor.take_f32()? as usize;
        let spectral_radius = cursor.take_f32()?;
        let leak_rate = cursor.take_f32()?;
        let forgetting = cursor.take_f32()?;
        let ridge = cursor.take_f32()?;

        let mut input_weights = Vec::with_capacity(n * i);
        for _ in 0..(n * i) {
            input_weights.push(cursor.take_f32()?);
        }

        let nnz = cursor.take_u32()? as usize;
        let mut reservoir_sparse: Vec<SparseEntry> = Vec::with_capacity(nnz);
        for _ in 0..nnz {
            let row = cursor.take_u16()?;
            let col = cursor.take_u16()?;
            let value = cursor.take_f32()?;
            reservoir_sparse.push((row, col, value));
        }

        let mut output_weights = Vec::with_capacity(o * n);
        for _ in 0..(o * n) {
            output_weights.push(cursor.take_f32()?);
        }
        let mut state = Vec::with_capacity(n);
        for _ in 0..n {
            state.push(cursor.take_f32()?);
        }
        let mut p_dense = Vec::with_capacity(n * n);
        for _ in 0..(n * n) {
            p_dense.push(cursor.take_f32()?);
        }

        let ledger_count = cursor.take_u32()? as usize;
        let mut ledger = std::collections::HashMap::with_capacity(ledger_count);
        for _ in 0..ledger_count {
            let prompt_len = cursor.take_u16()? as usize;
            let prompt = cursor.take(prompt_len)?.to_vec();
            let response_len = cursor.take_u16()? as usize;
            let response = cursor.take(response_len)?.to_vec();
            let score = cursor.take_i32()?;
            let timestamp_ms = cursor.take_u64()?;
            ledger.insert(
                (prompt, response),
                LedgerEntry {
                    score,
                    timestamp_ms,
                    consumed: false,
                },
            );
        }

        let lifecycle = if state.iter().any(|&v| v != 0.0) {
            ReservoirState::Untrained
        } else {
            ReservoirState::Born
        };
        let lifecycle = if output_weights.iter().any(|&v| v != 0.0) {
            ReservoirState::Trained
        } else {
            lifecycle
        };

        let reservoir = R::restore_parts(
            i,
            n,
            o,
            leak_rate,
            input_weights,
            reservoir_sparse,
            output_weights,
            state,
            lifecycle,
        )?;

        let config = Config {
            reservoir_size: n,
            input_size: i,
            output_size: o,
            sparsity_factor,
            spectral_radius,
            leak_rate,
            ridge,
            forgetting,
            fixed_point: reservoir.is_fixed_point(),
            quantization_mode: crate::config::QuantizationMode::None,
            washout: crate::config::Config::default().washout,
            anomaly_window: crate::config::Config::default().anomaly_window,
            anomaly_cooldown: crate::config::Config::default().anomaly_cooldown,
        };

        let correlation = C::from_dense(n, &p_dense);
        let mut learner = OnlineLearner::new(correlation, forgetting, 1e-2);
        learner.load_ledger(ledger);

        let session_token = SessionToken::derive(&birth);
        Ok(Self {
            reservoir,
            learner,
            birth,
            config,
            session_token,
            pending_prediction: None,
        })
    }
}

fn push_f32(buf: &mut Vec<u8>, v: f32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// `||target - pred||_2` (spec §4.5 step 3). Both supervised and
/// self-supervised error modes reduce to this once the comparison vector is
/// chosen.
fn error_magnitude(pred: &[f32], target: &[f32]) -> Result<f32, CoreError> {
    if pred.len() != target.len() {
        return Err(CoreError::DimensionMismatch {
            expected: pred.len(),
            got: target.len(),
        });
    }
    let sum_sq: f32 = pred
        .iter()
        .zip(target.iter())
        .map(|(p, t)| (t - p) * (t - p))
        .sum();
    Ok(sum_sq.sqrt())
}

/// Minimal forward-only byte cursor for parsing the snapshot format,
/// turning truncation into `SNAPSHOT_CORRUPT` rather than a panic.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CoreError> {
        if self.pos + n > self.bytes.len() {
            return Err(CoreError::SnapshotCorrupt("truncated record".to_string()));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, CoreError> {
        Ok(self.take(1)?[0])
    }

    fn take_u16(&mut self) -> Result<u16, CoreError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn take_u32(&mut self) -> Result<u32, CoreError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn take_i32(&mut self) -> Result<i32, CoreError> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn take_u64(&mut self) -> Result<u64, CoreError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn take_f32(&mut self) -> Result<f32, CoreError> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }
}
