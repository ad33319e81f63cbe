//! Streaming anomaly detector (C5): flags outliers by z-score against an
//! online baseline (spec §4.5 steps 4–7). Driving the reservoir and
//! computing the prediction error itself — supervised or self-supervised
//! one-step-ahead (§4.5 steps 1–3) — is `core::Core::anomaly_observe`'s job;
//! this module only ever sees the resulting error magnitude.

/// Severity classification of an anomaly event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// `|z| < 2.5`; never emitted.
    Normal,
    /// `2.5 <= |z| < 3.5`.
    Low,
    /// `3.5 <= |z| < 4.5`.
    Medium,
    /// `4.5 <= |z| < 6`.
    High,
    /// `|z| >= 6`; never suppressed by cooldown.
    Critical,
}

impl Severity {
    fn from_z(z: f32) -> Self {
        let az = z.abs();
        if az < 2.5 {
            Self::Normal
        } else if az < 3.5 {
            Self::Low
        } else if az < 4.5 {
            Self::Medium
        } else if az < 6.0 {
            Self::High
        } else {
            Self::Critical
        }
    }

    fn downgrade_one(self) -> Self {
        match self {
            Self::Low => Self::Normal,
            Self::Medium => Self::Low,
            Self::High => Self::Medium,
            // Critical is never suppressed; Normal has nowhere to go.
            other => other,
        }
    }
}

/// An emitted anomaly: one per non-NORMAL sample, after cooldown
/// suppression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnomalyEvent {
    /// Host-supplied timestamp of the sample that triggered this event.
    pub timestamp: u64,
    /// Z-score of the error magnitude at this sample.
    pub z: f32,
    /// Severity after cooldown downgrade.
    pub severity: Severity,
    /// Index of the sample within this detector's stream.
    pub sample_index: u64,
}

/// Online mean/variance accumulator (Welford's algorithm), fed only by
/// NORMAL/LOW samples so severe anomalies never contaminate the baseline.
#[derive(Debug, Clone, Copy, Default)]
struct Welford {
    count: u64,
    mean: f64,
    m2: f64,
}

impl Welford {
    fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;
    }

    fn std_dev(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / self.count as f64).sqrt()
        }
    }
}

/// Streaming z-score anomaly detector. Construct one per monitored signal;
/// feed it error magnitudes via `observe`.
pub struct AnomalyDetector {
    calibration_window: usize,
    cooldown: usize,
    baseline: Welford,
    samples_seen: u64,
    last_emission_index: Option<u64>,
}

impl AnomalyDetector {
    /// Construct a detector with the given calibration window (spec default
    /// 100) and cooldown (spec default 5).
    pub fn new(calibration_window: usize, cooldown: usize) -> Self {
        Self {
            calibration_window,
            cooldown,
            baseline: Welford::default(),
            samples_seen: 0,
            last_emission_index: None,
        }
    }

    /// Whether the calibration window has completed.
    pub fn is_calibrated(&self) -> bool {
        self.samples_seen >= self.calibration_window as u64
    }

    /// Feed one error magnitude `m_t = ||e_t||_2` and a host-supplied
    /// timestamp. Returns `Some(event)` if this sample is non-NORMAL after
    /// cooldown downgrade; the caller is responsible for invoking its own
    /// callback synchronously with the result (spec §4.5 "delivers it
    /// through a caller-supplied callback").
    pub fn observe(&mut self, magnitude: f32, timestamp: u64) -> Option<AnomalyEvent> {
        let sample_index = self.samples_seen;
        self.samples_seen += 1;

        // Calibration-complete flag flips at t = W (spec §4.5 step 4): the
        // W-th sample (index W-1) is still a pure calibration sample, not
        // the first classified one.
        if sample_index < self.calibration_window as u64 {
            self.baseline.push(magnitude as f64);
            return None;
        }

        let sigma = self.baseline.std_dev().max(1e-6);
        let z = (magnitude as f64 - self.baseline.mean) / sigma;
        let mut severity = Severity::from_z(z as f32);

        if severity != Severity::Critical {
            if let Some(last) = self.last_emission_index {
                let within_cooldown = sample_index.saturating_sub(last) < self.cooldown as u64;
                if within_cooldown {
                    severity = severity.downgrade_one();
                }
            }
        }

        if severity == Severity::Normal || severity == Severity::Low {
            self.baseline.push(magnitude as f64);
        }

        if severity == Severity::Normal {
            return None;
        }

        self.last_emission_index = Some(sample_index);
        Some(AnomalyEvent {
            timestamp,
            z: z as f32,
            severity,
            sample_index,
        })
    }
}
