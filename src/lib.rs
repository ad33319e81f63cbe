//! Deterministic echo-state-network core.
//!
//! A reservoir-computing engine for extreme-resource edge inference:
//! birth-deterministic construction (C1), a floating-point and a Q8.8
//! fixed-point reservoir variant sharing one capability trait (C2), an
//! online RLS learner with a feedback ledger (C3), a read-out quantizer and
//! 1-bit peer-sync wire codec (C4), and a streaming z-score anomaly
//! detector (C5). [`core::Core`] bundles a reservoir variant and its
//! learner behind the boundary operations.
//!
//! # Determinism
//!
//! Construction consumes a single [`rng::Xorshift32`] stream in a fixed
//! order; identical `(config, seed)` pairs produce byte-identical weights
//! and, transitively, byte-identical [`core::Core::snapshot`] output.
//!
//! # Fixed-point
//!
//! [`fixed_reservoir::FixedReservoir`] evaluates the same recurrence in
//! saturating Q8.8 arithmetic for the `N <= 256` MCU profile; both variants
//! implement [`reservoir::ReservoirCore`] so callers generic over that trait
//! work unchanged against either.
//!
//! # Features
//!
//! - `high-perf`: rayon-parallelized reservoir update for large N.
//! - `android`: selects the `release-android` build profile; no API surface
//!   change.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod anomaly;
pub mod birth;
pub mod codec;
pub mod config;
pub mod core;
pub mod error;
pub mod fixed;
pub mod fixed_reservoir;
pub mod learner;
pub mod reservoir;
pub mod rng;

pub use anomaly::{AnomalyDetector, AnomalyEvent, Severity};
pub use codec::{PacketType, SyncPacket};
pub use config::{Config, QuantizationMode};
pub use core::{Core, SessionToken};
pub use error::{CoreError, LearnerReseeded};
pub use fixed_reservoir::FixedReservoir;
pub use learner::OnlineLearner;
pub use reservoir::{Reservoir, ReservoirCore, ReservoirState};

/// Library version following semantic versioning.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
