//! Construction-time configuration (spec §6.4).
//!
//! Mirrors the teacher's `RouterConfig`/`MLPTrainingConfig` shape: a plain
//! struct with a `Default` impl carrying the documented defaults, validated
//! explicitly at construction rather than relying on field invariants.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Wire-format / readout quantization mode (spec §4.4, §6.4).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum QuantizationMode {
    /// No quantization; read-out stays full precision.
    None,
    /// 8-bit linear quantization.
    Int8,
    /// 4-bit linear quantization.
    Int4,
    /// 1-bit sign quantization with a scalar magnitude.
    Bit1,
}

impl QuantizationMode {
    fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "none" => Ok(Self::None),
            "int8" => Ok(Self::Int8),
            "int4" => Ok(Self::Int4),
            "bit1" => Ok(Self::Bit1),
            other => Err(CoreError::ConfigError(format!(
                "unrecognized quantization_mode: {other}"
            ))),
        }
    }
}

/// Construction-time configuration. Immutable once passed to `Core::construct`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Reservoir size (N).
    pub reservoir_size: usize,
    /// Input dimension (I).
    pub input_size: usize,
    /// Output dimension (O).
    pub output_size: usize,
    /// Sparsity factor (s): 1/s fraction of `W_res` is non-zero.
    pub sparsity_factor: usize,
    /// Target spectral radius (ρ).
    pub spectral_radius: f32,
    /// Leak rate (α).
    pub leak_rate: f32,
    /// Batch ridge regularizer (λ_ridge).
    pub ridge: f32,
    /// RLS forgetting factor (λ).
    pub forgetting: f32,
    /// Q8.8 fixed-point mode.
    pub fixed_point: bool,
    /// Read-out quantization mode.
    pub quantization_mode: QuantizationMode,
    /// Samples discarded at the start of `train`.
    pub washout: usize,
    /// Anomaly detector calibration window length.
    pub anomaly_window: usize,
    /// Anomaly detector emission cooldown, in samples.
    pub anomaly_cooldown: usize,
}

impl Default for Config {
    fn default() -> Self {
        let reservoir_size = 100;
        Self {
            reservoir_size,
            input_size: 1,
            output_size: 1,
            sparsity_factor: 4,
            spectral_radius: 0.95,
            leak_rate: 1.0,
            ridge: 1e-4,
            forgetting: 0.99,
            fixed_point: false,
            quantization_mode: QuantizationMode::None,
            washout: default_washout(reservoir_size),
            anomaly_window: 100,
            anomaly_cooldown: 5,
        }
    }
}

fn default_washout(reservoir_size: usize) -> usize {
    50.max(reservoir_size / 2)
}

impl Config {
    /// Build a config from an untyped key/value map, as a CLI or host
    /// language binding would supply one. Unknown keys fail `CONFIG_ERROR`.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, CoreError> {
        let mut cfg = Self::default();
        let mut washout_explicit = false;

        for (key, value) in map {
            match key.as_str() {
                "reservoir_size" => cfg.reservoir_size = parse(key, value)?,
                "input_size" => cfg.input_size = parse(key, value)?,
                "output_size" => cfg.output_size = parse(key, value)?,
                "sparsity_factor" => cfg.sparsity_factor = parse(key, value)?,
                "spectral_radius" => cfg.spectral_radius = parse(key, value)?,
                "leak_rate" => cfg.leak_rate = parse(key, value)?,
                "ridge" => cfg.ridge = parse(key, value)?,
                "forgetting" => cfg.forgetting = parse(key, value)?,
                "fixed_point" => cfg.fixed_point = parse(key, value)?,
                "quantization_mode" => cfg.quantization_mode = QuantizationMode::parse(value)?,
                "washout" => {
                    cfg.washout = parse(key, value)?;
                    washout_explicit = true;
                }
                "anomaly_window" => cfg.anomaly_window = parse(key, value)?,
                "anomaly_cooldown" => cfg.anomaly_cooldown = parse(key, value)?,
                other => {
                    return Err(CoreError::ConfigError(format!(
                        "unrecognized configuration key: {other}"
                    )))
                }
            }
        }

        if !washout_explicit {
            cfg.washout = default_washout(cfg.reservoir_size);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate all invariants spec §6.4 / §5 attach to a configuration.
    pub fn validate(&self) -> Result<(), CoreError> {
        let max_n = if self.fixed_point { 256 } else { 4096 };
        if self.reservoir_size == 0 || self.reservoir_size > max_n {
            return Err(CoreError::ConfigError(format!(
                "reservoir_size must be in 1..={max_n} (fixed_point={})",
                self.fixed_point
            )));
        }
        if self.input_size == 0 {
            return Err(CoreError::ConfigError("input_size must be >= 1".into()));
        }
        if self.output_size == 0 {
            return Err(CoreError::ConfigError("output_size must be >= 1".into()));
        }
        if self.sparsity_factor == 0 {
            return Err(CoreError::ConfigError("sparsity_factor must be >= 1".into()));
        }
        if !(self.spectral_radius > 0.0 && self.spectral_radius.is_finite()) {
            return Err(CoreError::ConfigError("spectral_radius must be > 0".into()));
        }
        if !(self.leak_rate > 0.0 && self.leak_rate <= 1.0) {
            return Err(CoreError::ConfigError("leak_rate must be in (0, 1]".into()));
        }
        if !(self.forgetting > 0.0 && self.forgetting <= 1.0) {
            return Err(CoreError::ConfigError("forgetting must be in (0, 1]".into()));
        }
        if !(self.ridge >= 0.0 && self.ridge.is_finite()) {
            return Err(CoreError::ConfigError("ridge must be >= 0".into()));
        }
        Ok(())
    }

    /// Whether two configs are identical for the purposes of the identity
    /// rule in spec §3 ("identical seed AND identical configuration...").
    pub fn identical_for_birth(&self, other: &Config) -> bool {
        self.reservoir_size == other.reservoir_size
            && self.input_size == other.input_size
            && self.output_size == other.output_size
            && self.sparsity_factor == other.sparsity_factor
            && self.spectral_radius == other.spectral_radius
            && self.leak_rate == other.leak_rate
            && self.fixed_point == other.fixed_point
            && self.quantization_mode == other.quantization_mode
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, CoreError> {
    value
        .parse::<T>()
        .map_err(|_| CoreError::ConfigError(format!("invalid value for {key}: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = Config::default();
        assert_eq!(cfg.reservoir_size, 100);
        assert_eq!(cfg.sparsity_factor, 4);
        assert_eq!(cfg.spectral_radius, 0.95);
        assert_eq!(cfg.leak_rate, 1.0);
        assert_eq!(cfg.ridge, 1e-4);
        assert_eq!(cfg.forgetting, 0.99);
        assert!(!cfg.fixed_point);
        assert_eq!(cfg.quantization_mode, QuantizationMode::None);
        assert_eq!(cfg.washout, 50);
        assert_eq!(cfg.anomaly_window, 100);
        assert_eq!(cfg.anomaly_cooldown, 5);
    }

    #[test]
    fn unknown_key_is_config_error() {
        let mut map = HashMap::new();
        map.insert("not_a_real_key".to_string(), "1".to_string());
        assert!(matches!(
            Config::from_map(&map),
            Err(CoreError::ConfigError(_))
        ));
    }

    #[test]
    fn reservoir_size_ceiling_depends_on_fixed_point() {
        let mut cfg = Config {
            reservoir_size: 300,
            fixed_point: true,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
        cfg.fixed_point = false;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn washout_default_scales_with_n() {
        let mut map = HashMap::new();
        map.insert("reservoir_size".to_string(), "400".to_string());
        let cfg = Config::from_map(&map).unwrap();
        assert_eq!(cfg.washout, 200);
    }
}
