//! Birth certificate (spec §3): the immutable 40-byte construction-time
//! identity of a core.

use crate::config::Config;

const BIRTH_HASH_LEN: usize = 16;

/// Immutable construction-time identity of a core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BirthCertificate {
    /// Unix seconds at construction time.
    pub birth_time: u64,
    /// Construction seed.
    pub seed: u32,
    /// Reservoir size at construction.
    pub reservoir_size: u16,
    /// Birth certificate layout version (major << 8 | minor).
    pub version: u16,
    /// First 16 bytes of blake3(seed_be ‖ birth_time_secs_be).
    pub birth_hash: [u8; BIRTH_HASH_LEN],
    /// Input dimension at construction.
    pub input_size: u16,
    /// Output dimension at construction.
    pub output_size: u16,
    /// Packed configuration flags (bit 0: fixed_point).
    pub config_flags: u32,
}

const CURRENT_VERSION: u16 = 0x0100;

impl BirthCertificate {
    /// Compute the birth certificate for a config, seed, and birth time.
    pub fn new(config: &Config, seed: u32, birth_time: u64) -> Self {
        let birth_hash = compute_birth_hash(seed, birth_time);
        let config_flags = if config.fixed_point { 1 } else { 0 };

        Self {
            birth_time,
            seed,
            reservoir_size: config.reservoir_size as u16,
            version: CURRENT_VERSION,
            birth_hash,
            input_size: config.input_size as u16,
            output_size: config.output_size as u16,
            config_flags,
        }
    }

    /// Serialize to the fixed 40-byte little-endian record used by the
    /// snapshot format (spec §6.2).
    pub fn to_bytes(&self) -> [u8; 40] {
        let mut buf = [0u8; 40];
        buf[0..8].copy_from_slice(&self.birth_time.to_le_bytes());
        buf[8..12].copy_from_slice(&self.seed.to_le_bytes());
        buf[12..14].copy_from_slice(&self.reservoir_size.to_le_bytes());
        buf[14..16].copy_from_slice(&self.version.to_le_bytes());
        buf[16..32].copy_from_slice(&self.birth_hash);
        buf[32..34].copy_from_slice(&self.input_size.to_le_bytes());
        buf[34..36].copy_from_slice(&self.output_size.to_le_bytes());
        buf[36..40].copy_from_slice(&self.config_flags.to_le_bytes());
        buf
    }

    /// Parse a 40-byte record produced by `to_bytes`.
    pub fn from_bytes(buf: &[u8; 40]) -> Self {
        let birth_time = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let seed = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let reservoir_size = u16::from_le_bytes(buf[12..14].try_into().unwrap());
        let version = u16::from_le_bytes(buf[14..16].try_into().unwrap());
        let mut birth_hash = [0u8; BIRTH_HASH_LEN];
        birth_hash.copy_from_slice(&buf[16..32]);
        let input_size = u16::from_le_bytes(buf[32..34].try_into().unwrap());
        let output_size = u16::from_le_bytes(buf[34..36].try_into().unwrap());
        let config_flags = u32::from_le_bytes(buf[36..40].try_into().unwrap());

        Self {
            birth_time,
            seed,
            reservoir_size,
            version,
            birth_hash,
            input_size,
            output_size,
            config_flags,
        }
    }
}

/// Deterministic hash over `(seed ‖ birth_time_seconds)`, truncated to 16
/// bytes. Two birth hashes are compared for identity via byte equality.
fn compute_birth_hash(seed: u32, birth_time: u64) -> [u8; BIRTH_HASH_LEN] {
    let mut input = Vec::with_capacity(12);
    input.extend_from_slice(&seed.to_be_bytes());
    input.extend_from_slice(&birth_time.to_be_bytes());
    let digest = blake3::hash(&input);
    let mut out = [0u8; BIRTH_HASH_LEN];
    out.copy_from_slice(&digest.as_bytes()[..BIRTH_HASH_LEN]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> Config {
        Config {
            reservoir_size: 64,
            input_size: 1,
            output_size: 1,
            ..Config::default()
        }
    }

    #[test]
    fn same_seed_same_config_same_hash_regardless_of_time() {
        let a = BirthCertificate::new(&cfg(), 42, 1_000);
        let b = BirthCertificate::new(&cfg(), 42, 2_000);
        // birth_hash depends on birth_time per spec, so different times
        // differ; same seed+time must match exactly (S2).
        let c = BirthCertificate::new(&cfg(), 42, 1_000);
        assert_eq!(a.birth_hash, c.birth_hash);
        assert_ne!(a.birth_hash, b.birth_hash);
    }

    #[test]
    fn different_seed_differs_in_at_least_one_byte() {
        let a = BirthCertificate::new(&cfg(), 42, 1_000);
        let b = BirthCertificate::new(&cfg(), 43, 1_000);
        assert_ne!(a.birth_hash, b.birth_hash);
    }

    #[test]
    fn round_trip_bytes() {
        let cert = BirthCertificate::new(&cfg(), 42, 123_456_789);
        let bytes = cert.to_bytes();
        let restored = BirthCertificate::from_bytes(&bytes);
        assert_eq!(cert, restored);
    }
}
