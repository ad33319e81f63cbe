//! Read-out quantizer and 1-bit peer-sync wire codec (C4).
//!
//! Quantization is a pure function of a real matrix; the wire codec is a
//! pure function over byte strings (spec §4.4 "all I/O lives in external
//! collaborators"). Neither touches a reservoir directly except
//! `absorb_sync_packet`'s single permitted `W_out` merge.

use crate::error::CoreError;
use crate::reservoir::ReservoirCore;

const MAGIC: [u8; 3] = *b"EON";
const HEADER_LEN: usize = 14;

/// Quantized representation of a read-out matrix.
#[derive(Debug, Clone, PartialEq)]
pub enum Quantized {
    /// 8-bit linear: scale `s = max(|M|)/127`, values clipped to [-128, 127].
    Int8 { scale: f32, values: Vec<i8> },
    /// 4-bit linear: scale `s = max(|M|)/7`, values clipped to [-8, 7].
    Int4 { scale: f32, values: Vec<i8> },
    /// 1-bit sign plus a single scalar magnitude `m = mean(|M|)`.
    Bit1 { magnitude: f32, signs: Vec<bool> },
}

/// Linear 8-bit quantization (spec §4.4 "int8 linear").
pub fn quantize_int8(m: &[f32]) -> Quantized {
    let scale = (max_abs(m) / 127.0).max(f32::MIN_POSITIVE);
    let values = m
        .iter()
        .map(|&v| ((v / scale).round().clamp(-128.0, 127.0)) as i8)
        .collect();
    Quantized::Int8 { scale, values }
}

/// Linear 4-bit quantization (spec §4.4 "int4 linear").
pub fn quantize_int4(m: &[f32]) -> Quantized {
    let scale = (max_abs(m) / 7.0).max(f32::MIN_POSITIVE);
    let values = m
        .iter()
        .map(|&v| ((v / scale).round().clamp(-8.0, 7.0)) as i8)
        .collect();
    Quantized::Int4 { scale, values }
}

/// 1-bit sign quantization (spec §4.4 "1-bit sign").
pub fn quantize_bit1(m: &[f32]) -> Quantized {
    let magnitude = if m.is_empty() {
        0.0
    } else {
        m.iter().map(|v| v.abs()).sum::<f32>() / m.len() as f32
    };
    let signs = m.iter().map(|&v| v > 0.0).collect();
    Quantized::Bit1 { magnitude, signs }
}

/// Expand a quantized matrix back to real values.
pub fn dequantize(q: &Quantized) -> Vec<f32> {
    match q {
        Quantized::Int8 { scale, values } => values.iter().map(|&v| v as f32 * scale).collect(),
        Quantized::Int4 { scale, values } => values.iter().map(|&v| v as f32 * scale).collect(),
        Quantized::Bit1 { magnitude, signs } => signs
            .iter()
            .map(|&s| if s { *magnitude } else { -*magnitude })
            .collect(),
    }
}

fn max_abs(m: &[f32]) -> f32 {
    m.iter().fold(0.0f32, |acc, v| acc.max(v.abs()))
}

/// Peer-sync wire packet type (spec §6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Sync = 1,
    Req = 2,
    Ack = 3,
    Ping = 4,
    Status = 5,
}

impl PacketType {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Sync),
            2 => Some(Self::Req),
            3 => Some(Self::Ack),
            4 => Some(Self::Ping),
            5 => Some(Self::Status),
            _ => None,
        }
    }
}

/// A decoded peer-sync packet.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncPacket {
    /// Packet type.
    pub packet_type: PacketType,
    /// Construction seed of the sending core; no identity check is applied
    /// before merge (spec §4.4 "merge with a remote of differing seed is
    /// permitted").
    pub sender_seed: u32,
    /// Weight count K.
    pub weight_count: u16,
    /// Scalar magnitude m.
    pub scale: f32,
    /// Sign bits, one per weight, MSB-first within each byte.
    pub signs: Vec<bool>,
}

/// Build a SYNC packet from a 1-bit-quantized read-out and a sender seed.
pub fn build_sync_packet(sender_seed: u32, q: &Quantized) -> Result<Vec<u8>, CoreError> {
    let Quantized::Bit1 { magnitude, signs } = q else {
        return Err(CoreError::CodecError(
            "sync packets only carry 1-bit quantized read-outs".to_string(),
        ));
    };
    if signs.len() > u16::MAX as usize {
        return Err(CoreError::CodecError(format!(
            "weight count {} exceeds u16 range",
            signs.len()
        )));
    }

    let k = signs.len() as u16;
    let payload_len = k.div_ceil(8) as usize;
    let mut out = Vec::with_capacity(HEADER_LEN + payload_len);
    out.extend_from_slice(&MAGIC);
    out.push(PacketType::Sync as u8);
    out.extend_from_slice(&sender_seed.to_be_bytes());
    out.extend_from_slice(&k.to_be_bytes());
    out.extend_from_slice(&magnitude.to_be_bytes());

    let mut payload = vec![0u8; payload_len];
    for (i, &sign) in signs.iter().enumerate() {
        if sign {
            payload[i / 8] |= 0x80 >> (i % 8);
        }
    }
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Export the current read-out of `reservoir` as a SYNC packet.
pub fn export_sync_packet(
    reservoir: &dyn ReservoirCore,
    sender_seed: u32,
) -> Result<Vec<u8>, CoreError> {
    let w_out = reservoir.output_weights();
    let q = quantize_bit1(&w_out);
    build_sync_packet(sender_seed, &q)
}

/// Decode a wire packet without applying it to any reservoir. Useful for
/// inspecting REQ/ACK/PING/STATUS packets, which carry no weight payload.
pub fn decode_packet(receiver_reservoir_size: usize, bytes: &[u8]) -> Result<SyncPacket, CoreError> {
    if bytes.len() < 4 || bytes[0..3] != MAGIC {
        return Err(CoreError::CodecError(
            "bad magic: expected 'EON'".to_string(),
        ));
    }
    let packet_type = PacketType::from_u8(bytes[3])
        .ok_or_else(|| CoreError::CodecError(format!("unknown packet type byte {}", bytes[3])))?;

    if packet_type != PacketType::Sync {
        // Non-SYNC packets carry no weight payload in this profile; only
        // magic and type are meaningful.
        return Ok(SyncPacket {
            packet_type,
            sender_seed: 0,
            weight_count: 0,
            scale: 0.0,
            signs: Vec::new(),
        });
    }

    if bytes.len() < HEADER_LEN {
        return Err(CoreError::CodecError(
            "truncated header: need at least 14 bytes".to_string(),
        ));
    }
    let sender_seed = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
    let weight_count = u16::from_be_bytes(bytes[8..10].try_into().unwrap());
    if weight_count as usize > receiver_reservoir_size {
        return Err(CoreError::CodecError(format!(
            "weight count {weight_count} exceeds receiver reservoir size {receiver_reservoir_size}"
        )));
    }
    let scale = f32::from_be_bytes(bytes[10..14].try_into().unwrap());

    let payload_len = (weight_count as usize).div_ceil(8);
    if bytes.len() != HEADER_LEN + payload_len {
        return Err(CoreError::CodecError(format!(
            "bad total length: expected {}, got {}",
            HEADER_LEN + payload_len,
            bytes.len()
        )));
    }

    let payload = &bytes[HEADER_LEN..];
    let mut signs = Vec::with_capacity(weight_count as usize);
    for i in 0..weight_count as usize {
        let byte = payload[i / 8];
        let bit = (byte >> (7 - (i % 8))) & 1;
        signs.push(bit == 1);
    }

    Ok(SyncPacket {
        packet_type,
        sender_seed,
        weight_count,
        scale,
        signs,
    })
}

/// Decode a SYNC packet and merge it into `reservoir`'s read-out:
/// `W_out <- (W_out + W_out_remote) / 2`, elementwise (spec §4.4 "the only
/// mutation of W_out that C4 may perform"). Malformed packets are rejected
/// without mutating `reservoir`.
pub fn absorb_sync_packet(reservoir: &mut dyn ReservoirCore, bytes: &[u8]) -> Result<(), CoreError> {
    let packet = decode_packet(reservoir.reservoir_size(), bytes)?;
    if packet.packet_type != PacketType::Sync {
        return Ok(());
    }

    let n = reservoir.reservoir_size();
    let o = reservoir.output_size();
    if packet.weight_count as usize != o * n {
        return Err(CoreError::CodecError(format!(
            "weight count {} does not match read-out shape {o}x{n}",
            packet.weight_count
        )));
    }

    let remote = dequantize(&Quantized::Bit1 {
        magnitude: packet.scale,
        signs: packet.signs,
    });
    let mut merged = reservoir.output_weights();
    for (local, remote) in merged.iter_mut().zip(remote.iter()) {
        *local = (*local + *remote) / 2.0;
    }
    reservoir.set_output_weights(&merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::reservoir::Reservoir;

    #[test]
    fn int8_round_trip_is_idempotent_on_requantize() {
        let m = vec![0.5, -0.25, 1.0, -1.0, 0.0];
        let q = quantize_int8(&m);
        let restored = dequantize(&q);
        let q2 = quantize_int8(&restored);
        assert_eq!(q, q2);
    }

    #[test]
    fn int4_round_trip_is_idempotent_on_requantize() {
        let m = vec![0.5, -0.25, 1.0, -1.0, 0.0];
        let q = quantize_int4(&m);
        let restored = dequantize(&q);
        let q2 = quantize_int4(&restored);
        assert_eq!(q, q2);
    }

    #[test]
    fn bit1_idempotence_holds_only_on_sign() {
        let m = vec![0.5, -0.25, 1.0, -1.0];
        let q = quantize_bit1(&m);
        let restored = dequantize(&q);
        let q2 = quantize_bit1(&restored);
        match (&q, &q2) {
            (Quantized::Bit1 { signs: a, .. }, Quantized::Bit1 { signs: b, .. }) => {
                assert_eq!(a, b);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn sync_packet_round_trips_through_wire_bytes() {
        let m = vec![0.5, -0.25, 1.0, -1.0, 0.3, 0.0, -0.9];
        let q = quantize_bit1(&m);
        let bytes = build_sync_packet(7, &q).unwrap();

        assert_eq!(
            bytes.len(),
            14 + (m.len() as f64 / 8.0).ceil() as usize
        );
        let decoded = decode_packet(100, &bytes).unwrap();
        assert_eq!(decoded.packet_type, PacketType::Sync);
        assert_eq!(decoded.sender_seed, 7);
        assert_eq!(decoded.weight_count as usize, m.len());
        let Quantized::Bit1 { signs, .. } = &q else {
            unreachable!()
        };
        assert_eq!(&decoded.signs, signs);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let bytes = vec![b'X', b'O', b'N', 1, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0];
        let err = decode_packet(10, &bytes).unwrap_err();
        assert!(matches!(err, CoreError::CodecError(_)));
    }

    #[test]
    fn weight_count_exceeding_receiver_size_is_rejected() {
        let m = vec![0.1; 20];
        let q = quantize_bit1(&m);
        let bytes = build_sync_packet(1, &q).unwrap();
        let err = decode_packet(10, &bytes).unwrap_err();
        assert!(matches!(err, CoreError::CodecError(_)));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let m = vec![0.1; 20];
        let q = quantize_bit1(&m);
        let mut bytes = build_sync_packet(1, &q).unwrap();
        bytes.pop();
        let err = decode_packet(100, &bytes).unwrap_err();
        assert!(matches!(err, CoreError::CodecError(_)));
    }

    #[test]
    fn absorb_averages_into_existing_output_weights() {
        let cfg = Config {
            reservoir_size: 4,
            input_size: 1,
            output_size: 1,
            ..Config::default()
        };
        let mut r = Reservoir::new(&cfg, 1).unwrap();
        r.set_output_weights(&[1.0, 1.0, 1.0, 1.0]).unwrap();

        let remote = vec![-1.0, -1.0, -1.0, -1.0];
        let q = quantize_bit1(&remote);
        let bytes = build_sync_packet(99, &q).unwrap();

        absorb_sync_packet(&mut r, &bytes).unwrap();
        // local=1.0, remote sign expands to -magnitude=-1.0 -> mean 0.0.
        assert!(r.output_weights().iter().all(|&v| v.abs() < 1e-6));
    }

    #[test]
    fn absorb_rejects_mismatched_weight_count_without_mutating() {
        let cfg = Config {
            reservoir_size: 4,
            input_size: 1,
            output_size: 1,
            ..Config::default()
        };
        let mut r = Reservoir::new(&cfg, 1).unwrap();
        r.set_output_weights(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        let before = r.output_weights();

        let remote = vec![0.1; 2];
        let q = quantize_bit1(&remote);
        let bytes = build_sync_packet(1, &q).unwrap();

        let err = absorb_sync_packet(&mut r, &bytes).unwrap_err();
        assert!(matches!(err, CoreError::CodecError(_)));
        assert_eq!(r.output_weights(), before);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        // Invariant 9 (codec rejection): any byte string not opening with
        // the 'EON' magic is rejected with CODEC_ERROR, never panics.
        #[test]
        fn non_magic_bytes_are_always_rejected(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
            let opens_with_magic = bytes.len() >= 3 && bytes[0..3] == MAGIC;
            let result = decode_packet(4096, &bytes);
            if !opens_with_magic {
                prop_assert!(matches!(result, Err(CoreError::CodecError(_))));
            }
        }

        // Invariant 8 (packet round-trip): a SYNC packet built from a 1-bit
        // quantized matrix decodes back to the exact same sign bits and
        // scale, for any weight count in range.
        #[test]
        fn sync_packet_preserves_signs_and_scale(
            weights in prop::collection::vec(-4.0f32..4.0, 1..512),
        ) {
            let q = quantize_bit1(&weights);
            let bytes = build_sync_packet(7, &q).unwrap();
            let decoded = decode_packet(weights.len() * 2 + 8, &bytes).unwrap();
            let Quantized::Bit1 { magnitude, signs } = &q else {
                unreachable!()
            };
            prop_assert_eq!(&decoded.signs, signs);
            prop_assert_eq!(decoded.scale, *magnitude);
            prop_assert_eq!(decoded.weight_count as usize, weights.len());
        }

        // int8/int4 quantization is idempotent once requantized from its
        // own dequantized output, for any real-valued matrix.
        #[test]
        fn int8_requantize_is_idempotent(m in prop::collection::vec(-10.0f32..10.0, 0..64)) {
            let q = quantize_int8(&m);
            let q2 = quantize_int8(&dequantize(&q));
            prop_assert_eq!(q, q2);
        }

        #[test]
        fn int4_requantize_is_idempotent(m in prop::collection::vec(-10.0f32..10.0, 0..64)) {
            let q = quantize_int4(&m);
            let q2 = quantize_int4(&dequantize(&q));
            prop_assert_eq!(q, q2);
        }
    }
}
