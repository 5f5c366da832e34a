//! Bit-level float helpers: NaN discipline, conversion range checks, and
//! the float min/max/div rules the engine needs. Everything works on raw
//! representations so NaN payloads survive unchanged where they should.

pub mod f32b {
    pub const MAX: u32 = 0x7f7f_ffff;
    pub const INF: u32 = 0x7f80_0000;
    pub const NEG_MAX: u32 = 0xff7f_ffff;
    pub const NEG_INF: u32 = 0xff80_0000;
    pub const NEG_ONE: u32 = 0xbf80_0000;
    pub const NEG_ZERO: u32 = 0x8000_0000;
    pub const QUIET_NAN: u32 = 0x7fc0_0000;
    pub const QUIET_NEG_NAN: u32 = 0xffc0_0000;
    pub const QUIET_NAN_BIT: u32 = 0x0040_0000;
    pub const SIG_BITS: u32 = 23;
    pub const SIG_MASK: u32 = 0x007f_ffff;
    pub const SIGN_MASK: u32 = 0x8000_0000;

    pub fn is_nan(bits: u32) -> bool {
        (bits > INF && bits < NEG_ZERO) || bits > NEG_INF
    }

    pub fn is_zero(bits: u32) -> bool {
        bits == 0 || bits == NEG_ZERO
    }

    pub fn is_canonical_nan(bits: u32) -> bool {
        bits == QUIET_NAN || bits == QUIET_NEG_NAN
    }

    pub fn is_arithmetic_nan(bits: u32) -> bool {
        bits & QUIET_NAN == QUIET_NAN
    }

    /// Set the quiet bit when the result of an operation is a NaN.
    pub fn quieten(bits: u32) -> u32 {
        if is_nan(bits) {
            bits | QUIET_NAN_BIT
        } else {
            bits
        }
    }
}

pub mod f64b {
    pub const INF: u64 = 0x7ff0_0000_0000_0000;
    pub const NEG_INF: u64 = 0xfff0_0000_0000_0000;
    pub const NEG_ONE: u64 = 0xbff0_0000_0000_0000;
    pub const NEG_ZERO: u64 = 0x8000_0000_0000_0000;
    pub const QUIET_NAN: u64 = 0x7ff8_0000_0000_0000;
    pub const QUIET_NEG_NAN: u64 = 0xfff8_0000_0000_0000;
    pub const QUIET_NAN_BIT: u64 = 0x0008_0000_0000_0000;
    pub const SIG_BITS: u32 = 52;
    pub const SIGN_MASK: u64 = 0x8000_0000_0000_0000;

    pub fn is_nan(bits: u64) -> bool {
        (bits > INF && bits < NEG_ZERO) || bits > NEG_INF
    }

    pub fn is_zero(bits: u64) -> bool {
        bits == 0 || bits == NEG_ZERO
    }

    pub fn is_canonical_nan(bits: u64) -> bool {
        bits == QUIET_NAN || bits == QUIET_NEG_NAN
    }

    pub fn is_arithmetic_nan(bits: u64) -> bool {
        bits & QUIET_NAN == QUIET_NAN
    }

    pub fn quieten(bits: u64) -> u64 {
        if is_nan(bits) {
            bits | QUIET_NAN_BIT
        } else {
            bits
        }
    }
}

// Truncation range checks, expressed on the representations. The boundary
// constants are the last float below/at the limit of each integer type.

pub fn in_range_i32_f32(bits: u32) -> bool {
    bits < 0x4f00_0000 || (bits >= f32b::NEG_ZERO && bits <= 0xcf00_0000)
}

pub fn in_range_i64_f32(bits: u32) -> bool {
    bits < 0x5f00_0000 || (bits >= f32b::NEG_ZERO && bits <= 0xdf00_0000)
}

pub fn in_range_u32_f32(bits: u32) -> bool {
    bits < 0x4f80_0000 || (bits >= f32b::NEG_ZERO && bits < f32b::NEG_ONE)
}

pub fn in_range_u64_f32(bits: u32) -> bool {
    bits < 0x5f80_0000 || (bits >= f32b::NEG_ZERO && bits < f32b::NEG_ONE)
}

pub fn in_range_i32_f64(bits: u64) -> bool {
    bits <= 0x41df_ffff_ffc0_0000 || (bits >= f64b::NEG_ZERO && bits <= 0xc1e0_0000_0000_0000)
}

pub fn in_range_i64_f64(bits: u64) -> bool {
    bits < 0x43e0_0000_0000_0000 || (bits >= f64b::NEG_ZERO && bits <= 0xc3e0_0000_0000_0000)
}

pub fn in_range_u32_f64(bits: u64) -> bool {
    bits <= 0x41ef_ffff_ffe0_0000 || (bits >= f64b::NEG_ZERO && bits < f64b::NEG_ONE)
}

pub fn in_range_u64_f64(bits: u64) -> bool {
    bits < 0x43f0_0000_0000_0000 || (bits >= f64b::NEG_ZERO && bits < f64b::NEG_ONE)
}

pub fn in_range_f32_f64(bits: u64) -> bool {
    bits <= 0x47ef_ffff_e000_0000 || (bits >= f64b::NEG_ZERO && bits <= 0xc7ef_ffff_e000_0000)
}

// The rounding mode of the format means doubles just above ±F32_MAX still
// round to ±F32_MAX on demote rather than overflowing to infinity.

pub fn demote_rounds_to_f32_max(bits: u64) -> bool {
    bits > 0x47ef_ffff_e000_0000 && bits < 0x47ef_ffff_f000_0000
}

pub fn demote_rounds_to_neg_f32_max(bits: u64) -> bool {
    bits > 0xc7ef_ffff_e000_0000 && bits < 0xc7ef_ffff_f000_0000
}

pub fn demote(bits: u64) -> u32 {
    if in_range_f32_f64(bits) {
        (f64::from_bits(bits) as f32).to_bits()
    } else if demote_rounds_to_f32_max(bits) {
        f32b::MAX
    } else if demote_rounds_to_neg_f32_max(bits) {
        f32b::NEG_MAX
    } else {
        let sign = ((bits >> 32) as u32) & f32b::SIGN_MASK;
        let mut tag = 0;
        if f64b::is_nan(bits) {
            tag = f32b::QUIET_NAN_BIT
                | (((bits >> (f64b::SIG_BITS - f32b::SIG_BITS)) as u32) & f32b::SIG_MASK);
        }
        sign | f32b::INF | tag
    }
}

/// f32 division by the representation rules: quiet NaN propagation and
/// correctly signed infinities for division by zero.
pub fn div_f32(lhs: u32, rhs: u32) -> u32 {
    if f32b::is_zero(rhs) {
        if f32b::is_nan(lhs) {
            lhs | f32b::QUIET_NAN
        } else if f32b::is_zero(lhs) {
            f32b::QUIET_NAN
        } else {
            ((lhs & f32b::SIGN_MASK) ^ (rhs & f32b::SIGN_MASK)) | f32b::INF
        }
    } else {
        f32b::quieten((f32::from_bits(lhs) / f32::from_bits(rhs)).to_bits())
    }
}

pub fn div_f64(lhs: u64, rhs: u64) -> u64 {
    if f64b::is_zero(rhs) {
        if f64b::is_nan(lhs) {
            lhs | f64b::QUIET_NAN
        } else if f64b::is_zero(lhs) {
            f64b::QUIET_NAN
        } else {
            ((lhs & f64b::SIGN_MASK) ^ (rhs & f64b::SIGN_MASK)) | f64b::INF
        }
    } else {
        f64b::quieten((f64::from_bits(lhs) / f64::from_bits(rhs)).to_bits())
    }
}

/// min(0, -0) is -0: for two zeros the representation with the sign bit
/// compares larger, so take the unsigned max.
pub fn min_f32(lhs: u32, rhs: u32) -> u32 {
    if f32b::is_nan(lhs) {
        lhs | f32b::QUIET_NAN_BIT
    } else if f32b::is_nan(rhs) {
        rhs | f32b::QUIET_NAN_BIT
    } else if f32b::is_zero(lhs) && f32b::is_zero(rhs) {
        lhs.max(rhs)
    } else {
        f32::from_bits(lhs).min(f32::from_bits(rhs)).to_bits()
    }
}

pub fn max_f32(lhs: u32, rhs: u32) -> u32 {
    if f32b::is_nan(lhs) {
        lhs | f32b::QUIET_NAN_BIT
    } else if f32b::is_nan(rhs) {
        rhs | f32b::QUIET_NAN_BIT
    } else if f32b::is_zero(lhs) && f32b::is_zero(rhs) {
        lhs.min(rhs)
    } else {
        f32::from_bits(lhs).max(f32::from_bits(rhs)).to_bits()
    }
}

pub fn min_f64(lhs: u64, rhs: u64) -> u64 {
    if f64b::is_nan(lhs) {
        lhs | f64b::QUIET_NAN_BIT
    } else if f64b::is_nan(rhs) {
        rhs | f64b::QUIET_NAN_BIT
    } else if f64b::is_zero(lhs) && f64b::is_zero(rhs) {
        lhs.max(rhs)
    } else {
        f64::from_bits(lhs).min(f64::from_bits(rhs)).to_bits()
    }
}

pub fn max_f64(lhs: u64, rhs: u64) -> u64 {
    if f64b::is_nan(lhs) {
        lhs | f64b::QUIET_NAN_BIT
    } else if f64b::is_nan(rhs) {
        rhs | f64b::QUIET_NAN_BIT
    } else if f64b::is_zero(lhs) && f64b::is_zero(rhs) {
        lhs.min(rhs)
    } else {
        f64::from_bits(lhs).max(f64::from_bits(rhs)).to_bits()
    }
}

/// Round half to even, like `nearbyint` under the default mode.
pub fn nearest_f32(bits: u32) -> u32 {
    let v = f32::from_bits(bits);
    if v.is_nan() {
        return f32b::quieten(bits);
    }
    if v.is_infinite() || v == 0.0 {
        return bits;
    }
    let rounded = v.round();
    let result = if (rounded - v).abs() == 0.5 && rounded % 2.0 != 0.0 {
        rounded - v.signum()
    } else {
        rounded
    };
    // Keep the sign for results that round to zero.
    if result == 0.0 {
        return (bits & f32b::SIGN_MASK) | result.to_bits();
    }
    result.to_bits()
}

pub fn nearest_f64(bits: u64) -> u64 {
    let v = f64::from_bits(bits);
    if v.is_nan() {
        return f64b::quieten(bits);
    }
    if v.is_infinite() || v == 0.0 {
        return bits;
    }
    let rounded = v.round();
    let result = if (rounded - v).abs() == 0.5 && rounded % 2.0 != 0.0 {
        rounded - v.signum()
    } else {
        rounded
    };
    if result == 0.0 {
        return (bits & f64b::SIGN_MASK) | result.to_bits();
    }
    result.to_bits()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_predicates() {
        assert!(f32b::is_nan(f32::NAN.to_bits()));
        assert!(!f32b::is_nan(f32::INFINITY.to_bits()));
        assert!(f32b::is_canonical_nan(f32b::QUIET_NAN));
        assert!(f32b::is_arithmetic_nan(f32b::QUIET_NAN | 1));
        assert!(!f32b::is_arithmetic_nan(0x7f80_0001));
        assert!(f64b::is_nan(f64::NAN.to_bits()));
    }

    #[test]
    fn signed_zero_min_max() {
        let pz = 0.0f32.to_bits();
        let nz = (-0.0f32).to_bits();
        assert_eq!(min_f32(pz, nz), nz);
        assert_eq!(min_f32(nz, pz), nz);
        assert_eq!(max_f32(pz, nz), pz);
        assert_eq!(max_f64(0.0f64.to_bits(), (-0.0f64).to_bits()), 0.0f64.to_bits());
    }

    #[test]
    fn division_by_zero() {
        assert_eq!(div_f32(1.0f32.to_bits(), 0.0f32.to_bits()), f32b::INF);
        assert_eq!(div_f32((-1.0f32).to_bits(), 0.0f32.to_bits()), f32b::NEG_INF);
        assert_eq!(div_f32(0.0f32.to_bits(), 0.0f32.to_bits()), f32b::QUIET_NAN);
        assert_eq!(div_f64(1.0f64.to_bits(), (-0.0f64).to_bits()), f64b::NEG_INF);
    }

    #[test]
    fn truncation_ranges() {
        assert!(in_range_i32_f32((-1.9f32).to_bits()));
        assert!(!in_range_i32_f32(2147483648.0f32.to_bits()));
        assert!(in_range_i32_f64(2147483647.0f64.to_bits()));
        assert!(!in_range_i32_f64(2147483648.0f64.to_bits()));
        assert!(in_range_u32_f64(4294967295.0f64.to_bits()));
        assert!(!in_range_u32_f64((-1.0f64).to_bits()));
        // -0.9 truncates to 0, which is in range for unsigned targets.
        assert!(in_range_u32_f64((-0.9f64).to_bits()));
    }

    #[test]
    fn demote_window() {
        let max64 = f32::MAX as f64;
        assert_eq!(demote(max64.to_bits()), f32::MAX.to_bits());
        // Just above F32_MAX but inside the rounding window.
        assert_eq!(demote(0x47ef_ffff_e800_0000), f32b::MAX);
        assert_eq!(demote(f64::INFINITY.to_bits()), f32b::INF);
        assert_eq!(demote(f64::NEG_INFINITY.to_bits()), f32b::NEG_INF);
        let quiet = demote(f64::NAN.to_bits());
        assert!(f32b::is_arithmetic_nan(quiet));
    }

    #[test]
    fn nearest_ties_to_even() {
        assert_eq!(f32::from_bits(nearest_f32(2.5f32.to_bits())), 2.0);
        assert_eq!(f32::from_bits(nearest_f32(3.5f32.to_bits())), 4.0);
        assert_eq!(f32::from_bits(nearest_f32((-2.5f32).to_bits())), -2.0);
        assert_eq!(f64::from_bits(nearest_f64(0.5f64.to_bits())), 0.0);
        assert_eq!(nearest_f64((-0.4f64).to_bits()), (-0.0f64).to_bits());
    }
}
