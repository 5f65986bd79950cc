//! Reconstruction of complex CSI values from the words reported by the chip.
//!
//! The BCM4366c0 packs every subcarrier into a 32-bit word holding two
//! 11-bit mantissas with explicit sign bits and a shared 6-bit exponent:
//!
//! ```text
//!  31 30 | 29      | 28 ... 18 | 17      | 16 ... 6  | 5 ... 0
//!  unused| sign re | mantissa  | sign im | mantissa  | exponent
//! ```
//!
//! The BCM43455c0 (Raspberry Pi) reports two plain `i16`s instead.

use num_complex::Complex;
use num_traits::Zero;

const MAN_BITS: u32 = 11;
const EXP_BITS: u32 = 6;
const MAN_MASK: u32 = (1 << MAN_BITS) - 1;
const EXP_MASK: u32 = (1 << EXP_BITS) - 1;

/// Largest value a 6-bit two's complement exponent can hold.
const MAX_EXP: i32 = (1 << (EXP_BITS - 1)) - 1;

/// Exponents below this value shift every mantissa bit out.
const E_ZERO: i32 = -(MAN_BITS as i32) - 1;

/// Bit width the integer reconstruction normalizes the largest value to.
const NBITS: i32 = 10;

/// Decodes a raw 6-bit two's complement exponent.
///
/// ```
/// # use csi::unpack::decode_exponent;
/// assert_eq!(decode_exponent(31), 31);
/// assert_eq!(decode_exponent(32), -32);
/// assert_eq!(decode_exponent(63), -1);
/// ```
pub const fn decode_exponent(raw: u32) -> i32 {
    let exp = (raw & EXP_MASK) as i32;
    if exp > MAX_EXP {
        exp - (1 << EXP_BITS)
    } else {
        exp
    }
}

/// One subcarrier in the BCM4366c0 mini-float format, before the exponent
/// has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiniFloat {
    /// Signed real mantissa.
    pub real: i32,
    /// Signed imaginary mantissa.
    pub imag: i32,
    /// Exponent shared by both mantissas.
    pub exponent: i32,
}

impl MiniFloat {
    /// Splits a CSI word into its mantissas and exponent.
    pub const fn from_word(w: u32) -> Self {
        let mut real = ((w >> (EXP_BITS + MAN_BITS + 1)) & MAN_MASK) as i32;
        if w & (1 << (EXP_BITS + 2 * MAN_BITS + 1)) != 0 {
            real = -real;
        }

        let mut imag = ((w >> EXP_BITS) & MAN_MASK) as i32;
        if w & (1 << (EXP_BITS + MAN_BITS)) != 0 {
            imag = -imag;
        }

        Self {
            real,
            imag,
            exponent: decode_exponent(w),
        }
    }

    /// `mantissa * 2^exponent` for both parts.
    pub fn to_complex(self) -> Complex<f64> {
        let scale = 2f64.powi(self.exponent);
        Complex::new(f64::from(self.real) * scale, f64::from(self.imag) * scale)
    }

    /// Position of the highest set bit of `|real| | |imag|`, offset by the
    /// exponent.
    fn msb(&self) -> i32 {
        let x = self.real.unsigned_abs() | self.imag.unsigned_abs();
        // floor(log2(x)), and 0 for x == 0
        let width = x.checked_ilog2().unwrap_or(0) as i32;
        self.exponent + width
    }
}

/// Splits a BCM43455c0 word: the upper half is the real part, the lower
/// half the imaginary part.
pub const fn plain_from_word(w: u32) -> Complex<i16> {
    Complex {
        re: (w >> 16) as u16 as i16,
        im: w as u16 as i16,
    }
}

/// How mini-float values are turned into complex numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub enum Reconstruction {
    /// Each subcarrier is `mantissa * 2^exponent` on its own.
    #[default]
    Float,
    /// Integer approximation normalized over the whole packet, matching the
    /// output of the Nexmon MATLAB utilities.
    Integer,
}

impl Reconstruction {
    pub fn apply(self, elements: &[MiniFloat]) -> Vec<Complex<f64>> {
        match self {
            Self::Float => elements.iter().map(|e| e.to_complex()).collect(),
            Self::Integer => unpack_int(elements),
        }
    }
}

/// Largest effective bit width over a packet.
fn maxbit(elements: &[MiniFloat]) -> i32 {
    elements
        .iter()
        .map(MiniFloat::msb)
        .fold(-MAX_EXP - 1, i32::max)
}

/// Shifts the magnitude of `x` by `e` bits and reapplies its sign.
fn shift(x: i32, e: i32) -> i32 {
    let magnitude = x.unsigned_abs();
    let shifted = if e >= 0 {
        magnitude.checked_shl(e as u32).unwrap_or(0)
    } else {
        magnitude.checked_shr(e.unsigned_abs()).unwrap_or(0)
    };
    let shifted = shifted as i32;
    if x < 0 {
        -shifted
    } else {
        shifted
    }
}

/// Integer reconstruction: all subcarriers share one shift chosen so that
/// the largest value is `NBITS` wide.
pub fn unpack_int(elements: &[MiniFloat]) -> Vec<Complex<f64>> {
    let shft = NBITS - maxbit(elements);

    elements
        .iter()
        .map(|el| {
            let e = el.exponent + shft;
            if e < E_ZERO {
                return Complex::zero();
            }
            Complex::new(f64::from(shift(el.real, e)), f64::from(shift(el.imag, e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(sign_re: bool, re: u32, sign_im: bool, im: u32, exp: u32) -> u32 {
        (u32::from(sign_re) << 29) | (re << 18) | (u32::from(sign_im) << 17) | (im << 6) | exp
    }

    #[test]
    fn mini_float_fields() {
        let mf = MiniFloat::from_word(word(true, 0x7ff, false, 0x123, 0b111110));
        assert_eq!(mf.real, -0x7ff);
        assert_eq!(mf.imag, 0x123);
        assert_eq!(mf.exponent, -2);

        let mf = MiniFloat::from_word(word(false, 5, true, 9, 3));
        assert_eq!(
            mf,
            MiniFloat {
                real: 5,
                imag: -9,
                exponent: 3
            }
        );
    }

    #[test]
    fn exponent_boundaries() {
        assert_eq!(decode_exponent(0), 0);
        assert_eq!(decode_exponent(31), 31);
        assert_eq!(decode_exponent(32), -32);
        assert_eq!(decode_exponent(63), -1);
    }

    #[test]
    fn float_reconstruction() {
        let mf = MiniFloat {
            real: 3,
            imag: -5,
            exponent: -2,
        };
        assert_eq!(mf.to_complex(), Complex::new(0.75, -1.25));

        let mf = MiniFloat {
            real: 3,
            imag: 1,
            exponent: 4,
        };
        assert_eq!(mf.to_complex(), Complex::new(48., 16.));
    }

    #[test]
    fn plain_halves() {
        assert_eq!(plain_from_word(0xfffe_0003), Complex::new(-2, 3));
        assert_eq!(plain_from_word(0x7fff_8000), Complex::new(i16::MAX, i16::MIN));
    }

    #[test]
    fn int_normalizes_to_ten_bits() {
        let elements = [
            MiniFloat {
                real: 0b100,
                imag: 1,
                exponent: 0,
            },
            MiniFloat {
                real: -1,
                imag: 0,
                exponent: 0,
            },
        ];
        // maxbit = 2, shift = 8
        assert_eq!(maxbit(&elements), 2);
        assert_eq!(
            unpack_int(&elements),
            vec![Complex::new(1024., 256.), Complex::new(-256., 0.)]
        );
    }

    #[test]
    fn int_clamps_small_exponents() {
        let elements = [
            MiniFloat {
                real: 1,
                imag: 0,
                exponent: 20,
            },
            MiniFloat {
                real: 0x7ff,
                imag: -0x7ff,
                exponent: -5,
            },
        ];
        // maxbit = 20, shift = -10; second element: e = -15 < -12
        let csi = unpack_int(&elements);
        assert_eq!(csi[0], Complex::new(1024., 0.));
        assert_eq!(csi[1], Complex::zero());
    }

    #[test]
    fn int_right_shift_keeps_sign() {
        let elements = [
            MiniFloat {
                real: 0x7ff,
                imag: 0,
                exponent: 3,
            },
            MiniFloat {
                real: -0x7ff,
                imag: 0x400,
                exponent: 0,
            },
        ];
        // maxbit = 3 + 10 = 13, shift = -3
        let csi = unpack_int(&elements);
        assert_eq!(csi[0], Complex::new(0x7ff as f64, 0.));
        assert_eq!(csi[1], Complex::new(-(0x7ff >> 3) as f64, (0x400 >> 3) as f64));
    }

    #[test]
    fn int_is_deterministic() {
        let elements: Vec<_> = (0..256u32)
            .map(|i| MiniFloat::from_word(i.wrapping_mul(0x9e37_79b9)))
            .collect();
        let a = Reconstruction::Integer.apply(&elements);
        let b = Reconstruction::Integer.apply(&elements);
        assert_eq!(a, b);
    }
}
