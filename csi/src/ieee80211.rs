//! IEEE 802.11 definitions.
//!
//! References:
//! - [802.11ac: A Survival Guide](https://www.oreilly.com/library/view/80211ac-a-survival/9781449357702/ch02.html)
//! - [List of WLAN channels (Wikipedia)](https://en.wikipedia.org/wiki/List_of_WLAN_channels#5_GHz_(802.11a/h/n/ac/ax))

use std::str::FromStr;

use num_complex::Complex;
use num_traits::Zero;

use crate::error::Error;

/// Bandwidth.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub enum Bandwidth {
    /// 20 MHz.
    Bw20,
    /// 40 MHz.
    Bw40,
    /// 80 MHz.
    Bw80,
}

impl Bandwidth {
    /// Returns the bandwidth in MHz.
    pub const fn mhz(&self) -> u8 {
        match self {
            Bandwidth::Bw20 => 20,
            Bandwidth::Bw40 => 40,
            Bandwidth::Bw80 => 80,
        }
    }

    /// Returns the number of subcarriers rounded up to the nearest power of 2.
    ///
    /// Note that this is not the same as the number of _usable_ subcarriers.
    pub const fn nsub_pow2(&self) -> usize {
        match self {
            Bandwidth::Bw20 => 64,
            Bandwidth::Bw40 => 128,
            Bandwidth::Bw80 => 256,
        }
    }

    /// Inverse of [`Bandwidth::nsub_pow2`].
    pub const fn from_nsub(nsub: usize) -> Option<Self> {
        match nsub {
            64 => Some(Bandwidth::Bw20),
            128 => Some(Bandwidth::Bw40),
            256 => Some(Bandwidth::Bw80),
            _ => None,
        }
    }
}

/// PHY standard the CSI was captured under.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub enum Standard {
    /// 802.11ac (VHT).
    #[default]
    Ac,
    /// 802.11ax (HE).
    Ax,
}

impl FromStr for Standard {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ac" | "11ac" => Ok(Self::Ac),
            "ax" | "11ax" => Ok(Self::Ax),
            _ => Err(Error::UnknownStandard(s.to_owned())),
        }
    }
}

// Indices below are positions in the unwrapped (post-rotation) vector, i.e.
// subcarrier `k` sits at `k + nsub / 2`.
//
// | PHY standard    | Null subcarriers                 | Pilot subcarriers   |
// |-----------------|----------------------------------|---------------------|
// | 802.11ac 20 MHz | -32 to -29, 0, +29 to +31        | ±7, ±21             |
// | 802.11ac 40 MHz | -64 to -59, -1 to +1, +59 to +63 | ±11, ±25, ±53       |
// | 802.11ac 80 MHz | -128 to -123, -1 to +1, +123..   | ±11, ±39, ±75, ±103 |
//
// HE-LTF estimates the pilot tones as well, so 802.11ax only zeroes the guard
// and DC bins.

#[rustfmt::skip]
static AC_20: [usize; 12] = [
    0, 1, 2, 3,
    11, 25,
    32,
    39, 53,
    61, 62, 63,
];

#[rustfmt::skip]
static AC_40: [usize; 20] = [
    0, 1, 2, 3, 4, 5,
    11, 39, 53,
    63, 64, 65,
    75, 89, 117,
    123, 124, 125, 126, 127,
];

#[rustfmt::skip]
static AC_80: [usize; 22] = [
    0, 1, 2, 3, 4, 5,
    25, 53, 89, 117,
    127, 128, 129,
    139, 167, 203, 231,
    251, 252, 253, 254, 255,
];

#[rustfmt::skip]
static AX_20: [usize; 8] = [
    0, 1, 2, 3,
    32,
    61, 62, 63,
];

#[rustfmt::skip]
static AX_40: [usize; 14] = [
    0, 1, 2, 3, 4, 5,
    63, 64, 65,
    123, 124, 125, 126, 127,
];

#[rustfmt::skip]
static AX_80: [usize; 14] = [
    0, 1, 2, 3, 4, 5,
    127, 128, 129,
    251, 252, 253, 254, 255,
];

/// Subcarriers (guard band, DC and pilots) that carry no channel estimate.
///
/// ```
/// # use csi::ieee80211::{zero_subcarriers, Bandwidth, Standard};
/// assert_eq!(zero_subcarriers(Standard::Ac, Bandwidth::Bw20).len(), 12);
/// ```
pub const fn zero_subcarriers(standard: Standard, bandwidth: Bandwidth) -> &'static [usize] {
    match (standard, bandwidth) {
        (Standard::Ac, Bandwidth::Bw20) => &AC_20,
        (Standard::Ac, Bandwidth::Bw40) => &AC_40,
        (Standard::Ac, Bandwidth::Bw80) => &AC_80,
        (Standard::Ax, Bandwidth::Bw20) => &AX_20,
        (Standard::Ax, Bandwidth::Bw40) => &AX_40,
        (Standard::Ax, Bandwidth::Bw80) => &AX_80,
    }
}

/// Swaps the two halves of an FFT-ordered vector so that index 0 holds the
/// lowest frequency.
pub fn unwrap_fft<T>(csi: &mut [T]) {
    let n = csi.len() / 2;
    csi.rotate_left(n);
}

/// Unwraps the subcarrier order and, if `standard` is given, zeroes the
/// subcarriers listed by [`zero_subcarriers`].
///
/// Vectors whose length is not a known FFT size are only unwrapped.
pub fn post_process(csi: &mut [Complex<f64>], standard: Option<Standard>) {
    unwrap_fft(csi);

    let Some(standard) = standard else {
        return;
    };
    let Some(bw) = Bandwidth::from_nsub(csi.len()) else {
        return;
    };

    for &i in zero_subcarriers(standard, bw) {
        csi[i] = Complex::zero();
    }
}
