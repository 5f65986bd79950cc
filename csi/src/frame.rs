//! CSI extractor for [Nexmon](https://github.com/seemoo-lab/nexmon_csi)-patched
//! chips.
//!
//! Nexmon CSI is encoded in UDP packets, which in turn are defined
//! as follows:
//!
//! ```c
//! struct csi_udp_frame {
//!     struct ethernet_ip_udp_header hdrs;
//!     uint16 kk1; // magic bytes 0x1111
//!     int8 rssi;
//!     uint8 fc; //frame control
//!     uint8 SrcMac[6];
//!     uint16 seqCnt;
//!     uint16 csiconf;
//!     uint16 chanspec;
//!     uint16 chip;
//!     uint32 csi_values[];
//! } __attribute__((packed));
//! ```
//!
//! Everything in this module works on the UDP payload, i.e. starting at
//! `kk1`. See [`crate::header`] for the header layouts.

use std::str::FromStr;

use num_complex::Complex;

use crate::{
    error::{Error, Result},
    header::{HeaderVersion, PacketHeader, HEADER_LEN},
    unpack::{plain_from_word, MiniFloat, Reconstruction},
};

/// Bytes per subcarrier.
const WORD_LEN: usize = 4;

/// Chip family the payload was produced by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub enum Device {
    /// Broadcom BCM4366c0, used in the Asus RT-AC86U router. Reports
    /// mini-float values.
    #[default]
    Bcm4366c0,
    /// Broadcom BCM43455c0, used in the Raspberry Pi 3B+/4. Reports plain
    /// `i16` pairs.
    Bcm43455c0,
}

impl FromStr for Device {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asus" | "bcm4366c0" => Ok(Self::Bcm4366c0),
            "raspi" | "bcm43455c0" => Ok(Self::Bcm43455c0),
            _ => Err(Error::UnknownDevice(s.to_owned())),
        }
    }
}

/// Number of subcarriers carried by a payload of `len` bytes.
///
/// ```
/// # use csi::frame::subcarrier_count;
/// assert_eq!(subcarrier_count(18 + 64 * 4), 64);
/// assert_eq!(subcarrier_count(18 + 128 * 4), 128);
/// assert_eq!(subcarrier_count(18 + 256 * 4), 256);
/// ```
pub const fn subcarrier_count(len: usize) -> usize {
    let words = len.saturating_sub(HEADER_LEN) / WORD_LEN;
    if words >= 256 {
        256
    } else if words >= 128 {
        128
    } else {
        64
    }
}

/// Iterates over the CSI words of a payload.
///
/// Each word is assembled from four bytes taken in reverse order.
fn words(b: &[u8], nsub: usize) -> Result<impl Iterator<Item = u32> + '_> {
    let needed = HEADER_LEN + nsub * WORD_LEN;
    let block = b
        .get(HEADER_LEN..needed)
        .ok_or(Error::Truncated { needed, got: b.len() })?;

    Ok(block
        .chunks_exact(WORD_LEN)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]])))
}

/// Reads the mini-float values of a BCM4366c0 payload.
pub fn extract_mini_floats(b: &[u8]) -> Result<Vec<MiniFloat>> {
    Ok(words(b, subcarrier_count(b.len()))?
        .map(MiniFloat::from_word)
        .collect())
}

/// Reads the `i16` pairs of a BCM43455c0 payload.
pub fn extract_plain(b: &[u8]) -> Result<Vec<Complex<i16>>> {
    Ok(words(b, subcarrier_count(b.len()))?
        .map(plain_from_word)
        .collect())
}

/// A reported CSI frame: one antenna element of one Wi-Fi frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: PacketHeader,
    /// Complex CSI values in the order they were received, before
    /// post-processing.
    pub csi_values: Vec<Complex<f64>>,
}

impl Frame {
    /// Decodes a UDP payload.
    pub fn from_payload(
        b: &[u8],
        version: HeaderVersion,
        device: Device,
        reconstruction: Reconstruction,
    ) -> Result<Self> {
        let header = PacketHeader::parse(b, version)?;

        let csi_values = match device {
            Device::Bcm4366c0 => reconstruction.apply(&extract_mini_floats(b)?),
            Device::Bcm43455c0 => extract_plain(b)?
                .into_iter()
                .map(|z| Complex::new(f64::from(z.re), f64::from(z.im)))
                .collect(),
        };

        Ok(Self { header, csi_values })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_thresholds() {
        assert_eq!(subcarrier_count(0), 64);
        assert_eq!(subcarrier_count(HEADER_LEN), 64);
        assert_eq!(subcarrier_count(HEADER_LEN + 511), 64);
        assert_eq!(subcarrier_count(HEADER_LEN + 512), 128);
        assert_eq!(subcarrier_count(HEADER_LEN + 1023), 128);
        assert_eq!(subcarrier_count(HEADER_LEN + 1024), 256);
        assert_eq!(subcarrier_count(HEADER_LEN + 4096), 256);
    }

    #[test]
    fn count_is_monotonic() {
        let mut prev = 0;
        for len in 0..2048 {
            let n = subcarrier_count(len);
            assert!([64, 128, 256].contains(&n));
            assert!(n >= prev);
            prev = n;
        }
    }

    fn payload(words: &[u32]) -> Vec<u8> {
        let mut b = vec![0u8; HEADER_LEN];
        for w in words {
            b.extend_from_slice(&w.to_le_bytes());
        }
        b
    }

    #[test]
    fn words_are_little_endian() {
        let mut b = vec![0u8; HEADER_LEN];
        b.extend_from_slice(&[0x03, 0x00, 0xfe, 0xff]);
        b.resize(HEADER_LEN + 64 * 4, 0);

        let plain = extract_plain(&b).unwrap();
        assert_eq!(plain.len(), 64);
        assert_eq!(plain[0], Complex::new(-2, 3));
    }

    #[test]
    fn truncated_block() {
        let b = payload(&[0; 63]);
        assert!(matches!(
            extract_mini_floats(&b),
            Err(Error::Truncated {
                needed: 274,
                got: 270
            })
        ));
    }

    #[test]
    fn decode_bcm4366c0() {
        // 3 * 2^-1 + j(-1) * 2^-1
        let w = (3 << 18) | (1 << 17) | (1 << 6) | 0b111111;
        let mut words = vec![0u32; 128];
        words[0] = w;
        let b = payload(&words);

        let frame = Frame::from_payload(
            &b,
            HeaderVersion::Old,
            Device::Bcm4366c0,
            Reconstruction::Float,
        )
        .unwrap();
        assert_eq!(frame.csi_values.len(), 128);
        assert_eq!(frame.csi_values[0], Complex::new(1.5, -0.5));
        assert_eq!(frame.csi_values[1], Complex::new(0., 0.));
    }

    #[test]
    fn decode_new_header() {
        let mut b = payload(&[0x0001_0002; 64]);
        b[2..8].copy_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        b[8..10].copy_from_slice(&[0x34, 0x12]);
        b[12..14].copy_from_slice(&[0x00, 0x09]);

        let frame = Frame::from_payload(
            &b,
            HeaderVersion::New,
            Device::Bcm43455c0,
            Reconstruction::Float,
        )
        .unwrap();
        assert_eq!(frame.header.tx_mac, 0x0011_2233_4455);
        assert_eq!(frame.header.seq_num, 0x1234);
        assert_eq!(frame.header.core_stream_index, 9);
        assert_eq!(frame.csi_values.len(), 64);
        assert_eq!(frame.csi_values[0], Complex::new(1., 2.));

        // the old layout reads the same bytes differently
        let old = Frame::from_payload(
            &b,
            HeaderVersion::Old,
            Device::Bcm43455c0,
            Reconstruction::Float,
        )
        .unwrap();
        assert_eq!(old.header.seq_num, 0);
        assert_ne!(old.header.tx_mac, frame.header.tx_mac);
    }

    #[test]
    fn decode_short_header() {
        let err = Frame::from_payload(
            &[0; 10],
            HeaderVersion::New,
            Device::Bcm43455c0,
            Reconstruction::Float,
        )
        .unwrap_err();
        assert!(matches!(err, Error::MalformedHeader { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn parse_device() {
        assert_eq!("asus".parse::<Device>().unwrap(), Device::Bcm4366c0);
        assert_eq!("RasPi".parse::<Device>().unwrap(), Device::Bcm43455c0);
        assert!(matches!(
            "intel5300".parse::<Device>(),
            Err(Error::UnknownDevice(_))
        ));
    }
}
