//! Header of the UDP payload emitted by the Nexmon firmware patch.
//!
//! The payload starts with an 18 byte header followed by the CSI block.
//! Two header layouts are in the wild. They carry the same fields and only
//! differ in where the MAC address and sequence number live:
//!
//! ```text
//! offset   old layout        new layout
//! 0..2     magic (0x1111)    magic
//! 2..4     rssi, fc          source MAC
//! 4..8     source MAC        source MAC
//! 8..10    source MAC        sequence number
//! 10..12   sequence number   -
//! 12..14   core/stream       core/stream
//! 14..16   chanspec          chanspec
//! 16..18   chip              chip
//! ```

use std::str::FromStr;

use macaddr::MacAddr6;

use crate::error::{Error, Result};

/// Offset of the CSI block within the UDP payload.
pub const HEADER_LEN: usize = 18;

const CORE_STREAM_OFFSET: usize = 12;

/// Header layout version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub enum HeaderVersion {
    /// MAC address at offset 4.
    #[default]
    Old,
    /// MAC address at offset 2.
    New,
}

impl HeaderVersion {
    pub const fn from_flag(new_header: bool) -> Self {
        if new_header {
            Self::New
        } else {
            Self::Old
        }
    }

    const fn mac_offset(self) -> usize {
        match self {
            Self::Old => 4,
            Self::New => 2,
        }
    }

    const fn seq_offset(self) -> usize {
        match self {
            Self::Old => 10,
            Self::New => 8,
        }
    }
}

/// Fields of the CSI header needed to group packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Transmitter MAC address, big endian, widened to 64 bits.
    pub tx_mac: u64,
    /// Sequence number of the Wi-Fi frame that triggered the collection.
    pub seq_num: u16,
    /// Core and spatial stream the CSI was measured on. Zero marks the
    /// first packet of a snapshot.
    pub core_stream_index: u16,
}

impl PacketHeader {
    /// Parses the header from a UDP payload.
    ///
    /// ```
    /// # use csi::header::{HeaderVersion, PacketHeader};
    /// let mut payload = [0u8; 18];
    /// payload[4..10].copy_from_slice(&[0x00, 0x11, 0x22, 0x33, 0xab, 0xcd]);
    /// payload[10..12].copy_from_slice(&[0x34, 0x12]);
    /// payload[12..14].copy_from_slice(&[0x00, 0x01]);
    ///
    /// let header = PacketHeader::parse(&payload, HeaderVersion::Old).unwrap();
    /// assert_eq!(header.mac_suffix(), 0xabcd);
    /// assert_eq!(header.seq_num, 0x1234);
    /// assert_eq!(header.core_stream_index, 1);
    /// ```
    pub fn parse(b: &[u8], version: HeaderVersion) -> Result<Self> {
        if b.len() < HEADER_LEN {
            return Err(Error::MalformedHeader {
                needed: HEADER_LEN,
                got: b.len(),
            });
        }

        let mac = version.mac_offset();
        let tx_mac = b[mac..mac + 6]
            .iter()
            .fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte));

        // The firmware writes the sequence number in host (little endian)
        // order while the rest of the header is big endian.
        let seq = version.seq_offset();
        let seq_num = u16::from_le_bytes([b[seq], b[seq + 1]]);

        let core_stream_index =
            u16::from_be_bytes([b[CORE_STREAM_OFFSET], b[CORE_STREAM_OFFSET + 1]]);

        Ok(Self {
            tx_mac,
            seq_num,
            core_stream_index,
        })
    }

    /// Low 16 bits of the MAC address, i.e. its last four hex digits.
    pub const fn mac_suffix(&self) -> u16 {
        (self.tx_mac & 0xffff) as u16
    }

    pub fn mac(&self) -> MacAddr6 {
        let b = self.tx_mac.to_be_bytes();
        MacAddr6::new(b[2], b[3], b[4], b[5], b[6], b[7])
    }

    /// Core number.
    pub const fn core(&self) -> u8 {
        (self.core_stream_index & 0b111) as u8
    }

    /// Spatial stream number.
    pub const fn spatial(&self) -> u8 {
        ((self.core_stream_index >> 3) & 0b111) as u8
    }

    pub const fn seq(&self) -> u16 {
        self.seq_num / 16
    }

    pub const fn subseq(&self) -> u16 {
        self.seq_num % 16
    }
}

/// Parses a transmitter filter: either the last four hex digits of a MAC
/// address (`"a1b2"`) or a full address (`"00:11:22:33:a1:b2"`). Only the
/// low 16 bits are kept.
///
/// ```
/// # use csi::header::parse_mac_suffix;
/// assert_eq!(parse_mac_suffix("A1b2").unwrap(), 0xa1b2);
/// assert_eq!(parse_mac_suffix("00:11:22:33:a1:b2").unwrap(), 0xa1b2);
/// assert!(parse_mac_suffix("a1b").is_err());
/// ```
pub fn parse_mac_suffix(s: &str) -> Result<u16> {
    let s = s.trim();
    if s.len() == 4 && s.chars().all(|c| c.is_ascii_hexdigit()) {
        return u16::from_str_radix(s, 16).map_err(|_| Error::InvalidMac(s.to_owned()));
    }

    let mac = MacAddr6::from_str(s).map_err(|_| Error::InvalidMac(s.to_owned()))?;
    let b = mac.as_bytes();
    Ok(u16::from_be_bytes([b[4], b[5]]))
}
