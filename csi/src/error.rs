//! Errors returned by the decoder and the aggregator.

/// Error returned while decoding or aggregating CSI packets.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The payload is too short to hold the CSI header.
    #[error("malformed header: need {needed} bytes, got {got}")]
    MalformedHeader { needed: usize, got: usize },
    /// The payload is too short for the subcarrier block.
    #[error("truncated CSI block: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
    #[error("unknown device {0:?}")]
    UnknownDevice(String),
    #[error("unknown wlan standard {0:?}")]
    UnknownStandard(String),
    /// A snapshot must hold at least one element.
    #[error("empty snapshot")]
    EmptySnapshot,
    /// An element does not have as many subcarriers as the rest of the
    /// snapshot.
    #[error("subcarrier count mismatch: expected {expected}, got {got}")]
    SubcarrierCountMismatch { expected: usize, got: usize },
    #[error("unsupported antenna layout {n_rx}x{n_tx}")]
    InvalidAntennaLayout { n_rx: usize, n_tx: usize },
    #[error("invalid MAC address {0:?}")]
    InvalidMac(String),
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("CSV error")]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Whether the error only affects the packet (or snapshot) at hand.
    ///
    /// Recoverable errors are counted and skipped; the rest should end the
    /// session.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MalformedHeader { .. }
                | Self::Truncated { .. }
                | Self::EmptySnapshot
                | Self::SubcarrierCountMismatch { .. }
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
