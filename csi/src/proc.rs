//! CSI processing.

use std::time::Duration;

use ndarray::{Array2, ArrayView1, Axis};
use num_complex::Complex;
use tracing::{debug, trace};

use crate::{
    error::{Error, Result},
    frame::{Device, Frame},
    header::{HeaderVersion, PacketHeader},
    ieee80211::{post_process, Bandwidth, Standard},
    sink::{Action, SnapshotSink},
    unpack::Reconstruction,
};

/// Amplitude below which a subcarrier counts as silent for the beacon check.
pub const BEACON_AMPLITUDE: f64 = 150.;

/// Order in which antenna elements are written out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AntennaLayout {
    n_rx: usize,
    n_tx: usize,
    order: Vec<usize>,
}

impl AntennaLayout {
    /// Creates the layout for `n_rx` receive and `n_tx` transmit antennas.
    ///
    /// Output slot `e` holds element `(e % n_rx) * n_rx + e / n_tx`.
    /// Layouts for which this index leaves `0..n_rx * n_tx` are rejected.
    /// The mapping is a permutation only for `n_rx == n_tx`; other layouts
    /// repeat some elements and leave others out.
    ///
    /// ```
    /// # use csi::proc::AntennaLayout;
    /// let layout = AntennaLayout::new(2, 2).unwrap();
    /// assert_eq!(layout.order(), &[0, 2, 1, 3]);
    /// assert!(AntennaLayout::new(4, 1).is_err());
    /// assert_eq!(AntennaLayout::new(1, 4).unwrap().order(), &[0, 0, 0, 0]);
    /// ```
    pub fn new(n_rx: usize, n_tx: usize) -> Result<Self> {
        let n = n_rx * n_tx;
        if n == 0 {
            return Err(Error::InvalidAntennaLayout { n_rx, n_tx });
        }

        let order: Vec<usize> = (0..n).map(|e| (e % n_rx) * n_rx + e / n_tx).collect();
        if order.iter().any(|&i| i >= n) {
            return Err(Error::InvalidAntennaLayout { n_rx, n_tx });
        }

        Ok(Self { n_rx, n_tx, order })
    }

    pub fn n_rx(&self) -> usize {
        self.n_rx
    }

    pub fn n_tx(&self) -> usize {
        self.n_tx
    }

    /// Number of antenna elements in a complete snapshot.
    pub fn n_elements(&self) -> usize {
        self.order.len()
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }
}

/// What to plot from a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesKind {
    Amplitude,
    Phase,
}

/// CSI of every antenna element of a single Wi-Fi frame.
#[derive(Debug, Clone)]
pub struct CsiSnapshot {
    /// Header of the first packet of the snapshot.
    pub header: PacketHeader,
    /// Capture time of the first packet.
    pub timestamp: Duration,
    layout: AntennaLayout,
    /// Element x subcarrier.
    csi: Array2<Complex<f64>>,
}

impl CsiSnapshot {
    /// Assembles a snapshot from per-element vectors in arrival order.
    pub fn new(
        header: PacketHeader,
        timestamp: Duration,
        layout: AntennaLayout,
        elements: Vec<Vec<Complex<f64>>>,
    ) -> Result<Self> {
        let nsub = elements.first().ok_or(Error::EmptySnapshot)?.len();
        if elements.len() != layout.n_elements() {
            return Err(Error::InvalidAntennaLayout {
                n_rx: layout.n_rx,
                n_tx: layout.n_tx,
            });
        }
        if let Some(bad) = elements.iter().find(|e| e.len() != nsub) {
            return Err(Error::SubcarrierCountMismatch {
                expected: nsub,
                got: bad.len(),
            });
        }

        let csi = Array2::from_shape_fn((elements.len(), nsub), |(e, sub)| elements[e][sub]);

        Ok(Self {
            header,
            timestamp,
            layout,
            csi,
        })
    }

    pub fn layout(&self) -> &AntennaLayout {
        &self.layout
    }

    /// Element x subcarrier matrix.
    pub fn csi(&self) -> &Array2<Complex<f64>> {
        &self.csi
    }

    pub fn n_subcarriers(&self) -> usize {
        self.csi.ncols()
    }

    pub fn element(&self, e: usize) -> ArrayView1<'_, Complex<f64>> {
        self.csi.index_axis(Axis(0), e)
    }

    /// Values in output order: subcarrier-major, elements remapped by the
    /// [`AntennaLayout`].
    pub fn cells(&self) -> impl Iterator<Item = Complex<f64>> + '_ {
        (0..self.n_subcarriers()).flat_map(move |sub| {
            self.layout
                .order()
                .iter()
                .map(move |&e| self.csi[[e, sub]])
        })
    }

    /// Flattens the snapshot in output order.
    pub fn series(&self, kind: SeriesKind) -> Vec<f64> {
        self.cells()
            .map(|z| match kind {
                SeriesKind::Amplitude => z.norm(),
                SeriesKind::Phase => z.arg(),
            })
            .collect()
    }

    /// Bandwidth matching the subcarrier count.
    pub fn bandwidth(&self) -> Option<Bandwidth> {
        Bandwidth::from_nsub(self.n_subcarriers())
    }
}

/// Whether an element, as received, looks like the CSI of a beacon frame:
/// more than half of its subcarriers are below [`BEACON_AMPLITUDE`].
///
/// Must be applied before post-processing, which forces some subcarriers
/// to zero.
///
/// ```
/// # use num_complex::Complex;
/// # use csi::proc::is_beacon;
/// let mut csi = vec![Complex::new(1000., 0.); 64];
/// csi[..32].fill(Complex::new(10., 0.));
/// assert!(!is_beacon(&csi));
/// csi[32] = Complex::new(10., 0.);
/// assert!(is_beacon(&csi));
/// ```
pub fn is_beacon(element: &[Complex<f64>]) -> bool {
    let silent = element
        .iter()
        .filter(|z| z.norm() < BEACON_AMPLITUDE)
        .count();
    silent * 2 > element.len()
}

/// Decoder and aggregator settings.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Receive antennas (cores).
    pub n_rx: usize,
    /// Transmit antennas (spatial streams).
    pub n_tx: usize,
    pub header_version: HeaderVersion,
    pub device: Device,
    pub standard: Standard,
    pub reconstruction: Reconstruction,
    /// Zero guard band, DC and pilot subcarriers.
    pub zero_guard_bands: bool,
    /// Drop snapshots that look like beacon frames.
    pub drop_beacons: bool,
    /// Only keep snapshots whose transmitter MAC ends in these 16 bits.
    pub target_mac: Option<u16>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            n_rx: 4,
            n_tx: 4,
            header_version: HeaderVersion::Old,
            device: Device::Bcm4366c0,
            standard: Standard::Ac,
            reconstruction: Reconstruction::Float,
            zero_guard_bands: true,
            drop_beacons: false,
            target_mac: None,
        }
    }
}

/// Diagnostic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Packets handed to [`Aggregator::push`].
    pub packets: u64,
    /// Snapshots handed to the sink.
    pub flushed: u64,
    /// Snapshots dropped because they were incomplete (or overfull).
    pub discarded_incomplete: u64,
    /// Snapshots skipped by the MAC filter.
    pub filtered: u64,
    /// Snapshots dropped by the beacon check.
    pub beacons: u64,
    /// Packets that failed to decode.
    pub malformed: u64,
    /// Packets whose subcarrier count disagreed with their snapshot.
    pub mismatched: u64,
}

/// Where the aggregator stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationState {
    /// No snapshot in progress.
    Idle,
    /// Some, but not exactly all, elements have arrived.
    Collecting,
    /// All elements of the snapshot have arrived.
    Complete,
}

#[derive(Debug)]
struct Pending {
    header: PacketHeader,
    timestamp: Duration,
    elements: Vec<Vec<Complex<f64>>>,
}

/// Groups CSI packets into snapshots.
///
/// A packet with `core_stream_index == 0` starts a new snapshot. At that
/// point the previous snapshot is handed to the sink if it is complete and
/// dropped otherwise.
///
/// ```
/// # use csi::proc::{Aggregator, AggregatorConfig};
/// # use csi::sink::Collect;
/// # let packets: Vec<(Vec<u8>, std::time::Duration)> = vec![];
/// let mut aggregator = Aggregator::new(AggregatorConfig::default(), Collect::default())?;
///
/// for (payload, ts) in packets {
///     if let Err(e) = aggregator.push(&payload, ts) {
///         if !e.is_recoverable() {
///             return Err(e);
///         }
///     }
/// }
/// aggregator.finish()?;
///
/// let snapshots = aggregator.into_sink().0;
/// # Ok::<(), csi::Error>(())
/// ```
#[derive(Debug)]
pub struct Aggregator<S> {
    config: AggregatorConfig,
    layout: AntennaLayout,
    sink: S,
    pending: Option<Pending>,
    stats: Stats,
}

impl<S: SnapshotSink> Aggregator<S> {
    pub fn new(config: AggregatorConfig, sink: S) -> Result<Self> {
        let layout = AntennaLayout::new(config.n_rx, config.n_tx)?;

        Ok(Self {
            config,
            layout,
            sink,
            pending: None,
            stats: Stats::default(),
        })
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    pub fn state(&self) -> AggregationState {
        match &self.pending {
            None => AggregationState::Idle,
            Some(p) if p.elements.len() == self.layout.n_elements() => {
                AggregationState::Complete
            }
            Some(_) => AggregationState::Collecting,
        }
    }

    /// Feeds one UDP payload captured at `timestamp`.
    ///
    /// Decoding errors drop the snapshot in progress and are recoverable;
    /// errors from the sink are passed through.
    pub fn push(&mut self, payload: &[u8], timestamp: Duration) -> Result<Action> {
        self.stats.packets += 1;

        let Frame { header, csi_values } = match Frame::from_payload(
            payload,
            self.config.header_version,
            self.config.device,
            self.config.reconstruction,
        ) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.malformed += 1;
                self.pending = None;
                return Err(e);
            }
        };

        let mut action = Action::Continue;

        if header.core_stream_index == 0 {
            action = self.flush()?;

            if let Some(target) = self.config.target_mac {
                if header.mac_suffix() != target {
                    trace!("skipping snapshot from {:04x}", header.mac_suffix());
                    self.stats.filtered += 1;
                    return Ok(action);
                }
            }

            self.pending = Some(Pending {
                header,
                timestamp,
                elements: Vec::with_capacity(self.layout.n_elements()),
            });
        }

        let Some(pending) = self.pending.as_mut() else {
            return Ok(action);
        };

        if let Some(first) = pending.elements.first() {
            if first.len() != csi_values.len() {
                let err = Error::SubcarrierCountMismatch {
                    expected: first.len(),
                    got: csi_values.len(),
                };
                self.stats.mismatched += 1;
                self.pending = None;
                return Err(err);
            }
        }

        pending.elements.push(csi_values);
        Ok(action)
    }

    /// Ends the session, handing a complete snapshot to the sink.
    pub fn finish(&mut self) -> Result<Action> {
        let action = self.flush()?;
        debug!(stats = ?self.stats, "session finished");
        Ok(action)
    }

    /// Hands the pending snapshot to the sink if it is complete and drops it
    /// otherwise. Does nothing when there is no snapshot in progress.
    pub fn flush(&mut self) -> Result<Action> {
        let Some(pending) = self.pending.take() else {
            return Ok(Action::Continue);
        };
        if pending.elements.is_empty() {
            return Ok(Action::Continue);
        }

        if pending.elements.len() != self.layout.n_elements() {
            debug!(
                got = pending.elements.len(),
                expected = self.layout.n_elements(),
                "dropping incomplete snapshot"
            );
            self.stats.discarded_incomplete += 1;
            return Ok(Action::Continue);
        }

        if self.config.drop_beacons && is_beacon(&pending.elements[0]) {
            debug!(seq = pending.header.seq_num, "dropping beacon");
            self.stats.beacons += 1;
            return Ok(Action::Continue);
        }

        let standard = self.config.zero_guard_bands.then_some(self.config.standard);
        let mut elements = pending.elements;
        for element in &mut elements {
            post_process(element, standard);
        }

        let snapshot = CsiSnapshot::new(
            pending.header,
            pending.timestamp,
            self.layout.clone(),
            elements,
        )?;

        let action = self.sink.on_snapshot(&snapshot)?;
        self.stats.flushed += 1;
        Ok(action)
    }
}
