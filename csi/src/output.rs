//! Text output of snapshots.
//!
//! Every mode walks the snapshot in the same order: subcarriers in
//! ascending order, and for each subcarrier the antenna elements as
//! arranged by the [`AntennaLayout`](crate::proc::AntennaLayout).

use std::{io::Write, time::Duration};

use csv::{Writer, WriterBuilder};
use num_complex::Complex;

use crate::{error::Result, proc::CsiSnapshot};

/// Layout of the value file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// One `(+re+imj)` literal per line.
    #[default]
    ComplexLiteral,
    /// One `re,im` pair per line.
    RealImagPairs,
    /// One `magnitude,phase` pair per line.
    MagnitudePhase,
    /// One line per snapshot: the label followed by every magnitude.
    LabeledDataset { label: i64 },
    /// One line per snapshot: every `re,im` pair.
    RawPairs,
}

/// Opens a CSV writer suited for value files.
pub fn value_writer<W: Write>(w: W) -> Writer<W> {
    WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_writer(w)
}

fn literal(z: Complex<f64>) -> String {
    format!("({:+}{:+}j)", z.re, z.im)
}

/// Writes `snapshot` to `w` in the given mode.
///
/// ```
/// # use std::time::Duration;
/// # use num_complex::Complex;
/// # use csi::{header::PacketHeader, output::*, proc::{AntennaLayout, CsiSnapshot}};
/// let header = PacketHeader { tx_mac: 0, seq_num: 0, core_stream_index: 0 };
/// let layout = AntennaLayout::new(1, 1).unwrap();
/// let csi = vec![vec![Complex::new(3., -4.), Complex::new(-1., 0.)]];
/// let snapshot = CsiSnapshot::new(header, Duration::ZERO, layout, csi).unwrap();
///
/// let mut w = value_writer(vec![]);
/// write_snapshot(&mut w, &snapshot, OutputMode::ComplexLiteral).unwrap();
/// let out = String::from_utf8(w.into_inner().unwrap()).unwrap();
/// assert_eq!(out, "(+3-4j)\n(-1+0j)\n");
/// ```
pub fn write_snapshot<W: Write>(
    w: &mut Writer<W>,
    snapshot: &CsiSnapshot,
    mode: OutputMode,
) -> Result<()> {
    match mode {
        OutputMode::ComplexLiteral => {
            for z in snapshot.cells() {
                w.write_record([literal(z)])?;
            }
        }
        OutputMode::RealImagPairs => {
            for z in snapshot.cells() {
                w.write_record([z.re.to_string(), z.im.to_string()])?;
            }
        }
        OutputMode::MagnitudePhase => {
            for z in snapshot.cells() {
                w.write_record([z.norm().to_string(), z.arg().to_string()])?;
            }
        }
        OutputMode::LabeledDataset { label } => {
            let row = std::iter::once(label.to_string())
                .chain(snapshot.cells().map(|z| z.norm().to_string()));
            w.write_record(row)?;
        }
        OutputMode::RawPairs => {
            let row = snapshot
                .cells()
                .flat_map(|z| [z.re.to_string(), z.im.to_string()]);
            w.write_record(row)?;
        }
    }
    Ok(())
}

/// Formats a capture time as `seconds.nanoseconds`.
pub fn format_timestamp(ts: Duration) -> String {
    format!("{}.{:09}", ts.as_secs(), ts.subsec_nanos())
}

/// Companion log with one `macadd,seq,subseq,timestamp` row per snapshot.
#[derive(Debug)]
pub struct SeqLog<W: Write> {
    w: Writer<W>,
}

impl<W: Write> SeqLog<W> {
    /// Creates the log and writes its header row.
    pub fn new(w: W) -> Result<Self> {
        let mut w = WriterBuilder::new().has_headers(false).from_writer(w);
        w.write_record(["macadd", "seq", "subseq", "timestamp"])?;
        Ok(Self { w })
    }

    pub fn write(&mut self, snapshot: &CsiSnapshot) -> Result<()> {
        let h = &snapshot.header;
        self.w.write_record([
            format!("{:04x}", h.mac_suffix()),
            h.seq().to_string(),
            h.subseq().to_string(),
            format_timestamp(snapshot.timestamp),
        ])?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.w.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W> {
        self.w.into_inner().map_err(|e| e.into_error().into())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        header::PacketHeader,
        proc::{AntennaLayout, CsiSnapshot},
    };

    use super::*;

    fn snapshot() -> CsiSnapshot {
        let header = PacketHeader {
            tx_mac: 0x0011_2233_abcd,
            seq_num: 0x1234,
            core_stream_index: 0,
        };
        let layout = AntennaLayout::new(2, 2).unwrap();
        let elements = (0..4)
            .map(|e| {
                vec![
                    Complex::new(e as f64, -(e as f64)),
                    Complex::new(0., 10. + e as f64),
                ]
            })
            .collect();
        CsiSnapshot::new(header, Duration::new(12, 5_000), layout, elements).unwrap()
    }

    fn render(mode: OutputMode) -> String {
        let mut w = value_writer(vec![]);
        write_snapshot(&mut w, &snapshot(), mode).unwrap();
        String::from_utf8(w.into_inner().unwrap()).unwrap()
    }

    #[test]
    fn complex_literal() {
        let out = render(OutputMode::ComplexLiteral);
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 8);
        assert_eq!(lines[0], "(+0-0j)");
        assert_eq!(lines[1], "(+2-2j)");
        assert_eq!(lines[2], "(+1-1j)");
        assert_eq!(lines[4], "(+0+10j)");
    }

    #[test]
    fn real_imag_pairs() {
        let out = render(OutputMode::RealImagPairs);
        assert!(out.starts_with("0,-0\n2,-2\n1,-1\n3,-3\n0,10\n0,12\n"));
    }

    #[test]
    fn magnitude_phase() {
        let out = render(OutputMode::MagnitudePhase);
        let line = out.lines().nth(4).unwrap();
        let (mag, phase) = line.split_once(',').unwrap();
        assert_eq!(mag, "10");
        let phase: f64 = phase.parse().unwrap();
        assert!((phase - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn one_row_modes() {
        let out = render(OutputMode::LabeledDataset { label: 7 });
        assert_eq!(out.lines().count(), 1);
        let fields: Vec<_> = out.trim_end().split(',').collect();
        assert_eq!(fields.len(), 9);
        assert_eq!(fields[0], "7");
        assert_eq!(fields[5], "10");

        let out = render(OutputMode::RawPairs);
        assert_eq!(out.lines().count(), 1);
        assert_eq!(out.trim_end().split(',').count(), 16);
        assert!(out.starts_with("0,-0,2,-2,1,-1,3,-3,0,10"));
    }

    #[test]
    fn seq_log_rows() {
        let mut log = SeqLog::new(vec![]).unwrap();
        log.write(&snapshot()).unwrap();
        let out = String::from_utf8(log.into_inner().unwrap()).unwrap();

        assert_eq!(
            out,
            "macadd,seq,subseq,timestamp\nabcd,291,4,12.000005000\n"
        );
    }
}
