//! Consumers of completed snapshots.

use std::{
    fs::{self, File, OpenOptions},
    path::PathBuf,
};

use csv::Writer;
use tracing::{debug, info};

use crate::{
    error::Result,
    output::{value_writer, write_snapshot, OutputMode, SeqLog},
    proc::CsiSnapshot,
};

/// Default number of files a rotating [`FileSink`] cycles through.
pub const ROTATION_BOUND: usize = 1024;

/// Whether the capture should go on after a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Continue,
    Stop,
}

/// Receives every snapshot the [`Aggregator`](crate::proc::Aggregator)
/// flushes.
pub trait SnapshotSink {
    fn on_snapshot(&mut self, snapshot: &CsiSnapshot) -> Result<Action>;
}

impl<F> SnapshotSink for F
where
    F: FnMut(&CsiSnapshot) -> Result<Action>,
{
    fn on_snapshot(&mut self, snapshot: &CsiSnapshot) -> Result<Action> {
        self(snapshot)
    }
}

/// Drops every snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct Discard;

impl SnapshotSink for Discard {
    fn on_snapshot(&mut self, _: &CsiSnapshot) -> Result<Action> {
        Ok(Action::Continue)
    }
}

/// Keeps every snapshot in memory.
#[derive(Debug, Clone, Default)]
pub struct Collect(pub Vec<CsiSnapshot>);

impl SnapshotSink for Collect {
    fn on_snapshot(&mut self, snapshot: &CsiSnapshot) -> Result<Action> {
        self.0.push(snapshot.clone());
        Ok(Action::Continue)
    }
}

/// How a [`FileSink`] names its value files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    /// Append every snapshot to `csi_value.csv`.
    Continuous,
    /// Write each snapshot to its own `csi_value_NNNN.csv`, wrapping around
    /// after `bound` files.
    Rotate { bound: usize },
}

/// Writes snapshots to `csi_value*.csv` and the sequence log to
/// `csi_seq.csv` in a directory.
#[derive(Debug)]
pub struct FileSink {
    dir: PathBuf,
    mode: OutputMode,
    rotation: Rotation,
    counter: usize,
    values: Option<Writer<File>>,
    seq: SeqLog<File>,
}

impl FileSink {
    /// Creates the directory if needed and truncates the sequence log (and,
    /// in continuous mode, the value file).
    pub fn create(dir: impl Into<PathBuf>, mode: OutputMode, rotation: Rotation) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let seq = SeqLog::new(File::create(dir.join("csi_seq.csv"))?)?;
        let values = match rotation {
            Rotation::Continuous => Some(value_writer(File::create(dir.join("csi_value.csv"))?)),
            Rotation::Rotate { .. } => None,
        };

        info!(dir = %dir.display(), ?mode, ?rotation, "writing CSI");

        Ok(Self {
            dir,
            mode,
            rotation,
            counter: 0,
            values,
            seq,
        })
    }

    /// Path of the value file the next snapshot goes to.
    pub fn value_path(&self) -> PathBuf {
        match self.rotation {
            Rotation::Continuous => self.dir.join("csi_value.csv"),
            Rotation::Rotate { .. } => self.dir.join(format!("csi_value_{:04}.csv", self.counter)),
        }
    }
}

impl SnapshotSink for FileSink {
    fn on_snapshot(&mut self, snapshot: &CsiSnapshot) -> Result<Action> {
        match self.rotation {
            Rotation::Continuous => {
                if let Some(w) = self.values.as_mut() {
                    write_snapshot(w, snapshot, self.mode)?;
                    w.flush()?;
                }
            }
            Rotation::Rotate { bound } => {
                let path = self.value_path();
                let file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&path)?;
                let mut w = value_writer(file);
                write_snapshot(&mut w, snapshot, self.mode)?;
                w.flush()?;
                debug!(path = %path.display(), "wrote snapshot");
                self.counter = (self.counter + 1) % bound.max(1);
            }
        }

        self.seq.write(snapshot)?;
        self.seq.flush()?;
        Ok(Action::Continue)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use num_complex::Complex;

    use super::*;
    use crate::{header::PacketHeader, proc::AntennaLayout};

    fn snapshot(seq_num: u16) -> CsiSnapshot {
        let header = PacketHeader {
            tx_mac: 0xbeef,
            seq_num,
            core_stream_index: 0,
        };
        CsiSnapshot::new(
            header,
            Duration::from_millis(1500),
            AntennaLayout::new(1, 1).unwrap(),
            vec![vec![Complex::new(1., 2.); 4]],
        )
        .unwrap()
    }

    #[test]
    fn continuous_appends() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::create(dir.path(), OutputMode::RealImagPairs, Rotation::Continuous)
            .unwrap();

        sink.on_snapshot(&snapshot(32)).unwrap();
        sink.on_snapshot(&snapshot(33)).unwrap();

        let values = fs::read_to_string(dir.path().join("csi_value.csv")).unwrap();
        assert_eq!(values.lines().count(), 8);
        assert!(values.lines().all(|l| l == "1,2"));

        let seq = fs::read_to_string(dir.path().join("csi_seq.csv")).unwrap();
        assert_eq!(
            seq,
            "macadd,seq,subseq,timestamp\nbeef,2,0,1.500000000\nbeef,2,1,1.500000000\n"
        );
    }

    #[test]
    fn rotation_wraps() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::create(
            dir.path(),
            OutputMode::LabeledDataset { label: 3 },
            Rotation::Rotate { bound: 2 },
        )
        .unwrap();

        for seq in 0..3 {
            sink.on_snapshot(&snapshot(seq)).unwrap();
        }

        assert!(dir.path().join("csi_value_0000.csv").exists());
        assert!(dir.path().join("csi_value_0001.csv").exists());
        assert!(!dir.path().join("csi_value_0002.csv").exists());
        assert_eq!(sink.value_path(), dir.path().join("csi_value_0001.csv"));

        // the third snapshot overwrote the first file
        let first = fs::read_to_string(dir.path().join("csi_value_0000.csv")).unwrap();
        assert_eq!(first.lines().count(), 1);
        assert!(first.starts_with("3,"));
    }
}
