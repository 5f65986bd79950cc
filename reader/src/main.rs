use std::{future::Future, path::PathBuf, time::Duration};

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use csi::{
    frame::Device,
    header::{parse_mac_suffix, HeaderVersion},
    ieee80211::Standard,
    output::OutputMode,
    proc::{Aggregator, AggregatorConfig, CsiSnapshot, SeriesKind},
    sink::{Action, FileSink, Rotation, SnapshotSink, ROTATION_BOUND},
    unpack::Reconstruction,
};
use tracing::{info, instrument};
use tracing_subscriber::EnvFilter;

mod read;

#[derive(Parser)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode the CSI packets of a pcap file
    Decode {
        /// pcap file path
        #[arg(short, long, value_name = "FILE")]
        file: PathBuf,

        /// Output directory
        #[arg(short, long, value_name = "DIR")]
        outdir: PathBuf,

        #[command(flatten)]
        decode: DecodeArgs,
    },
    /// Decode a pcap stream read from stdin, e.g. `tcpdump -w -`
    ///
    /// Stdin is read on a blocking thread that cannot be interrupted, so the
    /// process exits without waiting for it once a limit is reached.
    Live {
        /// Capture time in seconds
        #[arg(short, long)]
        time: u64,

        /// Output directory
        #[arg(short = 'd', long, value_name = "DIR", default_value = "temp")]
        temp_dir: PathBuf,

        /// Stop after this many snapshots
        #[arg(long)]
        count: Option<u64>,

        /// Append to a single file instead of rotating through numbered files
        #[arg(long)]
        continuous: bool,

        /// Log the mean amplitude of every snapshot
        #[arg(short, long)]
        print: bool,

        #[command(flatten)]
        decode: DecodeArgs,
    },
}

#[derive(Args)]
struct DecodeArgs {
    /// CSI capture device [asus, raspi]
    #[arg(long, default_value = "asus")]
    device: Device,

    /// Number of spatial streams captured
    #[arg(short = 'N', long, default_value_t = 4)]
    nss: usize,

    /// Number of cores capture was active on
    #[arg(short = 'C', long, default_value_t = 4)]
    core: usize,

    /// WLAN standard [ac, ax]
    #[arg(short = 's', long, default_value = "ac")]
    wlan_std: Standard,

    /// Decode as new header version
    #[arg(long)]
    new_header: bool,

    /// Keep the values of guard band and pilot subcarriers
    #[arg(long)]
    non_zero: bool,

    /// Use the integer approximation of the Nexmon utilities
    #[arg(long)]
    integer: bool,

    /// Value file layout
    #[arg(long, value_enum, default_value_t = Mode::Complex)]
    mode: Mode,

    /// Label written in front of every row in dataset mode
    #[arg(long, default_value_t = 0)]
    label: i64,

    /// Target MAC address (last four hex digits or full address)
    #[arg(short = 'm', long = "macadd")]
    macadd: Option<String>,

    /// Drop snapshots that look like beacon frames
    #[arg(long)]
    drop_beacons: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    /// `(+re+imj)` per line
    Complex,
    /// `re,im` per line
    Pairs,
    /// `magnitude,phase` per line
    Polar,
    /// label and magnitudes, one row per snapshot
    Dataset,
    /// `re,im,...`, one row per snapshot
    Raw,
}

impl DecodeArgs {
    fn config(&self) -> anyhow::Result<AggregatorConfig> {
        let target_mac = self
            .macadd
            .as_deref()
            .map(parse_mac_suffix)
            .transpose()?;

        Ok(AggregatorConfig {
            n_rx: self.core,
            n_tx: self.nss,
            header_version: HeaderVersion::from_flag(self.new_header),
            device: self.device,
            standard: self.wlan_std,
            reconstruction: if self.integer {
                Reconstruction::Integer
            } else {
                Reconstruction::Float
            },
            zero_guard_bands: !self.non_zero,
            drop_beacons: self.drop_beacons,
            target_mac,
        })
    }

    fn output_mode(&self) -> OutputMode {
        match self.mode {
            Mode::Complex => OutputMode::ComplexLiteral,
            Mode::Pairs => OutputMode::RealImagPairs,
            Mode::Polar => OutputMode::MagnitudePhase,
            Mode::Dataset => OutputMode::LabeledDataset { label: self.label },
            Mode::Raw => OutputMode::RawPairs,
        }
    }
}

fn log_config(config: &AggregatorConfig, dir: &std::path::Path) {
    info!(
        header = ?config.header_version,
        device = ?config.device,
        standard = ?config.standard,
        n_rx = config.n_rx,
        n_tx = config.n_tx,
        n_csi_elements = config.n_rx * config.n_tx,
        out_dir = %dir.display(),
        "starting"
    );
}

#[instrument(skip(args))]
async fn decode(file: PathBuf, outdir: PathBuf, args: DecodeArgs) -> anyhow::Result<()> {
    let config = args.config()?;
    log_config(&config, &outdir);

    let pcap = tokio::fs::File::open(&file)
        .await
        .with_context(|| format!("no such file {}", file.display()))?;
    let sink = FileSink::create(&outdir, args.output_mode(), Rotation::Continuous)?;
    let mut aggregator = Aggregator::new(config, sink)?;

    read::feed(read::packets(pcap), &mut aggregator).await?;
    aggregator.finish()?;

    info!(stats = ?aggregator.stats(), "done");
    Ok(())
}

async fn live(
    time: u64,
    dir: PathBuf,
    count: Option<u64>,
    continuous: bool,
    print: bool,
    args: DecodeArgs,
) -> anyhow::Result<()> {
    let config = args.config()?;
    log_config(&config, &dir);

    let rotation = if continuous {
        Rotation::Continuous
    } else {
        Rotation::Rotate {
            bound: ROTATION_BOUND,
        }
    };
    let mut file = FileSink::create(&dir, args.output_mode(), rotation)?;
    let mut written = 0;

    let sink = move |snapshot: &CsiSnapshot| -> csi::Result<Action> {
        file.on_snapshot(snapshot)?;
        written += 1;

        if print {
            let amplitude = snapshot.series(SeriesKind::Amplitude);
            let mean = amplitude.iter().sum::<f64>() / amplitude.len() as f64;
            info!(
                mac = %snapshot.header.mac(),
                seq = snapshot.header.seq_num,
                bandwidth_mhz = ?snapshot.bandwidth().map(|bw| bw.mhz()),
                mean_amplitude = mean,
                "snapshot"
            );
        }

        Ok(match count {
            Some(n) if written >= n => Action::Stop,
            _ => Action::Continue,
        })
    };
    let mut aggregator = Aggregator::new(config, sink)?;

    let packets = read::packets(tokio::io::stdin());
    let res = tokio::time::timeout(
        Duration::from_secs(time),
        read::feed(packets, &mut aggregator),
    )
    .await;

    match res {
        Ok(Ok(Action::Stop)) => info!("snapshot limit reached"),
        Ok(Ok(Action::Continue)) => {
            aggregator.finish()?;
        }
        Ok(Err(e)) => return Err(e),
        Err(_) => info!("time limit reached"),
    }

    info!(stats = ?aggregator.stats(), "done");
    Ok(())
}

/// Runs `fut` to completion on a fresh runtime.
///
/// Blocking tasks still running afterwards (a pending stdin read) are
/// abandoned instead of joined.
fn block_on<F: Future>(fut: F) -> anyhow::Result<F::Output> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let out = rt.block_on(fut);
    rt.shutdown_background();
    Ok(out)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    block_on(run(cli))?
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Decode {
            file,
            outdir,
            decode: args,
        } => decode(file, outdir, args).await,
        Command::Live {
            time,
            temp_dir,
            count,
            continuous,
            print,
            decode: args,
        } => live(time, temp_dir, count, continuous, print, args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn block_on_abandons_blocking_tasks() {
        let start = std::time::Instant::now();
        let out = block_on(async {
            let _blocked =
                tokio::task::spawn_blocking(|| std::thread::sleep(Duration::from_secs(60)));
            tokio::time::sleep(Duration::from_millis(10)).await;
            7
        })
        .unwrap();

        assert_eq!(out, 7);
        assert!(start.elapsed() < Duration::from_secs(30));
    }

    #[test]
    fn decode_args() {
        let cli = Cli::parse_from([
            "csi-reader",
            "decode",
            "-f",
            "in.pcap",
            "-o",
            "out",
            "--device",
            "raspi",
            "-N",
            "1",
            "-C",
            "2",
            "--new-header",
            "--macadd",
            "A1B2",
            "--mode",
            "dataset",
            "--label",
            "5",
        ]);
        let Command::Decode { decode, .. } = cli.command else {
            panic!("expected decode");
        };

        let config = decode.config().unwrap();
        assert_eq!(config.device, Device::Bcm43455c0);
        assert_eq!(config.n_rx, 2);
        assert_eq!(config.n_tx, 1);
        assert_eq!(config.header_version, HeaderVersion::New);
        assert_eq!(config.target_mac, Some(0xa1b2));
        assert!(config.zero_guard_bands);
        assert_eq!(decode.output_mode(), OutputMode::LabeledDataset { label: 5 });
    }
}
