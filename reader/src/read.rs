use std::{pin::pin, time::Duration};

use async_stream::try_stream;
use csi::{
    proc::Aggregator,
    sink::{Action, SnapshotSink},
};
use futures::{Stream, StreamExt};
use tokio::io::AsyncRead;
use tracing::{debug, trace};

const ETH_HEADER_LEN: usize = 14;
const ETHERTYPE_IPV4: u16 = 0x0800;
const IPPROTO_UDP: u8 = 17;
const UDP_HEADER_LEN: usize = 8;

/// A captured link-layer frame.
pub struct Packet {
    /// Capture time relative to the Unix epoch.
    pub timestamp: Duration,
    pub data: Vec<u8>,
}

/// Read frames from a pcap stream.
pub fn packets(reader: impl AsyncRead) -> impl Stream<Item = anyhow::Result<Packet>> {
    try_stream! {
        let reader = pin!(reader);
        let mut frames = pcap_file_tokio::pcap::PcapReader::new(reader).await?;

        while let Some(pkt) = frames.next_packet().await.transpose()? {
            yield Packet {
                timestamp: pkt.timestamp,
                data: pkt.data.into_owned(),
            };
        }
    }
}

/// Returns the UDP payload of an Ethernet/IPv4/UDP frame.
pub fn udp_payload(b: &[u8]) -> Option<&[u8]> {
    let ethertype = u16::from_be_bytes([*b.get(12)?, *b.get(13)?]);
    if ethertype != ETHERTYPE_IPV4 {
        return None;
    }

    let ip = b.get(ETH_HEADER_LEN..)?;
    let ihl = usize::from(ip.first()? & 0x0f) * 4;
    if *ip.get(9)? != IPPROTO_UDP {
        return None;
    }

    let udp = ip.get(ihl..)?;
    let header = udp.get(..UDP_HEADER_LEN)?;
    let len = usize::from(u16::from_be_bytes([header[4], header[5]]));
    // tcpdump may truncate, and some drivers pad
    let end = len.clamp(UDP_HEADER_LEN, udp.len());
    udp.get(UDP_HEADER_LEN..end)
}

/// Feeds every UDP payload of `packets` to the aggregator.
///
/// Returns whether the sink asked to stop.
pub async fn feed<S: SnapshotSink>(
    packets: impl Stream<Item = anyhow::Result<Packet>>,
    aggregator: &mut Aggregator<S>,
) -> anyhow::Result<Action> {
    let mut packets = pin!(packets);

    while let Some(pkt) = packets.next().await.transpose()? {
        let Some(payload) = udp_payload(&pkt.data) else {
            trace!(len = pkt.data.len(), "not a UDP frame");
            continue;
        };

        match aggregator.push(payload, pkt.timestamp) {
            Ok(Action::Continue) => {}
            Ok(Action::Stop) => return Ok(Action::Stop),
            Err(e) if e.is_recoverable() => debug!("dropping packet: {e}"),
            Err(e) => return Err(e.into()),
        }
    }

    Ok(Action::Continue)
}
