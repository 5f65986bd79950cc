//! Decoding and aggregation of [Nexmon](https://github.com/seemoo-lab/nexmon_csi)
//! channel state information.
//!
//! Packets flow through [`frame::Frame::from_payload`] (header, raw words,
//! complex reconstruction) into a [`proc::Aggregator`], which groups the
//! per-antenna packets of one Wi-Fi frame into a [`proc::CsiSnapshot`] and
//! hands it to a [`sink::SnapshotSink`].

pub mod error;
pub mod frame;
pub mod header;
pub mod ieee80211;
pub mod output;
pub mod proc;
pub mod sink;
pub mod unpack;

pub use error::{Error, Result};
