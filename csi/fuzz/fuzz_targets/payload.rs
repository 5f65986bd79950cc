#![no_main]

use csi::{frame::Device, header::HeaderVersion, unpack::Reconstruction};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, arbitrary::Arbitrary)]
struct Input {
    version: HeaderVersion,
    device: Device,
    reconstruction: Reconstruction,
    payload: Vec<u8>,
}

fuzz_target!(|input: Input| {
    if let Ok(frame) = csi::frame::Frame::from_payload(
        &input.payload,
        input.version,
        input.device,
        input.reconstruction,
    ) {
        assert!([64, 128, 256].contains(&frame.csi_values.len()));
    }
});
