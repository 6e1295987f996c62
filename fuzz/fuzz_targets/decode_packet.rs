#![no_main]

//! Fuzz target for packet decoding.
//!
//! Decodes arbitrary bytes as an ALAC packet under a range of decoder
//! configurations. Every outcome must be a clean success or a typed
//! error; panics and out-of-bounds accesses are bugs.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use alac::{AlacConfig, PacketDecoder};

#[derive(Arbitrary, Debug)]
struct PacketInput {
    depth_idx: u8,
    channels: u8,
    frame_length: u16,
    pb: u8,
    mb: u8,
    kb: u8,
    data: Vec<u8>,
}

fuzz_target!(|input: PacketInput| {
    if input.data.len() > 1 << 20 {
        return;
    }

    let depth = [16u8, 20, 24, 32][(input.depth_idx % 4) as usize];
    let channels = input.channels % 8 + 1;

    let mut config = match AlacConfig::new(44100, channels, depth) {
        Ok(config) => config,
        Err(_) => return,
    };
    config.frame_length = u32::from(input.frame_length);
    config.pb = input.pb;
    config.mb = input.mb;
    config.kb = input.kb;

    let Ok(mut decoder) = PacketDecoder::new(config) else {
        return;
    };

    // Success and typed failure are both fine; panics are not.
    let _ = decoder.decode_packet(&input.data);
});
