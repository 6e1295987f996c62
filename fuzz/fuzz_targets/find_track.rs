#![no_main]

//! Fuzz target for the MP4 walker: arbitrary bytes must produce either a
//! track or a typed container error, never a panic or runaway allocation.

use std::io::Cursor;

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 4 << 20 {
        return;
    }

    let mut cursor = Cursor::new(data);
    let _ = alac::mp4::find_alac_track(&mut cursor);
});
