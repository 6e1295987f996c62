#![no_main]

//! Fuzz target for magic-cookie parsing: parse arbitrary bytes, and check
//! that any accepted cookie survives a serialise/parse round trip.

use libfuzzer_sys::fuzz_target;

use alac::AlacConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(config) = AlacConfig::from_magic_cookie(data) {
        let reparsed = AlacConfig::from_magic_cookie(&config.to_magic_cookie())
            .expect("serialised cookie must reparse");
        assert_eq!(reparsed, config);
    }
});
