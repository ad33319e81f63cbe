#![no_main]

use eon_core::codec::decode_packet;
use libfuzzer_sys::fuzz_target;

// Arbitrary bytes must never panic the decoder; malformed packets are
// dropped with CODEC_ERROR and never mutate any reservoir (spec §4.4).
fuzz_target!(|data: &[u8]| {
    let _ = decode_packet(4096, data);
});
