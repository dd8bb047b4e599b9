#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // The decoder must reject arbitrary input with typed errors, never
    // panic; anything it accepts must re-encode without error.
    if let Ok(value) = presence_client::codec::decode(data) {
        let _ = presence_client::codec::encode(&value);
    }

    // Exercise the envelope layer on top of the raw decoder.
    let _ = presence_client::protocol::Frame::decode(data);
});
