#![no_main]

use libfuzzer_sys::fuzz_target;
use snare_http::{HttpRequest, RequestDecoder};

fuzz_target!(|data: &[u8]| {
    // Single-shot decode must never panic.
    let mut request = HttpRequest::new();
    let _ = RequestDecoder::new().decode(data, &mut request);

    // Neither must feeding the same bytes one at a time.
    let mut request = HttpRequest::new();
    let mut decoder = RequestDecoder::new();
    for byte in data {
        if decoder
            .decode(std::slice::from_ref(byte), &mut request)
            .is_err()
        {
            break;
        }
    }
});
