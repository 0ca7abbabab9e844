#![no_main]

use libfuzzer_sys::fuzz_target;
use snare_http::{HttpResponse, ResponseDecoder};

fuzz_target!(|data: &[u8]| {
    let mut response = HttpResponse::new();
    let mut decoder = ResponseDecoder::new();
    if decoder.decode(data, &mut response).is_ok() {
        let _ = decoder.finish_eof(&mut response);
    }
});
