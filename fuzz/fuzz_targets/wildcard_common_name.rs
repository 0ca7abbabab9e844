#![no_main]

use libfuzzer_sys::fuzz_target;
use snare_tls::{leaf_file_name, wildcard_common_name};

fuzz_target!(|data: &[u8]| {
    if let Ok(host) = std::str::from_utf8(data) {
        let common_name = wildcard_common_name(host);
        // The wildcard only ever replaces a leading label.
        assert!(common_name.len() <= host.len().max(1) + 1);
        let _ = leaf_file_name(&common_name);
    }
});
