#![no_main]

use cf_auth::signature::{parse_signing_time, SignatureData};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let s = String::from_utf8_lossy(data);
    if let Ok(t) = parse_signing_time(&s) {
        let _ = SignatureData::new(t, "role", "cert").to_message();
    }
});
