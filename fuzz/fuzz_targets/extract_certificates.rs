#![no_main]

use cf_auth::{extract_certificates, Identity};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let s = String::from_utf8_lossy(data);
    if let Ok(certs) = extract_certificates(&s) {
        let _ = Identity::from_certificate(&certs.identity);
    }
});
