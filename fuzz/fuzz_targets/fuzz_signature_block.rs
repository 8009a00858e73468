//! Fuzz target for CMS signature block parsing
//!
//! Exercises DER decoding of SignedData, embedded certificate parsing
//! and signer lookup against arbitrary signed content.

#![no_main]

use libfuzzer_sys::fuzz_target;
use patchsig::archive::SignatureBlock;

fuzz_target!(|data: &[u8]| {
    if let Ok(block) = SignatureBlock::parse(data) {
        for cert in block.certificates() {
            let _ = cert.subject().to_string();
            let _ = cert.fingerprint();
        }
        let _ = block.verify(data);
    }
});
