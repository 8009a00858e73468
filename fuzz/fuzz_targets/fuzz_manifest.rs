//! Fuzz target for manifest and signature file parsing
//!
//! Security concerns:
//! - Unbounded continuation lines
//! - Mixed line terminators
//! - Section byte ranges that do not line up with the input

#![no_main]

use libfuzzer_sys::fuzz_target;
use patchsig::archive::Manifest;

fuzz_target!(|data: &[u8]| {
    if let Ok(manifest) = Manifest::parse(data.to_vec()) {
        let _ = manifest.main_attributes().attributes().count();
        for section in manifest.sections() {
            // Raw ranges must always be valid slices of the input.
            let raw = manifest
                .raw_section(section)
                .expect("section of its own manifest");
            assert!(raw.len() <= data.len());
            let _ = section.digest("-Digest");
            let _ = section.check_digest("-Digest", raw);
        }
    }
});
