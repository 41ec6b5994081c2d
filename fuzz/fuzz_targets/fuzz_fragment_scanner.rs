#![no_main]

use libfuzzer_sys::fuzz_target;
use shiguredo_moq_container::fragment::CmafFragmentScanner;

fuzz_target!(|data: &[u8]| {
    for fragment in CmafFragmentScanner::new(data) {
        let _ = fragment;
    }
});
