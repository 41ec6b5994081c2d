#![no_main]

use libfuzzer_sys::fuzz_target;
use shiguredo_moq_container::{Decode, Encode, fragment::InitializationSegment};

fuzz_target!(|data: &[u8]| {
    if let Ok((segment, _)) = InitializationSegment::decode(data) {
        let _ = segment.validate();
        let _ = segment.encode_to_vec();
    }
});
