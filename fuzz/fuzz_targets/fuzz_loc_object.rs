#![no_main]

use libfuzzer_sys::fuzz_target;
use shiguredo_moq_container::{TrackKind, loc::LocObject};

fuzz_target!(|data: &[u8]| {
    if let Ok(object) = LocObject::decode(data, &[], TrackKind::Video) {
        let _ = object.encode_header_extensions();
    }
});
