#![no_main]

use libfuzzer_sys::fuzz_target;
use shiguredo_moq_container::{Decode, Encode, Varint};

fuzz_target!(|data: &[u8]| {
    if let Ok((varint, _)) = Varint::decode(data) {
        let _ = varint.encode_to_vec();
    }
});
