#![no_main]

use libfuzzer_sys::fuzz_target;
use shiguredo_moq_container::{Decode, Encode, fragment::CmafFragment};

fuzz_target!(|data: &[u8]| {
    if let Ok((fragment, _)) = CmafFragment::decode(data) {
        let _ = fragment.validate();
        let _ = fragment.encode_to_vec();
    }
});
