#![no_main]

use libfuzzer_sys::fuzz_target;
use xids_dfa::SignatureSet;

fuzz_target!(|data: &[u8]| {
    // 크래시나 패닉 없이 Ok 또는 Err을 반환해야 한다
    if let Ok(set) = SignatureSet::parse(data, "fuzz") {
        assert!(!set.is_empty());
        assert!(set.iter().all(|s| !s.is_empty()));
    }
});
