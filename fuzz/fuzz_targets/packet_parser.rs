#![no_main]

use libfuzzer_sys::fuzz_target;
use xids_xdp_engine::inspect;

fuzz_target!(|data: &[u8]| {
    // 어떤 프레임이든 패닉 없이 판정하고, 페이로드 오프셋은 프레임 안에 있어야 한다
    if let Some(offset) = inspect(data).payload_offset() {
        assert!(offset <= data.len());
    }
});
