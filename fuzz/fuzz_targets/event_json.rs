#![no_main]

use libfuzzer_sys::fuzz_target;
use logforge_core::Event;

fuzz_target!(|data: &[u8]| {
    if let Ok(mut event) = Event::from_json(data) {
        // 정규화된 이벤트는 항상 다시 직렬화 가능해야 함
        let encoded = event.bytes();
        let _ = Event::from_json(&encoded);
    }
});
