#![no_main]

use libfuzzer_sys::fuzz_target;
use logforge_core::{Event, Map};
use logforge_processor::{ActionContext, ActionRegistry, compile_script};

fuzz_target!(|data: &[u8]| {
    let Ok(source) = std::str::from_utf8(data) else {
        return;
    };
    let registry = ActionRegistry::with_defaults();
    let ctx = ActionContext::default();
    // 컴파일에 성공한 프로그램은 빈 이벤트에서도 패닉 없이 실행되어야 함
    if let Ok(program) = compile_script(source, &registry, &ctx) {
        let mut event = Event::new(Map::new());
        program.execute(&mut event);
    }
});
